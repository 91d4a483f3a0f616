//! Upload constraints: size ceiling, extension allow-list and filename
//! sanitization. Everything here is pure apart from the seekable reader
//! passed to [`validate_size`].

use chrono::Utc;
use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};

/// Extensions accepted when the allow-list is enforced.
pub const ALLOWED_EXTENSIONS: [&str; 9] = [
    "jpg", "jpeg", "png", "gif", "pdf", "txt", "doc", "docx", "zip",
];

/// Longest filename (in characters) kept after sanitizing.
pub const MAX_FILENAME_CHARS: usize = 255;

const REPLACEMENT: char = '_';

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("file size exceeds the limit of {max} bytes")]
    SizeExceeded { max: u64 },
    #[error("file `{0}` has no extension")]
    NoExtension(String),
    #[error("file extension `{0}` is not allowed")]
    ExtensionRejected(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Measure a seekable stream without buffering it.
///
/// Reads at most `max_bytes + 1` bytes and fails once the running total goes
/// past `max_bytes`. The reader is rewound to the start afterwards so a later
/// full read sees every byte. Returns the measured size.
pub async fn validate_size<R>(reader: &mut R, max_bytes: u64) -> Result<u64, ValidationError>
where
    R: AsyncRead + AsyncSeek + Unpin,
{
    let mut bounded = (&mut *reader).take(max_bytes.saturating_add(1));
    let measured = tokio::io::copy(&mut bounded, &mut tokio::io::sink()).await;
    reader.rewind().await?;

    let measured = measured?;
    if measured > max_bytes {
        return Err(ValidationError::SizeExceeded { max: max_bytes });
    }
    Ok(measured)
}

/// Check the lowercase extension (text after the last `.`) against
/// [`ALLOWED_EXTENSIONS`].
pub fn validate_extension(filename: &str) -> Result<(), ValidationError> {
    let extension = match filename.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() => ext.to_ascii_lowercase(),
        _ => return Err(ValidationError::NoExtension(filename.to_string())),
    };

    if ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
        Ok(())
    } else {
        Err(ValidationError::ExtensionRejected(extension))
    }
}

/// Turn a client-declared filename into a safe storage key.
///
/// Keeps the final path segment only, neutralizes `..` and shell/path meta
/// characters, caps the length at [`MAX_FILENAME_CHARS`] and falls back to
/// `upload-<timestamp>.bin` when nothing usable is left. Applying it twice
/// yields the same name.
pub fn sanitize_filename(name: &str) -> String {
    let last_segment = name
        .trim()
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();

    let replaced: String = last_segment
        .replace("..", "_")
        .chars()
        .map(|c| if is_forbidden(c) { REPLACEMENT } else { c })
        .collect();

    let truncated: String = replaced.chars().take(MAX_FILENAME_CHARS).collect();
    let cleaned = truncated.trim();

    if cleaned.is_empty() || cleaned == "." {
        return generated_name();
    }
    cleaned.to_string()
}

fn is_forbidden(c: char) -> bool {
    matches!(c, '/' | '\\' | '`' | '|' | '>' | '<' | ':' | '"' | '*' | '?') || c.is_control()
}

fn generated_name() -> String {
    format!("upload-{}.bin", Utc::now().timestamp_millis())
}
