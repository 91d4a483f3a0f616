//! Upload files to an S3-compatible object store and hand back time-limited
//! download links.
//!
//! The binary in `main.rs` wires configuration, logging and the server; the
//! library exposes the router so it can be driven directly in tests.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
