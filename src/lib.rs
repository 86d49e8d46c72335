//! gpg-bridge library
//!
//! Drives the gpg executable as a child process and turns its `--status-fd`
//! output into typed results:
//! - Status-line parsing and the status code registry
//! - Process invocation with concurrent stream draining and a deadline
//! - Classification of results into user-facing errors
//! - gpg-agent liveness checks and configuration

pub mod agent;
pub mod classify;
pub mod config;
pub mod error;
pub mod gpg;
pub mod invoker;
pub mod keys;
pub mod status;

pub use error::{ErrorKind, GpgError};
pub use gpg::Gpg;
