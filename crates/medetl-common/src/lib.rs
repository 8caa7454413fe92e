//! medetl Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared utilities and error handling for the medetl workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`CommonError`] and the crate [`Result`] alias
//! - **Checksums**: SHA-256 helpers for partition content and data-file hashes
//! - **Logging**: `tracing` subscriber bootstrap shared by every binary
//!
//! # Example
//!
//! ```no_run
//! use medetl_common::checksum::{sha256_hex, verify_checksum};
//!
//! fn check(bytes: &[u8], recorded: &str) -> medetl_common::Result<()> {
//!     verify_checksum(bytes, recorded)
//! }
//!
//! let recorded = sha256_hex(b"part-00000");
//! check(b"part-00000", &recorded).ok();
//! ```

pub mod checksum;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{CommonError, Result};
