//! Checksum utilities for partition content and file verification

use crate::error::{CommonError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Checksum algorithm recorded alongside every published checksum
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    #[default]
    Sha256,
}

impl std::fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChecksumAlgorithm::Sha256 => write!(f, "sha256"),
        }
    }
}

/// SHA-256 of an in-memory buffer, hex encoded
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Incremental hasher over a sequence of canonical lines.
///
/// Each line is terminated with `\n` before hashing so that
/// `["ab", "c"]` and `["a", "bc"]` never collide.
#[derive(Default)]
pub struct LineHasher {
    hasher: Sha256,
}

impl LineHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update_line(&mut self, line: &[u8]) {
        self.hasher.update(line);
        self.hasher.update(b"\n");
    }

    pub fn finalize_hex(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

/// Verify that a buffer hashes to the expected value
pub fn verify_checksum(data: &[u8], expected: &str) -> Result<()> {
    let actual = sha256_hex(data);
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(CommonError::ChecksumMismatch {
            expected: expected.to_string(),
            actual,
        })
    }
}
