//! Hashing utilities for content-addressed verification.
//!
//! This module provides:
//! - `Sha256Digest`: A fixed-length SHA-256 digest with hex round-tripping
//! - `hash_bytes()`: Arbitrary byte hashing

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::consts::SHA256_LEN;

/// Error parsing a hex-encoded digest.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DigestError {
  #[error("expected {expected} hex characters, got {actual}")]
  Length { expected: usize, actual: usize },

  #[error("invalid hex digest: {0}")]
  Hex(String),
}

/// A full SHA-256 digest identifying a module's expected bytes.
///
/// # Format
///
/// Displayed and serialized as a lowercase hexadecimal string (64 characters).
/// Parsing accepts upper or lower case but nothing shorter or longer.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Sha256Digest([u8; SHA256_LEN]);

impl Sha256Digest {
  /// Compute the digest of `data`.
  pub fn compute(data: &[u8]) -> Self {
    let mut hasher = Sha256::new();
    hasher.update(data);
    Self(hasher.finalize().into())
  }

  pub fn as_bytes(&self) -> &[u8; SHA256_LEN] {
    &self.0
  }

  pub fn to_hex(&self) -> String {
    hex::encode(self.0)
  }

  /// Returns true if `data` hashes to this digest.
  pub fn matches(&self, data: &[u8]) -> bool {
    Self::compute(data) == *self
  }
}

impl FromStr for Sha256Digest {
  type Err = DigestError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    if s.len() != SHA256_LEN * 2 {
      return Err(DigestError::Length {
        expected: SHA256_LEN * 2,
        actual: s.len(),
      });
    }

    let mut bytes = [0u8; SHA256_LEN];
    hex::decode_to_slice(s, &mut bytes).map_err(|e| DigestError::Hex(e.to_string()))?;
    Ok(Self(bytes))
  }
}

impl fmt::Display for Sha256Digest {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.to_hex())
  }
}

impl fmt::Debug for Sha256Digest {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Sha256Digest({})", self.to_hex())
  }
}

impl Serialize for Sha256Digest {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&self.to_hex())
  }
}

impl<'de> Deserialize<'de> for Sha256Digest {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let s = String::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
  }
}

/// Hash arbitrary bytes.
///
/// Shorthand for [`Sha256Digest::compute`].
pub fn hash_bytes(data: &[u8]) -> Sha256Digest {
  Sha256Digest::compute(data)
}
