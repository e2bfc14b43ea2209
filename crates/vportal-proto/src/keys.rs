//! WireGuard key handling
//!
//! The portal never sees a WireGuard private key: clients generate their own
//! key pair and only submit the public half.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Raw length of a Curve25519 public key
pub const WIREGUARD_KEY_LEN: usize = 32;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("Public key is not valid base64: {0}")]
    Encoding(String),

    #[error("Public key must be {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },
}

/// A validated, canonically encoded WireGuard public key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WireGuardPublicKey(String);

impl WireGuardPublicKey {
    /// Parse a base64 encoded key, rejecting anything that does not decode
    /// to exactly 32 bytes.
    pub fn parse(encoded: &str) -> Result<Self, KeyError> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| KeyError::Encoding(e.to_string()))?;

        if bytes.len() != WIREGUARD_KEY_LEN {
            return Err(KeyError::Length {
                expected: WIREGUARD_KEY_LEN,
                actual: bytes.len(),
            });
        }

        // Re-encode so equal keys always compare (and store) equal
        Ok(Self(STANDARD.encode(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WireGuardPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for WireGuardPublicKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for WireGuardPublicKey {
    type Error = KeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<WireGuardPublicKey> for String {
    fn from(key: WireGuardPublicKey) -> Self {
        key.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_key() {
        let key = WireGuardPublicKey::parse("eRPR1zoK0lm97k5Vgb3ViEX6lNWyay6V6ynEMnYs+2w=").unwrap();
        assert_eq!(key.as_str(), "eRPR1zoK0lm97k5Vgb3ViEX6lNWyay6V6ynEMnYs+2w=");
    }

    #[test]
    fn test_parse_trims_whitespace() {
        let key =
            WireGuardPublicKey::parse(" gc6RjjPtIKeflbOun+dyAssnsdXzD6bmWisbxJrZiB0=\n").unwrap();
        assert_eq!(key.as_str(), "gc6RjjPtIKeflbOun+dyAssnsdXzD6bmWisbxJrZiB0=");
    }

    #[test]
    fn test_parse_rejects_bad_base64() {
        let result = WireGuardPublicKey::parse("not a key!");
        assert!(matches!(result, Err(KeyError::Encoding(_))));
    }

    #[test]
    fn test_parse_rejects_wrong_length() {
        // 16 bytes of zeroes
        let result = WireGuardPublicKey::parse("AAAAAAAAAAAAAAAAAAAAAA==");
        assert_eq!(
            result,
            Err(KeyError::Length {
                expected: 32,
                actual: 16
            })
        );
    }
}
