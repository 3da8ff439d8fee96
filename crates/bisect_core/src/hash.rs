//! Checkpoint hashes as emitted by the instrumented pipeline.
//!
//! Instrumentation emits 64-bit content hashes of intermediate buffers,
//! either as JSON integers or as hex strings.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A 64-bit checkpoint hash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TraceHash(u64);

impl TraceHash {
    /// Create from raw value
    #[must_use]
    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Create from a signed value, reinterpreting its two's complement bits
    #[must_use]
    pub const fn from_signed(value: i64) -> Self {
        Self(value as u64)
    }

    /// Get raw value
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// Convert to big-endian hex string (16 chars)
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0.to_be_bytes())
    }

    /// Parse from hex string, with or without a `0x` prefix
    ///
    /// # Errors
    ///
    /// Returns error if hex is invalid or longer than 8 bytes
    pub fn from_hex(text: &str) -> Result<Self, HashError> {
        let digits = text
            .strip_prefix("0x")
            .or_else(|| text.strip_prefix("0X"))
            .unwrap_or(text);
        if digits.is_empty() {
            return Err(HashError::InvalidHex);
        }
        let padded = if digits.len() % 2 == 1 {
            format!("0{}", digits)
        } else {
            digits.to_string()
        };
        let bytes = hex::decode(&padded).map_err(|_| HashError::InvalidHex)?;
        if bytes.len() > 8 {
            return Err(HashError::InvalidLength(bytes.len()));
        }
        let mut arr = [0u8; 8];
        arr[8 - bytes.len()..].copy_from_slice(&bytes);
        Ok(Self(u64::from_be_bytes(arr)))
    }
}

impl fmt::Display for TraceHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

impl From<u64> for TraceHash {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Hash-related errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HashError {
    /// Invalid hex encoding
    #[error("Invalid hex encoding")]
    InvalidHex,
    /// Invalid length (more than 8 bytes)
    #[error("Invalid hash length: {0} (expected at most 8)")]
    InvalidLength(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_roundtrip() {
        let h = TraceHash::from_raw(0xdead_beef_0000_0001);
        assert_eq!(h.to_hex(), "deadbeef00000001");
        assert_eq!(TraceHash::from_hex(&h.to_hex()).unwrap(), h);
    }

    #[test]
    fn test_from_hex_prefix_and_odd_length() {
        assert_eq!(TraceHash::from_hex("0x1").unwrap().as_u64(), 1);
        assert_eq!(TraceHash::from_hex("0XfF").unwrap().as_u64(), 255);
        assert_eq!(TraceHash::from_hex("abc").unwrap().as_u64(), 0xabc);
    }

    #[test]
    fn test_from_hex_errors() {
        assert_eq!(TraceHash::from_hex("0x"), Err(HashError::InvalidHex));
        assert_eq!(TraceHash::from_hex("zz"), Err(HashError::InvalidHex));
        assert_eq!(
            TraceHash::from_hex("00112233445566778899"),
            Err(HashError::InvalidLength(10))
        );
    }

    #[test]
    fn test_from_signed() {
        assert_eq!(TraceHash::from_signed(-1).as_u64(), u64::MAX);
        assert_eq!(TraceHash::from_signed(7).as_u64(), 7);
    }

    #[test]
    fn test_display() {
        assert_eq!(TraceHash::from_raw(2).to_string(), "0x0000000000000002");
    }
}
