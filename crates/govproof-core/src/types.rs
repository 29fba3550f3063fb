use core::{fmt, str::FromStr};

pub use primitive_types::U256;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::keccak::keccak256;

pub type Bytes32 = [u8; 32];

/// Errors raised while parsing textual inputs (hex, addresses, integers, timestamps).
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("invalid hex string: {0}")]
    Hex(String),
    #[error("expected {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },
    #[error("invalid integer: {0}")]
    Integer(String),
    #[error("invalid timestamp: {0}")]
    Timestamp(String),
    #[error("invalid sign-in message: {0}")]
    Message(String),
}

/// A 20-byte Ethereum account address.
///
/// Equality is over the raw bytes, so two textual forms that differ only in
/// hex-digit case compare equal once parsed.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub const ZERO: Self = Self([0u8; 20]);

    pub fn from_slice(bytes: &[u8]) -> Result<Self, ParseError> {
        if bytes.len() != 20 {
            return Err(ParseError::Length {
                expected: 20,
                actual: bytes.len(),
            });
        }
        let mut out = [0u8; 20];
        out.copy_from_slice(bytes);
        Ok(Self(out))
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// EIP-55 mixed-case checksum encoding, `0x`-prefixed.
    pub fn to_checksum(&self) -> String {
        let lower = hex::encode(self.0);
        let hash = keccak256(lower.as_bytes());

        let mut out = String::with_capacity(42);
        out.push_str("0x");
        for (i, c) in lower.chars().enumerate() {
            let nibble = if i % 2 == 0 {
                hash[i / 2] >> 4
            } else {
                hash[i / 2] & 0x0f
            };
            if c.is_ascii_alphabetic() && nibble >= 8 {
                out.push(c.to_ascii_uppercase());
            } else {
                out.push(c);
            }
        }
        out
    }
}

impl FromStr for Address {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let stripped = strip_0x(s.trim());
        if stripped.len() != 40 {
            return Err(ParseError::Length {
                expected: 20,
                actual: stripped.len() / 2,
            });
        }
        let bytes = hex::decode(stripped).map_err(|e| ParseError::Hex(e.to_string()))?;
        Self::from_slice(&bytes)
    }
}

impl From<[u8; 20]> for Address {
    fn from(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_checksum())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_checksum())
    }
}

impl fmt::LowerHex for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            f.write_str("0x")?;
        }
        f.write_str(&hex::encode(self.0))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_checksum())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Hex / integer helpers
// ---------------------------------------------------------------------------

pub fn strip_0x(s: &str) -> &str {
    s.strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s)
}

/// Decode an even-length hex string (`0x` optional) into bytes.
pub fn decode_hex(s: &str) -> Result<Vec<u8>, ParseError> {
    hex::decode(strip_0x(s.trim())).map_err(|e| ParseError::Hex(e.to_string()))
}

/// Decode a hex quantity (odd length and leading zeros allowed) into
/// minimal big-endian bytes. `0x0` decodes to an empty vector.
pub fn decode_quantity(s: &str) -> Result<Vec<u8>, ParseError> {
    let trimmed = strip_0x(s.trim()).trim_start_matches('0');
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let padded = if trimmed.len() % 2 == 1 {
        format!("0{trimmed}")
    } else {
        trimmed.to_string()
    };
    hex::decode(padded).map_err(|e| ParseError::Hex(e.to_string()))
}

/// Decode exactly 32 bytes of hex.
pub fn decode_bytes32(s: &str) -> Result<Bytes32, ParseError> {
    let bytes = decode_hex(s)?;
    if bytes.len() != 32 {
        return Err(ParseError::Length {
            expected: 32,
            actual: bytes.len(),
        });
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}

pub fn encode_hex_prefixed(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Parse a 256-bit integer given either in decimal or as a `0x` hex quantity.
pub fn parse_u256(s: &str) -> Result<U256, ParseError> {
    let s = s.trim();
    if s.starts_with("0x") || s.starts_with("0X") {
        let bytes = decode_quantity(s)?;
        return u256_from_be_slice(&bytes).ok_or_else(|| ParseError::Integer(s.to_string()));
    }
    U256::from_dec_str(s).map_err(|_| ParseError::Integer(s.to_string()))
}

/// Interpret up to 32 big-endian bytes as a `U256`.
pub fn u256_from_be_slice(bytes: &[u8]) -> Option<U256> {
    if bytes.len() > 32 {
        return None;
    }
    Some(U256::from_big_endian(bytes))
}

/// Left-padded 32-byte big-endian representation of `value`.
pub fn u256_to_be_bytes(value: &U256) -> Bytes32 {
    let mut out = [0u8; 32];
    for (i, byte) in out.iter_mut().rev().enumerate() {
        *byte = value.byte(i);
    }
    out
}
