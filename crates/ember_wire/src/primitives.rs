//! Fixed-size primitives: validator addresses and 256-bit hashes.

#[cfg(test)]
#[path = "primitives_test.rs"]
mod primitives_test;

use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};

use crate::converters::WireError;

/// A validator address: the rightmost 20 bytes of the keccak hash of the
/// validator's public key.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(pub [u8; 20]);

/// A 256-bit hash.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct B256(pub [u8; 32]);

impl Address {
    /// The all-zero address.
    pub const ZERO: Address = Address([0u8; 20]);

    /// Interpret `bytes` as an address. Errors unless exactly 20 bytes long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, WireError> {
        let inner: [u8; 20] = bytes
            .try_into()
            .map_err(|_| WireError::InvalidLength { field: "address", got: bytes.len() })?;
        Ok(Address(inner))
    }

    /// The raw bytes of the address.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl B256 {
    /// The all-zero hash, used as "no digest yet".
    pub const ZERO: B256 = B256([0u8; 32]);

    /// Interpret `bytes` as a hash. Errors unless exactly 32 bytes long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, WireError> {
        let inner: [u8; 32] = bytes
            .try_into()
            .map_err(|_| WireError::InvalidLength { field: "hash", got: bytes.len() })?;
        Ok(B256(inner))
    }

    /// The raw bytes of the hash.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Whether this is the zero hash.
    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

/// Keccak-256 of `data`.
pub fn keccak256(data: &[u8]) -> B256 {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    B256(hasher.finalize().into())
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for B256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for B256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for Address {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).map_err(|_| WireError::InvalidHex)?;
        Address::from_slice(&bytes)
    }
}

impl FromStr for B256 {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).map_err(|_| WireError::InvalidHex)?;
        B256::from_slice(&bytes)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

impl Serialize for B256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for B256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}
