// Path: crates/types/src/address.rs
//! Contract addresses and related helpers.

use parity_scale_codec::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// The length in bytes of every account address.
pub const ADDRESS_LEN: usize = 32;

/// An opaque 32-byte account identifier.
///
/// The shard an address belongs to is derived by the blockchain hook, never
/// by the address itself.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Encode, Decode, Serialize, Deserialize,
)]
pub struct Address(pub [u8; ADDRESS_LEN]);

impl Address {
    /// The all-zero address.
    pub const ZERO: Address = Address([0u8; ADDRESS_LEN]);

    /// Wraps raw bytes into an address, failing when the length is wrong.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; ADDRESS_LEN] = bytes.try_into().ok()?;
        Some(Address(arr))
    }

    /// Returns the raw bytes of the address.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Builds an address from an ASCII tag, right-padded with `.` to 32 bytes.
    ///
    /// This is the convention test fixtures use for readable addresses.
    pub fn from_tag(tag: &str) -> Self {
        let mut bytes = [b'.'; ADDRESS_LEN];
        let n = tag.len().min(ADDRESS_LEN);
        bytes[..n].copy_from_slice(&tag.as_bytes()[..n]);
        Address(bytes)
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; ADDRESS_LEN]> for Address {
    fn from(bytes: [u8; ADDRESS_LEN]) -> Self {
        Address(bytes)
    }
}

impl std::fmt::Debug for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Address({})", hex::encode(self.0))
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}
