// Path: crates/types/src/codec.rs
//! The canonical, deterministic binary codec for persisted host state.
//!
//! Thin wrappers around `parity-scale-codec` (SCALE). Everything the host
//! writes to contract storage on its own behalf — most notably suspended
//! async contexts — goes through these two functions, so every host
//! serializes the same value to the same bytes.

use parity_scale_codec::{Decode, DecodeAll, Encode};

/// Encodes a value into its canonical byte representation.
pub fn to_bytes_canonical<T: Encode>(v: &T) -> Result<Vec<u8>, String> {
    Ok(v.encode())
}

/// Decodes a value from its canonical byte representation, rejecting
/// trailing bytes.
pub fn from_bytes_canonical<T: Decode>(b: &[u8]) -> Result<T, String> {
    T::decode_all(&mut &*b).map_err(|e| format!("canonical decode failed: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Encode, Decode, Debug, PartialEq, Eq)]
    struct Sample {
        id: u32,
        payload: Vec<u8>,
    }

    #[test]
    fn roundtrip() {
        let original = Sample {
            id: 7,
            payload: vec![1, 2, 3],
        };
        let bytes = to_bytes_canonical(&original).unwrap();
        let decoded: Sample = from_bytes_canonical(&bytes).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let original = Sample {
            id: 7,
            payload: vec![],
        };
        let mut bytes = to_bytes_canonical(&original).unwrap();
        bytes.push(0xFF);
        assert!(from_bytes_canonical::<Sample>(&bytes).is_err());
    }
}
