// Path: crates/host/src/crypto.rs
//! The default cryptographic hook.

use ed25519_dalek::{Signature as EdSignature, Verifier, VerifyingKey};
use k256::ecdsa::signature::Verifier as _;
use k256::ecdsa::{Signature as K256Signature, VerifyingKey as K256VerifyingKey};
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};
use sha3::Keccak256;

use crucible_api::crypto::VMCrypto;
use crucible_types::error::CryptoError;

/// [`VMCrypto`] backed by pure-Rust primitives.
///
/// BLS verification is not provided here; protocols that expose `verifyBLS`
/// to contracts must substitute a hook with a real pairing implementation.
#[derive(Debug, Default, Clone)]
pub struct DefaultCrypto;

impl DefaultCrypto {
    /// A fresh hook.
    pub fn new() -> Self {
        Self
    }
}

impl VMCrypto for DefaultCrypto {
    fn sha256(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        Ok(Sha256::digest(data).to_vec())
    }

    fn keccak256(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        Ok(Keccak256::digest(data).to_vec())
    }

    fn ripemd160(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        Ok(Ripemd160::digest(data).to_vec())
    }

    fn verify_bls(&self, _key: &[u8], _message: &[u8], _sig: &[u8]) -> Result<(), CryptoError> {
        Err(CryptoError::Unsupported("bls"))
    }

    fn verify_ed25519(&self, key: &[u8], message: &[u8], sig: &[u8]) -> Result<(), CryptoError> {
        let key_bytes: [u8; 32] = key.try_into().map_err(|_| CryptoError::InvalidKey)?;
        let verifying_key =
            VerifyingKey::from_bytes(&key_bytes).map_err(|_| CryptoError::InvalidKey)?;
        let sig_bytes: [u8; 64] = sig.try_into().map_err(|_| CryptoError::InvalidSignature)?;
        let signature = EdSignature::from_bytes(&sig_bytes);
        verifying_key
            .verify(message, &signature)
            .map_err(|_| CryptoError::VerificationFailed)
    }

    fn verify_secp256k1(
        &self,
        key: &[u8],
        message: &[u8],
        sig: &[u8],
    ) -> Result<(), CryptoError> {
        let verifying_key =
            K256VerifyingKey::from_sec1_bytes(key).map_err(|_| CryptoError::InvalidKey)?;
        let signature =
            K256Signature::from_slice(sig).map_err(|_| CryptoError::InvalidSignature)?;
        verifying_key
            .verify(message, &signature)
            .map_err(|_| CryptoError::VerificationFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digests_have_expected_lengths() {
        let crypto = DefaultCrypto::new();
        assert_eq!(crypto.sha256(b"abc").unwrap().len(), 32);
        assert_eq!(crypto.keccak256(b"abc").unwrap().len(), 32);
        assert_eq!(crypto.ripemd160(b"abc").unwrap().len(), 20);
    }

    #[test]
    fn sha256_matches_known_vector() {
        let crypto = DefaultCrypto::new();
        let digest = crypto.sha256(b"abc").unwrap();
        assert_eq!(
            hex_of(&digest),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn bls_is_unsupported_by_default() {
        let crypto = DefaultCrypto::new();
        assert!(matches!(
            crypto.verify_bls(&[], &[], &[]),
            Err(CryptoError::Unsupported("bls"))
        ));
    }

    #[test]
    fn malformed_ed25519_key_is_invalid() {
        let crypto = DefaultCrypto::new();
        assert_eq!(
            crypto.verify_ed25519(&[1, 2, 3], b"msg", &[0u8; 64]),
            Err(CryptoError::InvalidKey)
        );
    }

    fn hex_of(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }
}
