// Path: crates/api/src/crypto.rs
//! The cryptographic hook consumed by the EEI crypto functions.

use crucible_types::error::CryptoError;

/// Hashing and signature verification as exposed to contracts.
///
/// The host ships a default implementation; protocols with hardware-backed
/// or batched verifiers substitute their own.
pub trait VMCrypto: Send + Sync {
    /// SHA-256 digest.
    fn sha256(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Keccak-256 digest.
    fn keccak256(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// RIPEMD-160 digest.
    fn ripemd160(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Verifies a BLS signature over `message`.
    fn verify_bls(&self, key: &[u8], message: &[u8], sig: &[u8]) -> Result<(), CryptoError>;

    /// Verifies an Ed25519 signature over `message`.
    fn verify_ed25519(&self, key: &[u8], message: &[u8], sig: &[u8]) -> Result<(), CryptoError>;

    /// Verifies a secp256k1 ECDSA signature over `message`.
    fn verify_secp256k1(&self, key: &[u8], message: &[u8], sig: &[u8])
        -> Result<(), CryptoError>;
}
