//! Key management for SCRUTONET
//!
//! Transaction signers (voters and oracles) use secp256k1 keypairs with
//! recoverable signatures; validators are identified by ed25519 public keys.

use k256::ecdsa::SigningKey;
use rand::rngs::OsRng;
use scrutonet_core::{Address, PublicKey, ScrutonetError, ScrutonetResult};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::hashing::blake3_hash;

/// Compressed secp256k1 public key length (SEC1)
pub const COMPRESSED_PUBKEY_LENGTH: usize = 33;

/// A secp256k1 keypair for signing transactions
#[derive(Clone)]
pub struct KeyPair {
    signing_key: SigningKey,
}

impl KeyPair {
    /// Generate a new random keypair
    pub fn generate() -> Self {
        let signing_key = SigningKey::random(&mut OsRng);
        Self { signing_key }
    }

    /// Create keypair from a 32-byte secret scalar
    pub fn from_seed(seed: &[u8; 32]) -> ScrutonetResult<Self> {
        let signing_key = SigningKey::from_bytes(k256::FieldBytes::from_slice(seed))
            .map_err(|_| ScrutonetError::InvalidPrivateKey)?;
        Ok(Self { signing_key })
    }

    /// Compressed SEC1 public key (33 bytes)
    pub fn public_key_bytes(&self) -> Vec<u8> {
        self.signing_key.verifying_key().to_sec1_bytes().to_vec()
    }

    /// The address (hash of the compressed public key)
    pub fn address(&self) -> Address {
        address_from_public_key(&self.public_key_bytes())
    }

    /// Get the internal signing key for signing operations
    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }
}

/// Derive an address from a compressed public key using BLAKE3
pub fn address_from_public_key(compressed: &[u8]) -> Address {
    let hash = blake3_hash(compressed);
    Address::from_bytes(*hash.as_bytes())
}

/// Parse and validate an ed25519 validator public key from raw bytes
pub fn validator_pub_key_from_bytes(bytes: &[u8]) -> ScrutonetResult<PublicKey> {
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| ScrutonetError::InvalidPublicKey)?;
    ed25519_dalek::VerifyingKey::from_bytes(&arr).map_err(|_| ScrutonetError::InvalidPublicKey)?;
    Ok(PublicKey::from_bytes(arr))
}

/// Parse an ed25519 validator public key from lowercase hex
pub fn validator_pub_key_from_hex(s: &str) -> ScrutonetResult<PublicKey> {
    let bytes = hex::decode(s).map_err(|_| ScrutonetError::InvalidPublicKey)?;
    validator_pub_key_from_bytes(&bytes)
}

/// Secure secret seed storage (zeroizes on drop)
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SecretSeed {
    bytes: [u8; 32],
}

impl SecretSeed {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }

    pub fn to_keypair(&self) -> ScrutonetResult<KeyPair> {
        KeyPair::from_seed(&self.bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_generation() {
        let kp = KeyPair::generate();
        assert_eq!(kp.public_key_bytes().len(), COMPRESSED_PUBKEY_LENGTH);
        assert_ne!(kp.address(), Address::ZERO);
    }

    #[test]
    fn test_keypair_from_seed_deterministic() {
        let seed = [42u8; 32];
        let kp1 = KeyPair::from_seed(&seed).unwrap();
        let kp2 = KeyPair::from_seed(&seed).unwrap();

        assert_eq!(kp1.public_key_bytes(), kp2.public_key_bytes());
        assert_eq!(kp1.address(), kp2.address());
    }

    #[test]
    fn test_zero_seed_rejected() {
        assert!(KeyPair::from_seed(&[0u8; 32]).is_err());
    }

    #[test]
    fn test_validator_pub_key_parsing() {
        let signing = ed25519_dalek::SigningKey::generate(&mut OsRng);
        let bytes = signing.verifying_key().to_bytes();
        let parsed = validator_pub_key_from_bytes(&bytes).unwrap();
        assert_eq!(parsed.as_bytes(), &bytes);

        assert!(validator_pub_key_from_bytes(&[1u8; 16]).is_err());
    }

    #[test]
    fn test_secret_seed_to_keypair() {
        let secret = SecretSeed::new([42u8; 32]);
        let kp = secret.to_keypair().unwrap();
        assert_eq!(kp.address(), KeyPair::from_seed(&[42u8; 32]).unwrap().address());
    }
}
