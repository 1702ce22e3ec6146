//! NaCl-style sealed boxes for encrypted vote packages
//!
//! A sealed blob is `ephemeral_pk(32) ‖ nonce(24) ‖ ciphertext`. Encrypted
//! processes wrap the vote package in one layer per published encryption key;
//! the scrutinizer peels the layers with the revealed private keys.

use crypto_box::{
    aead::{generic_array::GenericArray, Aead, AeadCore, OsRng},
    PublicKey, SalsaBox, SecretKey,
};
use scrutonet_core::{ScrutonetError, ScrutonetResult};

use crate::hashing::blake3_hash;

/// X25519 key length
pub const KEY_LENGTH: usize = 32;
const NONCE_LENGTH: usize = 24;

/// X25519 keypair filling one process encryption-key slot
pub struct EncryptionKeyPair {
    secret: SecretKey,
}

impl EncryptionKeyPair {
    pub fn generate() -> Self {
        Self {
            secret: SecretKey::generate(&mut OsRng),
        }
    }

    pub fn from_secret_hex(s: &str) -> ScrutonetResult<Self> {
        Ok(Self {
            secret: secret_from_hex(s)?,
        })
    }

    pub fn public_hex(&self) -> String {
        hex::encode(self.secret.public_key().as_bytes())
    }

    pub fn secret_hex(&self) -> String {
        hex::encode(self.secret.to_bytes())
    }
}

fn secret_from_hex(s: &str) -> ScrutonetResult<SecretKey> {
    let bytes = hex::decode(s).map_err(|_| ScrutonetError::InvalidPrivateKey)?;
    let arr: [u8; KEY_LENGTH] = bytes
        .try_into()
        .map_err(|_| ScrutonetError::InvalidPrivateKey)?;
    Ok(SecretKey::from(arr))
}

fn public_from_hex(s: &str) -> ScrutonetResult<PublicKey> {
    let bytes = hex::decode(s).map_err(|_| ScrutonetError::InvalidPublicKey)?;
    let arr: [u8; KEY_LENGTH] = bytes
        .try_into()
        .map_err(|_| ScrutonetError::InvalidPublicKey)?;
    Ok(PublicKey::from(arr))
}

/// Derive the hex public key matching a hex private key.
/// Used to check a revealed private key against the published public key.
pub fn public_for_secret(secret_hex: &str) -> ScrutonetResult<String> {
    Ok(hex::encode(
        secret_from_hex(secret_hex)?.public_key().as_bytes(),
    ))
}

/// Commitment for a reveal key: blake3 over the raw reveal-key bytes, hex
pub fn commitment_for_reveal(reveal_hex: &str) -> ScrutonetResult<String> {
    let bytes = hex::decode(reveal_hex).map_err(|_| ScrutonetError::InvalidPrivateKey)?;
    Ok(blake3_hash(&bytes).to_hex())
}

/// Seal a plaintext to the given hex public key
pub fn seal(recipient_pub_hex: &str, plaintext: &[u8]) -> ScrutonetResult<Vec<u8>> {
    let recipient = public_from_hex(recipient_pub_hex)?;
    let ephemeral = SecretKey::generate(&mut OsRng);
    let ephemeral_pub = ephemeral.public_key();

    let sbox = SalsaBox::new(&recipient, &ephemeral);
    let nonce = SalsaBox::generate_nonce(&mut OsRng);
    let ciphertext = sbox
        .encrypt(&nonce, plaintext)
        .map_err(|_| ScrutonetError::Serialization("sealed box encryption failed".into()))?;

    let mut out = ephemeral_pub.as_bytes().to_vec();
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Open a sealed blob with the recipient's hex private key
pub fn open(recipient_secret_hex: &str, blob: &[u8]) -> ScrutonetResult<Vec<u8>> {
    if blob.len() < KEY_LENGTH + NONCE_LENGTH {
        return Err(ScrutonetError::Deserialization(
            "sealed blob too short".into(),
        ));
    }

    let secret = secret_from_hex(recipient_secret_hex)?;
    let mut ephemeral_pub = [0u8; KEY_LENGTH];
    ephemeral_pub.copy_from_slice(&blob[..KEY_LENGTH]);
    let nonce = &blob[KEY_LENGTH..KEY_LENGTH + NONCE_LENGTH];
    let ciphertext = &blob[KEY_LENGTH + NONCE_LENGTH..];

    let sbox = SalsaBox::new(&PublicKey::from(ephemeral_pub), &secret);
    sbox.decrypt(GenericArray::from_slice(nonce), ciphertext)
        .map_err(|_| ScrutonetError::Deserialization("sealed box decryption failed".into()))
}
