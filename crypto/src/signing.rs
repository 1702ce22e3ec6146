//! Recoverable secp256k1 signatures over transaction bytes
//!
//! Signatures are 65 bytes (r ‖ s ‖ v) over sha256 of the signed bytes;
//! recovery yields the signer public key and therefore the address.

use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use scrutonet_core::{Address, ScrutonetError, ScrutonetResult};
use sha2::{Digest, Sha256};

use crate::keys::{address_from_public_key, KeyPair};

/// Recoverable signature length: 64-byte r‖s plus one recovery byte
pub const SIGNATURE_LENGTH: usize = 65;

/// Sign a message, returning the 65-byte recoverable signature
pub fn sign_recoverable(keypair: &KeyPair, message: &[u8]) -> ScrutonetResult<Vec<u8>> {
    let digest = Sha256::digest(message);
    let (signature, recovery_id) = keypair
        .signing_key()
        .sign_prehash_recoverable(&digest)
        .map_err(|e| ScrutonetError::BadSignature(e.to_string()))?;

    let mut out = signature.to_bytes().to_vec();
    out.push(recovery_id.to_byte());
    Ok(out)
}

/// Recover the compressed public key that signed `message`
pub fn recover_public_key(message: &[u8], signature: &[u8]) -> ScrutonetResult<Vec<u8>> {
    if signature.len() != SIGNATURE_LENGTH {
        return Err(ScrutonetError::BadSignature(format!(
            "signature must be {} bytes, got {}",
            SIGNATURE_LENGTH,
            signature.len()
        )));
    }

    let sig = Signature::from_slice(&signature[..64])
        .map_err(|e| ScrutonetError::BadSignature(e.to_string()))?;
    let recovery_id = RecoveryId::from_byte(signature[64])
        .ok_or_else(|| ScrutonetError::BadSignature("invalid recovery byte".into()))?;

    let digest = Sha256::digest(message);
    let verifying_key = VerifyingKey::recover_from_prehash(&digest, &sig, recovery_id)
        .map_err(|e| ScrutonetError::BadSignature(e.to_string()))?;

    Ok(verifying_key.to_sec1_bytes().to_vec())
}

/// Recover the signer address from a message and its recoverable signature
pub fn recover_address(message: &[u8], signature: &[u8]) -> ScrutonetResult<Address> {
    Ok(address_from_public_key(&recover_public_key(
        message, signature,
    )?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_recover() {
        let kp = KeyPair::generate();
        let message = b"ballot bytes";

        let sig = sign_recoverable(&kp, message).unwrap();
        assert_eq!(sig.len(), SIGNATURE_LENGTH);

        let pubkey = recover_public_key(message, &sig).unwrap();
        assert_eq!(pubkey, kp.public_key_bytes());
        assert_eq!(recover_address(message, &sig).unwrap(), kp.address());
    }

    #[test]
    fn test_recover_wrong_message_gives_other_signer() {
        let kp = KeyPair::generate();
        let sig = sign_recoverable(&kp, b"message one").unwrap();

        // Recovery over different bytes either fails or yields another key
        match recover_address(b"message two", &sig) {
            Ok(addr) => assert_ne!(addr, kp.address()),
            Err(_) => {}
        }
    }

    #[test]
    fn test_bad_signature_length() {
        assert!(recover_public_key(b"m", &[0u8; 10]).is_err());
    }
}
