//! SCRUTONET Cryptography
//!
//! Hashing and merkle inclusion proofs, recoverable secp256k1 transaction
//! signatures, ed25519 validator keys, and the NaCl-style sealed boxes used
//! for encrypted vote packages.

pub mod hashing;
pub mod keys;
pub mod signing;
pub mod sealedbox;
