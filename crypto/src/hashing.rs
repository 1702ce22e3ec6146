//! Hashing functions using BLAKE3 (with SHA-256 fallback) and the
//! census merkle tree primitives.

use scrutonet_core::{Hash, ScrutonetError, ScrutonetResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Compute BLAKE3 hash of data
pub fn blake3_hash(data: &[u8]) -> Hash {
    let hash = blake3::hash(data);
    Hash::from_bytes(*hash.as_bytes())
}

/// Compute SHA-256 hash of data (fallback)
pub fn sha256_hash(data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&result);
    Hash::from_bytes(bytes)
}

/// Default hash function (BLAKE3)
pub fn hash(data: &[u8]) -> Hash {
    blake3_hash(data)
}

/// Hash multiple pieces of data
pub fn hash_multiple(parts: &[&[u8]]) -> Hash {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(part);
    }
    let hash = hasher.finalize();
    Hash::from_bytes(*hash.as_bytes())
}

/// Merkle tree root computation
pub fn merkle_root(leaves: &[Hash]) -> Hash {
    if leaves.is_empty() {
        return Hash::ZERO;
    }

    if leaves.len() == 1 {
        return leaves[0];
    }

    let mut current_level: Vec<Hash> = leaves.to_vec();

    while current_level.len() > 1 {
        let mut next_level = Vec::new();

        for chunk in current_level.chunks(2) {
            let hash = if chunk.len() == 2 {
                hash_multiple(&[chunk[0].as_bytes(), chunk[1].as_bytes()])
            } else {
                // Odd number: hash with itself
                hash_multiple(&[chunk[0].as_bytes(), chunk[0].as_bytes()])
            };
            next_level.push(hash);
        }

        current_level = next_level;
    }

    current_level[0]
}

/// One level of a merkle inclusion proof
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    pub sibling: Hash,
    /// Sibling sits on the left of the running hash
    pub left: bool,
}

/// Merkle inclusion proof for one census leaf.
///
/// Pairing matches `merkle_root`: odd nodes pair with themselves.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub steps: Vec<ProofStep>,
}

impl MerkleProof {
    pub fn verify(&self, root: &Hash, leaf: &Hash) -> bool {
        let mut acc = *leaf;
        for step in &self.steps {
            acc = if step.left {
                hash_multiple(&[step.sibling.as_bytes(), acc.as_bytes()])
            } else {
                hash_multiple(&[acc.as_bytes(), step.sibling.as_bytes()])
            };
        }
        acc == *root
    }

    /// Hex wire encoding used inside vote transactions
    pub fn encode(&self) -> String {
        hex::encode(bincode::serialize(self).unwrap_or_default())
    }

    pub fn decode(s: &str) -> ScrutonetResult<Self> {
        let bytes =
            hex::decode(s).map_err(|e| ScrutonetError::Deserialization(e.to_string()))?;
        bincode::deserialize(&bytes).map_err(|e| ScrutonetError::Deserialization(e.to_string()))
    }
}

/// Compute the merkle root of `leaves` together with one inclusion proof per
/// leaf. Used by census tooling and tests; verification lives in
/// [`MerkleProof::verify`].
pub fn merkle_proofs(leaves: &[Hash]) -> (Hash, Vec<MerkleProof>) {
    if leaves.is_empty() {
        return (Hash::ZERO, Vec::new());
    }

    let mut proofs = vec![MerkleProof::default(); leaves.len()];
    // Position of each original leaf within the current level
    let mut positions: Vec<usize> = (0..leaves.len()).collect();
    let mut current_level: Vec<Hash> = leaves.to_vec();

    while current_level.len() > 1 {
        for (i, pos) in positions.iter_mut().enumerate() {
            let sibling_index = if *pos % 2 == 0 { *pos + 1 } else { *pos - 1 };
            let sibling = if sibling_index < current_level.len() {
                current_level[sibling_index]
            } else {
                // Odd node pairs with itself
                current_level[*pos]
            };
            proofs[i].steps.push(ProofStep {
                sibling,
                left: *pos % 2 == 1,
            });
            *pos /= 2;
        }

        let mut next_level = Vec::new();
        for chunk in current_level.chunks(2) {
            let hash = if chunk.len() == 2 {
                hash_multiple(&[chunk[0].as_bytes(), chunk[1].as_bytes()])
            } else {
                hash_multiple(&[chunk[0].as_bytes(), chunk[0].as_bytes()])
            };
            next_level.push(hash);
        }
        current_level = next_level;
    }

    (current_level[0], proofs)
}

/// Incremental hasher for large data
pub struct IncrementalHasher {
    hasher: blake3::Hasher,
}

impl IncrementalHasher {
    pub fn new() -> Self {
        Self {
            hasher: blake3::Hasher::new(),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    pub fn finalize(self) -> Hash {
        let hash = self.hasher.finalize();
        Hash::from_bytes(*hash.as_bytes())
    }
}

impl Default for IncrementalHasher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blake3_hash() {
        let data = b"Hello, SCRUTONET!";
        let hash1 = blake3_hash(data);
        let hash2 = blake3_hash(data);

        assert_eq!(hash1, hash2);
        assert_ne!(hash1, Hash::ZERO);
    }

    #[test]
    fn test_sha256_differs_from_blake3() {
        let data = b"Hello, SCRUTONET!";
        assert_ne!(blake3_hash(data), sha256_hash(data));
    }

    #[test]
    fn test_merkle_root_deterministic() {
        let leaves = vec![hash(b"leaf1"), hash(b"leaf2"), hash(b"leaf3")];
        assert_eq!(merkle_root(&leaves), merkle_root(&leaves));
        assert_ne!(merkle_root(&leaves), Hash::ZERO);
    }

    #[test]
    fn test_merkle_root_empty() {
        assert_eq!(merkle_root(&[]), Hash::ZERO);
    }

    #[test]
    fn test_proofs_match_root() {
        for n in 1..=9usize {
            let leaves: Vec<Hash> = (0..n).map(|i| hash(&[i as u8])).collect();
            let (root, proofs) = merkle_proofs(&leaves);
            assert_eq!(root, merkle_root(&leaves), "n = {}", n);
            for (leaf, proof) in leaves.iter().zip(&proofs) {
                assert!(proof.verify(&root, leaf), "n = {}", n);
            }
        }
    }

    #[test]
    fn test_proof_rejects_wrong_root() {
        let leaves: Vec<Hash> = (0..4u8).map(|i| hash(&[i])).collect();
        let (_, proofs) = merkle_proofs(&leaves);
        let other_root = hash(b"other");
        assert!(!proofs[0].verify(&other_root, &leaves[0]));
    }

    #[test]
    fn test_proof_wire_roundtrip() {
        let leaves: Vec<Hash> = (0..3u8).map(|i| hash(&[i])).collect();
        let (root, proofs) = merkle_proofs(&leaves);
        let decoded = MerkleProof::decode(&proofs[1].encode()).unwrap();
        assert!(decoded.verify(&root, &leaves[1]));
    }

    #[test]
    fn test_incremental_hasher() {
        let mut hasher = IncrementalHasher::new();
        hasher.update(b"Hello, ");
        hasher.update(b"SCRUTONET!");
        assert_eq!(hasher.finalize(), hash(b"Hello, SCRUTONET!"));
    }
}
