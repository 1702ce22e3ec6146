//! Named subtrees of the application state store

use scrutonet_core::{Hash, ScrutonetError, ScrutonetResult};
use scrutonet_crypto::hashing::{hash_multiple, merkle_root};
use std::collections::BTreeMap;

/// The named subtrees of the application state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TreeName {
    /// Header, oracles, validators
    App,
    /// ProcessId → Process
    Process,
    /// ProcessId ‖ "_" ‖ Nullifier → Envelope
    Vote,
}

impl TreeName {
    pub fn as_str(&self) -> &'static str {
        match self {
            TreeName::App => "app",
            TreeName::Process => "process",
            TreeName::Vote => "vote",
        }
    }
}

/// Hash of one state entry; key and value both bind the subtree root
fn entry_hash(key: &[u8], value: &[u8]) -> Hash {
    hash_multiple(&[key, value])
}

/// A committed subtree backed by one sled tree.
///
/// The uncommitted working overlay lives in the [`crate::Store`]; this type
/// only ever sees committed data plus an overlay passed in by the caller.
pub struct Subtree {
    name: TreeName,
    tree: sled::Tree,
}

impl Subtree {
    pub fn open(db: &sled::Db, name: TreeName) -> ScrutonetResult<Self> {
        let tree = db
            .open_tree(name.as_str())
            .map_err(|e| ScrutonetError::InternalStorage(e.to_string()))?;
        Ok(Self { name, tree })
    }

    pub fn name(&self) -> TreeName {
        self.name
    }

    /// Read from the committed snapshot
    pub fn get(&self, key: &[u8]) -> ScrutonetResult<Option<Vec<u8>>> {
        self.tree
            .get(key)
            .map(|opt| opt.map(|v| v.to_vec()))
            .map_err(|e| ScrutonetError::InternalStorage(e.to_string()))
    }

    pub fn contains(&self, key: &[u8]) -> ScrutonetResult<bool> {
        self.tree
            .contains_key(key)
            .map_err(|e| ScrutonetError::InternalStorage(e.to_string()))
    }

    /// Committed keys under a prefix, in key order
    pub fn scan_prefix(&self, prefix: &[u8]) -> ScrutonetResult<Vec<Vec<u8>>> {
        let mut keys = Vec::new();
        for item in self.tree.scan_prefix(prefix) {
            let (key, _) =
                item.map_err(|e| ScrutonetError::InternalStorage(e.to_string()))?;
            keys.push(key.to_vec());
        }
        Ok(keys)
    }

    /// Committed (key, value) pairs under a prefix, in key order
    pub fn scan_prefix_values(
        &self,
        prefix: &[u8],
    ) -> ScrutonetResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut out = Vec::new();
        for item in self.tree.scan_prefix(prefix) {
            let (key, value) =
                item.map_err(|e| ScrutonetError::InternalStorage(e.to_string()))?;
            out.push((key.to_vec(), value.to_vec()));
        }
        Ok(out)
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Merkle root over the committed entries merged with `overlay`
    /// (overlay entries shadow committed ones). An empty subtree has the
    /// zero root.
    pub fn root_with(
        &self,
        overlay: &BTreeMap<Vec<u8>, Vec<u8>>,
    ) -> ScrutonetResult<Hash> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
        for item in self.tree.iter() {
            let (key, value) =
                item.map_err(|e| ScrutonetError::InternalStorage(e.to_string()))?;
            merged.insert(key.to_vec(), value.to_vec());
        }
        for (key, value) in overlay {
            merged.insert(key.clone(), value.clone());
        }

        let leaves: Vec<Hash> = merged
            .iter()
            .map(|(k, v)| entry_hash(k, v))
            .collect();
        Ok(merkle_root(&leaves))
    }

    /// Merkle root over the committed entries only
    pub fn root(&self) -> ScrutonetResult<Hash> {
        self.root_with(&BTreeMap::new())
    }

    /// Atomically persist an overlay into the committed tree
    pub fn apply(&self, overlay: &BTreeMap<Vec<u8>, Vec<u8>>) -> ScrutonetResult<()> {
        let mut batch = sled::Batch::default();
        for (key, value) in overlay {
            batch.insert(key.as_slice(), value.as_slice());
        }
        self.tree
            .apply_batch(batch)
            .map_err(|e| ScrutonetError::InternalStorage(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_subtree(dir: &TempDir) -> (sled::Db, Subtree) {
        let db = sled::open(dir.path()).unwrap();
        let subtree = Subtree::open(&db, TreeName::Process).unwrap();
        (db, subtree)
    }

    #[test]
    fn test_empty_root_is_zero() {
        let tmp = TempDir::new().unwrap();
        let (_db, subtree) = open_subtree(&tmp);
        assert_eq!(subtree.root().unwrap(), Hash::ZERO);
    }

    #[test]
    fn test_overlay_shadows_committed() {
        let tmp = TempDir::new().unwrap();
        let (_db, subtree) = open_subtree(&tmp);

        let mut overlay = BTreeMap::new();
        overlay.insert(b"k".to_vec(), b"v1".to_vec());
        subtree.apply(&overlay).unwrap();
        let committed_root = subtree.root().unwrap();

        let mut shadow = BTreeMap::new();
        shadow.insert(b"k".to_vec(), b"v2".to_vec());
        let working_root = subtree.root_with(&shadow).unwrap();

        assert_ne!(committed_root, working_root);
        // Same content, same root
        assert_eq!(subtree.root_with(&overlay).unwrap(), committed_root);
    }

    #[test]
    fn test_root_independent_of_insert_order() {
        let tmp1 = TempDir::new().unwrap();
        let (_d1, s1) = open_subtree(&tmp1);
        let tmp2 = TempDir::new().unwrap();
        let (_d2, s2) = open_subtree(&tmp2);

        let mut a = BTreeMap::new();
        a.insert(b"a".to_vec(), b"1".to_vec());
        let mut b = BTreeMap::new();
        b.insert(b"b".to_vec(), b"2".to_vec());

        s1.apply(&a).unwrap();
        s1.apply(&b).unwrap();
        s2.apply(&b).unwrap();
        s2.apply(&a).unwrap();

        assert_eq!(s1.root().unwrap(), s2.root().unwrap());
    }

    #[test]
    fn test_scan_prefix() {
        let tmp = TempDir::new().unwrap();
        let (_db, subtree) = open_subtree(&tmp);

        let mut overlay = BTreeMap::new();
        overlay.insert(b"p1_a".to_vec(), b"x".to_vec());
        overlay.insert(b"p1_b".to_vec(), b"y".to_vec());
        overlay.insert(b"p2_a".to_vec(), b"z".to_vec());
        subtree.apply(&overlay).unwrap();

        assert_eq!(subtree.scan_prefix(b"p1_").unwrap().len(), 2);
        assert_eq!(subtree.scan_prefix(b"p2_").unwrap().len(), 1);
        assert!(subtree.scan_prefix(b"p3_").unwrap().is_empty());
    }
}
