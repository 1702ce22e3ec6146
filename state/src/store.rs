//! The composite application state store
//!
//! Owns all on-disk consensus state. Exactly one writer (the consensus
//! thread) mutates the working set; readers use the committed snapshot.

use parking_lot::RwLock;
use scrutonet_core::{
    Address, AppHeader, Envelope, Hash, Height, Nullifier, Process, ProcessId, PublicKey,
    ScrutonetError, ScrutonetResult, Validator,
};
use scrutonet_crypto::hashing::hash_multiple;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::tree::{Subtree, TreeName};

/// Fixed key of the app header inside the `app` subtree
pub const HEADER_KEY: &[u8] = b"header";
/// Fixed key of the oracle list inside the `app` subtree
pub const ORACLES_KEY: &[u8] = b"oracles";
/// Fixed key of the validator list inside the `app` subtree
pub const VALIDATORS_KEY: &[u8] = b"validators";

const META_TREE: &str = "meta";
const META_HEIGHT_KEY: &[u8] = b"last_height";
const META_APP_HASH_KEY: &[u8] = b"last_app_hash";

/// Domain tag binding the composite app-hash format
const APP_HASH_DOMAIN: &[u8] = b"scrutonet-apphash-v1";

/// Key of a process inside the `process` subtree
pub fn process_key(process_id: &ProcessId) -> Vec<u8> {
    process_id.as_bytes().to_vec()
}

/// Key of an envelope inside the `vote` subtree: ProcessID ‖ "_" ‖ Nullifier
pub fn vote_key(process_id: &ProcessId, nullifier: &Nullifier) -> Vec<u8> {
    let mut key = process_id.as_bytes().to_vec();
    key.push(b'_');
    key.extend_from_slice(nullifier.as_bytes());
    key
}

fn vote_prefix(process_id: &ProcessId) -> Vec<u8> {
    let mut prefix = process_id.as_bytes().to_vec();
    prefix.push(b'_');
    prefix
}

/// Uncommitted writes, one overlay per subtree
#[derive(Default)]
struct Working {
    app: BTreeMap<Vec<u8>, Vec<u8>>,
    process: BTreeMap<Vec<u8>, Vec<u8>>,
    vote: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl Working {
    fn map(&self, name: TreeName) -> &BTreeMap<Vec<u8>, Vec<u8>> {
        match name {
            TreeName::App => &self.app,
            TreeName::Process => &self.process,
            TreeName::Vote => &self.vote,
        }
    }

    fn map_mut(&mut self, name: TreeName) -> &mut BTreeMap<Vec<u8>, Vec<u8>> {
        match name {
            TreeName::App => &mut self.app,
            TreeName::Process => &mut self.process,
            TreeName::Vote => &mut self.vote,
        }
    }

    fn clear(&mut self) {
        self.app.clear();
        self.process.clear();
        self.vote.clear();
    }

    fn is_empty(&self) -> bool {
        self.app.is_empty() && self.process.is_empty() && self.vote.is_empty()
    }
}

/// The application state store
pub struct Store {
    db: sled::Db,
    app: Subtree,
    process: Subtree,
    vote: Subtree,
    meta: sled::Tree,
    working: RwLock<Working>,
}

/// Thread-safe store wrapper
pub type SharedStore = Arc<Store>;

impl Store {
    pub fn open<P: AsRef<Path>>(path: P) -> ScrutonetResult<Self> {
        let db =
            sled::open(path).map_err(|e| ScrutonetError::InternalStorage(e.to_string()))?;
        let app = Subtree::open(&db, TreeName::App)?;
        let process = Subtree::open(&db, TreeName::Process)?;
        let vote = Subtree::open(&db, TreeName::Vote)?;
        let meta = db
            .open_tree(META_TREE)
            .map_err(|e| ScrutonetError::InternalStorage(e.to_string()))?;

        Ok(Self {
            db,
            app,
            process,
            vote,
            meta,
            working: RwLock::new(Working::default()),
        })
    }

    pub fn from_config(config: &scrutonet_core::StateConfig) -> ScrutonetResult<Self> {
        Self::open(&config.db_path)
    }

    fn subtree(&self, name: TreeName) -> &Subtree {
        match name {
            TreeName::App => &self.app,
            TreeName::Process => &self.process,
            TreeName::Vote => &self.vote,
        }
    }

    // ============ Raw subtree access ============

    /// Read a key. `committed = true` serves the last committed snapshot
    /// (safe for concurrent readers); otherwise the working copy shadows it.
    pub fn get(
        &self,
        name: TreeName,
        key: &[u8],
        committed: bool,
    ) -> ScrutonetResult<Option<Vec<u8>>> {
        if !committed {
            if let Some(value) = self.working.read().map(name).get(key) {
                return Ok(Some(value.clone()));
            }
        }
        self.subtree(name).get(key)
    }

    /// Buffer a write into the uncommitted working set
    pub fn put(&self, name: TreeName, key: Vec<u8>, value: Vec<u8>) {
        self.working.write().map_mut(name).insert(key, value);
    }

    /// Subtree root; working writes are folded in unless `committed`
    pub fn root(&self, name: TreeName, committed: bool) -> ScrutonetResult<Hash> {
        if committed {
            self.subtree(name).root()
        } else {
            let working = self.working.read();
            self.subtree(name).root_with(working.map(name))
        }
    }

    /// Composite app hash: domain-tagged hash of the subtree roots
    pub fn app_hash(&self, committed: bool) -> ScrutonetResult<Hash> {
        let app = self.root(TreeName::App, committed)?;
        let process = self.root(TreeName::Process, committed)?;
        let vote = self.root(TreeName::Vote, committed)?;
        Ok(hash_multiple(&[
            APP_HASH_DOMAIN,
            app.as_bytes(),
            process.as_bytes(),
            vote.as_bytes(),
        ]))
    }

    /// Atomically persist all pending writes and advance the committed
    /// snapshot. The meta record is the commit point: a crash between the
    /// subtree batches and the meta write is healed by the engine replaying
    /// the block, since every put is idempotent.
    pub fn commit(&self) -> ScrutonetResult<Hash> {
        let mut working = self.working.write();
        self.app.apply(&working.app)?;
        self.process.apply(&working.process)?;
        self.vote.apply(&working.vote)?;
        working.clear();
        drop(working);

        let app_hash = self.app_hash(true)?;
        let height = match self.header(true) {
            Ok(header) => header.height,
            Err(_) => 0,
        };

        self.meta
            .insert(META_HEIGHT_KEY, &height.to_le_bytes())
            .map_err(|e| ScrutonetError::InternalStorage(e.to_string()))?;
        self.meta
            .insert(META_APP_HASH_KEY, app_hash.as_bytes().as_slice())
            .map_err(|e| ScrutonetError::InternalStorage(e.to_string()))?;
        self.db
            .flush()
            .map_err(|e| ScrutonetError::InternalStorage(e.to_string()))?;

        info!("committed height {} app hash {}", height, app_hash);
        Ok(app_hash)
    }

    /// Discard pending writes since the last commit
    pub fn rollback(&self) {
        let mut working = self.working.write();
        if !working.is_empty() {
            debug!("discarding uncommitted working set");
        }
        working.clear();
    }

    /// Whether uncommitted writes are pending
    pub fn has_pending(&self) -> bool {
        !self.working.read().is_empty()
    }

    /// Last committed (height, app hash) as recorded at the commit point
    pub fn last_committed(&self) -> ScrutonetResult<(Height, Vec<u8>)> {
        let height = match self
            .meta
            .get(META_HEIGHT_KEY)
            .map_err(|e| ScrutonetError::InternalStorage(e.to_string()))?
        {
            Some(bytes) => Height::from_le_bytes(
                bytes.as_ref().try_into().unwrap_or([0u8; 8]),
            ),
            None => 0,
        };
        let app_hash = self
            .meta
            .get(META_APP_HASH_KEY)
            .map_err(|e| ScrutonetError::InternalStorage(e.to_string()))?
            .map(|v| v.to_vec())
            .unwrap_or_default();
        Ok((height, app_hash))
    }

    // ============ Header ============

    pub fn set_header(&self, header: &AppHeader) {
        self.put(TreeName::App, HEADER_KEY.to_vec(), header.to_bytes());
    }

    pub fn header(&self, committed: bool) -> ScrutonetResult<AppHeader> {
        match self.get(TreeName::App, HEADER_KEY, committed)? {
            Some(bytes) => AppHeader::from_bytes(&bytes),
            None => Err(ScrutonetError::Deserialization("no app header".into())),
        }
    }

    // ============ Oracles ============

    pub fn oracles(&self, committed: bool) -> ScrutonetResult<Vec<Address>> {
        match self.get(TreeName::App, ORACLES_KEY, committed)? {
            Some(bytes) => bincode::deserialize(&bytes)
                .map_err(|e| ScrutonetError::Deserialization(e.to_string())),
            None => Ok(Vec::new()),
        }
    }

    pub fn is_oracle(&self, address: &Address, committed: bool) -> ScrutonetResult<bool> {
        Ok(self.oracles(committed)?.contains(address))
    }

    pub fn add_oracle(&self, address: Address) -> ScrutonetResult<()> {
        let mut oracles = self.oracles(false)?;
        if oracles.contains(&address) {
            return Err(ScrutonetError::MalformedTx(format!(
                "oracle {} already present",
                address
            )));
        }
        oracles.push(address);
        self.put(
            TreeName::App,
            ORACLES_KEY.to_vec(),
            bincode::serialize(&oracles)?,
        );
        Ok(())
    }

    pub fn remove_oracle(&self, address: &Address) -> ScrutonetResult<()> {
        let mut oracles = self.oracles(false)?;
        let before = oracles.len();
        oracles.retain(|a| a != address);
        if oracles.len() == before {
            return Err(ScrutonetError::MalformedTx(format!(
                "oracle {} not found",
                address
            )));
        }
        self.put(
            TreeName::App,
            ORACLES_KEY.to_vec(),
            bincode::serialize(&oracles)?,
        );
        Ok(())
    }

    // ============ Validators ============

    pub fn validators(&self, committed: bool) -> ScrutonetResult<Vec<Validator>> {
        match self.get(TreeName::App, VALIDATORS_KEY, committed)? {
            Some(bytes) => bincode::deserialize(&bytes)
                .map_err(|e| ScrutonetError::Deserialization(e.to_string())),
            None => Ok(Vec::new()),
        }
    }

    pub fn add_validator(&self, validator: Validator) -> ScrutonetResult<()> {
        let mut validators = self.validators(false)?;
        if validators.iter().any(|v| v.pub_key == validator.pub_key) {
            return Err(ScrutonetError::MalformedTx(format!(
                "validator {} already present",
                validator.pub_key.to_hex()
            )));
        }
        validators.push(validator);
        self.put(
            TreeName::App,
            VALIDATORS_KEY.to_vec(),
            bincode::serialize(&validators)?,
        );
        Ok(())
    }

    pub fn remove_validator(&self, pub_key: &PublicKey) -> ScrutonetResult<()> {
        let mut validators = self.validators(false)?;
        let before = validators.len();
        validators.retain(|v| &v.pub_key != pub_key);
        if validators.len() == before {
            return Err(ScrutonetError::MalformedTx(format!(
                "validator {} not found",
                pub_key.to_hex()
            )));
        }
        self.put(
            TreeName::App,
            VALIDATORS_KEY.to_vec(),
            bincode::serialize(&validators)?,
        );
        Ok(())
    }

    // ============ Processes ============

    pub fn add_process(&self, process: &Process) {
        self.put(
            TreeName::Process,
            process_key(&process.process_id),
            process.to_bytes(),
        );
    }

    /// Overwrite an existing process entry (key publication, cancelation)
    pub fn set_process(&self, process: &Process) {
        self.add_process(process);
    }

    pub fn has_process(&self, process_id: &ProcessId, committed: bool) -> ScrutonetResult<bool> {
        Ok(self
            .get(TreeName::Process, &process_key(process_id), committed)?
            .is_some())
    }

    pub fn process(&self, process_id: &ProcessId, committed: bool) -> ScrutonetResult<Process> {
        match self.get(TreeName::Process, &process_key(process_id), committed)? {
            Some(bytes) => Process::from_bytes(&bytes),
            None => Err(ScrutonetError::UnknownProcess(process_id.to_hex())),
        }
    }

    /// Hex ids of committed processes, paginated in key order
    pub fn process_ids(&self, from: usize, list_size: usize) -> ScrutonetResult<Vec<String>> {
        Ok(self
            .process
            .scan_prefix(&[])?
            .into_iter()
            .skip(from)
            .take(list_size)
            .map(hex::encode)
            .collect())
    }

    // ============ Envelopes ============

    pub fn add_envelope(&self, envelope: &Envelope) {
        self.put(
            TreeName::Vote,
            vote_key(&envelope.process_id, &envelope.nullifier),
            envelope.to_bytes(),
        );
    }

    pub fn has_envelope(
        &self,
        process_id: &ProcessId,
        nullifier: &Nullifier,
        committed: bool,
    ) -> ScrutonetResult<bool> {
        Ok(self
            .get(TreeName::Vote, &vote_key(process_id, nullifier), committed)?
            .is_some())
    }

    pub fn envelope(
        &self,
        process_id: &ProcessId,
        nullifier: &Nullifier,
        committed: bool,
    ) -> ScrutonetResult<Option<Envelope>> {
        match self.get(TreeName::Vote, &vote_key(process_id, nullifier), committed)? {
            Some(bytes) => Ok(Some(Envelope::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Count of committed envelopes for a process
    pub fn envelope_count(&self, process_id: &ProcessId) -> ScrutonetResult<u64> {
        Ok(self.vote.scan_prefix(&vote_prefix(process_id))?.len() as u64)
    }

    /// All committed envelopes for a process, in key order
    pub fn envelopes(&self, process_id: &ProcessId) -> ScrutonetResult<Vec<Envelope>> {
        self.vote
            .scan_prefix_values(&vote_prefix(process_id))?
            .into_iter()
            .map(|(_, value)| Envelope::from_bytes(&value))
            .collect()
    }

    /// Hex nullifiers of committed envelopes for a process, paginated
    pub fn envelope_nullifiers(
        &self,
        process_id: &ProcessId,
        from: usize,
        list_size: usize,
    ) -> ScrutonetResult<Vec<String>> {
        let prefix = vote_prefix(process_id);
        Ok(self
            .vote
            .scan_prefix(&prefix)?
            .into_iter()
            .skip(from)
            .take(list_size)
            .map(|key| hex::encode(&key[prefix.len()..]))
            .collect())
    }
}
