//! The scrutinizer: event listener plus local results index

/*
    The scrutinizer keeps four kinds of database entries, split by a
    one-byte key prefix:

    + P processEnding: key is a block number, used to schedule results computing
    + L liveProcess: key is a processId, running tally for live-results processes
    + E entity: key is an entityId, list of processes of a known entity
    + R results: key is a processId, final results of an ended process
*/

use parking_lot::Mutex;
use scrutonet_core::{
    Envelope, EventListener, Height, Process, ProcessEventData, ProcessId, ScrutonetError,
    ScrutonetResult,
};
use scrutonet_state::SharedStore;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::tally::{tally_envelopes, unmarshal_package, ProcessResults};

const PREFIX_PROCESS_ENDING: u8 = b'P';
const PREFIX_LIVE_PROCESS: u8 = b'L';
const PREFIX_ENTITY: u8 = b'E';
const PREFIX_RESULTS: u8 = b'R';

fn prefixed(prefix: u8, suffix: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + suffix.len());
    key.push(prefix);
    key.extend_from_slice(suffix);
    key
}

fn ending_key(height: Height) -> Vec<u8> {
    prefixed(PREFIX_PROCESS_ENDING, &height.to_be_bytes())
}

/// Per-block buffers, reset on rollback and drained on commit
#[derive(Default)]
struct Pools {
    processes: Vec<ProcessEventData>,
    votes: Vec<Envelope>,
    results: Vec<ProcessId>,
}

/// The scrutinizer makes the accounting of voting processes and keeps it
/// indexed in a local database, disjoint from the consensus state.
pub struct Scrutinizer {
    storage: sled::Db,
    state: SharedStore,
    runtime: Option<tokio::runtime::Handle>,
    closing: Arc<AtomicBool>,
    pools: Mutex<Pools>,
    entity_count: AtomicI64,
}

impl Scrutinizer {
    /// Open the scrutinizer over its own database. When a tokio runtime
    /// handle is given, end-of-process tallies run as background tasks;
    /// otherwise they run inline (tests, single-threaded tools).
    pub fn new<P: AsRef<Path>>(
        db_path: P,
        state: SharedStore,
        runtime: Option<tokio::runtime::Handle>,
    ) -> ScrutonetResult<Arc<Self>> {
        let storage =
            sled::open(db_path).map_err(|e| ScrutonetError::InternalStorage(e.to_string()))?;

        let scrutinizer = Arc::new(Self {
            storage,
            state,
            runtime,
            closing: Arc::new(AtomicBool::new(false)),
            pools: Mutex::new(Pools::default()),
            entity_count: AtomicI64::new(0),
        });
        // Recover the entity count by scanning the E prefix
        let known = scrutinizer.list(i64::MAX, &[], &[PREFIX_ENTITY]).len() as i64;
        scrutinizer.entity_count.store(known, Ordering::SeqCst);
        info!("scrutinizer opened with {} known entities", known);
        Ok(scrutinizer)
    }

    pub fn from_config(
        config: &scrutonet_core::ScrutinizerConfig,
        state: SharedStore,
        runtime: Option<tokio::runtime::Handle>,
    ) -> ScrutonetResult<Arc<Self>> {
        Self::new(&config.db_path, state, runtime)
    }

    /// Signal shutdown: background tally tasks finish their current process
    /// and stop. A partial run is healed by recomputation, since results
    /// are atomic at the R key.
    pub fn close(&self) {
        self.closing.store(true, Ordering::SeqCst);
    }

    /// Number of distinct entities ever witnessed in a NewProcess
    pub fn entity_count(&self) -> i64 {
        self.entity_count.load(Ordering::SeqCst)
    }

    /// Final results for a process, if computed
    pub fn results(&self, process_id: &ProcessId) -> ScrutonetResult<Option<ProcessResults>> {
        match self
            .storage
            .get(prefixed(PREFIX_RESULTS, process_id.as_bytes()))
            .map_err(|e| ScrutonetError::InternalStorage(e.to_string()))?
        {
            Some(bytes) => Ok(Some(ProcessResults::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Running tally for a live-results process, if any
    pub fn live_results(&self, process_id: &ProcessId) -> ScrutonetResult<Option<ProcessResults>> {
        match self
            .storage
            .get(prefixed(PREFIX_LIVE_PROCESS, process_id.as_bytes()))
            .map_err(|e| ScrutonetError::InternalStorage(e.to_string()))?
        {
            Some(bytes) => Ok(Some(ProcessResults::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Processes of a known entity
    pub fn entity_processes(&self, entity_id: &[u8]) -> ScrutonetResult<Vec<ProcessId>> {
        match self
            .storage
            .get(prefixed(PREFIX_ENTITY, entity_id))
            .map_err(|e| ScrutonetError::InternalStorage(e.to_string()))?
        {
            Some(bytes) => bincode::deserialize(&bytes)
                .map_err(|e| ScrutonetError::Deserialization(e.to_string())),
            None => Ok(Vec::new()),
        }
    }

    /// Keys matching a prefix, with the prefix stripped. Seeks past `from`
    /// when given; `from` itself is not included.
    pub fn list(&self, max: i64, from: &[u8], prefix: &[u8]) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        let mut remaining = max;
        for item in self.storage.scan_prefix(prefix) {
            let (key, _) = match item {
                Ok(kv) => kv,
                Err(e) => {
                    error!("scrutinizer storage iteration failed: {}", e);
                    break;
                }
            };
            let suffix = &key[prefix.len()..];
            if !from.is_empty() && suffix <= from {
                continue;
            }
            out.push(suffix.to_vec());
            remaining -= 1;
            if remaining < 1 {
                break;
            }
        }
        out
    }

    fn add_entity(&self, data: &ProcessEventData) {
        let key = prefixed(PREFIX_ENTITY, data.entity_id.as_bytes());
        let mut processes: Vec<ProcessId> = match self.storage.get(&key) {
            Ok(Some(bytes)) => bincode::deserialize(&bytes).unwrap_or_default(),
            Ok(None) => {
                self.entity_count.fetch_add(1, Ordering::SeqCst);
                Vec::new()
            }
            Err(e) => {
                error!("cannot read entity {}: {}", data.entity_id, e);
                return;
            }
        };
        if !processes.contains(&data.process_id) {
            processes.push(data.process_id.clone());
        }
        if let Err(e) = self
            .storage
            .insert(key, bincode::serialize(&processes).unwrap_or_default())
        {
            error!("cannot store entity {}: {}", data.entity_id, e);
        }
    }

    fn add_live_process(&self, process_id: &ProcessId) {
        let key = prefixed(PREFIX_LIVE_PROCESS, process_id.as_bytes());
        match self.storage.get(&key) {
            Ok(Some(_)) => {}
            Ok(None) => {
                if let Err(e) = self
                    .storage
                    .insert(key, ProcessResults::default().to_bytes())
                {
                    error!("cannot register live process {}: {}", process_id, e);
                }
            }
            Err(e) => error!("cannot read live process {}: {}", process_id, e),
        }
    }

    /// Schedule final results computation for a process at `height`
    fn register_pending(&self, process_id: &ProcessId, height: Height) {
        let key = ending_key(height);
        let mut pending: Vec<ProcessId> = match self.storage.get(&key) {
            Ok(Some(bytes)) => bincode::deserialize(&bytes).unwrap_or_default(),
            Ok(None) => Vec::new(),
            Err(e) => {
                error!("cannot read pending processes at {}: {}", height, e);
                return;
            }
        };
        if pending.contains(process_id) {
            return;
        }
        pending.push(process_id.clone());
        if let Err(e) = self
            .storage
            .insert(key, bincode::serialize(&pending).unwrap_or_default())
        {
            error!("cannot schedule process {} at {}: {}", process_id, height, e);
        } else {
            debug!("process {} scheduled for results at block {}", process_id, height);
        }
    }

    /// Apply one buffered vote to its live tally
    fn add_live_vote(&self, envelope: &Envelope) -> ScrutonetResult<()> {
        let key = prefixed(PREFIX_LIVE_PROCESS, envelope.process_id.as_bytes());
        let bytes = self
            .storage
            .get(&key)
            .map_err(|e| ScrutonetError::InternalStorage(e.to_string()))?
            .ok_or_else(|| {
                ScrutonetError::UnknownProcess(format!(
                    "{} is not a live-results process",
                    envelope.process_id
                ))
            })?;
        let mut results = ProcessResults::from_bytes(&bytes)?;
        let package = unmarshal_package(&envelope.vote_package, &[])?;
        results.add(&package)?;
        self.storage
            .insert(key, results.to_bytes())
            .map_err(|e| ScrutonetError::InternalStorage(e.to_string()))?;
        Ok(())
    }

    fn spawn_finished_check(&self, height: Height) {
        let storage = self.storage.clone();
        let state = self.state.clone();
        let closing = self.closing.clone();
        match &self.runtime {
            Some(handle) => {
                handle.spawn(async move {
                    check_finished_processes(&storage, &state, &closing, height);
                });
            }
            None => check_finished_processes(&storage, &state, &closing, height),
        }
    }
}

impl EventListener for Scrutinizer {
    fn on_process(&self, data: &ProcessEventData) {
        self.pools.lock().processes.push(data.clone());
    }

    fn on_vote(&self, envelope: &Envelope) {
        // Only live-results (non-encrypted) processes tally during voting
        match self.state.process(&envelope.process_id, false) {
            Ok(process) => {
                if !process.is_encrypted() {
                    self.pools.lock().votes.push(envelope.clone());
                }
            }
            Err(e) => error!(
                "cannot fetch process {} from state: {}",
                envelope.process_id, e
            ),
        }
    }

    fn on_cancel(&self, _process_id: &ProcessId) {
        // Canceled processes never produce results
    }

    fn on_process_keys(&self, _process_id: &ProcessId, _encryption_pub: &str, _commitment: &str) {}

    fn on_reveal_keys(&self, process_id: &ProcessId, _encryption_priv: &str, _reveal: &str) {
        let process = match self.state.process(process_id, false) {
            Ok(process) => process,
            Err(e) => {
                error!("cannot fetch process {} from state: {}", process_id, e);
                return;
            }
        };
        // All keys revealed: queue the process for results computation
        if process.key_index < 1 {
            self.pools.lock().results.push(process_id.clone());
        }
    }

    fn on_commit(&self, height: Height) {
        // End-of-process tallies can run in the background
        self.spawn_finished_check(height);

        let pools = std::mem::take(&mut *self.pools.lock());

        for data in &pools.processes {
            self.add_entity(data);
            let process = match self.state.process(&data.process_id, true) {
                Ok(process) => process,
                Err(e) => {
                    error!("cannot fetch process {}: {}", data.process_id, e);
                    continue;
                }
            };
            if !process.is_encrypted() {
                self.add_live_process(&data.process_id);
            }
            self.register_pending(&data.process_id, process.end_block());
        }

        // Stagger reveal-completed processes across the following blocks
        for (i, process_id) in pools.results.iter().enumerate() {
            self.register_pending(process_id, height + i as i64 + 1);
        }

        let mut nvotes = 0u64;
        for envelope in &pools.votes {
            match self.add_live_vote(envelope) {
                Ok(()) => nvotes += 1,
                Err(e) => error!("cannot add live vote: {}", e),
            }
        }
        if nvotes > 0 {
            info!("added {} live votes from block {}", nvotes, height);
        }
    }

    fn on_rollback(&self) {
        *self.pools.lock() = Pools::default();
    }
}

/// Scan the processes scheduled at `height` and compute final tallies.
/// A failed process is retried at the next block where it appears in the
/// processEnding schedule.
fn check_finished_processes(
    storage: &sled::Db,
    state: &SharedStore,
    closing: &AtomicBool,
    height: Height,
) {
    let key = ending_key(height);
    let pending: Vec<ProcessId> = match storage.get(&key) {
        Ok(Some(bytes)) => bincode::deserialize(&bytes).unwrap_or_default(),
        Ok(None) => return,
        Err(e) => {
            error!("cannot read pending processes at {}: {}", height, e);
            return;
        }
    };

    for process_id in &pending {
        if closing.load(Ordering::SeqCst) {
            return;
        }
        match compute_results(storage, state, process_id, height) {
            Ok(true) => info!("results computed for process {}", process_id),
            Ok(false) => {}
            Err(e) => error!("results computation for {} failed: {}", process_id, e),
        }
    }

    // The entry at this height is spent; every process not computed here
    // has its own entry at its end block.
    if let Err(e) = storage.remove(&key) {
        error!("cannot clear pending processes at {}: {}", height, e);
    }
}

/// Compute and persist final results for one process, returning whether
/// anything was written. Idempotent: an existing R entry is final and
/// never recomputed.
fn compute_results(
    storage: &sled::Db,
    state: &SharedStore,
    process_id: &ProcessId,
    height: Height,
) -> ScrutonetResult<bool> {
    let results_key = prefixed(PREFIX_RESULTS, process_id.as_bytes());
    if storage
        .get(&results_key)
        .map_err(|e| ScrutonetError::InternalStorage(e.to_string()))?
        .is_some()
    {
        return Ok(false);
    }

    let process: Process = state.process(process_id, true)?;
    if process.canceled {
        return Ok(false);
    }
    // Keys can be fully revealed while the process is still accepting
    // votes; the schedule entry at the natural end does the tallying.
    if height < process.end_block() {
        debug!(
            "process {} still open at {}, deferring to block {}",
            process_id,
            height,
            process.end_block()
        );
        return Ok(false);
    }

    let envelopes = state.envelopes(process_id)?;
    let results = tally_envelopes(&envelopes, &process);

    storage
        .insert(results_key, results.to_bytes())
        .map_err(|e| ScrutonetError::InternalStorage(e.to_string()))?;
    storage
        .remove(prefixed(PREFIX_LIVE_PROCESS, process_id.as_bytes()))
        .map_err(|e| ScrutonetError::InternalStorage(e.to_string()))?;
    Ok(true)
}
