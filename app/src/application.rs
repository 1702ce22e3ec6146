//! The consensus-facing application
//!
//! Lifecycle methods run on the single consensus thread in strict order
//! `BeginBlock → (DeliverTx)* → EndBlock → Commit`. CheckTx serves the
//! mempool from the last committed snapshot and may run concurrently.

use parking_lot::Mutex;
use scrutonet_core::{
    AppHeader, Application, CacheConfig, CheckTxKind, EventListener, Hash, RequestBeginBlock,
    RequestCheckTx, RequestDeliverTx, RequestEndBlock, RequestInitChain, RequestQuery,
    ResponseBeginBlock, ResponseCheckTx, ResponseCommit, ResponseDeliverTx, ResponseEndBlock,
    ResponseInfo, ResponseInitChain, ResponseQuery, ResponseSetOption, ScrutonetResult,
    Timestamp, ValidatorUpdate,
};
use scrutonet_state::SharedStore;
use scrutonet_voting::{GenesisAppState, TxEvent, TxHandler, VoteCache};
use std::sync::Arc;
use tracing::{error, info, warn};

/// The voting state machine's consensus adapter
pub struct App {
    store: SharedStore,
    handler: TxHandler,
    cache: Arc<VoteCache>,
    listeners: Vec<Arc<dyn EventListener>>,
    /// Validator changes accumulated during the current block
    validator_updates: Mutex<Vec<ValidatorUpdate>>,
}

impl App {
    pub fn new(store: SharedStore, cache_config: &CacheConfig) -> Self {
        let cache = Arc::new(VoteCache::new(cache_config.max_entries));
        let handler = TxHandler::new(store.clone(), cache.clone());
        Self {
            store,
            handler,
            cache,
            listeners: Vec::new(),
            validator_updates: Mutex::new(Vec::new()),
        }
    }

    /// Register an event listener; dispatch order follows registration order
    pub fn add_listener(&mut self, listener: Arc<dyn EventListener>) {
        self.listeners.push(listener);
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Synchronous fan-out inside DeliverTx, after the mutation succeeded.
    /// Listener behavior never rejects an accepted transaction.
    fn dispatch(&self, event: &TxEvent) {
        for listener in &self.listeners {
            match event {
                TxEvent::Process(data) => listener.on_process(data),
                TxEvent::Vote(envelope) => listener.on_vote(envelope),
                TxEvent::Cancel(process_id) => listener.on_cancel(process_id),
                TxEvent::ProcessKeys {
                    process_id,
                    encryption_pub,
                    commitment,
                } => listener.on_process_keys(process_id, encryption_pub, commitment),
                TxEvent::RevealKeys {
                    process_id,
                    encryption_priv,
                    reveal,
                } => listener.on_reveal_keys(process_id, encryption_priv, reveal),
                TxEvent::ValidatorUpdate(_) | TxEvent::None => {}
            }
        }
    }

    /// Earliest height a mempool tx can land in
    fn next_height(&self) -> ScrutonetResult<i64> {
        Ok(self.store.last_committed()?.0 + 1)
    }
}

impl Application for App {
    fn info(&self) -> ResponseInfo {
        // A stray working set from an interrupted block must not leak into
        // the next one.
        self.store.rollback();
        for listener in &self.listeners {
            listener.on_rollback();
        }

        match self.store.last_committed() {
            Ok((height, app_hash)) => {
                info!("handshake: last height {} app hash {}", height, hex::encode(&app_hash));
                ResponseInfo {
                    last_block_height: height,
                    last_block_app_hash: app_hash,
                }
            }
            Err(e) => {
                error!("cannot read committed state: {}", e);
                ResponseInfo::default()
            }
        }
    }

    fn init_chain(&self, req: RequestInitChain) -> ScrutonetResult<ResponseInitChain> {
        let app_state = match GenesisAppState::from_json(&req.app_state_bytes) {
            Ok(state) => state,
            Err(e) => {
                warn!("cannot parse genesis app state: {}", e);
                GenesisAppState::default()
            }
        };

        for oracle in app_state.parsed_oracles()? {
            self.store.add_oracle(oracle)?;
        }
        let validators = app_state.parsed_validators()?;
        let count = validators.len();
        for validator in validators {
            self.store.add_validator(validator)?;
        }

        self.store.set_header(&AppHeader {
            height: 0,
            app_hash: Hash::ZERO,
            timestamp: Timestamp::from_millis(0),
        });
        self.store.commit()?;
        info!(
            "chain initialized with {} oracles and {} validators",
            self.store.oracles(true)?.len(),
            count
        );
        Ok(ResponseInitChain::default())
    }

    fn begin_block(&self, req: RequestBeginBlock) -> ResponseBeginBlock {
        self.store.rollback();
        for listener in &self.listeners {
            listener.on_rollback();
        }

        let prev_app_hash = match self.store.last_committed() {
            Ok((_, bytes)) if bytes.len() == 32 => {
                let mut arr = [0u8; 32];
                arr.copy_from_slice(&bytes);
                Hash::from_bytes(arr)
            }
            _ => Hash::ZERO,
        };
        self.store.set_header(&AppHeader {
            height: req.height,
            app_hash: prev_app_hash,
            timestamp: req.time,
        });

        self.cache.purge(req.height);
        self.validator_updates.lock().clear();
        ResponseBeginBlock::default()
    }

    fn check_tx(&self, req: RequestCheckTx) -> ResponseCheckTx {
        // Mempool re-validation after a commit is a no-op
        if req.kind == CheckTxKind::Recheck {
            return ResponseCheckTx::default();
        }

        let height = match self.next_height() {
            Ok(height) => height,
            Err(e) => {
                error!("cannot read committed height: {}", e);
                return ResponseCheckTx {
                    code: e.code(),
                    info: e.to_string(),
                };
            }
        };

        match self.handler.check(&req.tx, height) {
            Ok(()) => ResponseCheckTx::default(),
            Err(e) => ResponseCheckTx {
                code: e.code(),
                info: e.to_string(),
            },
        }
    }

    fn deliver_tx(&self, req: RequestDeliverTx) -> ResponseDeliverTx {
        let height = match self.store.header(false) {
            Ok(header) => header.height,
            Err(e) => {
                error!("deliver without a block header: {}", e);
                return ResponseDeliverTx {
                    code: e.code(),
                    info: e.to_string(),
                };
            }
        };

        match self.handler.deliver(&req.tx, height) {
            Ok(event) => {
                if let TxEvent::ValidatorUpdate(update) = &event {
                    self.validator_updates.lock().push(update.clone());
                }
                self.dispatch(&event);
                ResponseDeliverTx::default()
            }
            Err(e) => ResponseDeliverTx {
                code: e.code(),
                info: e.to_string(),
            },
        }
    }

    fn end_block(&self, _req: RequestEndBlock) -> ResponseEndBlock {
        ResponseEndBlock {
            validator_updates: std::mem::take(&mut *self.validator_updates.lock()),
        }
    }

    fn commit(&self) -> ScrutonetResult<ResponseCommit> {
        let app_hash = self.store.commit()?;
        let height = match self.store.header(true) {
            Ok(header) => header.height,
            Err(_) => 0,
        };
        for listener in &self.listeners {
            listener.on_commit(height);
        }
        Ok(ResponseCommit {
            data: app_hash.as_bytes().to_vec(),
        })
    }

    fn query(&self, req: RequestQuery) -> ResponseQuery {
        crate::query::dispatch(&self.store, &req.data)
    }

    fn set_option(&self, _key: &str, _value: &str) -> ResponseSetOption {
        ResponseSetOption::default()
    }
}
