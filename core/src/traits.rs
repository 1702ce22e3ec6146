//! Core traits defining SCRUTONET interfaces
//!
//! These traits define the contracts between the voting state machine, the
//! consensus engine driving it, and the event listeners fed by it.

use crate::types::*;

/// Result type for SCRUTONET operations
pub type ScrutonetResult<T> = Result<T, crate::error::ScrutonetError>;

/// A sink for state-machine events.
///
/// Events are dispatched synchronously inside DeliverTx, after the state
/// mutation succeeded; `on_commit`/`on_rollback` follow the store lifecycle.
/// Listeners must not block and must not fail the transaction: whatever they
/// do with an event, the state machine has already accepted it.
pub trait EventListener: Send + Sync {
    /// A new process was created
    fn on_process(&self, data: &ProcessEventData);

    /// A vote envelope was accepted
    fn on_vote(&self, envelope: &Envelope);

    /// A process was canceled
    fn on_cancel(&self, process_id: &ProcessId);

    /// An encryption public key and commitment key were published
    fn on_process_keys(&self, process_id: &ProcessId, encryption_pub: &str, commitment: &str);

    /// An encryption private key and reveal key were published
    fn on_reveal_keys(&self, process_id: &ProcessId, encryption_priv: &str, reveal: &str);

    /// The block at `height` was committed; buffered events are now final
    fn on_commit(&self, height: Height);

    /// Uncommitted buffered events must be discarded
    fn on_rollback(&self);
}

/// Whether a CheckTx call is a first-time check or a mempool recheck
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckTxKind {
    New,
    Recheck,
}

#[derive(Debug, Clone)]
pub struct RequestInitChain {
    /// Raw genesis app-state JSON
    pub app_state_bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct RequestBeginBlock {
    pub height: Height,
    /// Block time agreed by consensus; never read the local clock
    pub time: Timestamp,
}

#[derive(Debug, Clone)]
pub struct RequestCheckTx {
    pub tx: Vec<u8>,
    pub kind: CheckTxKind,
}

#[derive(Debug, Clone)]
pub struct RequestDeliverTx {
    pub tx: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct RequestEndBlock {
    pub height: Height,
}

#[derive(Debug, Clone)]
pub struct RequestQuery {
    /// Raw query JSON (`QueryData`)
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct ResponseInfo {
    pub last_block_height: Height,
    pub last_block_app_hash: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct ResponseInitChain {}

#[derive(Debug, Clone, Default)]
pub struct ResponseBeginBlock {}

#[derive(Debug, Clone, Default)]
pub struct ResponseCheckTx {
    pub code: u32,
    pub info: String,
}

#[derive(Debug, Clone, Default)]
pub struct ResponseDeliverTx {
    pub code: u32,
    pub info: String,
}

/// A validator set change produced during the block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorUpdate {
    pub pub_key: PublicKey,
    /// Zero power removes the validator
    pub power: i64,
}

#[derive(Debug, Clone, Default)]
pub struct ResponseEndBlock {
    pub validator_updates: Vec<ValidatorUpdate>,
}

#[derive(Debug, Clone, Default)]
pub struct ResponseCommit {
    /// The composite app hash for the committed height
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct ResponseQuery {
    pub code: u32,
    pub info: String,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct ResponseSetOption {
    pub code: u32,
    pub info: String,
}

/// The consensus-facing application interface.
///
/// The consensus engine drives these callbacks on a single thread in strict
/// order `BeginBlock → (DeliverTx)* → EndBlock → Commit`; CheckTx may run
/// concurrently against the last committed snapshot.
pub trait Application: Send + Sync {
    /// Handshake: last committed height and app hash
    fn info(&self) -> ResponseInfo;

    /// Called once upon genesis. A storage failure here is fatal, exactly
    /// as in `commit`.
    fn init_chain(&self, req: RequestInitChain) -> ScrutonetResult<ResponseInitChain>;

    /// Signals the beginning of a new block, prior to any DeliverTx
    fn begin_block(&self, req: RequestBeginBlock) -> ResponseBeginBlock;

    /// Mempool admission check against the committed snapshot
    fn check_tx(&self, req: RequestCheckTx) -> ResponseCheckTx;

    /// Validate and apply a transaction against the working snapshot
    fn deliver_tx(&self, req: RequestDeliverTx) -> ResponseDeliverTx;

    /// End of block; surfaces validator updates
    fn end_block(&self, req: RequestEndBlock) -> ResponseEndBlock;

    /// Atomically persist the block. A storage failure here is fatal:
    /// the engine cannot be told a block committed if it did not.
    fn commit(&self) -> ScrutonetResult<ResponseCommit>;

    /// Read-only query dispatch against committed state
    fn query(&self, req: RequestQuery) -> ResponseQuery;

    /// Legacy no-op option setter
    fn set_option(&self, key: &str, value: &str) -> ResponseSetOption;
}
