//! SCRUTONET voting module
//!
//! The transaction layer of the voting state machine: wire codec, signature
//! and state validation, the CheckTx→DeliverTx vote cache, and the genesis
//! application state.

pub mod cache;
pub mod genesis;
pub mod transaction;
pub mod validation;

pub use cache::VoteCache;
pub use genesis::{GenesisAppState, GenesisValidator};
pub use transaction::{
    sign_json, signed_bytes, AdminTx, CancelProcessTx, NewProcessTx, Transaction, VoteTx,
};
pub use validation::{generate_nullifier, TxEvent, TxHandler};
