//! SCRUTONET consensus adapter
//!
//! Translates the consensus lifecycle (Info, InitChain, BeginBlock, CheckTx,
//! DeliverTx, EndBlock, Commit, Query) into state-store and transaction-layer
//! operations, and fans events out to registered listeners.

pub mod application;
pub mod query;

pub use application::App;
pub use query::QueryData;

/// Initialize global tracing: honors `RUST_LOG`, falling back to `level`
pub fn init_logging(level: &str) {
    use tracing_subscriber::EnvFilter;
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
