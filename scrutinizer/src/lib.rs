//! SCRUTONET Scrutinizer
//!
//! The accounting component of the voting protocol: an event listener with
//! its own local database that aggregates live tallies for open processes
//! and computes final results when processes end.

pub mod indexer;
pub mod tally;

pub use indexer::Scrutinizer;
pub use tally::{ProcessResults, MAX_OPTIONS, MAX_QUESTIONS};
