//! Vote package decoding and tally accumulation

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use scrutonet_core::{Envelope, Process, ScrutonetError, ScrutonetResult, VotePackage};
use scrutonet_crypto::sealedbox;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Maximum number of questions allowed in a vote package
pub const MAX_QUESTIONS: usize = 64;
/// Maximum number of options allowed per question
pub const MAX_OPTIONS: usize = 64;

/// Results of a voting process: a questions × options grid of counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessResults(pub Vec<Vec<u32>>);

impl ProcessResults {
    pub fn to_bytes(&self) -> Vec<u8> {
        bincode::serialize(self).unwrap_or_default()
    }

    pub fn from_bytes(bytes: &[u8]) -> ScrutonetResult<Self> {
        bincode::deserialize(bytes).map_err(|e| ScrutonetError::Deserialization(e.to_string()))
    }

    /// Total number of counted choices across all questions
    pub fn total(&self) -> u64 {
        self.0
            .iter()
            .flat_map(|row| row.iter())
            .map(|&n| n as u64)
            .sum()
    }

    /// Add one decoded vote to the grid, growing it up to the caps.
    /// A package out of bounds leaves the grid untouched.
    pub fn add(&mut self, package: &VotePackage) -> ScrutonetResult<()> {
        if package.votes.len() > MAX_QUESTIONS {
            return Err(ScrutonetError::Deserialization(format!(
                "vote package has {} questions, maximum is {}",
                package.votes.len(),
                MAX_QUESTIONS
            )));
        }
        for &option in &package.votes {
            if option as usize >= MAX_OPTIONS {
                return Err(ScrutonetError::Deserialization(format!(
                    "option {} out of range",
                    option
                )));
            }
        }

        // Every question's row grows to the widest option the package names,
        // so one ballot yields a rectangular grid
        let width = package
            .votes
            .iter()
            .map(|&v| v as usize + 1)
            .max()
            .unwrap_or(0);

        for (question, &option) in package.votes.iter().enumerate() {
            if self.0.len() <= question {
                self.0.resize(question + 1, Vec::new());
            }
            let row = &mut self.0[question];
            if row.len() < width {
                row.resize(width, 0);
            }
            row[option as usize] += 1;
        }
        Ok(())
    }
}

/// Decode a base64 vote package, peeling one sealed-box layer per key
/// (private keys ordered outermost first)
pub fn unmarshal_package(vote_package: &str, keys: &[String]) -> ScrutonetResult<VotePackage> {
    let mut bytes = BASE64
        .decode(vote_package)
        .map_err(|e| ScrutonetError::Deserialization(e.to_string()))?;
    for key in keys {
        bytes = sealedbox::open(key, &bytes)?;
    }
    serde_json::from_slice(&bytes).map_err(|e| ScrutonetError::Deserialization(e.to_string()))
}

/// Decryption keys for one envelope: the private keys of the slots it was
/// sealed with, in reverse publication order. None if any referenced key has
/// not been revealed.
pub fn envelope_keys(envelope: &Envelope, process: &Process) -> Option<Vec<String>> {
    if !process.is_encrypted() {
        return Some(Vec::new());
    }
    let mut keys = Vec::with_capacity(envelope.encryption_key_indexes.len());
    for &idx in envelope.encryption_key_indexes.iter().rev() {
        if idx < 1 {
            return None;
        }
        let key = process
            .encryption_private_keys
            .get(idx as usize - 1)?
            .clone()?;
        keys.push(key);
    }
    Some(keys)
}

/// Tally a set of envelopes for a process. A malformed or undecryptable
/// package drops that envelope only.
pub fn tally_envelopes(envelopes: &[Envelope], process: &Process) -> ProcessResults {
    let mut results = ProcessResults::default();
    for envelope in envelopes {
        let keys = match envelope_keys(envelope, process) {
            Some(keys) => keys,
            None => {
                warn!(
                    "envelope {} references an unrevealed key, dropping",
                    envelope.nullifier
                );
                continue;
            }
        };
        match unmarshal_package(&envelope.vote_package, &keys) {
            Ok(package) => {
                if let Err(e) = results.add(&package) {
                    warn!("dropping malformed vote package: {}", e);
                }
            }
            Err(e) => warn!("cannot decode vote package: {}", e),
        }
    }
    results
}
