//! Error types for SCRUTONET

use thiserror::Error;

/// Main error type for SCRUTONET
#[derive(Error, Debug)]
pub enum ScrutonetError {
    // ============ Transaction Validation Errors ============
    #[error("invalid transaction type: {0}")]
    InvalidType(String),

    #[error("malformed transaction: {0}")]
    MalformedTx(String),

    #[error("bad signature: {0}")]
    BadSignature(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("unknown process: {0}")]
    UnknownProcess(String),

    #[error("process {0} not active: {1}")]
    ProcessNotActive(String, String),

    #[error("process {0} is canceled")]
    ProcessCanceled(String),

    #[error("duplicate vote for process {0}")]
    DuplicateVote(String),

    #[error("census proof verification failed")]
    BadProof,

    #[error("missing encryption keys: {0}")]
    MissingEncryptionKeys(String),

    #[error("bad key index: {0}")]
    BadKeyIndex(String),

    // ============ Storage Errors ============
    // Fatal: the node must not report a commit that did not persist.
    #[error("internal storage failure: {0}")]
    InternalStorage(String),

    // ============ Cryptography Errors ============
    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("invalid private key")]
    InvalidPrivateKey,

    // ============ Serialization Errors ============
    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("deserialization failed: {0}")]
    Deserialization(String),

    // ============ Configuration Errors ============
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    // ============ General Errors ============
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ScrutonetError {
    /// Nonzero response code surfaced to the consensus engine for this error.
    /// Codes are stable; clients match on them.
    pub fn code(&self) -> u32 {
        match self {
            ScrutonetError::InvalidType(_) => 1,
            ScrutonetError::MalformedTx(_) => 2,
            ScrutonetError::BadSignature(_) => 3,
            ScrutonetError::Unauthorized(_) => 4,
            ScrutonetError::UnknownProcess(_) => 5,
            ScrutonetError::ProcessNotActive(_, _) => 6,
            ScrutonetError::ProcessCanceled(_) => 7,
            ScrutonetError::DuplicateVote(_) => 8,
            ScrutonetError::BadProof => 9,
            ScrutonetError::MissingEncryptionKeys(_) => 10,
            ScrutonetError::BadKeyIndex(_) => 11,
            ScrutonetError::InternalStorage(_) => 12,
            ScrutonetError::InvalidPublicKey => 13,
            ScrutonetError::InvalidPrivateKey => 14,
            ScrutonetError::Serialization(_) => 15,
            ScrutonetError::Deserialization(_) => 16,
            ScrutonetError::Config(_) => 17,
            ScrutonetError::InvalidAddress(_) => 18,
            ScrutonetError::Other(_) => 19,
        }
    }

    /// Whether the node must abort rather than answer with a response code
    pub fn is_fatal(&self) -> bool {
        matches!(self, ScrutonetError::InternalStorage(_))
    }
}

impl From<std::io::Error> for ScrutonetError {
    fn from(err: std::io::Error) -> Self {
        ScrutonetError::InternalStorage(err.to_string())
    }
}

impl From<bincode::Error> for ScrutonetError {
    fn from(err: bincode::Error) -> Self {
        ScrutonetError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for ScrutonetError {
    fn from(err: serde_json::Error) -> Self {
        ScrutonetError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_nonzero_and_distinct() {
        let errors = [
            ScrutonetError::InvalidType("x".into()),
            ScrutonetError::MalformedTx("x".into()),
            ScrutonetError::BadSignature("x".into()),
            ScrutonetError::Unauthorized("x".into()),
            ScrutonetError::UnknownProcess("x".into()),
            ScrutonetError::ProcessNotActive("x".into(), "y".into()),
            ScrutonetError::ProcessCanceled("x".into()),
            ScrutonetError::DuplicateVote("x".into()),
            ScrutonetError::BadProof,
            ScrutonetError::MissingEncryptionKeys("x".into()),
            ScrutonetError::BadKeyIndex("x".into()),
            ScrutonetError::InternalStorage("x".into()),
        ];
        let mut seen = std::collections::HashSet::new();
        for e in &errors {
            assert!(e.code() > 0);
            assert!(seen.insert(e.code()), "duplicate code for {:?}", e);
        }
    }

    #[test]
    fn test_only_storage_is_fatal() {
        assert!(ScrutonetError::InternalStorage("disk".into()).is_fatal());
        assert!(!ScrutonetError::BadProof.is_fatal());
        assert!(!ScrutonetError::DuplicateVote("p".into()).is_fatal());
    }
}
