//! Core types for SCRUTONET
//!
//! Defines fundamental data structures used across the system.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ScrutonetError;
use crate::traits::ScrutonetResult;

/// Block height as reported by the consensus engine
pub type Height = i64;

/// 32-byte hash type
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    pub const ZERO: Hash = Hash([0u8; 32]);

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Hash(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != 32 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Hash(arr))
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", &self.to_hex()[..16])
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash(0x{})", self.to_hex())
    }
}

/// 32-byte address derived from a signer public key hash
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address(pub [u8; 32]);

impl Address {
    pub const ZERO: Address = Address([0u8; 32]);

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Address(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != 32 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Address(arr))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", &self.to_hex()[..16])
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address(0x{})", self.to_hex())
    }
}

/// 32-byte ed25519 validator public key
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey(pub [u8; 32]);

impl PublicKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        PublicKey(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey(0x{})", self.to_hex())
    }
}

/// One-way-derived per-voter per-process identifier preventing double voting
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Nullifier(pub [u8; 32]);

impl Nullifier {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Nullifier(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != 32 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Nullifier(arr))
    }
}

impl fmt::Display for Nullifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", &self.to_hex()[..16])
    }
}

impl fmt::Debug for Nullifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Nullifier(0x{})", self.to_hex())
    }
}

/// Opaque voting process identifier, lowercase hex on the wire
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessId(Vec<u8>);

impl ProcessId {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        ProcessId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        Ok(ProcessId(hex::decode(s)?))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProcessId({})", self.to_hex())
    }
}

/// Opaque entity identifier, lowercase hex on the wire
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityId(Vec<u8>);

impl EntityId {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        EntityId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        Ok(EntityId(hex::decode(s)?))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self.to_hex())
    }
}

/// Timestamp in milliseconds since Unix epoch
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub fn now() -> Self {
        Timestamp(chrono::Utc::now().timestamp_millis() as u64)
    }

    pub fn from_millis(millis: u64) -> Self {
        Timestamp(millis)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Voting process type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessType {
    #[serde(rename = "poll-vote")]
    PollVote,
    #[serde(rename = "petition-sign")]
    PetitionSign,
    #[serde(rename = "encrypted-poll")]
    EncryptedPoll,
    #[serde(rename = "snark-vote")]
    SnarkVote,
}

impl ProcessType {
    /// Whether a process of this type requires encryption/commitment keys
    pub fn requires_keys(&self) -> bool {
        matches!(self, ProcessType::EncryptedPoll | ProcessType::SnarkVote)
    }

    /// Whether envelopes of this type carry an encrypted payload
    pub fn is_encrypted(&self) -> bool {
        matches!(self, ProcessType::EncryptedPoll | ProcessType::SnarkVote)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessType::PollVote => "poll-vote",
            ProcessType::PetitionSign => "petition-sign",
            ProcessType::EncryptedPoll => "encrypted-poll",
            ProcessType::SnarkVote => "snark-vote",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "poll-vote" => Some(ProcessType::PollVote),
            "petition-sign" => Some(ProcessType::PetitionSign),
            "encrypted-poll" => Some(ProcessType::EncryptedPoll),
            "snark-vote" => Some(ProcessType::SnarkVote),
            _ => None,
        }
    }
}

impl fmt::Display for ProcessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A voting process as held in the `process` subtree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Process {
    pub process_id: ProcessId,
    pub entity_id: EntityId,
    pub process_type: ProcessType,
    /// Merkle root of the census of eligible voters, lowercase hex
    pub census_root: String,
    /// URI where the census tree can be fetched
    pub census_uri: String,
    pub start_block: Height,
    pub number_of_blocks: i64,
    pub paused: bool,
    pub canceled: bool,
    /// Per key-holder slot, published on addProcessKeys
    pub encryption_public_keys: Vec<Option<String>>,
    /// Hashed reveal keys, published on addProcessKeys
    pub commitment_keys: Vec<Option<String>>,
    /// Published on revealProcessKeys
    pub encryption_private_keys: Vec<Option<String>>,
    /// Published on revealProcessKeys
    pub reveal_keys: Vec<Option<String>>,
    /// Count of key slots not yet revealed; zero means all keys published
    pub key_index: u32,
}

impl Process {
    pub fn requires_keys(&self) -> bool {
        self.process_type.requires_keys()
    }

    pub fn is_encrypted(&self) -> bool {
        self.process_type.is_encrypted()
    }

    /// Height at which the process naturally terminates
    pub fn end_block(&self) -> Height {
        self.start_block + self.number_of_blocks
    }

    pub fn key_holder_count(&self) -> usize {
        self.encryption_public_keys.len()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        bincode::serialize(self).unwrap_or_default()
    }

    pub fn from_bytes(bytes: &[u8]) -> ScrutonetResult<Self> {
        bincode::deserialize(bytes).map_err(|e| ScrutonetError::Deserialization(e.to_string()))
    }
}

/// A cast vote with proof and package, as held in the `vote` subtree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub process_id: ProcessId,
    pub nullifier: Nullifier,
    /// Base64-encoded vote content, possibly sealed in layers
    pub vote_package: String,
    /// Key slots used to seal the package (encrypted processes only)
    pub encryption_key_indexes: Vec<u32>,
    /// Block in which the envelope was accepted
    pub height: Height,
}

impl Envelope {
    pub fn to_bytes(&self) -> Vec<u8> {
        bincode::serialize(self).unwrap_or_default()
    }

    pub fn from_bytes(bytes: &[u8]) -> ScrutonetResult<Self> {
        bincode::deserialize(bytes).map_err(|e| ScrutonetError::Deserialization(e.to_string()))
    }
}

/// The decoded content of an envelope's vote package
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VotePackage {
    #[serde(default)]
    pub nonce: String,
    #[serde(rename = "type", default)]
    pub package_type: String,
    pub votes: Vec<u32>,
}

/// A consensus validator: ed25519 public key plus voting power
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    pub pub_key: PublicKey,
    pub power: i64,
    pub name: String,
}

/// Version tag for the binary-framed app header
const HEADER_VERSION: u8 = 1;

/// Per-block application header, persisted under a fixed key in the `app` subtree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppHeader {
    pub height: Height,
    /// App hash of the previous committed block
    pub app_hash: Hash,
    pub timestamp: Timestamp,
}

impl AppHeader {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![HEADER_VERSION];
        out.extend(bincode::serialize(self).unwrap_or_default());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> ScrutonetResult<Self> {
        match bytes.split_first() {
            Some((&HEADER_VERSION, rest)) => bincode::deserialize(rest)
                .map_err(|e| ScrutonetError::Deserialization(e.to_string())),
            Some((v, _)) => Err(ScrutonetError::Deserialization(format!(
                "unknown header version {}",
                v
            ))),
            None => Err(ScrutonetError::Deserialization("empty header".into())),
        }
    }
}

/// Data handed to event listeners when a new process is created
#[derive(Debug, Clone)]
pub struct ProcessEventData {
    pub process_id: ProcessId,
    pub entity_id: EntityId,
    pub census_root: String,
    pub census_uri: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_hex_roundtrip() {
        let h = Hash([7u8; 32]);
        let parsed = Hash::from_hex(&h.to_hex()).unwrap();
        assert_eq!(h, parsed);
    }

    #[test]
    fn test_process_id_hex() {
        let pid = ProcessId::from_hex("aa01").unwrap();
        assert_eq!(pid.as_bytes(), &[0xaa, 0x01]);
        assert_eq!(pid.to_hex(), "aa01");
    }

    #[test]
    fn test_process_type_predicates() {
        assert!(!ProcessType::PollVote.requires_keys());
        assert!(!ProcessType::PetitionSign.is_encrypted());
        assert!(ProcessType::EncryptedPoll.requires_keys());
        assert!(ProcessType::SnarkVote.is_encrypted());
    }

    #[test]
    fn test_process_type_parse() {
        assert_eq!(ProcessType::parse("poll-vote"), Some(ProcessType::PollVote));
        assert_eq!(ProcessType::parse("bogus"), None);
        for t in [
            ProcessType::PollVote,
            ProcessType::PetitionSign,
            ProcessType::EncryptedPoll,
            ProcessType::SnarkVote,
        ] {
            assert_eq!(ProcessType::parse(t.as_str()), Some(t));
        }
    }

    #[test]
    fn test_process_serialization() {
        let p = Process {
            process_id: ProcessId::from_hex("aa01").unwrap(),
            entity_id: EntityId::from_hex("bb02").unwrap(),
            process_type: ProcessType::EncryptedPoll,
            census_root: "cc".into(),
            census_uri: "ipfs://x".into(),
            start_block: 2,
            number_of_blocks: 10,
            paused: false,
            canceled: false,
            encryption_public_keys: vec![None, None],
            commitment_keys: vec![None, None],
            encryption_private_keys: vec![None, None],
            reveal_keys: vec![None, None],
            key_index: 2,
        };
        let restored = Process::from_bytes(&p.to_bytes()).unwrap();
        assert_eq!(restored.end_block(), 12);
        assert_eq!(restored.key_holder_count(), 2);
        assert!(restored.requires_keys());
    }

    #[test]
    fn test_header_version_tag() {
        let header = AppHeader {
            height: 5,
            app_hash: Hash([1u8; 32]),
            timestamp: Timestamp::from_millis(1000),
        };
        let bytes = header.to_bytes();
        assert_eq!(bytes[0], HEADER_VERSION);
        assert_eq!(AppHeader::from_bytes(&bytes).unwrap(), header);

        let mut bad = bytes.clone();
        bad[0] = 9;
        assert!(AppHeader::from_bytes(&bad).is_err());
    }
}
