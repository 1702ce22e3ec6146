//! Transaction wire codec
//!
//! Transactions are UTF-8 JSON objects discriminated by a `type` field.
//! Signed bytes are the object with the `signature` member removed,
//! re-serialized with sorted keys (serde_json's map ordering), so every
//! replica derives identical bytes from identical transactions.

use scrutonet_core::{ProcessType, ScrutonetError, ScrutonetResult};
use scrutonet_crypto::keys::KeyPair;
use scrutonet_crypto::signing::sign_recoverable;
use serde::{Deserialize, Serialize};

pub const TX_VOTE: &str = "vote";
pub const TX_NEW_PROCESS: &str = "newProcess";
pub const TX_CANCEL_PROCESS: &str = "cancelProcess";
pub const TX_ADD_VALIDATOR: &str = "addValidator";
pub const TX_REMOVE_VALIDATOR: &str = "removeValidator";
pub const TX_ADD_ORACLE: &str = "addOracle";
pub const TX_REMOVE_ORACLE: &str = "removeOracle";
pub const TX_ADD_PROCESS_KEYS: &str = "addProcessKeys";
pub const TX_REVEAL_PROCESS_KEYS: &str = "revealProcessKeys";

/// A vote envelope submission
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VoteTx {
    #[serde(rename = "type")]
    pub tx_type: String,
    pub process_id: String,
    /// Census merkle inclusion proof, hex
    pub proof: String,
    /// Base64 vote content
    pub vote_package: String,
    pub nonce: String,
    /// Ignored on the wire; the nullifier is always recomputed from the
    /// recovered signer address
    pub nullifier: String,
    pub encryption_key_indexes: Vec<u32>,
    pub signature: String,
}

impl VoteTx {
    /// Mempool fast-path identifier: the first 32 bytes of the raw
    /// signature. None for snark votes, which carry no recoverable
    /// signature worth caching.
    pub fn uniq_id(&self, process_type: ProcessType) -> Option<[u8; 32]> {
        if process_type == ProcessType::SnarkVote {
            return None;
        }
        let bytes = hex::decode(&self.signature).ok()?;
        if bytes.len() < 32 {
            return None;
        }
        let mut id = [0u8; 32];
        id.copy_from_slice(&bytes[..32]);
        Some(id)
    }
}

/// Creation of a new voting process
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NewProcessTx {
    #[serde(rename = "type")]
    pub tx_type: String,
    pub entity_id: String,
    pub process_id: String,
    pub process_type: String,
    /// Census merkle root, hex
    #[serde(rename = "mkRoot")]
    pub mk_root: String,
    /// Census tree URI
    #[serde(rename = "mkURI")]
    pub mk_uri: String,
    pub start_block: i64,
    pub number_of_blocks: i64,
    /// Sizes the encryption key slots for key-requiring process types
    pub number_of_key_holders: u32,
    pub signature: String,
}

/// Cancelation of a live process
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CancelProcessTx {
    #[serde(rename = "type")]
    pub tx_type: String,
    pub process_id: String,
    pub signature: String,
}

/// Privileged administration: validator/oracle rotation and process-key
/// publication. The `type` field selects the operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AdminTx {
    #[serde(rename = "type")]
    pub tx_type: String,
    pub address: String,
    #[serde(rename = "publicKey")]
    pub public_key: String,
    pub power: i64,
    pub process_id: String,
    pub key_index: u32,
    pub encryption_public_key: String,
    pub commitment_key: String,
    pub encryption_private_key: String,
    pub reveal_key: String,
    pub nonce: String,
    pub signature: String,
}

/// A decoded transaction
#[derive(Debug, Clone)]
pub enum Transaction {
    Vote(VoteTx),
    NewProcess(NewProcessTx),
    CancelProcess(CancelProcessTx),
    Admin(AdminTx),
}

#[derive(Deserialize)]
struct Sniff {
    #[serde(rename = "type")]
    tx_type: Option<String>,
}

impl Transaction {
    /// Two-pass decode: sniff the discriminator, then decode the variant
    pub fn decode(raw: &[u8]) -> ScrutonetResult<Self> {
        let sniff: Sniff = serde_json::from_slice(raw)
            .map_err(|e| ScrutonetError::MalformedTx(e.to_string()))?;
        let tx_type = sniff
            .tx_type
            .ok_or_else(|| ScrutonetError::MalformedTx("missing type field".into()))?;

        match tx_type.as_str() {
            TX_VOTE => Ok(Transaction::Vote(decode_variant(raw)?)),
            TX_NEW_PROCESS => Ok(Transaction::NewProcess(decode_variant(raw)?)),
            TX_CANCEL_PROCESS => Ok(Transaction::CancelProcess(decode_variant(raw)?)),
            TX_ADD_VALIDATOR | TX_REMOVE_VALIDATOR | TX_ADD_ORACLE | TX_REMOVE_ORACLE
            | TX_ADD_PROCESS_KEYS | TX_REVEAL_PROCESS_KEYS => {
                Ok(Transaction::Admin(decode_variant(raw)?))
            }
            other => Err(ScrutonetError::InvalidType(other.to_string())),
        }
    }
}

fn decode_variant<T: for<'de> Deserialize<'de>>(raw: &[u8]) -> ScrutonetResult<T> {
    serde_json::from_slice(raw).map_err(|e| ScrutonetError::MalformedTx(e.to_string()))
}

/// The bytes covered by a transaction signature: the JSON object with the
/// `signature` member removed, re-serialized with sorted keys.
pub fn signed_bytes(raw: &[u8]) -> ScrutonetResult<Vec<u8>> {
    let mut value: serde_json::Value =
        serde_json::from_slice(raw).map_err(|e| ScrutonetError::MalformedTx(e.to_string()))?;
    let object = value
        .as_object_mut()
        .ok_or_else(|| ScrutonetError::MalformedTx("transaction must be a JSON object".into()))?;
    object.remove("signature");
    serde_json::to_vec(&value).map_err(|e| ScrutonetError::Serialization(e.to_string()))
}

/// Sign a JSON transaction: computes the signed bytes, injects the hex
/// signature, and returns the full wire bytes.
pub fn sign_json(mut value: serde_json::Value, keypair: &KeyPair) -> ScrutonetResult<Vec<u8>> {
    let object = value.as_object_mut().ok_or_else(|| {
        ScrutonetError::MalformedTx("transaction must be a JSON object".into())
    })?;
    object.remove("signature");
    let message = serde_json::to_vec(&*object)?;
    let signature = sign_recoverable(keypair, &message)?;
    object.insert("signature".into(), hex::encode(signature).into());
    Ok(serde_json::to_vec(&value)?)
}
