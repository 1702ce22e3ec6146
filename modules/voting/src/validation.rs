//! Transaction validation and application
//!
//! Handlers are pure functions of (tx, state snapshot, height): two replicas
//! with identical state reach identical accept/reject decisions. `check`
//! reads the committed snapshot; `deliver` reads the working snapshot,
//! applies the mutation, and returns the event to dispatch.

use scrutonet_core::{
    Address, Envelope, EntityId, Hash, Height, Nullifier, Process, ProcessEventData, ProcessId,
    ProcessType, PublicKey, ScrutonetError, ScrutonetResult, Validator, ValidatorUpdate,
};
use scrutonet_crypto::hashing::{blake3_hash, hash_multiple, MerkleProof};
use scrutonet_crypto::keys::{address_from_public_key, validator_pub_key_from_hex};
use scrutonet_crypto::sealedbox;
use scrutonet_crypto::signing::recover_public_key;
use scrutonet_state::SharedStore;
use std::sync::Arc;
use tracing::debug;

use crate::cache::VoteCache;
use crate::transaction::{
    signed_bytes, AdminTx, CancelProcessTx, NewProcessTx, Transaction, VoteTx, TX_ADD_ORACLE,
    TX_ADD_PROCESS_KEYS, TX_ADD_VALIDATOR, TX_REMOVE_ORACLE, TX_REMOVE_VALIDATOR,
    TX_REVEAL_PROCESS_KEYS,
};

/// Nullifier derivation: hash(voter address ‖ process id)
pub fn generate_nullifier(address: &Address, process_id: &ProcessId) -> Nullifier {
    let h = hash_multiple(&[address.as_bytes(), process_id.as_bytes()]);
    Nullifier::from_bytes(*h.as_bytes())
}

/// Event produced by a delivered transaction, dispatched to listeners
#[derive(Debug, Clone)]
pub enum TxEvent {
    Process(ProcessEventData),
    Vote(Envelope),
    Cancel(ProcessId),
    ProcessKeys {
        process_id: ProcessId,
        encryption_pub: String,
        commitment: String,
    },
    RevealKeys {
        process_id: ProcessId,
        encryption_priv: String,
        reveal: String,
    },
    /// Validator rotation, surfaced in the EndBlock response
    ValidatorUpdate(ValidatorUpdate),
    /// Oracle rotation has no listener
    None,
}

enum AdminOutcome {
    AddValidator(Validator),
    RemoveValidator(PublicKey),
    AddOracle(Address),
    RemoveOracle(Address),
    ProcessKeys {
        process: Process,
        encryption_pub: String,
        commitment: String,
    },
    RevealKeys {
        process: Process,
        encryption_priv: String,
        reveal: String,
    },
}

/// Validates transactions against a state snapshot and applies them on
/// delivery
pub struct TxHandler {
    store: SharedStore,
    cache: Arc<VoteCache>,
}

impl TxHandler {
    pub fn new(store: SharedStore, cache: Arc<VoteCache>) -> Self {
        Self { store, cache }
    }

    /// Mempool check against the committed snapshot. `height` is the
    /// earliest block the tx can land in (last committed + 1); passing
    /// votes are cached under their uniq-id for the DeliverTx fast path.
    pub fn check(&self, raw: &[u8], height: Height) -> ScrutonetResult<()> {
        match Transaction::decode(raw)? {
            Transaction::Vote(tx) => {
                let (envelope, process) = self.validate_vote(&tx, raw, height, true, false)?;
                if let Some(id) = tx.uniq_id(process.process_type) {
                    self.cache.put(id, envelope, height);
                }
                Ok(())
            }
            Transaction::NewProcess(tx) => self
                .validate_new_process(&tx, raw, height, true)
                .map(|_| ()),
            Transaction::CancelProcess(tx) => {
                self.validate_cancel(&tx, raw, height, true).map(|_| ())
            }
            Transaction::Admin(tx) => self.validate_admin(&tx, raw, height, true).map(|_| ()),
        }
    }

    /// Validate against the working snapshot, apply the mutation, and
    /// return the event to dispatch
    pub fn deliver(&self, raw: &[u8], height: Height) -> ScrutonetResult<TxEvent> {
        match Transaction::decode(raw)? {
            Transaction::Vote(tx) => {
                let (envelope, _) = self.validate_vote(&tx, raw, height, false, true)?;
                self.store.add_envelope(&envelope);
                Ok(TxEvent::Vote(envelope))
            }
            Transaction::NewProcess(tx) => {
                let process = self.validate_new_process(&tx, raw, height, false)?;
                self.store.add_process(&process);
                Ok(TxEvent::Process(ProcessEventData {
                    process_id: process.process_id.clone(),
                    entity_id: process.entity_id.clone(),
                    census_root: process.census_root.clone(),
                    census_uri: process.census_uri.clone(),
                }))
            }
            Transaction::CancelProcess(tx) => {
                let process = self.validate_cancel(&tx, raw, height, false)?;
                self.store.set_process(&process);
                Ok(TxEvent::Cancel(process.process_id))
            }
            Transaction::Admin(tx) => match self.validate_admin(&tx, raw, height, false)? {
                AdminOutcome::AddValidator(validator) => {
                    let update = ValidatorUpdate {
                        pub_key: validator.pub_key,
                        power: validator.power,
                    };
                    self.store.add_validator(validator)?;
                    Ok(TxEvent::ValidatorUpdate(update))
                }
                AdminOutcome::RemoveValidator(pub_key) => {
                    self.store.remove_validator(&pub_key)?;
                    Ok(TxEvent::ValidatorUpdate(ValidatorUpdate {
                        pub_key,
                        power: 0,
                    }))
                }
                AdminOutcome::AddOracle(address) => {
                    self.store.add_oracle(address)?;
                    Ok(TxEvent::None)
                }
                AdminOutcome::RemoveOracle(address) => {
                    self.store.remove_oracle(&address)?;
                    Ok(TxEvent::None)
                }
                AdminOutcome::ProcessKeys {
                    process,
                    encryption_pub,
                    commitment,
                } => {
                    self.store.set_process(&process);
                    Ok(TxEvent::ProcessKeys {
                        process_id: process.process_id,
                        encryption_pub,
                        commitment,
                    })
                }
                AdminOutcome::RevealKeys {
                    process,
                    encryption_priv,
                    reveal,
                } => {
                    self.store.set_process(&process);
                    Ok(TxEvent::RevealKeys {
                        process_id: process.process_id,
                        encryption_priv,
                        reveal,
                    })
                }
            },
        }
    }

    /// Recover the signer of a transaction from its recoverable signature
    fn signer(&self, raw: &[u8], signature_hex: &str) -> ScrutonetResult<(Address, Vec<u8>)> {
        if signature_hex.is_empty() {
            return Err(ScrutonetError::BadSignature("missing signature".into()));
        }
        let message = signed_bytes(raw)?;
        let signature = hex::decode(signature_hex)
            .map_err(|e| ScrutonetError::BadSignature(e.to_string()))?;
        let pubkey = recover_public_key(&message, &signature)?;
        let address = address_from_public_key(&pubkey);
        Ok((address, pubkey))
    }

    fn require_oracle(&self, address: &Address, committed: bool) -> ScrutonetResult<()> {
        if !self.store.is_oracle(address, committed)? {
            return Err(ScrutonetError::Unauthorized(format!(
                "{} is not an oracle",
                address
            )));
        }
        Ok(())
    }

    fn validate_vote(
        &self,
        tx: &VoteTx,
        raw: &[u8],
        height: Height,
        committed: bool,
        allow_cache: bool,
    ) -> ScrutonetResult<(Envelope, Process)> {
        let process_id = ProcessId::from_hex(&tx.process_id)
            .map_err(|_| ScrutonetError::MalformedTx("bad processId hex".into()))?;
        let process = self.store.process(&process_id, committed)?;

        if process.canceled {
            return Err(ScrutonetError::ProcessCanceled(process_id.to_hex()));
        }
        if process.paused {
            return Err(ScrutonetError::ProcessNotActive(
                process_id.to_hex(),
                "paused".into(),
            ));
        }
        if height < process.start_block {
            return Err(ScrutonetError::ProcessNotActive(
                process_id.to_hex(),
                format!("starts at block {}", process.start_block),
            ));
        }
        if height > process.end_block() {
            return Err(ScrutonetError::ProcessNotActive(
                process_id.to_hex(),
                format!("ended at block {}", process.end_block()),
            ));
        }
        if process.requires_keys() && process.key_index > 0 {
            return Err(ScrutonetError::MissingEncryptionKeys(format!(
                "{} key slots not yet published",
                process.key_index
            )));
        }
        if process.is_encrypted() {
            if tx.encryption_key_indexes.is_empty() {
                return Err(ScrutonetError::MissingEncryptionKeys(
                    "no encryption key indexes".into(),
                ));
            }
            for &idx in &tx.encryption_key_indexes {
                let published = idx >= 1
                    && (idx as usize) <= process.key_holder_count()
                    && process.encryption_public_keys[idx as usize - 1].is_some();
                if !published {
                    return Err(ScrutonetError::MissingEncryptionKeys(format!(
                        "key index {} not published",
                        idx
                    )));
                }
            }
        }

        // Fast path: a vote already checked by the mempool skips signature
        // and proof recomputation; the state-dependent checks above and the
        // duplicate check below always run.
        if allow_cache {
            if let Some(id) = tx.uniq_id(process.process_type) {
                if let Some(mut envelope) = self.cache.take(&id) {
                    envelope.height = height;
                    if self
                        .store
                        .has_envelope(&process_id, &envelope.nullifier, committed)?
                    {
                        return Err(ScrutonetError::DuplicateVote(process_id.to_hex()));
                    }
                    debug!("vote cache hit for process {}", process_id);
                    return Ok((envelope, process));
                }
            }
        }

        let (address, pubkey) = self.signer(raw, &tx.signature)?;
        let nullifier = generate_nullifier(&address, &process_id);
        if self.store.has_envelope(&process_id, &nullifier, committed)? {
            return Err(ScrutonetError::DuplicateVote(process_id.to_hex()));
        }

        let root =
            Hash::from_hex(&process.census_root).map_err(|_| ScrutonetError::BadProof)?;
        let proof = MerkleProof::decode(&tx.proof).map_err(|_| ScrutonetError::BadProof)?;
        let claim = blake3_hash(&pubkey);
        if !proof.verify(&root, &claim) {
            return Err(ScrutonetError::BadProof);
        }

        let envelope = Envelope {
            process_id,
            nullifier,
            vote_package: tx.vote_package.clone(),
            encryption_key_indexes: tx.encryption_key_indexes.clone(),
            height,
        };
        Ok((envelope, process))
    }

    fn validate_new_process(
        &self,
        tx: &NewProcessTx,
        raw: &[u8],
        height: Height,
        committed: bool,
    ) -> ScrutonetResult<Process> {
        let (address, _) = self.signer(raw, &tx.signature)?;
        self.require_oracle(&address, committed)?;

        let process_id = ProcessId::from_hex(&tx.process_id)
            .map_err(|_| ScrutonetError::MalformedTx("bad processId hex".into()))?;
        if process_id.is_empty() {
            return Err(ScrutonetError::MalformedTx("empty processId".into()));
        }
        let entity_id = EntityId::from_hex(&tx.entity_id)
            .map_err(|_| ScrutonetError::MalformedTx("bad entityId hex".into()))?;
        if entity_id.is_empty() {
            return Err(ScrutonetError::MalformedTx("empty entityId".into()));
        }
        if self.store.has_process(&process_id, committed)? {
            return Err(ScrutonetError::MalformedTx(format!(
                "process {} already exists",
                process_id
            )));
        }
        let process_type = ProcessType::parse(&tx.process_type).ok_or_else(|| {
            ScrutonetError::MalformedTx(format!("unknown process type {:?}", tx.process_type))
        })?;
        if tx.start_block <= height {
            return Err(ScrutonetError::MalformedTx(format!(
                "startBlock {} not beyond current height {}",
                tx.start_block, height
            )));
        }
        if tx.number_of_blocks <= 0 {
            return Err(ScrutonetError::MalformedTx(
                "numberOfBlocks must be positive".into(),
            ));
        }
        Hash::from_hex(&tx.mk_root)
            .map_err(|_| ScrutonetError::MalformedTx("invalid census root".into()))?;

        let slots = if process_type.requires_keys() {
            if tx.number_of_key_holders == 0 {
                return Err(ScrutonetError::MalformedTx(
                    "key-requiring process needs at least one key holder".into(),
                ));
            }
            tx.number_of_key_holders as usize
        } else {
            0
        };

        Ok(Process {
            process_id,
            entity_id,
            process_type,
            census_root: tx.mk_root.clone(),
            census_uri: tx.mk_uri.clone(),
            start_block: tx.start_block,
            number_of_blocks: tx.number_of_blocks,
            paused: false,
            canceled: false,
            encryption_public_keys: vec![None; slots],
            commitment_keys: vec![None; slots],
            encryption_private_keys: vec![None; slots],
            reveal_keys: vec![None; slots],
            key_index: slots as u32,
        })
    }

    fn validate_cancel(
        &self,
        tx: &CancelProcessTx,
        raw: &[u8],
        height: Height,
        committed: bool,
    ) -> ScrutonetResult<Process> {
        let (address, _) = self.signer(raw, &tx.signature)?;
        self.require_oracle(&address, committed)?;

        let process_id = ProcessId::from_hex(&tx.process_id)
            .map_err(|_| ScrutonetError::MalformedTx("bad processId hex".into()))?;
        let mut process = self.store.process(&process_id, committed)?;
        if process.canceled {
            return Err(ScrutonetError::ProcessCanceled(process_id.to_hex()));
        }
        if height > process.end_block() {
            return Err(ScrutonetError::ProcessNotActive(
                process_id.to_hex(),
                "already ended".into(),
            ));
        }
        process.canceled = true;
        Ok(process)
    }

    fn validate_admin(
        &self,
        tx: &AdminTx,
        raw: &[u8],
        height: Height,
        committed: bool,
    ) -> ScrutonetResult<AdminOutcome> {
        let (address, _) = self.signer(raw, &tx.signature)?;
        self.require_oracle(&address, committed)?;

        match tx.tx_type.as_str() {
            TX_ADD_VALIDATOR => {
                let pub_key = validator_pub_key_from_hex(&tx.public_key)?;
                if tx.power <= 0 {
                    return Err(ScrutonetError::MalformedTx(
                        "validator power must be positive".into(),
                    ));
                }
                if self
                    .store
                    .validators(committed)?
                    .iter()
                    .any(|v| v.pub_key == pub_key)
                {
                    return Err(ScrutonetError::MalformedTx(format!(
                        "validator {} already present",
                        pub_key.to_hex()
                    )));
                }
                Ok(AdminOutcome::AddValidator(Validator {
                    pub_key,
                    power: tx.power,
                    name: String::new(),
                }))
            }
            TX_REMOVE_VALIDATOR => {
                let pub_key = validator_pub_key_from_hex(&tx.public_key)?;
                if !self
                    .store
                    .validators(committed)?
                    .iter()
                    .any(|v| v.pub_key == pub_key)
                {
                    return Err(ScrutonetError::MalformedTx(format!(
                        "validator {} not found",
                        pub_key.to_hex()
                    )));
                }
                Ok(AdminOutcome::RemoveValidator(pub_key))
            }
            TX_ADD_ORACLE => {
                let oracle = Address::from_hex(&tx.address)
                    .map_err(|_| ScrutonetError::InvalidAddress(tx.address.clone()))?;
                if self.store.is_oracle(&oracle, committed)? {
                    return Err(ScrutonetError::MalformedTx(format!(
                        "oracle {} already present",
                        oracle
                    )));
                }
                Ok(AdminOutcome::AddOracle(oracle))
            }
            TX_REMOVE_ORACLE => {
                let oracle = Address::from_hex(&tx.address)
                    .map_err(|_| ScrutonetError::InvalidAddress(tx.address.clone()))?;
                if !self.store.is_oracle(&oracle, committed)? {
                    return Err(ScrutonetError::MalformedTx(format!(
                        "oracle {} not found",
                        oracle
                    )));
                }
                Ok(AdminOutcome::RemoveOracle(oracle))
            }
            TX_ADD_PROCESS_KEYS => {
                let process_id = ProcessId::from_hex(&tx.process_id)
                    .map_err(|_| ScrutonetError::MalformedTx("bad processId hex".into()))?;
                let mut process = self.store.process(&process_id, committed)?;
                if !process.requires_keys() {
                    return Err(ScrutonetError::BadKeyIndex(
                        "process does not use encryption keys".into(),
                    ));
                }
                if process.canceled {
                    return Err(ScrutonetError::ProcessCanceled(process_id.to_hex()));
                }
                if height > process.end_block() {
                    return Err(ScrutonetError::ProcessNotActive(
                        process_id.to_hex(),
                        "already ended".into(),
                    ));
                }
                let idx = tx.key_index as usize;
                if idx < 1 || idx > process.key_holder_count() {
                    return Err(ScrutonetError::BadKeyIndex(format!(
                        "slot {} out of range",
                        idx
                    )));
                }
                if process.encryption_public_keys[idx - 1].is_some() {
                    return Err(ScrutonetError::BadKeyIndex(format!(
                        "slot {} already filled",
                        idx
                    )));
                }
                let key_ok = hex::decode(&tx.encryption_public_key)
                    .map(|b| b.len() == sealedbox::KEY_LENGTH)
                    .unwrap_or(false);
                if !key_ok || tx.commitment_key.is_empty() {
                    return Err(ScrutonetError::MalformedTx(
                        "missing or malformed key material".into(),
                    ));
                }
                process.encryption_public_keys[idx - 1] =
                    Some(tx.encryption_public_key.clone());
                process.commitment_keys[idx - 1] = Some(tx.commitment_key.clone());
                Ok(AdminOutcome::ProcessKeys {
                    process,
                    encryption_pub: tx.encryption_public_key.clone(),
                    commitment: tx.commitment_key.clone(),
                })
            }
            TX_REVEAL_PROCESS_KEYS => {
                let process_id = ProcessId::from_hex(&tx.process_id)
                    .map_err(|_| ScrutonetError::MalformedTx("bad processId hex".into()))?;
                let mut process = self.store.process(&process_id, committed)?;
                if process.canceled {
                    return Err(ScrutonetError::ProcessCanceled(process_id.to_hex()));
                }
                let idx = tx.key_index as usize;
                if idx < 1 || idx > process.key_holder_count() {
                    return Err(ScrutonetError::BadKeyIndex(format!(
                        "slot {} out of range",
                        idx
                    )));
                }
                let published = process.encryption_public_keys[idx - 1]
                    .clone()
                    .ok_or_else(|| {
                        ScrutonetError::BadKeyIndex(format!(
                            "reveal without a prior add at slot {}",
                            idx
                        ))
                    })?;
                if process.encryption_private_keys[idx - 1].is_some() {
                    return Err(ScrutonetError::BadKeyIndex(format!(
                        "slot {} already revealed",
                        idx
                    )));
                }
                let commitment = process.commitment_keys[idx - 1]
                    .clone()
                    .ok_or_else(|| {
                        ScrutonetError::BadKeyIndex(format!("no commitment at slot {}", idx))
                    })?;
                let derived_commitment = sealedbox::commitment_for_reveal(&tx.reveal_key)
                    .map_err(|_| ScrutonetError::BadKeyIndex("malformed reveal key".into()))?;
                if derived_commitment != commitment {
                    return Err(ScrutonetError::BadKeyIndex(
                        "reveal key does not match commitment".into(),
                    ));
                }
                let derived_pub = sealedbox::public_for_secret(&tx.encryption_private_key)
                    .map_err(|_| ScrutonetError::BadKeyIndex("malformed private key".into()))?;
                if derived_pub != published {
                    return Err(ScrutonetError::BadKeyIndex(
                        "private key does not match published public key".into(),
                    ));
                }
                process.encryption_private_keys[idx - 1] =
                    Some(tx.encryption_private_key.clone());
                process.reveal_keys[idx - 1] = Some(tx.reveal_key.clone());
                process.key_index = process.key_index.saturating_sub(1);
                Ok(AdminOutcome::RevealKeys {
                    process,
                    encryption_priv: tx.encryption_private_key.clone(),
                    reveal: tx.reveal_key.clone(),
                })
            }
            other => Err(ScrutonetError::InvalidType(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::sign_json;
    use scrutonet_crypto::hashing::merkle_proofs;
    use scrutonet_crypto::keys::KeyPair;
    use scrutonet_crypto::sealedbox::EncryptionKeyPair;
    use scrutonet_state::Store;
    use serde_json::json;
    use tempfile::TempDir;

    struct Fixture {
        _tmp: TempDir,
        store: SharedStore,
        handler: TxHandler,
        oracle: KeyPair,
    }

    fn setup() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(Store::open(tmp.path()).unwrap());
        let cache = Arc::new(VoteCache::default());
        let handler = TxHandler::new(store.clone(), cache);

        let oracle = KeyPair::generate();
        store.add_oracle(oracle.address()).unwrap();
        store.commit().unwrap();

        Fixture {
            _tmp: tmp,
            store,
            handler,
            oracle,
        }
    }

    fn new_process_tx(
        fixture: &Fixture,
        pid: &str,
        process_type: &str,
        census_root: &str,
        key_holders: u32,
    ) -> Vec<u8> {
        sign_json(
            json!({
                "type": "newProcess",
                "entityId": "beef",
                "processId": pid,
                "processType": process_type,
                "mkRoot": census_root,
                "mkURI": "ipfs://census",
                "startBlock": 2,
                "numberOfBlocks": 10,
                "numberOfKeyHolders": key_holders,
            }),
            &fixture.oracle,
        )
        .unwrap()
    }

    fn vote_tx(voter: &KeyPair, pid: &str, proof: &str, package: &str) -> Vec<u8> {
        sign_json(
            json!({
                "type": "vote",
                "processId": pid,
                "proof": proof,
                "votePackage": package,
                "nonce": "01",
            }),
            voter,
        )
        .unwrap()
    }

    /// One-voter census: root is the claim itself, proof is empty
    fn census_for(voter: &KeyPair) -> (String, String) {
        let claim = blake3_hash(&voter.public_key_bytes());
        let (root, proofs) = merkle_proofs(&[claim]);
        (root.to_hex(), proofs[0].encode())
    }

    #[test]
    fn test_new_process_and_vote() {
        let f = setup();
        let voter = KeyPair::generate();
        let (root, proof) = census_for(&voter);

        let raw = new_process_tx(&f, "aa01", "poll-vote", &root, 0);
        assert!(matches!(
            f.handler.deliver(&raw, 1).unwrap(),
            TxEvent::Process(_)
        ));
        f.store.commit().unwrap();

        let raw = vote_tx(&voter, "aa01", &proof, "cGtn");
        match f.handler.deliver(&raw, 3).unwrap() {
            TxEvent::Vote(envelope) => {
                assert_eq!(envelope.height, 3);
                assert_eq!(
                    envelope.nullifier,
                    generate_nullifier(
                        &voter.address(),
                        &ProcessId::from_hex("aa01").unwrap()
                    )
                );
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_new_process_requires_oracle() {
        let f = setup();
        let stranger = KeyPair::generate();
        let raw = sign_json(
            json!({
                "type": "newProcess",
                "entityId": "beef",
                "processId": "aa01",
                "processType": "poll-vote",
                "mkRoot": Hash::ZERO.to_hex(),
                "startBlock": 2,
                "numberOfBlocks": 10,
            }),
            &stranger,
        )
        .unwrap();
        assert!(matches!(
            f.handler.deliver(&raw, 1),
            Err(ScrutonetError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_new_process_start_block_must_be_ahead() {
        let f = setup();
        let raw = new_process_tx(&f, "aa01", "poll-vote", &Hash::ZERO.to_hex(), 0);
        assert!(matches!(
            f.handler.deliver(&raw, 5),
            Err(ScrutonetError::MalformedTx(_))
        ));
    }

    #[test]
    fn test_duplicate_vote_rejected() {
        let f = setup();
        let voter = KeyPair::generate();
        let (root, proof) = census_for(&voter);

        f.handler
            .deliver(&new_process_tx(&f, "aa01", "poll-vote", &root, 0), 1)
            .unwrap();

        f.handler
            .deliver(&vote_tx(&voter, "aa01", &proof, "cGtn"), 3)
            .unwrap();
        // Re-vote with a different nonce so the tx bytes differ
        let raw = sign_json(
            json!({
                "type": "vote",
                "processId": "aa01",
                "proof": proof,
                "votePackage": "cGtn",
                "nonce": "02",
            }),
            &voter,
        )
        .unwrap();
        assert!(matches!(
            f.handler.deliver(&raw, 3),
            Err(ScrutonetError::DuplicateVote(_))
        ));
    }

    #[test]
    fn test_vote_bad_proof() {
        let f = setup();
        let voter = KeyPair::generate();
        let outsider = KeyPair::generate();
        let (root, _) = census_for(&voter);
        let (_, outsider_proof) = census_for(&outsider);

        f.handler
            .deliver(&new_process_tx(&f, "aa01", "poll-vote", &root, 0), 1)
            .unwrap();

        let raw = vote_tx(&outsider, "aa01", &outsider_proof, "cGtn");
        assert!(matches!(
            f.handler.deliver(&raw, 3),
            Err(ScrutonetError::BadProof)
        ));
    }

    #[test]
    fn test_vote_outside_window() {
        let f = setup();
        let voter = KeyPair::generate();
        let (root, proof) = census_for(&voter);
        f.handler
            .deliver(&new_process_tx(&f, "aa01", "poll-vote", &root, 0), 1)
            .unwrap();

        let raw = vote_tx(&voter, "aa01", &proof, "cGtn");
        assert!(matches!(
            f.handler.deliver(&raw, 1),
            Err(ScrutonetError::ProcessNotActive(_, _))
        ));
        assert!(matches!(
            f.handler.deliver(&raw, 13),
            Err(ScrutonetError::ProcessNotActive(_, _))
        ));
    }

    #[test]
    fn test_vote_unknown_process() {
        let f = setup();
        let voter = KeyPair::generate();
        let raw = vote_tx(&voter, "dead", "00", "cGtn");
        assert!(matches!(
            f.handler.deliver(&raw, 3),
            Err(ScrutonetError::UnknownProcess(_))
        ));
    }

    #[test]
    fn test_cancel_blocks_votes() {
        let f = setup();
        let voter = KeyPair::generate();
        let (root, proof) = census_for(&voter);
        f.handler
            .deliver(&new_process_tx(&f, "aa01", "poll-vote", &root, 0), 1)
            .unwrap();

        let cancel = sign_json(
            json!({"type": "cancelProcess", "processId": "aa01"}),
            &f.oracle,
        )
        .unwrap();
        assert!(matches!(
            f.handler.deliver(&cancel, 1).unwrap(),
            TxEvent::Cancel(_)
        ));

        let raw = vote_tx(&voter, "aa01", &proof, "cGtn");
        assert!(matches!(
            f.handler.deliver(&raw, 3),
            Err(ScrutonetError::ProcessCanceled(_))
        ));
    }

    fn add_keys_tx(f: &Fixture, pid: &str, slot: u32, keys: &EncryptionKeyPair, reveal: &str) -> Vec<u8> {
        let commitment = sealedbox::commitment_for_reveal(reveal).unwrap();
        sign_json(
            json!({
                "type": "addProcessKeys",
                "processId": pid,
                "keyIndex": slot,
                "encryptionPublicKey": keys.public_hex(),
                "commitmentKey": commitment,
            }),
            &f.oracle,
        )
        .unwrap()
    }

    fn reveal_keys_tx(f: &Fixture, pid: &str, slot: u32, keys: &EncryptionKeyPair, reveal: &str) -> Vec<u8> {
        sign_json(
            json!({
                "type": "revealProcessKeys",
                "processId": pid,
                "keyIndex": slot,
                "encryptionPrivateKey": keys.secret_hex(),
                "revealKey": reveal,
            }),
            &f.oracle,
        )
        .unwrap()
    }

    #[test]
    fn test_encrypted_process_key_lifecycle() {
        let f = setup();
        let voter = KeyPair::generate();
        let (root, proof) = census_for(&voter);
        let pid = ProcessId::from_hex("aa02").unwrap();

        f.handler
            .deliver(&new_process_tx(&f, "aa02", "encrypted-poll", &root, 2), 1)
            .unwrap();

        // Vote before any key is published
        let raw = vote_tx(&voter, "aa02", &proof, "cGtn");
        assert!(matches!(
            f.handler.deliver(&raw, 3),
            Err(ScrutonetError::MissingEncryptionKeys(_))
        ));

        let holder1 = EncryptionKeyPair::generate();
        let holder2 = EncryptionKeyPair::generate();
        let reveal1 = hex::encode([1u8; 32]);
        let reveal2 = hex::encode([2u8; 32]);

        f.handler
            .deliver(&add_keys_tx(&f, "aa02", 1, &holder1, &reveal1), 3)
            .unwrap();
        f.handler
            .deliver(&add_keys_tx(&f, "aa02", 2, &holder2, &reveal2), 3)
            .unwrap();

        // Reveal without a prior add at the same slot is impossible now;
        // reveal out-of-range slot is rejected
        assert!(matches!(
            f.handler
                .deliver(&reveal_keys_tx(&f, "aa02", 3, &holder1, &reveal1), 4),
            Err(ScrutonetError::BadKeyIndex(_))
        ));

        // KeyIndex 2 → 1 → 0 across reveals
        assert_eq!(f.store.process(&pid, false).unwrap().key_index, 2);
        f.handler
            .deliver(&reveal_keys_tx(&f, "aa02", 1, &holder1, &reveal1), 4)
            .unwrap();
        assert_eq!(f.store.process(&pid, false).unwrap().key_index, 1);
        f.handler
            .deliver(&reveal_keys_tx(&f, "aa02", 2, &holder2, &reveal2), 4)
            .unwrap();
        assert_eq!(f.store.process(&pid, false).unwrap().key_index, 0);

        // All keys published: votes flow, with key indexes required
        let no_indexes = vote_tx(&voter, "aa02", &proof, "cGtn");
        assert!(matches!(
            f.handler.deliver(&no_indexes, 5),
            Err(ScrutonetError::MissingEncryptionKeys(_))
        ));

        let raw = sign_json(
            json!({
                "type": "vote",
                "processId": "aa02",
                "proof": proof,
                "votePackage": "cGtn",
                "encryptionKeyIndexes": [1, 2],
            }),
            &voter,
        )
        .unwrap();
        assert!(matches!(
            f.handler.deliver(&raw, 5).unwrap(),
            TxEvent::Vote(_)
        ));
    }

    #[test]
    fn test_reveal_with_wrong_private_key() {
        let f = setup();
        let voter = KeyPair::generate();
        let (root, _) = census_for(&voter);
        f.handler
            .deliver(&new_process_tx(&f, "aa03", "encrypted-poll", &root, 1), 1)
            .unwrap();

        let holder = EncryptionKeyPair::generate();
        let wrong = EncryptionKeyPair::generate();
        let reveal = hex::encode([7u8; 32]);

        f.handler
            .deliver(&add_keys_tx(&f, "aa03", 1, &holder, &reveal), 2)
            .unwrap();
        assert!(matches!(
            f.handler
                .deliver(&reveal_keys_tx(&f, "aa03", 1, &wrong, &reveal), 3),
            Err(ScrutonetError::BadKeyIndex(_))
        ));
    }

    #[test]
    fn test_validator_rotation() {
        let f = setup();
        let signing = ed25519_dalek::SigningKey::from_bytes(&[5u8; 32]);
        let pub_hex = hex::encode(signing.verifying_key().to_bytes());

        let add = sign_json(
            json!({"type": "addValidator", "publicKey": pub_hex, "power": 10}),
            &f.oracle,
        )
        .unwrap();
        match f.handler.deliver(&add, 1).unwrap() {
            TxEvent::ValidatorUpdate(update) => assert_eq!(update.power, 10),
            other => panic!("unexpected event {:?}", other),
        }

        let remove = sign_json(
            json!({"type": "removeValidator", "publicKey": pub_hex}),
            &f.oracle,
        )
        .unwrap();
        match f.handler.deliver(&remove, 1).unwrap() {
            TxEvent::ValidatorUpdate(update) => assert_eq!(update.power, 0),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(f.store.validators(false).unwrap().is_empty());
    }

    #[test]
    fn test_oracle_rotation() {
        let f = setup();
        let extra = Address::from_bytes([9u8; 32]);

        let add = sign_json(
            json!({"type": "addOracle", "address": extra.to_hex()}),
            &f.oracle,
        )
        .unwrap();
        f.handler.deliver(&add, 1).unwrap();
        assert!(f.store.is_oracle(&extra, false).unwrap());

        let remove = sign_json(
            json!({"type": "removeOracle", "address": extra.to_hex()}),
            &f.oracle,
        )
        .unwrap();
        f.handler.deliver(&remove, 1).unwrap();
        assert!(!f.store.is_oracle(&extra, false).unwrap());
    }

    #[test]
    fn test_check_caches_vote_for_deliver() {
        let f = setup();
        let voter = KeyPair::generate();
        let (root, proof) = census_for(&voter);
        f.handler
            .deliver(&new_process_tx(&f, "aa01", "poll-vote", &root, 0), 1)
            .unwrap();
        f.store.commit().unwrap();

        let raw = vote_tx(&voter, "aa01", &proof, "cGtn");
        f.handler.check(&raw, 3).unwrap();

        // The cached entry carries the nullifier; deliver consumes it
        let event = f.handler.deliver(&raw, 3).unwrap();
        match event {
            TxEvent::Vote(envelope) => assert_eq!(
                envelope.nullifier,
                generate_nullifier(&voter.address(), &ProcessId::from_hex("aa01").unwrap())
            ),
            other => panic!("unexpected event {:?}", other),
        }
    }
}
