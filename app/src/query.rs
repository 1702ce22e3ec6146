//! Read-only query dispatch
//!
//! Queries run against the committed snapshot only; they never observe the
//! block under construction. Missing entries answer with a nonzero code.

use scrutonet_core::{Nullifier, ProcessId, ResponseQuery, ScrutonetResult};
use scrutonet_state::Store;
use serde::{Deserialize, Serialize};

/// Hard cap on list query sizes
const MAX_LIST_SIZE: usize = 64;

/// A query request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryData {
    pub method: String,
    pub process_id: String,
    pub nullifier: String,
    pub from: i64,
    pub list_size: i64,
    pub timestamp: i64,
}

fn ok(value: Vec<u8>) -> ResponseQuery {
    ResponseQuery {
        code: 0,
        info: String::new(),
        value,
    }
}

fn not_found(info: impl ToString) -> ResponseQuery {
    ResponseQuery {
        code: 1,
        info: info.to_string(),
        value: Vec::new(),
    }
}

fn json_value<T: Serialize>(value: &T) -> ScrutonetResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| scrutonet_core::ScrutonetError::Serialization(e.to_string()))
}

pub fn dispatch(store: &Store, raw: &[u8]) -> ResponseQuery {
    let query: QueryData = match serde_json::from_slice(raw) {
        Ok(query) => query,
        Err(e) => return not_found(format!("cannot unmarshal query: {}", e)),
    };

    match run(store, &query) {
        Ok(resp) => resp,
        Err(e) => not_found(e),
    }
}

fn parse_ids(query: &QueryData) -> ScrutonetResult<(ProcessId, Nullifier)> {
    let process_id = ProcessId::from_hex(&query.process_id)
        .map_err(|_| scrutonet_core::ScrutonetError::MalformedTx("bad processId hex".into()))?;
    let nullifier = Nullifier::from_hex(&query.nullifier)
        .map_err(|_| scrutonet_core::ScrutonetError::MalformedTx("bad nullifier hex".into()))?;
    Ok((process_id, nullifier))
}

fn list_bounds(query: &QueryData) -> (usize, usize) {
    let from = query.from.max(0) as usize;
    let list_size = if query.list_size <= 0 {
        MAX_LIST_SIZE
    } else {
        (query.list_size as usize).min(MAX_LIST_SIZE)
    };
    (from, list_size)
}

fn run(store: &Store, query: &QueryData) -> ScrutonetResult<ResponseQuery> {
    match query.method.as_str() {
        "getEnvelopeStatus" => {
            let (process_id, nullifier) = parse_ids(query)?;
            if store.has_envelope(&process_id, &nullifier, true)? {
                Ok(ok(Vec::new()))
            } else {
                Ok(not_found("envelope not found"))
            }
        }
        "getEnvelope" => {
            let (process_id, nullifier) = parse_ids(query)?;
            match store.envelope(&process_id, &nullifier, true)? {
                Some(envelope) => Ok(ok(envelope.vote_package.into_bytes())),
                None => Ok(not_found("envelope not found")),
            }
        }
        "getEnvelopeHeight" => {
            let process_id = ProcessId::from_hex(&query.process_id).map_err(|_| {
                scrutonet_core::ScrutonetError::MalformedTx("bad processId hex".into())
            })?;
            let count = store.envelope_count(&process_id)?;
            Ok(ok(json_value(&count)?))
        }
        "getBlockHeight" => {
            let (height, _) = store.last_committed()?;
            Ok(ok(json_value(&height)?))
        }
        "getProcessList" => {
            let (from, list_size) = list_bounds(query);
            let ids = store.process_ids(from, list_size)?;
            Ok(ok(json_value(&ids)?))
        }
        "getEnvelopeList" => {
            let process_id = ProcessId::from_hex(&query.process_id).map_err(|_| {
                scrutonet_core::ScrutonetError::MalformedTx("bad processId hex".into())
            })?;
            let (from, list_size) = list_bounds(query);
            let nullifiers = store.envelope_nullifiers(&process_id, from, list_size)?;
            Ok(ok(json_value(&nullifiers)?))
        }
        other => Ok(not_found(format!("undefined query method {:?}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scrutonet_core::Envelope;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Arc<Store>) {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(Store::open(tmp.path()).unwrap());
        store.add_envelope(&Envelope {
            process_id: ProcessId::from_hex("aa01").unwrap(),
            nullifier: Nullifier::from_bytes([1u8; 32]),
            vote_package: "cGtn".into(),
            encryption_key_indexes: vec![],
            height: 3,
        });
        store.commit().unwrap();
        (tmp, store)
    }

    fn query(store: &Store, json: serde_json::Value) -> ResponseQuery {
        dispatch(store, &serde_json::to_vec(&json).unwrap())
    }

    #[test]
    fn test_envelope_status() {
        let (_tmp, store) = setup();
        let found = query(
            &store,
            serde_json::json!({
                "method": "getEnvelopeStatus",
                "processId": "aa01",
                "nullifier": hex::encode([1u8; 32]),
            }),
        );
        assert_eq!(found.code, 0);

        let missing = query(
            &store,
            serde_json::json!({
                "method": "getEnvelopeStatus",
                "processId": "aa01",
                "nullifier": hex::encode([2u8; 32]),
            }),
        );
        assert_ne!(missing.code, 0);
    }

    #[test]
    fn test_get_envelope_returns_package() {
        let (_tmp, store) = setup();
        let resp = query(
            &store,
            serde_json::json!({
                "method": "getEnvelope",
                "processId": "aa01",
                "nullifier": hex::encode([1u8; 32]),
            }),
        );
        assert_eq!(resp.code, 0);
        assert_eq!(resp.value, b"cGtn");
    }

    #[test]
    fn test_envelope_height_counts() {
        let (_tmp, store) = setup();
        let resp = query(
            &store,
            serde_json::json!({"method": "getEnvelopeHeight", "processId": "aa01"}),
        );
        assert_eq!(resp.code, 0);
        let count: u64 = serde_json::from_slice(&resp.value).unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_envelope_list() {
        let (_tmp, store) = setup();
        let resp = query(
            &store,
            serde_json::json!({"method": "getEnvelopeList", "processId": "aa01"}),
        );
        assert_eq!(resp.code, 0);
        let nullifiers: Vec<String> = serde_json::from_slice(&resp.value).unwrap();
        assert_eq!(nullifiers, vec![hex::encode([1u8; 32])]);
    }

    #[test]
    fn test_undefined_method() {
        let (_tmp, store) = setup();
        let resp = query(&store, serde_json::json!({"method": "selfDestruct"}));
        assert_ne!(resp.code, 0);
    }

    #[test]
    fn test_garbage_query() {
        let (_tmp, store) = setup();
        let resp = dispatch(&store, b"not json");
        assert_ne!(resp.code, 0);
    }
}
