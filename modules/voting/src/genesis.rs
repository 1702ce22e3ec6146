//! Genesis application state
//!
//! The `app_state` section of the genesis document: the initial validator
//! set and the oracle addresses seeded at InitChain.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use scrutonet_core::{Address, ScrutonetError, ScrutonetResult, Validator};
use scrutonet_crypto::keys::validator_pub_key_from_bytes;
use serde::{Deserialize, Serialize};

/// A validator entry in the genesis document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisValidator {
    pub pub_key: GenesisPubKey,
    /// Voting power as a decimal string
    pub power: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisPubKey {
    #[serde(rename = "type", default)]
    pub key_type: String,
    /// Base64 ed25519 public key
    pub value: String,
}

/// Application state in genesis
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenesisAppState {
    #[serde(default)]
    pub validators: Vec<GenesisValidator>,
    #[serde(default)]
    pub oracles: Vec<String>,
}

impl GenesisAppState {
    pub fn from_json(bytes: &[u8]) -> ScrutonetResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| ScrutonetError::Deserialization(e.to_string()))
    }

    pub fn to_json(&self) -> ScrutonetResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| ScrutonetError::Serialization(e.to_string()))
    }

    /// Decode and validate the validator entries
    pub fn parsed_validators(&self) -> ScrutonetResult<Vec<Validator>> {
        let mut out = Vec::with_capacity(self.validators.len());
        for v in &self.validators {
            let key_bytes = BASE64
                .decode(&v.pub_key.value)
                .map_err(|e| ScrutonetError::Deserialization(e.to_string()))?;
            let pub_key = validator_pub_key_from_bytes(&key_bytes)?;
            let power: i64 = v.power.parse().map_err(|_| {
                ScrutonetError::Deserialization(format!("invalid validator power {:?}", v.power))
            })?;
            out.push(Validator {
                pub_key,
                power,
                name: v.name.clone(),
            });
        }
        Ok(out)
    }

    /// Decode the oracle addresses (lowercase hex)
    pub fn parsed_oracles(&self) -> ScrutonetResult<Vec<Address>> {
        self.oracles
            .iter()
            .map(|s| {
                Address::from_hex(s)
                    .map_err(|_| ScrutonetError::InvalidAddress(s.clone()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ed25519_b64() -> String {
        let signing = ed25519_dalek::SigningKey::from_bytes(&[9u8; 32]);
        BASE64.encode(signing.verifying_key().to_bytes())
    }

    #[test]
    fn test_parse_genesis_app_state() {
        let json = format!(
            r#"{{
                "validators": [
                    {{"pub_key": {{"type": "ed25519", "value": "{}"}}, "power": "10", "name": "miner0"}}
                ],
                "oracles": ["{}"]
            }}"#,
            ed25519_b64(),
            hex::encode([3u8; 32]),
        );

        let state = GenesisAppState::from_json(json.as_bytes()).unwrap();
        let validators = state.parsed_validators().unwrap();
        assert_eq!(validators.len(), 1);
        assert_eq!(validators[0].power, 10);
        assert_eq!(validators[0].name, "miner0");

        let oracles = state.parsed_oracles().unwrap();
        assert_eq!(oracles, vec![Address::from_bytes([3u8; 32])]);
    }

    #[test]
    fn test_bad_power_rejected() {
        let json = format!(
            r#"{{"validators": [{{"pub_key": {{"value": "{}"}}, "power": "ten"}}], "oracles": []}}"#,
            ed25519_b64(),
        );
        let state = GenesisAppState::from_json(json.as_bytes()).unwrap();
        assert!(state.parsed_validators().is_err());
    }

    #[test]
    fn test_bad_oracle_rejected() {
        let state = GenesisAppState {
            validators: vec![],
            oracles: vec!["nothex".into()],
        };
        assert!(state.parsed_oracles().is_err());
    }

    #[test]
    fn test_empty_app_state() {
        let state = GenesisAppState::from_json(b"{}").unwrap();
        assert!(state.validators.is_empty());
        assert!(state.oracles.is_empty());
    }
}
