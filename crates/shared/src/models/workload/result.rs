use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::security::keys;

#[derive(Debug, Clone, Copy, Serialize_repr, Deserialize_repr, PartialEq, Eq, Default)]
#[repr(i64)]
pub enum ResultState {
    #[default]
    Ok = 0,
    Error = 1,
    Deleted = 2,
}

/// Outcome a node reports back for a dispatched workload.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WorkloadResult {
    /// Composite workload id, `"<id>-<sub>"`.
    #[serde(default)]
    pub workload_id: String,
    #[serde(default)]
    pub node_id: String,
    #[serde(default)]
    pub state: ResultState,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data_json: serde_json::Value,
    #[serde(default)]
    pub epoch: i64,
    /// Node signature over [`WorkloadResult::signature_challenge`].
    #[serde(default)]
    pub signature: String,
}

impl WorkloadResult {
    /// Byte stream the node signs: binds the workload, the node and the
    /// reported outcome.
    pub fn signature_challenge(&self) -> String {
        let mut b = String::new();
        let _ = write!(b, "{}", self.workload_id);
        let _ = write!(b, "{}", self.node_id);
        let _ = write!(b, "{}", self.state as i64);
        let _ = write!(b, "{}", self.message);
        let _ = write!(b, "{}", self.data_json);
        b
    }

    pub fn verify(&self, node_pubkey_hex: &str) -> anyhow::Result<()> {
        keys::verify_hex(
            node_pubkey_hex,
            self.signature_challenge().as_bytes(),
            &self.signature,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    #[test]
    fn result_signature_round_trip() {
        let key = SigningKey::generate(&mut OsRng);
        let mut result = WorkloadResult {
            workload_id: "10-1".to_string(),
            node_id: "node-1".to_string(),
            state: ResultState::Ok,
            message: String::new(),
            data_json: serde_json::json!({"volume_id": "10-1"}),
            epoch: 0,
            signature: String::new(),
        };
        result.signature = keys::sign_hex(&key, result.signature_challenge().as_bytes());

        let pubkey = hex::encode(key.verifying_key().to_bytes());
        assert!(result.verify(&pubkey).is_ok());

        result.state = ResultState::Error;
        assert!(result.verify(&pubkey).is_err());
    }
}
