//! `eth_getProof` JSON decoding.

use anyhow::{bail, Context, Result};
use govproof_core::{
    types::{decode_bytes32, decode_hex, decode_quantity, parse_u256},
    Bytes32, ProofPayload, StorageProof,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The `result` object of an `eth_getProof` response, as hex strings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcProof {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    pub account_proof: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_hash: Option<String>,
    #[serde(default)]
    pub storage_proof: Vec<RpcStorageProof>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcStorageProof {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub proof: Vec<String>,
}

impl RpcProof {
    /// Decode every hex field into an engine payload.
    pub fn to_payload(&self) -> Result<ProofPayload> {
        let account_proof = decode_nodes(&self.account_proof).context("invalid accountProof")?;

        let balance = self
            .balance
            .as_deref()
            .map(parse_u256)
            .transpose()
            .context("invalid balance")?;
        let nonce = self
            .nonce
            .as_deref()
            .map(parse_u64_quantity)
            .transpose()
            .context("invalid nonce")?;
        let code_hash = self
            .code_hash
            .as_deref()
            .map(decode_bytes32)
            .transpose()
            .context("invalid codeHash")?;
        let storage_hash = self
            .storage_hash
            .as_deref()
            .map(decode_bytes32)
            .transpose()
            .context("invalid storageHash")?;

        let storage_proof = self
            .storage_proof
            .iter()
            .enumerate()
            .map(|(i, entry)| {
                entry
                    .to_storage_proof()
                    .with_context(|| format!("invalid storageProof[{i}]"))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(ProofPayload {
            account_proof,
            balance,
            nonce,
            code_hash,
            storage_hash,
            storage_proof,
        })
    }
}

impl RpcStorageProof {
    fn to_storage_proof(&self) -> Result<StorageProof> {
        Ok(StorageProof {
            key: parse_storage_key(&self.key)?,
            value: self
                .value
                .as_deref()
                .map(parse_u256)
                .transpose()
                .context("invalid value")?,
            proof: decode_nodes(&self.proof).context("invalid proof")?,
        })
    }
}

/// Accept either the `result` object or the whole JSON-RPC response.
pub fn parse_proof_json(value: &Value) -> Result<ProofPayload> {
    if let Some(error) = value.get("error") {
        bail!("eth_getProof returned an error: {error}");
    }
    let result = value.get("result").unwrap_or(value);
    let proof: RpcProof =
        serde_json::from_value(result.clone()).context("not an eth_getProof result")?;
    proof.to_payload()
}

/// Storage keys come back as the caller sent them; some nodes drop leading
/// zeros. Left-pad to a full word.
fn parse_storage_key(raw: &str) -> Result<Bytes32> {
    let bytes = decode_quantity(raw).context("invalid storage key")?;
    if bytes.len() > 32 {
        bail!("storage key longer than 32 bytes");
    }
    let mut key = [0u8; 32];
    key[32 - bytes.len()..].copy_from_slice(&bytes);
    Ok(key)
}

fn parse_u64_quantity(raw: &str) -> Result<u64> {
    let bytes = decode_quantity(raw)?;
    if bytes.len() > 8 {
        bail!("quantity exceeds 64 bits");
    }
    Ok(bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
}

fn decode_nodes(nodes: &[String]) -> Result<Vec<Vec<u8>>> {
    nodes
        .iter()
        .enumerate()
        .map(|(i, node)| decode_hex(node).with_context(|| format!("node {i} is not hex")))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use govproof_core::U256;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "address": "0x6b175474e89094c44da98b954eedeac495271d0f",
            "accountProof": ["0xf8518080a0", "0xe21a"],
            "balance": "0x0",
            "codeHash": format!("0x{}", "c5".repeat(32)),
            "nonce": "0x1",
            "storageHash": format!("0x{}", "56".repeat(32)),
            "storageProof": [{
                "key": "0x5",
                "value": "0x3635c9adc5dea00000",
                "proof": ["0xe3a1"]
            }]
        })
    }

    #[test]
    fn decodes_result_object() {
        let payload = parse_proof_json(&sample()).unwrap();
        assert_eq!(
            payload.account_proof,
            vec![vec![0xf8, 0x51, 0x80, 0x80, 0xa0], vec![0xe2, 0x1a]]
        );
        assert_eq!(payload.balance, Some(U256::zero()));
        assert_eq!(payload.nonce, Some(1));
        assert_eq!(payload.code_hash, Some([0xc5; 32]));

        let entry = &payload.storage_proof[0];
        let mut key = [0u8; 32];
        key[31] = 5;
        assert_eq!(entry.key, key);
        assert_eq!(entry.value, Some(U256::from(1000u64) * U256::exp10(18)));
        assert_eq!(entry.proof, vec![vec![0xe3, 0xa1]]);
    }

    #[test]
    fn unwraps_rpc_envelope() {
        let envelope = json!({ "jsonrpc": "2.0", "id": 1, "result": sample() });
        assert_eq!(parse_proof_json(&envelope).unwrap().nonce, Some(1));
    }

    #[test]
    fn rpc_error_is_reported() {
        let envelope = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": { "code": -32000, "message": "missing trie node" }
        });
        let err = parse_proof_json(&envelope).unwrap_err();
        assert!(err.to_string().contains("missing trie node"));
    }

    #[test]
    fn bad_hex_is_located() {
        let mut value = sample();
        value["storageProof"][0]["proof"][0] = json!("0xzz");
        let err = parse_proof_json(&value).unwrap_err();
        assert!(format!("{err:#}").contains("storageProof[0]"));
    }

    #[test]
    fn optional_fields_may_be_absent() {
        let payload = parse_proof_json(&json!({ "accountProof": [] })).unwrap();
        assert!(payload.account_proof.is_empty());
        assert!(payload.balance.is_none());
        assert!(payload.storage_proof.is_empty());
    }
}
