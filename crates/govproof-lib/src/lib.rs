//! Govproof library: JSON-facing glue around the verification engine.
//!
//! Parses `eth_getProof` and block JSON into engine inputs, loads the
//! contract configuration, issues and checks sign-in challenges, and
//! persists consumed nonces. Shared by the `govproof` CLI and the server.

pub mod config;
pub mod header;
pub mod nonce_store;
pub mod payload;
pub mod session;

use std::{fs, path::Path};

use anyhow::{Context, Result};
use govproof_core::{
    attest,
    types::{encode_hex_prefixed, parse_u256},
    Address, StorageSlotClaim,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

pub use config::{Config, ContractConfig};
pub use header::{block_header_from_json, encode_block_header_rlp};
pub use nonce_store::{generate_nonce, JsonFileNonceStore};
pub use payload::{RpcProof, RpcStorageProof};
pub use session::{issue_challenge, AuthorizeRequest, ChallengeParams};

/// Input of one balance attestation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestRequest {
    pub contract: Address,
    pub holder: Address,
    /// Balances-mapping slot. Overrides the configured slot for `contract`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot_index: Option<String>,
    /// Block JSON, a `{number, hash, stateRoot}` triple, or `{headerRlp}`.
    pub block: Value,
    /// Block hash the caller already trusts; the block must hash to it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trusted_block_hash: Option<String>,
    /// `eth_getProof` result (or the full JSON-RPC response).
    pub proof: Value,
}

/// JSON rendering of a verified [`StorageSlotClaim`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationReport {
    pub holder: Address,
    pub contract: Address,
    pub slot_index: String,
    pub balance: String,
    pub block_number: u64,
    pub block_hash: String,
    pub state_root: String,
    pub storage_key: String,
}

impl From<&StorageSlotClaim> for AttestationReport {
    fn from(claim: &StorageSlotClaim) -> Self {
        Self {
            holder: claim.holder,
            contract: claim.contract,
            slot_index: claim.slot_index.to_string(),
            balance: claim.value.to_string(),
            block_number: claim.block_number,
            block_hash: encode_hex_prefixed(&claim.block_hash),
            state_root: encode_hex_prefixed(&claim.state_root),
            storage_key: encode_hex_prefixed(&claim.storage_key),
        }
    }
}

/// Resolve the slot, header and proof of `request` and run the attestation.
///
/// Engine rejections surface as [`govproof_core::AttestError`] inside the
/// returned error so callers can tell them apart from malformed input.
pub fn run_attestation(config: &Config, request: &AttestRequest) -> Result<StorageSlotClaim> {
    let explicit = request
        .slot_index
        .as_deref()
        .map(parse_u256)
        .transpose()
        .context("invalid slotIndex")?;
    let slot_index = config.resolve_slot(&request.contract, explicit)?;

    let trusted_hash = request
        .trusted_block_hash
        .as_deref()
        .map(govproof_core::types::decode_bytes32)
        .transpose()
        .context("invalid trustedBlockHash")?;
    let header = block_header_from_json(&request.block, trusted_hash.as_ref())?;
    let proof = payload::parse_proof_json(&request.proof)?;

    tracing::debug!(
        contract = %request.contract,
        holder = %request.holder,
        slot = %slot_index,
        block = header.number,
        account_nodes = proof.account_proof.len(),
        "verifying balance proof"
    );

    match attest(&header, &request.contract, &request.holder, &slot_index, &proof) {
        Ok(claim) => {
            tracing::info!(
                contract = %claim.contract,
                holder = %claim.holder,
                block = claim.block_number,
                balance = %claim.value,
                "balance attested"
            );
            Ok(claim)
        }
        Err(err) => {
            tracing::warn!(
                contract = %request.contract,
                holder = %request.holder,
                block = header.number,
                error = %err,
                "attestation rejected"
            );
            Err(err.into())
        }
    }
}

// ---------------------------------------------------------------------------
// JSON file helpers
// ---------------------------------------------------------------------------

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let contents = serde_json::to_string_pretty(value).context("failed to serialize JSON")?;
    fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use govproof_core::U256;

    #[test]
    fn report_renders_decimal_balance_and_hex_hashes() {
        let claim = StorageSlotClaim {
            holder: Address([0x11; 20]),
            contract: Address([0x22; 20]),
            slot_index: U256::from(9u64),
            value: U256::exp10(18),
            block_number: 7,
            block_hash: [0xab; 32],
            state_root: [0xcd; 32],
            storage_key: [0x01; 32],
        };
        let report = AttestationReport::from(&claim);
        assert_eq!(report.balance, "1000000000000000000");
        assert_eq!(report.slot_index, "9");
        assert_eq!(report.block_hash, format!("0x{}", "ab".repeat(32)));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["blockNumber"], 7);
        assert_eq!(json["holder"], "0x1111111111111111111111111111111111111111");
    }

    #[test]
    fn json_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        write_json(&path, &serde_json::json!({ "ok": true })).unwrap();
        let back: Value = read_json(&path).unwrap();
        assert_eq!(back["ok"], true);
        assert!(read_json::<Value>(&dir.path().join("missing.json")).is_err());
    }
}
