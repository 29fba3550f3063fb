//! Block header reconstruction from `eth_getBlockByNumber` JSON.

use anyhow::{bail, Context, Result};
use govproof_core::{
    rlp,
    types::{decode_bytes32, decode_hex, decode_quantity},
    BlockHeader, Bytes32,
};
use serde_json::{Map, Value};

#[derive(Clone, Copy)]
enum Kind {
    Bytes,
    Quantity,
}

/// Pre-London header fields, always present.
const LEGACY_FIELDS: [(&str, Kind); 15] = [
    ("parentHash", Kind::Bytes),
    ("sha3Uncles", Kind::Bytes),
    ("miner", Kind::Bytes),
    ("stateRoot", Kind::Bytes),
    ("transactionsRoot", Kind::Bytes),
    ("receiptsRoot", Kind::Bytes),
    ("logsBloom", Kind::Bytes),
    ("difficulty", Kind::Quantity),
    ("number", Kind::Quantity),
    ("gasLimit", Kind::Quantity),
    ("gasUsed", Kind::Quantity),
    ("timestamp", Kind::Quantity),
    ("extraData", Kind::Bytes),
    ("mixHash", Kind::Bytes),
    ("nonce", Kind::Bytes),
];

/// Fork-added fields in header order (London through Prague). A field may
/// only appear when every earlier one does.
const FORK_FIELDS: [(&str, Kind); 6] = [
    ("baseFeePerGas", Kind::Quantity),
    ("withdrawalsRoot", Kind::Bytes),
    ("blobGasUsed", Kind::Quantity),
    ("excessBlobGas", Kind::Quantity),
    ("parentBeaconBlockRoot", Kind::Bytes),
    ("requestsHash", Kind::Bytes),
];

/// RLP-encode a block header from its JSON-RPC representation.
pub fn encode_block_header_rlp(block: &Map<String, Value>) -> Result<Vec<u8>> {
    let mut items = Vec::with_capacity(LEGACY_FIELDS.len() + FORK_FIELDS.len());
    for (name, kind) in LEGACY_FIELDS {
        let raw = block
            .get(name)
            .and_then(Value::as_str)
            .with_context(|| format!("block is missing `{name}`"))?;
        items.push(encode_field(name, raw, kind)?);
    }

    let mut gap: Option<&str> = None;
    for (name, kind) in FORK_FIELDS {
        match block.get(name).and_then(Value::as_str) {
            Some(raw) => {
                if let Some(missing) = gap {
                    bail!("block has `{name}` but not the earlier fork field `{missing}`");
                }
                items.push(encode_field(name, raw, kind)?);
            }
            None => {
                gap.get_or_insert(name);
            }
        }
    }

    tracing::debug!(fields = items.len(), "encoded block header");
    Ok(rlp::encode_list(&items))
}

fn encode_field(name: &str, raw: &str, kind: Kind) -> Result<Vec<u8>> {
    let bytes = match kind {
        Kind::Bytes => decode_hex(raw),
        Kind::Quantity => decode_quantity(raw),
    }
    .with_context(|| format!("invalid `{name}`"))?;
    Ok(rlp::encode_bytes(&bytes))
}

/// Build a [`BlockHeader`] from caller-supplied JSON.
///
/// Accepts a full RPC block (re-encoded and hashed), `{ "headerRlp": "0x.." }`,
/// or a bare `{ number, hash, stateRoot }` triple the caller vouches for. A
/// `hash` reported alongside a full block must match the recomputed hash, as
/// must `trusted_hash` when given.
pub fn block_header_from_json(
    value: &Value,
    trusted_hash: Option<&Bytes32>,
) -> Result<BlockHeader> {
    let block = value
        .get("result")
        .unwrap_or(value)
        .as_object()
        .context("block must be a JSON object")?;

    let header = if let Some(raw) = block.get("headerRlp").and_then(Value::as_str) {
        let bytes = decode_hex(raw).context("invalid headerRlp")?;
        BlockHeader::from_rlp(&bytes).context("headerRlp is not a valid block header")?
    } else if block.contains_key("parentHash") {
        let encoded = encode_block_header_rlp(block)?;
        let header = BlockHeader::from_rlp(&encoded).context("re-encoded header is invalid")?;
        if let Some(reported) = block.get("hash").and_then(Value::as_str) {
            let reported = decode_bytes32(reported).context("invalid block hash")?;
            if reported != header.hash {
                bail!(
                    "block hash mismatch: RPC says 0x{} but RLP hashes to 0x{}",
                    hex::encode(reported),
                    hex::encode(header.hash)
                );
            }
        }
        header
    } else {
        let number = block
            .get("number")
            .context("block is missing `number`")
            .and_then(parse_number)?;
        let hash = block
            .get("hash")
            .and_then(Value::as_str)
            .context("block is missing `hash`")?;
        let state_root = block
            .get("stateRoot")
            .and_then(Value::as_str)
            .context("block is missing `stateRoot`")?;
        BlockHeader::new(
            number,
            decode_bytes32(hash).context("invalid block hash")?,
            decode_bytes32(state_root).context("invalid stateRoot")?,
        )
    };

    if let Some(trusted) = trusted_hash {
        if *trusted != header.hash {
            bail!(
                "block 0x{} is not the trusted block 0x{}",
                hex::encode(header.hash),
                hex::encode(trusted)
            );
        }
    }
    Ok(header)
}

fn parse_number(value: &Value) -> Result<u64> {
    match value {
        Value::Number(n) => n.as_u64().context("block number out of range"),
        Value::String(s) => {
            let bytes = decode_quantity(s).context("invalid block number")?;
            if bytes.len() > 8 {
                bail!("block number out of range");
            }
            Ok(bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
        }
        _ => bail!("block number must be a number or hex string"),
    }
}
