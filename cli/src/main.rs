use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use govproof_core::{
    address_from_private_key, derive_balance_slot_key, recover_signer, sign_personal_message,
    storage_trie_key,
    types::{decode_bytes32, encode_hex_prefixed, parse_u256},
    Address, MemoryNonceStore, NonceStore, SessionAuthEngine, Signature, Timestamp,
};
use govproof_lib::{
    block_header_from_json, generate_nonce, issue_challenge, read_json, run_attestation,
    session, write_json, AttestRequest, AttestationReport, AuthorizeRequest, ChallengeParams,
    Config, JsonFileNonceStore,
};
use serde::Serialize;
use serde_json::{json, Value};

#[derive(Debug, Parser)]
#[command(name = "govproof")]
#[command(about = "Verify token balances and sign-in signatures for governance votes")]
struct Cli {
    /// JSON config with per-contract balance slots and sign-in policy.
    #[arg(long, global = true, env = "GOVPROOF_CONFIG")]
    config: Option<PathBuf>,

    /// Write the JSON result here instead of stdout.
    #[arg(long, global = true)]
    out: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Derive the storage slot of `balances[holder]`.
    SlotKey {
        #[arg(long)]
        holder: Address,
        /// Slot of the balances mapping (decimal or 0x hex).
        #[arg(long)]
        slot: String,
    },
    /// Verify an eth_getProof payload and attest the holder's balance.
    Attest {
        #[arg(long)]
        contract: Address,
        #[arg(long)]
        holder: Address,
        /// Block JSON from eth_getBlockByNumber, or {number, hash, stateRoot}.
        #[arg(long)]
        block: PathBuf,
        /// eth_getProof result JSON.
        #[arg(long)]
        proof: PathBuf,
        /// Overrides the configured balance slot for the contract.
        #[arg(long)]
        slot: Option<String>,
        /// Require the block to hash to this value.
        #[arg(long)]
        trusted_hash: Option<String>,
    },
    /// Rebuild a block header from JSON and print its hash and RLP.
    Header {
        #[arg(long)]
        block: PathBuf,
    },
    /// Issue a sign-in challenge for an address.
    SiweMessage {
        #[arg(long)]
        address: Address,
        #[arg(long)]
        statement: String,
        #[arg(long)]
        uri: String,
        #[arg(long)]
        domain: Option<String>,
        #[arg(long)]
        chain_id: Option<u64>,
        /// Seconds until the challenge expires.
        #[arg(long, default_value_t = session::DEFAULT_TTL_SECS)]
        ttl: u64,
        /// Print the message text only.
        #[arg(long)]
        text: bool,
    },
    /// Recover the signer of a personal message.
    Recover {
        #[command(flatten)]
        message: MessageArgs,
        #[arg(long)]
        signature: Signature,
    },
    /// Check a signed sign-in request and consume its nonce.
    Authorize {
        /// JSON with `signature` and either `message` or `challenge`.
        #[arg(long)]
        request: PathBuf,
        /// Consumed-nonce file; in-memory when omitted.
        #[arg(long, env = "GOVPROOF_NONCE_DB")]
        nonce_db: Option<PathBuf>,
        /// Evaluate the validity window at this RFC 3339 instant instead of now.
        #[arg(long)]
        now: Option<String>,
    },
    /// Sign a personal message with a local key (testing only).
    Sign {
        #[command(flatten)]
        message: MessageArgs,
        #[arg(long, env = "GOVPROOF_SIGNER_KEY", hide_env_values = true)]
        key: String,
    },
    /// Print a fresh sign-in nonce.
    Nonce,
}

#[derive(Debug, Args)]
struct MessageArgs {
    /// Message text.
    #[arg(long, conflicts_with = "message_file")]
    message: Option<String>,
    /// File holding the exact message bytes.
    #[arg(long)]
    message_file: Option<PathBuf>,
}

impl MessageArgs {
    fn bytes(&self) -> Result<Vec<u8>> {
        match (&self.message, &self.message_file) {
            (Some(text), _) => Ok(text.clone().into_bytes()),
            (None, Some(path)) => {
                fs::read(path).with_context(|| format!("failed to read {}", path.display()))
            }
            (None, None) => bail!("pass --message or --message-file"),
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "govproof=info,govproof_lib=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load_optional(cli.config.as_deref())?;

    let output = match cli.command {
        Command::SlotKey { holder, slot } => cmd_slot_key(&holder, &slot)?,
        Command::Attest {
            contract,
            holder,
            block,
            proof,
            slot,
            trusted_hash,
        } => cmd_attest(&config, contract, holder, &block, &proof, slot, trusted_hash)?,
        Command::Header { block } => cmd_header(&block)?,
        Command::SiweMessage {
            address,
            statement,
            uri,
            domain,
            chain_id,
            ttl,
            text,
        } => {
            let params = ChallengeParams {
                address,
                domain,
                statement,
                uri,
                chain_id,
                ttl_secs: Some(ttl),
                request_id: None,
                resources: Vec::new(),
            };
            let challenge = issue_challenge(&params, &config.auth_policy(), Timestamp::now())?;
            if text {
                println!("{}", challenge.to_message());
                return Ok(());
            }
            json!({ "challenge": challenge, "message": challenge.to_message() })
        }
        Command::Recover { message, signature } => {
            let signer = recover_signer(&message.bytes()?, &signature)
                .context("signature recovery failed")?;
            json!({ "signer": signer })
        }
        Command::Authorize {
            request,
            nonce_db,
            now,
        } => cmd_authorize(&config, &request, nonce_db.as_deref(), now.as_deref())?,
        Command::Sign { message, key } => {
            let key = decode_bytes32(&key).context("signer key must be 32 bytes of hex")?;
            let signature = sign_personal_message(&key, &message.bytes()?)?;
            json!({ "signer": address_from_private_key(&key)?, "signature": signature })
        }
        Command::Nonce => json!({ "nonce": generate_nonce() }),
    };

    emit(&output, cli.out.as_deref())
}

fn cmd_slot_key(holder: &Address, slot: &str) -> Result<Value> {
    let slot_index = parse_u256(slot).context("invalid --slot")?;
    let slot_key = derive_balance_slot_key(holder, &slot_index);
    Ok(json!({
        "holder": holder,
        "slotIndex": slot_index.to_string(),
        "slotKey": encode_hex_prefixed(&slot_key),
        "trieKey": encode_hex_prefixed(&storage_trie_key(&slot_key)),
    }))
}

fn cmd_attest(
    config: &Config,
    contract: Address,
    holder: Address,
    block_path: &Path,
    proof_path: &Path,
    slot: Option<String>,
    trusted_hash: Option<String>,
) -> Result<Value> {
    let request = AttestRequest {
        contract,
        holder,
        slot_index: slot,
        block: read_json(block_path)?,
        trusted_block_hash: trusted_hash,
        proof: read_json(proof_path)?,
    };
    let claim = run_attestation(config, &request)?;
    Ok(serde_json::to_value(AttestationReport::from(&claim))?)
}

fn cmd_header(block_path: &Path) -> Result<Value> {
    let block: Value = read_json(block_path)?;
    let header = block_header_from_json(&block, None)?;
    let object = block.get("result").unwrap_or(&block);
    let header_rlp = match object.as_object() {
        Some(fields) if fields.contains_key("parentHash") => {
            Some(encode_hex_prefixed(&govproof_lib::encode_block_header_rlp(fields)?))
        }
        _ => None,
    };
    Ok(json!({
        "number": header.number,
        "hash": encode_hex_prefixed(&header.hash),
        "stateRoot": encode_hex_prefixed(&header.state_root),
        "headerRlp": header_rlp,
    }))
}

fn cmd_authorize(
    config: &Config,
    request_path: &Path,
    nonce_db: Option<&Path>,
    now: Option<&str>,
) -> Result<Value> {
    let request: AuthorizeRequest = read_json(request_path)?;
    let now = match now {
        Some(raw) => Timestamp::parse_rfc3339(raw).context("invalid --now")?,
        None => Timestamp::now(),
    };
    let store: Box<dyn NonceStore> = match nonce_db {
        Some(path) => Box::new(JsonFileNonceStore::open_at(path, now)?),
        None => Box::new(MemoryNonceStore::new()),
    };
    let engine = SessionAuthEngine::with_policy(store, config.auth_policy());
    let address = session::authorize(&engine, &request, now)?;
    Ok(json!({ "authorized": true, "address": address }))
}

fn emit<T: Serialize>(value: &T, out: Option<&Path>) -> Result<()> {
    match out {
        Some(path) => {
            write_json(path, value)?;
            tracing::info!(path = %path.display(), "wrote result");
        }
        None => println!("{}", serde_json::to_string_pretty(value)?),
    }
    Ok(())
}
