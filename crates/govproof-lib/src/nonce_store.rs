//! File-backed replay protection and nonce issuance.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use anyhow::{Context, Result};
use govproof_core::{Address, NonceLedger, NonceStore, NonceStoreError, Timestamp};
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};

const NONCE_LEN: usize = 17;

/// A fresh alphanumeric sign-in nonce.
pub fn generate_nonce() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(NONCE_LEN)
        .map(char::from)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Entry {
    address: Address,
    nonce: String,
    /// Unix seconds after which the entry can be forgotten.
    expires_at: Timestamp,
}

/// Consumed nonces persisted as a JSON array of `{address, nonce, expiresAt}`.
///
/// One process owns the file. The ledger lives in memory behind a mutex and
/// the file is rewritten after each change; expired entries are dropped on
/// open and on every consume, so the file only holds challenges that could
/// still be presented.
#[derive(Debug)]
pub struct JsonFileNonceStore {
    path: PathBuf,
    ledger: Mutex<NonceLedger>,
}

impl JsonFileNonceStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        Self::open_at(path, Timestamp::now())
    }

    /// [`open`](Self::open) with an explicit clock for pruning.
    pub fn open_at(path: impl Into<PathBuf>, now: Timestamp) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let mut ledger = load(&path)?;
        let dropped = ledger.prune(now);
        tracing::info!(
            path = %path.display(),
            live = ledger.len(),
            expired = dropped,
            "opened nonce store"
        );
        Ok(Self {
            path,
            ledger: Mutex::new(ledger),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Live entries currently held.
    pub fn len(&self) -> usize {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write to a sibling file and rename over the original.
    fn save(&self, ledger: &NonceLedger) -> Result<()> {
        let entries: Vec<Entry> = ledger
            .iter()
            .map(|(address, nonce, expires_at)| Entry {
                address: *address,
                nonce: nonce.to_string(),
                expires_at,
            })
            .collect();
        let tmp = self.path.with_extension("tmp");
        crate::write_json(&tmp, &entries)?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to replace {}", self.path.display()))
    }

    fn try_consume(
        &self,
        address: &Address,
        nonce: &str,
        expires_at: Timestamp,
        now: Timestamp,
    ) -> Result<bool> {
        let mut ledger = self.ledger.lock().unwrap_or_else(PoisonError::into_inner);
        let dropped = ledger.prune(now);
        let fresh = ledger.insert(*address, nonce.to_string(), expires_at);
        if fresh || dropped > 0 {
            if let Err(err) = self.save(&ledger) {
                if fresh {
                    ledger.remove(address, nonce);
                }
                return Err(err);
            }
        }
        if dropped > 0 {
            tracing::debug!(dropped, live = ledger.len(), "pruned expired nonces");
        }
        Ok(fresh)
    }
}

fn load(path: &Path) -> Result<NonceLedger> {
    let mut ledger = NonceLedger::new();
    if !path.exists() {
        return Ok(ledger);
    }
    let entries: Vec<Entry> = crate::read_json(path)?;
    for entry in entries {
        ledger.insert(entry.address, entry.nonce, entry.expires_at);
    }
    Ok(ledger)
}

impl NonceStore for JsonFileNonceStore {
    fn consume(
        &self,
        address: &Address,
        nonce: &str,
        expires_at: Timestamp,
        now: Timestamp,
    ) -> Result<bool, NonceStoreError> {
        self.try_consume(address, nonce, expires_at, now).map_err(|e| {
            tracing::error!(path = %self.path.display(), error = %e, "nonce store failure");
            NonceStoreError(format!("{e:#}"))
        })
    }
}
