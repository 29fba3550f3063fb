//! Deployment configuration: per-contract balance slots and sign-in policy.

use std::{collections::HashSet, path::Path};

use anyhow::{bail, Context, Result};
use govproof_core::{types::parse_u256, Address, AuthPolicy, U256};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub contracts: Vec<ContractConfig>,
    #[serde(default)]
    pub siwe: AuthPolicy,
}

/// A governance token contract and the storage slot of its balances mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractConfig {
    pub address: Address,
    #[serde(with = "slot_format")]
    pub balance_slot: U256,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let config: Self = crate::read_json(path)?;
        config
            .validate()
            .with_context(|| format!("invalid config {}", path.display()))?;
        tracing::info!(
            path = %path.display(),
            contracts = config.contracts.len(),
            "loaded config"
        );
        Ok(config)
    }

    /// [`Config::load`] when a path is given, the empty config otherwise.
    pub fn load_optional(path: Option<&Path>) -> Result<Self> {
        path.map(Self::load).unwrap_or_else(|| Ok(Self::default()))
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for contract in &self.contracts {
            if !seen.insert(contract.address) {
                bail!("contract {} is listed more than once", contract.address);
            }
        }
        Ok(())
    }

    pub fn contract(&self, address: &Address) -> Option<&ContractConfig> {
        self.contracts.iter().find(|c| c.address == *address)
    }

    /// Balance slot for `contract`: the explicit value when given, the
    /// configured one otherwise. There is no default slot.
    pub fn resolve_slot(&self, contract: &Address, explicit: Option<U256>) -> Result<U256> {
        if let Some(slot) = explicit {
            return Ok(slot);
        }
        match self.contract(contract) {
            Some(entry) => Ok(entry.balance_slot),
            None => bail!("no balance slot configured for contract {contract}; pass one explicitly"),
        }
    }

    pub fn auth_policy(&self) -> AuthPolicy {
        self.siwe.clone()
    }
}

/// Slots are written as a JSON number, a decimal string or a `0x` quantity.
mod slot_format {
    use super::*;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(slot: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&slot.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(U256::from(n)),
            Raw::Text(s) => parse_u256(&s).map_err(serde::de::Error::custom),
        }
    }
}
