//! Balance attestation: account proof, then storage proof, against one header.

use thiserror::Error;

use crate::{
    account::Account,
    header::BlockHeader,
    rlp::{self, MalformedRlp},
    storage_key::{account_trie_key, derive_balance_slot_key, storage_trie_key},
    trie::{verify_proof, NibblePath, ProofError},
    types::{Address, Bytes32, U256},
};

/// One `storageProof` entry of an `eth_getProof` response.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StorageProof {
    pub key: Bytes32,
    /// Value reported by the RPC node. Untrusted; checked against the proof when present.
    pub value: Option<U256>,
    pub proof: Vec<Vec<u8>>,
}

/// An `eth_getProof` response. Only the proof arrays are trusted input to the
/// walk; the reported account fields are cross-checked after verification.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProofPayload {
    pub account_proof: Vec<Vec<u8>>,
    pub balance: Option<U256>,
    pub nonce: Option<u64>,
    pub code_hash: Option<Bytes32>,
    pub storage_hash: Option<Bytes32>,
    pub storage_proof: Vec<StorageProof>,
}

/// A verified `balances[holder]` value of `contract` at one block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageSlotClaim {
    pub holder: Address,
    pub contract: Address,
    pub slot_index: U256,
    pub value: U256,
    pub block_number: u64,
    pub block_hash: Bytes32,
    pub state_root: Bytes32,
    pub storage_key: Bytes32,
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum AttestError {
    #[error("account proof rejected: {0}")]
    AccountProof(ProofError),
    #[error("contract {0} is not present in the state trie")]
    AccountNotFound(Address),
    #[error("account state is malformed: {0}")]
    AccountState(MalformedRlp),
    #[error("no storage proof supplied for slot key 0x{}", hex::encode(.key))]
    MissingStorageProof { key: Bytes32 },
    #[error("storage proof rejected: {0}")]
    StorageProof(ProofError),
    #[error("storage value is malformed: {0}")]
    StorageValue(MalformedRlp),
    #[error("payload field `{field}` disagrees with the proven state")]
    PayloadMismatch { field: &'static str },
}

/// Verify `balances[holder]` of `contract` (mapping at `slot_index`) at `header`.
///
/// The claim is all-or-nothing: any failed step aborts. A storage proof of
/// absence is a verified zero balance.
pub fn attest(
    header: &BlockHeader,
    contract: &Address,
    holder: &Address,
    slot_index: &U256,
    proof: &ProofPayload,
) -> Result<StorageSlotClaim, AttestError> {
    let account_path = NibblePath::from_key(&account_trie_key(contract));
    let account_rlp = verify_proof(&header.state_root, &account_path, &proof.account_proof)
        .map_err(AttestError::AccountProof)?
        .ok_or(AttestError::AccountNotFound(*contract))?;
    let account = Account::decode(&account_rlp).map_err(AttestError::AccountState)?;
    check_reported_account(&account, proof)?;

    let storage_key = derive_balance_slot_key(holder, slot_index);
    let entry = proof
        .storage_proof
        .iter()
        .find(|entry| entry.key == storage_key)
        .ok_or(AttestError::MissingStorageProof { key: storage_key })?;

    let storage_path = NibblePath::from_key(&storage_trie_key(&storage_key));
    let value = match verify_proof(&account.storage_root, &storage_path, &entry.proof)
        .map_err(AttestError::StorageProof)?
    {
        Some(raw) => decode_storage_value(&raw).map_err(AttestError::StorageValue)?,
        None => U256::zero(),
    };
    if entry.value.is_some_and(|reported| reported != value) {
        return Err(AttestError::PayloadMismatch {
            field: "storageProof.value",
        });
    }

    Ok(StorageSlotClaim {
        holder: *holder,
        contract: *contract,
        slot_index: *slot_index,
        value,
        block_number: header.number,
        block_hash: header.hash,
        state_root: header.state_root,
        storage_key,
    })
}

/// Storage leaves hold the RLP encoding of the trimmed big-endian word.
fn decode_storage_value(raw: &[u8]) -> Result<U256, MalformedRlp> {
    let payload = rlp::decode_bytes(raw)?;
    rlp::decode_u256(&payload)
}

fn check_reported_account(account: &Account, proof: &ProofPayload) -> Result<(), AttestError> {
    let mismatch = |field| Err(AttestError::PayloadMismatch { field });

    if proof.storage_hash.is_some_and(|h| h != account.storage_root) {
        return mismatch("storageHash");
    }
    if proof.code_hash.is_some_and(|h| h != account.code_hash) {
        return mismatch("codeHash");
    }
    if proof.nonce.is_some_and(|n| n != account.nonce) {
        return mismatch("nonce");
    }
    if proof.balance.is_some_and(|b| b != account.balance) {
        return mismatch("balance");
    }
    Ok(())
}
