use crate::{
    keccak::keccak256,
    types::{u256_to_be_bytes, Address, Bytes32, U256},
};

/// Storage slot of `balances[holder]` for a Solidity
/// `mapping(address => uint256)` declared at slot `slot_index`.
///
/// Computes `keccak256(leftPad32(holder) ++ leftPad32(slot_index))`. Both
/// operands are padded to a full word; a packed 20+32 byte preimage gives a
/// different (wrong) key.
pub fn derive_balance_slot_key(holder: &Address, slot_index: &U256) -> Bytes32 {
    let mut padded = [0u8; 32];
    padded[12..].copy_from_slice(holder.as_bytes());
    derive_mapping_slot_key(&padded, slot_index)
}

/// Storage slot of `mapping[key]` where `key` is already a 32-byte word.
pub fn derive_mapping_slot_key(key: &Bytes32, slot_index: &U256) -> Bytes32 {
    let mut input = [0u8; 64];
    input[..32].copy_from_slice(key);
    input[32..].copy_from_slice(&u256_to_be_bytes(slot_index));
    keccak256(&input)
}

/// Path of an account in the state trie.
pub fn account_trie_key(address: &Address) -> Bytes32 {
    keccak256(address.as_bytes())
}

/// Path of a storage slot in an account's storage trie.
pub fn storage_trie_key(slot_key: &Bytes32) -> Bytes32 {
    keccak256(slot_key)
}
