//! Proof and signature verification engine for token-weighted governance.
//!
//! Turns an untrusted `eth_getProof` payload into a trusted
//! [`StorageSlotClaim`] and an untrusted SIWE signature into a trusted signer
//! [`Address`]. Every routine here is pure and synchronous: no I/O, no
//! retries, no shared mutable state beyond the injected [`NonceStore`].

pub mod account;
pub mod attest;
pub mod header;
pub mod keccak;
pub mod rlp;
pub mod session;
pub mod signature;
pub mod siwe;
pub mod storage_key;
pub mod trie;
pub mod types;

pub use account::{Account, KECCAK_EMPTY};
pub use attest::{attest, AttestError, ProofPayload, StorageProof, StorageSlotClaim};
pub use header::BlockHeader;
pub use keccak::keccak256;
pub use rlp::{Item, MalformedRlp};
pub use session::{
    AuthError, AuthPolicy, MemoryNonceStore, NonceLedger, NonceStore, NonceStoreError,
    SessionAuthEngine,
};
pub use signature::{
    address_from_private_key, personal_message_digest, recover_prehash, recover_signer,
    sign_personal_message, SigError, Signature,
};
pub use siwe::{SiweChallenge, Timestamp};
pub use storage_key::{account_trie_key, derive_balance_slot_key, storage_trie_key};
pub use trie::{verify_proof, NibblePath, ProofError, TrieFault, EMPTY_TRIE_ROOT};
pub use types::{Address, Bytes32, ParseError, U256};
