//! End-to-end balance attestation over synthetic state and storage tries.

use govproof_core::{
    account_trie_key, attest, derive_balance_slot_key,
    keccak::keccak256,
    rlp, storage_trie_key,
    trie::{ChildRef, MptNode},
    Account, Address, AttestError, BlockHeader, Bytes32, NibblePath, ProofError, ProofPayload,
    StorageProof, TrieFault, KECCAK_EMPTY, U256,
};

const BALANCE_SLOT: u64 = 3;

fn contract() -> Address {
    "0x6B175474E89094C44Da98b954EedeAC495271d0F".parse().unwrap()
}

fn holder() -> Address {
    "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266".parse().unwrap()
}

fn slot() -> U256 {
    U256::from(BALANCE_SLOT)
}

fn path_of(key: &Bytes32) -> Vec<u8> {
    NibblePath::from_key(key).as_slice().to_vec()
}

fn storage_path(holder: &Address) -> Vec<u8> {
    path_of(&storage_trie_key(&derive_balance_slot_key(holder, &slot())))
}

/// A trie holding one entry: the root is a leaf with the full key path.
fn single_leaf(path: Vec<u8>, value: Vec<u8>) -> (Bytes32, Vec<u8>) {
    let raw = MptNode::Leaf { path, value }.encode();
    (keccak256(&raw), raw)
}

/// A trie holding two entries whose paths differ in the first nibble.
fn two_leaves(
    a: (Vec<u8>, Vec<u8>),
    b: (Vec<u8>, Vec<u8>),
) -> (Bytes32, Vec<u8>, Vec<u8>, Vec<u8>) {
    assert_ne!(a.0[0], b.0[0]);
    let leaf_a = MptNode::Leaf {
        path: a.0[1..].to_vec(),
        value: a.1,
    }
    .encode();
    let leaf_b = MptNode::Leaf {
        path: b.0[1..].to_vec(),
        value: b.1,
    }
    .encode();

    let mut children: [ChildRef; 16] = std::array::from_fn(|_| ChildRef::Empty);
    children[a.0[0] as usize] = ChildRef::Hash(keccak256(&leaf_a));
    children[b.0[0] as usize] = ChildRef::Hash(keccak256(&leaf_b));
    let branch = MptNode::Branch {
        children,
        value: Vec::new(),
    }
    .encode();
    (keccak256(&branch), branch, leaf_a, leaf_b)
}

struct Fixture {
    header: BlockHeader,
    account: Account,
    payload: ProofPayload,
}

/// State trie with only `contract()`, whose storage trie holds `balance` for `holder()`.
fn fixture(balance: U256) -> Fixture {
    let (storage_root, storage_leaf) =
        single_leaf(storage_path(&holder()), rlp::encode_u256(&balance));
    let account = Account {
        nonce: 1,
        balance: U256::zero(),
        storage_root,
        code_hash: keccak256(b"erc20 runtime"),
    };
    let (state_root, account_leaf) =
        single_leaf(path_of(&account_trie_key(&contract())), account.encode());

    let payload = ProofPayload {
        account_proof: vec![account_leaf],
        balance: Some(account.balance),
        nonce: Some(account.nonce),
        code_hash: Some(account.code_hash),
        storage_hash: Some(account.storage_root),
        storage_proof: vec![StorageProof {
            key: derive_balance_slot_key(&holder(), &slot()),
            value: Some(balance),
            proof: vec![storage_leaf],
        }],
    };
    Fixture {
        header: BlockHeader::new(21_000_000, [0x42; 32], state_root),
        account,
        payload,
    }
}

fn whale() -> U256 {
    U256::from(1_250_000u64) * U256::exp10(18)
}

#[test]
fn proven_balance_is_attested() {
    let f = fixture(whale());
    let claim = attest(&f.header, &contract(), &holder(), &slot(), &f.payload).unwrap();
    assert_eq!(claim.value, whale());
    assert_eq!(claim.holder, holder());
    assert_eq!(claim.contract, contract());
    assert_eq!(claim.slot_index, slot());
    assert_eq!(claim.block_number, 21_000_000);
    assert_eq!(claim.state_root, f.header.state_root);
    assert_eq!(claim.storage_key, derive_balance_slot_key(&holder(), &slot()));
}

#[test]
fn reported_fields_are_optional() {
    let mut f = fixture(whale());
    f.payload.balance = None;
    f.payload.nonce = None;
    f.payload.code_hash = None;
    f.payload.storage_hash = None;
    f.payload.storage_proof[0].value = None;
    let claim = attest(&f.header, &contract(), &holder(), &slot(), &f.payload).unwrap();
    assert_eq!(claim.value, whale());
}

#[test]
fn diverging_storage_leaf_attests_zero() {
    let f = fixture(whale());
    let stranger: Address = "0x70997970C51812dc3A010C7d01b50e0d17dc79C8".parse().unwrap();
    let mut payload = f.payload.clone();
    payload.storage_proof[0].key = derive_balance_slot_key(&stranger, &slot());
    payload.storage_proof[0].value = Some(U256::zero());

    let claim = attest(&f.header, &contract(), &stranger, &slot(), &payload).unwrap();
    assert_eq!(claim.value, U256::zero());
}

#[test]
fn empty_branch_slot_attests_zero() {
    let candidates: Vec<Address> = (1u8..=64).map(|i| Address([i; 20])).collect();
    let first = |a: &Address| storage_path(a)[0];

    let a = candidates[0];
    let b = *candidates.iter().find(|c| first(*c) != first(&a)).unwrap();
    let absent = *candidates
        .iter()
        .find(|c| first(*c) != first(&a) && first(*c) != first(&b))
        .unwrap();

    let (storage_root, branch, _, _) = two_leaves(
        (storage_path(&a), rlp::encode_u256(&U256::from(5u64))),
        (storage_path(&b), rlp::encode_u256(&U256::from(9u64))),
    );
    let account = Account {
        nonce: 0,
        balance: U256::zero(),
        storage_root,
        code_hash: KECCAK_EMPTY,
    };
    let (state_root, account_leaf) =
        single_leaf(path_of(&account_trie_key(&contract())), account.encode());
    let payload = ProofPayload {
        account_proof: vec![account_leaf],
        storage_proof: vec![StorageProof {
            key: derive_balance_slot_key(&absent, &slot()),
            value: None,
            proof: vec![branch],
        }],
        ..Default::default()
    };
    let header = BlockHeader::new(1, [0u8; 32], state_root);

    let claim = attest(&header, &contract(), &absent, &slot(), &payload).unwrap();
    assert_eq!(claim.value, U256::zero());
}

#[test]
fn sibling_leaf_is_proven_through_branch() {
    let a = Address([0x11; 20]);
    let b = (0u8..=255)
        .map(|i| Address([i; 20]))
        .find(|c| storage_path(c)[0] != storage_path(&a)[0])
        .unwrap();
    let (storage_root, branch, _, leaf_b) = two_leaves(
        (storage_path(&a), rlp::encode_u256(&U256::from(5u64))),
        (storage_path(&b), rlp::encode_u256(&U256::from(9u64))),
    );
    let account = Account {
        nonce: 0,
        balance: U256::zero(),
        storage_root,
        code_hash: KECCAK_EMPTY,
    };
    let (state_root, account_leaf) =
        single_leaf(path_of(&account_trie_key(&contract())), account.encode());
    let mut payload = ProofPayload {
        account_proof: vec![account_leaf],
        storage_proof: vec![StorageProof {
            key: derive_balance_slot_key(&b, &slot()),
            value: Some(U256::from(9u64)),
            proof: vec![branch, leaf_b],
        }],
        ..Default::default()
    };
    let header = BlockHeader::new(1, [0u8; 32], state_root);
    assert_eq!(
        attest(&header, &contract(), &b, &slot(), &payload).unwrap().value,
        U256::from(9u64)
    );

    let last = payload.storage_proof[0].proof[1].len() - 1;
    payload.storage_proof[0].proof[1][last] ^= 0x01;
    let err = attest(&header, &contract(), &b, &slot(), &payload).unwrap_err();
    assert_eq!(
        err,
        AttestError::StorageProof(ProofError::Invalid {
            depth: 1,
            fault: TrieFault::NodeReference
        })
    );
}

#[test]
fn tampered_storage_root_node_is_rejected() {
    let mut f = fixture(whale());
    let node = &mut f.payload.storage_proof[0].proof[0];
    let last = node.len() - 1;
    node[last] ^= 0xff;
    let err = attest(&f.header, &contract(), &holder(), &slot(), &f.payload).unwrap_err();
    assert!(matches!(
        err,
        AttestError::StorageProof(ProofError::RootMismatch { .. })
    ));
}

#[test]
fn wrong_state_root_is_rejected() {
    let mut f = fixture(whale());
    f.header.state_root = [0x99; 32];
    let err = attest(&f.header, &contract(), &holder(), &slot(), &f.payload).unwrap_err();
    assert!(matches!(
        err,
        AttestError::AccountProof(ProofError::RootMismatch { .. })
    ));
}

#[test]
fn unknown_contract_is_not_found() {
    let f = fixture(whale());
    let other: Address = "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48".parse().unwrap();
    let err = attest(&f.header, &other, &holder(), &slot(), &f.payload).unwrap_err();
    assert_eq!(err, AttestError::AccountNotFound(other));
}

#[test]
fn wrong_slot_index_has_no_matching_entry() {
    let f = fixture(whale());
    let wrong = U256::from(BALANCE_SLOT + 1);
    let err = attest(&f.header, &contract(), &holder(), &wrong, &f.payload).unwrap_err();
    assert_eq!(
        err,
        AttestError::MissingStorageProof {
            key: derive_balance_slot_key(&holder(), &wrong)
        }
    );
}

#[test]
fn misreported_fields_are_rejected() {
    let f = fixture(whale());

    let mut payload = f.payload.clone();
    payload.storage_proof[0].value = Some(whale() + U256::one());
    assert_eq!(
        attest(&f.header, &contract(), &holder(), &slot(), &payload).unwrap_err(),
        AttestError::PayloadMismatch {
            field: "storageProof.value"
        }
    );

    let mut payload = f.payload.clone();
    payload.storage_hash = Some([0u8; 32]);
    assert_eq!(
        attest(&f.header, &contract(), &holder(), &slot(), &payload).unwrap_err(),
        AttestError::PayloadMismatch {
            field: "storageHash"
        }
    );

    let mut payload = f.payload.clone();
    payload.nonce = Some(f.account.nonce + 1);
    assert_eq!(
        attest(&f.header, &contract(), &holder(), &slot(), &payload).unwrap_err(),
        AttestError::PayloadMismatch { field: "nonce" }
    );
}

#[test]
fn non_account_leaf_is_malformed_state() {
    let (state_root, leaf) = single_leaf(
        path_of(&account_trie_key(&contract())),
        rlp::encode_list(&[rlp::encode_u64(1), rlp::encode_u64(2)]),
    );
    let header = BlockHeader::new(1, [0u8; 32], state_root);
    let payload = ProofPayload {
        account_proof: vec![leaf],
        ..Default::default()
    };
    let err = attest(&header, &contract(), &holder(), &slot(), &payload).unwrap_err();
    assert!(matches!(err, AttestError::AccountState(_)));
}
