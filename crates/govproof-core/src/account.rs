use crate::{
    rlp::{self, Item, MalformedRlp},
    types::{Bytes32, U256},
};

/// `keccak256("")`, the code hash of an account without code.
pub const KECCAK_EMPTY: Bytes32 = [
    0xc5, 0xd2, 0x46, 0x01, 0x86, 0xf7, 0x23, 0x3c, 0x92, 0x7e, 0x7d, 0xb2, 0xdc, 0xc7, 0x03,
    0xc0, 0xe5, 0x00, 0xb6, 0x53, 0xca, 0x82, 0x27, 0x3b, 0x7b, 0xfa, 0xd8, 0x04, 0x5d, 0x85,
    0xa4, 0x70,
];

/// The account tuple stored as a leaf value in the state trie.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Account {
    pub nonce: u64,
    pub balance: U256,
    pub storage_root: Bytes32,
    pub code_hash: Bytes32,
}

impl Account {
    /// Decode `[nonce, balance, storageRoot, codeHash]`.
    pub fn decode(rlp_value: &[u8]) -> Result<Self, MalformedRlp> {
        let fields = rlp::decode_list(rlp_value)?;
        if fields.len() != 4 {
            return Err(MalformedRlp::ListLength {
                expected: 4,
                actual: fields.len(),
            });
        }

        Ok(Self {
            nonce: rlp::decode_u64(fields[0].as_bytes()?)?,
            balance: rlp::decode_u256(fields[1].as_bytes()?)?,
            storage_root: fields[2].as_fixed::<32>()?,
            code_hash: fields[3].as_fixed::<32>()?,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        rlp::encode_list(&[
            rlp::encode_u64(self.nonce),
            rlp::encode_u256(&self.balance),
            rlp::encode(&Item::Bytes(self.storage_root.to_vec())),
            rlp::encode(&Item::Bytes(self.code_hash.to_vec())),
        ])
    }
}
