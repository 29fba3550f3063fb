use crate::{
    keccak::keccak256,
    rlp::{self, MalformedRlp},
    types::Bytes32,
};

const STATE_ROOT_FIELD: usize = 3;
const NUMBER_FIELD: usize = 8;
const MIN_HEADER_FIELDS: usize = 15;

/// The slice of a block header the engine verifies against.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    pub number: u64,
    pub hash: Bytes32,
    pub state_root: Bytes32,
}

impl BlockHeader {
    pub fn new(number: u64, hash: Bytes32, state_root: Bytes32) -> Self {
        Self {
            number,
            hash,
            state_root,
        }
    }

    /// Decode a full RLP-encoded header. The hash is recomputed from the
    /// bytes, so a header obtained this way is bound to its block hash.
    pub fn from_rlp(raw: &[u8]) -> Result<Self, MalformedRlp> {
        let fields = rlp::decode_list(raw)?;
        if fields.len() < MIN_HEADER_FIELDS {
            return Err(MalformedRlp::ListLength {
                expected: MIN_HEADER_FIELDS,
                actual: fields.len(),
            });
        }

        Ok(Self {
            number: rlp::decode_u64(fields[NUMBER_FIELD].as_bytes()?)?,
            hash: keccak256(raw),
            state_root: fields[STATE_ROOT_FIELD].as_fixed::<32>()?,
        })
    }
}
