//! Canonical Recursive Length Prefix codec.
//!
//! The decoder is strict: every accepted input is the unique canonical
//! encoding of its item, so `encode(decode(x)?) == x` always holds.

use thiserror::Error;

use crate::types::{u256_to_be_bytes, U256};

/// Maximum list nesting accepted by [`decode`].
pub const MAX_NESTING: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum MalformedRlp {
    #[error("input ended before the item was complete")]
    Truncated,
    #[error("trailing bytes after the top-level item")]
    TrailingBytes,
    #[error("single byte below 0x80 must encode as itself")]
    NonCanonicalByte,
    #[error("length prefix is not minimal")]
    NonCanonicalLength,
    #[error("length does not fit in usize")]
    LengthOverflow,
    #[error("list nesting exceeds {} levels", MAX_NESTING)]
    TooDeep,
    #[error("expected a byte string, found a list")]
    ExpectedBytes,
    #[error("expected a list, found a byte string")]
    ExpectedList,
    #[error("expected {expected} list elements, got {actual}")]
    ListLength { expected: usize, actual: usize },
    #[error("expected a {expected}-byte string, got {actual} bytes")]
    FixedLength { expected: usize, actual: usize },
    #[error("integer has leading zero bytes")]
    LeadingZero,
    #[error("integer does not fit in {0} bytes")]
    IntegerOverflow(usize),
}

/// A decoded RLP item.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Item {
    Bytes(Vec<u8>),
    List(Vec<Item>),
}

impl Item {
    pub fn as_bytes(&self) -> Result<&[u8], MalformedRlp> {
        match self {
            Item::Bytes(b) => Ok(b),
            Item::List(_) => Err(MalformedRlp::ExpectedBytes),
        }
    }

    pub fn as_list(&self) -> Result<&[Item], MalformedRlp> {
        match self {
            Item::List(items) => Ok(items),
            Item::Bytes(_) => Err(MalformedRlp::ExpectedList),
        }
    }

    pub fn as_fixed<const N: usize>(&self) -> Result<[u8; N], MalformedRlp> {
        let bytes = self.as_bytes()?;
        if bytes.len() != N {
            return Err(MalformedRlp::FixedLength {
                expected: N,
                actual: bytes.len(),
            });
        }
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    pub fn is_empty_bytes(&self) -> bool {
        matches!(self, Item::Bytes(b) if b.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

pub fn encode(item: &Item) -> Vec<u8> {
    let mut out = Vec::new();
    encode_into(item, &mut out);
    out
}

fn encode_into(item: &Item, out: &mut Vec<u8>) {
    match item {
        Item::Bytes(data) => out.extend_from_slice(&encode_bytes(data)),
        Item::List(items) => {
            let mut payload = Vec::new();
            for it in items {
                encode_into(it, &mut payload);
            }
            write_header(0xc0, payload.len(), out);
            out.extend_from_slice(&payload);
        }
    }
}

/// RLP-encode a byte string.
pub fn encode_bytes(data: &[u8]) -> Vec<u8> {
    if data.len() == 1 && data[0] <= 0x7f {
        return vec![data[0]];
    }
    let mut out = Vec::with_capacity(9 + data.len());
    write_header(0x80, data.len(), &mut out);
    out.extend_from_slice(data);
    out
}

/// RLP-encode a list of already-encoded items.
pub fn encode_list(items: &[Vec<u8>]) -> Vec<u8> {
    let payload_len: usize = items.iter().map(|it| it.len()).sum();
    let mut out = Vec::with_capacity(9 + payload_len);
    write_header(0xc0, payload_len, &mut out);
    for it in items {
        out.extend_from_slice(it);
    }
    out
}

pub fn encode_u64(value: u64) -> Vec<u8> {
    encode_bytes(trim_leading_zeros(&value.to_be_bytes()))
}

pub fn encode_u256(value: &U256) -> Vec<u8> {
    encode_bytes(trim_leading_zeros(&u256_to_be_bytes(value)))
}

pub fn trim_leading_zeros(bytes: &[u8]) -> &[u8] {
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[first..]
}

fn write_header(offset: u8, len: usize, out: &mut Vec<u8>) {
    if len <= 55 {
        out.push(offset + len as u8);
        return;
    }
    let len_bytes = usize_to_min_be_bytes(len);
    out.push(offset + 55 + len_bytes.len() as u8);
    out.extend_from_slice(&len_bytes);
}

fn usize_to_min_be_bytes(value: usize) -> Vec<u8> {
    trim_leading_zeros(&value.to_be_bytes()).to_vec()
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
struct Header {
    is_list: bool,
    payload_offset: usize,
    payload_len: usize,
}

impl Header {
    fn end(&self) -> usize {
        self.payload_offset + self.payload_len
    }
}

/// Decode exactly one canonical item spanning all of `input`.
pub fn decode(input: &[u8]) -> Result<Item, MalformedRlp> {
    let (item, end) = decode_at(input, 0, 0)?;
    if end != input.len() {
        return Err(MalformedRlp::TrailingBytes);
    }
    Ok(item)
}

/// Decode `input` as a list and return its elements.
pub fn decode_list(input: &[u8]) -> Result<Vec<Item>, MalformedRlp> {
    match decode(input)? {
        Item::List(items) => Ok(items),
        Item::Bytes(_) => Err(MalformedRlp::ExpectedList),
    }
}

/// Decode `input` as a byte string and return its payload.
pub fn decode_bytes(input: &[u8]) -> Result<Vec<u8>, MalformedRlp> {
    match decode(input)? {
        Item::Bytes(bytes) => Ok(bytes),
        Item::List(_) => Err(MalformedRlp::ExpectedBytes),
    }
}

fn decode_at(input: &[u8], offset: usize, depth: usize) -> Result<(Item, usize), MalformedRlp> {
    if depth > MAX_NESTING {
        return Err(MalformedRlp::TooDeep);
    }

    let header = decode_header(input, offset)?;
    let end = header.end();
    if !header.is_list {
        return Ok((Item::Bytes(input[header.payload_offset..end].to_vec()), end));
    }

    // Children may not read past the list payload.
    let payload = &input[..end];
    let mut items = Vec::new();
    let mut cursor = header.payload_offset;
    while cursor < end {
        let (item, next) = decode_at(payload, cursor, depth + 1)?;
        items.push(item);
        cursor = next;
    }
    Ok((Item::List(items), end))
}

fn decode_header(input: &[u8], offset: usize) -> Result<Header, MalformedRlp> {
    let prefix = *input.get(offset).ok_or(MalformedRlp::Truncated)?;

    let header = match prefix {
        0x00..=0x7f => Header {
            is_list: false,
            payload_offset: offset,
            payload_len: 1,
        },
        0x80..=0xb7 => {
            let len = (prefix - 0x80) as usize;
            let header = short_header(false, offset, len);
            check_bounds(input, &header)?;
            if len == 1 && input[header.payload_offset] < 0x80 {
                return Err(MalformedRlp::NonCanonicalByte);
            }
            header
        }
        0xb8..=0xbf => long_header(input, false, offset, (prefix - 0xb7) as usize)?,
        0xc0..=0xf7 => short_header(true, offset, (prefix - 0xc0) as usize),
        0xf8..=0xff => long_header(input, true, offset, (prefix - 0xf7) as usize)?,
    };

    check_bounds(input, &header)?;
    Ok(header)
}

fn short_header(is_list: bool, offset: usize, len: usize) -> Header {
    Header {
        is_list,
        payload_offset: offset + 1,
        payload_len: len,
    }
}

fn long_header(
    input: &[u8],
    is_list: bool,
    offset: usize,
    len_of_len: usize,
) -> Result<Header, MalformedRlp> {
    let len_offset = offset + 1;
    let len_end = len_offset
        .checked_add(len_of_len)
        .ok_or(MalformedRlp::LengthOverflow)?;
    if len_end > input.len() {
        return Err(MalformedRlp::Truncated);
    }
    let len_bytes = &input[len_offset..len_end];
    if len_bytes[0] == 0 {
        return Err(MalformedRlp::NonCanonicalLength);
    }
    let len = read_be_usize(len_bytes)?;
    if len <= 55 {
        return Err(MalformedRlp::NonCanonicalLength);
    }
    Ok(Header {
        is_list,
        payload_offset: len_end,
        payload_len: len,
    })
}

fn check_bounds(input: &[u8], header: &Header) -> Result<(), MalformedRlp> {
    let end = header
        .payload_offset
        .checked_add(header.payload_len)
        .ok_or(MalformedRlp::LengthOverflow)?;
    if end > input.len() {
        return Err(MalformedRlp::Truncated);
    }
    Ok(())
}

fn read_be_usize(input: &[u8]) -> Result<usize, MalformedRlp> {
    if input.is_empty() || input.len() > core::mem::size_of::<usize>() {
        return Err(MalformedRlp::LengthOverflow);
    }
    let mut out = 0usize;
    for b in input {
        out = out
            .checked_mul(256)
            .and_then(|v| v.checked_add(*b as usize))
            .ok_or(MalformedRlp::LengthOverflow)?;
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Scalars
// ---------------------------------------------------------------------------

/// Decode a minimal big-endian integer payload (already stripped of its RLP header).
pub fn decode_u64(payload: &[u8]) -> Result<u64, MalformedRlp> {
    check_integer(payload, 8)?;
    Ok(payload.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64))
}

/// Decode a minimal big-endian 256-bit integer payload.
pub fn decode_u256(payload: &[u8]) -> Result<U256, MalformedRlp> {
    check_integer(payload, 32)?;
    Ok(U256::from_big_endian(payload))
}

fn check_integer(payload: &[u8], max_len: usize) -> Result<(), MalformedRlp> {
    if payload.len() > max_len {
        return Err(MalformedRlp::IntegerOverflow(max_len));
    }
    if payload.first() == Some(&0) {
        return Err(MalformedRlp::LeadingZero);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(b: &[u8]) -> Item {
        Item::Bytes(b.to_vec())
    }

    #[test]
    fn encode_empty_string_and_list() {
        assert_eq!(encode(&bytes(&[])), vec![0x80]);
        assert_eq!(encode(&Item::List(vec![])), vec![0xc0]);
    }

    #[test]
    fn encode_single_byte() {
        assert_eq!(encode_bytes(&[0x42]), vec![0x42]);
        assert_eq!(encode_bytes(&[0x80]), vec![0x81, 0x80]);
        assert_eq!(encode_bytes(&[0x00]), vec![0x00]);
    }

    #[test]
    fn encode_short_string() {
        assert_eq!(encode_bytes(b"dog"), vec![0x83, b'd', b'o', b'g']);
    }

    #[test]
    fn encode_long_string_uses_long_form() {
        let data = vec![0xaa; 56];
        let encoded = encode_bytes(&data);
        assert_eq!(&encoded[..2], &[0xb8, 56]);
        assert_eq!(&encoded[2..], &data[..]);
    }

    #[test]
    fn encode_nested_lists() {
        // [ [], [[]], [ [], [[]] ] ]
        let empty = Item::List(vec![]);
        let one = Item::List(vec![empty.clone()]);
        let item = Item::List(vec![
            empty.clone(),
            one.clone(),
            Item::List(vec![empty, one]),
        ]);
        assert_eq!(
            encode(&item),
            vec![0xc7, 0xc0, 0xc1, 0xc0, 0xc3, 0xc0, 0xc1, 0xc0]
        );
    }

    #[test]
    fn encode_list_of_strings() {
        let item = Item::List(vec![bytes(b"cat"), bytes(b"dog")]);
        let encoded = encode(&item);
        assert_eq!(
            encoded,
            vec![0xc8, 0x83, b'c', b'a', b't', 0x83, b'd', b'o', b'g']
        );
        assert_eq!(
            encode_list(&[encode_bytes(b"cat"), encode_bytes(b"dog")]),
            encoded
        );
    }

    #[test]
    fn encode_integers() {
        assert_eq!(encode_u64(0), vec![0x80]);
        assert_eq!(encode_u64(15), vec![0x0f]);
        assert_eq!(encode_u64(1024), vec![0x82, 0x04, 0x00]);
        assert_eq!(encode_u256(&U256::zero()), vec![0x80]);
    }

    #[test]
    fn byte_strings_roundtrip_across_header_boundaries() {
        for len in [0usize, 1, 2, 55, 56, 57, 255, 256, 1024] {
            let data: Vec<u8> = (0..len).map(|i| (i * 7 + 0x81) as u8).collect();
            assert_eq!(decode(&encode_bytes(&data)).unwrap(), Item::Bytes(data));
        }
        for b in 0u8..=255 {
            assert_eq!(decode(&encode_bytes(&[b])).unwrap(), bytes(&[b]));
        }
    }

    #[test]
    fn decode_nested_list() {
        let raw = [0xc7, 0xc0, 0xc1, 0xc0, 0xc3, 0xc0, 0xc1, 0xc0];
        let item = decode(&raw).unwrap();
        assert_eq!(encode(&item), raw.to_vec());
    }

    #[test]
    fn rejects_non_canonical_single_byte() {
        assert_eq!(decode(&[0x81, 0x05]), Err(MalformedRlp::NonCanonicalByte));
    }

    #[test]
    fn rejects_long_form_for_short_payload() {
        let mut raw = vec![0xb8, 0x05];
        raw.extend_from_slice(b"hello");
        assert_eq!(decode(&raw), Err(MalformedRlp::NonCanonicalLength));

        let raw = vec![0xf8, 0x01, 0x80];
        assert_eq!(decode(&raw), Err(MalformedRlp::NonCanonicalLength));
    }

    #[test]
    fn rejects_length_with_leading_zero() {
        let mut raw = vec![0xb9, 0x00, 0x38];
        raw.extend_from_slice(&[0u8; 56]);
        assert_eq!(decode(&raw), Err(MalformedRlp::NonCanonicalLength));
    }

    #[test]
    fn rejects_trailing_bytes() {
        assert_eq!(
            decode(&[0x83, b'd', b'o', b'g', 0x00]),
            Err(MalformedRlp::TrailingBytes)
        );
    }

    #[test]
    fn rejects_truncated_input() {
        assert_eq!(decode(&[0x83, b'd', b'o']), Err(MalformedRlp::Truncated));
        assert_eq!(decode(&[0xb8]), Err(MalformedRlp::Truncated));
        assert_eq!(decode(&[]), Err(MalformedRlp::Truncated));
    }

    #[test]
    fn rejects_child_overrunning_list_payload() {
        // List claims 2 payload bytes but its child claims 3.
        assert_eq!(
            decode(&[0xc2, 0x83, b'a', b'b', b'c']),
            Err(MalformedRlp::Truncated)
        );
    }

    #[test]
    fn rejects_excessive_nesting() {
        let mut raw = vec![0xc0];
        for _ in 0..=MAX_NESTING {
            raw = encode_list(&[raw]);
        }
        assert_eq!(decode(&raw), Err(MalformedRlp::TooDeep));
    }

    #[test]
    fn integers_reject_leading_zeros() {
        assert_eq!(decode_u64(&[]).unwrap(), 0);
        assert_eq!(decode_u64(&[0x04, 0x00]).unwrap(), 1024);
        assert_eq!(decode_u64(&[0x00, 0x01]), Err(MalformedRlp::LeadingZero));
        assert_eq!(decode_u64(&[1; 9]), Err(MalformedRlp::IntegerOverflow(8)));
        assert_eq!(decode_u256(&[0x00]), Err(MalformedRlp::LeadingZero));
        assert_eq!(
            decode_u256(&[0x01, 0x00]).unwrap(),
            U256::from(256u64)
        );
    }
}
