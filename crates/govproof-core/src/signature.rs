//! EIP-191 personal-message digests and secp256k1 signer recovery.

use core::{fmt, str::FromStr};

use k256::{
    ecdsa::{RecoveryId, Signature as EcdsaSignature, SigningKey, VerifyingKey},
    elliptic_curve::sec1::ToEncodedPoint,
};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::{
    keccak::{keccak256, keccak256_concat},
    types::{decode_hex, Address, Bytes32, ParseError},
};

const PERSONAL_MESSAGE_PREFIX: &[u8] = b"\x19Ethereum Signed Message:\n";

/// secp256k1 group order divided by two. Canonical signatures have `s <= HALF_ORDER`.
const HALF_ORDER: Bytes32 = [
    0x7f, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0x5d, 0x57, 0x6e, 0x73, 0x57, 0xa4, 0x50, 0x1d, 0xdf, 0xe9, 0x2f, 0x46, 0x68, 0x1b,
    0x20, 0xa0,
];

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum SigError {
    #[error("signature s value is in the upper half of the curve order")]
    NonCanonical,
    #[error("recovery id v={0} is not 27 or 28")]
    InvalidRecoveryId(u8),
    #[error("public key recovery failed")]
    RecoveryFailed,
    #[error("private key is not a valid secp256k1 scalar")]
    InvalidPrivateKey,
    #[error("signing failed")]
    SigningFailed,
}

/// A 65-byte `r || s || v` personal-message signature.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature {
    pub r: Bytes32,
    pub s: Bytes32,
    pub v: u8,
}

impl Signature {
    pub fn from_bytes(bytes: &[u8; 65]) -> Self {
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..64]);
        Self { r, s, v: bytes[64] }
    }

    pub fn to_bytes(&self) -> [u8; 65] {
        let mut out = [0u8; 65];
        out[..32].copy_from_slice(&self.r);
        out[32..64].copy_from_slice(&self.s);
        out[64] = self.v;
        out
    }

    pub fn is_low_s(&self) -> bool {
        self.s <= HALF_ORDER
    }
}

/// Parses `0x`-prefixed 65-byte hex. Wallets that emit `v` as `0`/`1` are
/// normalised to `27`/`28` here; recovery itself accepts only `27`/`28`.
impl FromStr for Signature {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = decode_hex(s)?;
        let bytes: [u8; 65] = bytes.as_slice().try_into().map_err(|_| ParseError::Length {
            expected: 65,
            actual: bytes.len(),
        })?;
        let mut sig = Self::from_bytes(&bytes);
        if sig.v < 2 {
            sig.v += 27;
        }
        Ok(sig)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.to_bytes()))
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({self})")
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// `keccak256("\x19Ethereum Signed Message:\n" ++ len ++ message)`, with the
/// length written as ASCII decimal.
pub fn personal_message_digest(message: &[u8]) -> Bytes32 {
    let len = message.len().to_string();
    keccak256_concat(&[PERSONAL_MESSAGE_PREFIX, len.as_bytes(), message])
}

/// Recover the address that signed `message` under personal-message framing.
pub fn recover_signer(message: &[u8], signature: &Signature) -> Result<Address, SigError> {
    recover_prehash(&personal_message_digest(message), signature)
}

/// Recover the signer of an already-framed digest using exactly the parity
/// given by `v`.
pub fn recover_prehash(digest: &Bytes32, signature: &Signature) -> Result<Address, SigError> {
    let recovery_byte = match signature.v {
        27 | 28 => signature.v - 27,
        other => return Err(SigError::InvalidRecoveryId(other)),
    };
    if !signature.is_low_s() {
        return Err(SigError::NonCanonical);
    }

    let recovery_id =
        RecoveryId::from_byte(recovery_byte).ok_or(SigError::InvalidRecoveryId(signature.v))?;
    let mut rs = [0u8; 64];
    rs[..32].copy_from_slice(&signature.r);
    rs[32..].copy_from_slice(&signature.s);
    let ecdsa = EcdsaSignature::from_slice(&rs).map_err(|_| SigError::RecoveryFailed)?;

    let key = VerifyingKey::recover_from_prehash(digest, &ecdsa, recovery_id)
        .map_err(|_| SigError::RecoveryFailed)?;
    Ok(address_from_verifying_key(&key))
}

/// Sign `message` with personal-message framing. Always yields low-s with `v` in `{27, 28}`.
pub fn sign_personal_message(private_key: &Bytes32, message: &[u8]) -> Result<Signature, SigError> {
    let key = SigningKey::from_slice(private_key).map_err(|_| SigError::InvalidPrivateKey)?;
    let digest = personal_message_digest(message);
    let (mut ecdsa, mut recovery_id) = key
        .sign_prehash_recoverable(&digest)
        .map_err(|_| SigError::SigningFailed)?;
    if let Some(normalized) = ecdsa.normalize_s() {
        ecdsa = normalized;
        recovery_id = RecoveryId::new(!recovery_id.is_y_odd(), recovery_id.is_x_reduced());
    }

    let bytes = ecdsa.to_bytes();
    let mut r = [0u8; 32];
    let mut s = [0u8; 32];
    r.copy_from_slice(&bytes[..32]);
    s.copy_from_slice(&bytes[32..]);
    Ok(Signature {
        r,
        s,
        v: 27 + recovery_id.to_byte(),
    })
}

pub fn address_from_private_key(private_key: &Bytes32) -> Result<Address, SigError> {
    let key = SigningKey::from_slice(private_key).map_err(|_| SigError::InvalidPrivateKey)?;
    Ok(address_from_verifying_key(key.verifying_key()))
}

/// Last 20 bytes of the keccak of the uncompressed public key (sans `0x04` tag).
fn address_from_verifying_key(key: &VerifyingKey) -> Address {
    let affine: &k256::AffinePoint = key.as_ref();
    let encoded = affine.to_encoded_point(false);
    let hash = keccak256(&encoded.as_bytes()[1..]);
    let mut out = [0u8; 20];
    out.copy_from_slice(&hash[12..]);
    Address(out)
}
