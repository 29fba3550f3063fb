//! Binds a signed SIWE challenge to a signer address, a validity window and
//! a single-use nonce.

use std::{
    collections::{hash_map, BTreeSet, HashMap},
    sync::{Arc, Mutex, PoisonError},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    signature::{recover_signer, SigError, Signature},
    siwe::{SiweChallenge, Timestamp},
    types::Address,
};

#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("nonce store failure: {0}")]
pub struct NonceStoreError(pub String);

/// Replay bookkeeping for `(address, nonce)` pairs.
///
/// `consume` must check and mark in one atomic step: two concurrent calls
/// for the same pair may not both return `Ok(true)`.
pub trait NonceStore: Send + Sync {
    /// Mark the pair consumed until `expires_at`. `Ok(false)` means it is
    /// still marked from an earlier call.
    ///
    /// Entries that expired at or before `now` may be forgotten: a challenge
    /// past its expiration time is rejected before its nonce is looked at.
    fn consume(
        &self,
        address: &Address,
        nonce: &str,
        expires_at: Timestamp,
        now: Timestamp,
    ) -> Result<bool, NonceStoreError>;
}

impl<T: NonceStore + ?Sized> NonceStore for Arc<T> {
    fn consume(
        &self,
        address: &Address,
        nonce: &str,
        expires_at: Timestamp,
        now: Timestamp,
    ) -> Result<bool, NonceStoreError> {
        (**self).consume(address, nonce, expires_at, now)
    }
}

impl<T: NonceStore + ?Sized> NonceStore for Box<T> {
    fn consume(
        &self,
        address: &Address,
        nonce: &str,
        expires_at: Timestamp,
        now: Timestamp,
    ) -> Result<bool, NonceStoreError> {
        (**self).consume(address, nonce, expires_at, now)
    }
}

/// Consumed pairs with their expiry, indexed by expiry so pruning only
/// touches the entries it removes.
#[derive(Clone, Debug, Default)]
pub struct NonceLedger {
    entries: HashMap<(Address, String), Timestamp>,
    by_expiry: BTreeSet<(Timestamp, Address, String)>,
}

impl NonceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, address: &Address, nonce: &str) -> bool {
        self.entries.contains_key(&(*address, nonce.to_string()))
    }

    /// Forget every entry that expired at or before `now`. Returns how many
    /// were dropped.
    pub fn prune(&mut self, now: Timestamp) -> usize {
        let mut dropped = 0;
        while let Some((expires_at, _, _)) = self.by_expiry.first() {
            if *expires_at > now {
                break;
            }
            if let Some((_, address, nonce)) = self.by_expiry.pop_first() {
                self.entries.remove(&(address, nonce));
                dropped += 1;
            }
        }
        dropped
    }

    /// Record the pair; `false` when it is already recorded.
    pub fn insert(&mut self, address: Address, nonce: String, expires_at: Timestamp) -> bool {
        match self.entries.entry((address, nonce)) {
            hash_map::Entry::Occupied(_) => false,
            hash_map::Entry::Vacant(slot) => {
                self.by_expiry
                    .insert((expires_at, address, slot.key().1.clone()));
                slot.insert(expires_at);
                true
            }
        }
    }

    /// Undo an [`insert`](Self::insert).
    pub fn remove(&mut self, address: &Address, nonce: &str) -> bool {
        match self.entries.remove(&(*address, nonce.to_string())) {
            Some(expires_at) => {
                self.by_expiry
                    .remove(&(expires_at, *address, nonce.to_string()));
                true
            }
            None => false,
        }
    }

    /// Prune at `now`, then record the pair.
    pub fn consume(
        &mut self,
        address: &Address,
        nonce: &str,
        expires_at: Timestamp,
        now: Timestamp,
    ) -> bool {
        self.prune(now);
        self.insert(*address, nonce.to_string(), expires_at)
    }

    /// Live entries, soonest expiry first.
    pub fn iter(&self) -> impl Iterator<Item = (&Address, &str, Timestamp)> {
        self.by_expiry
            .iter()
            .map(|(expires_at, address, nonce)| (address, nonce.as_str(), *expires_at))
    }
}

/// Process-local nonce store.
#[derive(Debug, Default)]
pub struct MemoryNonceStore {
    ledger: Mutex<NonceLedger>,
}

impl MemoryNonceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl NonceStore for MemoryNonceStore {
    fn consume(
        &self,
        address: &Address,
        nonce: &str,
        expires_at: Timestamp,
        now: Timestamp,
    ) -> Result<bool, NonceStoreError> {
        let mut ledger = self.ledger.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(ledger.consume(address, nonce, expires_at, now))
    }
}

/// Deployment expectations a challenge must meet besides its own fields.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthPolicy {
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub chain_id: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("challenge is malformed: {0}")]
    MalformedChallenge(String),
    #[error("challenge domain {actual:?} does not match expected {expected:?}")]
    DomainMismatch { expected: String, actual: String },
    #[error("challenge chain id {actual} does not match expected {expected}")]
    ChainIdMismatch { expected: u64, actual: u64 },
    #[error("challenge expired at {expired_at}")]
    Expired { expired_at: Timestamp },
    #[error("challenge is not valid before {not_before}")]
    NotYetValid { not_before: Timestamp },
    #[error(transparent)]
    Signature(#[from] SigError),
    #[error("signature was made by {recovered}, not {expected}")]
    SignerMismatch { expected: Address, recovered: Address },
    #[error("nonce {nonce:?} was already used by {address}")]
    NonceReplay { address: Address, nonce: String },
    #[error(transparent)]
    Store(#[from] NonceStoreError),
}

/// Verifies sign-in signatures against an injected [`NonceStore`].
#[derive(Debug)]
pub struct SessionAuthEngine<S> {
    store: S,
    policy: AuthPolicy,
}

impl<S: NonceStore> SessionAuthEngine<S> {
    pub fn new(store: S) -> Self {
        Self::with_policy(store, AuthPolicy::default())
    }

    pub fn with_policy(store: S, policy: AuthPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &AuthPolicy {
        &self.policy
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Authorize `challenge` signed by `signature` at time `now`.
    ///
    /// Checks run cheapest first and the nonce is consumed last, so a
    /// rejected attempt never uses up the nonce.
    pub fn authorize(
        &self,
        challenge: &SiweChallenge,
        signature: &Signature,
        now: Timestamp,
    ) -> Result<Address, AuthError> {
        challenge
            .validate()
            .map_err(|e| AuthError::MalformedChallenge(e.to_string()))?;
        let claimed = challenge
            .signer_address()
            .map_err(|e| AuthError::MalformedChallenge(e.to_string()))?;
        self.check_policy(challenge)?;

        let expired_at = challenge
            .expiration()
            .map_err(|e| AuthError::MalformedChallenge(e.to_string()))?;
        if now >= expired_at {
            return Err(AuthError::Expired { expired_at });
        }
        let not_before = challenge
            .not_before_time()
            .map_err(|e| AuthError::MalformedChallenge(e.to_string()))?;
        if let Some(not_before) = not_before.filter(|nb| now < *nb) {
            return Err(AuthError::NotYetValid { not_before });
        }

        let recovered = recover_signer(challenge.to_message().as_bytes(), signature)?;
        if recovered != claimed {
            return Err(AuthError::SignerMismatch {
                expected: claimed,
                recovered,
            });
        }

        if !self
            .store
            .consume(&claimed, &challenge.nonce, expired_at, now)?
        {
            return Err(AuthError::NonceReplay {
                address: claimed,
                nonce: challenge.nonce.clone(),
            });
        }
        Ok(recovered)
    }

    fn check_policy(&self, challenge: &SiweChallenge) -> Result<(), AuthError> {
        if let Some(expected) = &self.policy.domain {
            if *expected != challenge.domain {
                return Err(AuthError::DomainMismatch {
                    expected: expected.clone(),
                    actual: challenge.domain.clone(),
                });
            }
        }
        if let Some(expected) = self.policy.chain_id {
            if expected != challenge.chain_id {
                return Err(AuthError::ChainIdMismatch {
                    expected,
                    actual: challenge.chain_id,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{signature::sign_personal_message, types::decode_bytes32};

    const KEY_0: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const KEY_1: &str = "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";

    fn challenge() -> SiweChallenge {
        SiweChallenge {
            domain: "gov.example.org".into(),
            address: "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266".into(),
            statement: "Sign in to vote.".into(),
            uri: "https://gov.example.org".into(),
            version: "1".into(),
            chain_id: 1,
            nonce: "Q8mX2pLr9tVb4zKc".into(),
            issued_at: "2026-10-19T12:00:00Z".into(),
            expiration_time: "2026-10-19T12:10:00Z".into(),
            not_before: None,
            request_id: None,
            resources: Vec::new(),
        }
    }

    fn sign(key: &str, challenge: &SiweChallenge) -> Signature {
        sign_personal_message(&decode_bytes32(key).unwrap(), challenge.to_message().as_bytes())
            .unwrap()
    }

    fn during() -> Timestamp {
        Timestamp::parse_rfc3339("2026-10-19T12:05:00Z").unwrap()
    }

    #[test]
    fn valid_signature_authorizes_once() {
        let engine = SessionAuthEngine::new(MemoryNonceStore::new());
        let c = challenge();
        let sig = sign(KEY_0, &c);

        let signer = engine.authorize(&c, &sig, during()).unwrap();
        assert_eq!(signer, c.signer_address().unwrap());

        let err = engine.authorize(&c, &sig, during()).unwrap_err();
        assert!(matches!(err, AuthError::NonceReplay { .. }));
    }

    #[test]
    fn expired_challenge_is_rejected() {
        let engine = SessionAuthEngine::new(MemoryNonceStore::new());
        let c = challenge();
        let sig = sign(KEY_0, &c);
        let late = Timestamp::parse_rfc3339("2026-10-19T12:10:01Z").unwrap();
        assert!(matches!(
            engine.authorize(&c, &sig, late),
            Err(AuthError::Expired { .. })
        ));
        let boundary = c.expiration().unwrap();
        assert!(matches!(
            engine.authorize(&c, &sig, boundary),
            Err(AuthError::Expired { .. })
        ));
        assert!(engine.store().is_empty());
    }

    #[test]
    fn not_before_is_enforced() {
        let engine = SessionAuthEngine::new(MemoryNonceStore::new());
        let mut c = challenge();
        c.not_before = Some("2026-10-19T12:06:00Z".into());
        let sig = sign(KEY_0, &c);
        assert!(matches!(
            engine.authorize(&c, &sig, during()),
            Err(AuthError::NotYetValid { .. })
        ));
        let later = Timestamp::parse_rfc3339("2026-10-19T12:07:00Z").unwrap();
        engine.authorize(&c, &sig, later).unwrap();
    }

    #[test]
    fn other_signer_is_rejected_without_burning_nonce() {
        let engine = SessionAuthEngine::new(MemoryNonceStore::new());
        let c = challenge();
        let forged = sign(KEY_1, &c);
        assert!(matches!(
            engine.authorize(&c, &forged, during()),
            Err(AuthError::SignerMismatch { .. })
        ));
        engine.authorize(&c, &sign(KEY_0, &c), during()).unwrap();
    }

    #[test]
    fn tampered_field_breaks_signature() {
        let engine = SessionAuthEngine::new(MemoryNonceStore::new());
        let c = challenge();
        let sig = sign(KEY_0, &c);
        let mut tampered = c.clone();
        tampered.statement = "Sign in to drain the treasury.".into();
        assert!(matches!(
            engine.authorize(&tampered, &sig, during()),
            Err(AuthError::SignerMismatch { .. })
        ));
    }

    #[test]
    fn policy_checks_domain_and_chain() {
        let policy = AuthPolicy {
            domain: Some("gov.example.org".into()),
            chain_id: Some(10),
        };
        let engine = SessionAuthEngine::with_policy(MemoryNonceStore::new(), policy);
        let c = challenge();
        let sig = sign(KEY_0, &c);
        assert_eq!(
            engine.authorize(&c, &sig, during()),
            Err(AuthError::ChainIdMismatch {
                expected: 10,
                actual: 1
            })
        );

        let mut other = challenge();
        other.domain = "evil.example.org".into();
        assert!(matches!(
            engine.authorize(&other, &sig, during()),
            Err(AuthError::DomainMismatch { .. })
        ));
    }

    #[test]
    fn malformed_challenge_is_rejected() {
        let engine = SessionAuthEngine::new(MemoryNonceStore::new());
        let mut c = challenge();
        c.nonce = "short".into();
        let sig = sign(KEY_0, &c);
        assert!(matches!(
            engine.authorize(&c, &sig, during()),
            Err(AuthError::MalformedChallenge(_))
        ));
    }

    #[test]
    fn nonce_is_scoped_per_address() {
        let store = MemoryNonceStore::new();
        let a = Address([1u8; 20]);
        let b = Address([2u8; 20]);
        let (exp, now) = (Timestamp(2_000), Timestamp(1_000));
        assert!(store.consume(&a, "abcdefgh", exp, now).unwrap());
        assert!(store.consume(&b, "abcdefgh", exp, now).unwrap());
        assert!(!store.consume(&a, "abcdefgh", exp, now).unwrap());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn expired_entries_are_pruned_and_live_ones_kept() {
        let mut ledger = NonceLedger::new();
        let a = Address([1u8; 20]);
        for i in 0..100u64 {
            let nonce = format!("oldnonce{i}");
            assert!(ledger.consume(&a, &nonce, Timestamp(1_000 + i), Timestamp(900)));
        }
        assert!(ledger.consume(&a, "livenonce", Timestamp(5_000), Timestamp(900)));
        assert_eq!(ledger.len(), 101);

        // Everything expiring at or before 1_099 goes; the live pair stays
        // marked inside its window.
        assert!(!ledger.consume(&a, "livenonce", Timestamp(5_000), Timestamp(1_099)));
        assert_eq!(ledger.len(), 1);
        assert!(!ledger.contains(&a, "oldnonce0"));
        assert!(ledger.contains(&a, "livenonce"));
        assert_eq!(ledger.iter().count(), 1);

        assert!(ledger.remove(&a, "livenonce"));
        assert!(ledger.is_empty());
        assert!(!ledger.remove(&a, "livenonce"));
    }

    #[test]
    fn replay_inside_window_is_rejected_after_pruning() {
        let engine = SessionAuthEngine::new(MemoryNonceStore::new());
        let c = challenge();
        let sig = sign(KEY_0, &c);
        let expires_at = c.expiration().unwrap();

        engine
            .store()
            .consume(&Address([5u8; 20]), "stalenonce1", Timestamp(1), Timestamp(0))
            .unwrap();

        engine.authorize(&c, &sig, during()).unwrap();
        // The stale entry expired long ago and was dropped on the way in.
        assert_eq!(engine.store().len(), 1);
        assert!(matches!(
            engine.authorize(&c, &sig, Timestamp(expires_at.as_secs() - 1)),
            Err(AuthError::NonceReplay { .. })
        ));
        assert!(matches!(
            engine.authorize(&c, &sig, expires_at),
            Err(AuthError::Expired { .. })
        ));
    }

    #[test]
    fn concurrent_consumption_admits_one() {
        let store = Arc::new(MemoryNonceStore::new());
        let address = Address([7u8; 20]);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    store
                        .consume(&address, "racenonce1", Timestamp(2_000), Timestamp(1_000))
                        .unwrap()
                })
            })
            .collect();
        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(wins, 1);
    }
}
