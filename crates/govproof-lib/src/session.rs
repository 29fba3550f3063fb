//! Sign-in challenge issuance and authorization requests.

use anyhow::{bail, Context, Result};
use govproof_core::{
    Address, AuthPolicy, NonceStore, SessionAuthEngine, Signature, SiweChallenge, Timestamp,
};
use serde::{Deserialize, Serialize};

use crate::nonce_store::generate_nonce;

pub const DEFAULT_TTL_SECS: u64 = 600;

/// What a client asks for when requesting a challenge to sign.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeParams {
    pub address: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    pub statement: String,
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<String>,
}

/// Fill a challenge from `params`, taking domain and chain id from `policy`
/// when configured. A fresh nonce is generated.
pub fn issue_challenge(
    params: &ChallengeParams,
    policy: &AuthPolicy,
    now: Timestamp,
) -> Result<SiweChallenge> {
    let domain = match (&policy.domain, &params.domain) {
        (Some(expected), Some(asked)) if expected != asked => {
            bail!("this service signs in for {expected}, not {asked}")
        }
        (Some(domain), _) | (None, Some(domain)) => domain.clone(),
        (None, None) => bail!("no sign-in domain configured or requested"),
    };
    let chain_id = match (policy.chain_id, params.chain_id) {
        (Some(expected), Some(asked)) if expected != asked => {
            bail!("this service signs in on chain {expected}, not {asked}")
        }
        (Some(id), _) | (None, Some(id)) => id,
        (None, None) => 1,
    };

    let challenge = SiweChallenge {
        domain,
        address: params.address.to_checksum(),
        statement: params.statement.clone(),
        uri: params.uri.clone(),
        version: "1".to_string(),
        chain_id,
        nonce: generate_nonce(),
        issued_at: now.to_rfc3339(),
        expiration_time: now
            .plus_secs(params.ttl_secs.unwrap_or(DEFAULT_TTL_SECS))
            .to_rfc3339(),
        not_before: None,
        request_id: params.request_id.clone(),
        resources: params.resources.clone(),
    };
    challenge.validate().context("requested challenge is invalid")?;
    Ok(challenge)
}

/// A signed challenge, given either as the exact message text or as fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub challenge: Option<SiweChallenge>,
    pub signature: Signature,
}

impl AuthorizeRequest {
    pub fn challenge(&self) -> Result<SiweChallenge> {
        match (&self.message, &self.challenge) {
            (Some(text), None) => SiweChallenge::parse(text).context("invalid sign-in message"),
            (None, Some(challenge)) => Ok(challenge.clone()),
            (Some(_), Some(_)) => bail!("give either `message` or `challenge`, not both"),
            (None, None) => bail!("missing `message` or `challenge`"),
        }
    }
}

/// Run `request` through `engine`. Engine rejections are returned as
/// [`govproof_core::AuthError`] inside the error.
pub fn authorize<S: NonceStore>(
    engine: &SessionAuthEngine<S>,
    request: &AuthorizeRequest,
    now: Timestamp,
) -> Result<Address> {
    let challenge = request.challenge()?;
    match engine.authorize(&challenge, &request.signature, now) {
        Ok(address) => {
            tracing::info!(address = %address, domain = %challenge.domain, "sign-in authorized");
            Ok(address)
        }
        Err(err) => {
            tracing::warn!(
                address = %challenge.address,
                nonce = %challenge.nonce,
                error = %err,
                "sign-in rejected"
            );
            Err(err.into())
        }
    }
}
