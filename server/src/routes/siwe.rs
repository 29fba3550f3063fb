use std::sync::Arc;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use govproof_core::{SiweChallenge, Timestamp};
use govproof_lib::{generate_nonce, issue_challenge, ChallengeParams};
use serde::Serialize;

use super::{api_error, ApiError};
use crate::state::AppState;

#[derive(Debug, Serialize)]
struct NonceResponse {
    nonce: String,
}

/// `GET /api/siwe/nonce`
async fn nonce() -> Json<NonceResponse> {
    Json(NonceResponse {
        nonce: generate_nonce(),
    })
}

#[derive(Debug, Serialize)]
struct MessageResponse {
    challenge: SiweChallenge,
    message: String,
}

/// `POST /api/siwe/message`: issue a challenge under the configured policy,
/// both as fields and as the exact text the wallet must sign.
async fn message(
    State(state): State<Arc<AppState>>,
    Json(params): Json<ChallengeParams>,
) -> Result<Json<MessageResponse>, ApiError> {
    let challenge =
        issue_challenge(&params, state.auth.policy(), Timestamp::now()).map_err(api_error)?;
    tracing::info!(address = %challenge.address, nonce = %challenge.nonce, "issued sign-in challenge");
    Ok(Json(MessageResponse {
        message: challenge.to_message(),
        challenge,
    }))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/siwe/nonce", get(nonce))
        .route("/siwe/message", post(message))
}
