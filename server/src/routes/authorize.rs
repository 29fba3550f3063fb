use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use govproof_core::{Address, Timestamp};
use govproof_lib::{session, AuthorizeRequest};
use serde::Serialize;

use super::{api_error, ApiError};
use crate::state::AppState;

#[derive(Debug, Serialize)]
struct AuthorizeResponse {
    authorized: bool,
    address: Address,
}

/// `POST /api/authorize`: check a signed challenge and burn its nonce.
async fn authorize(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AuthorizeRequest>,
) -> Result<Json<AuthorizeResponse>, ApiError> {
    // The nonce store may block on file I/O.
    let address = tokio::task::spawn_blocking(move || {
        session::authorize(&state.auth, &request, Timestamp::now())
    })
    .await
    .map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("authorization task failed: {e}"),
        )
    })?
    .map_err(api_error)?;
    Ok(Json(AuthorizeResponse {
        authorized: true,
        address,
    }))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/authorize", post(authorize))
}
