use std::sync::Arc;

use axum::{extract::State, routing::post, Json, Router};
use govproof_lib::{run_attestation, AttestRequest, AttestationReport};

use super::{api_error, ApiError};
use crate::state::AppState;

/// `POST /api/attest`: verify an `eth_getProof` payload against a block and
/// report the holder's balance.
async fn attest(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AttestRequest>,
) -> Result<Json<AttestationReport>, ApiError> {
    let claim = run_attestation(&state.config, &request).map_err(api_error)?;
    Ok(Json(AttestationReport::from(&claim)))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/attest", post(attest))
}
