mod attest;
mod authorize;
mod health;
mod siwe;

use std::sync::Arc;

use axum::{http::StatusCode, Router};
use govproof_core::{AttestError, AuthError};

use crate::state::AppState;

/// Build the `/api` sub-router with all API routes.
pub fn api_router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(health::router())
        .merge(attest::router())
        .merge(authorize::router())
        .merge(siwe::router())
        .with_state(state)
}

type ApiError = (StatusCode, String);

/// Map a library error to a response. Engine rejections keep their own
/// status; anything else is treated as bad input.
fn api_error(err: anyhow::Error) -> ApiError {
    let status = if err.downcast_ref::<AttestError>().is_some() {
        StatusCode::UNPROCESSABLE_ENTITY
    } else if let Some(auth) = err.downcast_ref::<AuthError>() {
        auth_status(auth)
    } else {
        StatusCode::BAD_REQUEST
    };
    (status, format!("{err:#}"))
}

fn auth_status(err: &AuthError) -> StatusCode {
    match err {
        AuthError::MalformedChallenge(_) => StatusCode::BAD_REQUEST,
        AuthError::NonceReplay { .. } => StatusCode::CONFLICT,
        AuthError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        AuthError::DomainMismatch { .. }
        | AuthError::ChainIdMismatch { .. }
        | AuthError::Expired { .. }
        | AuthError::NotYetValid { .. }
        | AuthError::Signature(_)
        | AuthError::SignerMismatch { .. } => StatusCode::UNAUTHORIZED,
    }
}

#[cfg(test)]
pub(crate) fn test_state(config: govproof_lib::Config) -> Arc<AppState> {
    Arc::new(AppState::new(
        config,
        Box::new(govproof_core::MemoryNonceStore::new()),
    ))
}
