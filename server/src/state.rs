use govproof_core::{NonceStore, SessionAuthEngine};
use govproof_lib::Config;

/// Shared application state.
pub struct AppState {
    /// Contract slots and sign-in policy loaded at startup.
    pub config: Config,
    /// Sign-in verifier; owns the consumed-nonce store.
    pub auth: SessionAuthEngine<Box<dyn NonceStore>>,
}

impl AppState {
    pub fn new(config: Config, store: Box<dyn NonceStore>) -> Self {
        let auth = SessionAuthEngine::with_policy(store, config.auth_policy());
        Self { config, auth }
    }
}
