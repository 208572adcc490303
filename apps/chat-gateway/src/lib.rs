pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod models;
pub mod push;
pub mod routes;

use std::sync::Arc;

use auth::tokens::{JwtVerifier, TokenVerifier};
use config::Config;
use db::store::ChatStore;
use gateway::EventEngine;
use push::PushQueue;

/// Shared application state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub verifier: Arc<dyn TokenVerifier>,
    pub engine: Arc<EventEngine>,
}

impl AppState {
    /// Wire the gateway around a store and push queue, verifying handshake
    /// tokens with the configured secret.
    pub fn new(config: Config, store: Arc<dyn ChatStore>, push: PushQueue) -> Self {
        let verifier = Arc::new(JwtVerifier::new(&config.jwt_secret));
        Self {
            config: Arc::new(config),
            verifier,
            engine: Arc::new(EventEngine::new(store, push)),
        }
    }
}
