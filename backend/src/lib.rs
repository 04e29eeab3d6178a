pub mod auth;
pub mod config;
pub mod flowise;
pub mod gate;
pub mod logging;
pub mod models;
pub mod routes;
pub mod store;
pub mod test_util;

pub use auth::{LoginCache, LtiTokenValidator, PermissionResolver, SessionError, Sessions};
pub use config::Config;
pub use flowise::FlowiseClient;
pub use gate::{FixedWindowCounter, RateCounter, RequestGate};
pub use store::GatewayStore;

use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    /// Validates inbound LTI launch tokens against the platform key set.
    pub validator: LtiTokenValidator,
    /// Issues and verifies the internal session credential.
    pub sessions: Sessions,
    /// Client for the external Flowise workflow engine.
    pub flowise: FlowiseClient,
    pub store: Arc<GatewayStore>,
    /// Per-course chatflow access decisions.
    pub permissions: PermissionResolver,
    /// Pending login handshakes (state -> nonce).
    pub login_cache: LoginCache,
    /// Perimeter filter applied ahead of all routes.
    pub gate: RequestGate,
}

impl AppState {
    /// Wire up all components from configuration.
    pub fn new(config: Config) -> Result<Self, store::StoreError> {
        let store = Arc::new(GatewayStore::new(&config.database.url)?);
        let counter = Arc::new(FixedWindowCounter::new(std::time::Duration::from_secs(
            config.gate.window_secs,
        )));
        Ok(Self {
            validator: LtiTokenValidator::new(&config.lti),
            sessions: Sessions::new(&config.session),
            flowise: FlowiseClient::new(&config.flowise),
            permissions: PermissionResolver::new(store.clone()),
            login_cache: LoginCache::new(),
            gate: RequestGate::new(&config.gate, counter),
            store,
            config,
        })
    }
}
