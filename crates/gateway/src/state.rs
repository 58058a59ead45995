use std::sync::Arc;

use quorum_domain::config::Config;
use quorum_store::CredentialStore;

use crate::runtime::Services;

/// Shared application state passed to all API handlers.
///
/// `services` bundles everything a running meeting needs (stores, event
/// bus, registry, LLM provider); `credentials` stays separate because
/// only the HTTP/WS auth path touches it.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub services: Services,
    pub credentials: Arc<CredentialStore>,
}
