use std::sync::Arc;

use oauth::{CredentialStore, Registry};

use crate::services::GoogleServiceFactory;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Resolves each request's account to its Google API clients
    pub registry: Arc<Registry<GoogleServiceFactory>>,
    /// Credential store, read for account listings
    pub store: CredentialStore,
}

impl AppState {
    pub fn new(registry: Registry<GoogleServiceFactory>, store: CredentialStore) -> Self {
        Self {
            registry: Arc::new(registry),
            store,
        }
    }
}
