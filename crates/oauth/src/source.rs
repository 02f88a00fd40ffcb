//! Shared, refreshing access to one account's token
//!
//! A [`TokenSource`] is the authorization handle handed to service bundles.
//! It keeps the current token in memory and refreshes it through the token
//! endpoint when it is about to expire. Whether a refreshed token is also
//! written back to disk is a [`RefreshPolicy`].

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::account::Account;
use crate::error::{Error, Result};
use crate::secrets::ClientSecrets;
use crate::storage::CredentialStore;
use crate::tokens::{self, Token};

/// What happens to a token after a silent refresh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RefreshPolicy {
    /// Keep the refreshed token in memory only; the file keeps the token from
    /// the last explicit save. A restart refreshes again from the stored
    /// refresh token.
    #[default]
    InMemory,
    /// Write every refreshed token back to the store immediately.
    Persist,
}

struct PersistTarget {
    store: CredentialStore,
    account: Option<Account>,
}

struct Inner {
    secrets: ClientSecrets,
    token: Mutex<Token>,
    http: reqwest::Client,
    persist: Option<PersistTarget>,
}

/// Cloneable handle to a token that refreshes itself on demand.
#[derive(Clone)]
pub struct TokenSource {
    inner: Arc<Inner>,
}

impl TokenSource {
    /// Creates a source that only keeps refreshed tokens in memory
    pub fn new(secrets: ClientSecrets, token: Token, http: reqwest::Client) -> Self {
        Self::build(secrets, token, http, None)
    }

    /// Creates a source for `account` whose refreshes follow `policy`
    pub fn for_account(
        secrets: ClientSecrets,
        token: Token,
        http: reqwest::Client,
        store: &CredentialStore,
        account: Option<&Account>,
        policy: RefreshPolicy,
    ) -> Self {
        let persist = match policy {
            RefreshPolicy::InMemory => None,
            RefreshPolicy::Persist => Some(PersistTarget {
                store: store.clone(),
                account: account.cloned(),
            }),
        };
        Self::build(secrets, token, http, persist)
    }

    fn build(
        secrets: ClientSecrets,
        token: Token,
        http: reqwest::Client,
        persist: Option<PersistTarget>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                secrets,
                token: Mutex::new(token),
                http,
                persist,
            }),
        }
    }

    /// Returns a valid access token, refreshing it first if it is stale.
    ///
    /// Concurrent callers share one refresh.
    pub async fn access_token(&self) -> Result<String> {
        let mut token = self.inner.token.lock().await;
        if !token.is_expired() {
            return Ok(token.access_token.clone());
        }

        let refresh = token.refresh_token.clone().ok_or_else(|| {
            Error::TokenRefresh(
                "access token expired and no refresh token is stored; run `gbridge auth login`"
                    .to_string(),
            )
        })?;

        debug!("Access token expired, refreshing");
        let fresh = tokens::refresh_token(&self.inner.http, &self.inner.secrets, &refresh).await?;

        if let Some(target) = &self.inner.persist {
            if let Err(e) = target.store.save_token(target.account.as_ref(), &fresh) {
                warn!("Failed to persist refreshed token: {}", e);
            }
        }

        info!("Access token refreshed");
        *token = fresh;
        Ok(token.access_token.clone())
    }

    /// Snapshot of the current token
    pub async fn token(&self) -> Token {
        self.inner.token.lock().await.clone()
    }

    pub fn client_secrets(&self) -> &ClientSecrets {
        &self.inner.secrets
    }
}

impl std::fmt::Debug for TokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSource")
            .field("client_id", &self.inner.secrets.client_id)
            .field("persist", &self.inner.persist.is_some())
            .finish_non_exhaustive()
    }
}
