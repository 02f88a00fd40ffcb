//! Account-to-service-bundle resolution
//!
//! A [`Registry`] maps the account named by an inbound request to a bundle of
//! authenticated API clients. In multi-account mode bundles are built lazily
//! through a [`ServiceFactory`] and cached for the registry's lifetime.
//!
//! One mutex guards the whole cache and is held across construction, so at
//! most one bundle is ever built per account. Failed constructions are not
//! cached; the next `resolve` for that account tries again.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::account::Account;
use crate::constants::LEGACY_ACCOUNT_LABEL;
use crate::error::{Error, Result};
use crate::secrets::ClientSecrets;
use crate::source::{RefreshPolicy, TokenSource};
use crate::storage::CredentialStore;

/// Authorization material handed to a [`ServiceFactory`]
#[derive(Debug, Clone)]
pub struct Authorization {
    pub tokens: TokenSource,
    pub scopes: Vec<String>,
}

/// Builds the bundle of API clients for one account.
#[async_trait]
pub trait ServiceFactory: Send + Sync + 'static {
    type Bundle: Send + Sync + 'static;

    /// `account` is `None` for the legacy single-identity slot.
    async fn build(
        &self,
        account: Option<&Account>,
        auth: Authorization,
    ) -> anyhow::Result<Self::Bundle>;
}

/// Settings shared by every bundle a registry builds
#[derive(Debug, Clone, Default)]
pub struct RegistryOptions {
    pub refresh_policy: RefreshPolicy,
    pub http: reqwest::Client,
}

/// Loads the token and client secrets for `account` and returns a
/// [`TokenSource`] over them, refreshing once up front if the stored access
/// token is already stale.
pub async fn authorize(
    store: &CredentialStore,
    account: Option<&Account>,
    scopes: &[String],
    options: &RegistryOptions,
) -> Result<Authorization> {
    let token = store.load_token(account)?;
    let secrets = ClientSecrets::from_json(&store.load_secrets(account)?)?;

    let tokens = TokenSource::for_account(
        secrets,
        token,
        options.http.clone(),
        store,
        account,
        options.refresh_policy,
    );
    tokens.access_token().await?;

    Ok(Authorization {
        tokens,
        scopes: scopes.to_vec(),
    })
}

type BundleMap<B> = HashMap<Account, Arc<B>>;

struct MultiAccount<F: ServiceFactory> {
    store: CredentialStore,
    factory: Arc<F>,
    scopes: Vec<String>,
    options: RegistryOptions,
    bundles: Arc<Mutex<BundleMap<F::Bundle>>>,
}

enum Mode<F: ServiceFactory> {
    Legacy(Arc<F::Bundle>),
    MultiAccount(MultiAccount<F>),
}

/// Resolves account names to cached service bundles.
///
/// Share it between request handlers behind an `Arc`; it has no global
/// state of its own.
pub struct Registry<F: ServiceFactory> {
    mode: Mode<F>,
}

impl<F: ServiceFactory> Registry<F> {
    /// Registry that returns `bundle` for every account, including the empty
    /// one
    pub fn legacy(bundle: Arc<F::Bundle>) -> Self {
        Self {
            mode: Mode::Legacy(bundle),
        }
    }

    /// Registry that builds one bundle per account from `store` on first use
    pub fn multi_account(
        store: CredentialStore,
        factory: F,
        scopes: Vec<String>,
        options: RegistryOptions,
    ) -> Self {
        Self {
            mode: Mode::MultiAccount(MultiAccount {
                store,
                factory: Arc::new(factory),
                scopes,
                options,
                bundles: Arc::new(Mutex::new(HashMap::new())),
            }),
        }
    }

    /// Picks the mode from what is on disk.
    ///
    /// With any account directory holding a token the registry is
    /// multi-account. Otherwise the legacy token and shared secrets are
    /// loaded and the single bundle is built up front; an empty store is
    /// [`Error::NoAccountsConfigured`].
    pub async fn from_store(
        store: CredentialStore,
        factory: F,
        scopes: Vec<String>,
        options: RegistryOptions,
    ) -> Result<Self> {
        if store.is_multi_account()? {
            info!("Credential store has per-account credentials, using multi-account mode");
            return Ok(Self::multi_account(store, factory, scopes, options));
        }

        if let Err(Error::NotFound { .. }) = store.load_token(None) {
            return Err(Error::NoAccountsConfigured);
        }

        let auth = authorize(&store, None, &scopes, &options)
            .await
            .map_err(|e| Error::Auth {
                account: LEGACY_ACCOUNT_LABEL.to_string(),
                source: Box::new(e),
            })?;

        let bundle = factory
            .build(None, auth)
            .await
            .map_err(|e| Error::ServiceInit {
                account: LEGACY_ACCOUNT_LABEL.to_string(),
                source: e.into(),
            })?;

        info!("Using legacy single-account credentials");
        Ok(Self::legacy(Arc::new(bundle)))
    }

    pub fn is_multi_account(&self) -> bool {
        matches!(self.mode, Mode::MultiAccount(_))
    }

    /// Accounts with a constructed bundle, sorted. Always empty in legacy
    /// mode.
    pub async fn cached_accounts(&self) -> Vec<Account> {
        match &self.mode {
            Mode::Legacy(_) => Vec::new(),
            Mode::MultiAccount(multi) => {
                let mut accounts: Vec<Account> = multi.bundles.lock().await.keys().cloned().collect();
                accounts.sort();
                accounts
            }
        }
    }

    /// Returns the bundle for `account`.
    ///
    /// An empty `account` auto-selects when exactly one account is
    /// configured. Legacy registries ignore the argument.
    pub async fn resolve(&self, account: &str) -> Result<Arc<F::Bundle>> {
        let multi = match &self.mode {
            Mode::Legacy(bundle) => return Ok(bundle.clone()),
            Mode::MultiAccount(multi) => multi,
        };

        let account = if account.is_empty() {
            select_only_account(&multi.store)?
        } else {
            Account::new(account)?
        };

        multi.resolve_account(account).await
    }
}

impl<F: ServiceFactory> MultiAccount<F> {
    async fn resolve_account(&self, account: Account) -> Result<Arc<F::Bundle>> {
        let mut bundles = self.bundles.clone().lock_owned().await;
        if let Some(bundle) = bundles.get(&account) {
            debug!(account = %account, "Service bundle cache hit");
            return Ok(bundle.clone());
        }

        // Construction runs in its own task holding the lock, so a caller
        // that stops waiting does not abort it and the result is still cached.
        let store = self.store.clone();
        let factory = self.factory.clone();
        let scopes = self.scopes.clone();
        let options = self.options.clone();
        let label = account.to_string();

        let construction = tokio::spawn(async move {
            let bundle = construct(&store, factory.as_ref(), &account, &scopes, &options).await?;
            let bundle = Arc::new(bundle);
            bundles.insert(account, bundle.clone());
            Ok(bundle)
        });

        construction.await.map_err(|e| Error::ServiceInit {
            account: label,
            source: Box::new(e),
        })?
    }
}

async fn construct<F: ServiceFactory>(
    store: &CredentialStore,
    factory: &F,
    account: &Account,
    scopes: &[String],
    options: &RegistryOptions,
) -> Result<F::Bundle> {
    let auth = authorize(store, Some(account), scopes, options)
        .await
        .map_err(|e| Error::Auth {
            account: account.to_string(),
            source: Box::new(e),
        })?;

    let bundle = factory
        .build(Some(account), auth)
        .await
        .map_err(|e| Error::ServiceInit {
            account: account.to_string(),
            source: e.into(),
        })?;

    info!(account = %account, "Service bundle constructed");
    Ok(bundle)
}

fn select_only_account(store: &CredentialStore) -> Result<Account> {
    let mut accounts = store.list_accounts()?;
    match accounts.len() {
        0 => Err(Error::NoAccountsConfigured),
        1 => {
            let account = accounts.remove(0);
            debug!(account = %account, "Auto-selected the only configured account");
            Ok(account)
        }
        _ => Err(Error::AmbiguousAccount {
            accounts: accounts.iter().map(|a| a.to_string()).collect(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::test_support::test_secrets_json;
    use crate::tokens::Token;
    use chrono::{Duration, Utc};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Bundle recording which account it was built for
    #[derive(Debug)]
    struct FakeBundle {
        account: Option<Account>,
        access_token: String,
    }

    #[derive(Clone, Default)]
    struct CountingFactory {
        builds: Arc<AtomicUsize>,
        fail: Arc<AtomicBool>,
        delay_ms: u64,
    }

    #[async_trait]
    impl ServiceFactory for CountingFactory {
        type Bundle = FakeBundle;

        async fn build(
            &self,
            account: Option<&Account>,
            auth: Authorization,
        ) -> anyhow::Result<FakeBundle> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            if self.delay_ms > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
            }
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("upstream discovery failed");
            }
            Ok(FakeBundle {
                account: account.cloned(),
                access_token: auth.tokens.access_token().await?,
            })
        }
    }

    fn valid_token(access: &str) -> Token {
        Token {
            access_token: access.to_string(),
            token_type: "Bearer".to_string(),
            refresh_token: Some("1//refresh".to_string()),
            expiry: Some(Utc::now() + Duration::hours(1)),
        }
    }

    fn write_secrets(temp: &TempDir, store: &CredentialStore, account: Option<&Account>) {
        let path = temp.path().join("downloaded_secrets.json");
        std::fs::write(&path, test_secrets_json("http://127.0.0.1:9/token")).unwrap();
        store.save_secrets(account, &path).unwrap();
    }

    fn store_with_accounts(names: &[&str]) -> (TempDir, CredentialStore) {
        let temp = TempDir::new().unwrap();
        let store = CredentialStore::at(temp.path().join("config")).unwrap();
        write_secrets(&temp, &store, None);
        for name in names {
            let account = Account::new(*name).unwrap();
            store
                .save_token(Some(&account), &valid_token(&format!("token-{name}")))
                .unwrap();
        }
        (temp, store)
    }

    fn multi(store: &CredentialStore, factory: CountingFactory) -> Registry<CountingFactory> {
        Registry::multi_account(
            store.clone(),
            factory,
            crate::constants::default_scopes(),
            RegistryOptions::default(),
        )
    }

    #[tokio::test]
    async fn test_legacy_ignores_account() {
        let bundle = Arc::new(FakeBundle {
            account: None,
            access_token: "legacy".to_string(),
        });
        let registry: Registry<CountingFactory> = Registry::legacy(bundle.clone());

        for name in ["", "anyone@example.com", "../not-validated"] {
            let resolved = registry.resolve(name).await.unwrap();
            assert!(Arc::ptr_eq(&resolved, &bundle));
        }
        assert!(!registry.is_multi_account());
        assert!(registry.cached_accounts().await.is_empty());
    }

    #[tokio::test]
    async fn test_empty_account_with_no_accounts() {
        let (_temp, store) = store_with_accounts(&[]);
        let registry = multi(&store, CountingFactory::default());

        let err = registry.resolve("").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoAccountsConfigured);
    }

    #[tokio::test]
    async fn test_empty_account_auto_selects_single() {
        let (_temp, store) = store_with_accounts(&["only@example.com"]);
        let factory = CountingFactory::default();
        let registry = multi(&store, factory.clone());

        let implicit = registry.resolve("").await.unwrap();
        let explicit = registry.resolve("only@example.com").await.unwrap();

        assert!(Arc::ptr_eq(&implicit, &explicit));
        assert_eq!(implicit.account.as_ref().unwrap().as_str(), "only@example.com");
        assert_eq!(implicit.access_token, "token-only@example.com");
        assert_eq!(factory.builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_account_with_many_is_ambiguous() {
        let (_temp, store) = store_with_accounts(&["b@example.com", "a@example.com"]);
        let registry = multi(&store, CountingFactory::default());

        let err = registry.resolve("").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AmbiguousAccount);

        let listed: Vec<String> = store
            .list_accounts()
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(err.candidate_accounts().unwrap(), listed.as_slice());
        assert!(err.to_string().contains("a@example.com"));
    }

    #[tokio::test]
    async fn test_cache_hit_builds_once() {
        let (_temp, store) = store_with_accounts(&["a@example.com", "b@example.com"]);
        let factory = CountingFactory::default();
        let registry = multi(&store, factory.clone());

        let first = registry.resolve("a@example.com").await.unwrap();
        let second = registry.resolve("a@example.com").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(factory.builds.load(Ordering::SeqCst), 1);

        let other = registry.resolve("b@example.com").await.unwrap();
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(factory.builds.load(Ordering::SeqCst), 2);

        let cached: Vec<String> = registry
            .cached_accounts()
            .await
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(cached, vec!["a@example.com", "b@example.com"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_resolve_builds_once() {
        let (_temp, store) = store_with_accounts(&["a@example.com"]);
        let factory = CountingFactory {
            delay_ms: 50,
            ..CountingFactory::default()
        };
        let registry = Arc::new(multi(&store, factory.clone()));

        let calls = (0..16).map(|_| {
            let registry = registry.clone();
            async move { registry.resolve("a@example.com").await }
        });
        let results = futures::future::join_all(calls).await;

        assert_eq!(factory.builds.load(Ordering::SeqCst), 1);
        let first = results[0].as_ref().unwrap();
        for result in &results {
            assert!(Arc::ptr_eq(first, result.as_ref().unwrap()));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_failure_is_shared_and_not_cached() {
        let (_temp, store) = store_with_accounts(&["a@example.com"]);
        let factory = CountingFactory {
            delay_ms: 10,
            ..CountingFactory::default()
        };
        factory.fail.store(true, Ordering::SeqCst);
        let registry = Arc::new(multi(&store, factory.clone()));

        let calls = (0..4).map(|_| {
            let registry = registry.clone();
            async move { registry.resolve("a@example.com").await }
        });
        for result in futures::future::join_all(calls).await {
            assert_eq!(result.unwrap_err().kind(), ErrorKind::ServiceInit);
        }
        assert!(registry.cached_accounts().await.is_empty());

        factory.fail.store(false, Ordering::SeqCst);
        let bundle = registry.resolve("a@example.com").await.unwrap();
        assert_eq!(bundle.access_token, "token-a@example.com");
        assert_eq!(registry.cached_accounts().await.len(), 1);
    }

    #[tokio::test]
    async fn test_abandoned_resolve_still_caches() {
        let (_temp, store) = store_with_accounts(&["a@example.com"]);
        let factory = CountingFactory {
            delay_ms: 100,
            ..CountingFactory::default()
        };
        let registry = multi(&store, factory.clone());

        let abandoned = tokio::time::timeout(
            std::time::Duration::from_millis(10),
            registry.resolve("a@example.com"),
        )
        .await;
        assert!(abandoned.is_err());

        registry.resolve("a@example.com").await.unwrap();
        assert_eq!(factory.builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_account_is_auth_error() {
        let (_temp, store) = store_with_accounts(&["a@example.com"]);
        let factory = CountingFactory::default();
        let registry = multi(&store, factory.clone());

        let err = registry.resolve("missing@example.com").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Auth);
        assert!(err.to_string().contains("missing@example.com"));
        assert_eq!(factory.builds.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalid_account_rejected_before_io() {
        let (_temp, store) = store_with_accounts(&["a@example.com"]);
        let registry = multi(&store, CountingFactory::default());

        for name in ["../escape", "a/b", "a\\b", "nul\0byte"] {
            let err = registry.resolve(name).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation);
        }
    }

    #[tokio::test]
    async fn test_expired_token_without_refresh_is_auth_error() {
        let (_temp, store) = store_with_accounts(&[]);
        let account = Account::new("stale@example.com").unwrap();
        let token = Token {
            refresh_token: None,
            expiry: Some(Utc::now() - Duration::hours(1)),
            ..valid_token("old")
        };
        store.save_token(Some(&account), &token).unwrap();
        let registry = multi(&store, CountingFactory::default());

        let err = registry.resolve("stale@example.com").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Auth);
    }

    #[tokio::test]
    async fn test_from_store_empty() {
        let (_temp, store) = store_with_accounts(&[]);
        let err = Registry::from_store(
            store,
            CountingFactory::default(),
            vec![],
            RegistryOptions::default(),
        )
        .await
        .err()
        .unwrap();
        assert_eq!(err.kind(), ErrorKind::NoAccountsConfigured);
    }

    #[tokio::test]
    async fn test_from_store_legacy() {
        let (_temp, store) = store_with_accounts(&[]);
        store.save_token(None, &valid_token("legacy-token")).unwrap();
        let factory = CountingFactory::default();

        let registry = Registry::from_store(
            store,
            factory.clone(),
            vec![],
            RegistryOptions::default(),
        )
        .await
        .unwrap();

        assert!(!registry.is_multi_account());
        assert_eq!(factory.builds.load(Ordering::SeqCst), 1);
        let bundle = registry.resolve("whoever@example.com").await.unwrap();
        assert!(bundle.account.is_none());
        assert_eq!(bundle.access_token, "legacy-token");
    }

    #[tokio::test]
    async fn test_from_store_legacy_without_secrets() {
        let temp = TempDir::new().unwrap();
        let store = CredentialStore::at(temp.path()).unwrap();
        store.save_token(None, &valid_token("legacy-token")).unwrap();

        let err = Registry::from_store(
            store,
            CountingFactory::default(),
            vec![],
            RegistryOptions::default(),
        )
        .await
        .err()
        .unwrap();
        assert_eq!(err.kind(), ErrorKind::Auth);
        assert!(err.to_string().contains(LEGACY_ACCOUNT_LABEL));
    }

    #[tokio::test]
    async fn test_from_store_multi_account() {
        let (_temp, store) = store_with_accounts(&["a@example.com"]);
        let factory = CountingFactory::default();

        let registry = Registry::from_store(
            store,
            factory.clone(),
            vec![],
            RegistryOptions::default(),
        )
        .await
        .unwrap();

        assert!(registry.is_multi_account());
        assert_eq!(factory.builds.load(Ordering::SeqCst), 0);
    }
}
