//! File-backed credential storage
//!
//! Layout under the configuration root:
//! - `token.json` / `client_secrets.json`: legacy single account and shared secrets
//! - `accounts/<account>/token.json`: one token per account
//! - `accounts/<account>/client_secrets.json`: optional per-account secrets
//!
//! The presence of at least one `accounts/<account>/token.json` is what puts
//! the process in multi-account mode.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use common::platform::{create_private_dir, write_private_file};

use crate::account::Account;
use crate::constants::{ACCOUNTS_DIR_NAME, SECRETS_FILE_NAME, TOKEN_FILE_NAME};
use crate::error::{Error, Result};
use crate::tokens::Token;

/// Handles persistent storage of OAuth tokens and client secrets.
///
/// `None` for an account selects the legacy/shared files at the root.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    root: PathBuf,
}

impl CredentialStore {
    /// Opens the store at the resolved configuration root
    /// (`GBRIDGE_CONFIG_DIR`, else `~/.gbridge`).
    pub fn open() -> Result<Self> {
        let root = common::config::resolve_config_root().map_err(|source| Error::Io {
            path: PathBuf::from(common::config::CONFIG_DIR_NAME),
            source,
        })?;
        Ok(Self { root })
    }

    /// Opens the store at an explicit root, creating it if needed.
    pub fn at(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        create_private_dir(&root).map_err(|source| Error::Io {
            path: root.clone(),
            source,
        })?;
        Ok(Self { root })
    }

    /// Returns the configuration root
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn accounts_dir(&self) -> PathBuf {
        self.root.join(ACCOUNTS_DIR_NAME)
    }

    fn scope_dir(&self, account: Option<&Account>) -> PathBuf {
        match account {
            Some(account) => self.accounts_dir().join(account.as_str()),
            None => self.root.clone(),
        }
    }

    /// Path of the token file for `account`, without touching the disk
    pub fn token_path(&self, account: Option<&Account>) -> PathBuf {
        self.scope_dir(account).join(TOKEN_FILE_NAME)
    }

    /// Path of the secrets file for `account`, without touching the disk
    pub fn secrets_path(&self, account: Option<&Account>) -> PathBuf {
        self.scope_dir(account).join(SECRETS_FILE_NAME)
    }

    /// Returns the directory for `account`, creating it if it doesn't exist.
    pub fn account_dir(&self, account: &Account) -> Result<PathBuf> {
        let dir = self.scope_dir(Some(account));
        create_private_dir(&dir).map_err(|source| Error::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(dir)
    }

    fn ensure_scope_dir(&self, account: Option<&Account>) -> Result<PathBuf> {
        match account {
            Some(account) => self.account_dir(account),
            None => Ok(self.root.clone()),
        }
    }

    /// Saves a token for `account` (or the legacy slot).
    pub fn save_token(&self, account: Option<&Account>, token: &Token) -> Result<()> {
        let path = self.ensure_scope_dir(account)?.join(TOKEN_FILE_NAME);
        let content = serde_json::to_vec_pretty(token).map_err(|source| Error::CorruptData {
            what: "token",
            path: path.clone(),
            source,
        })?;

        write_private_file(&path, &content).map_err(|source| Error::Io {
            path: path.clone(),
            source,
        })?;

        info!("Saved token for {}", describe(account));
        Ok(())
    }

    /// Loads the token for `account` (or the legacy slot).
    pub fn load_token(&self, account: Option<&Account>) -> Result<Token> {
        let path = self.token_path(account);
        let content = fs::read(&path).map_err(|e| Error::from_io("token", path.clone(), e))?;

        let token = serde_json::from_slice(&content).map_err(|source| Error::CorruptData {
            what: "token",
            path: path.clone(),
            source,
        })?;

        debug!("Loaded token for {}", describe(account));
        Ok(token)
    }

    /// Copies an external client secrets file into the store verbatim.
    pub fn save_secrets(&self, account: Option<&Account>, source_path: &Path) -> Result<()> {
        let content = fs::read(source_path)
            .map_err(|e| Error::from_io("client secrets file", source_path.to_path_buf(), e))?;

        let path = self.ensure_scope_dir(account)?.join(SECRETS_FILE_NAME);
        write_private_file(&path, &content).map_err(|source| Error::Io {
            path: path.clone(),
            source,
        })?;

        info!("Saved client secrets for {}", describe(account));
        Ok(())
    }

    /// Loads client secrets for `account`.
    ///
    /// Per-account secrets win; a missing per-account file falls back to the
    /// shared file at the root. Only fails with [`Error::NotFound`] if both
    /// are absent.
    pub fn load_secrets(&self, account: Option<&Account>) -> Result<Vec<u8>> {
        if account.is_some() {
            let path = self.secrets_path(account);
            match fs::read(&path) {
                Ok(content) => {
                    debug!("Using per-account client secrets for {}", describe(account));
                    return Ok(content);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => return Err(Error::Io { path, source }),
            }
        }

        let path = self.secrets_path(None);
        fs::read(&path).map_err(|e| Error::from_io("client secrets", path.clone(), e))
    }

    /// True iff at least one account directory holds a token file.
    pub fn is_multi_account(&self) -> Result<bool> {
        Ok(!self.scan_accounts(true)?.is_empty())
    }

    /// Lists configured accounts (directories under `accounts/` holding a
    /// token file), sorted by name. A missing `accounts/` directory is an
    /// empty list.
    pub fn list_accounts(&self) -> Result<Vec<Account>> {
        let mut accounts = self.scan_accounts(false)?;
        accounts.sort();
        Ok(accounts)
    }

    fn scan_accounts(&self, stop_at_first: bool) -> Result<Vec<Account>> {
        let dir = self.accounts_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(source) => return Err(Error::Io { path: dir, source }),
        };

        let mut accounts = vec![];
        for entry in entries {
            let entry = entry.map_err(|source| Error::Io {
                path: dir.clone(),
                source,
            })?;
            let path = entry.path();
            if !path.is_dir() || !path.join(TOKEN_FILE_NAME).is_file() {
                continue;
            }

            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                warn!("Skipping account directory with non UTF-8 name: {:?}", path);
                continue;
            };

            match Account::new(name) {
                Ok(account) => accounts.push(account),
                Err(e) => {
                    warn!("Skipping account directory {:?}: {}", path, e);
                    continue;
                }
            }

            if stop_at_first {
                break;
            }
        }

        Ok(accounts)
    }

    /// Removes an account directory and everything in it.
    ///
    /// Returns whether anything was removed.
    pub fn remove_account(&self, account: &Account) -> Result<bool> {
        let dir = self.scope_dir(Some(account));
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                info!("Removed account: {}", account);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(Error::Io { path: dir, source }),
        }
    }
}

fn describe(account: Option<&Account>) -> String {
    match account {
        Some(account) => format!("account {account}"),
        None => "legacy account".to_string(),
    }
}
