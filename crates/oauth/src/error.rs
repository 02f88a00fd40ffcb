//! Error taxonomy for credential storage, login, and account resolution

use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::LOGIN_COMMAND;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors produced by this crate.
///
/// None of these are retried internally. [`Error::kind`] gives callers a
/// stable discriminant to decide between retrying and changing input.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid account name {account:?}: {reason}")]
    Validation {
        account: String,
        reason: &'static str,
    },

    #[error("{what} not found at {}", .path.display())]
    NotFound { what: &'static str, path: PathBuf },

    #[error("{what} at {} could not be parsed: {source}", .path.display())]
    CorruptData {
        what: &'static str,
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid client secrets: {0}")]
    InvalidSecrets(String),

    #[error("OAuth state token mismatch - possible CSRF attack")]
    CsrfMismatch,

    #[error("no authorization code in OAuth callback")]
    MissingCode,

    #[error("authorization denied by provider: {0}")]
    AccessDenied(String),

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    #[error("token refresh failed: {0}")]
    TokenRefresh(String),

    #[error("login cancelled before an authorization code was received")]
    Cancelled,

    #[error("OAuth callback address {addr} is already in use. Is another login running?")]
    AddressInUse { addr: SocketAddr },

    #[error("OAuth callback listener failed: {0}")]
    CallbackListener(String),

    #[error("no accounts configured; run: {}", LOGIN_COMMAND)]
    NoAccountsConfigured,

    #[error(
        "multiple accounts available, please specify 'account'; available: {}",
        .accounts.join(", ")
    )]
    AmbiguousAccount { accounts: Vec<String> },

    #[error("auth for account {account:?}: {source}")]
    Auth {
        account: String,
        #[source]
        source: Box<Error>,
    },

    #[error("services for account {account:?}: {source}")]
    ServiceInit {
        account: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Machine-readable discriminant of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Validation,
    NotFound,
    CorruptData,
    Io,
    InvalidSecrets,
    CsrfMismatch,
    MissingCode,
    AccessDenied,
    TokenExchange,
    TokenRefresh,
    Cancelled,
    AddressInUse,
    CallbackListener,
    NoAccountsConfigured,
    AmbiguousAccount,
    Auth,
    ServiceInit,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "VALIDATION",
            Self::NotFound => "NOT_FOUND",
            Self::CorruptData => "CORRUPT_DATA",
            Self::Io => "IO",
            Self::InvalidSecrets => "INVALID_SECRETS",
            Self::CsrfMismatch => "CSRF_MISMATCH",
            Self::MissingCode => "MISSING_CODE",
            Self::AccessDenied => "ACCESS_DENIED",
            Self::TokenExchange => "TOKEN_EXCHANGE",
            Self::TokenRefresh => "TOKEN_REFRESH",
            Self::Cancelled => "CANCELLED",
            Self::AddressInUse => "ADDRESS_IN_USE",
            Self::CallbackListener => "CALLBACK_LISTENER",
            Self::NoAccountsConfigured => "NO_ACCOUNTS_CONFIGURED",
            Self::AmbiguousAccount => "AMBIGUOUS_ACCOUNT",
            Self::Auth => "AUTH",
            Self::ServiceInit => "SERVICE_INIT",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::CorruptData { .. } => ErrorKind::CorruptData,
            Self::Io { .. } => ErrorKind::Io,
            Self::InvalidSecrets(_) => ErrorKind::InvalidSecrets,
            Self::CsrfMismatch => ErrorKind::CsrfMismatch,
            Self::MissingCode => ErrorKind::MissingCode,
            Self::AccessDenied(_) => ErrorKind::AccessDenied,
            Self::TokenExchange(_) => ErrorKind::TokenExchange,
            Self::TokenRefresh(_) => ErrorKind::TokenRefresh,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::AddressInUse { .. } => ErrorKind::AddressInUse,
            Self::CallbackListener(_) => ErrorKind::CallbackListener,
            Self::NoAccountsConfigured => ErrorKind::NoAccountsConfigured,
            Self::AmbiguousAccount { .. } => ErrorKind::AmbiguousAccount,
            Self::Auth { .. } => ErrorKind::Auth,
            Self::ServiceInit { .. } => ErrorKind::ServiceInit,
        }
    }

    /// Maps an I/O failure on `path`, turning a missing file into
    /// [`Error::NotFound`].
    pub(crate) fn from_io(what: &'static str, path: PathBuf, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound { what, path }
        } else {
            Self::Io { path, source }
        }
    }

    /// Candidate accounts carried by [`Error::AmbiguousAccount`].
    pub fn candidate_accounts(&self) -> Option<&[String]> {
        match self {
            Self::AmbiguousAccount { accounts } => Some(accounts),
            _ => None,
        }
    }
}
