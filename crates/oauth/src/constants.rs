//! OAuth endpoints, on-disk names, and defaults shared across the crate

use std::time::Duration;

/// Google OAuth authorization endpoint
pub const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/auth";

/// Google OAuth token exchange endpoint
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Local callback port for the OAuth redirect
pub const OAUTH_CALLBACK_PORT: u16 = 8085;

/// Route the callback listener serves
pub const OAUTH_CALLBACK_PATH: &str = "/callback";

/// Upper bound on waiting for the callback listener to drain after login
pub const CALLBACK_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// How long before expiry an access token is treated as stale
pub const TOKEN_EXPIRY_SKEW_SECS: i64 = 5 * 60;

/// Token file name, both at the root (legacy) and per account
pub const TOKEN_FILE_NAME: &str = "token.json";

/// OAuth client secrets file name, shared at the root or per account
pub const SECRETS_FILE_NAME: &str = "client_secrets.json";

/// Subdirectory holding one directory per account
pub const ACCOUNTS_DIR_NAME: &str = "accounts";

/// Label used in errors and logs for the implicit single account
pub const LEGACY_ACCOUNT_LABEL: &str = "default";

/// Command that creates an account, quoted in remediation messages
pub const LOGIN_COMMAND: &str = "gbridge auth login --account <email> --secrets <path>";

/// Scopes requested at login and used to build service bundles
pub const DEFAULT_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/drive",
    "https://www.googleapis.com/auth/gmail.readonly",
    "https://www.googleapis.com/auth/gmail.send",
    "https://www.googleapis.com/auth/gmail.modify",
    "https://www.googleapis.com/auth/calendar",
    "https://www.googleapis.com/auth/spreadsheets",
    "https://www.googleapis.com/auth/contacts",
    "https://www.googleapis.com/auth/documents",
    "https://www.googleapis.com/auth/tasks",
];

/// Owned copy of [`DEFAULT_SCOPES`]
pub fn default_scopes() -> Vec<String> {
    DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect()
}
