//! OAuth client secrets as issued by the Google Cloud console

use serde::Deserialize;

use crate::constants::{GOOGLE_AUTH_URL, GOOGLE_TOKEN_URL};
use crate::error::{Error, Result};

/// Parsed OAuth client configuration.
///
/// On disk the secrets stay an opaque blob copied verbatim; this is the view
/// the login flow and token refresh need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: String,
    pub auth_url: String,
    pub token_url: String,
}

/// Console downloads wrap the client in "installed" (desktop) or "web"
#[derive(Deserialize)]
struct SecretsFile {
    installed: Option<RawClient>,
    web: Option<RawClient>,
}

#[derive(Deserialize)]
struct RawClient {
    client_id: String,
    #[serde(default)]
    client_secret: String,
    auth_uri: Option<String>,
    token_uri: Option<String>,
}

impl ClientSecrets {
    /// Parses a `client_secrets.json` document.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let file: SecretsFile = serde_json::from_slice(bytes)
            .map_err(|e| Error::InvalidSecrets(format!("not a client secrets document: {e}")))?;

        let raw = file.installed.or(file.web).ok_or_else(|| {
            Error::InvalidSecrets("expected an \"installed\" or \"web\" client".to_string())
        })?;

        if raw.client_id.trim().is_empty() {
            return Err(Error::InvalidSecrets("client_id is empty".to_string()));
        }

        Ok(Self {
            client_id: raw.client_id,
            client_secret: raw.client_secret,
            auth_url: raw
                .auth_uri
                .filter(|u| !u.is_empty())
                .unwrap_or_else(|| GOOGLE_AUTH_URL.to_string()),
            token_url: raw
                .token_uri
                .filter(|u| !u.is_empty())
                .unwrap_or_else(|| GOOGLE_TOKEN_URL.to_string()),
        })
    }

    /// Returns the authorization URL to open in the browser.
    ///
    /// Requests offline access with forced consent so the provider issues a
    /// refresh token, and binds the request to `state` and the PKCE challenge.
    pub fn authorization_url(
        &self,
        scopes: &[String],
        redirect_uri: &str,
        state: &str,
        code_challenge: &str,
    ) -> String {
        let scopes = scopes.join(" ");
        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}&code_challenge={}&code_challenge_method=S256&access_type=offline&prompt=consent",
            self.auth_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(&scopes),
            urlencoding::encode(state),
            urlencoding::encode(code_challenge),
        )
    }
}
