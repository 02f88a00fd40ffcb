//! Token types, code exchange, and refresh logic

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, info};

use crate::constants::TOKEN_EXPIRY_SKEW_SECS;
use crate::error::{Error, Result};
use crate::secrets::ClientSecrets;

/// An OAuth 2.0 credential as persisted in `token.json`.
///
/// The JSON shape matches what common OAuth client libraries write, so token
/// files can be moved between tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// OAuth access token (short-lived, ~1 hour)
    pub access_token: String,

    /// Usually "Bearer"
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub token_type: String,

    /// Long-lived token used to obtain new access tokens
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "empty_as_none"
    )]
    pub refresh_token: Option<String>,

    /// When the access token expires; `None` means it never does
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "zero_time_as_none"
    )]
    pub expiry: Option<DateTime<Utc>>,
}

impl Token {
    /// Checks if the access token has expired (with 5 minute buffer)
    pub fn is_expired(&self) -> bool {
        match self.expiry {
            Some(expiry) => Utc::now() + chrono::Duration::seconds(TOKEN_EXPIRY_SKEW_SECS) >= expiry,
            None => false,
        }
    }

    /// Builds a token from an endpoint response, keeping `previous_refresh`
    /// when the provider does not rotate the refresh token.
    fn from_response(response: TokenResponse, previous_refresh: Option<&str>) -> Self {
        Self {
            access_token: response.access_token,
            token_type: response.token_type.unwrap_or_else(|| "Bearer".to_string()),
            refresh_token: response
                .refresh_token
                .filter(|t| !t.is_empty())
                .or_else(|| previous_refresh.map(str::to_string)),
            expiry: response
                .expires_in
                .filter(|secs| *secs > 0)
                .map(|secs| Utc::now() + chrono::Duration::seconds(secs)),
        }
    }
}

fn empty_as_none<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()))
}

/// Some writers serialize an unknown expiry as `0001-01-01T00:00:00Z`.
fn zero_time_as_none<'de, D>(deserializer: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<DateTime<Utc>>::deserialize(deserializer)?;
    Ok(value.filter(|t| t.year() > 1))
}

/// Response from the token endpoint
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
}

/// Error response from the token endpoint
#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    error_description: Option<String>,
}

/// Exchanges an authorization code for a token
pub(crate) async fn exchange_code(
    http: &reqwest::Client,
    secrets: &ClientSecrets,
    code: &str,
    code_verifier: &str,
    redirect_uri: &str,
) -> Result<Token> {
    info!("Exchanging authorization code for tokens");

    let response = post_token_request(
        http,
        &secrets.token_url,
        &[
            ("client_id", secrets.client_id.as_str()),
            ("client_secret", secrets.client_secret.as_str()),
            ("code", code),
            ("code_verifier", code_verifier),
            ("grant_type", "authorization_code"),
            ("redirect_uri", redirect_uri),
        ],
    )
    .await
    .map_err(Error::TokenExchange)?;

    Ok(Token::from_response(response, None))
}

/// Refreshes an access token using a refresh token
///
/// # Returns
/// A new Token with a fresh access token (and potentially rotated refresh token)
pub async fn refresh_token(
    http: &reqwest::Client,
    secrets: &ClientSecrets,
    refresh_token: &str,
) -> Result<Token> {
    debug!("Refreshing access token");

    let response = post_token_request(
        http,
        &secrets.token_url,
        &[
            ("client_id", secrets.client_id.as_str()),
            ("client_secret", secrets.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ],
    )
    .await
    .map_err(Error::TokenRefresh)?;

    Ok(Token::from_response(response, Some(refresh_token)))
}

async fn post_token_request(
    http: &reqwest::Client,
    token_url: &str,
    form: &[(&str, &str)],
) -> std::result::Result<TokenResponse, String> {
    let response = http
        .post(token_url)
        .form(form)
        .send()
        .await
        .map_err(|e| format!("request to {token_url} failed: {e}"))?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_default();

        if let Ok(error_resp) = serde_json::from_str::<TokenErrorResponse>(&error_text) {
            if error_resp.error == "invalid_grant" {
                return Err(
                    "grant revoked or expired. Please re-authenticate with `gbridge auth login`."
                        .to_string(),
                );
            }
            return Err(format!(
                "{} - {}",
                error_resp.error,
                error_resp.error_description.unwrap_or_default()
            ));
        }

        return Err(format!("{status}: {error_text}"));
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| format!("malformed token response: {e}"))
}
