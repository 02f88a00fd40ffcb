use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::error::ApiError;
use crate::services::GoogleApi;
use crate::state::AppState;

/// The account a request acts as; empty or absent lets the registry pick
#[derive(Debug, Default, Deserialize)]
pub struct AccountQuery {
    #[serde(default)]
    pub account: String,
}

/// Simple health check endpoint
pub async fn health() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "service": "gbridge",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

/// Mode and configured accounts
pub async fn list_accounts(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let mode = if state.registry.is_multi_account() {
        "multi_account"
    } else {
        "legacy"
    };
    let accounts: Vec<String> = state
        .store
        .list_accounts()?
        .iter()
        .map(ToString::to_string)
        .collect();
    let cached: Vec<String> = state
        .registry
        .cached_accounts()
        .await
        .iter()
        .map(ToString::to_string)
        .collect();

    Ok(Json(json!({
        "mode": mode,
        "accounts": accounts,
        "cached": cached,
    })))
}

/// Reports which account a request resolves to
pub async fn whoami(
    State(state): State<AppState>,
    Query(query): Query<AccountQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let services = state.registry.resolve(&query.account).await?;

    Ok(Json(json!({
        "account": services.account().map(ToString::to_string),
        "scopes": services.scopes(),
        "services": GoogleApi::ALL.iter().map(GoogleApi::as_str).collect::<Vec<_>>(),
    })))
}

/// Forwards a request to one Google API as the resolved account
pub async fn proxy(
    State(state): State<AppState>,
    Path((service, path)): Path<(String, String)>,
    Query(params): Query<Vec<(String, String)>>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let api: GoogleApi = service
        .parse()
        .map_err(|_| ApiError::UnknownService(service.clone()))?;

    let (account, forwarded) = split_account_param(params);
    let services = state.registry.resolve(&account).await?;
    let client = services.client(api);
    client
        .url(&path)
        .map_err(|e| ApiError::InvalidPath(e.to_string()))?;

    let mut request = client
        .request(method, &path)
        .await
        .map_err(upstream_setup_error)?;
    if !forwarded.is_empty() {
        request = request.query(&forwarded);
    }
    if let Some(content_type) = headers.get(header::CONTENT_TYPE) {
        request = request.header(header::CONTENT_TYPE, content_type.clone());
    }
    if !body.is_empty() {
        request = request.body(body);
    }

    let upstream = request
        .send()
        .await
        .map_err(|e| ApiError::Upstream(format!("{api}: {e}")))?;

    let status = upstream.status();
    let content_type = upstream.headers().get(header::CONTENT_TYPE).cloned();
    let bytes = upstream
        .bytes()
        .await
        .map_err(|e| ApiError::Upstream(format!("{api}: {e}")))?;
    debug!("{} responded {}", api, status);

    let mut response = (status, bytes).into_response();
    if let Some(content_type) = content_type {
        response.headers_mut().insert(header::CONTENT_TYPE, content_type);
    }
    Ok(response)
}

/// Token failures keep their own error kind; anything else is a bad path.
fn upstream_setup_error(e: anyhow::Error) -> ApiError {
    match e.downcast::<oauth::Error>() {
        Ok(oauth_err) => ApiError::Auth(oauth_err),
        Err(other) => ApiError::Internal(other.to_string()),
    }
}

/// Separates the `account` parameter from the ones meant for the API.
/// The last `account` wins.
fn split_account_param(params: Vec<(String, String)>) -> (String, Vec<(String, String)>) {
    let mut account = String::new();
    let mut forwarded = Vec::with_capacity(params.len());
    for (key, value) in params {
        if key == "account" {
            account = value;
        } else {
            forwarded.push((key, value));
        }
    }
    (account, forwarded)
}
