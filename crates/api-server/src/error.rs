//! HTTP error envelope
//!
//! Every failure leaves the server as
//! `{"error": {"code": "...", "message": "...", "accounts": [...]}}`, where
//! `code` is stable and `accounts` only appears for ambiguous requests.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use oauth::ErrorKind;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

/// Top-level error response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Error body with machine-readable code and human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accounts: Option<Vec<String>>,
}

/// Errors returned by request handlers
#[derive(Debug)]
pub enum ApiError {
    /// Account resolution or authorization failed
    Auth(oauth::Error),
    UnknownService(String),
    /// The proxied path does not stay under the API's base URL
    InvalidPath(String),
    /// The Google API could not be reached
    Upstream(String),
    Internal(String),
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Auth(e) => e.kind().as_str(),
            Self::UnknownService(_) => "UNKNOWN_SERVICE",
            Self::InvalidPath(_) => "INVALID_PATH",
            Self::Upstream(_) => "UPSTREAM_ERROR",
            Self::Internal(_) => "INTERNAL",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Auth(e) => status_for_kind(e.kind()),
            Self::UnknownService(_) => StatusCode::NOT_FOUND,
            Self::InvalidPath(_) => StatusCode::BAD_REQUEST,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn to_error_body(&self) -> ErrorBody {
        let (message, accounts) = match self {
            Self::Auth(e) => (e.to_string(), e.candidate_accounts().map(<[String]>::to_vec)),
            Self::UnknownService(name) => (format!("unknown service: {name}"), None),
            Self::InvalidPath(message) | Self::Upstream(message) | Self::Internal(message) => {
                (message.clone(), None)
            }
        };
        ErrorBody {
            code: self.code().to_owned(),
            message,
            accounts,
        }
    }
}

fn status_for_kind(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation | ErrorKind::AmbiguousAccount => StatusCode::BAD_REQUEST,
        ErrorKind::NoAccountsConfigured | ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Auth | ErrorKind::TokenRefresh | ErrorKind::TokenExchange => {
            StatusCode::UNAUTHORIZED
        }
        ErrorKind::ServiceInit => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<oauth::Error> for ApiError {
    fn from(e: oauth::Error) -> Self {
        Self::Auth(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorResponse {
            error: self.to_error_body(),
        };
        if status.is_server_error() {
            error!("{}: {}", body.error.code, body.error.message);
        } else {
            warn!("{}: {}", body.error.code, body.error.message);
        }
        (status, Json(body)).into_response()
    }
}
