//! OAuth 2.0 Authorization Code flow with PKCE
//!
//! Implements the interactive login for desktop use:
//! 1. Parse client secrets, generate the state token and PKCE pair
//! 2. Bind a callback listener on the loopback interface
//! 3. Wait for the provider's redirect and validate it
//! 4. Exchange the authorization code for a token and persist it
//!
//! The callback port is fixed by default, so a second concurrent login in
//! the same host fails at bind time.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::{
    extract::Query,
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::get,
    Router,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::Rng;
use sha2::{Digest, Sha256};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::account::Account;
use crate::constants::{CALLBACK_SHUTDOWN_GRACE, OAUTH_CALLBACK_PATH, OAUTH_CALLBACK_PORT};
use crate::error::{Error, Result};
use crate::secrets::ClientSecrets;
use crate::storage::CredentialStore;
use crate::tokens::{self, Token};

/// Generates a cryptographically secure state parameter (256 bits)
fn generate_state() -> String {
    let bytes: [u8; 32] = rand::thread_rng().gen();
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Generates PKCE code verifier and challenge
///
/// Returns (verifier, challenge) tuple
fn generate_pkce() -> (String, String) {
    let verifier: [u8; 32] = rand::thread_rng().gen();
    let verifier_str = URL_SAFE_NO_PAD.encode(verifier);

    let mut hasher = Sha256::new();
    hasher.update(verifier_str.as_bytes());
    let challenge = URL_SAFE_NO_PAD.encode(hasher.finalize());

    (verifier_str, challenge)
}

/// Tunables for [`LoginFlow`]
#[derive(Debug, Clone)]
pub struct LoginOptions {
    /// Loopback port for the callback listener; `0` picks a free port
    pub port: u16,
    /// Client used for the code exchange
    pub http: reqwest::Client,
}

impl Default for LoginOptions {
    fn default() -> Self {
        Self {
            port: OAUTH_CALLBACK_PORT,
            http: reqwest::Client::new(),
        }
    }
}

/// A login that has not started listening yet
pub struct LoginFlow {
    secrets: ClientSecrets,
    scopes: Vec<String>,
    options: LoginOptions,
    state: String,
    code_verifier: String,
    code_challenge: String,
}

impl LoginFlow {
    /// Creates a new flow from the raw client secrets document with fresh
    /// state and PKCE parameters
    pub fn new(client_secrets: &[u8], scopes: Vec<String>, options: LoginOptions) -> Result<Self> {
        let secrets = ClientSecrets::from_json(client_secrets)?;
        let (verifier, challenge) = generate_pkce();

        Ok(Self {
            secrets,
            scopes,
            options,
            state: generate_state(),
            code_verifier: verifier,
            code_challenge: challenge,
        })
    }

    /// Binds the callback listener on 127.0.0.1 and starts serving it.
    pub async fn start(self) -> Result<PendingLogin> {
        let bind_addr = SocketAddr::from((Ipv4Addr::LOCALHOST, self.options.port));
        let listener = tokio::net::TcpListener::bind(bind_addr)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AddrInUse => Error::AddressInUse { addr: bind_addr },
                _ => Error::CallbackListener(format!("failed to bind {bind_addr}: {e}")),
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| Error::CallbackListener(e.to_string()))?;

        let redirect_uri = format!("http://{}{}", local_addr, OAUTH_CALLBACK_PATH);

        let (tx, rx) = oneshot::channel::<Result<String>>();
        let app = callback_router(self.state.clone(), tx);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = result {
                error!("OAuth callback server error: {}", e);
            }
        });

        info!("OAuth callback server listening on {}", local_addr);

        Ok(PendingLogin {
            flow: self,
            redirect_uri,
            local_addr,
            code_rx: rx,
            shutdown_tx,
            server,
        })
    }
}

/// A login waiting for the provider's redirect
pub struct PendingLogin {
    flow: LoginFlow,
    redirect_uri: String,
    local_addr: SocketAddr,
    code_rx: oneshot::Receiver<Result<String>>,
    shutdown_tx: oneshot::Sender<()>,
    server: JoinHandle<()>,
}

impl PendingLogin {
    /// Returns the authorization URL the user should open in a browser
    pub fn authorization_url(&self) -> String {
        self.flow.secrets.authorization_url(
            &self.flow.scopes,
            &self.redirect_uri,
            &self.flow.state,
            &self.flow.code_challenge,
        )
    }

    /// Address the callback listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Waits for the redirect, exchanges the code, and saves the token for
    /// `account` (`None` for the legacy slot).
    ///
    /// If `cancel` fires before the token is saved, including while the code
    /// exchange is in flight, the flow fails with [`Error::Cancelled`] and
    /// nothing is written. The listener is shut
    /// down on every path.
    pub async fn complete(
        self,
        store: &CredentialStore,
        account: Option<&Account>,
        cancel: CancellationToken,
    ) -> Result<Token> {
        let PendingLogin {
            flow,
            redirect_uri,
            code_rx,
            shutdown_tx,
            server,
            ..
        } = self;

        let received = tokio::select! {
            result = code_rx => result.unwrap_or_else(|_| {
                Err(Error::CallbackListener("listener stopped before a redirect arrived".to_string()))
            }),
            _ = cancel.cancelled() => Err(Error::Cancelled),
        };

        let result = match received {
            Ok(code) => tokio::select! {
                result = exchange_and_save(&flow, &code, &redirect_uri, store, account) => result,
                _ = cancel.cancelled() => Err(Error::Cancelled),
            },
            Err(e) => Err(e),
        };

        shutdown(shutdown_tx, server, &cancel).await;
        result
    }
}

async fn exchange_and_save(
    flow: &LoginFlow,
    code: &str,
    redirect_uri: &str,
    store: &CredentialStore,
    account: Option<&Account>,
) -> Result<Token> {
    let token = tokens::exchange_code(
        &flow.options.http,
        &flow.secrets,
        code,
        &flow.code_verifier,
        redirect_uri,
    )
    .await?;

    if token.refresh_token.is_none() {
        warn!("Provider issued no refresh token; the login will stop working when the access token expires");
    }

    store.save_token(account, &token)?;
    Ok(token)
}

/// Signals graceful shutdown and waits for the server, bounded by the
/// caller's cancellation and a fixed grace period.
async fn shutdown(shutdown_tx: oneshot::Sender<()>, server: JoinHandle<()>, cancel: &CancellationToken) {
    let _ = shutdown_tx.send(());
    let abort = server.abort_handle();

    tokio::select! {
        _ = server => {}
        _ = cancel.cancelled() => abort.abort(),
        _ = tokio::time::sleep(CALLBACK_SHUTDOWN_GRACE) => {
            warn!("OAuth callback server did not stop in time, aborting");
            abort.abort();
        }
    }
}

/// Query parameters from OAuth callback
#[derive(serde::Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

type CodeSender = Arc<Mutex<Option<oneshot::Sender<Result<String>>>>>;

fn callback_router(expected_state: String, tx: oneshot::Sender<Result<String>>) -> Router {
    let tx: CodeSender = Arc::new(Mutex::new(Some(tx)));

    Router::new().route(
        OAUTH_CALLBACK_PATH,
        get(move |Query(params): Query<CallbackParams>| {
            let tx = tx.clone();
            let expected_state = expected_state.clone();
            async move {
                let outcome = validate_callback(&expected_state, params);
                let page = match &outcome {
                    Ok(_) => {
                        info!("OAuth callback received successfully");
                        (StatusCode::OK, Html(SUCCESS_HTML))
                    }
                    Err(e) => {
                        warn!("Rejected OAuth callback: {}", e);
                        (StatusCode::BAD_REQUEST, Html(ERROR_HTML))
                    }
                };

                // Only the first callback decides the outcome
                if let Some(tx) = tx.lock().await.take() {
                    let _ = tx.send(outcome);
                }

                page.into_response()
            }
        }),
    )
}

fn validate_callback(expected_state: &str, params: CallbackParams) -> Result<String> {
    if params.state.as_deref() != Some(expected_state) {
        return Err(Error::CsrfMismatch);
    }

    if let Some(error) = params.error {
        return Err(Error::AccessDenied(error));
    }

    match params.code {
        Some(code) if !code.is_empty() => Ok(code),
        _ => Err(Error::MissingCode),
    }
}

/// HTML shown on successful OAuth callback
const SUCCESS_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>gbridge - Login Successful</title>
    <style>
        body {
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            display: flex;
            justify-content: center;
            align-items: center;
            height: 100vh;
            margin: 0;
        }
        .container { text-align: center; padding: 40px; }
        h1 { margin: 0 0 10px 0; }
    </style>
</head>
<body>
    <div class="container">
        <h1>Login Successful!</h1>
        <p>You can close this window and return to the terminal.</p>
    </div>
</body>
</html>"#;

/// HTML shown on OAuth error
const ERROR_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>gbridge - Login Failed</title>
    <style>
        body {
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            display: flex;
            justify-content: center;
            align-items: center;
            height: 100vh;
            margin: 0;
        }
        .container { text-align: center; padding: 40px; }
        h1 { margin: 0 0 10px 0; }
    </style>
</head>
<body>
    <div class="container">
        <h1>Login Failed</h1>
        <p>An error occurred during authentication. Please try again.</p>
    </div>
</body>
</html>"#;
