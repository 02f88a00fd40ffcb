//! Helpers shared by this crate's unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::Form;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::Value;

use crate::secrets::ClientSecrets;

/// A throwaway token endpoint on an ephemeral loopback port that answers
/// every request with a fixed status and body.
pub struct MockTokenEndpoint {
    pub url: String,
    hits: Arc<AtomicUsize>,
    last_form: Arc<Mutex<Option<HashMap<String, String>>>>,
}

impl MockTokenEndpoint {
    pub async fn spawn(status: StatusCode, body: Value) -> Self {
        let hits = Arc::new(AtomicUsize::new(0));
        let last_form = Arc::new(Mutex::new(None));

        let app = Router::new().route(
            "/token",
            post({
                let hits = hits.clone();
                let last_form = last_form.clone();
                move |Form(form): Form<HashMap<String, String>>| {
                    let hits = hits.clone();
                    let last_form = last_form.clone();
                    let body = body.clone();
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        *last_form.lock().unwrap() = Some(form);
                        (status, Json(body))
                    }
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: format!("http://{addr}/token"),
            hits,
            last_form,
        }
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn last_form(&self) -> Option<HashMap<String, String>> {
        self.last_form.lock().unwrap().clone()
    }
}

/// Client secrets document whose token endpoint is `token_url`
pub fn test_secrets_json(token_url: &str) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "installed": {
            "client_id": "test-client.apps.googleusercontent.com",
            "client_secret": "test-secret",
            "auth_uri": "https://accounts.example.com/o/oauth2/auth",
            "token_uri": token_url,
            "redirect_uris": ["http://localhost"]
        }
    }))
    .unwrap()
}

pub fn test_secrets(token_url: &str) -> ClientSecrets {
    ClientSecrets::from_json(&test_secrets_json(token_url)).unwrap()
}
