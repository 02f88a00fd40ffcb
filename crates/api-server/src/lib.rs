//! gbridge server library
//!
//! HTTP surface and CLI over the `oauth` crate: resolves the account named
//! by each request and forwards it to the matching Google API.

pub mod cli;
pub mod error;
pub mod routes;
pub mod server;
pub mod services;
pub mod state;

pub use error::ApiError;
pub use server::{create_router, run_server_blocking, start_server, ServerHandle};
pub use services::{ApiClient, GoogleApi, GoogleServiceFactory, GoogleServices};
pub use state::AppState;
