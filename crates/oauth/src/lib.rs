//! Google OAuth 2.0 credential lifecycle for gbridge
//!
//! This crate turns user consent into durable tokens ([`LoginFlow`]), keeps
//! them on disk per account ([`CredentialStore`]), and resolves an account
//! name to a lazily built, cached bundle of API clients ([`Registry`]).

pub mod account;
pub mod constants;
pub mod error;
pub mod flow;
pub mod registry;
pub mod secrets;
pub mod source;
pub mod storage;
pub mod tokens;

#[cfg(test)]
pub(crate) mod test_support;

pub use account::Account;
pub use error::{Error, ErrorKind, Result};
pub use flow::{LoginFlow, LoginOptions, PendingLogin};
pub use registry::{authorize, Authorization, Registry, RegistryOptions, ServiceFactory};
pub use secrets::ClientSecrets;
pub use source::{RefreshPolicy, TokenSource};
pub use storage::CredentialStore;
pub use tokens::Token;
