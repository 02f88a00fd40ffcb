//! Command-line interface for the `gbridge` binary

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use common::config::{CONFIG_DIR_ENV, ServerConfig};
use oauth::constants::OAUTH_CALLBACK_PORT;
use oauth::{
    Account, CredentialStore, LoginFlow, LoginOptions, RefreshPolicy, Registry, RegistryOptions,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::server::run_server_blocking;
use crate::services::GoogleServiceFactory;
use crate::state::AppState;

#[derive(Debug, Parser)]
#[command(name = "gbridge", version, about = "Authenticated Google API access for one or more accounts")]
pub struct Cli {
    /// Configuration directory (defaults to ~/.gbridge)
    #[arg(long, env = CONFIG_DIR_ENV, global = true)]
    pub config_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP server (the default)
    Serve(ServeArgs),
    /// Manage account credentials
    #[command(subcommand)]
    Auth(AuthCommand),
}

#[derive(Debug, Parser)]
pub struct ServeArgs {
    /// Address to bind
    #[arg(long, env = "GBRIDGE_HOST", default_value = "127.0.0.1")]
    pub host: String,
    /// Port to bind
    #[arg(long, env = "GBRIDGE_PORT", default_value_t = 8080)]
    pub port: u16,
    /// Write silently refreshed tokens back to disk
    #[arg(long, env = "GBRIDGE_PERSIST_REFRESHED_TOKENS")]
    pub persist_refreshed_tokens: bool,
}

impl ServeArgs {
    /// Arguments used when no subcommand is given, still honoring env vars
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self::try_parse_from(["gbridge"])?)
    }
}

#[derive(Debug, Subcommand)]
pub enum AuthCommand {
    /// Authorize an account in the browser and store its token
    Login(LoginArgs),
    /// Show the storage mode and configured accounts
    List,
    /// Remove an account's stored credentials
    Logout(LogoutArgs),
}

#[derive(Debug, Args)]
pub struct LoginArgs {
    /// Client secrets JSON downloaded from the Google Cloud console
    #[arg(long)]
    pub secrets: PathBuf,
    /// Account (usually an email); omit for single-account setups
    #[arg(long)]
    pub account: Option<String>,
    /// Loopback port for the OAuth redirect
    #[arg(long, default_value_t = OAUTH_CALLBACK_PORT)]
    pub port: u16,
    /// Give up if no redirect arrives in this many seconds
    #[arg(long, default_value_t = 300)]
    pub timeout_secs: u64,
}

#[derive(Debug, Args)]
pub struct LogoutArgs {
    #[arg(long)]
    pub account: String,
}

impl Cli {
    fn store(&self) -> anyhow::Result<CredentialStore> {
        let store = match self.config_dir.as_ref().filter(|dir| !dir.as_os_str().is_empty()) {
            Some(dir) => CredentialStore::at(dir)?,
            None => CredentialStore::open()?,
        };
        Ok(store)
    }
}

/// Runs the parsed command to completion
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let store = cli.store()?;
    let command = match cli.command {
        Some(command) => command,
        None => Command::Serve(ServeArgs::from_env()?),
    };

    match command {
        Command::Serve(args) => serve(store, args).await,
        Command::Auth(AuthCommand::Login(args)) => login(store, args).await,
        Command::Auth(AuthCommand::List) => list(&store),
        Command::Auth(AuthCommand::Logout(args)) => logout(&store, &args.account),
    }
}

async fn serve(store: CredentialStore, args: ServeArgs) -> anyhow::Result<()> {
    let refresh_policy = if args.persist_refreshed_tokens {
        RefreshPolicy::Persist
    } else {
        RefreshPolicy::InMemory
    };
    let options = RegistryOptions {
        refresh_policy,
        ..RegistryOptions::default()
    };
    let factory = GoogleServiceFactory::new(options.http.clone());

    let registry = Registry::from_store(
        store.clone(),
        factory,
        oauth::constants::default_scopes(),
        options,
    )
    .await?;
    info!(
        "Account mode: {}",
        if registry.is_multi_account() { "multi-account" } else { "legacy" }
    );

    let config = ServerConfig {
        host: args.host,
        port: args.port,
    };
    run_server_blocking(AppState::new(registry, store), &config).await
}

async fn login(store: CredentialStore, args: LoginArgs) -> anyhow::Result<()> {
    let account = args.account.as_deref().map(Account::new).transpose()?;
    let secrets = std::fs::read(&args.secrets)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", args.secrets.display()))?;

    let options = LoginOptions {
        port: args.port,
        ..LoginOptions::default()
    };
    let pending = LoginFlow::new(&secrets, oauth::constants::default_scopes(), options)?
        .start()
        .await?;

    println!("Open this URL in your browser to authorize gbridge:\n");
    println!("{}\n", pending.authorization_url());
    println!("Waiting for the redirect on {} ...", pending.redirect_uri());

    let cancel = CancellationToken::new();
    let watchdog = tokio::spawn({
        let cancel = cancel.clone();
        let timeout = Duration::from_secs(args.timeout_secs);
        async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => warn!("Interrupted, cancelling login"),
                _ = tokio::time::sleep(timeout) => warn!("No redirect after {:?}, cancelling login", timeout),
                _ = cancel.cancelled() => return,
            }
            cancel.cancel();
        }
    });

    let result = pending.complete(&store, account.as_ref(), cancel.clone()).await;
    cancel.cancel();
    let _ = watchdog.await;
    result?;

    store.save_secrets(account.as_ref(), &args.secrets)?;

    match &account {
        Some(account) => println!("Logged in as {account}. Credentials saved in {}", store.root().display()),
        None => println!("Logged in. Credentials saved in {}", store.root().display()),
    }
    Ok(())
}

fn list(store: &CredentialStore) -> anyhow::Result<()> {
    let accounts = store.list_accounts()?;
    if !accounts.is_empty() {
        println!("Mode: multi-account");
        for account in accounts {
            println!("  {account}");
        }
    } else if store.load_token(None).is_ok() {
        println!("Mode: legacy (single account)");
    } else {
        println!("No accounts configured. Run: {}", oauth::constants::LOGIN_COMMAND);
    }
    Ok(())
}

fn logout(store: &CredentialStore, account: &str) -> anyhow::Result<()> {
    let account = Account::new(account)?;
    if store.remove_account(&account)? {
        println!("Removed {account}");
    } else {
        println!("No stored credentials for {account}");
    }
    Ok(())
}
