use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use tracing::debug;

use crate::platform;

/// Environment variable that redirects the configuration area.
///
/// Lets several isolated instances share one host.
pub const CONFIG_DIR_ENV: &str = "GBRIDGE_CONFIG_DIR";

/// Directory created under the home directory when no override is set.
pub const CONFIG_DIR_NAME: &str = ".gbridge";

/// Address the HTTP server binds to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Resolves the configuration root from the environment and the user's
/// home directory, creating it with owner-only permissions if absent.
pub fn resolve_config_root() -> io::Result<PathBuf> {
    resolve_config_root_from(std::env::var_os(CONFIG_DIR_ENV), dirs::home_dir())
}

/// Resolution rules behind [`resolve_config_root`].
///
/// A non-empty `override_dir` wins; otherwise `<home>/.gbridge` is used.
pub fn resolve_config_root_from(
    override_dir: Option<OsString>,
    home: Option<PathBuf>,
) -> io::Result<PathBuf> {
    let root = match override_dir.filter(|dir| !dir.is_empty()) {
        Some(dir) => PathBuf::from(dir),
        None => home
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("could not determine home directory; set {CONFIG_DIR_ENV}"),
                )
            })?
            .join(CONFIG_DIR_NAME),
    };

    platform::create_private_dir(&root)?;
    debug!("Using configuration area at {:?}", root);
    Ok(root)
}
