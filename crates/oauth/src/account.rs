//! Account identifiers
//!
//! An account name becomes a directory under `accounts/`, so it is checked
//! before any path is built from it. The checks are platform independent:
//! both separators are rejected everywhere.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Identity under which Google APIs are called, usually an email address.
///
/// Holding an `Account` proves the name passed [`validate_account_name`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Account(String);

impl Account {
    /// Validates `name` and wraps it.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate_account_name(&name)?;
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Rejects names that are empty or could escape the accounts directory.
pub fn validate_account_name(name: &str) -> Result<()> {
    let reason = if name.is_empty() {
        "must not be empty"
    } else if name == "." {
        "must not be '.'"
    } else if name.contains("..") {
        "must not contain '..'"
    } else if name.contains('/') || name.contains('\\') {
        "must not contain path separators"
    } else if name.contains('\0') {
        "must not contain NUL"
    } else {
        return Ok(());
    };

    Err(Error::Validation {
        account: name.to_string(),
        reason,
    })
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Account {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for Account {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for Account {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Account> for String {
    fn from(account: Account) -> Self {
        account.0
    }
}
