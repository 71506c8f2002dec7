//! Account/connection collaborator
//!
//! Accounts describe which share a root points at. The provider only reads
//! them; creating and editing accounts happens elsewhere.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Connection details for one configured share
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    /// Display name, also the first component of every document id
    pub name: String,
    /// Server (or share location) the account connects to
    pub server: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
}

impl Account {
    /// Human summary for the root row, or `None` when it would repeat the name.
    ///
    /// `username@server` when a username is set, otherwise just the server.
    pub fn summary(&self) -> Option<String> {
        let summary = match self.username.as_deref() {
            Some(user) if !user.is_empty() => format!("{}@{}", user, self.server),
            _ => self.server.clone(),
        };

        if summary.eq_ignore_ascii_case(&self.name) {
            None
        } else {
            Some(summary)
        }
    }
}

/// Source of configured accounts
pub trait AccountSource: Send + Sync {
    fn list_accounts(&self) -> Vec<Account>;

    /// Find an account by name, ignoring ASCII case
    fn find_account(&self, name: &str) -> Option<Account> {
        self.list_accounts()
            .into_iter()
            .find(|account| account.name.eq_ignore_ascii_case(name))
    }
}

/// Accounts stored as a JSON array in a file.
///
/// The file is re-read on every call so edits made by the setup tooling show
/// up without restarting the daemon.
pub struct AccountsFile {
    path: PathBuf,
}

impl AccountsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn load(&self) -> Result<Vec<Account>> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "No accounts file, no roots to offer");
            return Ok(Vec::new());
        }
        let data = fs::read(&self.path)
            .with_context(|| format!("Failed to read accounts file: {:?}", self.path))?;
        let accounts: Vec<Account> = serde_json::from_slice(&data)
            .with_context(|| format!("Failed to parse accounts file: {:?}", self.path))?;
        Ok(accounts)
    }
}

impl AccountSource for AccountsFile {
    fn list_accounts(&self) -> Vec<Account> {
        match self.load() {
            Ok(accounts) => accounts,
            Err(e) => {
                warn!(error = %e, "Failed to load accounts");
                Vec::new()
            }
        }
    }
}

/// Fixed set of accounts, handy for embedding and tests
impl AccountSource for Vec<Account> {
    fn list_accounts(&self) -> Vec<Account> {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn account(name: &str, server: &str, username: Option<&str>) -> Account {
        Account {
            name: name.to_string(),
            server: server.to_string(),
            username: username.map(String::from),
            domain: None,
        }
    }

    #[test]
    fn test_summary_with_username() {
        let a = account("Home", "nas.local", Some("alice"));
        assert_eq!(a.summary(), Some("alice@nas.local".to_string()));
    }

    #[test]
    fn test_summary_without_username() {
        let a = account("Home", "nas.local", None);
        assert_eq!(a.summary(), Some("nas.local".to_string()));

        let empty_user = account("Home", "nas.local", Some(""));
        assert_eq!(empty_user.summary(), Some("nas.local".to_string()));
    }

    #[test]
    fn test_summary_omitted_when_equal_to_name() {
        let a = account("alice@NAS.local", "nas.local", Some("alice"));
        assert_eq!(a.summary(), None);
    }

    #[test]
    fn test_find_account_case_insensitive() {
        let accounts = vec![account("Home", "nas.local", None)];
        assert_eq!(accounts.find_account("home").unwrap().server, "nas.local");
        assert!(accounts.find_account("work").is_none());
    }

    #[test]
    fn test_accounts_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("accounts.json");

        let file = AccountsFile::new(&path);
        assert!(file.list_accounts().is_empty());

        fs::write(
            &path,
            r#"[{"name":"Home","server":"/mnt/home","username":"alice"},
                {"name":"Work","server":"/mnt/work","domain":"CORP"}]"#,
        )
        .unwrap();
        let accounts = file.list_accounts();
        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[0].username.as_deref(), Some("alice"));
        assert_eq!(accounts[1].domain.as_deref(), Some("CORP"));
        assert_eq!(accounts[1].username, None);

        fs::write(&path, "not json").unwrap();
        assert!(file.list_accounts().is_empty());
    }
}
