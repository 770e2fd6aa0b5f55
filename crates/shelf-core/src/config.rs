//! Configuration from `SHELF_*` environment variables.
//!
//! Unset or empty keys fall back to defaults; values that are set but do
//! not parse are a [`ConfigError`].

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Vault, git and sync settings loaded from `SHELF_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Directory holding `reading.md` and the git working copy
    pub vault_path: PathBuf,
    /// Remote to clone from and push to; `None` keeps the vault local
    pub vault_repo: Option<String>,
    pub ssh_key_path: PathBuf,
    pub git_user_name: String,
    pub git_user_email: String,
    /// Pull before every foreground operation
    pub auto_sync: bool,
    /// Commit and push after every foreground write
    pub auto_commit: bool,
    pub sync_interval: Duration,
    pub commit_message: String,
    /// Upper bound on any single git invocation
    pub git_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            vault_path: PathBuf::from("./vault"),
            vault_repo: None,
            ssh_key_path: expand_tilde("~/.ssh/id_rsa"),
            git_user_name: "Shelf".to_string(),
            git_user_email: "shelf@local".to_string(),
            auto_sync: true,
            auto_commit: true,
            sync_interval: Duration::from_secs(300),
            commit_message: "Update reading list".to_string(),
            git_timeout: Duration::from_secs(60),
        }
    }
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// Recognised variables (all optional):
    /// - `SHELF_VAULT_PATH`: vault directory (supports ~ for home directory)
    /// - `SHELF_VAULT_REPO`: git remote URL
    /// - `SHELF_SSH_KEY_PATH`: private key used for remote access
    /// - `SHELF_GIT_USER_NAME`, `SHELF_GIT_USER_EMAIL`: commit identity
    /// - `SHELF_AUTO_SYNC`, `SHELF_AUTO_COMMIT`: booleans
    /// - `SHELF_SYNC_INTERVAL`, `SHELF_GIT_TIMEOUT`: seconds, or a number with an `s`/`m`/`h` suffix
    /// - `SHELF_COMMIT_MESSAGE`: message for foreground commits
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`. Empty values count as unset.
    pub fn from_lookup<L>(lookup: L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        Ok(Self {
            vault_path: get("SHELF_VAULT_PATH")
                .map(|p| expand_tilde(&p))
                .unwrap_or(defaults.vault_path),
            vault_repo: get("SHELF_VAULT_REPO"),
            ssh_key_path: get("SHELF_SSH_KEY_PATH")
                .map(|p| expand_tilde(&p))
                .unwrap_or(defaults.ssh_key_path),
            git_user_name: get("SHELF_GIT_USER_NAME").unwrap_or(defaults.git_user_name),
            git_user_email: get("SHELF_GIT_USER_EMAIL").unwrap_or(defaults.git_user_email),
            auto_sync: get("SHELF_AUTO_SYNC")
                .map(|v| parse_bool("SHELF_AUTO_SYNC", &v))
                .transpose()?
                .unwrap_or(defaults.auto_sync),
            auto_commit: get("SHELF_AUTO_COMMIT")
                .map(|v| parse_bool("SHELF_AUTO_COMMIT", &v))
                .transpose()?
                .unwrap_or(defaults.auto_commit),
            sync_interval: get("SHELF_SYNC_INTERVAL")
                .map(|v| parse_duration("SHELF_SYNC_INTERVAL", &v))
                .transpose()?
                .unwrap_or(defaults.sync_interval),
            commit_message: get("SHELF_COMMIT_MESSAGE").unwrap_or(defaults.commit_message),
            git_timeout: get("SHELF_GIT_TIMEOUT")
                .map(|v| parse_duration("SHELF_GIT_TIMEOUT", &v))
                .transpose()?
                .unwrap_or(defaults.git_timeout),
        })
    }
}

/// Expand ~ or ~/ prefix to the user's home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"))
    } else if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path))
    } else {
        PathBuf::from(path)
    }
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "t" | "true" | "yes" | "on" => Ok(true),
        "0" | "f" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            key,
            value: value.to_string(),
        }),
    }
}

fn parse_duration(key: &'static str, value: &str) -> Result<Duration, ConfigError> {
    let invalid = || ConfigError::InvalidDuration {
        key,
        value: value.to_string(),
    };

    let trimmed = value.trim();
    let (number, multiplier) = match trimmed.char_indices().last() {
        Some((i, 's')) => (&trimmed[..i], 1),
        Some((i, 'm')) => (&trimmed[..i], 60),
        Some((i, 'h')) => (&trimmed[..i], 3600),
        _ => (trimmed, 1),
    };

    let secs: u64 = number.trim().parse().map_err(|_| invalid())?;
    if secs == 0 {
        return Err(invalid());
    }
    secs.checked_mul(multiplier)
        .map(Duration::from_secs)
        .ok_or_else(invalid)
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} must be a boolean, got '{value}'")]
    InvalidBool { key: &'static str, value: String },

    #[error("{key} must be a positive duration in seconds, got '{value}'")]
    InvalidDuration { key: &'static str, value: String },
}
