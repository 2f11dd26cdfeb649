//! Exchange credentials blob.
//!
//! Credentials live in a local JSON file alongside the client
//! certificate pair, never in config.toml or the environment. The
//! session token is cached back into the same file so consecutive
//! pipeline stages reuse one login.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Contents of `betfair-creds.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BetfairSecrets {
    pub username: String,
    pub password: String,
    pub app_key: String,
    /// PEM client certificate for the mutual-TLS login endpoint.
    pub cert_file: PathBuf,
    /// PEM private key matching `cert_file`.
    pub key_file: PathBuf,
    #[serde(default)]
    pub session_token: Option<String>,
    #[serde(default)]
    pub last_refresh: Option<DateTime<Utc>>,
}

impl BetfairSecrets {
    /// Load the blob from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read secrets file: {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse secrets file: {}", path.display()))
    }

    /// Persist the blob, preserving the cached session token.
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self)
            .context("Failed to serialize secrets")?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write secrets file: {}", path.display()))
    }

    /// Record a fresh session token.
    pub fn set_session_token(&mut self, token: String) {
        self.session_token = Some(token);
        self.last_refresh = Some(Utc::now());
    }

    /// Drop the cached token so the next call re-authenticates.
    pub fn invalidate(&mut self) {
        self.session_token = None;
    }
}
