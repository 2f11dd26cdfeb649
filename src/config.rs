//! Configuration loading from TOML.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Every field carries a default so the pipeline runs with no config
//! file at all; the file only overrides what it names. Exchange
//! credentials never live here — they come from the secrets blob
//! (see `exchange::secrets`).

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AppConfig {
    pub exchange: ExchangeConfig,
    pub store: StoreConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ExchangeConfig {
    /// Certificate login endpoint (mutual-TLS host).
    pub identity_url: String,
    /// JSON-RPC betting API endpoint.
    pub betting_url: String,
    /// Path to the credentials blob on disk.
    pub secrets_file: String,
    /// Countries whose WIN markets are ingested.
    pub countries: Vec<String>,
    /// Attempts per exchange call before giving up.
    pub max_retries: u32,
    /// Base backoff in milliseconds (doubled per attempt, jittered).
    pub backoff_base_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database path.
    pub db_path: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PipelineConfig {
    /// Default learner window in days; the nightly run looks at
    /// yesterday, the weekly deep run passes `--window-days 7`.
    pub learning_window_days: i64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            identity_url: "https://identitysso-cert.betfair.com/api/certlogin".to_string(),
            betting_url: "https://api.betfair.com/exchange/betting/json-rpc/v1".to_string(),
            secrets_file: "betfair-creds.json".to_string(),
            countries: vec!["GB".to_string(), "IE".to_string()],
            max_retries: 4,
            backoff_base_ms: 500,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: "surebet.db".to_string(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            learning_window_days: 1,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            exchange: ExchangeConfig::default(),
            store: StoreConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file. A missing file yields the
    /// defaults; a present-but-invalid file is an error.
    pub fn load(path: &str) -> Result<Self> {
        if !Path::new(path).exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let cfg = AppConfig::load("does-not-exist.toml").unwrap();
        assert_eq!(cfg.exchange.countries, vec!["GB", "IE"]);
        assert_eq!(cfg.store.db_path, "surebet.db");
        assert_eq!(cfg.pipeline.learning_window_days, 1);
    }

    #[test]
    fn test_partial_override() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [store]
            db_path = "/tmp/races.db"

            [exchange]
            countries = ["GB"]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.store.db_path, "/tmp/races.db");
        assert_eq!(cfg.exchange.countries, vec!["GB"]);
        // Untouched sections keep their defaults.
        assert_eq!(cfg.exchange.max_retries, 4);
        assert!(cfg.exchange.identity_url.contains("identitysso-cert"));
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let err = toml::from_str::<AppConfig>("[exchange\n").is_err();
        assert!(err);
    }
}
