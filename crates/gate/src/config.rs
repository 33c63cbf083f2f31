//! Gate runtime configuration, read from the environment. The constitution
//! itself comes from a JSON file so risk rules live under version control,
//! not in shell profiles.

use anyhow::{Context, Result};
use std::path::PathBuf;

use condor_core::config::Constitution;

#[derive(Debug, Clone)]
pub struct GateConfig {
    pub bind_addr: String,
    pub api_secret: String,
    pub database_url: Option<String>,
    pub constitution_path: Option<PathBuf>,
    pub tradier_api_base: String,
    pub tradier_access_token: String,
    pub tradier_account_id: String,
    pub discord_webhook_url: Option<String>,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_required(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("{key} must be set"))
}

impl GateConfig {
    /// # Errors
    /// Returns an error when a required variable is missing.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            bind_addr: env_or("GATE_BIND_ADDR", "0.0.0.0:8787"),
            api_secret: env_required("API_SECRET")?,
            database_url: std::env::var("DATABASE_URL").ok(),
            constitution_path: std::env::var("CONSTITUTION_PATH").ok().map(PathBuf::from),
            tradier_api_base: env_or("TRADIER_API_BASE", "https://api.tradier.com/v1"),
            tradier_access_token: env_required("TRADIER_ACCESS_TOKEN")?,
            tradier_account_id: env_required("TRADIER_ACCOUNT_ID")?,
            discord_webhook_url: std::env::var("DISCORD_WEBHOOK_URL").ok(),
        })
    }

    /// Loads the constitution from disk, or the defaults when no path is
    /// configured.
    ///
    /// # Errors
    /// Returns an error when the file exists but cannot be parsed.
    pub fn load_constitution(&self) -> Result<Constitution> {
        match &self.constitution_path {
            Some(path) => {
                let bytes = std::fs::read(path)
                    .with_context(|| format!("cannot read constitution at {}", path.display()))?;
                serde_json::from_slice(&bytes)
                    .with_context(|| format!("invalid constitution at {}", path.display()))
            }
            None => Ok(Constitution::default()),
        }
    }
}
