//! Brain runtime configuration, read from the environment.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::path::PathBuf;

use condor_core::config::SizingParams;

#[derive(Debug, Clone)]
pub struct BrainConfig {
    pub symbols: Vec<String>,
    pub tradier_api_base: String,
    pub tradier_stream_session_url: String,
    pub tradier_ws_url: String,
    pub tradier_access_token: String,
    pub tradier_account_id: String,
    pub gate_url: String,
    pub api_secret: String,
    pub discord_webhook_url: Option<String>,
    pub positions_path: PathBuf,
    pub journal_path: PathBuf,
    /// Event days the regime classifier treats as EVENT_RISK.
    pub restricted_dates: Vec<NaiveDate>,
    /// Width in dollars between short and long strikes.
    pub spread_width: f64,
    pub sizing: SizingParams,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_required(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("{key} must be set"))
}

impl BrainConfig {
    /// Loads configuration from the environment.
    ///
    /// # Errors
    /// Returns an error when a required variable is missing or malformed.
    pub fn from_env() -> Result<Self> {
        let symbols = env_or("SYMBOLS", "SPY,QQQ,IWM,DIA")
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
        let restricted_dates = std::env::var("RESTRICTED_DATES")
            .unwrap_or_default()
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(|s| {
                NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                    .with_context(|| format!("bad RESTRICTED_DATES entry: {s}"))
            })
            .collect::<Result<Vec<_>>>()?;
        let spread_width = env_or("SPREAD_WIDTH", "2.0")
            .parse::<f64>()
            .context("SPREAD_WIDTH must be a number")?;

        Ok(Self {
            symbols,
            tradier_api_base: env_or("TRADIER_API_BASE", "https://api.tradier.com/v1"),
            tradier_stream_session_url: env_or(
                "TRADIER_STREAM_SESSION_URL",
                "https://api.tradier.com/v1/markets/events/session",
            ),
            tradier_ws_url: env_or("TRADIER_WS_URL", "wss://ws.tradier.com/v1/markets/events"),
            tradier_access_token: env_required("TRADIER_ACCESS_TOKEN")?,
            tradier_account_id: env_required("TRADIER_ACCOUNT_ID")?,
            gate_url: env_required("GATE_URL")?,
            api_secret: env_required("API_SECRET")?,
            discord_webhook_url: std::env::var("DISCORD_WEBHOOK_URL").ok(),
            positions_path: PathBuf::from(env_or("POSITIONS_PATH", "positions.json")),
            journal_path: PathBuf::from(env_or("JOURNAL_PATH", "journal.json")),
            restricted_dates,
            spread_width,
            sizing: SizingParams::default(),
        })
    }
}
