//! Fire-and-forget notification sinks.
//!
//! Notifications must never affect trading: every send swallows its own
//! errors, logs them, and returns whether delivery succeeded.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Severity of a notification, mapped to embed colors by the Discord sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

impl Severity {
    const fn color(self) -> u32 {
        match self {
            Self::Info => 0x0099_FF,
            Self::Success => 0x00FF_00,
            Self::Warning => 0xFFFF_00,
            Self::Error => 0xFF00_00,
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Sends a notification. Returns false on failure; never errors.
    async fn send(&self, severity: Severity, title: &str, message: &str) -> bool;
}

/// Discord webhook sink posting embed payloads.
pub struct DiscordNotifier {
    webhook_url: String,
    http: reqwest::Client,
}

impl DiscordNotifier {
    #[must_use]
    pub fn new(webhook_url: String) -> Self {
        Self {
            webhook_url,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn send(&self, severity: Severity, title: &str, message: &str) -> bool {
        let payload = json!({
            "embeds": [{
                "title": title,
                "description": message,
                "color": severity.color(),
                "timestamp": Utc::now().to_rfc3339(),
            }]
        });
        let result = self
            .http
            .post(&self.webhook_url)
            .json(&payload)
            .timeout(SEND_TIMEOUT)
            .send()
            .await;
        match result {
            Ok(response) if response.status().is_success() => {
                debug!(title, "notification sent");
                true
            }
            Ok(response) => {
                warn!(title, status = %response.status(), "webhook rejected notification");
                false
            }
            Err(err) => {
                warn!(title, %err, "notification failed");
                false
            }
        }
    }
}

/// Sink used when no webhook is configured. Logs and drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn send(&self, severity: Severity, title: &str, _message: &str) -> bool {
        debug!(?severity, title, "notification dropped (no sink configured)");
        false
    }
}

/// Picks the Discord sink when a webhook URL is configured, otherwise the
/// null sink.
#[must_use]
pub fn from_webhook(url: Option<String>) -> std::sync::Arc<dyn Notifier> {
    match url.filter(|u| !u.is_empty()) {
        Some(url) => std::sync::Arc::new(DiscordNotifier::new(url)),
        None => {
            warn!("notifications disabled (no webhook URL)");
            std::sync::Arc::new(NullNotifier)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_colors_are_distinct() {
        let colors = [
            Severity::Info.color(),
            Severity::Success.color(),
            Severity::Warning.color(),
            Severity::Error.color(),
        ];
        for (i, a) in colors.iter().enumerate() {
            for b in colors.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }

    #[tokio::test]
    async fn null_notifier_never_succeeds() {
        let sink = NullNotifier;
        assert!(!sink.send(Severity::Info, "t", "m").await);
    }

    #[tokio::test]
    async fn unreachable_webhook_fails_quietly() {
        let sink = DiscordNotifier::new("http://127.0.0.1:1/webhook".to_string());
        assert!(!sink.send(Severity::Error, "t", "m").await);
    }
}
