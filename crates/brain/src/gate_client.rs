//! Signed HTTP client for the risk gate.
//!
//! Proposals are signed over their canonical JSON form and posted with the
//! signature in `X-GW-Signature`. The call budget is tight: a proposal that
//! cannot be delivered within two seconds is abandoned (the per-symbol
//! throttle prevents an instant retry). Heartbeat failures are logged and
//! swallowed; they must never stall proposal traffic.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use condor_core::signing;
use condor_core::types::Proposal;

const CALL_TIMEOUT: Duration = Duration::from_secs(2);

/// Where proposals go. Seam so the engine and position manager can be
/// exercised without a live gate.
#[async_trait]
pub trait ProposalSink: Send + Sync {
    async fn submit(&self, proposal: &mut Proposal) -> Result<GateResponse>;
}

/// Outcome of a proposal submission as seen by the brain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateResponse {
    Approved {
        order_id: String,
        proposal_id: String,
    },
    Rejected {
        reason: String,
    },
    /// The gate approved but the broker refused the order.
    ExecutionFailed {
        error: String,
    },
}

pub struct GateClient {
    base_url: String,
    secret: String,
    http: reqwest::Client,
}

impl GateClient {
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(base_url: &str, secret: &str) -> Result<Self> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            secret: secret.to_string(),
            http: reqwest::Client::builder()
                .build()
                .context("failed to build gate HTTP client")?,
        })
    }

    /// Assigns id/timestamp if missing, signs and posts the proposal.
    ///
    /// # Errors
    /// Returns an error on transport failure or an unrecognized response.
    pub async fn send_proposal(&self, proposal: &mut Proposal) -> Result<GateResponse> {
        if proposal.id.is_empty() {
            proposal.id = Uuid::new_v4().to_string();
        }
        if proposal.timestamp_ms == 0 {
            proposal.timestamp_ms = chrono::Utc::now().timestamp_millis();
        }
        proposal.signature = None;

        let canonical = signing::canonical_payload_of(proposal)?;
        let signature = signing::sign(&self.secret, &canonical);
        proposal.signature = Some(signature.clone());

        let response = self
            .http
            .post(format!("{}/v1/proposal", self.base_url))
            .header("X-GW-Signature", &signature)
            .header("X-GW-Timestamp", proposal.timestamp_ms.to_string())
            .json(proposal)
            .timeout(CALL_TIMEOUT)
            .send()
            .await
            .context("proposal delivery failed")?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .context("gate response was not JSON")?;

        match status.as_u16() {
            200 => {
                let order_id = body["order_id"]
                    .as_str()
                    .ok_or_else(|| anyhow!("approved response missing order_id"))?
                    .to_string();
                debug!(proposal_id = %proposal.id, %order_id, "proposal approved");
                Ok(GateResponse::Approved {
                    order_id,
                    proposal_id: proposal.id.clone(),
                })
            }
            403 => Ok(GateResponse::Rejected {
                reason: body["reason"]
                    .as_str()
                    .unwrap_or("rejected without reason")
                    .to_string(),
            }),
            500 => Ok(GateResponse::ExecutionFailed {
                error: body["error"].as_str().unwrap_or("execution failed").to_string(),
            }),
            other => Err(anyhow!("unexpected gate status {other}: {body}")),
        }
    }

    /// Posts a heartbeat with the brain state blob. Never propagates errors.
    pub async fn send_heartbeat(&self, state: &Value) {
        let result = self
            .http
            .post(format!("{}/v1/heartbeat", self.base_url))
            .json(&serde_json::json!({ "state": state }))
            .timeout(CALL_TIMEOUT)
            .send()
            .await;
        match result {
            Ok(response) if response.status().is_success() => {
                debug!("heartbeat delivered");
            }
            Ok(response) => warn!(status = %response.status(), "heartbeat rejected"),
            Err(err) => warn!(%err, "heartbeat failed"),
        }
    }
}

#[async_trait]
impl ProposalSink for GateClient {
    async fn submit(&self, proposal: &mut Proposal) -> Result<GateResponse> {
        self.send_proposal(proposal).await
    }
}
