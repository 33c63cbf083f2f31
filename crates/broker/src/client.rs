//! Tradier-style REST client.
//!
//! The quote/chain endpoints return `{"quotes": {"quote": ...}}` shapes where
//! the inner value is a single object for one result and an array for many;
//! `one_or_many` normalizes both. All reads carry a 5 s timeout, order writes
//! 10 s.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use condor_core::types::{Candle, OptionType};

use crate::api::BrokerApi;
use crate::multileg::MultilegOrder;
use crate::types::{
    Balances, BrokerPosition, Greeks, OptionContract, OrderAck, OrderStatus, Quote,
};

const READ_TIMEOUT: Duration = Duration::from_secs(5);
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct TradierConfig {
    pub api_base: String,
    pub stream_session_url: String,
    pub access_token: String,
    pub account_id: String,
}

pub struct TradierClient {
    http: reqwest::Client,
    cfg: TradierConfig,
}

impl TradierClient {
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(cfg: TradierConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { http, cfg })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.cfg.api_base.trim_end_matches('/'))
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let response = self
            .http
            .get(self.url(path))
            .bearer_auth(&self.cfg.access_token)
            .header("Accept", "application/json")
            .query(query)
            .timeout(READ_TIMEOUT)
            .send()
            .await
            .with_context(|| format!("GET {path} failed"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("GET {path} returned {status}: {body}"));
        }
        response
            .json()
            .await
            .with_context(|| format!("GET {path} returned invalid JSON"))
    }

    /// Creates a streaming session and returns the opaque session id.
    ///
    /// # Errors
    /// Returns an error on HTTP failure or when the response carries no
    /// session id.
    pub async fn create_stream_session(&self) -> Result<String> {
        let response = self
            .http
            .post(&self.cfg.stream_session_url)
            .bearer_auth(&self.cfg.access_token)
            .header("Accept", "application/json")
            .timeout(READ_TIMEOUT)
            .send()
            .await
            .context("stream session request failed")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("stream session returned {status}: {body}"));
        }
        let value: Value = response.json().await?;
        let session_id = value["stream"]["sessionid"]
            .as_str()
            .ok_or_else(|| anyhow!("no sessionid in stream session response"))?;
        debug!(prefix = &session_id[..session_id.len().min(8)], "stream session created");
        Ok(session_id.to_string())
    }
}

/// Normalizes the broker's single-object-or-array convention.
fn one_or_many(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().collect(),
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

fn dec_field(value: &Value, key: &str) -> Decimal {
    value
        .get(key)
        .and_then(Value::as_f64)
        .and_then(Decimal::from_f64)
        .unwrap_or_default()
}

fn greeks_field(value: &Value) -> Option<Greeks> {
    let g = value.get("greeks")?;
    if g.is_null() {
        return None;
    }
    Some(Greeks {
        delta: g["delta"].as_f64().unwrap_or(0.0),
        gamma: g["gamma"].as_f64().unwrap_or(0.0),
        theta: g["theta"].as_f64().unwrap_or(0.0),
        vega: g["vega"].as_f64().unwrap_or(0.0),
        mid_iv: g["mid_iv"].as_f64().unwrap_or(0.0),
    })
}

fn parse_quote(value: &Value) -> Option<Quote> {
    let symbol = value["symbol"].as_str()?.to_string();
    Some(Quote {
        symbol,
        bid: dec_field(value, "bid"),
        ask: dec_field(value, "ask"),
        last: value["last"].as_f64().and_then(Decimal::from_f64),
        greeks: greeks_field(value),
    })
}

fn parse_contract(value: &Value) -> Option<OptionContract> {
    let symbol = value["symbol"].as_str()?.to_string();
    let option_type = match value["option_type"].as_str()? {
        t if t.eq_ignore_ascii_case("put") => OptionType::Put,
        t if t.eq_ignore_ascii_case("call") => OptionType::Call,
        _ => return None,
    };
    let expiration =
        NaiveDate::parse_from_str(value["expiration_date"].as_str()?, "%Y-%m-%d").ok()?;
    Some(OptionContract {
        symbol,
        strike: dec_field(value, "strike"),
        option_type,
        expiration,
        bid: dec_field(value, "bid"),
        ask: dec_field(value, "ask"),
        greeks: greeks_field(value),
    })
}

fn parse_candle(value: &Value) -> Option<Candle> {
    let ts = if let Some(s) = value["time"].as_str() {
        chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
            .ok()?
            .and_utc()
    } else {
        Utc.timestamp_opt(value["timestamp"].as_i64()?, 0).single()?
    };
    Some(Candle {
        open_time: ts,
        open: value["open"].as_f64()?,
        high: value["high"].as_f64()?,
        low: value["low"].as_f64()?,
        close: value["close"].as_f64()?,
        volume: value["volume"].as_u64().unwrap_or(0),
    })
}

#[async_trait]
impl BrokerApi for TradierClient {
    async fn quotes(&self, symbols: &[String]) -> Result<Vec<Quote>> {
        let joined = symbols.join(",");
        let value = self
            .get_json("/markets/quotes", &[("symbols", joined), ("greeks", "true".to_string())])
            .await?;
        Ok(one_or_many(&value["quotes"]["quote"])
            .into_iter()
            .filter_map(parse_quote)
            .collect())
    }

    async fn option_expirations(&self, symbol: &str) -> Result<Vec<NaiveDate>> {
        let value = self
            .get_json(
                "/markets/options/expirations",
                &[
                    ("symbol", symbol.to_string()),
                    ("includeAllRoots", "true".to_string()),
                ],
            )
            .await?;
        Ok(one_or_many(&value["expirations"]["date"])
            .into_iter()
            .filter_map(Value::as_str)
            .filter_map(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
            .collect())
    }

    async fn option_chain(
        &self,
        symbol: &str,
        expiration: NaiveDate,
    ) -> Result<Vec<OptionContract>> {
        let value = self
            .get_json(
                "/markets/options/chains",
                &[
                    ("symbol", symbol.to_string()),
                    ("expiration", expiration.format("%Y-%m-%d").to_string()),
                    ("greeks", "true".to_string()),
                ],
            )
            .await?;
        let contracts: Vec<OptionContract> = one_or_many(&value["options"]["option"])
            .into_iter()
            .filter_map(parse_contract)
            .collect();
        if contracts.is_empty() {
            warn!(symbol, %expiration, "empty option chain");
        }
        Ok(contracts)
    }

    async fn time_sales(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        let value = self
            .get_json(
                "/markets/timesales",
                &[
                    ("symbol", symbol.to_string()),
                    ("interval", "1min".to_string()),
                    ("start", start.format("%Y-%m-%d %H:%M").to_string()),
                    ("end", end.format("%Y-%m-%d %H:%M").to_string()),
                ],
            )
            .await?;
        Ok(one_or_many(&value["series"]["data"])
            .into_iter()
            .filter_map(parse_candle)
            .collect())
    }

    async fn balances(&self) -> Result<Balances> {
        let path = format!("/accounts/{}/balances", self.cfg.account_id);
        let value = self.get_json(&path, &[]).await?;
        let total_equity = dec_field(&value["balances"], "total_equity");
        if total_equity <= Decimal::ZERO {
            return Err(anyhow!("balances response missing total_equity"));
        }
        Ok(Balances { total_equity })
    }

    async fn positions(&self) -> Result<Vec<BrokerPosition>> {
        let path = format!("/accounts/{}/positions", self.cfg.account_id);
        let value = self.get_json(&path, &[]).await?;
        Ok(one_or_many(&value["positions"]["position"])
            .into_iter()
            .filter_map(|p| {
                Some(BrokerPosition {
                    symbol: p["symbol"].as_str()?.to_string(),
                    quantity: p["quantity"].as_f64()? as i64,
                    cost_basis: dec_field(p, "cost_basis"),
                    date_acquired: p["date_acquired"]
                        .as_str()
                        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                        .map_or_else(Utc::now, |dt| dt.with_timezone(&Utc)),
                })
            })
            .collect())
    }

    async fn place_multileg(&self, order: &MultilegOrder) -> Result<OrderAck> {
        let path = format!("/accounts/{}/orders", self.cfg.account_id);
        let response = self
            .http
            .post(self.url(&path))
            .bearer_auth(&self.cfg.access_token)
            .header("Accept", "application/json")
            .form(&order.form_fields())
            .timeout(WRITE_TIMEOUT)
            .send()
            .await
            .context("multileg order submission failed")?;
        let status = response.status();
        let value: Value = response
            .json()
            .await
            .context("order response was not JSON")?;
        if !status.is_success() {
            return Err(anyhow!("order submission returned {status}: {value}"));
        }
        let id = match &value["order"]["id"] {
            Value::Number(n) => n.to_string(),
            Value::String(s) => s.clone(),
            _ => return Err(anyhow!("order response missing id: {value}")),
        };
        let ack_status = value["order"]["status"].as_str().unwrap_or("ok").to_string();
        debug!(order_id = %id, status = %ack_status, "multileg order accepted");
        Ok(OrderAck { id, status: ack_status })
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        let path = format!("/accounts/{}/orders/{order_id}", self.cfg.account_id);
        let response = self
            .http
            .delete(self.url(&path))
            .bearer_auth(&self.cfg.access_token)
            .header("Accept", "application/json")
            .timeout(WRITE_TIMEOUT)
            .send()
            .await
            .with_context(|| format!("cancel of order {order_id} failed"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("cancel of {order_id} returned {status}: {body}"));
        }
        Ok(())
    }

    async fn order_status(&self, order_id: &str) -> Result<OrderStatus> {
        let path = format!("/accounts/{}/orders/{order_id}", self.cfg.account_id);
        let value = self.get_json(&path, &[]).await?;
        let status = value["order"]["status"]
            .as_str()
            .ok_or_else(|| anyhow!("order {order_id} status missing"))?;
        Ok(OrderStatus::parse(status))
    }
}
