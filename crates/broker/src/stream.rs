//! Streaming market data over WebSocket.
//!
//! The caller first creates a session via the REST client, then connects
//! here with the session id and subscribes to trade and quote events for its
//! symbols. Reconnect policy lives with the caller; a closed stream simply
//! yields `None`.

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

/// One decoded market event.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Trade {
        symbol: String,
        price: f64,
        size: u64,
        ts: DateTime<Utc>,
    },
    Quote {
        symbol: String,
        bid: f64,
        ask: f64,
        ts: DateTime<Utc>,
    },
}

pub struct MarketStream {
    inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl MarketStream {
    /// Connects and subscribes to trade/quote events for `symbols`.
    ///
    /// # Errors
    /// Returns an error when the connection or the subscription send fails.
    pub async fn connect(ws_url: &str, session_id: &str, symbols: &[String]) -> Result<Self> {
        let (mut inner, _) = connect_async(ws_url)
            .await
            .context("websocket connect failed")?;

        let subscription = json!({
            "symbols": symbols,
            "filter": ["trade", "quote"],
            "sessionid": session_id,
        });
        inner
            .send(Message::Text(subscription.to_string()))
            .await
            .context("subscription send failed")?;
        info!(symbols = ?symbols, "market stream subscribed");

        Ok(Self { inner })
    }

    /// Next decoded event. `None` means the stream closed and the caller
    /// should recreate the session.
    ///
    /// # Errors
    /// Returns an error on a transport failure.
    pub async fn next_event(&mut self) -> Result<Option<StreamEvent>> {
        loop {
            let Some(message) = self.inner.next().await else {
                return Ok(None);
            };
            match message.context("websocket receive failed")? {
                Message::Text(text) => {
                    match serde_json::from_str::<Value>(&text) {
                        Ok(value) => {
                            if let Some(event) = decode_event(&value) {
                                return Ok(Some(event));
                            }
                            // Session acks, pings and unknown types are skipped.
                        }
                        Err(err) => warn!(%err, "unparseable stream message"),
                    }
                }
                Message::Close(frame) => {
                    info!(?frame, "market stream closed by peer");
                    return Ok(None);
                }
                // tungstenite answers pings internally.
                _ => {}
            }
        }
    }

    pub async fn close(&mut self) {
        if let Err(err) = self.inner.close(None).await {
            debug!(%err, "error closing market stream");
        }
    }
}

fn event_timestamp(value: &Value) -> DateTime<Utc> {
    // The feed stamps events with epoch milliseconds in `date`; fall back to
    // arrival time when absent.
    value["date"]
        .as_str()
        .and_then(|s| s.parse::<i64>().ok())
        .or_else(|| value["date"].as_i64())
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now)
}

fn decode_event(value: &Value) -> Option<StreamEvent> {
    match value["type"].as_str()? {
        "trade" => {
            let symbol = value["symbol"].as_str()?.to_string();
            let price = value["price"]
                .as_f64()
                .or_else(|| value["price"].as_str().and_then(|s| s.parse().ok()))
                .or_else(|| value["last"].as_f64())?;
            if price <= 0.0 {
                return None;
            }
            let size = value["size"]
                .as_u64()
                .or_else(|| value["size"].as_str().and_then(|s| s.parse().ok()))
                .unwrap_or(1);
            Some(StreamEvent::Trade {
                symbol,
                price,
                size,
                ts: event_timestamp(value),
            })
        }
        "quote" => {
            let symbol = value["symbol"].as_str()?.to_string();
            let bid = value["bid"].as_f64().unwrap_or(0.0);
            let ask = value["ask"].as_f64().unwrap_or(0.0);
            if bid <= 0.0 && ask <= 0.0 {
                return None;
            }
            Some(StreamEvent::Quote {
                symbol,
                bid,
                ask,
                ts: event_timestamp(value),
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_trade_with_string_fields() {
        let value = json!({
            "type": "trade",
            "symbol": "SPY",
            "price": "430.25",
            "size": "100",
            "date": "1700000000000"
        });
        let event = decode_event(&value).unwrap();
        match event {
            StreamEvent::Trade { symbol, price, size, ts } => {
                assert_eq!(symbol, "SPY");
                assert_eq!(price, 430.25);
                assert_eq!(size, 100);
                assert_eq!(ts.timestamp_millis(), 1_700_000_000_000);
            }
            StreamEvent::Quote { .. } => panic!("expected trade"),
        }
    }

    #[test]
    fn decodes_quote() {
        let value = json!({
            "type": "quote",
            "symbol": "QQQ",
            "bid": 401.10,
            "ask": 401.15
        });
        assert!(matches!(
            decode_event(&value),
            Some(StreamEvent::Quote { bid, ask, .. }) if bid == 401.10 && ask == 401.15
        ));
    }

    #[test]
    fn skips_zero_priced_trades_and_unknown_types() {
        assert!(decode_event(&json!({"type": "trade", "symbol": "SPY", "price": 0.0})).is_none());
        assert!(decode_event(&json!({"type": "ping"})).is_none());
        assert!(decode_event(&json!({"type": "summary", "symbol": "SPY"})).is_none());
    }
}
