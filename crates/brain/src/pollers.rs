//! Periodic pollers running beside the stream: VIX every minute, ATM IV
//! every fifteen minutes, and the one-shot history warm-up. Pollers never
//! block the ingest loop; failures are logged and retried on the next tick.

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use parking_lot::RwLock;
use rust_decimal::prelude::ToPrimitive;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use condor_broker::BrokerApi;
use condor_indicators::IndicatorStore;

const VIX_INTERVAL_SECS: u64 = 60;
const IV_INTERVAL_SECS: u64 = 900;
/// Calendar days fetched to cover roughly five trading days of minutes.
const WARMUP_CALENDAR_DAYS: i64 = 7;

/// Fetches VIX once per minute. The store flags the value stale after 180 s,
/// so a few failed polls in a row degrade VIX to absent on their own.
pub async fn vix_poller(
    broker: Arc<dyn BrokerApi>,
    store: Arc<RwLock<IndicatorStore>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut tick = tokio::time::interval(std::time::Duration::from_secs(VIX_INTERVAL_SECS));
    info!("VIX poller started");
    loop {
        tokio::select! {
            _ = tick.tick() => {
                match fetch_vix(broker.as_ref()).await {
                    Ok(value) => {
                        store.write().set_vix(value, Utc::now());
                        debug!(vix = value, "VIX updated");
                    }
                    Err(err) => warn!(%err, "VIX poll failed"),
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    info!("VIX poller stopped");
}

async fn fetch_vix(broker: &dyn BrokerApi) -> Result<f64> {
    let quotes = broker.quotes(&["VIX".to_string()]).await?;
    let quote = quotes.first().context("no VIX quote in response")?;
    quote
        .last
        .or_else(|| quote.mid())
        .and_then(|d| d.to_f64())
        .context("VIX quote missing a price")
}

/// Samples near-ATM implied vol per symbol every fifteen minutes: the
/// nearest listed expiration's call and put closest to spot, averaged.
pub async fn atm_iv_poller(
    broker: Arc<dyn BrokerApi>,
    store: Arc<RwLock<IndicatorStore>>,
    symbols: Vec<String>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut tick = tokio::time::interval(std::time::Duration::from_secs(IV_INTERVAL_SECS));
    info!("ATM IV poller started");
    loop {
        tokio::select! {
            _ = tick.tick() => {
                for symbol in &symbols {
                    match sample_atm_iv(broker.as_ref(), &store, symbol).await {
                        Ok(Some(iv)) => {
                            store.write().record_atm_iv(symbol, iv);
                        }
                        Ok(None) => debug!(symbol, "no ATM IV sample available"),
                        Err(err) => warn!(symbol, %err, "ATM IV poll failed"),
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    info!("ATM IV poller stopped");
}

async fn sample_atm_iv(
    broker: &dyn BrokerApi,
    store: &RwLock<IndicatorStore>,
    symbol: &str,
) -> Result<Option<f64>> {
    let Some(price) = store.read().price(symbol) else {
        return Ok(None);
    };
    let today = condor_core::session::eastern_date(Utc::now());
    let Some(expiration) = broker
        .option_expirations(symbol)
        .await?
        .into_iter()
        .filter(|exp| *exp >= today)
        .min()
    else {
        return Ok(None);
    };
    let chain = broker.option_chain(symbol, expiration).await?;

    let nearest_iv = |option_type| {
        chain
            .iter()
            .filter(|c| c.option_type == option_type)
            .filter_map(|c| {
                let iv = c.greeks?.mid_iv;
                let strike = c.strike.to_f64()?;
                (iv > 0.0).then(|| ((strike - price).abs(), iv))
            })
            .min_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(_, iv)| iv)
    };
    let call = nearest_iv(condor_core::types::OptionType::Call);
    let put = nearest_iv(condor_core::types::OptionType::Put);
    Ok(match (call, put) {
        (Some(c), Some(p)) => Some((c + p) / 2.0),
        (Some(v), None) | (None, Some(v)) => Some(v),
        (None, None) => None,
    })
}

/// One-shot warm-up: a batched history fetch seeds the candle rings, VWAP
/// cumulants and Wilder states, then marks the store warm. Strategy gates
/// stay silent until this completes.
pub async fn warm_up(
    broker: Arc<dyn BrokerApi>,
    store: Arc<RwLock<IndicatorStore>>,
    symbols: Vec<String>,
) -> Result<()> {
    let end = Utc::now();
    let start = end - Duration::days(WARMUP_CALENDAR_DAYS);
    for symbol in &symbols {
        let candles = broker
            .time_sales(symbol, start, end)
            .await
            .with_context(|| format!("history fetch for {symbol} failed"))?;
        info!(symbol, bars = candles.len(), "warm-up history loaded");
        store.write().seed_history(symbol, &candles);
    }
    store.write().mark_warm();
    info!("warm-up complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use chrono::{DateTime, NaiveDate};
    use condor_broker::{
        Balances, BrokerPosition, Greeks, MultilegOrder, OptionContract, OrderAck, OrderStatus,
        Quote,
    };
    use condor_core::types::{Candle, OptionType};
    use condor_indicators::StoreConfig;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    struct ChainBroker {
        expirations: Vec<NaiveDate>,
        chain: Vec<OptionContract>,
    }

    #[async_trait]
    impl BrokerApi for ChainBroker {
        async fn quotes(&self, _symbols: &[String]) -> Result<Vec<Quote>> {
            Ok(vec![Quote {
                symbol: "VIX".to_string(),
                bid: Decimal::ZERO,
                ask: Decimal::ZERO,
                last: Some(dec!(18.4)),
                greeks: None,
            }])
        }
        async fn option_expirations(&self, _symbol: &str) -> Result<Vec<NaiveDate>> {
            Ok(self.expirations.clone())
        }
        async fn option_chain(
            &self,
            _symbol: &str,
            _expiration: NaiveDate,
        ) -> Result<Vec<OptionContract>> {
            Ok(self.chain.clone())
        }
        async fn time_sales(
            &self,
            _symbol: &str,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> Result<Vec<Candle>> {
            Ok(vec![])
        }
        async fn balances(&self) -> Result<Balances> {
            Err(anyhow!("unused"))
        }
        async fn positions(&self) -> Result<Vec<BrokerPosition>> {
            Ok(vec![])
        }
        async fn place_multileg(&self, _order: &MultilegOrder) -> Result<OrderAck> {
            Err(anyhow!("unused"))
        }
        async fn cancel_order(&self, _order_id: &str) -> Result<()> {
            Ok(())
        }
        async fn order_status(&self, _order_id: &str) -> Result<OrderStatus> {
            Ok(OrderStatus::Pending)
        }
    }

    fn contract(strike: i64, option_type: OptionType, iv: f64) -> OptionContract {
        OptionContract {
            symbol: format!("SPY-{strike}"),
            strike: Decimal::from(strike),
            option_type,
            expiration: NaiveDate::from_ymd_opt(2099, 1, 15).unwrap(),
            bid: dec!(1.00),
            ask: dec!(1.10),
            greeks: Some(Greeks {
                delta: 0.5,
                gamma: 0.0,
                theta: 0.0,
                vega: 0.0,
                mid_iv: iv,
            }),
        }
    }

    #[tokio::test]
    async fn vix_fetch_prefers_last_price() {
        let broker = ChainBroker {
            expirations: vec![],
            chain: vec![],
        };
        let vix = fetch_vix(&broker).await.unwrap();
        assert!((vix - 18.4).abs() < 1e-9);
    }

    #[tokio::test]
    async fn atm_iv_averages_nearest_call_and_put() {
        let broker = ChainBroker {
            expirations: vec![NaiveDate::from_ymd_opt(2099, 1, 15).unwrap()],
            chain: vec![
                contract(425, OptionType::Call, 0.30),
                contract(430, OptionType::Call, 0.20),
                contract(430, OptionType::Put, 0.24),
                contract(435, OptionType::Put, 0.40),
            ],
        };
        let mut store = IndicatorStore::new(StoreConfig::default());
        store.mark_warm();
        store.on_trade("SPY", 430.2, 100, Utc::now());
        let store = RwLock::new(store);

        let iv = sample_atm_iv(&broker, &store, "SPY").await.unwrap().unwrap();
        // Nearest call 430 at 0.20, nearest put 430 at 0.24.
        assert!((iv - 0.22).abs() < 1e-9);
    }

    #[tokio::test]
    async fn atm_iv_skips_symbols_without_price() {
        let broker = ChainBroker {
            expirations: vec![],
            chain: vec![],
        };
        let mut store = IndicatorStore::new(StoreConfig::default());
        store.mark_warm();
        let store = RwLock::new(store);
        assert!(sample_atm_iv(&broker, &store, "SPY").await.unwrap().is_none());
    }
}
