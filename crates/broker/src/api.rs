//! The broker seam. Production code talks to [`crate::client::TradierClient`];
//! tests substitute in-memory fakes.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use condor_core::types::Candle;

use crate::multileg::MultilegOrder;
use crate::types::{Balances, BrokerPosition, OptionContract, OrderAck, OrderStatus, Quote};

#[async_trait]
pub trait BrokerApi: Send + Sync {
    /// Current quotes for a batch of symbols (equity or OCC option symbols).
    async fn quotes(&self, symbols: &[String]) -> Result<Vec<Quote>>;

    /// Listed expirations for an underlying.
    async fn option_expirations(&self, symbol: &str) -> Result<Vec<NaiveDate>>;

    /// Full chain with greeks for one expiration.
    async fn option_chain(&self, symbol: &str, expiration: NaiveDate)
        -> Result<Vec<OptionContract>>;

    /// One-minute bars for the warm-up window.
    async fn time_sales(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>>;

    async fn balances(&self) -> Result<Balances>;

    async fn positions(&self) -> Result<Vec<BrokerPosition>>;

    async fn place_multileg(&self, order: &MultilegOrder) -> Result<OrderAck>;

    async fn cancel_order(&self, order_id: &str) -> Result<()>;

    async fn order_status(&self, order_id: &str) -> Result<OrderStatus>;
}
