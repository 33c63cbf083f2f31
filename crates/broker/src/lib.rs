//! Brokerage plumbing: REST client, streaming market data and multi-leg
//! order encoding.

pub mod api;
pub mod client;
pub mod multileg;
pub mod stream;
pub mod types;

pub use api::BrokerApi;
pub use client::{TradierClient, TradierConfig};
pub use multileg::{broker_side, order_type, BrokerLegSide, MultilegLeg, MultilegOrder};
pub use stream::{MarketStream, StreamEvent};
pub use types::{Balances, BrokerPosition, Greeks, OptionContract, OrderAck, OrderStatus, Quote};
