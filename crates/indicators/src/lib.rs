//! Stream-driven market indicators and regime classification.

pub mod profile;
pub mod regime;
pub mod store;
pub mod wilder;

pub use profile::{ProfileLevels, VolumeProfile};
pub use store::{IndicatorStore, StoreConfig};
