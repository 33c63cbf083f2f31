//! The ingest task: streaming session lifecycle, reconnect backoff and
//! event dispatch into the indicator store and signal engine.
//!
//! Ordering contract: a trade tick updates the indicator store first, then
//! the strategy gates run on a snapshot, so any proposal reflects every
//! indicator derivable from the triggering event. Store mutation happens
//! under a short write lock; gate evaluation and HTTP happen after release.

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use condor_broker::{MarketStream, StreamEvent, TradierClient};
use condor_indicators::IndicatorStore;

use crate::engine::ProposalPipeline;
use crate::supervisor::{market_phase, phase_sleep, until_next_window, wait_or_shutdown, MarketPhase};

/// Reconnect backoff ladder in seconds.
const BACKOFF_LADDER: [u64; 5] = [1, 2, 5, 10, 30];

pub struct Feed {
    client: Arc<TradierClient>,
    ws_url: String,
    symbols: Vec<String>,
    store: Arc<RwLock<IndicatorStore>>,
    pipeline: ProposalPipeline,
}

impl Feed {
    #[must_use]
    pub fn new(
        client: Arc<TradierClient>,
        ws_url: String,
        symbols: Vec<String>,
        store: Arc<RwLock<IndicatorStore>>,
        pipeline: ProposalPipeline,
    ) -> Self {
        Self {
            client,
            ws_url,
            symbols,
            store,
            pipeline,
        }
    }

    /// Runs until shutdown: sleeps outside the session window, otherwise
    /// keeps a subscribed stream alive with exponential backoff.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut backoff_step = 0usize;
        loop {
            if *shutdown.borrow() {
                break;
            }
            let phase = market_phase(chrono::Utc::now());
            if phase != MarketPhase::Open {
                let sleep = phase_sleep(phase);
                info!(
                    ?phase,
                    sleep_secs = sleep.as_secs(),
                    next_window_mins = until_next_window(chrono::Utc::now()).num_minutes(),
                    "outside session window"
                );
                if wait_or_shutdown(&mut shutdown, sleep).await {
                    break;
                }
                continue;
            }

            let session_id = match self.client.create_stream_session().await {
                Ok(id) => id,
                Err(err) => {
                    warn!(%err, "session creation failed");
                    if self.backoff(&mut shutdown, &mut backoff_step).await {
                        break;
                    }
                    continue;
                }
            };
            let mut stream =
                match MarketStream::connect(&self.ws_url, &session_id, &self.symbols).await {
                    Ok(stream) => stream,
                    Err(err) => {
                        warn!(%err, "stream connect failed");
                        if self.backoff(&mut shutdown, &mut backoff_step).await {
                            break;
                        }
                        continue;
                    }
                };
            backoff_step = 0;
            info!("market feed connected");

            let disconnected = self.pump(&mut stream, &mut shutdown).await;
            if !disconnected {
                stream.close().await;
                break;
            }
            if self.backoff(&mut shutdown, &mut backoff_step).await {
                break;
            }
        }
        info!("market feed stopped");
    }

    /// Pumps events until disconnect (true) or shutdown (false).
    async fn pump(&mut self, stream: &mut MarketStream, shutdown: &mut watch::Receiver<bool>) -> bool {
        loop {
            tokio::select! {
                event = stream.next_event() => match event {
                    Ok(Some(StreamEvent::Trade { symbol, price, size, ts })) => {
                        self.store.write().on_trade(&symbol, price, size, ts);
                        if self.symbols.contains(&symbol) {
                            self.pipeline
                                .on_trade_event(&self.store, &symbol, chrono::Utc::now())
                                .await;
                        }
                    }
                    Ok(Some(StreamEvent::Quote { symbol, bid, ask, ts })) => {
                        self.store.write().on_quote(&symbol, bid, ask, ts);
                    }
                    Ok(None) => {
                        warn!("stream closed, reconnecting");
                        return true;
                    }
                    Err(err) => {
                        warn!(%err, "stream error, reconnecting");
                        return true;
                    }
                },
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return false;
                    }
                }
            }
        }
    }

    async fn backoff(&self, shutdown: &mut watch::Receiver<bool>, step: &mut usize) -> bool {
        let secs = BACKOFF_LADDER[(*step).min(BACKOFF_LADDER.len() - 1)];
        *step += 1;
        info!(secs, "reconnect backoff");
        wait_or_shutdown(shutdown, Duration::from_secs(secs)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_ladder_matches_reconnect_policy() {
        assert_eq!(BACKOFF_LADDER.first(), Some(&1));
        assert_eq!(BACKOFF_LADDER.last(), Some(&30));
        assert!(BACKOFF_LADDER.windows(2).all(|w| w[0] < w[1]));
    }
}
