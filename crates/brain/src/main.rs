use anyhow::Result;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use condor_broker::{BrokerApi, TradierClient, TradierConfig};
use condor_indicators::{IndicatorStore, StoreConfig};
use condor_notify::{Notifier, Severity};

use condor_brain::config::BrainConfig;
use condor_brain::engine::{ProposalPipeline, SignalEngine};
use condor_brain::feed::Feed;
use condor_brain::gate_client::{GateClient, ProposalSink};
use condor_brain::journal::TradeJournal;
use condor_brain::manager::PositionManager;
use condor_brain::pollers;
use condor_brain::positions::{spawn_mirror_writer, PositionBook};
use condor_brain::strategies::default_gates;
use condor_brain::supervisor;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cfg = BrainConfig::from_env()?;
    info!(symbols = ?cfg.symbols, "starting brain");

    let notifier = condor_notify::from_webhook(cfg.discord_webhook_url.clone());
    let client = Arc::new(TradierClient::new(TradierConfig {
        api_base: cfg.tradier_api_base.clone(),
        stream_session_url: cfg.tradier_stream_session_url.clone(),
        access_token: cfg.tradier_access_token.clone(),
        account_id: cfg.tradier_account_id.clone(),
    })?);
    let broker: Arc<dyn BrokerApi> = client.clone();
    let gate = Arc::new(GateClient::new(&cfg.gate_url, &cfg.api_secret)?);
    let sink: Arc<dyn ProposalSink> = gate.clone();
    let store = Arc::new(RwLock::new(IndicatorStore::new(StoreConfig::default())));
    let journal = Arc::new(Mutex::new(TradeJournal::load(&cfg.journal_path)));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (greeks_tx, greeks_rx) = watch::channel(condor_core::types::PortfolioGreeks::default());
    let (new_positions_tx, new_positions_rx) = mpsc::unbounded_channel();
    let (mirror_tx, mirror_handle) = spawn_mirror_writer(cfg.positions_path.clone());

    notifier
        .send(
            Severity::Success,
            "Brain Online",
            &format!("monitoring {}", cfg.symbols.join(", ")),
        )
        .await;

    // Warm-up gates all signal generation; pollers and the feed may start
    // concurrently because the store reports absent until marked warm.
    let warmup = {
        let broker = broker.clone();
        let store = store.clone();
        let symbols = cfg.symbols.clone();
        let notifier = notifier.clone();
        tokio::spawn(async move {
            match pollers::warm_up(broker, store, symbols).await {
                Ok(()) => {
                    notifier
                        .send(Severity::Success, "Warm-up Complete", "indicators seeded, gates armed")
                        .await;
                }
                Err(err) => {
                    error!(%err, "warm-up failed; strategies stay disarmed");
                    notifier
                        .send(Severity::Error, "Warm-up Failed", &err.to_string())
                        .await;
                }
            }
        })
    };

    let vix_task = tokio::spawn(pollers::vix_poller(
        broker.clone(),
        store.clone(),
        shutdown_rx.clone(),
    ));
    let iv_task = tokio::spawn(pollers::atm_iv_poller(
        broker.clone(),
        store.clone(),
        cfg.symbols.clone(),
        shutdown_rx.clone(),
    ));

    let book = PositionBook::load(&cfg.positions_path);
    let manager = PositionManager::new(
        broker.clone(),
        sink.clone(),
        store.clone(),
        notifier.clone(),
        book,
        mirror_tx,
        greeks_tx,
        new_positions_rx,
    );
    let manager_task = tokio::spawn(manager.run(shutdown_rx.clone()));

    let pipeline = ProposalPipeline::new(
        SignalEngine::new(default_gates()),
        broker.clone(),
        sink,
        notifier.clone(),
        journal,
        cfg.sizing,
        cfg.spread_width,
        cfg.restricted_dates.clone(),
        new_positions_tx,
    );
    let feed = Feed::new(
        client,
        cfg.tradier_ws_url.clone(),
        cfg.symbols.clone(),
        store.clone(),
        pipeline,
    );
    let feed_task = tokio::spawn(feed.run(shutdown_rx.clone()));

    let heartbeat_task = tokio::spawn(supervisor::heartbeat_loop(
        gate,
        store,
        cfg.symbols.clone(),
        greeks_rx,
        cfg.restricted_dates.clone(),
        shutdown_rx,
    ));

    wait_for_signal().await;
    info!("shutdown requested");
    let _ = shutdown_tx.send(true);

    // Ingest first, then pollers, then the manager's final cycle; the
    // mirror writer drains last once the manager drops its sender.
    let _ = feed_task.await;
    let _ = vix_task.await;
    let _ = iv_task.await;
    let _ = heartbeat_task.await;
    let _ = manager_task.await;
    let _ = mirror_handle.await;
    warmup.abort();

    notifier
        .send(Severity::Error, "Brain Offline", "shutdown complete")
        .await;
    info!("brain stopped");
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
