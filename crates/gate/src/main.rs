use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use condor_broker::{TradierClient, TradierConfig};

use condor_gate::actor::GateActor;
use condor_gate::config::GateConfig;
use condor_gate::handle::GateHandle;
use condor_gate::ledger::{Ledger, MemoryLedger, PgLedger};
use condor_gate::server;

#[derive(Parser)]
#[command(name = "condor-gate", about = "Risk gate and execution router")]
struct Args {
    /// Run with an in-memory ledger (development only; nothing survives a
    /// restart).
    #[arg(long)]
    memory_ledger: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let cfg = GateConfig::from_env()?;
    let constitution = cfg.load_constitution()?;
    info!(
        symbols = ?constitution.allowed_symbols,
        max_open = constitution.max_open_positions,
        max_total = constitution.max_total_positions,
        "constitution loaded"
    );

    let ledger: Arc<dyn Ledger> = if args.memory_ledger {
        warn!("using in-memory ledger; audit trail will not survive restarts");
        Arc::new(MemoryLedger::new())
    } else {
        let url = cfg
            .database_url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("DATABASE_URL must be set (or pass --memory-ledger)"))?;
        Arc::new(PgLedger::connect(&url).await?)
    };

    let broker = Arc::new(TradierClient::new(TradierConfig {
        api_base: cfg.tradier_api_base.clone(),
        stream_session_url: String::new(),
        access_token: cfg.tradier_access_token.clone(),
        account_id: cfg.tradier_account_id.clone(),
    })?);
    let notifier = condor_notify::from_webhook(cfg.discord_webhook_url.clone());

    let (tx, rx) = mpsc::channel(64);
    let actor = GateActor::load(
        constitution,
        cfg.api_secret.clone(),
        broker,
        ledger,
        notifier,
        rx,
    )
    .await?;
    tokio::spawn(actor.run());

    let handle = GateHandle::new(tx);
    let app = server::router(handle);
    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    info!(addr = %cfg.bind_addr, "gate listening");
    axum::serve(listener, app).await?;
    Ok(())
}
