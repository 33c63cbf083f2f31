//! Admin CLI for the risk gate: status, lock/unlock, liquidation, restricted
//! calendar updates and the end-of-day report trigger.

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "gatectl", about = "Risk gate admin client")]
struct Args {
    /// Gate base URL.
    #[arg(long, env = "GATE_URL", default_value = "http://127.0.0.1:8787")]
    url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the composite gate status.
    Status,
    /// Lock the system.
    Lock {
        #[arg(long)]
        reason: Option<String>,
    },
    /// Unlock the system.
    Unlock,
    /// Cancel pending orders and lock.
    Liquidate,
    /// Replace the restricted-date calendar.
    Calendar {
        /// Comma-separated dates, e.g. 2026-03-18,2026-04-10
        #[arg(long, value_delimiter = ',')]
        dates: Vec<NaiveDate>,
    },
    /// Trigger the end-of-day report.
    Report,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let base = args.url.trim_end_matches('/');
    let http = reqwest::Client::new();

    let response = match &args.command {
        Command::Status => http.get(format!("{base}/v1/status")).send().await?,
        Command::Lock { reason } => {
            http.post(format!("{base}/v1/admin/lock"))
                .json(&json!({ "reason": reason }))
                .send()
                .await?
        }
        Command::Unlock => {
            http.post(format!("{base}/v1/admin/unlock"))
                .json(&json!({}))
                .send()
                .await?
        }
        Command::Liquidate => {
            http.post(format!("{base}/v1/admin/liquidate"))
                .json(&json!({}))
                .send()
                .await?
        }
        Command::Calendar { dates } => {
            if dates.is_empty() {
                return Err(anyhow!("--dates requires at least one date"));
            }
            http.post(format!("{base}/v1/admin/calendar"))
                .json(&json!({ "dates": dates }))
                .send()
                .await?
        }
        Command::Report => {
            http.post(format!("{base}/v1/admin/report"))
                .json(&json!({}))
                .send()
                .await?
        }
    };

    let status = response.status();
    let body: Value = response.json().await.context("gate returned non-JSON")?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    if !status.is_success() {
        return Err(anyhow!("gate returned {status}"));
    }
    Ok(())
}
