//! # Fanout — Broadcast Dispatch CLI
//!
//! Sends one message to many recipients across WhatsApp, Messenger and
//! Instagram, paced by the anti-ban rate governor.
//!
//! Usage:
//!   fanout send --channel whatsapp --account biz-1 --to +1555,+1556 --message "hi"
//!   fanout send ... --at 2026-09-01T09:00:00Z     # schedule instead
//!   fanout status                                  # list stored campaigns
//!   fanout reset --channel whatsapp --account biz-1

use std::str::FromStr;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use fanout_channels::adapter_from_config;
use fanout_core::types::{CampaignMode, ChannelKind, EventKind, MessageContent};
use fanout_core::FanoutConfig;
use fanout_dispatch::{CampaignSpec, CampaignStore, Engine, EngineBuilder};
use fanout_governor::GovernorKey;

#[derive(Parser)]
#[command(name = "fanout", version, about = "📣 Fanout — governed broadcast dispatch")]
struct Cli {
    /// Config file path (default: ~/.fanout/config.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a campaign and run it to completion
    Send {
        /// Target channel: whatsapp, messenger or instagram
        #[arg(long)]
        channel: String,

        /// Platform account the campaign sends from
        #[arg(long)]
        account: String,

        /// Comma-separated recipient ids
        #[arg(long)]
        to: String,

        /// Text body
        #[arg(long)]
        message: Option<String>,

        /// Pre-uploaded media URL (alternative to --message)
        #[arg(long)]
        media_url: Option<String>,

        /// Caption shown with the media
        #[arg(long)]
        caption: Option<String>,

        /// RFC 3339 fire time; omit for an immediate send
        #[arg(long)]
        at: Option<String>,
    },

    /// Show stored campaigns and their counters
    Status,

    /// Clear governor limits for one channel account
    Reset {
        #[arg(long)]
        channel: String,

        #[arg(long)]
        account: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "fanout=debug" } else { "fanout=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let config = match &cli.config {
        Some(path) => FanoutConfig::load_from(std::path::Path::new(path))?,
        None => FanoutConfig::load()?,
    };

    match cli.command {
        Command::Send {
            channel,
            account,
            to,
            message,
            media_url,
            caption,
            at,
        } => {
            let channel = ChannelKind::from_str(&channel).map_err(anyhow::Error::msg)?;
            let content = match (message, media_url) {
                (Some(body), None) => MessageContent::text(body),
                (None, Some(url)) => MessageContent::Media { url, caption },
                _ => bail!("pass exactly one of --message or --media-url"),
            };
            let mode = match at {
                Some(at) => CampaignMode::Scheduled {
                    fire_at: DateTime::parse_from_rfc3339(&at)
                        .context("--at must be RFC 3339, e.g. 2026-09-01T09:00:00Z")?
                        .with_timezone(&Utc),
                },
                None => CampaignMode::Immediate,
            };
            let recipients: Vec<String> = to
                .split(',')
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty())
                .collect();
            let spec = CampaignSpec {
                channel,
                account_id: account,
                content,
                recipients,
                mode,
            };
            run_campaign(config, spec).await
        }
        Command::Status => status(),
        Command::Reset { channel, account } => {
            let channel = ChannelKind::from_str(&channel).map_err(anyhow::Error::msg)?;
            let engine = build_engine(config, channel)?;
            engine
                .reset_governor(&GovernorKey::new(channel, account))
                .await;
            println!("✅ Governor limits cleared");
            Ok(())
        }
    }
}

fn build_engine(config: FanoutConfig, channel: ChannelKind) -> Result<Engine> {
    let adapter = adapter_from_config(channel, &config.channels)
        .with_context(|| format!("channel '{channel}' has no credentials in the config"))?;
    Ok(EngineBuilder::new(config)
        .adapter(adapter)
        .persistent()
        .build())
}

/// Run one campaign to its terminal state, streaming events to the log.
async fn run_campaign(config: FanoutConfig, spec: CampaignSpec) -> Result<()> {
    let mut engine = build_engine(config, spec.channel)?;
    engine.connect_all().await?;
    engine.start().await;

    let id = engine.create_campaign(spec).await?;
    println!("🚀 Campaign {id} created");
    let mut rx = engine.subscribe(id).await?;

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(ev) => {
                    let s = ev.snapshot;
                    match ev.kind {
                        EventKind::Started => {
                            tracing::info!("started: {} recipients", s.total);
                        }
                        EventKind::Progress => {
                            tracing::info!(
                                "progress: {}/{} sent, {} failed",
                                s.sent, s.total, s.failed
                            );
                        }
                        EventKind::Completed => {
                            println!("✅ Completed: {} sent, {} failed", s.sent, s.failed);
                            break;
                        }
                        EventKind::Failed => {
                            println!("❌ Failed: all {} sends failed", s.failed);
                            break;
                        }
                    }
                }
                // Stream closed: read the final counters directly.
                Err(_) => {
                    if let Ok(s) = engine.snapshot(id).await {
                        println!("✅ Finished: {} sent, {} failed", s.sent, s.failed);
                    }
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                println!("🛑 Cancelling campaign...");
                // Already-terminal campaigns have nothing left to cancel.
                let _ = engine.cancel_campaign(id).await;
                let s = engine.snapshot(id).await?;
                println!(
                    "Cancelled: {} sent, {} failed, {} skipped",
                    s.sent, s.failed, s.skipped
                );
                break;
            }
        }
    }

    engine.shutdown().await;
    Ok(())
}

/// Print the persisted campaign ledger.
fn status() -> Result<()> {
    let store = CampaignStore::new(&CampaignStore::default_path());
    let mut docs = store.load_all();
    if docs.is_empty() {
        println!("No stored campaigns");
        return Ok(());
    }
    docs.sort_by_key(|d| d.campaign.created_at);
    for doc in docs {
        let c = &doc.campaign;
        let done = doc
            .tasks
            .iter()
            .filter(|t| t.state.is_terminal())
            .count();
        println!(
            "{} {:10} {:9} {:?} {}/{} done",
            c.created_at.format("%Y-%m-%d %H:%M"),
            c.channel.to_string(),
            c.account_id,
            c.state,
            done,
            doc.tasks.len(),
        );
    }
    Ok(())
}
