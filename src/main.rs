//! srtp-rekey - SRTP key rotation test peer
//!
//! Runs interop peers that exchange SRTP media and rotate master keys at
//! agreed packet indices.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use srtp_rekey::config::{AppConfig, KeyConfig};
use srtp_rekey::interop::{broadcast, BroadcastMessage, InteropPeer};
use srtp_rekey::srtp::TracingSink;

#[derive(Parser)]
#[command(name = "srtp-rekey")]
#[command(about = "SRTP master key rotation test peer", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an interop peer for every configured session
    Peer {
        /// Stop after this many seconds instead of waiting for Ctrl-C
        #[arg(short, long)]
        duration: Option<u64>,
    },

    /// Print the effective configuration
    Config {
        /// Write it back to the config file
        #[arg(long)]
        write: bool,
    },

    /// Generate random master keys as base64
    Keygen {
        /// Number of keys; MKIs count up from 1
        #[arg(short = 'n', long, default_value = "2")]
        count: u32,

        /// MKI length in bytes
        #[arg(long, default_value = "4")]
        mki_len: usize,

        /// Master key length in bytes
        #[arg(long, default_value = "16")]
        key_len: usize,

        /// Master salt length in bytes
        #[arg(long, default_value = "14")]
        salt_len: usize,
    },

    /// Parse a broadcast line or datagram and print its fields
    Parse {
        /// e.g. `alice notify: 10.0.0.1:5000 3054 10 0 3 0`
        line: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match cli.command {
        Commands::Peer { duration } => {
            let config = load_config(cli.config.as_ref())?;
            run_peer(&config, duration).await?;
        }
        Commands::Config { write } => {
            let config = load_config(cli.config.as_ref())?;
            print!("{}", config.to_toml()?);
            if write {
                let path = match &cli.config {
                    Some(path) => path.clone(),
                    None => AppConfig::config_path()?,
                };
                config.save_to(&path)?;
                tracing::info!("Config written to {}", path.display());
            }
        }
        Commands::Keygen {
            count,
            mki_len,
            key_len,
            salt_len,
        } => {
            keygen(count, mki_len, key_len, salt_len)?;
        }
        Commands::Parse { line } => {
            parse_line(&line.join(" "))?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> Result<AppConfig> {
    match path {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    }
}

async fn run_peer(config: &AppConfig, duration: Option<u64>) -> Result<()> {
    if config.sessions.is_empty() {
        anyhow::bail!("No [[sessions]] configured");
    }

    tracing::info!(
        "Starting peer {} with {} session(s)...",
        config.peer.client_id,
        config.sessions.len()
    );
    let peer = InteropPeer::start(config, Arc::new(TracingSink)).await?;

    match duration {
        Some(secs) => {
            tracing::info!("Running for {}s...", secs);
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
                _ = tokio::signal::ctrl_c() => tracing::info!("Interrupted"),
            }
        }
        None => {
            tracing::info!("Running until Ctrl-C...");
            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl-C")?;
        }
    }

    for session in peer.registry().iter() {
        if let Some(stats) = peer.stats(session.session_id()).await {
            println!(
                "session {}: sent {} / received {} packets, {} reports out / {} in, {} replays, {} failures",
                session.session_id(),
                stats.packets_sent,
                stats.packets_received,
                stats.reports_sent,
                stats.reports_received,
                stats.replays_rejected,
                stats.unprotect_failures
            );
        }
    }
    peer.close().await
}

fn keygen(count: u32, mki_len: usize, key_len: usize, salt_len: usize) -> Result<()> {
    if mki_len == 0 || mki_len > 8 {
        anyhow::bail!("MKI length must be 1..=8 bytes");
    }
    for n in 1..=count as u64 {
        let mki = &n.to_be_bytes()[8 - mki_len..];
        let key = KeyConfig::generate(mki, key_len, salt_len)?;
        println!("[[sessions.keys]]");
        println!("mki = \"{}\"", key.mki);
        println!("key = \"{}\"", key.key);
        println!("salt = \"{}\"", key.salt);
        println!();
    }
    Ok(())
}

fn parse_line(line: &str) -> Result<()> {
    let (client, message) = match broadcast::decode_datagram(line) {
        Ok((client, message)) => (Some(client), message),
        Err(_) => {
            let message: BroadcastMessage = line
                .parse()
                .with_context(|| format!("Not a broadcast line: {}", line))?;
            (None, message)
        }
    };

    if let Some(client) = client {
        println!("client:      {}", client);
    }
    match message {
        BroadcastMessage::Notify {
            addr,
            ssrc,
            seq,
            roc,
            index,
            session_id,
        } => {
            println!("message:     notify");
            println!("address:     {}", addr);
            println!("ssrc:        {:#010x}", ssrc);
            println!("seq/roc:     {} / {}", seq, roc);
            println!("rtcp index:  {}", index);
            println!("session:     {}", session_id);
        }
        BroadcastMessage::SendIndexes {
            addr,
            rtp_index,
            rtcp_index,
            session_id,
        } => {
            println!("message:     sendindexes");
            println!("address:     {}", addr);
            println!("rtp index:   {}", rtp_index);
            println!("rtcp index:  {}", rtcp_index);
            println!("session:     {}", session_id);
        }
    }
    Ok(())
}
