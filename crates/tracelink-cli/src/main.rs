//! Tracelink command-line driver
//!
//! A thin host around the SDK: opens a session, runs one operation, closes
//! the session, and prints the server response as JSON.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use tracelink_core::TracelinkConfig;
use tracelink_runtime::{LinkProperties, Tracelink};

#[derive(Parser)]
#[command(name = "tracelink", about = "Tracelink attribution SDK driver")]
struct Cli {
    /// Application key for the attribution service
    #[arg(long)]
    app_key: String,

    /// Base URL of the attribution service
    #[arg(long, default_value = "https://api.tracelink.io")]
    base_url: String,

    /// Durable queue location (defaults to the platform data directory)
    #[arg(long)]
    store: Option<PathBuf>,

    /// Keep the request queue in memory only
    #[arg(long)]
    volatile: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Initialize a session and print the referring link data
    Open,
    /// Report a completed user action
    Track {
        event: String,
        /// Event metadata as a JSON object
        #[arg(long)]
        data: Option<String>,
    },
    /// Create a short deep link
    Link {
        #[arg(long)]
        channel: Option<String>,
        #[arg(long)]
        feature: Option<String>,
        #[arg(long)]
        stage: Option<String>,
        #[arg(long)]
        alias: Option<String>,
        /// Deep-link data as a JSON object
        #[arg(long)]
        data: Option<String>,
    },
    /// Create a referral code
    ReferralCode {
        #[arg(long)]
        prefix: Option<String>,
        #[arg(long, default_value_t = 5)]
        amount: i64,
    },
    /// Attach a developer identity to the current user
    Identity { identity: String },
    /// Detach the developer identity
    Logout,
    /// Fetch the credit transaction history
    History,
}

fn default_store_path() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("tracelink").join("queue.sqlite"))
}

fn parse_json(label: &str, raw: Option<String>) -> Result<Option<Value>> {
    raw.map(|raw| {
        serde_json::from_str(&raw).with_context(|| format!("--{label} must be valid JSON"))
    })
    .transpose()
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let mut builder = TracelinkConfig::builder().network(tracelink_core::NetworkConfig {
        base_url: cli.base_url,
        app_key: cli.app_key,
    });
    let store_path = if cli.volatile {
        None
    } else {
        cli.store.or_else(default_store_path)
    };
    if let Some(path) = store_path {
        builder = builder.store_path(path);
    }
    let config = builder.build().map_err(anyhow::Error::msg)?;

    let client = Tracelink::builder(config)
        .build()
        .context("failed to start the SDK")?;
    let lifecycle = client.lifecycle();

    lifecycle.activity_started().await?;

    let response = match cli.command {
        Command::Open => {
            let session = client.init_session().await?;
            session.get("data").cloned().unwrap_or(session)
        }
        Command::Track { event, data } => {
            let metadata = parse_json("data", data)?;
            client.track_event(event, metadata).await?
        }
        Command::Link {
            channel,
            feature,
            stage,
            alias,
            data,
        } => {
            let mut link = LinkProperties::new();
            if let Some(channel) = channel {
                link = link.channel(channel);
            }
            if let Some(feature) = feature {
                link = link.feature(feature);
            }
            if let Some(stage) = stage {
                link = link.stage(stage);
            }
            if let Some(alias) = alias {
                link = link.alias(alias);
            }
            if let Some(data) = parse_json("data", data)? {
                link = link.data(data);
            }
            client.create_short_url(link).await?
        }
        Command::ReferralCode { prefix, amount } => {
            client.get_referral_code(prefix.as_deref(), amount).await?
        }
        Command::Identity { identity } => client.set_identity(identity).await?,
        Command::Logout => client.logout().await?,
        Command::History => client.get_credit_history().await?,
    };

    println!("{}", serde_json::to_string_pretty(&response)?);

    if let Err(e) = client.close_session().await {
        tracing::debug!("session close skipped: {e}");
    }
    client.shutdown().await?;
    Ok(())
}
