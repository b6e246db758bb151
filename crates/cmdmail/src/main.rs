//! `cmdmail` - terminal reader for Gmail-style messages
//!
//! Loads a message from a file into the in-memory provider, materializes it
//! through `cmdmail-core` and prints it.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod cli;
mod show;

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result, bail};
use clap::Parser;
use cmdmail_core::provider::{LabelInfo, ProviderMessage};
use cmdmail_core::{
    ConfiguredRenderer, Connection, Context, CoreConfig, GpgEngine, MemoryProvider,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cli::{Cli, Command};

/// Labels given to messages loaded from a raw file.
const RAW_LABELS: [&str; 2] = ["INBOX", "UNREAD"];

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cmdmail=info,cmdmail_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    let provider = MemoryProvider::new();
    if let Some(path) = &cli.labels {
        load_labels(&provider, path)?;
    }
    let id = load_message(&provider, cli.command.file())?;

    let conn = Connection::new(
        provider,
        GpgEngine::from_config(&config.crypto),
        ConfiguredRenderer::from_config(&config.renderer),
    );
    if cli.labels.is_some() {
        let ctx = Context::new();
        conn.preload_labels(&ctx).await?;
    }

    let ctx = match config.fetch_timeout() {
        Some(timeout) => Context::new().with_timeout(timeout),
        None => Context::new(),
    };
    let canceller = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted");
            canceller.cancel();
        }
    });

    let message = conn.message(&id);
    match &cli.command {
        Command::Show {
            html, unpatched, ..
        } => {
            let options = show::ShowOptions {
                html: *html,
                unpatched: *unpatched,
                labels: cli.labels.is_some(),
            };
            show::show(&conn, &message, options, &ctx).await
        }
        Command::Save {
            attachment, output, ..
        } => show::save(&conn, &message, attachment, output.as_deref(), &ctx).await,
        Command::Raw { .. } => {
            let raw = conn.raw(&message, &ctx).await?;
            println!("{}", String::from_utf8_lossy(&raw));
            Ok(())
        }
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("cmdmail").join("config.json"))
}

fn load_config(path: Option<&Path>) -> Result<CoreConfig> {
    let Some(path) = path.map(Path::to_path_buf).or_else(default_config_path) else {
        return Ok(CoreConfig::default());
    };
    CoreConfig::load(&path).with_context(|| format!("loading {}", path.display()))
}

fn load_labels(provider: &MemoryProvider, path: &Path) -> Result<()> {
    let json =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let labels: Vec<LabelInfo> =
        serde_json::from_str(&json).with_context(|| format!("parsing {}", path.display()))?;
    for label in labels {
        provider.insert_label(label);
    }
    Ok(())
}

/// Stores the message in `path` and returns its ID.
fn load_message(provider: &MemoryProvider, path: &Path) -> Result<String> {
    let data = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    if path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json")) {
        let mut message: ProviderMessage = serde_json::from_slice(&data)
            .with_context(|| format!("parsing {}", path.display()))?;
        if message.id.is_empty() {
            message.id = stem;
        }
        if message.payload.is_none() && message.raw.is_none() {
            bail!("{} has neither a payload nor raw data", path.display());
        }
        let id = message.id.clone();
        provider.insert_message(message);
        return Ok(id);
    }

    if stem.is_empty() {
        bail!("cannot derive a message ID from {}", path.display());
    }
    provider
        .insert_raw(&stem, &RAW_LABELS, &data)
        .with_context(|| format!("parsing {}", path.display()))?;
    Ok(stem)
}
