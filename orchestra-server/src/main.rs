//! orchestra-server entry point
//!
//! Loads the YAML configuration, spawns every configured backend, and
//! serves the aggregated MCP surface over stdio. All diagnostics go to
//! stderr; stdout carries only JSON-RPC.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use orchestra_config::{default_config_path, load_config};
use orchestra_mcp::McpGateway;
use orchestra_redact::{PiiRedactor, RedactionStage};

#[derive(Parser, Debug)]
#[command(name = "orchestra-server", version, about)]
struct Args {
    /// Path to the configuration file (defaults to the per-user config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout belongs to the protocol, so logs must go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_path = match args.config {
        Some(path) => path,
        None => default_config_path().context("could not determine default config path")?,
    };

    let config = load_config(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    tracing::info!(
        config = %config_path.display(),
        backends = config.backends.len(),
        "starting orchestra-server"
    );

    let redactor: Option<Arc<dyn RedactionStage>> = match &config.redaction {
        Some(redaction) => Some(Arc::new(
            PiiRedactor::from_config(redaction).context("invalid redaction configuration")?,
        )),
        None => None,
    };

    let gateway = McpGateway::start(config.gateway, &config.backends, redactor)
        .await
        .context("gateway startup failed")?;

    gateway.run().await.context("gateway terminated with an error")?;

    Ok(())
}
