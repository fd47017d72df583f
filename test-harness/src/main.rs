//! Development log store
//!
//! Serves a seeded in-memory log store over TCP so the access layer can be
//! exercised without a real SSB server. `--delay-start` holds off listening
//! to reproduce a log store that is slow to come up.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use oasis_core::config::Config;
use oasis_core::logging::{init_logging_with_config, LogConfig};
use oasis_core::memory::MemoryLogStore;
use oasis_core::metrics::init_metrics;
use oasis_core::rpc::serve;
use oasis_core::supervisor::LocalDialer;
use oasis_core::{FeedId, Oasis};
use tokio::net::TcpListener;
use tracing::info;

const DEFAULT_WHOAMI: &str = "@TXKFQehlyoSn8UJAIVP/k2BjFINC591MlBC2e2d24mA=.ed25519";

#[derive(Parser, Debug)]
#[command(name = "test-harness")]
#[command(about = "In-memory SSB log store for local development", long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(short, long, default_value = "127.0.0.1:8008")]
    listen: String,

    /// Seconds to wait before accepting connections
    #[arg(long, default_value_t = 0)]
    delay_start: u64,

    /// Identity the store reports from `whoami`
    #[arg(long, default_value = DEFAULT_WHOAMI)]
    whoami: String,

    /// Skip publishing the sample thread
    #[arg(long)]
    empty: bool,

    /// Log level (trace, debug, info, warn, error); overrides OASIS_LOG_LEVEL
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::from_env()?;
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    init_logging_with_config(LogConfig::try_from(&config.logging)?)?;
    init_metrics();

    let whoami: FeedId = args
        .whoami
        .parse()
        .with_context(|| format!("invalid feed id {}", args.whoami))?;
    let memory = Arc::new(MemoryLogStore::new(whoami));

    if !args.empty {
        seed(memory.clone(), &config).await.context("seeding sample thread")?;
    }

    if args.delay_start > 0 {
        info!(seconds = args.delay_start, "Delaying start");
        tokio::time::sleep(Duration::from_secs(args.delay_start)).await;
    }

    let listener = TcpListener::bind(&args.listen)
        .await
        .with_context(|| format!("binding {}", args.listen))?;
    info!(addr = %listener.local_addr()?, messages = memory.len().await, "Log store listening");

    tokio::select! {
        result = serve(listener, memory) => result.context("log store server failed")?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    Ok(())
}

/// Publish a small thread through the regular access path
async fn seed(memory: Arc<MemoryLogStore>, config: &Config) -> Result<()> {
    let oasis = Oasis::with_dialer(Arc::new(LocalDialer::new(memory)), config);
    let store = oasis.store();

    let root = store.publish_root("Welcome to the #oasis dev store").await?;
    let reply = store.publish_reply(&root.key, "First reply").await?;
    store.publish_comment(&reply.key, "A comment in the same thread").await?;
    store.publish_reply(&reply.key, "A tangent that forks").await?;
    store.publish_vote(&root.key, 1).await?;

    oasis.shutdown().await;
    Ok(())
}
