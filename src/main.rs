//! cost-sync - keeps presentation cost figures in step with the cost record
//!
//! Loads the record, prints every bound display target, then keeps polling
//! and reprints targets whenever the record changes. SIGUSR1 forces an
//! immediate refresh; Ctrl-C stops polling and exits.
//!
//! Environment Variables:
//!   COST_SYNC_CONFIG - Path to TOML config file
//!   COST_SYNC_SOURCE_URL - Remote cost record endpoint
//!   COST_SYNC_DATA_VERSION - Cache-busting version for the first fetch
//!   COST_SYNC_AUTO_REFRESH - Set to false to disable polling
//!   COST_SYNC_REFRESH_INTERVAL_MS - Poll interval (minimum 1000)
//!   COST_SYNC_LOCAL_FILE - Local record file for fallback
//!   RUST_LOG - Log filter (default: cost_sheet_sync=info,cost_sync=info)

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use dotenv::dotenv;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cost_sheet_sync::{
    CheckOutcome, CostSync, DisplaySurface, FilePicker, FixedPicker, StdinPicker, SyncConfig,
};

#[derive(Parser, Debug)]
#[command(name = "cost-sync")]
#[command(about = "Render presentation cost figures from a remote cost record")]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, env = "COST_SYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Remote cost record URL
    #[arg(long)]
    source: Option<String>,

    /// Cache-busting data version for the first fetch
    #[arg(long)]
    data_version: Option<String>,

    /// Poll interval in milliseconds (minimum 1000)
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Disable periodic refresh
    #[arg(long)]
    no_auto_refresh: bool,

    /// Local cost record (.json) used when the remote endpoint fails
    #[arg(long)]
    local_file: Option<PathBuf>,

    /// Load from a local file instead of the remote endpoint at startup
    #[arg(long)]
    select_file: bool,

    /// Render once and exit
    #[arg(long)]
    once: bool,

    /// Default log level when RUST_LOG is unset
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn apply(&self, config: &mut SyncConfig) {
        if let Some(source) = &self.source {
            config.source_url = source.clone();
        }
        if let Some(version) = &self.data_version {
            config.data_version = Some(version.clone());
        }
        if let Some(ms) = self.interval_ms {
            config.set_refresh_interval_ms(ms);
        }
        if self.no_auto_refresh || self.once {
            config.auto_refresh = false;
        }
        if let Some(path) = &self.local_file {
            config.local_file = Some(path.clone());
        }
    }
}

/// Prints each target write as `target<TAB>text`.
struct ConsoleSurface;

impl DisplaySurface for ConsoleSurface {
    fn write_text(&self, target: &str, text: &str) {
        println!("{}\t{}", target, text);
    }
}

fn load_env() {
    let _ = dotenv();
    let local = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    if local.exists() {
        let _ = dotenv::from_path(&local);
    }
}

fn init_tracing(default_level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("cost_sheet_sync={0},cost_sync={0}", default_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn file_picker(config: &SyncConfig) -> Option<Arc<dyn FilePicker>> {
    match &config.local_file {
        Some(path) => Some(Arc::new(FixedPicker::new(path.clone())) as Arc<dyn FilePicker>),
        None if std::io::stdin().is_terminal() => Some(Arc::new(StdinPicker) as Arc<dyn FilePicker>),
        None => None,
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    load_env();
    let args = Args::parse();
    init_tracing(&args.log_level);

    let mut config =
        SyncConfig::load(args.config.as_deref()).context("failed to load configuration")?;
    args.apply(&mut config);

    if config.bindings.is_empty() {
        warn!("no bindings configured, nothing will be displayed");
    }
    info!(
        source = %config.source_url,
        bindings = config.bindings.len(),
        auto_refresh = config.auto_refresh,
        "starting cost sync"
    );

    let sync = CostSync::from_config(&config, file_picker(&config), Arc::new(ConsoleSurface));

    let mut loaded = if args.select_file {
        sync.select_local_file().await
    } else {
        sync.initialize().await
    };
    if !loaded && !args.select_file {
        warn!("remote cost record unavailable, trying a local file");
        loaded = sync.select_local_file().await;
    }
    if !loaded {
        error!("no cost record could be loaded");
        bail!("initial load failed: serve the record over HTTP or pass --local-file");
    }

    if args.once {
        sync.shutdown();
        return Ok(());
    }

    if !config.auto_refresh {
        info!("auto-refresh disabled, press Ctrl-C to exit");
    }

    run_until_shutdown(&sync).await?;

    info!("shutting down");
    sync.shutdown();
    Ok(())
}

fn report(outcome: CheckOutcome) {
    match outcome {
        CheckOutcome::Updated { origin, rendered } => {
            info!(origin = %origin, rendered, "manual refresh applied changes")
        }
        CheckOutcome::Unchanged => info!("manual refresh: no changes"),
        CheckOutcome::Skipped => info!("manual refresh skipped, a check is already running"),
        CheckOutcome::Failed(err) => warn!(error = %err, "manual refresh failed"),
    }
}

/// Waits for Ctrl-C. SIGUSR1 triggers an immediate refresh.
#[cfg(unix)]
async fn run_until_shutdown(sync: &CostSync) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut refresh = signal(SignalKind::user_defined1())
        .context("failed to install SIGUSR1 handler")?;
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                return result.context("failed to listen for shutdown signal");
            }
            _ = refresh.recv() => report(sync.refresh().await),
        }
    }
}

#[cfg(not(unix))]
async fn run_until_shutdown(_sync: &CostSync) -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")
}
