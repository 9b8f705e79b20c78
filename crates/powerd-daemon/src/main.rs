//! powerd - power supply monitoring daemon
//!
//! Mirrors the store-declared power subsystems, polls each supply's
//! presence/input/output registers on a fixed cadence, drives the subsystem
//! status LEDs, and writes status changes back to the store.

mod admin;
mod config;
mod reconciler;
mod server;
mod state;

use anyhow::Result;
use clap::Parser;
use powerd_core::{MemoryStore, Mirror, SimBus, TomlDescriptorLoader};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "powerd")]
#[command(about = "Power supply monitoring and reconciliation daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "powerd.toml")]
    config: PathBuf,

    /// Bind address for the admin server
    #[arg(short, long)]
    bind: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("powerd v{}", env!("CARGO_PKG_VERSION"));

    let mut config = config::load_config(&args.config)?;
    if let Some(bind) = args.bind {
        config.admin.bind = bind;
    }

    // Seed the store with this daemon's row and the configured subsystems;
    // provisioning changes at runtime go through the same store interface.
    let store = MemoryStore::new();
    store.add_daemon(reconciler::DAEMON_NAME);
    for subsystem in &config.subsystems {
        info!(
            subsystem = %subsystem.name,
            dir = %subsystem.hw_desc_dir,
            "configured subsystem"
        );
        store.add_subsystem(&subsystem.name, &subsystem.hw_desc_dir);
    }

    let mirror = Arc::new(RwLock::new(Mirror::new()));

    // Register access backend; platform buses plug in behind RegisterIo
    let registers = Arc::new(SimBus::new());

    let reconciler = reconciler::Reconciler::new(
        Arc::clone(&mirror),
        Arc::new(store),
        registers,
        Arc::new(TomlDescriptorLoader),
    );
    tokio::spawn(reconciler.run());

    let state = Arc::new(state::AppState::new(mirror));
    server::run(state, &config.admin.bind).await
}
