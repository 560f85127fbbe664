//! hdf-devmgr binary entry point.
//!
//! Loads the host configuration, opens the endpoint hosts connect back to,
//! starts every configured host through the process installer and then
//! supervises them until Ctrl-C.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load_config()          -- hosts, devices, manager settings
//!  └─ HostListener::bind()   -- hosts connect here and send ATTACH_HOST
//!  └─ DeviceManager::new()   -- records + death policy on "devmgr-loop"
//!  └─ start_service()        -- one hdf-devhost child per configured host
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use hdf_devmgr::infrastructure::installer::ProcessInstaller;
use hdf_devmgr::infrastructure::listener::HostListener;
use hdf_devmgr::infrastructure::storage::config::{load_config, save_config, DevmgrConfig};
use hdf_devmgr::DeviceManager;

/// Command-line arguments of the device manager.
#[derive(Debug, Parser)]
#[command(name = "hdf-devmgr", version, about = "Driver framework device manager")]
struct Args {
    /// Path of the TOML configuration file.
    #[arg(long, env = "HDF_DEVMGR_CONFIG", default_value = "/etc/hdf/devmgr.toml")]
    config: PathBuf,

    /// Write a default configuration to `--config` if none exists, then exit.
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.init_config {
        if args.config.exists() {
            println!("{} already exists", args.config.display());
        } else {
            save_config(&args.config, &DevmgrConfig::default())
                .with_context(|| format!("failed to write {}", args.config.display()))?;
            println!("wrote {}", args.config.display());
        }
        return Ok(());
    }

    let config = load_config(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;

    // Initialise structured logging.  `RUST_LOG` overrides the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.manager.log_level)),
        )
        .init();

    info!(config = %args.config.display(), hosts = config.hosts.len(), "device manager starting");

    // ── Host endpoint ─────────────────────────────────────────────────────────
    let listener = HostListener::bind(config.manager.listen_address).await?;
    let manager_addr = listener.local_addr();

    // ── Manager ───────────────────────────────────────────────────────────────
    let installer = Arc::new(
        ProcessInstaller::new(&config.manager.devhost_binary, manager_addr)
            .with_library_dir(&config.manager.library_dir),
    );
    let manager = Arc::new(
        DeviceManager::new(config.host_attrs(), installer, config.manager.max_restart)
            .map_err(|e| anyhow::anyhow!("failed to create device manager: {e}"))?,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let listener_task = listener.serve(
        Arc::clone(&manager),
        config.manager.call_timeout(),
        shutdown_rx,
    );

    // Starting hosts blocks on process creation.
    let starter = Arc::clone(&manager);
    tokio::task::spawn_blocking(move || starter.start_service())
        .await?
        .map_err(|e| anyhow::anyhow!("failed to start device manager service: {e}"))?;

    info!(%manager_addr, "device manager ready.  Press Ctrl-C to exit.");

    // ── Wait for shutdown ─────────────────────────────────────────────────────
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("shutdown signal received");

    // Stop accepting first so no host attaches to a manager that is shutting down.
    let _ = shutdown_tx.send(true);
    if let Err(e) = listener_task.await {
        warn!("host listener task failed: {e}");
    }
    let stopper = Arc::clone(&manager);
    tokio::task::spawn_blocking(move || stopper.shutdown()).await?;

    info!("device manager stopped");
    Ok(())
}
