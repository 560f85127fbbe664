//! hdf-devhost binary entry point.
//!
//! Started by the device manager's installer, one process per host:
//!
//! ```text
//! hdf-devhost --host-id 3 --host-name sample_host --manager 127.0.0.1:7400 \
//!             --library-dir /usr/lib/hdf/drivers
//! ```
//!
//! The process connects to the manager, serves device requests until the
//! manager goes away or Ctrl-C is pressed, then releases every device node.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use hdf_core::ipc::{DevHostServiceStub, SocketChannel};
use hdf_core::{DevHostService, RemoteChannel};
use hdf_devhost::infrastructure::devmgr_client::RemoteDevmgrClient;
use hdf_devhost::infrastructure::driver_loader::DynamicDriverLoader;
use hdf_devhost::infrastructure::power_events::SignalPowerSource;
use hdf_devhost::DeviceHost;

/// Command-line arguments passed by the installer.
#[derive(Debug, Parser)]
#[command(name = "hdf-devhost", version, about = "Driver framework device host")]
struct Args {
    /// Numeric id of this host.
    #[arg(long, env = "HDF_HOST_ID")]
    host_id: u16,

    /// Host name as configured in the manager.
    #[arg(long, env = "HDF_HOST_NAME")]
    host_name: String,

    /// Address of the device manager's host listener.
    #[arg(long, env = "HDF_MANAGER", default_value = "127.0.0.1:7400")]
    manager: SocketAddr,

    /// Directory holding driver libraries.
    #[arg(long, env = "HDF_LIBRARY_DIR", default_value = "/usr/lib/hdf/drivers")]
    library_dir: PathBuf,

    /// Seconds to wait for a reply from the manager.
    #[arg(long, env = "HDF_CALL_TIMEOUT", default_value_t = 10)]
    call_timeout: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    info!(host = %args.host_name, host_id = args.host_id, "device host starting");

    // ── Host service ──────────────────────────────────────────────────────────
    let loader = Arc::new(DynamicDriverLoader::new(&args.library_dir));
    let manager = Arc::new(RemoteDevmgrClient::new());
    let power = Arc::new(SignalPowerSource::new(tokio::runtime::Handle::current()));
    let host = Arc::new(
        DeviceHost::new(args.host_id, &args.host_name, loader, manager.clone(), power)
            .context("failed to create device host")?,
    );

    // ── Manager connection ────────────────────────────────────────────────────
    let stub = Arc::new(DevHostServiceStub::new(host.clone()));
    let timeout = Some(Duration::from_secs(args.call_timeout));
    let manager_addr = args.manager;
    let channel = SocketChannel::connect(manager_addr, stub, timeout)
        .await
        .with_context(|| format!("failed to connect to device manager at {manager_addr}"))?;
    manager.bind(channel.clone());

    let (died_tx, died_rx) = tokio::sync::oneshot::channel::<()>();
    channel.add_death_recipient(Box::new(move || {
        let _ = died_tx.send(());
    }));

    // Attaching blocks until the manager answers.
    let attach_host = host.clone();
    tokio::task::spawn_blocking(move || attach_host.start_service())
        .await?
        .map_err(|e| anyhow::anyhow!("failed to start host service: {e}"))?;

    info!(host = %args.host_name, "device host ready");

    // ── Wait for shutdown ─────────────────────────────────────────────────────
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("shutdown signal received"),
        _ = died_rx => warn!("device manager connection lost"),
    }

    channel.shutdown();
    info!(host = %args.host_name, devices = host.device_count(), "device host shutting down");
    Ok(())
}
