//! TCP endpoint device hosts connect to.
//!
//! Every accepted connection becomes a [`SocketChannel`] served by a
//! [`DevmgrServiceStub`].  The only request a host sends is `ATTACH_HOST`;
//! the stub answers it by wrapping the connection in a [`DevHostProxy`] and
//! handing that to the [`DeviceManager`].
//!
//! # Shutdown
//!
//! The accept loop runs as a tokio task and races every accept against a
//! `watch` shutdown signal.  Sending `true` (or dropping the sender) stops it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hdf_core::error::result_to_status;
use hdf_core::ipc::{RemoteChannel, Reply, RequestHandler, SocketChannel};
use hdf_core::protocol::IpcRequest;
use hdf_core::HdfError;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::host_proxy::DevHostProxy;
use crate::application::device_manager::DeviceManager;

/// Pause after a failed accept, e.g. when the process is out of descriptors.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Error type for the host listener.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The TCP socket could not be bound.
    #[error("failed to bind host listener on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Serves manager requests arriving from device hosts.
pub struct DevmgrServiceStub {
    manager: Arc<DeviceManager>,
}

impl DevmgrServiceStub {
    pub fn new(manager: Arc<DeviceManager>) -> Self {
        Self { manager }
    }
}

impl RequestHandler for DevmgrServiceStub {
    fn on_request(&self, channel: &Arc<dyn RemoteChannel>, code: u16, payload: &[u8]) -> Reply {
        let result = match IpcRequest::decode(code, payload) {
            Ok(IpcRequest::AttachHost { host_id }) => {
                self.manager.attach_remote_host(host_id, |reporter| {
                    Arc::new(DevHostProxy::new(Arc::clone(channel), reporter))
                })
            }
            Ok(other) => {
                warn!(request = ?other, "host sent a request the manager does not serve");
                Err(HdfError::NotSupported)
            }
            Err(e) => {
                warn!(code, "rejecting host request: {e}");
                Err(HdfError::InvalidParam)
            }
        };
        Reply::from_status(result_to_status(&result))
    }
}

/// Bound, not yet serving, host endpoint.
pub struct HostListener {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl HostListener {
    /// Binds `addr`.  Port 0 picks a free port; see [`local_addr`](Self::local_addr).
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError::BindFailed`] if the socket cannot be bound.
    pub async fn bind(addr: SocketAddr) -> Result<Self, ListenerError> {
        let bind_err = |source| ListenerError::BindFailed { addr, source };
        let listener = TcpListener::bind(addr).await.map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// The address hosts must connect to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts hosts on a tokio task until `shutdown` turns `true`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn serve(
        self,
        manager: Arc<DeviceManager>,
        call_timeout: Option<Duration>,
        shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let stub: Arc<dyn RequestHandler> = Arc::new(DevmgrServiceStub::new(manager));
        info!("host listener accepting on {}", self.local_addr);
        tokio::spawn(accept_loop(self.listener, stub, call_timeout, shutdown))
    }
}

async fn accept_loop(
    listener: TcpListener,
    stub: Arc<dyn RequestHandler>,
    call_timeout: Option<Duration>,
    mut shutdown: watch::Receiver<bool>,
) {
    while !*shutdown.borrow() {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    match SocketChannel::spawn(stream, Arc::clone(&stub), call_timeout) {
                        Ok(_) => debug!(%peer, "host connected"),
                        Err(e) => warn!(%peer, "failed to serve host connection: {e}"),
                    }
                }
                Err(e) => {
                    error!("host accept failed: {e}");
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                }
            },
        }
    }
    info!("host listener stopped");
}
