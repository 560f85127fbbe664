//! Kernel power events delivered as unix signals.
//!
//! Hosts without a kernel power driver still need a way to be told about
//! suspend and resume.  This source maps `SIGUSR1` to
//! [`KEVENT_POWER_SUSPEND`] and `SIGUSR2` to [`KEVENT_POWER_RESUME`], so an
//! operator can run `kill -USR1 <pid>` to suspend every driver in a host.
//!
//! Signal streams are registered synchronously in `subscribe` (so failures
//! are reported to the caller) and drained by a task on the given runtime.
//! The host callback runs on the blocking pool, one event at a time.

use hdf_core::domain::power::{KEVENT_POWER_RESUME, KEVENT_POWER_SUSPEND};
use hdf_core::{HdfError, HdfResult};
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::application::power_source::{KernelEventCallback, PowerEventSource};

/// Power-event source fed by `SIGUSR1`/`SIGUSR2`.
pub struct SignalPowerSource {
    runtime: Handle,
}

impl SignalPowerSource {
    pub fn new(runtime: Handle) -> Self {
        Self { runtime }
    }
}

#[cfg(unix)]
impl PowerEventSource for SignalPowerSource {
    fn subscribe(&self, callback: KernelEventCallback) -> HdfResult<()> {
        use tokio::signal::unix::{signal, SignalKind};

        let _guard = self.runtime.enter();
        let mut suspend = signal(SignalKind::user_defined1()).map_err(|e| {
            warn!("cannot listen for SIGUSR1: {e}");
            HdfError::Io
        })?;
        let mut resume = signal(SignalKind::user_defined2()).map_err(|e| {
            warn!("cannot listen for SIGUSR2: {e}");
            HdfError::Io
        })?;

        self.runtime.spawn(async move {
            loop {
                let event = tokio::select! {
                    Some(()) = suspend.recv() => KEVENT_POWER_SUSPEND,
                    Some(()) = resume.recv() => KEVENT_POWER_RESUME,
                    else => break,
                };
                debug!(event, "kernel power event");
                let callback = callback.clone();
                if tokio::task::spawn_blocking(move || callback(event)).await.is_err() {
                    warn!(event, "power event callback panicked");
                }
            }
        });
        Ok(())
    }
}

#[cfg(not(unix))]
impl PowerEventSource for SignalPowerSource {
    fn subscribe(&self, _callback: KernelEventCallback) -> HdfResult<()> {
        Err(HdfError::NotSupported)
    }
}
