//! The driver installer: whatever actually starts and stops host processes.

use thiserror::Error;

/// Errors reported by a [`DriverInstaller`].
#[derive(Debug, Error)]
pub enum InstallerError {
    /// The host process could not be started.
    #[error("failed to start host {host_name}: {reason}")]
    SpawnFailed { host_name: String, reason: String },

    /// No process is known for this host.
    #[error("no process for host {0}")]
    UnknownHost(u16),

    /// The host process could not be stopped.
    #[error("failed to stop host {host_id}: {source}")]
    StopFailed {
        host_id: u16,
        #[source]
        source: std::io::Error,
    },
}

/// Starts and stops device host processes on the manager's behalf.
///
/// Calls are made with the manager lock held; an implementation must not
/// call back into the manager synchronously.
pub trait DriverInstaller: Send + Sync {
    /// Starts host `host_id` and returns its process id.
    ///
    /// `is_respawn` is `true` when the host is restarted after a crash.
    fn start_device_host(
        &self,
        host_id: u16,
        host_name: &str,
        is_respawn: bool,
    ) -> Result<u32, InstallerError>;

    /// Stops host `host_id`.
    fn stop_device_host(&self, host_id: u16, host_name: &str) -> Result<(), InstallerError>;

    /// Releases what is left of host `host_id` after a death the manager
    /// does not answer with a respawn.
    ///
    /// Process-based installers collect the exit status here.  The default
    /// does nothing.
    fn reap_device_host(&self, _host_id: u16) {}
}
