//! Installer that runs every device host as a child process.
//!
//! The child is the `hdf-devhost` binary, started with the arguments it
//! needs to find the manager again:
//!
//! ```text
//! hdf-devhost --host-id 2 --host-name sample_host --manager 127.0.0.1:7400 \
//!             --library-dir /usr/lib/hdf/drivers
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::application::installer::{DriverInstaller, InstallerError};

/// Spawns and kills host processes.
pub struct ProcessInstaller {
    binary: PathBuf,
    manager_addr: SocketAddr,
    library_dir: Option<PathBuf>,
    children: Mutex<HashMap<u16, Child>>,
}

impl ProcessInstaller {
    pub fn new(binary: impl Into<PathBuf>, manager_addr: SocketAddr) -> Self {
        Self {
            binary: binary.into(),
            manager_addr,
            library_dir: None,
            children: Mutex::new(HashMap::new()),
        }
    }

    /// Passes `--library-dir` to every host.
    pub fn with_library_dir(mut self, library_dir: impl Into<PathBuf>) -> Self {
        self.library_dir = Some(library_dir.into());
        self
    }

    /// The command line used for host `host_id`.
    pub fn command(&self, host_id: u16, host_name: &str) -> Command {
        let mut command = Command::new(&self.binary);
        command
            .arg("--host-id")
            .arg(host_id.to_string())
            .arg("--host-name")
            .arg(host_name)
            .arg("--manager")
            .arg(self.manager_addr.to_string())
            .stdin(Stdio::null());
        if let Some(dir) = &self.library_dir {
            command.arg("--library-dir").arg(dir);
        }
        command
    }

    fn children(&self) -> MutexGuard<'_, HashMap<u16, Child>> {
        self.children.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Collects the exit status of `child`, killing it first if it still runs.
fn reap(host_id: u16, mut child: Child) {
    match child.try_wait() {
        Ok(Some(status)) => debug!(host_id, %status, "host process reaped"),
        Ok(None) => {
            warn!(host_id, pid = child.id(), "host process still running; killing it");
            let _ = child.kill();
            let _ = child.wait();
        }
        Err(e) => {
            warn!(host_id, "could not query host process: {e}");
            let _ = child.wait();
        }
    }
}

impl DriverInstaller for ProcessInstaller {
    fn start_device_host(
        &self,
        host_id: u16,
        host_name: &str,
        is_respawn: bool,
    ) -> Result<u32, InstallerError> {
        let mut children = self.children();
        if let Some(previous) = children.remove(&host_id) {
            reap(host_id, previous);
        }

        let child = self
            .command(host_id, host_name)
            .spawn()
            .map_err(|e| InstallerError::SpawnFailed {
                host_name: host_name.to_string(),
                reason: e.to_string(),
            })?;
        let pid = child.id();
        info!(host_id, host = host_name, pid, is_respawn, binary = %self.binary.display(), "host process spawned");
        children.insert(host_id, child);
        Ok(pid)
    }

    fn stop_device_host(&self, host_id: u16, host_name: &str) -> Result<(), InstallerError> {
        let mut child = self
            .children()
            .remove(&host_id)
            .ok_or(InstallerError::UnknownHost(host_id))?;
        if let Ok(Some(status)) = child.try_wait() {
            debug!(host_id, host = host_name, %status, "host process had already exited");
            return Ok(());
        }
        child
            .kill()
            .map_err(|source| InstallerError::StopFailed { host_id, source })?;
        let _ = child.wait();
        info!(host_id, host = host_name, "host process stopped");
        Ok(())
    }

    fn reap_device_host(&self, host_id: u16) {
        // Taken out first so the wait does not run under the children lock.
        let child = self.children().remove(&host_id);
        if let Some(child) = child {
            reap(host_id, child);
        }
    }
}

impl Drop for ProcessInstaller {
    fn drop(&mut self) {
        let children = std::mem::take(&mut *self.children());
        for (host_id, child) in children {
            reap(host_id, child);
        }
    }
}
