//! Recording installer for tests: hands out fake pids and remembers calls.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use crate::application::installer::{DriverInstaller, InstallerError};

/// One call to [`DriverInstaller::start_device_host`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartCall {
    pub host_id: u16,
    pub host_name: String,
    pub is_respawn: bool,
}

type StartHook = Box<dyn Fn(&StartCall) + Send + Sync>;

/// In-memory [`DriverInstaller`].
///
/// Pids count up from 1000.  An optional hook runs on every successful
/// start; it is called with the manager lock held and must not block on the
/// manager.
pub struct RecordingInstaller {
    next_pid: AtomicU32,
    starts: Mutex<Vec<StartCall>>,
    stops: Mutex<Vec<u16>>,
    reaps: Mutex<Vec<u16>>,
    refused: Mutex<HashSet<u16>>,
    fail_stops: AtomicBool,
    on_start: Option<StartHook>,
}

impl Default for RecordingInstaller {
    fn default() -> Self {
        Self {
            next_pid: AtomicU32::new(1000),
            starts: Mutex::new(Vec::new()),
            stops: Mutex::new(Vec::new()),
            reaps: Mutex::new(Vec::new()),
            refused: Mutex::new(HashSet::new()),
            fail_stops: AtomicBool::new(false),
            on_start: None,
        }
    }
}

impl RecordingInstaller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installer that also runs `hook` after each successful start.
    pub fn with_start_hook(hook: impl Fn(&StartCall) + Send + Sync + 'static) -> Self {
        Self {
            on_start: Some(Box::new(hook)),
            ..Self::default()
        }
    }

    /// Makes every later start of `host_id` fail.
    pub fn refuse_starts(&self, host_id: u16) {
        self.refused.lock().unwrap().insert(host_id);
    }

    /// Makes every later stop fail.
    pub fn fail_stops(&self) {
        self.fail_stops.store(true, Ordering::SeqCst);
    }

    /// Every start attempt so far, refused ones included.
    pub fn starts(&self) -> Vec<StartCall> {
        self.starts.lock().unwrap().clone()
    }

    /// Number of start attempts flagged as respawns.
    pub fn respawns(&self) -> usize {
        self.starts
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.is_respawn)
            .count()
    }

    pub fn stops(&self) -> Vec<u16> {
        self.stops.lock().unwrap().clone()
    }

    /// Hosts released after a death without respawn, in call order.
    pub fn reaps(&self) -> Vec<u16> {
        self.reaps.lock().unwrap().clone()
    }
}

impl DriverInstaller for RecordingInstaller {
    fn start_device_host(
        &self,
        host_id: u16,
        host_name: &str,
        is_respawn: bool,
    ) -> Result<u32, InstallerError> {
        let call = StartCall {
            host_id,
            host_name: host_name.to_string(),
            is_respawn,
        };
        self.starts.lock().unwrap().push(call.clone());
        if self.refused.lock().unwrap().contains(&host_id) {
            return Err(InstallerError::SpawnFailed {
                host_name: host_name.to_string(),
                reason: "refused by test".to_string(),
            });
        }
        if let Some(hook) = &self.on_start {
            hook(&call);
        }
        Ok(self.next_pid.fetch_add(1, Ordering::SeqCst))
    }

    fn stop_device_host(&self, host_id: u16, _host_name: &str) -> Result<(), InstallerError> {
        if self.fail_stops.load(Ordering::SeqCst) {
            return Err(InstallerError::StopFailed {
                host_id,
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "refused by test"),
            });
        }
        self.stops.lock().unwrap().push(host_id);
        Ok(())
    }

    fn reap_device_host(&self, host_id: u16) {
        self.reaps.lock().unwrap().push(host_id);
    }
}
