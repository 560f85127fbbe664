//! Manager-side record of one device host.
//!
//! # Record lifecycle (for beginners)
//!
//! ```text
//!   start ──► pid set ──attach──► service set ──LOAD──► devices owned
//!                ▲                                           │
//!                └────────── respawn ◄──── host died ◄───────┘
//! ```
//!
//! A record is created when the manager first starts the host and destroyed
//! when the host is stopped on purpose or fails its first start.  A host that
//! crashes keeps its record; only the process-bound parts (pid, service
//! handle, owned devices) are cleared.

use std::sync::Arc;

use hdf_core::{DevHostService, DeviceId, DeviceToken, HostPid};

/// Everything the manager knows about one running (or restarting) host.
pub struct DevHostClient {
    host_id: u16,
    host_name: String,
    pub(crate) pid: HostPid,
    pub(crate) service: Option<Arc<dyn DevHostService>>,
    pub(crate) devices: Vec<DeviceToken>,
    pub(crate) pending_unload: Vec<DeviceToken>,
    pub(crate) stop_flag: bool,
    /// Bumped on every start, respawn and attach.
    pub(crate) generation: u64,
}

impl DevHostClient {
    pub fn new(host_id: u16, host_name: impl Into<String>) -> Self {
        Self {
            host_id,
            host_name: host_name.into(),
            pid: None,
            service: None,
            devices: Vec::new(),
            pending_unload: Vec::new(),
            stop_flag: false,
            generation: 0,
        }
    }

    pub fn host_id(&self) -> u16 {
        self.host_id
    }

    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    pub fn pid(&self) -> HostPid {
        self.pid
    }

    /// Whether the host has attached and can take requests.
    pub fn is_attached(&self) -> bool {
        self.service.is_some()
    }

    pub fn devices(&self) -> &[DeviceToken] {
        &self.devices
    }

    pub fn pending_unload(&self) -> &[DeviceToken] {
        &self.pending_unload
    }

    pub fn stop_flag(&self) -> bool {
        self.stop_flag
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn owns_service(&self, service_name: &str) -> bool {
        self.devices
            .iter()
            .any(|token| token.service_name == service_name)
    }

    pub fn owns_device(&self, device_id: DeviceId) -> bool {
        self.devices.iter().any(|token| token.device_id == device_id)
    }

    /// Forgets everything tied to the dead process.
    ///
    /// Returns the service handle so the caller decides where it is dropped.
    pub(crate) fn clear_process(&mut self) -> Option<Arc<dyn DevHostService>> {
        self.pid = None;
        self.devices.clear();
        self.service.take()
    }

    /// Moves the device publishing `service_name` to the pending-unload list.
    pub(crate) fn begin_unload(&mut self, service_name: &str) -> Option<DeviceToken> {
        let pos = self
            .devices
            .iter()
            .position(|token| token.service_name == service_name)?;
        let token = self.devices.remove(pos);
        self.pending_unload.push(token.clone());
        Some(token)
    }

    /// Drops `device_id` from the pending list; puts it back among the owned
    /// devices if the host refused to remove it.
    pub(crate) fn finish_unload(&mut self, device_id: DeviceId, removed: bool) {
        let Some(pos) = self
            .pending_unload
            .iter()
            .position(|token| token.device_id == device_id)
        else {
            return;
        };
        let token = self.pending_unload.remove(pos);
        if !removed {
            self.devices.push(token);
        }
    }
}

impl std::fmt::Debug for DevHostClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DevHostClient")
            .field("host_id", &self.host_id)
            .field("host_name", &self.host_name)
            .field("pid", &self.pid)
            .field("attached", &self.service.is_some())
            .field("devices", &self.devices)
            .field("pending_unload", &self.pending_unload)
            .field("stop_flag", &self.stop_flag)
            .field("generation", &self.generation)
            .finish()
    }
}
