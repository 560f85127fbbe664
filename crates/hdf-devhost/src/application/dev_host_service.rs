//! The in-host device host service.
//!
//! # How requests flow (for beginners)
//!
//! ```text
//!   manager ──ADD_DEVICE──► stub ──add_device()──► DeviceHost
//!                                                      │ sync message
//!                                                      ▼
//!                                         HostCore (task handler)
//!                                                      │
//!                                   HdfDevice ──► DeviceNode ──► driver bind/init
//! ```
//!
//! Device additions and removals are packaged as synchronous messages to the
//! host's own [`MessageTask`], so every change to the device list goes
//! through the same handler.  Power events are fanned out directly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use hdf_core::{
    DevHostService, DeviceDescriptor, DeviceId, DevmgrServiceClient, HdfError, HdfResult, Message,
    MessageHandler, MessageLooper, MessageTask, PowerEventListener, PowerState,
};
use tracing::{debug, error, info, warn};

use super::device_node::{DeviceNode, NodeState};
use super::driver::DriverLoader;
use super::hdf_device::HdfDevice;
use super::power_source::{KernelEventCallback, PowerEventSource};

/// Message id: add the device carried in the payload.
pub const HOST_ADD_DEVICE: u16 = 1;
/// Message id: delete the node whose raw id is in `arg`.
pub const HOST_DEL_DEVICE: u16 = 2;

// ── Task handler ──────────────────────────────────────────────────────────────

/// State owned by the host task.
struct HostCore {
    host_id: u16,
    loader: Arc<dyn DriverLoader>,
    devices: Mutex<Vec<HdfDevice>>,
}

impl HostCore {
    fn devices(&self) -> MutexGuard<'_, Vec<HdfDevice>> {
        self.devices.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn add_device(&self, descriptor: DeviceDescriptor) -> HdfResult<()> {
        descriptor.validate()?;
        let id = descriptor.device_id();
        if id.host_id() != self.host_id {
            warn!(host_id = self.host_id, device = %id, "device belongs to another host");
            return Err(HdfError::InvalidParam);
        }

        let mut devices = self.devices();
        let existing = devices.iter().position(|device| device.owns(id));
        if let Some(pos) = existing {
            if devices[pos].find_node(id).is_some() {
                warn!(device = %id, "device node already exists");
                return Err(HdfError::DeviceBusy);
            }
        }

        let mut node = DeviceNode::new(descriptor);
        if let Err(e) = node.launch(self.loader.as_ref()) {
            node.release(self.loader.as_ref());
            error!(device = %id, "failed to launch device node: {e}");
            return Err(e);
        }

        match existing {
            Some(pos) => devices[pos].attach(node),
            None => {
                let mut device = HdfDevice::new(id);
                device.attach(node);
                devices.push(device);
            }
        }
        Ok(())
    }

    fn del_device(&self, id: DeviceId) -> HdfResult<()> {
        let mut devices = self.devices();
        let Some(pos) = devices.iter().position(|device| device.owns(id)) else {
            return Err(HdfError::NotFound);
        };
        if !devices[pos].detach(id, self.loader.as_ref()) {
            return Err(HdfError::NotFound);
        }
        if devices[pos].is_empty() {
            devices.remove(pos);
        }
        info!(device = %id, "device node removed");
        Ok(())
    }

    /// Wake states walk devices newest first, sleep states oldest first.
    fn pm_notify(&self, state: PowerState) -> HdfResult<()> {
        if !state.is_valid() {
            return Err(HdfError::InvalidParam);
        }
        let devices = self.devices();
        let mut outcome = Ok(());
        let mut visit = |device: &HdfDevice| {
            if let Err(e) = device.pm_notify(state) {
                if outcome.is_ok() {
                    outcome = Err(e);
                }
            }
        };
        if state.is_wake() {
            devices.iter().rev().for_each(&mut visit);
        } else {
            devices.iter().for_each(&mut visit);
        }
        if outcome.is_err() {
            warn!(host_id = self.host_id, ?state, "power transition failed on some nodes");
        }
        outcome
    }

    fn release_all(&self) {
        let mut devices = self.devices();
        while let Some(mut device) = devices.pop() {
            device.release_all(self.loader.as_ref());
        }
    }
}

impl MessageHandler<DeviceDescriptor> for HostCore {
    fn dispatch(&self, message: Message<DeviceDescriptor>) -> HdfResult<()> {
        match message.what() {
            HOST_ADD_DEVICE => {
                let descriptor = message.into_payload().ok_or(HdfError::InvalidParam)?;
                self.add_device(descriptor)
            }
            HOST_DEL_DEVICE => {
                let raw = u32::try_from(message.arg()).map_err(|_| HdfError::InvalidParam)?;
                self.del_device(DeviceId::from_raw(raw))
            }
            other => {
                debug!(what = other, "unknown host message");
                Err(HdfError::NotSupported)
            }
        }
    }
}

// ── Service ───────────────────────────────────────────────────────────────────

/// The device host service running inside a host process.
pub struct DeviceHost {
    host_id: u16,
    host_name: String,
    core: Arc<HostCore>,
    task: MessageTask<DeviceDescriptor>,
    manager: Arc<dyn DevmgrServiceClient>,
    power_source: Arc<dyn PowerEventSource>,
    started: AtomicBool,
    _looper: MessageLooper<DeviceDescriptor>,
}

impl DeviceHost {
    /// Creates the host and starts its message loop.
    ///
    /// # Errors
    ///
    /// Returns [`HdfError::ThreadCreateFail`] if the loop thread cannot start.
    pub fn new(
        host_id: u16,
        host_name: impl Into<String>,
        loader: Arc<dyn DriverLoader>,
        manager: Arc<dyn DevmgrServiceClient>,
        power_source: Arc<dyn PowerEventSource>,
    ) -> HdfResult<Self> {
        let host_name = host_name.into();
        let looper = MessageLooper::start(format!("devhost-{host_name}"))?;
        let core = Arc::new(HostCore {
            host_id,
            loader,
            devices: Mutex::new(Vec::new()),
        });
        let task = MessageTask::new(&host_name, &looper, core.clone());
        Ok(Self {
            host_id,
            host_name,
            core,
            task,
            manager,
            power_source,
            started: AtomicBool::new(false),
            _looper: looper,
        })
    }

    pub fn host_id(&self) -> u16 {
        self.host_id
    }

    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    /// Number of devices (not nodes) currently present.
    pub fn device_count(&self) -> usize {
        self.core.devices().len()
    }

    /// State of node `id`, if it exists.
    pub fn node_state(&self, id: DeviceId) -> Option<NodeState> {
        self.core
            .devices()
            .iter()
            .find_map(|device| device.find_node(id))
            .map(DeviceNode::state)
    }

    /// Registers an extra power listener on node `id`.
    ///
    /// # Errors
    ///
    /// Returns [`HdfError::NotFound`] if the node does not exist.
    pub fn add_power_listener(
        &self,
        id: DeviceId,
        listener: Arc<dyn PowerEventListener>,
    ) -> HdfResult<()> {
        let mut devices = self.core.devices();
        let node = devices
            .iter_mut()
            .find_map(|device| device.find_node_mut(id))
            .ok_or(HdfError::NotFound)?;
        node.add_power_listener(listener);
        Ok(())
    }

    fn kernel_event_callback(&self) -> KernelEventCallback {
        let core: Weak<HostCore> = Arc::downgrade(&self.core);
        let host_id = self.host_id;
        Arc::new(move |event| {
            let state = PowerState::from_kernel_event(event);
            if !state.is_valid() {
                debug!(host_id, event, "ignoring unknown kernel power event");
                return;
            }
            let Some(core) = core.upgrade() else {
                return;
            };
            if let Err(e) = core.pm_notify(state) {
                warn!(host_id, ?state, "kernel power event not fully applied: {e}");
            }
        })
    }
}

impl DevHostService for DeviceHost {
    fn add_device(&self, descriptor: &DeviceDescriptor) -> HdfResult<()> {
        let message = Message::new(HOST_ADD_DEVICE).with_payload(descriptor.clone());
        self.task.send_message(message, true)
    }

    fn del_device(&self, device_id: DeviceId) -> HdfResult<()> {
        let message = Message::new(HOST_DEL_DEVICE).with_arg(u64::from(device_id.raw()));
        self.task.send_message(message, true)
    }

    fn start_service(&self) -> HdfResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            debug!(host = %self.host_name, "host service already started");
            return Ok(());
        }
        if let Err(e) = self.manager.attach_device_host(self.host_id) {
            self.started.store(false, Ordering::SeqCst);
            error!(host = %self.host_name, "failed to attach to device manager: {e}");
            return Err(e);
        }
        if let Err(e) = self.power_source.subscribe(self.kernel_event_callback()) {
            warn!(host = %self.host_name, "kernel power events unavailable: {e}");
        }
        info!(host = %self.host_name, host_id = self.host_id, "host service started");
        Ok(())
    }

    fn pm_notify(&self, state: PowerState) -> HdfResult<()> {
        self.core.pm_notify(state)
    }
}

impl Drop for DeviceHost {
    fn drop(&mut self) {
        self.core.release_all();
    }
}
