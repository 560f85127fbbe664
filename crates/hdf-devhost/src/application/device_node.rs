//! One launched instance of a driver inside a device host.
//!
//! # Lifecycle (for beginners)
//!
//! ```text
//!   NONE ──bind ok──► INITED ──init ok──► LAUNCHED
//!     ▲                                      │
//!     └──────────── release (removal) ◄──────┘
//! ```
//!
//! A node only moves forward.  The only way back is removing it, which
//! releases the driver and hands the handle back to the loader.

use std::sync::Arc;

use hdf_core::domain::power::notify_listener;
use hdf_core::{DeviceDescriptor, DeviceId, HdfResult, PowerEventListener, PowerState};
use tracing::{debug, info, warn};

use super::driver::{DriverHandle, DriverLoader};

/// Progress of a node through its driver callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NodeState {
    None,
    Inited,
    Launched,
}

/// A device node: one descriptor bound to one loaded driver.
pub struct DeviceNode {
    descriptor: DeviceDescriptor,
    state: NodeState,
    driver: Option<DriverHandle>,
    power_listeners: Vec<Arc<dyn PowerEventListener>>,
}

impl DeviceNode {
    pub fn new(descriptor: DeviceDescriptor) -> Self {
        Self {
            descriptor,
            state: NodeState::None,
            driver: None,
            power_listeners: Vec::new(),
        }
    }

    pub fn device_id(&self) -> DeviceId {
        self.descriptor.device_id()
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    /// Loads the driver and runs bind then init.
    ///
    /// On failure the node keeps whatever state it reached and still holds
    /// the driver; the caller is expected to [`release`](Self::release) it.
    ///
    /// # Errors
    ///
    /// Returns the loader error mapped to a status, or the error returned by
    /// the driver's `bind` or `init`.
    pub fn launch(&mut self, loader: &dyn DriverLoader) -> HdfResult<()> {
        let driver = loader.get_driver(self.descriptor.module_name())?;
        let driver = self.driver.insert(driver);

        driver.entry().bind(&self.descriptor).map_err(|e| {
            warn!(device = %self.descriptor.device_id(), module = driver.module_name(), "bind failed: {e}");
            e
        })?;
        self.state = NodeState::Inited;
        if let Some(listener) = driver.entry().power_listener() {
            self.power_listeners.push(listener);
        }

        driver.entry().init(&self.descriptor).map_err(|e| {
            warn!(device = %self.descriptor.device_id(), module = driver.module_name(), "init failed: {e}");
            e
        })?;
        self.state = NodeState::Launched;
        info!(
            device = %self.descriptor.device_id(),
            module = self.descriptor.module_name(),
            service = self.descriptor.service_name(),
            "device node launched"
        );
        Ok(())
    }

    /// Releases the driver and returns it to `loader`.  Calling this on a
    /// node without a driver does nothing.
    pub fn release(&mut self, loader: &dyn DriverLoader) {
        let Some(driver) = self.driver.take() else {
            return;
        };
        if self.state > NodeState::None {
            driver.entry().release(&self.descriptor);
        }
        self.power_listeners.clear();
        loader.reclaim_driver(driver);
        debug!(device = %self.descriptor.device_id(), "device node released");
    }

    pub fn add_power_listener(&mut self, listener: Arc<dyn PowerEventListener>) {
        self.power_listeners.push(listener);
    }

    /// Delivers `state` to every listener of this node.
    ///
    /// A node without listeners accepts every transition.  All listeners are
    /// called even after one fails; the first failure is returned.
    pub fn pm_notify(&self, state: PowerState) -> HdfResult<()> {
        let mut outcome = Ok(());
        for listener in &self.power_listeners {
            if let Err(e) = notify_listener(listener.as_ref(), state) {
                warn!(device = %self.descriptor.device_id(), ?state, "power listener failed: {e}");
                if outcome.is_ok() {
                    outcome = Err(e);
                }
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::driver_loader::builtin::BuiltinDriverLoader;
    use crate::infrastructure::driver_loader::mock::{DriverCall, ScriptedDriver};
    use hdf_core::HdfError;

    fn descriptor(module: &str) -> DeviceDescriptor {
        DeviceDescriptor::new(DeviceId::new(1, 0, 0), module, "sample_service")
    }

    #[test]
    fn test_launch_moves_node_to_launched() {
        // Arrange
        let (loader, calls) = BuiltinDriverLoader::with_scripted(ScriptedDriver::new("ok_drv"));
        let mut node = DeviceNode::new(descriptor("ok_drv"));

        // Act
        let result = node.launch(&loader);

        // Assert
        assert!(result.is_ok());
        assert_eq!(node.state(), NodeState::Launched);
        assert_eq!(*calls.lock().unwrap(), vec![DriverCall::Bind, DriverCall::Init]);
    }

    #[test]
    fn test_bind_failure_leaves_node_in_none() {
        let (loader, calls) =
            BuiltinDriverLoader::with_scripted(ScriptedDriver::new("bad_drv").failing_bind());
        let mut node = DeviceNode::new(descriptor("bad_drv"));

        let result = node.launch(&loader);

        assert_eq!(result, Err(HdfError::Failure));
        assert_eq!(node.state(), NodeState::None);
        assert_eq!(*calls.lock().unwrap(), vec![DriverCall::Bind]);
    }

    #[test]
    fn test_init_failure_stops_at_inited() {
        let (loader, _calls) =
            BuiltinDriverLoader::with_scripted(ScriptedDriver::new("half_drv").failing_init());
        let mut node = DeviceNode::new(descriptor("half_drv"));

        assert!(node.launch(&loader).is_err());
        assert_eq!(node.state(), NodeState::Inited);
    }

    #[test]
    fn test_unknown_module_is_not_found() {
        let loader = BuiltinDriverLoader::new();
        let mut node = DeviceNode::new(descriptor("missing_drv"));

        assert_eq!(node.launch(&loader), Err(HdfError::NotFound));
        assert_eq!(node.state(), NodeState::None);
    }

    #[test]
    fn test_release_calls_driver_once_and_is_idempotent() {
        // Arrange
        let (loader, calls) = BuiltinDriverLoader::with_scripted(ScriptedDriver::new("ok_drv"));
        let mut node = DeviceNode::new(descriptor("ok_drv"));
        node.launch(&loader).unwrap();

        // Act
        node.release(&loader);
        node.release(&loader);

        // Assert
        assert_eq!(
            *calls.lock().unwrap(),
            vec![DriverCall::Bind, DriverCall::Init, DriverCall::Release]
        );
    }

    #[test]
    fn test_release_skips_driver_callback_when_bind_failed() {
        let (loader, calls) =
            BuiltinDriverLoader::with_scripted(ScriptedDriver::new("bad_drv").failing_bind());
        let mut node = DeviceNode::new(descriptor("bad_drv"));
        let _ = node.launch(&loader);

        node.release(&loader);

        assert_eq!(*calls.lock().unwrap(), vec![DriverCall::Bind]);
    }

    #[test]
    fn test_driver_power_listener_receives_states() {
        // Arrange
        let driver = ScriptedDriver::new("pm_drv").with_power_listener();
        let power = driver.power_log();
        let (loader, _calls) = BuiltinDriverLoader::with_scripted(driver);
        let mut node = DeviceNode::new(descriptor("pm_drv"));
        node.launch(&loader).unwrap();

        // Act
        node.pm_notify(PowerState::Suspend).unwrap();
        node.pm_notify(PowerState::DozeResume).unwrap();

        // Assert
        assert_eq!(
            *power.lock().unwrap(),
            vec![
                ("pm_drv".to_string(), PowerState::Suspend),
                ("pm_drv".to_string(), PowerState::DozeResume),
            ]
        );
    }

    #[test]
    fn test_node_without_listeners_accepts_every_state() {
        let node = DeviceNode::new(descriptor("any_drv"));
        assert!(node.pm_notify(PowerState::Resume).is_ok());
        assert!(node.pm_notify(PowerState::DozeSuspend).is_ok());
    }
}
