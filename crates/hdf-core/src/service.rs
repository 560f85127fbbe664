//! Service interfaces shared by the device manager and device hosts.
//!
//! [`DevHostService`] is implemented twice: by the in-host service that
//! really owns the device nodes, and by the manager-side proxy that forwards
//! every call over a remote channel.  The manager only ever holds an
//! `Arc<dyn DevHostService>`, so it cannot tell a local host from a remote one.

use crate::domain::device::{DeviceDescriptor, DeviceId};
use crate::domain::power::PowerState;
use crate::error::HdfResult;

/// Operations a device host offers to the manager.
pub trait DevHostService: Send + Sync {
    /// Loads the driver named by `descriptor` and launches a node for it.
    fn add_device(&self, descriptor: &DeviceDescriptor) -> HdfResult<()>;

    /// Releases the node `device_id` and drops its driver.
    fn del_device(&self, device_id: DeviceId) -> HdfResult<()>;

    /// Registers the host with the manager and subscribes to power events.
    fn start_service(&self) -> HdfResult<()>;

    /// Propagates a power state to every node of the host.
    fn pm_notify(&self, state: PowerState) -> HdfResult<()>;
}

/// Operations the manager offers to a device host.
pub trait DevmgrServiceClient: Send + Sync {
    /// Announces that host `host_id` is up and ready to receive devices.
    fn attach_device_host(&self, host_id: u16) -> HdfResult<()>;
}
