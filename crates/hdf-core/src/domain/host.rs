//! Host attributes produced by the attribute manager.

use serde::{Deserialize, Serialize};

use super::device::DeviceDescriptor;

/// Process id of a running device host; `None` is the invalid sentinel.
pub type HostPid = Option<u32>;

/// Static description of one device host and the devices it carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostAttr {
    pub host_id: u16,
    pub host_name: String,
    /// Start-up priority; lower values start first.
    pub priority: u16,
    pub devices: Vec<DeviceDescriptor>,
}

impl HostAttr {
    pub fn new(host_id: u16, host_name: impl Into<String>) -> Self {
        Self {
            host_id,
            host_name: host_name.into(),
            priority: 100,
            devices: Vec::new(),
        }
    }

    pub fn with_device(mut self, descriptor: DeviceDescriptor) -> Self {
        self.devices.push(descriptor);
        self
    }

    /// Looks a device up by the service name it publishes.
    pub fn find_device(&self, service_name: &str) -> Option<&DeviceDescriptor> {
        self.devices
            .iter()
            .find(|desc| desc.service_name() == service_name)
    }
}
