//! Device identity and configuration.
//!
//! A device is described once, by the attribute manager, as a
//! [`DeviceDescriptor`].  The descriptor never changes after construction; the
//! host turns it into a live device node and the manager keeps a small
//! [`DeviceToken`] for every node a host reports as attached.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{HdfError, HdfResult};

/// Packed device identifier.
///
/// Layout (most significant first):
///
/// ```text
/// [host_id:16][device_index:8][node_index:8]
/// ```
///
/// All nodes of one device share the upper 24 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(u32);

impl DeviceId {
    /// Builds an id from its parts.
    pub const fn new(host_id: u16, device_index: u8, node_index: u8) -> Self {
        Self(((host_id as u32) << 16) | ((device_index as u32) << 8) | node_index as u32)
    }

    /// Wraps a raw packed value.
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw packed value.
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Host that owns the device.
    pub const fn host_id(self) -> u16 {
        (self.0 >> 16) as u16
    }

    /// Index of the device within its host.
    pub const fn device_index(self) -> u8 {
        (self.0 >> 8) as u8
    }

    /// Index of the node within its device.
    pub const fn node_index(self) -> u8 {
        self.0 as u8
    }

    /// `true` when both ids name nodes of the same device.
    pub const fn same_device(self, other: DeviceId) -> bool {
        self.0 >> 8 == other.0 >> 8
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.host_id(),
            self.device_index(),
            self.node_index()
        )
    }
}

/// Who may see the service a device publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DevicePolicy {
    /// No service is published.
    #[default]
    None,
    /// Service visible to kernel-space callers only.
    Public,
    /// Service visible to user-space callers too.
    Capacity,
}

/// When a device is added to its host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preload {
    /// Added as soon as the host attaches.
    #[default]
    Enable,
    /// Added in the second start-up pass.
    EnableStep2,
    /// Added only on explicit load.
    Disable,
}

impl Preload {
    /// `true` if the device is added when its host attaches.
    pub fn at_attach(self) -> bool {
        !matches!(self, Preload::Disable)
    }
}

/// Immutable configuration of one device node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    device_id: DeviceId,
    module_name: String,
    service_name: String,
    policy: DevicePolicy,
    priority: u16,
    preload: Preload,
    permission: u16,
    match_attribute: String,
}

impl DeviceDescriptor {
    /// Starts a descriptor with default policy, priority, preload and permission.
    pub fn new(
        device_id: DeviceId,
        module_name: impl Into<String>,
        service_name: impl Into<String>,
    ) -> Self {
        Self {
            device_id,
            module_name: module_name.into(),
            service_name: service_name.into(),
            policy: DevicePolicy::default(),
            priority: 100,
            preload: Preload::default(),
            permission: 0o664,
            match_attribute: String::new(),
        }
    }

    pub fn with_policy(mut self, policy: DevicePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_priority(mut self, priority: u16) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_preload(mut self, preload: Preload) -> Self {
        self.preload = preload;
        self
    }

    pub fn with_permission(mut self, permission: u16) -> Self {
        self.permission = permission;
        self
    }

    pub fn with_match_attribute(mut self, match_attribute: impl Into<String>) -> Self {
        self.match_attribute = match_attribute.into();
        self
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn policy(&self) -> DevicePolicy {
        self.policy
    }

    pub fn priority(&self) -> u16 {
        self.priority
    }

    pub fn preload(&self) -> Preload {
        self.preload
    }

    pub fn permission(&self) -> u16 {
        self.permission
    }

    pub fn match_attribute(&self) -> &str {
        &self.match_attribute
    }

    /// Checks the fields a host needs before it can load the driver.
    ///
    /// # Errors
    ///
    /// Returns [`HdfError::InvalidParam`] when the module name is empty, or
    /// when the device publishes a service without naming it.
    pub fn validate(&self) -> HdfResult<()> {
        if self.module_name.is_empty() {
            return Err(HdfError::InvalidParam);
        }
        if self.policy != DevicePolicy::None && self.service_name.is_empty() {
            return Err(HdfError::InvalidParam);
        }
        Ok(())
    }
}

/// Manager-side record of a device node a host has attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceToken {
    pub device_id: DeviceId,
    pub service_name: String,
}

impl DeviceToken {
    pub fn new(device_id: DeviceId, service_name: impl Into<String>) -> Self {
        Self {
            device_id,
            service_name: service_name.into(),
        }
    }
}

impl From<&DeviceDescriptor> for DeviceToken {
    fn from(descriptor: &DeviceDescriptor) -> Self {
        Self::new(descriptor.device_id(), descriptor.service_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_id_packs_and_unpacks_parts() {
        let id = DeviceId::new(0x0102, 3, 4);
        assert_eq!(id.raw(), 0x0102_0304);
        assert_eq!(id.host_id(), 0x0102);
        assert_eq!(id.device_index(), 3);
        assert_eq!(id.node_index(), 4);
        assert_eq!(DeviceId::from_raw(id.raw()), id);
    }

    #[test]
    fn test_same_device_ignores_node_index() {
        let a = DeviceId::new(1, 2, 0);
        let b = DeviceId::new(1, 2, 7);
        let c = DeviceId::new(1, 3, 0);
        assert!(a.same_device(b));
        assert!(!a.same_device(c));
    }

    #[test]
    fn test_device_id_display_is_colon_separated() {
        assert_eq!(DeviceId::new(5, 1, 2).to_string(), "5:1:2");
    }

    #[test]
    fn test_descriptor_defaults() {
        let desc = DeviceDescriptor::new(DeviceId::new(1, 0, 0), "sample_driver", "sample_service");
        assert_eq!(desc.policy(), DevicePolicy::None);
        assert_eq!(desc.preload(), Preload::Enable);
        assert_eq!(desc.priority(), 100);
        assert!(desc.match_attribute().is_empty());
        assert!(desc.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_module_name() {
        let desc = DeviceDescriptor::new(DeviceId::new(1, 0, 0), "", "svc");
        assert_eq!(desc.validate(), Err(HdfError::InvalidParam));
    }

    #[test]
    fn test_validate_rejects_published_service_without_name() {
        let desc = DeviceDescriptor::new(DeviceId::new(1, 0, 0), "drv", "")
            .with_policy(DevicePolicy::Capacity);
        assert_eq!(desc.validate(), Err(HdfError::InvalidParam));
    }

    #[test]
    fn test_preload_disable_is_not_loaded_at_attach() {
        assert!(Preload::Enable.at_attach());
        assert!(Preload::EnableStep2.at_attach());
        assert!(!Preload::Disable.at_attach());
    }

    #[test]
    fn test_token_from_descriptor_copies_identity() {
        let desc = DeviceDescriptor::new(DeviceId::new(2, 1, 0), "drv", "light_service");
        let token = DeviceToken::from(&desc);
        assert_eq!(token.device_id, desc.device_id());
        assert_eq!(token.service_name, "light_service");
    }
}
