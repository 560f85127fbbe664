//! A device inside a host: the group of nodes sharing one host+device id.

use hdf_core::{DeviceId, HdfResult, PowerState};
use tracing::warn;

use super::device_node::DeviceNode;
use super::driver::DriverLoader;

/// Nodes of one device, kept in the order they were added.
pub struct HdfDevice {
    device_id: DeviceId,
    nodes: Vec<DeviceNode>,
}

impl HdfDevice {
    /// Creates an empty device for the host and device index of `id`.
    pub fn new(id: DeviceId) -> Self {
        Self {
            device_id: DeviceId::new(id.host_id(), id.device_index(), 0),
            nodes: Vec::new(),
        }
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    /// Whether `id` names a node of this device.
    pub fn owns(&self, id: DeviceId) -> bool {
        self.device_id.same_device(id)
    }

    pub fn nodes(&self) -> &[DeviceNode] {
        &self.nodes
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn find_node(&self, id: DeviceId) -> Option<&DeviceNode> {
        self.nodes.iter().find(|node| node.device_id() == id)
    }

    pub fn find_node_mut(&mut self, id: DeviceId) -> Option<&mut DeviceNode> {
        self.nodes.iter_mut().find(|node| node.device_id() == id)
    }

    pub fn attach(&mut self, node: DeviceNode) {
        self.nodes.push(node);
    }

    /// Removes node `id`, releasing its driver.  Returns `false` if absent.
    pub fn detach(&mut self, id: DeviceId, loader: &dyn DriverLoader) -> bool {
        let Some(pos) = self.nodes.iter().position(|node| node.device_id() == id) else {
            return false;
        };
        let mut node = self.nodes.remove(pos);
        node.release(loader);
        true
    }

    /// Releases every node, newest first.
    pub fn release_all(&mut self, loader: &dyn DriverLoader) {
        while let Some(mut node) = self.nodes.pop() {
            node.release(loader);
        }
    }

    /// Notifies every node; wake states go newest node first.
    ///
    /// Every node is visited even after a failure; the first failure is
    /// returned.
    pub fn pm_notify(&self, state: PowerState) -> HdfResult<()> {
        let mut outcome = Ok(());
        let mut visit = |node: &DeviceNode| {
            if let Err(e) = node.pm_notify(state) {
                warn!(device = %node.device_id(), ?state, "node rejected power state: {e}");
                if outcome.is_ok() {
                    outcome = Err(e);
                }
            }
        };
        if state.is_wake() {
            self.nodes.iter().rev().for_each(&mut visit);
        } else {
            self.nodes.iter().for_each(&mut visit);
        }
        outcome
    }
}
