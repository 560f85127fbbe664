//! Manager-side stand-in for a device host living in another process.

use std::sync::Arc;

use hdf_core::ipc::DeathRecipientId;
use hdf_core::protocol::IpcRequest;
use hdf_core::{
    DevHostService, DeviceDescriptor, DeviceId, HdfError, HdfResult, PowerState, RemoteChannel,
};
use tracing::{debug, warn};

use crate::application::device_manager::HostDeathReporter;

/// Forwards [`DevHostService`] calls over a [`RemoteChannel`].
///
/// Construction registers a death recipient that reports the host, with the
/// generation the reporter was issued for, to the manager; dropping the proxy
/// unregisters it.
pub struct DevHostProxy {
    host_id: u16,
    channel: Arc<dyn RemoteChannel>,
    recipient: DeathRecipientId,
}

impl DevHostProxy {
    pub fn new(channel: Arc<dyn RemoteChannel>, reporter: HostDeathReporter) -> Self {
        let host_id = reporter.host_id();
        debug!(host_id, generation = reporter.generation(), "host proxy created");
        let recipient = channel.add_death_recipient(Box::new(move || reporter.report()));
        Self {
            host_id,
            channel,
            recipient,
        }
    }

    pub fn host_id(&self) -> u16 {
        self.host_id
    }

    pub fn is_alive(&self) -> bool {
        self.channel.is_alive()
    }

    fn call(&self, request: IpcRequest) -> HdfResult<()> {
        let payload = request.encode_payload().map_err(|e| {
            warn!(host_id = self.host_id, "cannot encode host request: {e}");
            HdfError::InvalidParam
        })?;
        let reply = self
            .channel
            .send_request(request.code(), payload)
            .map_err(|e| {
                warn!(host_id = self.host_id, code = request.code(), "host call failed: {e}");
                HdfError::from(e)
            })?;
        reply.into_result()
    }
}

impl DevHostService for DevHostProxy {
    fn add_device(&self, descriptor: &DeviceDescriptor) -> HdfResult<()> {
        self.call(IpcRequest::AddDevice(descriptor.clone()))
    }

    fn del_device(&self, device_id: DeviceId) -> HdfResult<()> {
        self.call(IpcRequest::DelDevice(device_id))
    }

    fn start_service(&self) -> HdfResult<()> {
        self.call(IpcRequest::StartService)
    }

    fn pm_notify(&self, state: PowerState) -> HdfResult<()> {
        self.call(IpcRequest::PmNotify(state))
    }
}

impl Drop for DevHostProxy {
    fn drop(&mut self) {
        self.channel.remove_death_recipient(self.recipient);
    }
}
