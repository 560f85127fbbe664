//! Host-side handle on the device manager.

use std::sync::{Arc, OnceLock};

use hdf_core::protocol::IpcRequest;
use hdf_core::{DevmgrServiceClient, HdfError, HdfResult, RemoteChannel};
use tracing::{debug, warn};

/// Calls the manager over a [`RemoteChannel`].
///
/// The channel is bound after construction because the host service (which
/// needs this client) must exist before the connection that serves it.
#[derive(Default)]
pub struct RemoteDevmgrClient {
    channel: OnceLock<Arc<dyn RemoteChannel>>,
}

impl RemoteDevmgrClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds the channel to the manager.  Later calls are ignored.
    pub fn bind(&self, channel: Arc<dyn RemoteChannel>) {
        if self.channel.set(channel).is_err() {
            warn!("manager channel already bound");
        }
    }
}

impl DevmgrServiceClient for RemoteDevmgrClient {
    fn attach_device_host(&self, host_id: u16) -> HdfResult<()> {
        let channel = self.channel.get().ok_or(HdfError::InvalidObject)?;
        let request = IpcRequest::AttachHost { host_id };
        let payload = request.encode_payload().map_err(|_| HdfError::InvalidParam)?;
        debug!(host_id, "attaching to device manager");
        channel.send_request(request.code(), payload)?.into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hdf_core::ipc::{DeathRecipient, DeathRecipientId, Reply, TransportError};
    use hdf_core::protocol::codes;
    use mockall::mock;

    mock! {
        Channel {}
        impl RemoteChannel for Channel {
            fn send_request(&self, code: u16, payload: Vec<u8>) -> Result<Reply, TransportError>;
            fn add_death_recipient(&self, recipient: DeathRecipient) -> DeathRecipientId;
            fn remove_death_recipient(&self, id: DeathRecipientId);
            fn is_alive(&self) -> bool;
        }
    }

    #[test]
    fn test_attach_sends_host_id() {
        // Arrange
        let mut channel = MockChannel::new();
        channel
            .expect_send_request()
            .withf(|code, payload| {
                *code == codes::ATTACH_HOST
                    && IpcRequest::decode(*code, payload).ok()
                        == Some(IpcRequest::AttachHost { host_id: 12 })
            })
            .times(1)
            .returning(|_, _| Ok(Reply::from_status(0)));
        let client = RemoteDevmgrClient::new();
        client.bind(Arc::new(channel));

        // Act
        let result = client.attach_device_host(12);

        // Assert
        assert!(result.is_ok());
    }

    #[test]
    fn test_attach_before_bind_is_invalid_object() {
        let client = RemoteDevmgrClient::new();
        assert_eq!(client.attach_device_host(1), Err(HdfError::InvalidObject));
    }

    #[test]
    fn test_transport_failure_is_generic_failure() {
        let mut channel = MockChannel::new();
        channel
            .expect_send_request()
            .returning(|_, _| Err(TransportError::Disconnected));
        let client = RemoteDevmgrClient::new();
        client.bind(Arc::new(channel));

        assert_eq!(client.attach_device_host(1), Err(HdfError::Failure));
    }

    #[test]
    fn test_manager_status_is_returned() {
        let mut channel = MockChannel::new();
        channel
            .expect_send_request()
            .returning(|_, _| Ok(Reply::from_status(HdfError::NotFound.code())));
        let client = RemoteDevmgrClient::new();
        client.bind(Arc::new(channel));

        assert_eq!(client.attach_device_host(1), Err(HdfError::NotFound));
    }
}
