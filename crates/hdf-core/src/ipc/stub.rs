//! Host-side request dispatcher.

use std::sync::Arc;

use tracing::{debug, warn};

use super::channel::{RemoteChannel, Reply, RequestHandler};
use crate::error::{result_to_status, HdfError};
use crate::protocol::IpcRequest;
use crate::service::DevHostService;

/// Serves manager requests by calling a local [`DevHostService`].
pub struct DevHostServiceStub {
    service: Arc<dyn DevHostService>,
}

impl DevHostServiceStub {
    pub fn new(service: Arc<dyn DevHostService>) -> Self {
        Self { service }
    }
}

impl RequestHandler for DevHostServiceStub {
    fn on_request(&self, _channel: &Arc<dyn RemoteChannel>, code: u16, payload: &[u8]) -> Reply {
        let request = match IpcRequest::decode(code, payload) {
            Ok(request) => request,
            Err(e) => {
                warn!(code, "rejecting request: {e}");
                return Reply::from_status(HdfError::InvalidParam.code());
            }
        };
        debug!(?request, "host request");
        let result = match request {
            IpcRequest::AddDevice(descriptor) => self.service.add_device(&descriptor),
            IpcRequest::DelDevice(device_id) => self.service.del_device(device_id),
            IpcRequest::StartService => self.service.start_service(),
            IpcRequest::PmNotify(state) => self.service.pm_notify(state),
            IpcRequest::AttachHost { .. } => Err(HdfError::NotSupported),
        };
        Reply::from_status(result_to_status(&result))
    }
}
