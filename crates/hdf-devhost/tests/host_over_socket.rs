//! Integration tests for a device host driven by a manager over TCP.
//!
//! The test plays the manager: it accepts the host's connection, answers
//! `ATTACH_HOST` and then sends device and power requests, checking what the
//! scripted drivers observed.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hdf_core::domain::power::KEVENT_POWER_SUSPEND;
use hdf_core::ipc::{DevHostServiceStub, SocketChannel};
use hdf_core::{
    DevHostService, DeviceDescriptor, DeviceId, HdfError, HdfResult, IpcRequest, PowerState,
    RemoteChannel, Reply, RequestHandler,
};
use hdf_devhost::application::device_node::NodeState;
use hdf_devhost::infrastructure::devmgr_client::RemoteDevmgrClient;
use hdf_devhost::infrastructure::driver_loader::mock::{DriverCall, PowerLog, ScriptedDriver};
use hdf_devhost::infrastructure::driver_loader::BuiltinDriverLoader;
use hdf_devhost::infrastructure::power_events::mock::ManualPowerSource;
use hdf_devhost::DeviceHost;
use tokio::net::TcpListener;
use tokio::runtime::Runtime;

/// Manager side: accepts attaches and reports them on a channel.
struct FakeManager {
    attached: Mutex<mpsc::Sender<u16>>,
}

impl RequestHandler for FakeManager {
    fn on_request(&self, _: &Arc<dyn RemoteChannel>, code: u16, payload: &[u8]) -> Reply {
        match IpcRequest::decode(code, payload) {
            Ok(IpcRequest::AttachHost { host_id }) => {
                let _ = self.attached.lock().unwrap().send(host_id);
                Reply::from_status(0)
            }
            _ => Reply::from_status(HdfError::NotSupported.code()),
        }
    }
}

struct Harness {
    _runtime: Runtime,
    host: Arc<DeviceHost>,
    manager: Arc<SocketChannel>,
    power: Arc<ManualPowerSource>,
    log: PowerLog,
    calls: Vec<(String, Arc<Mutex<Vec<DriverCall>>>)>,
}

fn start_host() -> Harness {
    let log: PowerLog = Arc::new(Mutex::new(Vec::new()));
    let loader = BuiltinDriverLoader::new();
    let mut calls = Vec::new();
    for name in ["light_drv", "sensor_drv"] {
        let driver = ScriptedDriver::new(name).with_power_listener().sharing_power_log(&log);
        calls.push((name.to_string(), driver.calls()));
        loader.register_scripted(driver);
    }
    let power = Arc::new(ManualPowerSource::new());
    let client = Arc::new(RemoteDevmgrClient::new());
    let host = Arc::new(
        DeviceHost::new(5, "test_host", Arc::new(loader), client.clone(), power.clone())
            .expect("host"),
    );

    let runtime = Runtime::new().expect("runtime");
    let (attached_tx, attached_rx) = mpsc::channel();
    let stub = Arc::new(DevHostServiceStub::new(host.clone()));
    let (channel, manager) = runtime.block_on(async {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let channel = SocketChannel::connect(addr, stub, Some(Duration::from_secs(5)))
            .await
            .expect("connect");
        let (stream, _) = listener.accept().await.expect("accept");
        let manager = SocketChannel::spawn(
            stream,
            Arc::new(FakeManager {
                attached: Mutex::new(attached_tx),
            }),
            Some(Duration::from_secs(5)),
        )
        .expect("manager channel");
        (channel, manager)
    });
    client.bind(channel);

    host.start_service().expect("start service");
    assert_eq!(attached_rx.recv_timeout(Duration::from_secs(5)), Ok(5));

    Harness {
        _runtime: runtime,
        host,
        manager,
        power,
        log,
        calls,
    }
}

fn call(channel: &SocketChannel, request: IpcRequest) -> HdfResult<()> {
    let payload = request.encode_payload().expect("encode");
    channel
        .send_request(request.code(), payload)
        .map_err(HdfError::from)?
        .into_result()
}

fn add(harness: &Harness, device_index: u8, module: &str) -> HdfResult<()> {
    let descriptor = DeviceDescriptor::new(DeviceId::new(5, device_index, 0), module, "");
    call(&harness.manager, IpcRequest::AddDevice(descriptor))
}

#[test]
fn test_manager_adds_and_removes_devices() {
    // Arrange
    let harness = start_host();

    // Act
    let added = add(&harness, 0, "light_drv");
    let unknown = add(&harness, 1, "missing_drv");
    let removed = call(&harness.manager, IpcRequest::DelDevice(DeviceId::new(5, 0, 0)));

    // Assert
    assert_eq!(added, Ok(()));
    assert_eq!(unknown, Err(HdfError::NotFound));
    assert_eq!(removed, Ok(()));
    assert_eq!(harness.host.device_count(), 0);
    let light_calls = harness.calls[0].1.lock().unwrap().clone();
    assert_eq!(
        light_calls,
        vec![DriverCall::Bind, DriverCall::Init, DriverCall::Release]
    );
}

#[test]
fn test_remote_power_notification_follows_direction_rule() {
    // Arrange
    let harness = start_host();
    add(&harness, 0, "light_drv").unwrap();
    add(&harness, 1, "sensor_drv").unwrap();
    assert_eq!(
        harness.host.node_state(DeviceId::new(5, 1, 0)),
        Some(NodeState::Launched)
    );

    // Act
    call(&harness.manager, IpcRequest::PmNotify(PowerState::DozeSuspend)).unwrap();
    call(&harness.manager, IpcRequest::PmNotify(PowerState::DozeResume)).unwrap();

    // Assert
    let seen: Vec<(String, PowerState)> = harness.log.lock().unwrap().clone();
    assert_eq!(
        seen,
        vec![
            ("light_drv".to_string(), PowerState::DozeSuspend),
            ("sensor_drv".to_string(), PowerState::DozeSuspend),
            ("sensor_drv".to_string(), PowerState::DozeResume),
            ("light_drv".to_string(), PowerState::DozeResume),
        ]
    );
}

#[test]
fn test_kernel_event_fans_out_after_attach() {
    let harness = start_host();
    add(&harness, 0, "light_drv").unwrap();

    harness.power.emit(KEVENT_POWER_SUSPEND);

    assert_eq!(
        *harness.log.lock().unwrap(),
        vec![("light_drv".to_string(), PowerState::Suspend)]
    );
}

#[test]
fn test_start_service_request_is_idempotent() {
    let harness = start_host();
    assert_eq!(call(&harness.manager, IpcRequest::StartService), Ok(()));
    assert!(harness.host.start_service().is_ok());
    assert_eq!(
        call(&harness.manager, IpcRequest::AttachHost { host_id: 5 }),
        Err(HdfError::NotSupported)
    );
}
