//! End-to-end tests: a device manager supervising real device hosts.
//!
//! The installer does not spawn processes here.  Its start hook brings up an
//! in-process `DeviceHost` on a background thread, connects it to the
//! manager's TCP listener and lets it attach, exactly as the `hdf-devhost`
//! binary would.  Shutting a host's socket down plays the part of a crash.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use hdf_core::ipc::{DevHostServiceStub, SocketChannel};
use hdf_core::{DevHostService, DeviceDescriptor, DeviceId, DevicePolicy, HostAttr, PowerState, Preload};
use hdf_devhost::infrastructure::devmgr_client::RemoteDevmgrClient;
use hdf_devhost::infrastructure::driver_loader::mock::{PowerLog, ScriptedDriver};
use hdf_devhost::infrastructure::driver_loader::BuiltinDriverLoader;
use hdf_devhost::infrastructure::power_events::mock::ManualPowerSource;
use hdf_devhost::DeviceHost;
use hdf_devmgr::application::device_manager::DEFAULT_MAX_RESTART;
use hdf_devmgr::infrastructure::installer::mock::{RecordingInstaller, StartCall};
use hdf_devmgr::infrastructure::listener::HostListener;
use hdf_devmgr::DeviceManager;
use tokio::runtime::{Handle, Runtime};
use tokio::sync::watch;

const TIMEOUT: Duration = Duration::from_secs(5);

type Registry = Arc<Mutex<HashMap<u16, (Arc<DeviceHost>, Arc<SocketChannel>)>>>;

struct System {
    manager: Arc<DeviceManager>,
    installer: Arc<RecordingInstaller>,
    hosts: Registry,
    power_log: PowerLog,
    shutdown: watch::Sender<bool>,
    runtime: Option<Runtime>,
}

impl Drop for System {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
        // Host calls may still be parked on their sockets; do not wait for them.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

fn host_attr(host_id: u16, name: &str) -> HostAttr {
    let mut attr = HostAttr::new(host_id, name)
        .with_device(
            DeviceDescriptor::new(
                DeviceId::new(host_id, 0, 0),
                format!("{name}_drv"),
                format!("{name}_svc"),
            )
            .with_policy(DevicePolicy::Public),
        )
        .with_device(
            DeviceDescriptor::new(
                DeviceId::new(host_id, 1, 0),
                format!("{name}_drv"),
                format!("{name}_lazy"),
            )
            .with_preload(Preload::Disable),
        );
    attr.priority = host_id;
    attr
}

/// Brings up an in-process host for `call` and attaches it to `addr`.
fn launch_host(
    call: &StartCall,
    addr: SocketAddr,
    runtime: &Handle,
    hosts: &Registry,
    log: &PowerLog,
) {
    let loader = BuiltinDriverLoader::new();
    loader.register_scripted(
        ScriptedDriver::new(&format!("{}_drv", call.host_name))
            .with_power_listener()
            .sharing_power_log(log),
    );
    let client = Arc::new(RemoteDevmgrClient::new());
    let host = Arc::new(
        DeviceHost::new(
            call.host_id,
            &call.host_name,
            Arc::new(loader),
            client.clone(),
            Arc::new(ManualPowerSource::new()),
        )
        .expect("device host"),
    );
    let channel = runtime
        .block_on(SocketChannel::connect(
            addr,
            Arc::new(DevHostServiceStub::new(host.clone())),
            Some(TIMEOUT),
        ))
        .expect("connect to manager");
    client.bind(channel.clone());
    hosts
        .lock()
        .unwrap()
        .insert(call.host_id, (host.clone(), channel));
    host.start_service().expect("attach to manager");
}

fn start_system(names: &[&str]) -> System {
    let runtime = Runtime::new().expect("runtime");
    let listener = runtime
        .block_on(HostListener::bind("127.0.0.1:0".parse().unwrap()))
        .expect("bind");
    let addr = listener.local_addr();
    let hosts: Registry = Arc::new(Mutex::new(HashMap::new()));
    let power_log: PowerLog = Arc::new(Mutex::new(Vec::new()));

    let installer = {
        let hosts = Arc::clone(&hosts);
        let log = Arc::clone(&power_log);
        let handle = runtime.handle().clone();
        Arc::new(RecordingInstaller::with_start_hook(move |call| {
            // The manager lock is held during the hook; attach from elsewhere.
            let call = call.clone();
            let hosts = Arc::clone(&hosts);
            let log = Arc::clone(&log);
            let handle = handle.clone();
            thread::spawn(move || launch_host(&call, addr, &handle, &hosts, &log));
        }))
    };

    let attrs = names
        .iter()
        .enumerate()
        .map(|(index, name)| host_attr(index as u16 + 1, name))
        .collect();
    let manager = Arc::new(
        DeviceManager::new(attrs, installer.clone(), DEFAULT_MAX_RESTART).expect("manager"),
    );
    let (shutdown, shutdown_rx) = watch::channel(false);
    {
        let _guard = runtime.enter();
        listener.serve(Arc::clone(&manager), Some(TIMEOUT), shutdown_rx);
    }

    manager.start_service().expect("start service");
    let system = System {
        manager,
        installer,
        hosts,
        power_log,
        shutdown,
        runtime: Some(runtime),
    };
    for host_id in 1..=names.len() as u16 {
        wait_loaded(&system, host_id);
    }
    system
}

fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + TIMEOUT;
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(10));
    }
}

/// Waits until host `host_id` is attached and owns its preload device.
fn wait_loaded(system: &System, host_id: u16) {
    wait_until("preload device", || {
        system.manager.host_devices(host_id).len() == 1
    });
}

fn device_host(system: &System, host_id: u16) -> Arc<DeviceHost> {
    system.hosts.lock().unwrap()[&host_id].0.clone()
}

/// Drops host `host_id`'s connection as a crash would.
fn crash(system: &System, host_id: u16) {
    let channel = system.hosts.lock().unwrap()[&host_id].1.clone();
    channel.shutdown();
}

fn power_order(system: &System) -> Vec<String> {
    system
        .power_log
        .lock()
        .unwrap()
        .iter()
        .map(|(module, _)| module.clone())
        .collect()
}

#[test]
fn test_started_hosts_receive_their_preload_devices() {
    // Arrange / Act
    let system = start_system(&["alpha", "beta"]);

    // Assert
    assert_eq!(system.manager.host_ids(), vec![1, 2]);
    assert_eq!(device_host(&system, 1).device_count(), 1);
    assert_eq!(device_host(&system, 2).device_count(), 1);
    let tokens = system.manager.host_devices(2);
    assert_eq!(tokens[0].service_name, "beta_svc");
    assert!(system.installer.starts().iter().all(|call| !call.is_respawn));
}

#[test]
fn test_on_demand_device_is_loaded_and_unloaded_remotely() {
    // Arrange
    let system = start_system(&["alpha"]);
    let host = device_host(&system, 1);

    // Act / Assert
    system.manager.load_device("alpha_lazy").expect("load");
    assert_eq!(host.device_count(), 2);

    system.manager.unload_device("alpha_lazy").expect("unload");
    assert_eq!(host.device_count(), 1);
    assert_eq!(system.manager.host_devices(1).len(), 1);
}

#[test]
fn test_power_changes_cross_hosts_in_direction_order() {
    // Arrange
    let system = start_system(&["alpha", "beta"]);

    // Act
    system
        .manager
        .power_state_change(PowerState::Suspend)
        .expect("suspend");
    system
        .manager
        .power_state_change(PowerState::Resume)
        .expect("resume");

    // Assert
    assert_eq!(
        power_order(&system),
        vec!["alpha_drv", "beta_drv", "beta_drv", "alpha_drv"]
    );
}

#[test]
fn test_crashed_host_is_respawned_and_reloaded() {
    // Arrange
    let system = start_system(&["alpha", "beta"]);
    let first_pid = system.manager.host_pid(1).flatten();

    // Act
    crash(&system, 1);

    // Assert
    wait_until("respawn", || system.installer.respawns() == 1);
    wait_loaded(&system, 1);
    let respawn = system.installer.starts().pop().expect("respawn call");
    assert_eq!((respawn.host_id, respawn.is_respawn), (1, true));
    assert_eq!(system.manager.death_count("alpha"), 1);
    assert_ne!(system.manager.host_pid(1).flatten(), first_pid);
    assert_eq!(system.manager.death_count("beta"), 0);
    assert_eq!(system.manager.host_devices(2).len(), 1);
}

#[test]
fn test_host_that_keeps_crashing_is_given_up() {
    // Arrange
    let system = start_system(&["alpha"]);

    // Act – three crashes are answered with respawns
    for round in 1..=3 {
        crash(&system, 1);
        wait_until("respawn", || system.installer.respawns() == round);
        wait_loaded(&system, 1);
    }
    crash(&system, 1);

    // Assert – the fourth leaves the host down
    wait_until("give up", || system.manager.host_pid(1) == Some(None));
    assert_eq!(system.installer.respawns(), 3);
    assert_eq!(system.manager.death_count("alpha"), 0);
    assert!(system.manager.host_devices(1).is_empty());
}

#[test]
fn test_stopped_host_is_not_respawned() {
    // Arrange
    let system = start_system(&["alpha"]);

    // Act
    system.manager.stop_device_host(1).expect("stop");
    crash(&system, 1);
    thread::sleep(Duration::from_millis(100));

    // Assert
    assert_eq!(system.installer.stops(), vec![1]);
    assert_eq!(system.installer.respawns(), 0);
    assert!(system.manager.host_ids().is_empty());
}
