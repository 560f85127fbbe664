//! The device manager: host records, device placement and the death policy.
//!
//! # Respawn policy (for beginners)
//!
//! Every host name has a death counter that survives respawns.  When a host
//! that owned devices dies unexpectedly:
//!
//! ```text
//!   counter absent   ──►  counter = 1, respawn
//!   counter < bound  ──►  counter += 1, respawn
//!   counter ≥ bound  ──►  counter = 0, stop flag cleared, give up
//! ```
//!
//! With the default bound of 3 a crashing host is restarted three times; the
//! fourth consecutive death leaves it down with an invalid pid.
//!
//! Deaths never run on the transport thread that noticed them: the host
//! proxy posts `DEVHOST_DIED` to the manager's own message task, and the
//! whole handling below runs under the manager lock on the loop thread.
//!
//! # Generations
//!
//! Every start, respawn and attach stamps the record with a fresh,
//! manager-wide generation number.  Death notices and preload requests carry
//! the generation they were issued for; one that no longer matches the
//! record belongs to a process the manager has already replaced and is
//! dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use hdf_core::{
    DevHostService, DeviceDescriptor, DeviceToken, HdfError, HdfResult, HostAttr, HostPid,
    Message, MessageHandler, MessageLooper, MessageTask, PowerState, Preload, WeakMessageTask,
};
use tracing::{debug, error, info, warn};

use super::host_client::DevHostClient;
use super::installer::DriverInstaller;

/// A host process died (`arg` = host id, payload = generation).
pub const DEVHOST_DIED: u16 = 1;
/// Add the preload devices of a freshly attached host (`arg` = host id,
/// payload = generation).
pub const LOAD_HOST_DEVICES: u16 = 2;

/// Consecutive deaths tolerated before a host is given up.
pub const DEFAULT_MAX_RESTART: u32 = 3;

/// What the manager did about one `DEVHOST_DIED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeathOutcome {
    /// No record for that host, or the notice was for an earlier process.
    Ignored,
    /// Cleaned up without a restart: no devices, stop flag or pending unload.
    Retired,
    /// Death bound reached; the host stays down.
    GaveUp,
    /// Restarted with the new pid.
    Respawned(u32),
    /// The installer could not restart it.
    RespawnFailed,
}

/// Posts the death of one host process to the manager's message task.
///
/// Bound to the host id and the record generation it was issued for.  Holds
/// the task weakly, so a proxy owned by the manager does not keep the
/// manager alive.
#[derive(Clone)]
pub struct HostDeathReporter {
    task: WeakMessageTask<u64>,
    host_id: u16,
    generation: u64,
}

impl HostDeathReporter {
    pub fn host_id(&self) -> u16 {
        self.host_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn report(&self) {
        debug!(host_id = self.host_id, generation = self.generation, "reporting device host death");
        self.task.post(
            Message::new(DEVHOST_DIED)
                .with_arg(u64::from(self.host_id))
                .with_payload(self.generation),
        );
    }
}

// ── Shared state ──────────────────────────────────────────────────────────────

#[derive(Default)]
struct ManagerState {
    /// Records in start order.
    hosts: Vec<DevHostClient>,
    /// Consecutive deaths per host name.
    death_counters: HashMap<String, u32>,
    /// Last generation handed out to any record.
    generation: u64,
}

impl ManagerState {
    fn host(&self, host_id: u16) -> Option<&DevHostClient> {
        self.hosts.iter().find(|client| client.host_id() == host_id)
    }

    fn host_mut(&mut self, host_id: u16) -> Option<&mut DevHostClient> {
        self.hosts
            .iter_mut()
            .find(|client| client.host_id() == host_id)
    }

    fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }
}

struct ManagerCore {
    installer: Arc<dyn DriverInstaller>,
    /// Configured hosts, lowest priority value first.
    host_attrs: Vec<HostAttr>,
    max_restart: u32,
    state: Mutex<ManagerState>,
}

/// Orchestrates every device host of the system.
///
/// Cheap accessors take the manager lock briefly; remote calls to hosts are
/// made without it, except for the installer calls of the death policy.
pub struct DeviceManager {
    core: Arc<ManagerCore>,
    task: MessageTask<u64>,
    _looper: MessageLooper<u64>,
}

impl DeviceManager {
    /// Creates a manager for `hosts` and starts its message loop.
    ///
    /// # Errors
    ///
    /// Returns [`HdfError::ThreadCreateFail`] if the loop thread cannot start.
    pub fn new(
        hosts: Vec<HostAttr>,
        installer: Arc<dyn DriverInstaller>,
        max_restart: u32,
    ) -> HdfResult<Self> {
        let mut host_attrs = hosts;
        host_attrs.sort_by_key(|attr| attr.priority);

        let looper = MessageLooper::start("devmgr-loop")?;
        let core = Arc::new(ManagerCore {
            installer,
            host_attrs,
            max_restart,
            state: Mutex::new(ManagerState::default()),
        });
        let handler: Arc<dyn MessageHandler<u64>> = core.clone();
        let task = MessageTask::new("devmgr", &looper, handler);

        Ok(Self {
            core,
            task,
            _looper: looper,
        })
    }

    /// Death reporter for the process host `host_id` currently runs.
    ///
    /// A host without a record gets generation 0, which no record carries.
    pub fn death_reporter(&self, host_id: u16) -> HostDeathReporter {
        let generation = self
            .inspect_host(host_id, DevHostClient::generation)
            .unwrap_or(0);
        self.reporter(host_id, generation)
    }

    fn reporter(&self, host_id: u16, generation: u64) -> HostDeathReporter {
        HostDeathReporter {
            task: self.task.downgrade(),
            host_id,
            generation,
        }
    }

    /// Starts every configured host, in priority order.
    ///
    /// A host whose first start fails is dropped from the records and not
    /// retried; the others still start.
    pub fn start_service(&self) -> HdfResult<()> {
        let mut started = 0usize;
        for attr in &self.core.host_attrs {
            match self.core.start_host(attr, false) {
                Ok(_) => started += 1,
                Err(e) => warn!(host = %attr.host_name, "device host not started: {e}"),
            }
        }
        info!(
            started,
            configured = self.core.host_attrs.len(),
            "device manager service started"
        );
        Ok(())
    }

    /// Starts one configured host that has no record yet.
    ///
    /// # Errors
    ///
    /// - [`HdfError::NotFound`] if `host_id` is not configured.
    /// - [`HdfError::DeviceBusy`] if the host already has a record.
    /// - [`HdfError::Failure`] if the installer cannot start it.
    pub fn start_device_host(&self, host_id: u16) -> HdfResult<u32> {
        let attr = self.core.host_attr(host_id).ok_or(HdfError::NotFound)?;
        self.core.start_host(attr, false)
    }

    /// Stops host `host_id` on purpose and forgets it.
    ///
    /// If the installer fails to stop the process the record is kept with its
    /// stop flag set, so the eventual death is not answered with a respawn.
    ///
    /// # Errors
    ///
    /// [`HdfError::NotFound`] for an unknown host, [`HdfError::Failure`] if
    /// the installer refused.
    pub fn stop_device_host(&self, host_id: u16) -> HdfResult<()> {
        let mut state = self.core.lock();
        let pos = state
            .hosts
            .iter()
            .position(|client| client.host_id() == host_id)
            .ok_or(HdfError::NotFound)?;
        let client = &mut state.hosts[pos];
        client.stop_flag = true;
        if let Err(e) = self
            .core
            .installer
            .stop_device_host(host_id, client.host_name())
        {
            error!(host_id, host = client.host_name(), "failed to stop device host: {e}");
            return Err(HdfError::Failure);
        }
        let record = state.hosts.remove(pos);
        drop(state);
        info!(host_id, host = record.host_name(), "device host stopped");
        Ok(())
    }

    /// Stops every host that still has a record.
    pub fn shutdown(&self) {
        for host_id in self.host_ids() {
            if let Err(e) = self.stop_device_host(host_id) {
                warn!(host_id, "device host did not stop cleanly: {e}");
            }
        }
    }

    /// Records the service handle of a host that came up and schedules the
    /// loading of its preload devices.
    ///
    /// Returns before any device is added.
    ///
    /// # Errors
    ///
    /// [`HdfError::NotFound`] if the manager never started `host_id`.
    pub fn attach_device_host(
        &self,
        host_id: u16,
        service: Arc<dyn DevHostService>,
    ) -> HdfResult<()> {
        self.attach_remote_host(host_id, |_| service)
    }

    /// Like [`attach_device_host`](Self::attach_device_host), for a service
    /// that watches its peer.
    ///
    /// `connect` runs under the manager lock with a reporter bound to the new
    /// generation, so a death it reports can never be mistaken for one of a
    /// later process.  It must not call into the manager.
    ///
    /// # Errors
    ///
    /// [`HdfError::NotFound`] if the manager never started `host_id`.
    pub fn attach_remote_host(
        &self,
        host_id: u16,
        connect: impl FnOnce(HostDeathReporter) -> Arc<dyn DevHostService>,
    ) -> HdfResult<()> {
        let (previous, generation) = {
            let mut state = self.core.lock();
            if state.host(host_id).is_none() {
                warn!(host_id, "attach from a host the manager did not start");
                return Err(HdfError::NotFound);
            }
            let generation = state.next_generation();
            let service = connect(self.reporter(host_id, generation));
            let Some(client) = state.host_mut(host_id) else {
                return Err(HdfError::NotFound);
            };
            client.generation = generation;
            info!(host_id, host = client.host_name(), pid = ?client.pid(), generation, "device host attached");
            (client.service.replace(service), generation)
        };
        drop(previous);
        self.task.send_message(
            Message::new(LOAD_HOST_DEVICES)
                .with_arg(u64::from(host_id))
                .with_payload(generation),
            false,
        )
    }

    /// Adds the configured device publishing `service_name` to its host.
    ///
    /// Loading a device the host already owns succeeds without a call, and
    /// so does a load the host answers with [`HdfError::DeviceBusy`].
    ///
    /// # Errors
    ///
    /// - [`HdfError::NotFound`] if no configured device publishes the service
    ///   or its host has no record.
    /// - [`HdfError::InvalidObject`] if the host has not attached yet.
    /// - Whatever the host's `add_device` returns.
    pub fn load_device(&self, service_name: &str) -> HdfResult<()> {
        let (host_id, descriptor) = self
            .core
            .host_attrs
            .iter()
            .find_map(|attr| {
                attr.find_device(service_name)
                    .map(|descriptor| (attr.host_id, descriptor))
            })
            .ok_or(HdfError::NotFound)?;
        if self
            .core
            .lock()
            .host(host_id)
            .is_some_and(|client| client.owns_service(service_name))
        {
            debug!(service = service_name, "device already loaded");
            return Ok(());
        }
        self.core.add_device_to_host(host_id, descriptor)
    }

    /// Removes the device publishing `service_name` from its host.
    ///
    /// While the host works on the removal the device sits on the
    /// pending-unload list; a refused removal puts it back.
    ///
    /// # Errors
    ///
    /// [`HdfError::NotFound`] if no host owns the service, otherwise whatever
    /// the host's `del_device` returns.
    pub fn unload_device(&self, service_name: &str) -> HdfResult<()> {
        let (host_id, service, token) = {
            let mut state = self.core.lock();
            let client = state
                .hosts
                .iter_mut()
                .find(|client| client.owns_service(service_name))
                .ok_or(HdfError::NotFound)?;
            let service = client.service.clone().ok_or(HdfError::InvalidObject)?;
            let token = client
                .begin_unload(service_name)
                .ok_or(HdfError::NotFound)?;
            (client.host_id(), service, token)
        };

        let result = service.del_device(token.device_id);

        let mut state = self.core.lock();
        if let Some(client) = state.host_mut(host_id) {
            let attached = client.is_attached();
            client.finish_unload(token.device_id, result.is_ok() || !attached);
        }
        match &result {
            Ok(()) => info!(host_id, service = service_name, "device unloaded"),
            Err(e) => warn!(host_id, service = service_name, "device unload failed: {e}"),
        }
        result
    }

    /// Propagates a system power state to every attached host.
    ///
    /// Wake states go to the most recently started host first, sleep states
    /// to the first started one first.  Every host is notified even after a
    /// failure; the first failure is returned.
    ///
    /// # Errors
    ///
    /// [`HdfError::InvalidParam`] for [`PowerState::Invalid`].
    pub fn power_state_change(&self, state: PowerState) -> HdfResult<()> {
        if !state.is_valid() {
            return Err(HdfError::InvalidParam);
        }
        let services: Vec<(u16, Arc<dyn DevHostService>)> = self
            .core
            .lock()
            .hosts
            .iter()
            .filter_map(|client| {
                client
                    .service
                    .clone()
                    .map(|service| (client.host_id(), service))
            })
            .collect();

        let mut outcome = Ok(());
        let mut visit = |(host_id, service): &(u16, Arc<dyn DevHostService>)| {
            if let Err(e) = service.pm_notify(state) {
                warn!(host_id, ?state, "host rejected power state: {e}");
                if outcome.is_ok() {
                    outcome = Err(e);
                }
            }
        };
        if state.is_wake() {
            services.iter().rev().for_each(&mut visit);
        } else {
            services.iter().for_each(&mut visit);
        }
        debug!(?state, hosts = services.len(), "power state propagated");
        outcome
    }

    /// Runs the death policy for the current process of `host_id` on the
    /// calling thread.
    ///
    /// The message loop does the same for every `DEVHOST_DIED` whose
    /// generation still matches the record.
    pub fn handle_host_death(&self, host_id: u16) -> DeathOutcome {
        self.core.handle_host_death(host_id, None)
    }

    // ── Inspection ────────────────────────────────────────────────────────────

    /// Ids of the hosts that have a record, in start order.
    pub fn host_ids(&self) -> Vec<u16> {
        self.core
            .lock()
            .hosts
            .iter()
            .map(DevHostClient::host_id)
            .collect()
    }

    /// Runs `inspect` on the record of `host_id` under the manager lock.
    pub fn inspect_host<R>(&self, host_id: u16, inspect: impl FnOnce(&DevHostClient) -> R) -> Option<R> {
        self.core.lock().host(host_id).map(inspect)
    }

    /// Pid of host `host_id`; `None` if there is no record.
    pub fn host_pid(&self, host_id: u16) -> Option<HostPid> {
        self.inspect_host(host_id, DevHostClient::pid)
    }

    /// Devices host `host_id` currently owns.
    pub fn host_devices(&self, host_id: u16) -> Vec<DeviceToken> {
        self.inspect_host(host_id, |client| client.devices().to_vec())
            .unwrap_or_default()
    }

    /// Consecutive deaths recorded for `host_name`.
    pub fn death_count(&self, host_name: &str) -> u32 {
        self.core
            .lock()
            .death_counters
            .get(host_name)
            .copied()
            .unwrap_or(0)
    }
}

// ── Core ──────────────────────────────────────────────────────────────────────

impl ManagerCore {
    fn lock(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn host_attr(&self, host_id: u16) -> Option<&HostAttr> {
        self.host_attrs.iter().find(|attr| attr.host_id == host_id)
    }

    /// Creates the record and asks the installer for a first start.
    fn start_host(&self, attr: &HostAttr, is_respawn: bool) -> HdfResult<u32> {
        let mut state = self.lock();
        if state.host(attr.host_id).is_some() {
            return Err(HdfError::DeviceBusy);
        }
        let mut client = DevHostClient::new(attr.host_id, attr.host_name.clone());
        client.generation = state.next_generation();
        state.hosts.push(client);

        match self
            .installer
            .start_device_host(attr.host_id, &attr.host_name, is_respawn)
        {
            Ok(pid) => {
                if let Some(client) = state.host_mut(attr.host_id) {
                    client.pid = Some(pid);
                }
                info!(host_id = attr.host_id, host = %attr.host_name, pid, "device host started");
                Ok(pid)
            }
            Err(e) => {
                error!(host_id = attr.host_id, host = %attr.host_name, "failed to start device host: {e}");
                state.hosts.retain(|client| client.host_id() != attr.host_id);
                Err(HdfError::Failure)
            }
        }
    }

    fn handle_host_death(&self, host_id: u16, generation: Option<u64>) -> DeathOutcome {
        let mut guard = self.lock();
        let state = &mut *guard;
        let Some(client) = state
            .hosts
            .iter_mut()
            .find(|client| client.host_id() == host_id)
        else {
            debug!(host_id, "death of an unknown host ignored");
            return DeathOutcome::Ignored;
        };
        if let Some(generation) = generation.filter(|g| *g != client.generation()) {
            debug!(
                host_id,
                generation,
                current = client.generation(),
                "death of a replaced host process ignored"
            );
            return DeathOutcome::Ignored;
        }

        let had_devices = !client.devices().is_empty();
        warn!(
            host_id,
            host = client.host_name(),
            pid = ?client.pid(),
            devices = client.devices().len(),
            "device host died"
        );
        drop(client.clear_process());

        if !had_devices || client.stop_flag() || !client.pending_unload().is_empty() {
            info!(
                host_id,
                host = client.host_name(),
                had_devices,
                stop_flag = client.stop_flag(),
                pending_unload = client.pending_unload().len(),
                "device host not respawned"
            );
            self.installer.reap_device_host(host_id);
            return DeathOutcome::Retired;
        }

        match state.death_counters.get_mut(client.host_name()) {
            None => {
                state
                    .death_counters
                    .insert(client.host_name().to_string(), 1);
            }
            Some(count) if *count >= self.max_restart => {
                *count = 0;
                client.stop_flag = false;
                error!(
                    host_id,
                    host = client.host_name(),
                    max_restart = self.max_restart,
                    "device host keeps dying; giving up"
                );
                self.installer.reap_device_host(host_id);
                return DeathOutcome::GaveUp;
            }
            Some(count) => *count += 1,
        }

        match self
            .installer
            .start_device_host(host_id, client.host_name(), true)
        {
            Ok(pid) => {
                client.pid = Some(pid);
                state.generation += 1;
                client.generation = state.generation;
                info!(host_id, host = client.host_name(), pid, "device host respawned");
                DeathOutcome::Respawned(pid)
            }
            Err(e) => {
                error!(host_id, host = client.host_name(), "failed to respawn device host: {e}");
                self.installer.reap_device_host(host_id);
                DeathOutcome::RespawnFailed
            }
        }
    }

    /// Adds the preload devices of `host_id`: the first pass in priority
    /// order, then the second-pass ones.
    ///
    /// Skipped when the record moved on past `generation`.
    fn load_host_devices(&self, host_id: u16, generation: Option<u64>) {
        let Some(attr) = self.host_attr(host_id) else {
            debug!(host_id, "no configuration for attached host");
            return;
        };
        if let Some(generation) = generation {
            let current = self.lock().host(host_id).map(DevHostClient::generation);
            if current != Some(generation) {
                debug!(host_id, generation, ?current, "preload for a replaced host process skipped");
                return;
            }
        }
        let mut devices: Vec<&DeviceDescriptor> = attr
            .devices
            .iter()
            .filter(|descriptor| descriptor.preload().at_attach())
            .collect();
        devices.sort_by_key(|descriptor| {
            (
                descriptor.preload() == Preload::EnableStep2,
                descriptor.priority(),
            )
        });

        let mut loaded = 0usize;
        for descriptor in devices {
            match self.add_device_to_host(host_id, descriptor) {
                Ok(()) => loaded += 1,
                Err(e) => warn!(
                    host_id,
                    device = %descriptor.device_id(),
                    module = descriptor.module_name(),
                    "failed to add device: {e}"
                ),
            }
        }
        info!(host_id, host = %attr.host_name, loaded, "host devices loaded");
    }

    /// Calls `add_device` on the host and records the device on success.
    fn add_device_to_host(&self, host_id: u16, descriptor: &DeviceDescriptor) -> HdfResult<()> {
        let service = {
            let state = self.lock();
            let client = state.host(host_id).ok_or(HdfError::NotFound)?;
            client.service.clone().ok_or(HdfError::InvalidObject)?
        };

        match service.add_device(descriptor) {
            Ok(()) => {}
            // A concurrent load got there first.
            Err(HdfError::DeviceBusy) => {
                debug!(host_id, device = %descriptor.device_id(), "host already has the device");
            }
            Err(e) => return Err(e),
        }

        let mut state = self.lock();
        match state.host_mut(host_id) {
            // Only record it if the host is still the process we talked to.
            Some(client)
                if client
                    .service
                    .as_ref()
                    .is_some_and(|current| same_service(current, &service)) =>
            {
                if client.owns_device(descriptor.device_id()) {
                    debug!(host_id, device = %descriptor.device_id(), "device already recorded");
                } else {
                    client.devices.push(DeviceToken::from(descriptor));
                    debug!(host_id, device = %descriptor.device_id(), "device added");
                }
                Ok(())
            }
            _ => {
                warn!(host_id, device = %descriptor.device_id(), "host went away while adding device");
                Err(HdfError::InvalidObject)
            }
        }
    }
}

impl MessageHandler<u64> for ManagerCore {
    fn dispatch(&self, message: Message<u64>) -> HdfResult<()> {
        let host_id = u16::try_from(message.arg()).map_err(|_| HdfError::InvalidParam)?;
        let generation = message.payload().copied();
        match message.what() {
            DEVHOST_DIED => {
                let outcome = self.handle_host_death(host_id, generation);
                debug!(host_id, ?generation, ?outcome, "host death handled");
                Ok(())
            }
            LOAD_HOST_DEVICES => {
                self.load_host_devices(host_id, generation);
                Ok(())
            }
            other => {
                warn!(what = other, "unknown manager message");
                Err(HdfError::NotSupported)
            }
        }
    }
}

fn same_service(a: &Arc<dyn DevHostService>, b: &Arc<dyn DevHostService>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a).cast::<()>(),
        Arc::as_ptr(b).cast::<()>(),
    )
}

// ── Tests ─────────────────────────────────────────────────────────────────────
