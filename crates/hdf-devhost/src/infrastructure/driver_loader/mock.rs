//! Scripted drivers for unit and integration testing.
//!
//! A [`ScriptedDriver`] records every callback the host makes into a shared
//! log and can be told to fail `bind`, `init` or power transitions.  Clones
//! share their logs, so the copy handed to the loader and the copy kept by
//! the test observe the same calls.
//!
//! # Usage in tests
//!
//! ```ignore
//! let (loader, calls) = BuiltinDriverLoader::with_scripted(ScriptedDriver::new("light_drv"));
//! node.launch(&loader)?;
//! assert_eq!(*calls.lock().unwrap(), vec![DriverCall::Bind, DriverCall::Init]);
//! ```

use std::sync::{Arc, Mutex};

use hdf_core::{DeviceDescriptor, HdfError, HdfResult, PowerEventListener, PowerState};

use super::builtin::BuiltinDriverLoader;
use crate::application::driver::DriverEntry;

/// One recorded driver callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverCall {
    Bind,
    Init,
    Release,
}

pub type CallLog = Arc<Mutex<Vec<DriverCall>>>;

/// Power transitions seen by listeners, tagged with the module name.
pub type PowerLog = Arc<Mutex<Vec<(String, PowerState)>>>;

/// A driver whose behaviour is fixed up front.
#[derive(Clone)]
pub struct ScriptedDriver {
    name: String,
    fail_bind: bool,
    fail_init: bool,
    listens: bool,
    fail_power: bool,
    calls: CallLog,
    power: PowerLog,
}

impl ScriptedDriver {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fail_bind: false,
            fail_init: false,
            listens: false,
            fail_power: false,
            calls: Arc::new(Mutex::new(Vec::new())),
            power: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing_bind(mut self) -> Self {
        self.fail_bind = true;
        self
    }

    pub fn failing_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    /// Registers a power listener at bind time.
    pub fn with_power_listener(mut self) -> Self {
        self.listens = true;
        self
    }

    /// Registers a power listener that rejects every transition.
    pub fn failing_power(mut self) -> Self {
        self.listens = true;
        self.fail_power = true;
        self
    }

    /// Records power transitions into `log` instead of a private one.
    pub fn sharing_power_log(mut self, log: &PowerLog) -> Self {
        self.power = Arc::clone(log);
        self
    }

    pub fn calls(&self) -> CallLog {
        Arc::clone(&self.calls)
    }

    pub fn power_log(&self) -> PowerLog {
        Arc::clone(&self.power)
    }

    fn record(&self, call: DriverCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

impl DriverEntry for ScriptedDriver {
    fn module_name(&self) -> &str {
        &self.name
    }

    fn bind(&self, _device: &DeviceDescriptor) -> HdfResult<()> {
        self.record(DriverCall::Bind);
        if self.fail_bind {
            Err(HdfError::Failure)
        } else {
            Ok(())
        }
    }

    fn init(&self, _device: &DeviceDescriptor) -> HdfResult<()> {
        self.record(DriverCall::Init);
        if self.fail_init {
            Err(HdfError::Io)
        } else {
            Ok(())
        }
    }

    fn release(&self, _device: &DeviceDescriptor) {
        self.record(DriverCall::Release);
    }

    fn power_listener(&self) -> Option<Arc<dyn PowerEventListener>> {
        self.listens.then(|| {
            Arc::new(ScriptedListener {
                name: self.name.clone(),
                fail: self.fail_power,
                log: Arc::clone(&self.power),
            }) as Arc<dyn PowerEventListener>
        })
    }
}

struct ScriptedListener {
    name: String,
    fail: bool,
    log: PowerLog,
}

impl ScriptedListener {
    fn record(&self, state: PowerState) -> HdfResult<()> {
        if let Ok(mut log) = self.log.lock() {
            log.push((self.name.clone(), state));
        }
        if self.fail {
            Err(HdfError::Failure)
        } else {
            Ok(())
        }
    }
}

impl PowerEventListener for ScriptedListener {
    fn doze_resume(&self) -> HdfResult<()> {
        self.record(PowerState::DozeResume)
    }

    fn doze_suspend(&self) -> HdfResult<()> {
        self.record(PowerState::DozeSuspend)
    }

    fn resume(&self) -> HdfResult<()> {
        self.record(PowerState::Resume)
    }

    fn suspend(&self) -> HdfResult<()> {
        self.record(PowerState::Suspend)
    }
}

impl BuiltinDriverLoader {
    /// Loader with `driver` registered under its own name.
    ///
    /// Returns the driver's call log alongside the loader.
    pub fn with_scripted(driver: ScriptedDriver) -> (Self, CallLog) {
        let loader = Self::new();
        let calls = driver.calls();
        loader.register_scripted(driver);
        (loader, calls)
    }

    /// Registers `driver` under its own name.
    pub fn register_scripted(&self, driver: ScriptedDriver) {
        let name = driver.name.clone();
        self.register(name, move || Box::new(driver.clone()) as Box<dyn DriverEntry>);
    }
}
