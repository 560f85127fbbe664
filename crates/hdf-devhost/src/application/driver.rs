//! Driver entry points and the loader contract.
//!
//! A driver module exposes one [`DriverEntry`]: the bind/init/release
//! callbacks the host drives a device node through.  A [`DriverLoader`]
//! finds the entry for a module name and hands it out as a [`DriverHandle`];
//! the infrastructure layer provides a dynamic-library loader and a builtin
//! (statically registered) one.

use std::any::Any;
use std::sync::Arc;

use hdf_core::{DeviceDescriptor, HdfError, HdfResult, PowerEventListener};
use thiserror::Error;

/// Exported symbol a driver library must define (see [`declare_driver!`]).
pub const DRIVER_ENTRY_SYMBOL: &[u8] = b"hdf_driver_entry\0";

/// Signature of the exported entry symbol.
#[allow(improper_ctypes_definitions)]
pub type DriverEntryFn = unsafe extern "C" fn() -> Box<dyn DriverEntry>;

/// Callbacks of one driver module.
///
/// The host calls `bind`, then `init`, on the node's thread; `release` is
/// called once when the node is removed, whether or not `init` succeeded.
pub trait DriverEntry: Send + Sync {
    /// Name the module is registered under.
    fn module_name(&self) -> &str;

    /// Publishes the driver's service for `device`.
    fn bind(&self, device: &DeviceDescriptor) -> HdfResult<()>;

    /// Brings the hardware up.
    fn init(&self, device: &DeviceDescriptor) -> HdfResult<()>;

    /// Tears the driver down.
    fn release(&self, device: &DeviceDescriptor);

    /// Listener registered on the node after a successful bind.
    fn power_listener(&self) -> Option<Arc<dyn PowerEventListener>> {
        None
    }
}

/// Exports a driver entry from a `cdylib` so [`DynamicDriverLoader`] can find it.
///
/// ```ignore
/// struct Sample;
/// impl DriverEntry for Sample { /* ... */ }
/// hdf_devhost::declare_driver!(Sample);
/// ```
///
/// [`DynamicDriverLoader`]: crate::infrastructure::driver_loader::dynamic::DynamicDriverLoader
#[macro_export]
macro_rules! declare_driver {
    ($constructor:expr) => {
        #[no_mangle]
        #[allow(improper_ctypes_definitions)]
        pub extern "C" fn hdf_driver_entry() -> Box<dyn $crate::application::driver::DriverEntry> {
            Box::new($constructor)
        }
    };
}

/// A loaded driver: its entry plus whatever keeps the code mapped.
///
/// Fields drop in declaration order, so the entry is destroyed before the
/// library that contains its code.
pub struct DriverHandle {
    entry: Box<dyn DriverEntry>,
    _module: Option<Box<dyn Any + Send + Sync>>,
}

impl DriverHandle {
    /// Handle for an entry compiled into the current binary.
    pub fn builtin(entry: Box<dyn DriverEntry>) -> Self {
        Self {
            entry,
            _module: None,
        }
    }

    /// Handle that keeps `module` (e.g. an open library) alive with the entry.
    pub fn with_module(entry: Box<dyn DriverEntry>, module: Box<dyn Any + Send + Sync>) -> Self {
        Self {
            entry,
            _module: Some(module),
        }
    }

    pub fn entry(&self) -> &dyn DriverEntry {
        self.entry.as_ref()
    }

    pub fn module_name(&self) -> &str {
        self.entry.module_name()
    }
}

impl std::fmt::Debug for DriverHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverHandle")
            .field("module", &self.module_name())
            .field("dynamic", &self._module.is_some())
            .finish()
    }
}

/// Errors raised while looking up a driver module.
#[derive(Debug, Error)]
pub enum LoaderError {
    /// The module name is empty or contains path separators.
    #[error("invalid module name: {0:?}")]
    InvalidName(String),

    /// Nothing is registered or installed under this name.
    #[error("driver module not found: {0}")]
    NotFound(String),

    /// The resolved path escapes the library directory.
    #[error("driver path {0} is outside the library directory")]
    OutsideLibraryDir(String),

    /// The library exists but could not be opened.
    #[error("failed to load {path}: {reason}")]
    LoadFailed { path: String, reason: String },

    /// The library does not export the entry symbol.
    #[error("module {0} has no driver entry")]
    MissingEntry(String),
}

impl From<LoaderError> for HdfError {
    fn from(err: LoaderError) -> Self {
        match err {
            LoaderError::InvalidName(_) => HdfError::InvalidParam,
            _ => HdfError::NotFound,
        }
    }
}

/// Finds driver entries by module name.
///
/// One loader exists per host process; it is created at start-up and passed
/// to the host service explicitly.
pub trait DriverLoader: Send + Sync {
    /// Loads the module and returns its entry.
    fn get_driver(&self, module_name: &str) -> Result<DriverHandle, LoaderError>;

    /// Gives a handle back; its library is closed once the handle is dropped.
    fn reclaim_driver(&self, driver: DriverHandle);
}
