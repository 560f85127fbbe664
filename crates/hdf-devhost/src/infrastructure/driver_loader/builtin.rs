//! Loader for driver entries compiled into the host binary.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use crate::application::driver::{DriverEntry, DriverHandle, DriverLoader, LoaderError};

/// Builds a fresh entry each time the module is loaded.
pub type DriverFactory = Arc<dyn Fn() -> Box<dyn DriverEntry> + Send + Sync>;

/// Registry of statically linked drivers keyed by module name.
#[derive(Default)]
pub struct BuiltinDriverLoader {
    factories: RwLock<HashMap<String, DriverFactory>>,
}

impl BuiltinDriverLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `factory` under `module_name`, replacing any earlier entry.
    pub fn register<F>(&self, module_name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn DriverEntry> + Send + Sync + 'static,
    {
        let module_name = module_name.into();
        debug!(module = %module_name, "builtin driver registered");
        self.factories
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(module_name, Arc::new(factory));
    }

    pub fn is_registered(&self, module_name: &str) -> bool {
        self.factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(module_name)
    }
}

impl DriverLoader for BuiltinDriverLoader {
    fn get_driver(&self, module_name: &str) -> Result<DriverHandle, LoaderError> {
        if module_name.is_empty() {
            return Err(LoaderError::InvalidName(module_name.to_string()));
        }
        let factory = self
            .factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(module_name)
            .cloned()
            .ok_or_else(|| LoaderError::NotFound(module_name.to_string()))?;
        Ok(DriverHandle::builtin(factory()))
    }

    fn reclaim_driver(&self, driver: DriverHandle) {
        debug!(module = driver.module_name(), "builtin driver reclaimed");
    }
}
