//! Loader for driver modules built as shared libraries.
//!
//! A module named `sample_drv` lives at `<library dir>/libsample_drv.so` on
//! Linux (`sample_drv.dll` on Windows, `libsample_drv.dylib` on macOS) and
//! exports [`DRIVER_ENTRY_SYMBOL`], usually through
//! [`declare_driver!`](crate::declare_driver).

use std::env::consts::{DLL_PREFIX, DLL_SUFFIX};
use std::path::{Path, PathBuf};

use libloading::{Library, Symbol};
use tracing::{debug, info, warn};

use crate::application::driver::{
    DriverEntryFn, DriverHandle, DriverLoader, LoaderError, DRIVER_ENTRY_SYMBOL,
};

/// Opens driver libraries from one directory.
pub struct DynamicDriverLoader {
    library_dir: PathBuf,
}

impl DynamicDriverLoader {
    pub fn new(library_dir: impl Into<PathBuf>) -> Self {
        Self {
            library_dir: library_dir.into(),
        }
    }

    pub fn library_dir(&self) -> &Path {
        &self.library_dir
    }

    /// Resolves the canonical path of `module_name`'s library.
    ///
    /// # Errors
    ///
    /// - [`LoaderError::InvalidName`] for empty names or names with path parts.
    /// - [`LoaderError::NotFound`] if the file (or the directory) is missing.
    /// - [`LoaderError::OutsideLibraryDir`] if a link points elsewhere.
    pub fn module_path(&self, module_name: &str) -> Result<PathBuf, LoaderError> {
        if module_name.is_empty()
            || module_name.contains(['/', '\\'])
            || module_name.contains("..")
        {
            return Err(LoaderError::InvalidName(module_name.to_string()));
        }
        let file_name = format!("{DLL_PREFIX}{module_name}{DLL_SUFFIX}");
        let base = self
            .library_dir
            .canonicalize()
            .map_err(|_| LoaderError::NotFound(self.library_dir.display().to_string()))?;
        let path = base
            .join(&file_name)
            .canonicalize()
            .map_err(|_| LoaderError::NotFound(module_name.to_string()))?;
        if !path.starts_with(&base) {
            return Err(LoaderError::OutsideLibraryDir(path.display().to_string()));
        }
        Ok(path)
    }
}

impl DriverLoader for DynamicDriverLoader {
    fn get_driver(&self, module_name: &str) -> Result<DriverHandle, LoaderError> {
        let path = self.module_path(module_name)?;

        // SAFETY: driver libraries are trusted code installed next to the
        // host binary; their initialisers run here.
        let library = unsafe { Library::new(&path) }.map_err(|e| {
            warn!(path = %path.display(), "failed to open driver library: {e}");
            LoaderError::LoadFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            }
        })?;

        // SAFETY: the symbol is declared through `declare_driver!`, which
        // fixes its signature to `DriverEntryFn`.
        let entry = unsafe {
            let constructor: Symbol<DriverEntryFn> = library
                .get(DRIVER_ENTRY_SYMBOL)
                .map_err(|_| LoaderError::MissingEntry(module_name.to_string()))?;
            constructor()
        };

        info!(module = module_name, path = %path.display(), "driver library loaded");
        Ok(DriverHandle::with_module(entry, Box::new(library)))
    }

    fn reclaim_driver(&self, driver: DriverHandle) {
        debug!(module = driver.module_name(), "closing driver library");
        drop(driver);
    }
}
