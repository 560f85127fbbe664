//! hdf-devmgr library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.

pub mod application;
pub mod infrastructure;

pub use application::device_manager::{DeathOutcome, DeviceManager, HostDeathReporter};
pub use application::host_client::DevHostClient;
pub use application::installer::{DriverInstaller, InstallerError};
