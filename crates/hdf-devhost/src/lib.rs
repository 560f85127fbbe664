//! hdf-devhost library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`,
//! driver crates and the binary entry point in `main.rs` share the same
//! module tree.
//!
//! # What does a device host do? (for beginners)
//!
//! A *device host* is a worker process started by the device manager.  It
//! never decides on its own which drivers to run; it waits for the manager.
//!
//! 1. Connects back to the manager and announces itself (`ATTACH_HOST`).
//! 2. Receives `ADD_DEVICE` requests, loads the named driver module and
//!    drives a new device node through `bind` and `init`.
//! 3. Receives `DEL_DEVICE` requests and releases nodes again.
//! 4. Fans power transitions (from the manager or from kernel events) out to
//!    every node, wake events newest-first and sleep events oldest-first.
//!
//! If the host crashes the manager notices through the closed connection and
//! starts a fresh host process.

/// Application layer: device nodes, the host service and driver contracts.
pub mod application;

/// Infrastructure layer: driver loaders, power-event sources, manager client.
pub mod infrastructure;

pub use application::dev_host_service::DeviceHost;
pub use application::driver::{DriverEntry, DriverHandle, DriverLoader, LoaderError};
