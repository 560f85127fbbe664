//! Infrastructure layer for the device host.
//!
//! Contains the OS-facing adapters: shared-library loading, signal-based
//! power events and the connection back to the device manager.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `hdf_core`, but MUST NOT be imported by the `application` layer outside
//! of tests.
//!
//! # Sub-modules
//!
//! - **`driver_loader`** – implementations of `DriverLoader`: `libloading`
//!   based dynamic loading, a builtin registry and scripted test drivers.
//!
//! - **`power_events`** – implementations of `PowerEventSource`.
//!
//! - **`devmgr_client`** – `DevmgrServiceClient` over a remote channel.

pub mod devmgr_client;
pub mod driver_loader;
pub mod power_events;
