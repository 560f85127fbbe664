//! Application layer of the device manager.
//!
//! Nothing here opens a socket or spawns a process; those concerns hide
//! behind [`DevHostService`](hdf_core::DevHostService) (a host, local or
//! remote) and [`installer::DriverInstaller`] (whatever starts processes).
//!
//! # Sub-modules
//!
//! - **`device_manager`** – Host records, device placement, power fan-out and
//!   the death/respawn policy.  All of it is serialized by one lock and one
//!   message loop.
//!
//! - **`host_client`** – The per-host record the manager keeps.
//!
//! - **`installer`** – The contract for starting and stopping host processes.

pub mod device_manager;
pub mod host_client;
pub mod installer;
