//! Application layer of the device host.
//!
//! - **`driver`** – driver entry callbacks and the loader contract.
//! - **`device_node`** – one launched driver instance and its state machine.
//! - **`hdf_device`** – nodes grouped by device.
//! - **`dev_host_service`** – the in-host service the manager talks to.
//! - **`power_source`** – the contract of kernel power-event sources.

pub mod dev_host_service;
pub mod device_node;
pub mod driver;
pub mod hdf_device;
pub mod power_source;
