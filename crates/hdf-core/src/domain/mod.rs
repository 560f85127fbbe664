//! Domain entities of the driver framework.
//!
//! Pure value types with no threads, sockets or file-system access:
//!
//! - **`device`** – device ids, immutable [`device::DeviceDescriptor`]s and the
//!   manager-side [`device::DeviceToken`].
//! - **`host`** – static host attributes and the host pid sentinel.
//! - **`power`** – abstract power states, the kernel event table and the
//!   listener trait drivers implement.

pub mod device;
pub mod host;
pub mod power;
