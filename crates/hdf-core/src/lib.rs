//! # hdf-core
//!
//! Shared library of the driver framework: message loops, the device and
//! host data model, status codes, the manager ↔ host wire protocol and the
//! remote channels that carry it.
//!
//! This crate is used by both the device manager and the device hosts.
//!
//! # Architecture overview (for beginners)
//!
//! Drivers do not run inside the device manager.  The manager spawns one
//! *device host* process per configured host; each host loads its drivers
//! and keeps one *device node* per launched driver.  The manager watches the
//! hosts and respawns one that dies, a limited number of times.
//!
//! This crate (`hdf-core`) is the shared foundation.  It defines:
//!
//! - **`message`** – A message queue ordered by due time, a looper thread
//!   that drains it and tasks that bind a handler to a looper.  Both
//!   processes serialize their state changes through these loops.
//!
//! - **`domain`** – Pure value types: device ids and descriptors, host
//!   attributes and power states.
//!
//! - **`service`** – The [`DevHostService`] and [`DevmgrServiceClient`]
//!   traits each side calls on the other.
//!
//! - **`protocol`** – How requests travel over a socket: a 20-byte header
//!   plus a `bincode` payload.
//!
//! - **`ipc`** – Blocking request/reply channels with death notification.
//!
//! - **`error`** – [`HdfError`] and the integer status codes used on the wire.

pub mod domain;
pub mod error;
pub mod ipc;
pub mod message;
pub mod protocol;
pub mod service;

// Re-export the most-used types at the crate root so callers can write
// `hdf_core::DeviceId` instead of `hdf_core::domain::device::DeviceId`.
pub use domain::device::{DeviceDescriptor, DeviceId, DevicePolicy, DeviceToken, Preload};
pub use domain::host::{HostAttr, HostPid};
pub use domain::power::{PowerEventListener, PowerState};
pub use error::{HdfError, HdfResult, HDF_SUCCESS};
pub use ipc::{RemoteChannel, Reply, RequestHandler, TransportError};
pub use message::{Message, MessageHandler, MessageLooper, MessageQueue, MessageTask, WeakMessageTask};
pub use protocol::{IpcRequest, ProtocolError};
pub use service::{DevHostService, DevmgrServiceClient};
