//! Request/reply channels between the device manager and device hosts.
//!
//! - **`channel`** – the [`RemoteChannel`] trait, replies, transport errors
//!   and death notification.
//! - **`socket`** – the TCP implementation used between processes.
//! - **`local`** – an in-process implementation.
//! - **`stub`** – turns incoming requests into [`DevHostService`] calls.
//!
//! [`DevHostService`]: crate::service::DevHostService

pub mod channel;
pub mod local;
pub mod socket;
pub mod stub;

pub use channel::{
    DeathNotifier, DeathRecipient, DeathRecipientId, RemoteChannel, Reply, RequestHandler,
    TransportError,
};
pub use local::LocalChannel;
pub use socket::SocketChannel;
pub use stub::DevHostServiceStub;
