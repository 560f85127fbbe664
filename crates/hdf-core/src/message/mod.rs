//! Single-threaded actor primitive used for every intra- and cross-boundary
//! call in the framework.
//!
//! # The pieces (for beginners)
//!
//! ```text
//!   sender ──send_message(async)──►  MessageQueue  ──next()──►  MessageLooper thread
//!                                    (time ordered)                 │
//!   sender ──send_message(sync)───────────────────────────────►  MessageHandler
//! ```
//!
//! - **[`Message`]** – an envelope with a small integer identifier (`what`),
//!   one scalar argument and one typed payload.  Built once, never mutated.
//! - **[`MessageQueue`]** – pending messages sorted by delivery time.
//! - **[`MessageLooper`]** – a dedicated thread draining one queue until it
//!   receives the reserved stop message.
//! - **[`MessageTask`]** – the thing components "send messages to": a named
//!   binding of a looper's queue to a [`MessageHandler`].
//!
//! Handlers run on the looper thread for asynchronous sends and on the
//! caller's thread for synchronous sends.

pub mod looper;
pub mod queue;
pub mod task;

pub use looper::MessageLooper;
pub use queue::MessageQueue;
pub use task::{MessageHandler, MessageTask, WeakMessageTask};

/// An immutable message delivered to a [`MessageHandler`].
///
/// The two payload slots of the message are a scalar `arg` (ids, power
/// states) and a typed `payload` owned by the message until the handler
/// consumes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message<P> {
    what: u16,
    arg: u64,
    payload: Option<P>,
}

impl<P> Message<P> {
    /// Creates a message with the given identifier and empty slots.
    pub fn new(what: u16) -> Self {
        Self {
            what,
            arg: 0,
            payload: None,
        }
    }

    /// Sets the scalar argument slot.
    pub fn with_arg(mut self, arg: u64) -> Self {
        self.arg = arg;
        self
    }

    /// Sets the payload slot.
    pub fn with_payload(mut self, payload: P) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Message identifier.
    pub fn what(&self) -> u16 {
        self.what
    }

    /// Scalar argument slot.
    pub fn arg(&self) -> u64 {
        self.arg
    }

    /// Borrowed payload, if any.
    pub fn payload(&self) -> Option<&P> {
        self.payload.as_ref()
    }

    /// Consumes the message and returns its payload.
    pub fn into_payload(self) -> Option<P> {
        self.payload
    }
}
