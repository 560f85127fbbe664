//! The remote channel abstraction and its death-notification registry.

use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tracing::debug;

use crate::error::{status_to_result, HdfError, HdfResult};
use crate::protocol::ProtocolError;

/// Callback fired once when the peer of a channel goes away.
pub type DeathRecipient = Box<dyn FnOnce() + Send>;

/// Handle returned by [`RemoteChannel::add_death_recipient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeathRecipientId(u64);

/// Answer to a request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Reply {
    /// Framework status code of the remote call.
    pub status: i32,
    pub payload: Vec<u8>,
}

impl Reply {
    pub fn from_status(status: i32) -> Self {
        Self {
            status,
            payload: Vec::new(),
        }
    }

    /// Converts the status into a result.
    pub fn into_result(self) -> HdfResult<()> {
        status_to_result(self.status)
    }
}

/// Errors raised by a transport before a reply could be obtained.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer is gone; no reply will ever arrive.
    #[error("peer disconnected")]
    Disconnected,

    /// No reply arrived within the call timeout.
    #[error("request timed out")]
    Timeout,

    /// The request could not be framed.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Writing to the stream failed.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<TransportError> for HdfError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout => HdfError::Timeout,
            _ => HdfError::Failure,
        }
    }
}

/// Bidirectional request/reply link to another process.
///
/// Implementations must be usable from several threads at once; every call
/// blocks only the calling thread.
pub trait RemoteChannel: Send + Sync {
    /// Sends a request and blocks until its reply arrives.
    fn send_request(&self, code: u16, payload: Vec<u8>) -> Result<Reply, TransportError>;

    /// Registers `recipient` to run once when the peer dies.
    ///
    /// When the channel is already dead the recipient runs immediately on the
    /// calling thread.
    fn add_death_recipient(&self, recipient: DeathRecipient) -> DeathRecipientId;

    /// Unregisters a recipient.  Unknown ids are ignored.
    fn remove_death_recipient(&self, id: DeathRecipientId);

    /// Whether the peer is still reachable.
    fn is_alive(&self) -> bool;
}

/// Serves requests arriving on a channel.
///
/// `channel` is the link the request came in on, so a handler can keep it to
/// call the peer back later.
pub trait RequestHandler: Send + Sync {
    fn on_request(&self, channel: &Arc<dyn RemoteChannel>, code: u16, payload: &[u8]) -> Reply;
}

// ── Death notifier ────────────────────────────────────────────────────────────

struct NotifierState {
    alive: bool,
    next_id: u64,
    recipients: Vec<(DeathRecipientId, DeathRecipient)>,
}

/// Registry of death recipients shared by the channel implementations.
///
/// [`fire`](Self::fire) flips the channel to dead and runs every recipient
/// exactly once; later registrations run immediately.
pub struct DeathNotifier {
    state: Mutex<NotifierState>,
}

impl DeathNotifier {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(NotifierState {
                alive: true,
                next_id: 1,
                recipients: Vec::new(),
            }),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.lock().alive
    }

    pub fn add(&self, recipient: DeathRecipient) -> DeathRecipientId {
        let mut state = self.lock();
        let id = DeathRecipientId(state.next_id);
        state.next_id += 1;
        if state.alive {
            state.recipients.push((id, recipient));
            return id;
        }
        drop(state);
        recipient();
        id
    }

    pub fn remove(&self, id: DeathRecipientId) {
        self.lock().recipients.retain(|(rid, _)| *rid != id);
    }

    /// Marks the channel dead and runs the registered recipients.
    ///
    /// Returns `false` if the channel was already dead.
    pub fn fire(&self) -> bool {
        let recipients = {
            let mut state = self.lock();
            if !state.alive {
                return false;
            }
            state.alive = false;
            std::mem::take(&mut state.recipients)
        };
        debug!(count = recipients.len(), "peer died; notifying recipients");
        for (_, recipient) in recipients {
            recipient();
        }
        true
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, NotifierState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for DeathNotifier {
    fn default() -> Self {
        Self::new()
    }
}
