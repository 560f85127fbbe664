//! In-process [`RemoteChannel`] that calls its handler directly.
//!
//! Used when a device host runs inside the manager's process, and by tests
//! that need a host whose death can be triggered on demand.

use std::sync::{Arc, Weak};

use super::channel::{
    DeathNotifier, DeathRecipient, DeathRecipientId, RemoteChannel, Reply, RequestHandler,
    TransportError,
};

/// Channel whose "peer" is a handler living in the same process.
///
/// Requests run synchronously on the caller's thread.  The handler receives
/// this same channel as the link the request came in on.
pub struct LocalChannel {
    this: Weak<LocalChannel>,
    handler: Arc<dyn RequestHandler>,
    notifier: DeathNotifier,
}

impl LocalChannel {
    pub fn new(handler: Arc<dyn RequestHandler>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            handler,
            notifier: DeathNotifier::new(),
        })
    }

    /// Simulates the death of the peer.
    pub fn kill(&self) {
        self.notifier.fire();
    }
}

impl RemoteChannel for LocalChannel {
    fn send_request(&self, code: u16, payload: Vec<u8>) -> Result<Reply, TransportError> {
        if !self.notifier.is_alive() {
            return Err(TransportError::Disconnected);
        }
        let Some(this) = self.this.upgrade() else {
            return Err(TransportError::Disconnected);
        };
        let channel: Arc<dyn RemoteChannel> = this;
        Ok(self.handler.on_request(&channel, code, &payload))
    }

    fn add_death_recipient(&self, recipient: DeathRecipient) -> DeathRecipientId {
        self.notifier.add(recipient)
    }

    fn remove_death_recipient(&self, id: DeathRecipientId) {
        self.notifier.remove(id);
    }

    fn is_alive(&self) -> bool {
        self.notifier.is_alive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Answer(i32);

    impl RequestHandler for Answer {
        fn on_request(&self, _: &Arc<dyn RemoteChannel>, _: u16, _: &[u8]) -> Reply {
            Reply::from_status(self.0)
        }
    }

    #[test]
    fn test_request_runs_handler_inline() {
        let channel = LocalChannel::new(Arc::new(Answer(-3)));
        let reply = channel.send_request(1, Vec::new()).unwrap();
        assert_eq!(reply.status, -3);
    }

    #[test]
    fn test_kill_fires_recipient_and_rejects_requests() {
        // Arrange
        let channel = LocalChannel::new(Arc::new(Answer(0)));
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        channel.add_death_recipient(Box::new(move || flag.store(true, Ordering::SeqCst)));

        // Act
        channel.kill();

        // Assert
        assert!(fired.load(Ordering::SeqCst));
        assert!(!channel.is_alive());
        assert!(matches!(
            channel.send_request(1, Vec::new()),
            Err(TransportError::Disconnected)
        ));
    }
}
