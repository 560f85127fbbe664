//! Message task: the named dispatch target other components send to.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tracing::trace;

use super::looper::{Envelope, MessageLooper};
use super::queue::MessageQueue;
use super::Message;
use crate::error::HdfResult;

/// Receives messages on behalf of a [`MessageTask`].
pub trait MessageHandler<P>: Send + Sync {
    /// Handles one message.  The message is dropped when this returns.
    fn dispatch(&self, message: Message<P>) -> HdfResult<()>;
}

impl<P, F> MessageHandler<P> for F
where
    F: Fn(Message<P>) -> HdfResult<()> + Send + Sync,
{
    fn dispatch(&self, message: Message<P>) -> HdfResult<()> {
        self(message)
    }
}

/// Binding of a looper's queue to a handler.
///
/// Cloning a task is cheap; every clone targets the same queue and handler.
pub struct MessageTask<P: Send + 'static> {
    name: Arc<str>,
    queue: Arc<MessageQueue<Envelope<P>>>,
    handler: Option<Arc<dyn MessageHandler<P>>>,
}

impl<P: Send + 'static> MessageTask<P> {
    /// Creates a task delivering to `handler` through `looper`.
    pub fn new(
        name: &str,
        looper: &MessageLooper<P>,
        handler: Arc<dyn MessageHandler<P>>,
    ) -> Self {
        Self {
            name: Arc::from(name),
            queue: Arc::clone(looper.queue()),
            handler: Some(handler),
        }
    }

    /// Creates a task with no handler; everything sent to it is dropped.
    pub fn without_handler(name: &str, looper: &MessageLooper<P>) -> Self {
        Self {
            name: Arc::from(name),
            queue: Arc::clone(looper.queue()),
            handler: None,
        }
    }

    /// Task name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sends `message` to the handler.
    ///
    /// With `sync == true` the handler runs on the calling thread and its
    /// result is returned.  Otherwise the message is queued for the looper
    /// thread and `Ok(())` is returned immediately.
    pub fn send_message(&self, message: Message<P>, sync: bool) -> HdfResult<()> {
        let Some(handler) = &self.handler else {
            trace!(task = %self.name, what = message.what(), "no handler; message dropped");
            return Ok(());
        };
        if sync {
            handler.dispatch(message)
        } else {
            self.queue.enqueue(
                Envelope::Deliver {
                    message,
                    target: Arc::clone(handler),
                },
                Duration::ZERO,
            );
            Ok(())
        }
    }

    /// Queues `message` for delivery after `delay`.
    pub fn send_message_later(&self, message: Message<P>, delay: Duration) {
        let Some(handler) = &self.handler else {
            trace!(task = %self.name, what = message.what(), "no handler; message dropped");
            return;
        };
        self.queue.enqueue(
            Envelope::Deliver {
                message,
                target: Arc::clone(handler),
            },
            delay,
        );
    }

    /// Returns a handle that does not keep the handler alive.
    ///
    /// Objects owned by the handler (such as remote proxies) hold this form so
    /// that they do not form a reference cycle with it.
    pub fn downgrade(&self) -> WeakMessageTask<P> {
        WeakMessageTask {
            name: Arc::clone(&self.name),
            queue: Arc::downgrade(&self.queue),
            handler: self.handler.as_ref().map(Arc::downgrade),
        }
    }
}

impl<P: Send + 'static> Clone for MessageTask<P> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            queue: Arc::clone(&self.queue),
            handler: self.handler.clone(),
        }
    }
}

/// Non-owning form of a [`MessageTask`].
pub struct WeakMessageTask<P: Send + 'static> {
    name: Arc<str>,
    queue: Weak<MessageQueue<Envelope<P>>>,
    handler: Option<Weak<dyn MessageHandler<P>>>,
}

impl<P: Send + 'static> WeakMessageTask<P> {
    /// Upgrades back to a task, or `None` once the handler or loop is gone.
    pub fn upgrade(&self) -> Option<MessageTask<P>> {
        let queue = self.queue.upgrade()?;
        let handler = match &self.handler {
            Some(weak) => Some(weak.upgrade()?),
            None => None,
        };
        Some(MessageTask {
            name: Arc::clone(&self.name),
            queue,
            handler,
        })
    }

    /// Sends asynchronously if the task is still alive; otherwise drops the message.
    pub fn post(&self, message: Message<P>) {
        match self.upgrade() {
            Some(task) => {
                // Async sends never fail.
                let _ = task.send_message(message, false);
            }
            None => trace!(task = %self.name, "task gone; message dropped"),
        }
    }
}

impl<P: Send + 'static> Clone for WeakMessageTask<P> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            queue: Weak::clone(&self.queue),
            handler: self.handler.clone(),
        }
    }
}
