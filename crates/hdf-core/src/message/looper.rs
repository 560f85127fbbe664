//! Message loop: one dedicated thread draining one [`MessageQueue`].

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::queue::MessageQueue;
use super::task::MessageHandler;
use super::Message;
use crate::error::{HdfError, HdfResult};

/// What actually sits in a looper's queue.
pub(crate) enum Envelope<P> {
    /// A message bound for the handler of the task that sent it.
    Deliver {
        message: Message<P>,
        target: Arc<dyn MessageHandler<P>>,
    },
    /// The reserved stop message.
    Stop,
}

/// A running message loop.
///
/// The loop thread starts in [`MessageLooper::start`] and runs until
/// [`MessageLooper::stop`] (or drop) posts the reserved stop message.  On
/// stop, messages that were not yet due are discarded together with the queue.
pub struct MessageLooper<P: Send + 'static> {
    name: String,
    queue: Arc<MessageQueue<Envelope<P>>>,
    thread: Option<JoinHandle<()>>,
}

impl<P: Send + 'static> MessageLooper<P> {
    /// Spawns the loop thread.
    ///
    /// # Errors
    ///
    /// Returns [`HdfError::ThreadCreateFail`] if the OS refuses the thread.
    pub fn start(name: impl Into<String>) -> HdfResult<Self> {
        let name = name.into();
        let queue = Arc::new(MessageQueue::new());

        let thread = {
            let queue = Arc::clone(&queue);
            let loop_name = name.clone();
            std::thread::Builder::new()
                .name(name.clone())
                .spawn(move || run_loop(&loop_name, &queue))
                .map_err(|e| {
                    error!(looper = %name, "failed to spawn message loop thread: {e}");
                    HdfError::ThreadCreateFail
                })?
        };

        info!(looper = %name, "message loop started");
        Ok(Self {
            name,
            queue,
            thread: Some(thread),
        })
    }

    /// Name of the loop (also the thread name).
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn queue(&self) -> &Arc<MessageQueue<Envelope<P>>> {
        &self.queue
    }

    /// Posts the stop message and waits for the loop thread to finish.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.queue.enqueue(Envelope::Stop, Duration::ZERO);
        // A handler that drops its own looper must not join itself.
        if thread.thread().id() == std::thread::current().id() {
            return;
        }
        if thread.join().is_err() {
            error!(looper = %self.name, "message loop thread panicked");
        }
    }
}

impl<P: Send + 'static> Drop for MessageLooper<P> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_loop<P>(name: &str, queue: &MessageQueue<Envelope<P>>) {
    loop {
        let Some(envelope) = queue.next() else {
            continue;
        };
        match envelope {
            Envelope::Stop => break,
            Envelope::Deliver { message, target } => {
                let what = message.what();
                if let Err(e) = target.dispatch(message) {
                    warn!(looper = name, what, "message handler failed: {e}");
                }
            }
        }
    }
    let discarded = queue.len();
    queue.clear();
    debug!(looper = name, discarded, "message loop stopped");
}
