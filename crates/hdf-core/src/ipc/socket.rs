//! [`RemoteChannel`] over a TCP stream driven by tokio.
//!
//! # Tasks (for beginners)
//!
//! Each connection runs three tasks on the runtime it was created on:
//!
//! - **reader** – decodes frames.  A reply completes the `oneshot` of the
//!   caller waiting in [`RemoteChannel::send_request`]; a request is handed
//!   to the dispatcher.
//! - **dispatcher** – runs the [`RequestHandler`] for each request, in
//!   arrival order, on the blocking pool and queues its reply.
//! - **writer** – owns the write half and sends every queued frame.
//!
//! The [`RemoteChannel`] contract stays synchronous: `send_request` queues
//! the frame and parks the calling thread until the reply arrives.  Call it
//! from a plain thread or from `spawn_blocking`, never from inside an async
//! task.  Because handlers also run on the blocking pool, a handler may call
//! the peer and wait for the answer without stalling reply routing.
//!
//! When the stream hits EOF or a malformed frame the channel is marked dead,
//! waiting callers get [`TransportError::Disconnected`] and every death
//! recipient runs exactly once.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, Notify};
use tracing::{debug, info, warn};

use super::channel::{
    DeathNotifier, DeathRecipient, DeathRecipientId, RemoteChannel, Reply, RequestHandler,
    TransportError,
};
use crate::error::HdfError;
use crate::protocol::{encode_frame, read_frame, Frame, FrameKind, ProtocolError};

type ReplySender = oneshot::Sender<Result<Reply, TransportError>>;
type PendingMap = HashMap<u64, ReplySender>;

/// One end of a framed TCP connection.
///
/// The connection tasks hold their own handles, so dropping every `Arc`
/// does not close the socket; call [`shutdown`](Self::shutdown) for that.
pub struct SocketChannel {
    peer: String,
    runtime: Handle,
    outbound: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    next_seq: AtomicU64,
    pending: Arc<Mutex<PendingMap>>,
    closing: Notify,
    notifier: DeathNotifier,
    call_timeout: Option<Duration>,
}

impl SocketChannel {
    /// Connects to `addr` and starts serving requests with `handler`.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the connection cannot be set up.
    pub async fn connect<A: ToSocketAddrs>(
        addr: A,
        handler: Arc<dyn RequestHandler>,
        call_timeout: Option<Duration>,
    ) -> std::io::Result<Arc<Self>> {
        let stream = TcpStream::connect(addr).await?;
        Self::spawn(stream, handler, call_timeout)
    }

    /// Wraps an established stream and starts its tasks on the current
    /// runtime.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when called outside a tokio runtime or when the
    /// socket cannot be configured.
    pub fn spawn(
        stream: TcpStream,
        handler: Arc<dyn RequestHandler>,
        call_timeout: Option<Duration>,
    ) -> std::io::Result<Arc<Self>> {
        let runtime = Handle::try_current().map_err(std::io::Error::other)?;
        stream.set_nodelay(true)?;
        let peer = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let (reader, writer) = stream.into_split();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (request_tx, request_rx) = mpsc::unbounded_channel();

        let channel = Arc::new(Self {
            peer,
            runtime: runtime.clone(),
            outbound: Mutex::new(Some(outbound_tx)),
            next_seq: AtomicU64::new(1),
            pending: Arc::new(Mutex::new(HashMap::new())),
            closing: Notify::new(),
            notifier: DeathNotifier::new(),
            call_timeout,
        });

        runtime.spawn(write_loop(channel.peer.clone(), writer, outbound_rx));
        runtime.spawn(dispatch_loop(Arc::clone(&channel), handler, request_rx));
        runtime.spawn(Arc::clone(&channel).read_loop(reader, request_tx));

        debug!(peer = %channel.peer, "channel started");
        Ok(channel)
    }

    /// Address of the other end.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Closes the connection and marks the channel dead.
    pub fn shutdown(&self) {
        self.closing.notify_one();
        self.mark_dead();
    }

    async fn read_loop(
        self: Arc<Self>,
        mut reader: OwnedReadHalf,
        requests: mpsc::UnboundedSender<Frame>,
    ) {
        loop {
            let frame = tokio::select! {
                _ = self.closing.notified() => break,
                frame = read_frame(&mut reader) => frame,
            };
            match frame {
                Ok(frame) => match frame.kind {
                    FrameKind::Reply => self.route_reply(frame),
                    FrameKind::Request => {
                        if requests.send(frame).is_err() {
                            break;
                        }
                    }
                },
                Err(ProtocolError::Io(e))
                    if matches!(
                        e.kind(),
                        ErrorKind::UnexpectedEof | ErrorKind::ConnectionReset
                    ) =>
                {
                    debug!(peer = %self.peer, "connection closed by peer");
                    break;
                }
                Err(e) => {
                    warn!(peer = %self.peer, "dropping connection: {e}");
                    break;
                }
            }
        }
        drop(requests);
        self.mark_dead();
    }

    fn route_reply(&self, frame: Frame) {
        let waiter = lock_pending(&self.pending).remove(&frame.seq);
        match waiter {
            Some(tx) => {
                let _ = tx.send(Ok(Reply {
                    status: frame.status,
                    payload: frame.payload,
                }));
            }
            None => warn!(peer = %self.peer, seq = frame.seq, "reply for unknown request"),
        }
    }

    fn queue_frame(&self, bytes: Vec<u8>) -> Result<(), TransportError> {
        match self.lock_outbound().as_ref() {
            Some(tx) => tx.send(bytes).map_err(|_| TransportError::Disconnected),
            None => Err(TransportError::Disconnected),
        }
    }

    fn mark_dead(&self) {
        if self.notifier.fire() {
            info!(peer = %self.peer, "channel is dead");
        }
        // The writer sends what is already queued, then closes the write half.
        drop(self.lock_outbound().take());
        // Dropping the reply senders wakes every waiting caller with `Disconnected`.
        lock_pending(&self.pending).clear();
    }

    fn lock_outbound(&self) -> MutexGuard<'_, Option<mpsc::UnboundedSender<Vec<u8>>>> {
        self.outbound.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn lock_pending(pending: &Mutex<PendingMap>) -> MutexGuard<'_, PendingMap> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RemoteChannel for SocketChannel {
    fn send_request(&self, code: u16, payload: Vec<u8>) -> Result<Reply, TransportError> {
        if !self.notifier.is_alive() {
            return Err(TransportError::Disconnected);
        }
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let bytes = encode_frame(&Frame::request(code, seq, payload))?;
        let (tx, rx) = oneshot::channel();
        lock_pending(&self.pending).insert(seq, tx);
        // The reader may have cleared the map between the check and the insert.
        if !self.notifier.is_alive() || self.queue_frame(bytes).is_err() {
            lock_pending(&self.pending).remove(&seq);
            return Err(TransportError::Disconnected);
        }

        let timer = self.call_timeout.map(|timeout| {
            let pending = Arc::clone(&self.pending);
            self.runtime.spawn(async move {
                tokio::time::sleep(timeout).await;
                let waiter = lock_pending(&pending).remove(&seq);
                if let Some(tx) = waiter {
                    let _ = tx.send(Err(TransportError::Timeout));
                }
            })
        });
        let outcome = rx.blocking_recv();
        if let Some(timer) = timer {
            timer.abort();
        }

        match outcome {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(e)) => {
                warn!(peer = %self.peer, code, seq, "request failed: {e}");
                Err(e)
            }
            Err(_) => Err(TransportError::Disconnected),
        }
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

async fn write_loop(
    peer: String,
    mut writer: OwnedWriteHalf,
    mut frames: mpsc::UnboundedReceiver<Vec<u8>>,
) {
    while let Some(bytes) = frames.recv().await {
        if let Err(e) = writer.write_all(&bytes).await {
            warn!(%peer, "failed to write frame: {e}");
            break;
        }
    }
    let _ = writer.shutdown().await;
    debug!(%peer, "writer stopped");
}

async fn dispatch_loop(
    channel: Arc<SocketChannel>,
    handler: Arc<dyn RequestHandler>,
    mut requests: mpsc::UnboundedReceiver<Frame>,
) {
    let remote: Arc<dyn RemoteChannel> = channel.clone();
    while let Some(frame) = requests.recv().await {
        let (code, seq) = (frame.code, frame.seq);
        let handler = Arc::clone(&handler);
        let link = Arc::clone(&remote);
        let served =
            tokio::task::spawn_blocking(move || handler.on_request(&link, frame.code, &frame.payload))
                .await;
        let reply = match served {
            Ok(reply) => reply,
            Err(e) => {
                warn!(peer = %channel.peer, code, "request handler failed: {e}");
                Reply::from_status(HdfError::Failure.code())
            }
        };
        let sent = encode_frame(&Frame::reply(seq, reply.status, reply.payload))
            .map_err(TransportError::from)
            .and_then(|bytes| channel.queue_frame(bytes));
        if let Err(e) = sent {
            warn!(peer = %channel.peer, code, "failed to send reply: {e}");
        }
    }
    debug!(peer = %channel.peer, "dispatcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc as std_mpsc;
    use std::thread;
    use tokio::net::TcpListener;
    use tokio::runtime::Runtime;

    const ECHO: u16 = 0x0A01;
    const CALL_BACK: u16 = 0x0A02;
    const FAIL: u16 = 0x0A03;
    const SLOW: u16 = 0x0A04;

    /// Echoes the payload; for `CALL_BACK` asks the peer to echo first.
    struct TestHandler;

    impl RequestHandler for TestHandler {
        fn on_request(&self, channel: &Arc<dyn RemoteChannel>, code: u16, payload: &[u8]) -> Reply {
            match code {
                ECHO => Reply {
                    status: 0,
                    payload: payload.to_vec(),
                },
                CALL_BACK => match channel.send_request(ECHO, payload.to_vec()) {
                    Ok(reply) => reply,
                    Err(_) => Reply::from_status(-1),
                },
                FAIL => Reply::from_status(-16),
                SLOW => {
                    thread::sleep(Duration::from_millis(500));
                    Reply::from_status(0)
                }
                _ => Reply::from_status(-2),
            }
        }
    }

    fn connected_pair(
        runtime: &Runtime,
        call_timeout: Duration,
    ) -> (Arc<SocketChannel>, Arc<SocketChannel>) {
        runtime.block_on(async {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let client = SocketChannel::connect(addr, Arc::new(TestHandler), Some(call_timeout))
                .await
                .unwrap();
            let (stream, _) = listener.accept().await.unwrap();
            let server =
                SocketChannel::spawn(stream, Arc::new(TestHandler), Some(call_timeout)).unwrap();
            (client, server)
        })
    }

    fn pair(runtime: &Runtime) -> (Arc<SocketChannel>, Arc<SocketChannel>) {
        connected_pair(runtime, Duration::from_secs(5))
    }

    #[test]
    fn test_request_gets_matching_reply() {
        // Arrange
        let runtime = Runtime::new().unwrap();
        let (client, _server) = pair(&runtime);

        // Act
        let reply = client.send_request(ECHO, vec![1, 2, 3]).unwrap();

        // Assert
        assert_eq!(reply.status, 0);
        assert_eq!(reply.payload, vec![1, 2, 3]);
    }

    #[test]
    fn test_error_status_is_carried_back() {
        let runtime = Runtime::new().unwrap();
        let (client, _server) = pair(&runtime);
        let reply = client.send_request(FAIL, Vec::new()).unwrap();
        assert_eq!(reply.status, -16);
    }

    #[test]
    fn test_handler_can_call_peer_while_serving() {
        let runtime = Runtime::new().unwrap();
        let (client, _server) = pair(&runtime);
        let reply = client.send_request(CALL_BACK, vec![9]).unwrap();
        assert_eq!(reply.payload, vec![9]);
    }

    #[test]
    fn test_concurrent_callers_get_their_own_replies() {
        let runtime = Runtime::new().unwrap();
        let (client, _server) = pair(&runtime);
        let handles: Vec<_> = (0u8..8)
            .map(|i| {
                let client = Arc::clone(&client);
                thread::spawn(move || client.send_request(ECHO, vec![i]).unwrap().payload)
            })
            .collect();

        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.join().unwrap(), vec![i as u8]);
        }
    }

    #[test]
    fn test_slow_reply_times_out() {
        // Arrange
        let runtime = Runtime::new().unwrap();
        let (client, _server) = connected_pair(&runtime, Duration::from_millis(100));

        // Act
        let result = client.send_request(SLOW, Vec::new());

        // Assert
        assert!(matches!(result, Err(TransportError::Timeout)));
        assert!(client.is_alive());
        // Requests are served in order; let the slow one finish first.
        thread::sleep(Duration::from_millis(600));
        assert_eq!(client.send_request(ECHO, vec![4]).unwrap().payload, vec![4]);
    }

    #[test]
    fn test_peer_shutdown_fires_death_recipient_once() {
        // Arrange
        let runtime = Runtime::new().unwrap();
        let (client, server) = pair(&runtime);
        let fired = Arc::new(AtomicUsize::new(0));
        let (done_tx, done_rx) = std_mpsc::channel();
        let counter = Arc::clone(&fired);
        client.add_death_recipient(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = done_tx.send(());
        }));

        // Act
        server.shutdown();

        // Assert
        done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!client.is_alive());
    }

    #[test]
    fn test_send_after_death_fails_with_disconnected() {
        let runtime = Runtime::new().unwrap();
        let (client, _server) = pair(&runtime);
        client.shutdown();

        let result = client.send_request(ECHO, Vec::new());

        assert!(matches!(result, Err(TransportError::Disconnected)));
    }

    #[test]
    fn test_recipient_added_after_death_runs_immediately() {
        let runtime = Runtime::new().unwrap();
        let (client, _server) = pair(&runtime);
        client.shutdown();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);

        client.add_death_recipient(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_spawn_outside_runtime_is_an_error() {
        let runtime = Runtime::new().unwrap();
        let stream = runtime.block_on(async {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            TcpStream::connect(listener.local_addr().unwrap()).await.unwrap()
        });

        let result = SocketChannel::spawn(stream, Arc::new(TestHandler), None);

        assert!(result.is_err());
    }
}
