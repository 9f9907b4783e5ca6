//! Readiness multiplexer owned by one component.
//!
//! Every socket gets a reader task that forwards received chunks into one
//! event channel, and a writer task fed through a [`WriterHandle`]. Connects
//! and accepts run on tasks of their own and report back through the same
//! channel. The owner drains the channel with [`EventLoop::poll`], so all
//! connection state stays on a single task and needs no locking.
//!
//! Events for a handle that was deregistered may still be queued; owners
//! ignore handles they no longer know.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::inet::connect_stream;
use super::writer::{spawn_writer_task, WriterHandle};

/// Default size of one socket read.
pub const DEFAULT_READ_CHUNK: usize = 8192;

/// Identifier of one registered socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(u64);

impl Handle {
    /// Wrap a raw identifier.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw identifier.
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Something that happened on a registered socket or timer.
#[derive(Debug)]
pub enum Event {
    /// Bytes arrived on a stream.
    Data { handle: Handle, bytes: Bytes },
    /// A stream reached EOF (`error` is `None`) or failed. For a pending
    /// connect this reports the failed attempt.
    Closed {
        handle: Handle,
        error: Option<io::Error>,
    },
    /// A listener accepted its connection.
    Accepted {
        handle: Handle,
        stream: TcpStream,
        peer: SocketAddr,
    },
    /// A connect started with [`EventLoop::register_connect`] succeeded.
    Connected { handle: Handle, stream: TcpStream },
    /// The deadline passed to [`EventLoop::poll`] expired.
    Timer,
}

/// Per-component event source.
pub struct EventLoop {
    tx: mpsc::UnboundedSender<Event>,
    rx: mpsc::UnboundedReceiver<Event>,
    tasks: HashMap<Handle, JoinHandle<()>>,
    next_handle: u64,
    read_chunk: usize,
}

impl EventLoop {
    /// Create an event loop with the default read size.
    pub fn new() -> Self {
        Self::with_read_chunk(DEFAULT_READ_CHUNK)
    }

    /// Create an event loop reading at most `read_chunk` bytes per event.
    pub fn with_read_chunk(read_chunk: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx,
            tasks: HashMap::new(),
            next_handle: 1,
            read_chunk: read_chunk.max(1),
        }
    }

    fn allocate(&mut self) -> Handle {
        let handle = Handle(self.next_handle);
        self.next_handle += 1;
        handle
    }

    /// Register a connected stream for read interest.
    ///
    /// Returns the handle that tags its events and the writer for its
    /// outgoing frames.
    pub fn register_stream(&mut self, stream: TcpStream) -> (Handle, WriterHandle) {
        let handle = self.allocate();
        let (mut read_half, write_half) = stream.into_split();
        let writer = spawn_writer_task(write_half, handle, self.tx.clone());

        let events = self.tx.clone();
        let chunk = self.read_chunk;
        let task = tokio::spawn(async move {
            let mut buf = BytesMut::with_capacity(chunk);
            loop {
                buf.reserve(chunk);
                match read_half.read_buf(&mut buf).await {
                    Ok(0) => {
                        let _ = events.send(Event::Closed {
                            handle,
                            error: None,
                        });
                        break;
                    }
                    Ok(_) => {
                        let bytes = buf.split().freeze();
                        if events.send(Event::Data { handle, bytes }).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = events.send(Event::Closed {
                            handle,
                            error: Some(e),
                        });
                        break;
                    }
                }
            }
        });
        self.tasks.insert(handle, task);
        (handle, writer)
    }

    /// Register a listener that accepts exactly one connection.
    pub fn register_listener(&mut self, listener: TcpListener) -> Handle {
        let handle = self.allocate();
        let events = self.tx.clone();
        let task = tokio::spawn(async move {
            let event = match listener.accept().await {
                Ok((stream, peer)) => Event::Accepted {
                    handle,
                    stream,
                    peer,
                },
                Err(e) => Event::Closed {
                    handle,
                    error: Some(e),
                },
            };
            let _ = events.send(event);
        });
        self.tasks.insert(handle, task);
        handle
    }

    /// Start connecting to `addr` without waiting for the outcome.
    ///
    /// The returned handle is reported once, either as
    /// [`Event::Connected`] or as [`Event::Closed`] with the error.
    pub fn register_connect(&mut self, addr: SocketAddr, timeout: Duration, nodelay: bool) -> Handle {
        let handle = self.allocate();
        let events = self.tx.clone();
        let task = tokio::spawn(async move {
            let event = match connect_stream(addr, timeout, nodelay).await {
                Ok(stream) => Event::Connected { handle, stream },
                Err(e) => Event::Closed {
                    handle,
                    error: Some(e),
                },
            };
            let _ = events.send(event);
        });
        self.tasks.insert(handle, task);
        handle
    }

    /// Stop watching `handle`. Unknown handles are ignored.
    ///
    /// The write side closes once its last [`WriterHandle`] is dropped.
    pub fn deregister(&mut self, handle: Handle) {
        if let Some(task) = self.tasks.remove(&handle) {
            task.abort();
        }
    }

    /// Whether `handle` is registered.
    pub fn is_registered(&self, handle: Handle) -> bool {
        self.tasks.contains_key(&handle)
    }

    /// Number of registered sockets.
    pub fn registered(&self) -> usize {
        self.tasks.len()
    }

    /// Next event without waiting.
    pub fn try_poll(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }

    /// Wait for the next event, or [`Event::Timer`] once `deadline` passes.
    pub async fn poll(&mut self, deadline: Option<Instant>) -> Event {
        match deadline {
            Some(deadline) => tokio::select! {
                event = self.rx.recv() => event.unwrap_or(Event::Timer),
                _ = tokio::time::sleep_until(deadline) => Event::Timer,
            },
            // The loop holds its own sender, so recv only ends with the loop.
            None => self.rx.recv().await.unwrap_or(Event::Timer),
        }
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        for (_, task) in self.tasks.drain() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_stream_data_and_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (mut server, _) = listener.accept().await.unwrap();

        let mut event_loop = EventLoop::new();
        let (handle, _writer) = event_loop.register_stream(client);

        server.write_all(b"hello").await.unwrap();
        match event_loop.poll(None).await {
            Event::Data { handle: h, bytes } => {
                assert_eq!(h, handle);
                assert_eq!(bytes.as_ref(), b"hello");
            }
            other => panic!("unexpected event {:?}", other),
        }

        drop(server);
        match event_loop.poll(None).await {
            Event::Closed { handle: h, error } => {
                assert_eq!(h, handle);
                assert!(error.is_none());
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_listener_accepts_once() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut event_loop = EventLoop::new();
        let handle = event_loop.register_listener(listener);
        let _client = TcpStream::connect(addr).await.unwrap();

        match event_loop.poll(None).await {
            Event::Accepted { handle: h, .. } => assert_eq!(h, handle),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_connect_reports_stream() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut event_loop = EventLoop::new();
        let handle = event_loop.register_connect(addr, Duration::from_secs(1), true);
        let (_server, _) = listener.accept().await.unwrap();
        match event_loop.poll(None).await {
            Event::Connected { handle: h, stream } => {
                assert_eq!(h, handle);
                assert_eq!(stream.peer_addr().unwrap(), addr);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_refused_connect_reports_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut event_loop = EventLoop::new();
        let handle = event_loop.register_connect(addr, Duration::from_secs(1), false);
        match event_loop.poll(None).await {
            Event::Closed { handle: h, error } => {
                assert_eq!(h, handle);
                assert!(error.is_some());
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_pending_connect_does_not_block_timer() {
        let mut event_loop = EventLoop::new();
        // Unroutable: the attempt either hangs until its timeout or fails fast.
        let addr: SocketAddr = "10.255.255.1:9".parse().unwrap();
        let started = std::time::Instant::now();
        let handle = event_loop.register_connect(addr, Duration::from_secs(30), false);
        assert!(started.elapsed() < Duration::from_secs(1));

        let deadline = Instant::now() + Duration::from_millis(20);
        match event_loop.poll(Some(deadline)).await {
            Event::Timer => {}
            Event::Closed { handle: h, .. } => assert_eq!(h, handle),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_poll_deadline() {
        let mut event_loop = EventLoop::new();
        let deadline = Instant::now() + Duration::from_millis(10);
        assert!(matches!(event_loop.poll(Some(deadline)).await, Event::Timer));
    }

    #[tokio::test]
    async fn test_deregister_unknown_is_ignored() {
        let mut event_loop = EventLoop::new();
        event_loop.deregister(Handle::from_raw(77));
        assert_eq!(event_loop.registered(), 0);
        assert!(event_loop.try_poll().is_none());
    }
}
