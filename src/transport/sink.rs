//! Response sinks: where framed bytes go.

use std::convert::Infallible;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use futures::Stream;
use tokio::sync::mpsc;

/// Output side of one HTTP response.
pub trait ResponseSink: Send {
    /// Write one complete chunk.
    fn write(&mut self, chunk: Bytes) -> io::Result<()>;

    /// End the response. Further writes fail.
    fn close(&mut self);
}

impl<S: ResponseSink + ?Sized> ResponseSink for Box<S> {
    fn write(&mut self, chunk: Bytes) -> io::Result<()> {
        (**self).write(chunk)
    }

    fn close(&mut self) {
        (**self).close();
    }
}

/// Counts bytes successfully handed to the inner sink.
#[derive(Debug)]
pub struct CountingSink<S> {
    inner: S,
    count: u64,
}

impl<S: ResponseSink> CountingSink<S> {
    /// Wrap a sink with a zero count.
    pub fn new(inner: S) -> Self {
        Self { inner, count: 0 }
    }

    /// Bytes written so far.
    pub fn count(&self) -> u64 {
        self.count
    }
}

impl<S: ResponseSink> ResponseSink for CountingSink<S> {
    fn write(&mut self, chunk: Bytes) -> io::Result<()> {
        let len = chunk.len() as u64;
        self.inner.write(chunk)?;
        self.count += len;
        Ok(())
    }

    fn close(&mut self) {
        self.inner.close();
    }
}

/// Create a sink feeding a streaming response body.
pub fn channel() -> (ChannelSink, ResponseBody) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelSink { tx: Some(tx) }, ResponseBody { rx })
}

/// Sink writing into an unbounded channel drained by the HTTP server.
///
/// A dropped receiver means the client went away; writes then fail with
/// `BrokenPipe`.
#[derive(Debug)]
pub struct ChannelSink {
    tx: Option<mpsc::UnboundedSender<Bytes>>,
}

impl ResponseSink for ChannelSink {
    fn write(&mut self, chunk: Bytes) -> io::Result<()> {
        match &self.tx {
            Some(tx) => tx
                .send(chunk)
                .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "client disconnected")),
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "response already closed",
            )),
        }
    }

    fn close(&mut self) {
        self.tx = None;
    }
}

/// Receiving half of [`channel`].
#[derive(Debug)]
pub struct ResponseBody {
    rx: mpsc::UnboundedReceiver<Bytes>,
}

impl ResponseBody {
    /// Next chunk, or `None` once the sink is closed and drained.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    /// Chunks already buffered, without waiting.
    pub fn drain_ready(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        while let Ok(chunk) = self.rx.try_recv() {
            out.extend_from_slice(&chunk);
        }
        out
    }

    /// Adapt into a body stream for the HTTP server.
    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes, Infallible>> + Send {
        futures::stream::unfold(self.rx, |mut rx| async move {
            rx.recv().await.map(|chunk| (Ok(chunk), rx))
        })
    }
}

/// In-memory sink for embedding and tests.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    shared: Arc<MemoryShared>,
}

#[derive(Debug, Default)]
struct MemoryShared {
    data: Mutex<Vec<u8>>,
    closed: AtomicBool,
    fail: AtomicBool,
}

/// Inspection handle for a [`MemorySink`].
#[derive(Debug, Clone)]
pub struct MemoryHandle {
    shared: Arc<MemoryShared>,
}

impl MemorySink {
    /// Create a sink and the handle to inspect it.
    pub fn with_handle() -> (Self, MemoryHandle) {
        let sink = Self::default();
        let handle = MemoryHandle {
            shared: Arc::clone(&sink.shared),
        };
        (sink, handle)
    }
}

impl ResponseSink for MemorySink {
    fn write(&mut self, chunk: Bytes) -> io::Result<()> {
        if self.shared.fail.load(Ordering::Acquire) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "simulated disconnect"));
        }
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "sink closed"));
        }
        self.shared
            .data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(&chunk);
        Ok(())
    }

    fn close(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
    }
}

impl MemoryHandle {
    /// Everything written so far, lossily decoded.
    pub fn contents(&self) -> String {
        let data = self.shared.data.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&data).into_owned()
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.shared
            .data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the sink was closed.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Make every following write fail, as if the client disconnected.
    pub fn fail_writes(&self) {
        self.shared.fail.store(true, Ordering::Release);
    }
}
