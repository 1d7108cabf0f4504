//! One physical Comet connection.
//!
//! A connection is one long-lived HTTP response. It owns the framing and the
//! byte-counting sink, and every state transition happens under its monitor
//! (a mutex plus a condition variable the blocking strategy waits on).
//!
//! ```text
//! Initiated ──> Suspended <──> Writing
//!                   │
//!                   ├──> Refreshing ──> Terminated
//!                   └──────────────────> Terminated
//! ```
//!
//! Terminating a connection never touches the session queue; messages not yet
//! written stay queued for the next connection.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::error::{CometError, Result};
use crate::protocol::{JsonCodec, Message, MessageCodec};
use crate::scheduler::Cancelable;
use crate::session::{CometSession, DEFAULT_BATCH_SIZE};
use crate::transport::{CountingSink, Framing, ResponseSink, TransportKind};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Created, connect frame not yet written
    Initiated,
    /// Idle, waiting for messages
    Suspended,
    /// Draining the session queue
    Writing,
    /// Refresh sent, client expected to reconnect
    Refreshing,
    /// Done; nothing more is written
    Terminated,
}

/// Per-connection settings taken from the request and configuration.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Heartbeat interval announced in the connect frame
    pub heartbeat: Duration,
    /// Maximum response length requested by the client
    pub client_requested_length: Option<u64>,
    /// Padding override; the framing's own requirement otherwise
    pub padding: Option<usize>,
    /// Messages per write batch
    pub batch_size: usize,
    /// Codec for object messages
    pub codec: Arc<dyn MessageCodec>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            heartbeat: Duration::from_secs(30),
            client_requested_length: None,
            padding: None,
            batch_size: DEFAULT_BATCH_SIZE,
            codec: Arc::new(JsonCodec),
        }
    }
}

/// State guarded by the connection monitor.
pub(crate) struct ConnectionInner {
    state: ConnectionState,
    framing: Box<dyn Framing>,
    sink: CountingSink<Box<dyn ResponseSink>>,
    initiated: bool,
    tasks: Vec<Cancelable>,
    last_write: Instant,
}

impl ConnectionInner {
    /// When the last frame went out.
    pub(crate) fn last_write(&self) -> Instant {
        self.last_write
    }
}

/// One long-lived HTTP response bound to at most one session.
pub struct CometConnection {
    id: u64,
    kind: TransportKind,
    session: Option<Arc<CometSession>>,
    heartbeat: Duration,
    client_requested_length: Option<u64>,
    padding_required: usize,
    batch_size: usize,
    codec: Arc<dyn MessageCodec>,
    terminated: AtomicBool,
    inner: Mutex<ConnectionInner>,
    wakeup: Condvar,
}

impl CometConnection {
    /// Create a connection writing through `framing` into `sink`.
    ///
    /// Nothing is written until [`initiate`](Self::initiate).
    pub fn new(
        framing: Box<dyn Framing>,
        sink: Box<dyn ResponseSink>,
        session: Option<Arc<CometSession>>,
        options: ConnectionOptions,
    ) -> Arc<Self> {
        let padding_required = options
            .padding
            .unwrap_or_else(|| framing.padding_required());
        Arc::new(Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            kind: framing.kind(),
            session,
            heartbeat: options.heartbeat,
            client_requested_length: options.client_requested_length,
            padding_required,
            batch_size: options.batch_size.max(1),
            codec: options.codec,
            terminated: AtomicBool::new(false),
            inner: Mutex::new(ConnectionInner {
                state: ConnectionState::Initiated,
                framing,
                sink: CountingSink::new(sink),
                initiated: false,
                tasks: Vec::new(),
                last_write: Instant::now(),
            }),
            wakeup: Condvar::new(),
        })
    }

    /// Process-unique connection id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Transport in use
    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// The session this connection serves, if any
    pub fn session(&self) -> Option<&Arc<CometSession>> {
        self.session.as_ref()
    }

    /// Heartbeat interval
    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat
    }

    /// Filler bytes written before the first suspend
    pub fn padding_required(&self) -> usize {
        self.padding_required
    }

    /// Whether the connection has ended
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    /// Bytes written to the response so far
    pub fn bytes_written(&self) -> u64 {
        self.lock().sink.count()
    }

    /// Write the connect frame, take over the session and flush what is
    /// queued, padding the response if it is still short of what the client
    /// needs.
    pub fn initiate(self: &Arc<Self>) -> Result<()> {
        {
            let mut inner = self.lock();
            if inner.initiated || self.is_terminated() {
                return Err(CometError::Terminated);
            }
            inner.initiated = true;
            let mut out = String::new();
            inner.framing.initiate(&mut out, self.heartbeat);
            self.emit(&mut inner, out)?;
        }

        if let Some(session) = &self.session {
            if let Some(previous) = session.attach(Arc::clone(self)) {
                if !Arc::ptr_eq(&previous, self) {
                    tracing::debug!(
                        session = %session.id(),
                        previous = previous.id(),
                        connection = self.id,
                        "Replacing attached connection"
                    );
                    previous.terminate();
                }
            }
            if !session.is_valid() {
                self.terminate();
                return Err(CometError::InvalidSession(session.id().to_string()));
            }
        }

        let mut inner = self.lock();
        if self.is_terminated() {
            return Err(CometError::Terminated);
        }
        self.write_queue_locked(&mut inner)?;
        if self.is_terminated() {
            return Ok(());
        }
        let written = inner.sink.count() as usize;
        if written < self.padding_required {
            let mut out = String::new();
            inner.framing.padding(&mut out, self.padding_required - written);
            self.emit(&mut inner, out)?;
        }
        inner.state = ConnectionState::Suspended;
        tracing::info!(
            connection = self.id,
            transport = %self.kind,
            session = self.session.as_ref().map(|s| s.id()),
            "Comet connection initiated"
        );
        Ok(())
    }

    /// Write messages directly, bypassing the session queue.
    pub fn write(&self, messages: &[Message]) -> Result<()> {
        let mut inner = self.lock();
        if self.is_terminated() {
            return Err(CometError::Terminated);
        }
        self.write_batch_locked(&mut inner, messages)?;
        if !self.is_terminated() {
            inner.state = ConnectionState::Suspended;
        }
        Ok(())
    }

    /// Drain the session queue onto this connection.
    ///
    /// Does nothing unless this connection is the attached one. Returns the
    /// number of messages written.
    pub fn write_queue(&self) -> Result<usize> {
        let mut inner = self.lock();
        self.write_queue_locked(&mut inner)
    }

    /// Send a heartbeat frame.
    pub fn heartbeat(&self) -> Result<()> {
        let mut inner = self.lock();
        self.heartbeat_locked(&mut inner)
    }

    /// End the connection with a terminate frame. The session survives.
    pub fn terminate(&self) {
        let mut inner = self.lock();
        self.terminate_locked(&mut inner, None);
    }

    /// End the connection after the client went away. Nothing is written.
    pub fn abort(&self) {
        let mut inner = self.lock();
        self.abort_locked(&mut inner);
    }

    /// Ask the client to reconnect, then end the connection.
    pub fn refresh(&self) -> Result<()> {
        let mut inner = self.lock();
        if self.is_terminated() {
            return Err(CometError::Terminated);
        }
        if let Some(session) = &self.session {
            session.request_refresh();
        }
        self.refresh_locked(&mut inner);
        Ok(())
    }

    /// Report an error to the client and end the connection.
    ///
    /// Once streaming has started the error travels as a terminate frame.
    /// Before that there is no response yet, so the error comes back as
    /// [`CometError::Rejected`] for the caller to turn into an HTTP status.
    pub fn send_error(&self, status: u16, message: &str) -> Result<()> {
        let mut inner = self.lock();
        if self.is_terminated() {
            return Err(CometError::Terminated);
        }
        if !inner.initiated {
            self.abort_locked(&mut inner);
            return Err(CometError::Rejected {
                status,
                message: message.to_string(),
            });
        }
        self.terminate_locked(&mut inner, Some((status, message)));
        Ok(())
    }

    /// Track a scheduled task so it is cancelled when the connection ends.
    pub fn add_task(&self, task: Cancelable) {
        let mut inner = self.lock();
        if self.is_terminated() {
            task.cancel();
            return;
        }
        inner.tasks.retain(|t| !t.is_finished());
        inner.tasks.push(task);
    }

    /// Wake a thread waiting on this connection.
    ///
    /// Briefly takes the monitor, so a waiter that has checked the queue but
    /// not yet started waiting cannot miss the wake-up. Must not be called
    /// while holding it.
    pub fn notify(&self) {
        drop(self.lock());
        self.wakeup.notify_all();
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ConnectionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Release the monitor until notified or `timeout` elapses.
    pub(crate) fn wait_timeout<'a>(
        &self,
        guard: MutexGuard<'a, ConnectionInner>,
        timeout: Duration,
    ) -> MutexGuard<'a, ConnectionInner> {
        match self.wakeup.wait_timeout(guard, timeout) {
            Ok((guard, _)) => guard,
            Err(poisoned) => poisoned.into_inner().0,
        }
    }

    pub(crate) fn write_queue_locked(&self, inner: &mut ConnectionInner) -> Result<usize> {
        let Some(session) = &self.session else {
            return Ok(0);
        };
        let mut written = 0;
        while !self.is_terminated() && session.is_attached(self) {
            let (batch, empty) = session.drain_batch(self.batch_size);
            if batch.is_empty() {
                break;
            }
            written += batch.len();
            self.write_batch_locked(inner, &batch)?;
            if empty {
                break;
            }
        }
        if written > 0 && !self.is_terminated() {
            inner.state = ConnectionState::Suspended;
        }
        Ok(written)
    }

    pub(crate) fn heartbeat_locked(&self, inner: &mut ConnectionInner) -> Result<()> {
        if self.is_terminated() {
            return Err(CometError::Terminated);
        }
        let mut out = String::new();
        inner.framing.heartbeat(&mut out);
        self.emit(inner, out)?;
        tracing::trace!(connection = self.id, "Heartbeat");
        self.check_length_locked(inner);
        Ok(())
    }

    pub(crate) fn terminate_locked(&self, inner: &mut ConnectionInner, error: Option<(u16, &str)>) {
        if self.is_terminated() {
            return;
        }
        let mut out = String::new();
        if inner.initiated {
            inner.framing.terminate(&mut out, error);
            inner.framing.close(&mut out);
        }
        self.finish_locked(inner, out);
        tracing::info!(connection = self.id, error = ?error, "Comet connection terminated");
    }

    fn refresh_locked(&self, inner: &mut ConnectionInner) {
        inner.state = ConnectionState::Refreshing;
        let mut out = String::new();
        inner.framing.do_refresh(&mut out);
        inner.framing.close(&mut out);
        self.finish_locked(inner, out);
        tracing::debug!(connection = self.id, "Comet connection refreshed");
    }

    fn abort_locked(&self, inner: &mut ConnectionInner) {
        if self.is_terminated() {
            return;
        }
        self.finish_locked(inner, String::new());
        tracing::debug!(connection = self.id, "Comet connection aborted");
    }

    fn write_batch_locked(&self, inner: &mut ConnectionInner, messages: &[Message]) -> Result<()> {
        inner.state = ConnectionState::Writing;
        let mut out = String::new();
        inner
            .framing
            .write_messages(&mut out, messages, self.codec.as_ref())?;
        self.emit(inner, out)?;
        tracing::debug!(connection = self.id, count = messages.len(), "Messages written");
        self.check_length_locked(inner);
        Ok(())
    }

    /// Write one assembled chunk. A failed write hard-terminates.
    fn emit(&self, inner: &mut ConnectionInner, out: String) -> Result<()> {
        if out.is_empty() {
            return Ok(());
        }
        match inner.sink.write(Bytes::from(out)) {
            Ok(()) => {
                inner.last_write = Instant::now();
                Ok(())
            },
            Err(e) => {
                tracing::warn!(connection = self.id, error = %e, "Write failed, terminating");
                self.abort_locked(inner);
                Err(CometError::WriteFailure(e))
            },
        }
    }

    /// Refresh or terminate once the response has grown too long.
    fn check_length_locked(&self, inner: &mut ConnectionInner) {
        if self.is_terminated() {
            return;
        }
        let written = inner.sink.count();
        let action = match (&self.session, self.client_requested_length) {
            (None, Some(length)) if written > length => LengthAction::Terminate,
            (None, _) => {
                if inner.framing.is_over_terminate_length(written) {
                    LengthAction::Terminate
                } else {
                    LengthAction::None
                }
            },
            (Some(session), Some(length)) => {
                if written <= length {
                    LengthAction::None
                } else if session.request_refresh() {
                    LengthAction::Refresh
                } else {
                    LengthAction::Terminate
                }
            },
            (Some(session), None) => {
                if session.is_and_set_over_refresh_length(written) {
                    LengthAction::Refresh
                } else if session.is_over_terminate_length(written) {
                    LengthAction::Terminate
                } else {
                    LengthAction::None
                }
            },
        };
        match action {
            LengthAction::None => {},
            LengthAction::Refresh => {
                tracing::debug!(connection = self.id, written, "Over refresh length");
                self.refresh_locked(inner);
            },
            LengthAction::Terminate => {
                tracing::debug!(connection = self.id, written, "Over terminate length");
                self.terminate_locked(inner, None);
            },
        }
    }

    fn finish_locked(&self, inner: &mut ConnectionInner, out: String) {
        self.terminated.store(true, Ordering::Release);
        if !out.is_empty() {
            if let Err(e) = inner.sink.write(Bytes::from(out)) {
                tracing::debug!(connection = self.id, error = %e, "Final frame not delivered");
            }
        }
        inner.sink.close();
        inner.state = ConnectionState::Terminated;
        for task in inner.tasks.drain(..) {
            task.cancel();
        }
        self.wakeup.notify_all();
        if let Some(session) = &self.session {
            session.detach(self);
        }
    }
}

enum LengthAction {
    None,
    Refresh,
    Terminate,
}

impl fmt::Debug for CometConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CometConnection")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("session", &self.session.as_ref().map(|s| s.id()))
            .field("terminated", &self.is_terminated())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::policy::BlockingPolicy;
    use crate::protocol::Frame;
    use crate::session::MemorySessionStore;
    use crate::transport::{HtmlFileFraming, MemoryHandle, MemorySink, RawFraming};

    fn session(config: &SessionConfig) -> Arc<CometSession> {
        let store = Arc::new(MemorySessionStore::new());
        let id = store.create(Duration::from_secs(600));
        CometSession::new(&id, store, Arc::new(BlockingPolicy::new()), config)
    }

    fn raw_connection(
        session: Option<Arc<CometSession>>,
        options: ConnectionOptions,
    ) -> (Arc<CometConnection>, MemoryHandle) {
        let (sink, handle) = MemorySink::with_handle();
        let connection = CometConnection::new(
            Box::new(RawFraming::new(1024 * 1024)),
            Box::new(sink),
            session,
            options,
        );
        (connection, handle)
    }

    #[test]
    fn test_sessionless_write_and_terminate() {
        let (connection, handle) = raw_connection(None, ConnectionOptions::default());
        connection.initiate().unwrap();
        assert_eq!(connection.state(), ConnectionState::Suspended);

        connection.write(&[Message::from("hello")]).unwrap();
        connection.heartbeat().unwrap();
        connection.terminate();

        assert_eq!(handle.contents(), "!30000\n|hello\n#\n?\n");
        assert!(handle.is_closed());
        assert_eq!(connection.state(), ConnectionState::Terminated);
        assert!(matches!(
            connection.write(&[Message::from("late")]),
            Err(CometError::Terminated)
        ));
    }

    #[test]
    fn test_initiate_flushes_queue_in_order() {
        let session = session(&SessionConfig::default());
        session.enqueue_all(["a", "b", "c"]).unwrap();

        let (connection, handle) = raw_connection(Some(session.clone()), ConnectionOptions::default());
        connection.initiate().unwrap();

        assert_eq!(handle.contents(), "!30000\n|a\n|b\n|c\n");
        assert!(session.is_empty());
        assert!(session.is_attached(&connection));
    }

    #[test]
    fn test_padding_after_queued_data() {
        let session = session(&SessionConfig::default());
        session.enqueue("queued").unwrap();

        let options = ConnectionOptions {
            padding: Some(64),
            ..ConnectionOptions::default()
        };
        let (connection, handle) = raw_connection(Some(session), options);
        connection.initiate().unwrap();

        let contents = handle.contents();
        assert!(contents.starts_with("!30000\n|queued\n"));
        assert_eq!(contents.len(), 64);
        assert!(contents.ends_with(" \n"));
    }

    #[test]
    fn test_new_connection_replaces_attached() {
        let session = session(&SessionConfig::default());
        let (first, first_out) = raw_connection(Some(session.clone()), ConnectionOptions::default());
        first.initiate().unwrap();

        let (second, _) = raw_connection(Some(session.clone()), ConnectionOptions::default());
        second.initiate().unwrap();

        assert!(first.is_terminated());
        assert!(first_out.contents().ends_with("?\n"));
        assert!(session.is_attached(&second));
        assert!(!second.is_terminated());
    }

    #[test]
    fn test_write_failure_hard_terminates() {
        let session = session(&SessionConfig::default());
        let (connection, handle) = raw_connection(Some(session.clone()), ConnectionOptions::default());
        connection.initiate().unwrap();

        handle.fail_writes();
        let err = connection.heartbeat().unwrap_err();
        assert!(matches!(err, CometError::WriteFailure(_)));
        assert!(connection.is_terminated());
        assert!(session.attached().is_none());
        // nothing lost from the queue
        session.enqueue("kept").unwrap();
        assert_eq!(session.queued(), 1);
    }

    #[test]
    fn test_over_window_refreshes_then_terminates() {
        let config = SessionConfig {
            initial_window_size: 40,
            min_window_size: 10,
            ..SessionConfig::default()
        };
        let session = session(&config);
        let (connection, handle) = raw_connection(Some(session.clone()), ConnectionOptions::default());
        connection.initiate().unwrap();

        session.enqueue("x".repeat(40)).unwrap();
        connection.write_queue().unwrap();
        assert!(connection.is_terminated());
        assert!(session.window().is_refreshing());
        let frames = Frame::parse_stream(&handle.contents());
        assert_eq!(frames.last(), Some(&Frame::Refresh));

        // second connection overruns before the refresh is answered: terminate
        let (late, late_out) = raw_connection(
            Some(session.clone()),
            ConnectionOptions {
                client_requested_length: Some(20),
                ..ConnectionOptions::default()
            },
        );
        late.initiate().unwrap();
        // attach answered the first refresh; latch a new one
        assert!(session.request_refresh());
        session.enqueue("y".repeat(30)).unwrap();
        late.write_queue().unwrap();
        assert!(late.is_terminated());
        let frames = Frame::parse_stream(&late_out.contents());
        assert_eq!(frames.last(), Some(&Frame::Terminate { error: None }));
    }

    #[test]
    fn test_outstanding_refresh_terminates_past_cutoff() {
        let config = SessionConfig {
            initial_window_size: 40,
            min_window_size: 10,
            ..SessionConfig::default()
        };
        let session = session(&config);
        let (connection, handle) = raw_connection(Some(session.clone()), ConnectionOptions::default());
        connection.initiate().unwrap();
        assert!(session.request_refresh());

        // 7 + 42 bytes written against a 44 byte cutoff
        session.enqueue("x".repeat(40)).unwrap();
        connection.write_queue().unwrap();

        assert!(connection.is_terminated());
        assert_eq!(connection.bytes_written(), 51);
        let frames = Frame::parse_stream(&handle.contents());
        assert_eq!(frames.last(), Some(&Frame::Terminate { error: None }));
        assert!(!frames.contains(&Frame::Refresh));
    }

    #[test]
    fn test_client_length_without_session() {
        let options = ConnectionOptions {
            client_requested_length: Some(16),
            ..ConnectionOptions::default()
        };
        let (connection, handle) = raw_connection(None, options);
        connection.initiate().unwrap();
        connection.write(&[Message::from("0123456789")]).unwrap();

        assert!(connection.is_terminated());
        assert!(handle.contents().ends_with("?\n"));
    }

    #[test]
    fn test_send_error_before_and_after_initiate() {
        let (connection, handle) = raw_connection(None, ConnectionOptions::default());
        let err = connection.send_error(503, "busy").unwrap_err();
        assert_eq!(err.status_code(), 503);
        assert!(handle.is_empty());

        let (connection, handle) = raw_connection(None, ConnectionOptions::default());
        connection.initiate().unwrap();
        connection.send_error(500, "bad\nthing").unwrap();
        assert!(handle.contents().ends_with("?500 bad\\nthing\n"));
    }

    #[test]
    fn test_htmlfile_closes_document() {
        let (sink, handle) = MemorySink::with_handle();
        let connection = CometConnection::new(
            Box::new(HtmlFileFraming::new(None, 256, 1024 * 1024)),
            Box::new(sink),
            None,
            ConnectionOptions::default(),
        );
        connection.initiate().unwrap();
        assert!(handle.len() >= 256);

        connection.refresh().unwrap();
        assert!(handle.contents().ends_with("<script>r();</script></body></html>"));
    }
}
