//! Comet sessions: the reconnect-spanning channel to one browser.
//!
//! A session owns the message queue. Connections come and go; at most one is
//! attached at any time and only the attached one drains the queue, so
//! messages reach the wire in the order they were enqueued no matter how many
//! reconnects happen in between.
//!
//! ```text
//!   producers ──enqueue──> [ queue ] ──drain──> attached connection ──> HTTP
//!                               │
//!                        policy.enqueued()  (wake / push)
//! ```
//!
//! # Lifecycle
//!
//! | Event                          | Effect                                |
//! |--------------------------------|---------------------------------------|
//! | first channel request          | session created, bound to HTTP session|
//! | connection initiates           | `attach`, previous one terminated     |
//! | connection ends                | `detach` (only if still attached)     |
//! | HTTP session expires/invalid   | `invalidate`: connection terminated   |

mod registry;
mod store;
mod window;

pub use registry::SessionRegistry;
pub use store::{HttpSessionStore, MemorySessionStore};
pub use window::AdaptiveWindow;

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use serde_json::Value;

use crate::config::SessionConfig;
use crate::connection::CometConnection;
use crate::error::{CometError, Result};
use crate::policy::ConnectionPolicy;
use crate::protocol::Message;

/// Default number of messages written per batch
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// One logical client channel.
pub struct CometSession {
    /// Id of the HTTP session this channel is bound to
    id: String,
    store: Arc<dyn HttpSessionStore>,
    policy: Arc<dyn ConnectionPolicy>,
    queue: Mutex<VecDeque<Message>>,
    valid: AtomicBool,
    attached: ArcSwapOption<CometConnection>,
    window: AdaptiveWindow,
    keep_alive_buffer: Duration,
    attributes: RwLock<HashMap<String, Value>>,
    created: Instant,
}

impl CometSession {
    /// Create a session for the HTTP session `id`.
    pub fn new(
        id: &str,
        store: Arc<dyn HttpSessionStore>,
        policy: Arc<dyn ConnectionPolicy>,
        config: &SessionConfig,
    ) -> Arc<Self> {
        tracing::debug!(session = %id, policy = %policy.kind(), "Comet session created");
        Arc::new(Self {
            id: id.to_string(),
            store,
            policy,
            queue: Mutex::new(VecDeque::new()),
            valid: AtomicBool::new(true),
            attached: ArcSwapOption::empty(),
            window: AdaptiveWindow::new(config),
            keep_alive_buffer: Duration::from_millis(config.keep_alive_buffer_ms),
            attributes: RwLock::new(HashMap::new()),
            created: Instant::now(),
        })
    }

    /// HTTP session id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether the session still accepts messages
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    /// Time since creation
    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }

    /// The adaptive window
    pub fn window(&self) -> &AdaptiveWindow {
        &self.window
    }

    /// Queue a message and wake the attached connection.
    pub fn enqueue(&self, message: impl Into<Message>) -> Result<()> {
        self.ensure_valid()?;
        self.lock_queue().push_back(message.into());
        self.policy.enqueued(self);
        Ok(())
    }

    /// Queue several messages with a single wake-up.
    pub fn enqueue_all<I>(&self, messages: I) -> Result<()>
    where
        I: IntoIterator,
        I::Item: Into<Message>,
    {
        self.ensure_valid()?;
        self.lock_queue()
            .extend(messages.into_iter().map(Into::into));
        self.policy.enqueued(self);
        Ok(())
    }

    fn ensure_valid(&self) -> Result<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(CometError::InvalidSession(self.id.clone()))
        }
    }

    fn lock_queue(&self) -> std::sync::MutexGuard<'_, VecDeque<Message>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Valid and nothing queued.
    pub fn is_empty(&self) -> bool {
        self.is_valid() && self.lock_queue().is_empty()
    }

    /// Whether messages are waiting.
    pub fn has_queued(&self) -> bool {
        !self.lock_queue().is_empty()
    }

    /// Number of queued messages.
    pub fn queued(&self) -> usize {
        self.lock_queue().len()
    }

    /// Pop up to `max` messages. The flag tells whether the queue is empty
    /// afterwards.
    pub fn drain_batch(&self, max: usize) -> (Vec<Message>, bool) {
        let mut queue = self.lock_queue();
        let take = max.min(queue.len());
        let batch: Vec<Message> = queue.drain(..take).collect();
        (batch, queue.is_empty())
    }

    /// Make `connection` the active one, returning the one it replaced.
    ///
    /// The caller terminates the previous connection. When a refresh was
    /// outstanding, its round trip resizes the window.
    pub fn attach(&self, connection: Arc<CometConnection>) -> Option<Arc<CometConnection>> {
        if !self.is_valid() {
            return None;
        }
        if let Some(elapsed) = self.window.take_refresh_elapsed(Instant::now()) {
            let size = self.record_refresh_outcome(elapsed, &connection);
            tracing::debug!(
                session = %self.id,
                elapsed_ms = elapsed.as_millis() as u64,
                window = size,
                "Refresh round trip"
            );
        }
        self.attached.swap(Some(connection))
    }

    /// Clear the active connection if it is still `connection`.
    pub fn detach(&self, connection: &CometConnection) -> bool {
        let current = self.attached.load();
        match current.as_deref() {
            Some(attached) if std::ptr::eq(attached, connection) => {
                let previous = self.attached.compare_and_swap(&current, None);
                previous
                    .as_deref()
                    .is_some_and(|prev| std::ptr::eq(prev, connection))
            },
            _ => false,
        }
    }

    /// The active connection.
    pub fn attached(&self) -> Option<Arc<CometConnection>> {
        self.attached.load_full()
    }

    /// Whether `connection` is the active one.
    pub fn is_attached(&self, connection: &CometConnection) -> bool {
        self.attached
            .load()
            .as_deref()
            .is_some_and(|attached| std::ptr::eq(attached, connection))
    }

    /// Resize the window after a refresh answered in `elapsed`.
    pub fn record_refresh_outcome(&self, elapsed: Duration, connection: &CometConnection) -> u64 {
        self.window.record_refresh_outcome(elapsed, connection.kind())
    }

    /// See [`AdaptiveWindow::is_and_set_over_refresh_length`].
    pub fn is_and_set_over_refresh_length(&self, written: u64) -> bool {
        self.window.is_and_set_over_refresh_length(written)
    }

    /// See [`AdaptiveWindow::is_over_terminate_length`].
    pub fn is_over_terminate_length(&self, written: u64) -> bool {
        self.window.is_over_terminate_length(written)
    }

    /// Latch a refresh. Returns false if one is already outstanding.
    pub fn request_refresh(&self) -> bool {
        self.window.request_refresh()
    }

    /// Millis until a keep-alive must reach the HTTP session.
    ///
    /// Zero or negative means now.
    pub fn keep_alive_due_in(&self) -> i64 {
        self.keep_alive_due_in_at(Instant::now())
    }

    /// [`keep_alive_due_in`](Self::keep_alive_due_in) evaluated at `now`.
    pub fn keep_alive_due_in_at(&self, now: Instant) -> i64 {
        let (Some(last), Some(max_inactive)) = (
            self.store.last_accessed(&self.id),
            self.store.max_inactive(&self.id),
        ) else {
            return 0;
        };
        let idle = now.saturating_duration_since(last).as_millis() as i64;
        max_inactive.as_millis() as i64 - idle - self.keep_alive_buffer.as_millis() as i64
    }

    /// Touch the HTTP session out of band.
    ///
    /// An HTTP session that is already gone comes back as `SessionExpired`,
    /// which callers treat as a reason to terminate.
    pub fn keep_alive(&self) -> Result<()> {
        if self.store.access(&self.id, false) {
            tracing::trace!(session = %self.id, "Keep-alive");
            Ok(())
        } else {
            Err(CometError::SessionExpired(self.id.clone()))
        }
    }

    /// Invalidate once: terminate the attached connection, drop the queue and
    /// unbind from the HTTP session. Later calls do nothing.
    pub fn invalidate(&self) {
        if !self.valid.swap(false, Ordering::AcqRel) {
            return;
        }
        tracing::info!(session = %self.id, "Comet session invalidated");
        if let Some(connection) = self.attached.swap(None) {
            connection.terminate();
        }
        self.lock_queue().clear();
        self.store.unbind(&self.id);
    }

    /// Store a per-channel attribute.
    pub fn set_attribute(&self, name: &str, value: Value) {
        self.attributes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), value);
    }

    /// Read a per-channel attribute.
    pub fn attribute(&self, name: &str) -> Option<Value> {
        self.attributes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Remove a per-channel attribute.
    pub fn remove_attribute(&self, name: &str) -> Option<Value> {
        self.attributes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }
}

impl fmt::Debug for CometSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CometSession")
            .field("id", &self.id)
            .field("valid", &self.is_valid())
            .field("queued", &self.queued())
            .field("window", &self.window.size())
            .field("refreshing", &self.window.is_refreshing())
            .finish_non_exhaustive()
    }
}
