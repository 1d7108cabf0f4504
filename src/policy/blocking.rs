//! Thread-per-connection strategy.

use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{ConnectionPolicy, PolicyKind};
use crate::connection::CometConnection;
use crate::error::{CometError, Result};
use crate::session::CometSession;

/// Parks the calling thread on the connection's condition variable.
///
/// The thread sleeps until the next heartbeat or keep-alive is due, or until
/// a producer or an invalidation wakes it. A vanished client is only noticed
/// when a write fails.
#[derive(Debug, Default)]
pub struct BlockingPolicy;

impl BlockingPolicy {
    /// Create the strategy.
    pub fn new() -> Self {
        Self
    }
}

impl ConnectionPolicy for BlockingPolicy {
    fn kind(&self) -> PolicyKind {
        PolicyKind::Blocking
    }

    fn suspend(&self, connection: &Arc<CometConnection>) -> Result<()> {
        let heartbeat = connection.heartbeat_interval();
        let session = connection.session().cloned();
        let mut next_keep_alive = session
            .as_ref()
            .map(|s| keep_alive_deadline(s, Instant::now(), Duration::ZERO));
        let mut inner = connection.lock();

        loop {
            if connection.is_terminated() {
                return Ok(());
            }

            if let Some(session) = &session {
                if !session.is_valid() {
                    connection.terminate_locked(&mut inner, None);
                    return Ok(());
                }
                if session.has_queued() && session.is_attached(connection) {
                    if let Err(e) = connection.write_queue_locked(&mut inner) {
                        return ended_by(connection, &mut inner, e);
                    }
                    continue;
                }
            }

            let now = Instant::now();
            let heartbeat_at = inner.last_write() + heartbeat;
            let deadline = next_keep_alive.map_or(heartbeat_at, |k| k.min(heartbeat_at));

            if now < deadline {
                inner = connection.wait_timeout(inner, deadline - now);
                continue;
            }

            if let (Some(session), Some(keep_alive_at)) = (&session, next_keep_alive) {
                if now >= keep_alive_at {
                    if let Err(e) = session.keep_alive() {
                        tracing::debug!(connection = connection.id(), error = %e, "Keep-alive failed");
                        connection.terminate_locked(&mut inner, None);
                        return Ok(());
                    }
                    next_keep_alive = Some(keep_alive_deadline(session, now, heartbeat));
                }
            }
            if now >= heartbeat_at {
                if let Err(e) = connection.heartbeat_locked(&mut inner) {
                    return ended_by(connection, &mut inner, e);
                }
            }
        }
    }

    fn enqueued(&self, session: &CometSession) {
        if let Some(connection) = session.attached() {
            connection.notify();
        }
    }
}

/// When the next keep-alive is due. A probe that leaves the session due
/// immediately again waits `floor` instead of spinning.
fn keep_alive_deadline(session: &CometSession, now: Instant, floor: Duration) -> Instant {
    let due_in = session.keep_alive_due_in_at(now);
    if due_in > 0 {
        now + Duration::from_millis(due_in as u64)
    } else {
        now + floor
    }
}

/// Finish the suspend loop after a failed write or encode.
fn ended_by(
    connection: &CometConnection,
    inner: &mut crate::connection::ConnectionInner,
    error: CometError,
) -> Result<()> {
    if error.is_disconnect() {
        return Ok(());
    }
    connection.terminate_locked(inner, Some((500, &error.to_string())));
    Err(error)
}
