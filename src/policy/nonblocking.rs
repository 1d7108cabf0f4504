//! Scheduler-driven strategy.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use super::{ConnectionPolicy, PolicyKind};
use crate::connection::CometConnection;
use crate::error::Result;
use crate::scheduler::Scheduler;
use crate::session::CometSession;

/// Holds no thread while a connection is idle.
///
/// Heartbeats run at a fixed rate on the shared scheduler and keep-alive
/// probes are one-shot tasks rescheduled after each success. Producers write
/// queued messages out on their own thread.
#[derive(Debug, Clone)]
pub struct NonBlockingPolicy {
    scheduler: Scheduler,
}

impl NonBlockingPolicy {
    /// Create the strategy on a shared scheduler.
    pub fn new(scheduler: Scheduler) -> Self {
        Self { scheduler }
    }

    /// The scheduler heartbeats and keep-alives run on.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }
}

impl ConnectionPolicy for NonBlockingPolicy {
    fn kind(&self) -> PolicyKind {
        PolicyKind::NonBlocking
    }

    fn suspend(&self, connection: &Arc<CometConnection>) -> Result<()> {
        if connection.is_terminated() {
            return Ok(());
        }
        // anything queued after initiate but before the tasks exist
        connection.write_queue()?;
        if connection.is_terminated() {
            return Ok(());
        }

        let heartbeat = connection.heartbeat_interval();
        let target = Arc::clone(connection);
        let task = self
            .scheduler
            .schedule_at_fixed_rate(heartbeat, heartbeat, move || {
                if target.is_terminated() || target.heartbeat().is_err() {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            });
        connection.add_task(task);

        if let Some(session) = connection.session() {
            self.schedule_keep_alive(connection, session, Duration::ZERO);
        }
        tracing::debug!(connection = connection.id(), "Connection suspended on scheduler");
        Ok(())
    }

    fn enqueued(&self, session: &CometSession) {
        if let Some(connection) = session.attached() {
            if let Err(e) = connection.write_queue() {
                tracing::debug!(connection = connection.id(), error = %e, "Push on enqueue failed");
            }
        }
    }
}

impl NonBlockingPolicy {
    /// Schedule the next keep-alive probe for `session`.
    ///
    /// A probe that leaves the session due immediately again waits `floor`.
    fn schedule_keep_alive(
        &self,
        connection: &Arc<CometConnection>,
        session: &Arc<CometSession>,
        floor: Duration,
    ) {
        let due_in = session.keep_alive_due_in();
        let delay = if due_in > 0 {
            Duration::from_millis(due_in as u64)
        } else {
            floor
        };

        let policy = self.clone();
        let target = Arc::clone(connection);
        let owner = Arc::clone(session);
        let task = self.scheduler.schedule(delay, move || {
            if target.is_terminated() || !owner.is_valid() {
                return;
            }
            match owner.keep_alive() {
                Ok(()) => {
                    policy.schedule_keep_alive(&target, &owner, target.heartbeat_interval());
                },
                Err(e) => {
                    tracing::debug!(connection = target.id(), error = %e, "Keep-alive failed");
                    policy.terminate(&target, true);
                },
            }
        });
        connection.add_task(task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::connection::ConnectionOptions;
    use crate::session::HttpSessionStore;
    use crate::session::MemorySessionStore;
    use crate::transport::{MemoryHandle, MemorySink, RawFraming};
    use std::time::Instant;

    struct Fixture {
        scheduler: Scheduler,
        store: Arc<MemorySessionStore>,
        session: Arc<CometSession>,
    }

    fn fixture(max_inactive: Duration, keep_alive_buffer_ms: u64) -> Fixture {
        let scheduler = Scheduler::new().unwrap();
        let store = Arc::new(MemorySessionStore::new());
        let id = store.create(max_inactive);
        let session = CometSession::new(
            &id,
            store.clone(),
            Arc::new(NonBlockingPolicy::new(scheduler.clone())),
            &SessionConfig {
                keep_alive_buffer_ms,
                ..SessionConfig::default()
            },
        );
        Fixture {
            scheduler,
            store,
            session,
        }
    }

    fn connect(fixture: &Fixture, heartbeat: Duration) -> (Arc<CometConnection>, MemoryHandle) {
        let (sink, handle) = MemorySink::with_handle();
        let connection = CometConnection::new(
            Box::new(RawFraming::new(1024 * 1024)),
            Box::new(sink),
            Some(fixture.session.clone()),
            ConnectionOptions {
                heartbeat,
                ..ConnectionOptions::default()
            },
        );
        connection.initiate().unwrap();
        NonBlockingPolicy::new(fixture.scheduler.clone())
            .suspend(&connection)
            .unwrap();
        (connection, handle)
    }

    fn eventually(mut check: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if check() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_enqueue_writes_on_producer_thread() {
        let fixture = fixture(Duration::from_secs(600), 0);
        let (_connection, handle) = connect(&fixture, Duration::from_secs(60));

        fixture.session.enqueue("pushed").unwrap();
        assert!(handle.contents().ends_with("|pushed\n"));
        assert!(fixture.session.is_empty());
    }

    #[test]
    fn test_heartbeats_run_on_scheduler() {
        let fixture = fixture(Duration::from_secs(600), 0);
        let (connection, handle) = connect(&fixture, Duration::from_millis(10));

        assert!(eventually(|| handle.contents().matches('#').count() >= 2));
        connection.terminate();
    }

    #[test]
    fn test_terminate_cancels_tasks() {
        let fixture = fixture(Duration::from_secs(600), 0);
        let (connection, _handle) = connect(&fixture, Duration::from_secs(60));
        // heartbeat + keep-alive
        assert_eq!(fixture.scheduler.pending(), 2);

        connection.terminate();
        assert!(eventually(|| fixture.scheduler.pending() == 0));
    }

    #[test]
    fn test_keep_alive_failure_terminates() {
        let fixture = fixture(Duration::from_secs(600), 0);
        let (connection, _handle) = connect(&fixture, Duration::from_secs(60));

        // due immediately once the HTTP session is gone, and access fails
        fixture.store.invalidate(fixture.session.id());
        let probe = Arc::clone(&connection);
        NonBlockingPolicy::new(fixture.scheduler.clone()).schedule_keep_alive(
            &probe,
            &fixture.session,
            Duration::ZERO,
        );

        assert!(eventually(|| connection.is_terminated()));
        assert!(eventually(|| fixture.scheduler.pending() == 0));
    }

    #[test]
    fn test_keep_alive_touches_http_session() {
        // probe due 200ms in, well before the 500ms expiry
        let fixture = fixture(Duration::from_millis(500), 300);
        let (connection, _handle) = connect(&fixture, Duration::from_millis(50));
        let first = fixture.store.last_accessed(fixture.session.id()).unwrap();

        assert!(eventually(|| {
            fixture
                .store
                .last_accessed(fixture.session.id())
                .is_some_and(|t| t > first)
        }));
        assert!(!connection.is_terminated());
        connection.terminate();
    }
}
