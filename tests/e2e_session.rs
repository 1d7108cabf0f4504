//! End-to-end session tests.
//!
//! These tests drive sessions through real connections writing into memory
//! sinks: ordering across reconnects, attach races, window behaviour and
//! invalidation of a suspended connection.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use comet::policy::{BlockingPolicy, ConnectionPolicy, NonBlockingPolicy};
use comet::protocol::Frame;
use comet::session::{CometSession, HttpSessionStore, MemorySessionStore, SessionRegistry};
use comet::transport::{MemoryHandle, MemorySink, RawFraming};
use comet::{CometConnection, CometError, ConnectionOptions, Scheduler, SessionConfig};
use proptest::prelude::*;

fn registry_with(
    policy: Arc<dyn ConnectionPolicy>,
    config: SessionConfig,
) -> (SessionRegistry, Arc<MemorySessionStore>) {
    let store = Arc::new(MemorySessionStore::new());
    let registry = SessionRegistry::new(store.clone(), policy, config);
    (registry, store)
}

fn new_session(config: SessionConfig) -> Arc<CometSession> {
    let (registry, store) = registry_with(Arc::new(BlockingPolicy::new()), config);
    let id = store.create(Duration::from_secs(600));
    registry.get_or_create(&id).unwrap()
}

fn open(session: &Arc<CometSession>) -> (Arc<CometConnection>, MemoryHandle) {
    open_with(session, ConnectionOptions::default())
}

fn open_with(
    session: &Arc<CometSession>,
    options: ConnectionOptions,
) -> (Arc<CometConnection>, MemoryHandle) {
    let (sink, handle) = MemorySink::with_handle();
    let connection = CometConnection::new(
        Box::new(RawFraming::new(1024 * 1024)),
        Box::new(sink),
        Some(Arc::clone(session)),
        options,
    );
    (connection, handle)
}

fn texts(handle: &MemoryHandle) -> Vec<String> {
    Frame::parse_stream(&handle.contents())
        .into_iter()
        .filter_map(|frame| match frame {
            Frame::Text(text) => Some(text),
            _ => None,
        })
        .collect()
}

/// Messages queued before any connection reach the first one, in order
#[test]
fn test_messages_queued_before_connect() {
    let session = new_session(SessionConfig::default());
    session.enqueue("first").unwrap();
    session.enqueue("second").unwrap();
    session.enqueue("third").unwrap();

    let (connection, handle) = open(&session);
    connection.initiate().unwrap();

    assert_eq!(texts(&handle), vec!["first", "second", "third"]);
    assert!(session.is_empty());
}

/// Order holds across a reconnect with messages left queued in between
#[test]
fn test_order_across_reconnect() {
    let session = new_session(SessionConfig::default());

    let (first, first_out) = open(&session);
    first.initiate().unwrap();
    session.enqueue("a").unwrap();
    session.enqueue("b").unwrap();
    first.write_queue().unwrap();
    session.enqueue("c").unwrap();

    first.terminate();
    session.enqueue("d").unwrap();

    let (second, second_out) = open(&session);
    second.initiate().unwrap();

    assert_eq!(texts(&first_out), vec!["a", "b"]);
    assert_eq!(texts(&second_out), vec!["c", "d"]);
}

/// Only the attached connection drains the queue
#[test]
fn test_replaced_connection_stops_writing() {
    let session = new_session(SessionConfig::default());
    let (old, old_out) = open(&session);
    old.initiate().unwrap();

    let (new, new_out) = open(&session);
    new.initiate().unwrap();
    session.enqueue("only-new").unwrap();

    assert!(old.is_terminated());
    assert!(matches!(old.write_queue(), Ok(0)));
    new.write_queue().unwrap();
    assert!(texts(&old_out).is_empty());
    assert_eq!(texts(&new_out), vec!["only-new"]);
}

/// Concurrent attaches leave exactly one live connection
#[test]
fn test_concurrent_attach_leaves_one() {
    let session = new_session(SessionConfig::default());

    let connections: Vec<_> = (0..16).map(|_| open(&session).0).collect();
    thread::scope(|scope| {
        for connection in &connections {
            scope.spawn(move || {
                let _ = connection.initiate();
            });
        }
    });

    let live: Vec<_> = connections.iter().filter(|c| !c.is_terminated()).collect();
    assert_eq!(live.len(), 1);
    let attached = session.attached().unwrap();
    assert!(Arc::ptr_eq(&attached, live[0]));
}

/// Refresh on the first over-length, terminate on the next without a new
/// refresh round trip
#[test]
fn test_refresh_then_terminate() {
    let session = new_session(SessionConfig {
        initial_window_size: 1000,
        min_window_size: 100,
        ..SessionConfig::default()
    });

    assert!(!session.is_and_set_over_refresh_length(1000));
    assert!(session.is_and_set_over_refresh_length(1001));
    assert!(!session.is_and_set_over_refresh_length(1200));
    assert!(session.is_over_terminate_length(1200));
}

/// A fast reconnect after a refresh doubles the window
#[test]
fn test_refresh_round_trip_grows_window() {
    let session = new_session(SessionConfig {
        initial_window_size: 64,
        min_window_size: 16,
        ..SessionConfig::default()
    });
    let (first, first_out) = open(&session);
    first.initiate().unwrap();
    session.enqueue("x".repeat(80)).unwrap();
    first.write_queue().unwrap();

    assert!(first.is_terminated());
    assert_eq!(
        Frame::parse_stream(&first_out.contents()).last(),
        Some(&Frame::Refresh)
    );

    let (second, _) = open(&session);
    second.initiate().unwrap();
    assert_eq!(session.window().size(), 128);
    assert!(!session.window().is_refreshing());
}

/// Invalidating a session wakes its blocked connection promptly
#[test]
fn test_invalidate_wakes_blocking_connection() {
    let (registry, store) = registry_with(Arc::new(BlockingPolicy::new()), SessionConfig::default());
    let id = store.create(Duration::from_secs(600));
    let session = registry.get_or_create(&id).unwrap();

    let (connection, handle) = open_with(
        &session,
        ConnectionOptions {
            heartbeat: Duration::from_secs(60),
            ..ConnectionOptions::default()
        },
    );
    connection.initiate().unwrap();

    let worker = {
        let connection = Arc::clone(&connection);
        thread::spawn(move || {
            let started = Instant::now();
            let result = BlockingPolicy::new().suspend(&connection);
            (result, started.elapsed())
        })
    };
    thread::sleep(Duration::from_millis(30));

    assert!(registry.invalidate(&id));
    let (result, elapsed) = worker.join().unwrap();

    assert!(result.is_ok());
    assert!(elapsed < Duration::from_secs(5));
    assert!(connection.is_terminated());
    assert_eq!(
        Frame::parse_stream(&handle.contents()).last(),
        Some(&Frame::Terminate { error: None })
    );
    assert!(matches!(
        session.enqueue("late"),
        Err(CometError::InvalidSession(_))
    ));
}

/// Producers on other threads reach a non-blocking connection directly
#[test]
fn test_nonblocking_push_from_producers() {
    let scheduler = Scheduler::new().unwrap();
    let policy = Arc::new(NonBlockingPolicy::new(scheduler.clone()));
    let (registry, store) = registry_with(policy.clone(), SessionConfig::default());
    let id = store.create(Duration::from_secs(600));
    let session = registry.get_or_create(&id).unwrap();

    let (connection, handle) = open(&session);
    connection.initiate().unwrap();
    policy.suspend(&connection).unwrap();

    thread::scope(|scope| {
        for producer in 0..4 {
            let session = &session;
            scope.spawn(move || {
                for i in 0..25 {
                    session.enqueue(format!("p{producer}-{i}")).unwrap();
                }
            });
        }
    });

    let received = texts(&handle);
    assert_eq!(received.len(), 100);
    // per-producer order survives interleaving
    for producer in 0..4 {
        let prefix = format!("p{producer}-");
        let seen: Vec<usize> = received
            .iter()
            .filter_map(|t| t.strip_prefix(&prefix))
            .map(|n| n.parse().unwrap())
            .collect();
        assert_eq!(seen, (0..25).collect::<Vec<_>>());
    }

    connection.terminate();
    let deadline = Instant::now() + Duration::from_secs(2);
    while scheduler.pending() > 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(scheduler.pending(), 0);
}

/// Sweeping expired HTTP sessions invalidates the Comet sessions they carry
#[test]
fn test_sweep_expires_bound_sessions() {
    let (registry, store) = registry_with(Arc::new(BlockingPolicy::new()), SessionConfig::default());
    let short = store.create(Duration::from_millis(10));
    let long = store.create(Duration::from_secs(600));
    let expiring = registry.get_or_create(&short).unwrap();
    let surviving = registry.get_or_create(&long).unwrap();

    thread::sleep(Duration::from_millis(30));
    assert_eq!(registry.sweep(), 1);
    assert!(!expiring.is_valid());
    assert!(surviving.is_valid());
    assert!(store.bound(&long).is_some());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Enqueue order is the delivery order, however the stream is split
    /// across connections
    #[test]
    fn prop_order_preserved_across_connections(
        batches in proptest::collection::vec(
            proptest::collection::vec("[a-z0-9\\\\\n]{0,12}", 0..8),
            1..6,
        ),
        flush in proptest::collection::vec(any::<bool>(), 6),
    ) {
        let session = new_session(SessionConfig::default());
        let mut outputs = Vec::new();
        let mut expected = Vec::new();

        for (i, batch) in batches.iter().enumerate() {
            let (connection, handle) = open(&session);
            connection.initiate().unwrap();
            for message in batch {
                session.enqueue(message.as_str()).unwrap();
                expected.push(message.clone());
            }
            if flush[i] {
                connection.write_queue().unwrap();
            }
            outputs.push(handle);
        }
        let (last, last_out) = open(&session);
        last.initiate().unwrap();
        outputs.push(last_out);

        let delivered: Vec<String> = outputs.iter().flat_map(texts).collect();
        prop_assert_eq!(delivered, expected);
        prop_assert!(session.is_empty());
    }

    /// Keep-alive is due exactly when idle time reaches max inactive minus
    /// the buffer
    #[test]
    fn prop_keep_alive_due(idle_ms in 0u64..120_000) {
        let store = Arc::new(MemorySessionStore::new());
        let id = store.create(Duration::from_secs(60));
        let session = CometSession::new(
            &id,
            store.clone(),
            Arc::new(BlockingPolicy::new()),
            &SessionConfig::default(),
        );
        let last = store.last_accessed(&id).unwrap();
        let due_in = session.keep_alive_due_in_at(last + Duration::from_millis(idle_ms));
        prop_assert_eq!(due_in <= 0, idle_ms >= 60_000 - 10_000);
    }
}
