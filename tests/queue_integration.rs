//! Queue engine integration tests
//!
//! These tests drive the public API end to end against the in-memory store:
//! publishing, consuming through the prefetch buffer, terminating deliveries
//! and stopping consumers.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, Notify};
use tokio_test::{assert_err, assert_ok};

use mqr::config::{ConnectionConfig, ConsumeConfig};
use mqr::keys;
use mqr::{
    Connection, ConsumerFn, Deliveries, Delivery, Diagnostic, MemoryStore, QueueError, Store,
};

const POLL: Duration = Duration::from_millis(5);

fn fast_config() -> ConnectionConfig {
    ConnectionConfig {
        heartbeat_interval_ms: 10,
        heartbeat_ttl_ms: 200,
        heartbeat_error_limit: 1_000,
        retry_interval_ms: 5,
        ..Default::default()
    }
}

async fn open(store: &Arc<MemoryStore>) -> Connection {
    Connection::open("test", store.clone(), fast_config(), None)
        .await
        .unwrap()
}

/// Poll `condition` until it holds, failing after two seconds
async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..400 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met in time");
}

/// Consumer that parks every delivery in a shared vector
fn collector(sink: Arc<Mutex<Vec<Delivery>>>) -> impl mqr::Consumer {
    ConsumerFn::new(move |delivery: Delivery| {
        let sink = sink.clone();
        async move {
            sink.lock().await.push(delivery);
        }
    })
}

#[tokio::test]
async fn test_publish_then_consume_in_order() {
    let store = Arc::new(MemoryStore::new());
    let connection = open(&store).await;
    let queue = connection.open_queue("things").await.unwrap();

    for i in 0..5 {
        queue.publish(format!("job-{}", i)).await.unwrap();
    }
    assert_eq!(queue.ready_count().await.unwrap(), 5);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    queue.start_consuming(10, POLL).await.unwrap();
    queue
        .add_consumer(
            "worker",
            ConsumerFn::new(move |delivery: Delivery| {
                let sink = sink.clone();
                async move {
                    sink.lock().await.push(delivery.payload().to_string());
                    delivery.ack().await.unwrap();
                }
            }),
        )
        .await
        .unwrap();

    wait_until(|| async { seen.lock().await.len() == 5 }).await;

    let expected: Vec<String> = (0..5).map(|i| format!("job-{}", i)).collect();
    assert_eq!(*seen.lock().await, expected);
    assert_eq!(queue.ready_count().await.unwrap(), 0);
    wait_until(|| async { queue.unacked_count().await.unwrap() == 0 }).await;
}

#[tokio::test]
async fn test_ack_batch_and_reject_scenario() {
    let store = Arc::new(MemoryStore::new());
    let connection = open(&store).await;
    let queue = connection.open_queue("things").await.unwrap();

    for payload in ["a", "b", "c"] {
        queue.publish(payload).await.unwrap();
    }

    let received = Arc::new(Mutex::new(Vec::new()));
    queue.start_consuming(10, POLL).await.unwrap();
    queue
        .add_consumer("worker", collector(received.clone()))
        .await
        .unwrap();

    wait_until(|| async { received.lock().await.len() == 3 }).await;
    assert_eq!(queue.unacked_count().await.unwrap(), 3);

    let deliveries = std::mem::take(&mut *received.lock().await);
    let (acked, rejected): (Vec<Delivery>, Vec<Delivery>) =
        deliveries.into_iter().partition(|d| d.payload() != "c");

    let batch = Deliveries::from(acked);
    assert_eq!(batch.payloads(), vec!["a", "b"]);
    assert!(batch.ack().await.is_empty());
    assert_ok!(rejected[0].reject().await);

    assert_eq!(queue.ready_count().await.unwrap(), 0);
    assert_eq!(queue.rejected_count().await.unwrap(), 1);
    assert_eq!(queue.unacked_count().await.unwrap(), 0);
    assert_eq!(store.list(&keys::queue_rejected("things")).await, vec!["c"]);

    // Terminated deliveries stay terminated
    assert!(assert_err!(batch.into_inner()[0].ack().await).is_not_found());
}

#[tokio::test]
async fn test_consumer_acks_and_rejects_in_callback() {
    let store = Arc::new(MemoryStore::new());
    let connection = open(&store).await;
    let queue = connection.open_queue("things").await.unwrap();

    for payload in ["a", "b", "c"] {
        queue.publish(payload).await.unwrap();
    }

    let handled = Arc::new(AtomicUsize::new(0));
    queue.start_consuming(10, POLL).await.unwrap();
    {
        let handled = handled.clone();
        queue
            .add_consumer(
                "worker",
                ConsumerFn::new(move |delivery: Delivery| {
                    let handled = handled.clone();
                    async move {
                        if delivery.payload() == "c" {
                            delivery.reject().await.unwrap();
                        } else {
                            delivery.ack().await.unwrap();
                        }
                        handled.fetch_add(1, Ordering::SeqCst);
                    }
                }),
            )
            .await
            .unwrap();
    }

    wait_until(|| async { handled.load(Ordering::SeqCst) == 3 }).await;

    assert!(store.list(&keys::queue_ready("things")).await.is_empty());
    assert_eq!(store.list(&keys::queue_rejected("things")).await, vec!["c"]);
    assert!(store
        .list(&keys::connection_queue_unacked(connection.name(), "things"))
        .await
        .is_empty());
}

#[tokio::test]
async fn test_consuming_state_errors() {
    let store = Arc::new(MemoryStore::new());
    let connection = open(&store).await;
    let queue = connection.open_queue("things").await.unwrap();

    let result = queue
        .add_consumer("early", ConsumerFn::new(|_delivery: Delivery| async {}))
        .await;
    assert!(matches!(result, Err(QueueError::NotConsuming)));

    queue.start_consuming_with(&ConsumeConfig::default()).await.unwrap();
    let result = queue.start_consuming(10, POLL).await;
    assert!(matches!(result, Err(QueueError::AlreadyConsuming)));

    // Clones share the consuming state
    let clone = queue.clone();
    let result = clone.start_consuming(10, POLL).await;
    assert!(matches!(result, Err(QueueError::AlreadyConsuming)));
    assert_ok!(
        clone
            .add_consumer("late", ConsumerFn::new(|_delivery: Delivery| async {}))
            .await
    );
}

#[tokio::test]
async fn test_add_consumer_after_stop_is_refused() {
    let store = Arc::new(MemoryStore::new());
    let connection = open(&store).await;
    let stopped = connection.open_queue("stopped").await.unwrap();
    let other = connection.open_queue("other").await.unwrap();

    stopped.start_consuming(10, POLL).await.unwrap();
    other.start_consuming(10, POLL).await.unwrap();

    assert_ok!(stopped.stop_consuming().await.await);
    let result = stopped
        .add_consumer("late", ConsumerFn::new(|_delivery: Delivery| async {}))
        .await;
    assert!(matches!(result, Err(QueueError::ConsumingStopped)));

    assert_ok!(connection.stop_all_consuming().await);
    let result = other
        .add_consumer("late", ConsumerFn::new(|_delivery: Delivery| async {}))
        .await;
    assert!(matches!(result, Err(QueueError::ConsumingStopped)));

    // No phantom consumers are registered
    for queue in ["stopped", "other"] {
        assert!(store
            .smembers(&keys::connection_queue_consumers(connection.name(), queue))
            .await
            .unwrap()
            .is_empty());
    }
}

#[tokio::test]
async fn test_consumer_names_are_registered() {
    let store = Arc::new(MemoryStore::new());
    let connection = open(&store).await;
    let queue = connection.open_queue("things").await.unwrap();

    queue.start_consuming(10, POLL).await.unwrap();
    let first = queue
        .add_consumer("worker", ConsumerFn::new(|_delivery: Delivery| async {}))
        .await
        .unwrap();
    let second = queue
        .add_consumer("worker", ConsumerFn::new(|_delivery: Delivery| async {}))
        .await
        .unwrap();

    assert!(first.starts_with("worker-"));
    assert_ne!(first, second);

    let mut registered = store
        .smembers(&keys::connection_queue_consumers(connection.name(), "things"))
        .await
        .unwrap();
    registered.sort();
    let mut expected = vec![first, second];
    expected.sort();
    assert_eq!(registered, expected);

    assert_eq!(
        store
            .smembers(&keys::connection_queues(connection.name()))
            .await
            .unwrap(),
        vec!["things"]
    );
}

#[tokio::test]
async fn test_each_consumer_handles_one_delivery_at_a_time() {
    let store = Arc::new(MemoryStore::new());
    let connection = open(&store).await;
    let queue = connection.open_queue("things").await.unwrap();

    for i in 0..12 {
        queue.publish(format!("job-{}", i)).await.unwrap();
    }

    let in_flight = Arc::new(AtomicUsize::new(0));
    let max_in_flight = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(AtomicUsize::new(0));

    queue.start_consuming(10, POLL).await.unwrap();
    for _ in 0..2 {
        let in_flight = in_flight.clone();
        let max_in_flight = max_in_flight.clone();
        let done = done.clone();
        queue
            .add_consumer(
                "worker",
                ConsumerFn::new(move |delivery: Delivery| {
                    let in_flight = in_flight.clone();
                    let max_in_flight = max_in_flight.clone();
                    let done = done.clone();
                    async move {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        max_in_flight.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        delivery.ack().await.unwrap();
                        done.fetch_add(1, Ordering::SeqCst);
                    }
                }),
            )
            .await
            .unwrap();
    }

    wait_until(|| async { done.load(Ordering::SeqCst) == 12 }).await;
    assert!(max_in_flight.load(Ordering::SeqCst) <= 2);
    assert_eq!(queue.unacked_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_prefetch_limit_bounds_checked_out_payloads() {
    let store = Arc::new(MemoryStore::new());
    let connection = open(&store).await;
    let queue = connection.open_queue("things").await.unwrap();

    for i in 0..20 {
        queue.publish(format!("job-{}", i)).await.unwrap();
    }

    // No consumer drains the buffer, so the poller stops once it is full
    queue.start_consuming(3, POLL).await.unwrap();
    wait_until(|| async { queue.unacked_count().await.unwrap() == 3 }).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(queue.unacked_count().await.unwrap(), 3);
    assert_eq!(queue.ready_count().await.unwrap(), 17);
}

#[tokio::test]
async fn test_push_moves_to_target_queue() {
    let store = Arc::new(MemoryStore::new());
    let connection = open(&store).await;
    let things = connection.open_queue("things").await.unwrap();
    let balls = connection.open_queue("balls").await.unwrap();
    things.set_push_queue(&balls).await;

    things.publish("a").await.unwrap();
    things.publish("b").await.unwrap();

    things.start_consuming(10, POLL).await.unwrap();
    things
        .add_consumer(
            "pusher",
            ConsumerFn::new(|delivery: Delivery| async move {
                delivery.push().await.unwrap();
            }),
        )
        .await
        .unwrap();

    wait_until(|| async { balls.ready_count().await.unwrap() == 2 }).await;
    assert_eq!(things.rejected_count().await.unwrap(), 0);
    wait_until(|| async { things.unacked_count().await.unwrap() == 0 }).await;
}

#[tokio::test]
async fn test_return_rejected_and_purge() {
    let store = Arc::new(MemoryStore::new());
    let connection = open(&store).await;
    let queue = connection.open_queue("things").await.unwrap();

    for payload in ["r1", "r2", "r3"] {
        store
            .lpush(&keys::queue_rejected("things"), payload)
            .await
            .unwrap();
    }

    assert_eq!(queue.return_rejected(2).await.unwrap(), 2);
    assert_eq!(store.list(&keys::queue_ready("things")).await, vec!["r2", "r1"]);
    assert_eq!(queue.rejected_count().await.unwrap(), 1);

    assert_eq!(queue.return_rejected(10).await.unwrap(), 1);
    assert_eq!(queue.return_rejected(10).await.unwrap(), 0);

    assert_eq!(queue.purge_ready().await.unwrap(), 3);
    assert_eq!(queue.ready_count().await.unwrap(), 0);
    assert_eq!(queue.purge_rejected().await.unwrap(), 0);
}

#[tokio::test]
async fn test_publish_bytes_requires_utf8() {
    let store = Arc::new(MemoryStore::new());
    let connection = open(&store).await;
    let queue = connection.open_queue("things").await.unwrap();

    queue.publish_bytes("héllo".as_bytes()).await.unwrap();
    let result = queue.publish_bytes(&[0xff, 0xfe]).await;

    assert!(matches!(result, Err(QueueError::InvalidPayload(_))));
    assert_eq!(store.list(&keys::queue_ready("things")).await, vec!["héllo"]);
}

#[tokio::test]
async fn test_stop_all_consuming_waits_for_in_flight_consume() {
    let store = Arc::new(MemoryStore::new());
    let connection = open(&store).await;
    let queue = connection.open_queue("things").await.unwrap();

    queue.publish("slow").await.unwrap();
    queue.publish("never").await.unwrap();

    let started = Arc::new(Notify::new());
    let finished = Arc::new(AtomicBool::new(false));
    let handled = Arc::new(AtomicUsize::new(0));

    queue.start_consuming(1, POLL).await.unwrap();
    {
        let started = started.clone();
        let finished = finished.clone();
        let handled = handled.clone();
        queue
            .add_consumer(
                "slow",
                ConsumerFn::new(move |delivery: Delivery| {
                    let started = started.clone();
                    let finished = finished.clone();
                    let handled = handled.clone();
                    async move {
                        handled.fetch_add(1, Ordering::SeqCst);
                        started.notify_one();
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        delivery.ack().await.unwrap();
                        finished.store(true, Ordering::SeqCst);
                    }
                }),
            )
            .await
            .unwrap();
    }

    started.notified().await;
    assert_ok!(connection.stop_all_consuming().await);

    assert!(finished.load(Ordering::SeqCst));
    assert_eq!(handled.load(Ordering::SeqCst), 1);

    // A stopped connection does not start consuming again
    let other = connection.open_queue("other").await.unwrap();
    let result = other.start_consuming(1, POLL).await;
    assert!(matches!(result, Err(QueueError::ConsumingStopped)));
}

#[tokio::test]
async fn test_stop_consuming_single_queue() {
    let store = Arc::new(MemoryStore::new());
    let connection = open(&store).await;
    let stopped = connection.open_queue("stopped").await.unwrap();
    let running = connection.open_queue("running").await.unwrap();

    for queue in [&stopped, &running] {
        queue.start_consuming(10, POLL).await.unwrap();
        queue
            .add_consumer(
                "worker",
                ConsumerFn::new(|delivery: Delivery| async move {
                    delivery.ack().await.unwrap();
                }),
            )
            .await
            .unwrap();
    }

    assert_ok!(stopped.stop_consuming().await.await);

    stopped.publish("ignored").await.unwrap();
    running.publish("handled").await.unwrap();

    wait_until(|| async { running.ready_count().await.unwrap() == 0 }).await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(stopped.ready_count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_transient_failures_are_retried_and_reported() {
    let store = Arc::new(MemoryStore::new());
    let (errors_tx, mut errors_rx) = mpsc::channel(1_000);
    let connection = Connection::open("test", store.clone(), fast_config(), Some(errors_tx))
        .await
        .unwrap();
    let queue = connection.open_queue("things").await.unwrap();
    queue.publish("flaky").await.unwrap();

    let (received_tx, mut received_rx) = mpsc::channel(1);
    let (result_tx, mut result_rx) = mpsc::channel(1);
    let gate = Arc::new(Notify::new());

    queue.start_consuming(10, POLL).await.unwrap();
    {
        let gate = gate.clone();
        queue
            .add_consumer(
                "worker",
                ConsumerFn::new(move |delivery: Delivery| {
                    let gate = gate.clone();
                    let received_tx = received_tx.clone();
                    let result_tx = result_tx.clone();
                    async move {
                        let _ = received_tx.send(()).await;
                        gate.notified().await;
                        let _ = result_tx.send(delivery.ack().await).await;
                    }
                }),
            )
            .await
            .unwrap();
    }

    received_rx.recv().await.unwrap();
    store.set_unavailable(true);
    gate.notify_one();
    tokio::time::sleep(Duration::from_millis(50)).await;
    store.set_unavailable(false);

    assert_ok!(result_rx.recv().await.unwrap());
    assert_eq!(queue.unacked_count().await.unwrap(), 0);

    let mut delivery_counts = Vec::new();
    while let Ok(diagnostic) = errors_rx.try_recv() {
        if let Diagnostic::Delivery { payload, count, .. } = diagnostic {
            assert_eq!(payload, "flaky");
            delivery_counts.push(count);
        }
    }
    assert!(!delivery_counts.is_empty());
    assert_eq!(delivery_counts[0], 1);
    assert!(delivery_counts.windows(2).all(|w| w[1] == w[0] + 1));
}
