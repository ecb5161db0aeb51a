//! Background loops behind a consuming queue: the poller that checks
//! payloads out of the ready list and the per-consumer dispatch loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::consumer::Consumer;
use crate::delivery::{Delivery, DeliveryState};
use crate::error::Diagnostic;
use crate::metrics::DeliveryMetrics;

use super::Queue;

/// Move payloads from the ready list into the connection's unacked list
/// while the prefetch buffer has room.
pub(super) async fn poll(
    queue: Queue,
    sender: mpsc::Sender<Delivery>,
    poll_interval: Duration,
    token: CancellationToken,
) {
    let store = queue.context.store.clone();
    let ready_key = queue.ready_key.as_str();
    let unacked_key = queue.unacked_key.as_str();

    loop {
        // Wait for a free prefetch slot before checking anything out
        let permit = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            permit = sender.reserve() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let store = &store;
        let moved = queue
            .context
            .retry
            .run(
                &token,
                &queue.context.reporter,
                move || store.move_tail(ready_key, unacked_key),
                |error, count| Diagnostic::Consume {
                    queue: queue.name.clone(),
                    error,
                    count,
                },
            )
            .await;

        match moved {
            Ok(Some(payload)) => {
                DeliveryMetrics::record_delivered(&queue.name);
                tracing::trace!(
                    queue = %queue.name,
                    payload = %payload,
                    state = DeliveryState::Unacked.as_str(),
                    "Checked out payload"
                );
                permit.send(queue.delivery(payload, &token).await);
            }
            Ok(None) => {
                drop(permit);
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
            Err(_) => break,
        }
    }

    tracing::debug!(queue = %queue.name, "Poller stopped");
}

/// Feed deliveries to one consumer, strictly one at a time.
pub(super) async fn consume(
    queue_name: String,
    consumer_name: String,
    receiver: Arc<Mutex<mpsc::Receiver<Delivery>>>,
    consumer: Arc<dyn Consumer>,
    token: CancellationToken,
) {
    loop {
        let delivery = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            delivery = async { receiver.lock().await.recv().await } => match delivery {
                Some(delivery) => delivery,
                None => break,
            },
        };

        // Not raced against cancellation: an in-flight consume always finishes
        consumer.consume(delivery).await;
    }

    tracing::debug!(
        queue = %queue_name,
        consumer = %consumer_name,
        "Consumer stopped"
    );
}
