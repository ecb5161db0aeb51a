//! Named work queues.
//!
//! A queue owns a ready list and a rejected list in the store. Producers
//! publish onto the ready list; a consuming connection runs one poller per
//! queue that checks payloads out into the connection's unacked list and
//! hands them to the registered consumers through a bounded prefetch buffer.
//!
//! # Example
//!
//! ```rust,ignore
//! let queue = connection.open_queue("emails").await?;
//! queue.publish("hello").await?;
//!
//! queue.start_consuming(10, Duration::from_millis(100)).await?;
//! queue.add_consumer("mailer", ConsumerFn::new(|delivery: Delivery| async move {
//!     let _ = delivery.ack().await;
//! })).await?;
//! ```

mod poller;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::ConsumeConfig;
use crate::connection::{random_token, ConnectionContext};
use crate::consumer::Consumer;
use crate::delivery::Delivery;
use crate::error::{QueueError, Result};
use crate::keys;
use crate::metrics::DeliveryMetrics;

/// Consuming state of a queue, set once by `start_consuming`
struct ConsumingState {
    /// Prefetch buffer shared by every consumer of this queue
    receiver: Arc<Mutex<mpsc::Receiver<Delivery>>>,
    /// Child of the connection's consuming token
    token: CancellationToken,
    tracker: TaskTracker,
}

/// Handle to a named queue, bound to the connection that opened it.
///
/// Cloning is cheap; clones share the push target and consuming state.
#[derive(Clone)]
pub struct Queue {
    name: String,
    ready_key: String,
    rejected_key: String,
    unacked_key: String,
    consumers_key: String,
    context: Arc<ConnectionContext>,
    push_key: Arc<RwLock<Option<String>>>,
    consuming: Arc<Mutex<Option<ConsumingState>>>,
}

impl Queue {
    pub(crate) fn new(name: &str, context: Arc<ConnectionContext>) -> Self {
        Self {
            name: name.to_string(),
            ready_key: keys::queue_ready(name),
            rejected_key: keys::queue_rejected(name),
            unacked_key: keys::connection_queue_unacked(&context.name, name),
            consumers_key: keys::connection_queue_consumers(&context.name, name),
            context,
            push_key: Arc::new(RwLock::new(None)),
            consuming: Arc::new(Mutex::new(None)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append a payload to the ready list.
    pub async fn publish(&self, payload: impl AsRef<str>) -> Result<()> {
        self.context
            .store
            .lpush(&self.ready_key, payload.as_ref())
            .await?;
        DeliveryMetrics::record_published(&self.name);
        Ok(())
    }

    /// Append a UTF-8 payload to the ready list.
    pub async fn publish_bytes(&self, payload: &[u8]) -> Result<()> {
        let payload = String::from_utf8(payload.to_vec())?;
        self.publish(payload).await
    }

    /// Route pushed deliveries of this queue to the ready list of `target`.
    ///
    /// Only affects deliveries created after the call.
    pub async fn set_push_queue(&self, target: &Queue) {
        let mut push_key = self.push_key.write().await;
        *push_key = Some(target.ready_key.clone());
    }

    /// Start the poller for this queue.
    ///
    /// At most `prefetch_limit` payloads are checked out but not yet handed
    /// to a consumer. An empty ready list is polled again after
    /// `poll_interval`.
    pub async fn start_consuming(&self, prefetch_limit: usize, poll_interval: Duration) -> Result<()> {
        let mut consuming = self.consuming.lock().await;
        if consuming.is_some() {
            return Err(QueueError::AlreadyConsuming);
        }
        if self.context.consuming.is_cancelled() {
            return Err(QueueError::ConsumingStopped);
        }

        self.context
            .store
            .sadd(&keys::connection_queues(&self.context.name), &self.name)
            .await?;

        let (sender, receiver) = mpsc::channel(prefetch_limit.max(1));
        let token = self.context.consuming.child_token();
        let tracker = TaskTracker::new();

        self.spawn(
            &tracker,
            poller::poll(self.clone(), sender, poll_interval, token.clone()),
        );

        *consuming = Some(ConsumingState {
            receiver: Arc::new(Mutex::new(receiver)),
            token,
            tracker,
        });

        tracing::info!(
            queue = %self.name,
            connection = %self.context.name,
            prefetch_limit = prefetch_limit,
            poll_interval_ms = poll_interval.as_millis() as u64,
            "Queue started consuming"
        );

        Ok(())
    }

    /// [`Queue::start_consuming`] with limits taken from `config`.
    pub async fn start_consuming_with(&self, config: &ConsumeConfig) -> Result<()> {
        self.start_consuming(config.prefetch_limit, config.poll_interval())
            .await
    }

    /// Register a consumer and start feeding it deliveries one at a time.
    ///
    /// Returns the registered consumer name (`{tag}-{token}`), or
    /// [`QueueError::ConsumingStopped`] once the queue or its connection
    /// stopped consuming.
    pub async fn add_consumer<C: Consumer>(&self, tag: &str, consumer: C) -> Result<String> {
        let consuming = self.consuming.lock().await;
        let state = consuming.as_ref().ok_or(QueueError::NotConsuming)?;
        if state.token.is_cancelled() {
            return Err(QueueError::ConsumingStopped);
        }

        let name = format!("{}-{}", tag, random_token());
        self.context.store.sadd(&self.consumers_key, &name).await?;

        self.spawn(
            &state.tracker,
            poller::consume(
                self.name.clone(),
                name.clone(),
                state.receiver.clone(),
                Arc::new(consumer),
                state.token.clone(),
            ),
        );

        tracing::info!(
            queue = %self.name,
            consumer = %name,
            "Consumer added"
        );

        Ok(name)
    }

    /// Stop the poller and consumers of this queue.
    ///
    /// In-flight `consume` calls finish; the returned receiver resolves once
    /// they have. Payloads left in the prefetch buffer stay in the unacked
    /// list until the connection is cleaned.
    pub async fn stop_consuming(&self) -> oneshot::Receiver<()> {
        let (done_tx, done_rx) = oneshot::channel();

        let consuming = self.consuming.lock().await;
        let Some(state) = consuming.as_ref() else {
            let _ = done_tx.send(());
            return done_rx;
        };

        state.token.cancel();
        state.tracker.close();

        let tracker = state.tracker.clone();
        tokio::spawn(async move {
            tracker.wait().await;
            let _ = done_tx.send(());
        });

        done_rx
    }

    pub async fn ready_count(&self) -> Result<usize> {
        Ok(self.context.store.llen(&self.ready_key).await?)
    }

    pub async fn rejected_count(&self) -> Result<usize> {
        Ok(self.context.store.llen(&self.rejected_key).await?)
    }

    /// Payloads this connection has checked out of the queue.
    pub async fn unacked_count(&self) -> Result<usize> {
        Ok(self.context.store.llen(&self.unacked_key).await?)
    }

    /// Drop every ready payload. Returns how many were removed.
    pub async fn purge_ready(&self) -> Result<usize> {
        self.purge(&self.ready_key).await
    }

    /// Drop every rejected payload. Returns how many were removed.
    pub async fn purge_rejected(&self) -> Result<usize> {
        self.purge(&self.rejected_key).await
    }

    async fn purge(&self, key: &str) -> Result<usize> {
        let count = self.context.store.llen(key).await?;
        self.context.store.del(key).await?;

        tracing::info!(queue = %self.name, key = %key, count = count, "Purged list");
        Ok(count)
    }

    /// Move up to `max` rejected payloads back to the ready list, oldest
    /// first. Returns how many were moved.
    pub async fn return_rejected(&self, max: usize) -> Result<usize> {
        let mut returned = 0;

        while returned < max {
            let moved = self
                .context
                .store
                .move_tail(&self.rejected_key, &self.ready_key)
                .await?;
            if moved.is_none() {
                break;
            }
            returned += 1;
        }

        if returned > 0 {
            tracing::info!(queue = %self.name, returned = returned, "Returned rejected payloads");
        }

        Ok(returned)
    }

    async fn delivery(&self, payload: String, token: &CancellationToken) -> Delivery {
        let push_key = self.push_key.read().await.clone();

        Delivery::new(
            payload,
            self.unacked_key.clone(),
            self.rejected_key.clone(),
            push_key,
            self.context.store.clone(),
            self.context.reporter.clone(),
            self.context.retry,
            token.clone(),
        )
    }

    /// Spawn a task tracked by both the queue and its connection.
    fn spawn<F>(&self, tracker: &TaskTracker, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.context.tracker.spawn(tracker.track_future(task));
    }
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("name", &self.name)
            .field("connection", &self.context.name)
            .finish()
    }
}
