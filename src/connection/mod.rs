//! Connections: the unit of liveness.
//!
//! A connection owns a heartbeat key in the store, the queues it consumes
//! from and one unacked list per queue. While the process is alive a
//! [`HeartbeatTask`] keeps the key from expiring; once it lapses, any
//! process running a liveness sweep returns the connection's unacked
//! payloads to their ready lists.

mod stats;

pub use stats::{ConnectionStats, QueueStats, Stats};

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use crate::cleaner::{Cleaner, SweepReport};
use crate::config::ConnectionConfig;
use crate::error::{Diagnostic, QueueError, Result};
use crate::keys;
use crate::queue::Queue;
use crate::retry::{ErrorReporter, RetryPolicy};
use crate::store::{RedisStore, Store};
use crate::tasks::{HeartbeatTask, SweepTask, HEARTBEAT_VALUE};

/// State shared by a connection and every queue, poller, consumer and
/// delivery created from it.
pub(crate) struct ConnectionContext {
    pub(crate) name: String,
    pub(crate) store: Arc<dyn Store>,
    pub(crate) reporter: ErrorReporter,
    pub(crate) retry: RetryPolicy,
    /// Cancelled by stop_all_consuming, close, or repeated heartbeat failures
    pub(crate) consuming: CancellationToken,
    /// Tracks every poller and consumer task
    pub(crate) tracker: TaskTracker,
}

/// Random suffix that keeps connection and consumer names unique.
pub(crate) fn random_token() -> String {
    Uuid::new_v4().simple().to_string().chars().take(6).collect()
}

/// A live connection to the queue store.
pub struct Connection {
    context: Arc<ConnectionContext>,
    config: ConnectionConfig,
    heartbeat_key: String,
    /// Parent of every other token of this connection
    lifetime: CancellationToken,
    heartbeat: CancellationToken,
    heartbeat_task: Mutex<Option<JoinHandle<()>>>,
    /// Tracks the heartbeat and sweeper tasks
    background: TaskTracker,
}

impl Connection {
    /// Open a connection named `{tag}-{token}` on `store`.
    ///
    /// The first heartbeat is written before the connection is registered,
    /// so a concurrent sweep never mistakes it for a dead one. Transient
    /// failures of later store operations are reported on `errors` when
    /// given.
    pub async fn open(
        tag: &str,
        store: Arc<dyn Store>,
        config: ConnectionConfig,
        errors: Option<mpsc::Sender<Diagnostic>>,
    ) -> Result<Self> {
        if config.heartbeat_interval_ms == 0 {
            return Err(QueueError::InvalidConfig(
                "heartbeat interval must be positive".to_string(),
            ));
        }
        if config.heartbeat_ttl_ms <= config.heartbeat_interval_ms {
            return Err(QueueError::InvalidConfig(format!(
                "heartbeat ttl ({} ms) must exceed the heartbeat interval ({} ms)",
                config.heartbeat_ttl_ms, config.heartbeat_interval_ms
            )));
        }

        let name = format!("{}-{}", tag, random_token());
        let heartbeat_key = keys::connection_heartbeat(&name);

        store
            .set_with_expiry(&heartbeat_key, HEARTBEAT_VALUE, config.heartbeat_ttl())
            .await?;
        store.sadd(&keys::connections(), &name).await?;

        let lifetime = CancellationToken::new();
        let heartbeat = lifetime.child_token();
        let reporter = ErrorReporter::new(errors);

        let context = Arc::new(ConnectionContext {
            name: name.clone(),
            store: store.clone(),
            reporter: reporter.clone(),
            retry: RetryPolicy::new(config.retry_interval()),
            consuming: lifetime.child_token(),
            tracker: TaskTracker::new(),
        });

        let background = TaskTracker::new();
        let task = HeartbeatTask::new(
            store,
            heartbeat_key.clone(),
            &config,
            reporter,
            context.consuming.clone(),
            heartbeat.clone(),
        );
        let heartbeat_task = background.spawn(task.run());

        tracing::info!(
            connection = %name,
            heartbeat_interval_ms = config.heartbeat_interval_ms,
            heartbeat_ttl_ms = config.heartbeat_ttl_ms,
            "Connection opened"
        );

        Ok(Self {
            context,
            config,
            heartbeat_key,
            lifetime,
            heartbeat,
            heartbeat_task: Mutex::new(Some(heartbeat_task)),
            background,
        })
    }

    /// Open a connection on a Redis store at `url`.
    pub async fn open_with_redis(
        tag: &str,
        url: &str,
        config: ConnectionConfig,
        errors: Option<mpsc::Sender<Diagnostic>>,
    ) -> Result<Self> {
        let store = RedisStore::new(url)?;
        store.ping().await?;
        Self::open(tag, Arc::new(store), config, errors).await
    }

    pub fn name(&self) -> &str {
        &self.context.name
    }

    pub fn store(&self) -> Arc<dyn Store> {
        self.context.store.clone()
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Open (declaring if needed) the queue `name`.
    pub async fn open_queue(&self, name: &str) -> Result<Queue> {
        self.context.store.sadd(&keys::queues(), name).await?;
        Ok(Queue::new(name, self.context.clone()))
    }

    /// Names of every queue ever opened in this store, sorted.
    pub async fn get_open_queues(&self) -> Result<Vec<String>> {
        let mut queues = self.context.store.smembers(&keys::queues()).await?;
        queues.sort();
        Ok(queues)
    }

    /// Read-only snapshot of list lengths and consumers for `queues`.
    pub async fn collect_stats(&self, queues: &[String]) -> Result<Stats> {
        stats::collect(self.context.store.as_ref(), queues).await
    }

    /// [`QueueError::NotFound`] when this connection's heartbeat key is gone.
    pub async fn check_heartbeat(&self) -> Result<()> {
        if self.context.store.exists(&self.heartbeat_key).await? {
            Ok(())
        } else {
            Err(QueueError::NotFound)
        }
    }

    /// Stop every poller and consumer of this connection.
    ///
    /// In-flight `consume` calls finish; the returned receiver resolves once
    /// they have.
    pub fn stop_all_consuming(&self) -> oneshot::Receiver<()> {
        let (done_tx, done_rx) = oneshot::channel();

        self.context.consuming.cancel();
        self.context.tracker.close();

        let tracker = self.context.tracker.clone();
        let name = self.context.name.clone();
        tokio::spawn(async move {
            tracker.wait().await;
            tracing::info!(connection = %name, "All consumers stopped");
            let _ = done_tx.send(());
        });

        done_rx
    }

    /// Stop refreshing the heartbeat and delete it, after which sweeps
    /// treat this connection as dead.
    pub async fn stop_heartbeat(&self) -> Result<()> {
        self.heartbeat.cancel();
        let task = self.heartbeat_task.lock().await.take();
        if let Some(task) = task {
            // The key must not be rewritten after it is deleted
            let _ = task.await;
        }
        self.context.store.del(&self.heartbeat_key).await?;

        tracing::info!(connection = %self.context.name, "Heartbeat stopped");
        Ok(())
    }

    /// Run a liveness sweep every `interval` until the connection closes.
    pub fn spawn_sweeper(&self, interval: std::time::Duration) {
        let task = SweepTask::new(
            Cleaner::new(self.context.store.clone()),
            interval,
            self.lifetime.child_token(),
        );
        self.background.spawn(task.run());
    }

    /// Cleaner bound to this connection's store.
    pub fn cleaner(&self) -> Cleaner {
        Cleaner::new(self.context.store.clone())
    }

    /// Gracefully close the connection.
    ///
    /// Waits for consumers to finish, stops the background tasks, then
    /// returns any payloads still unacked by this connection to their ready
    /// lists and removes its registrations.
    pub async fn close(&self) -> Result<SweepReport> {
        let _ = self.stop_all_consuming().await;

        self.lifetime.cancel();
        self.background.close();
        self.background.wait().await;

        self.context.store.del(&self.heartbeat_key).await?;
        let report = self.cleaner().clean_connection(&self.context.name).await?;

        tracing::info!(
            connection = %self.context.name,
            returned = report.total_returned(),
            "Connection closed"
        );

        Ok(report)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.lifetime.cancel();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.context.name)
            .finish()
    }
}
