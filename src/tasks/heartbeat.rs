use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::ConnectionConfig;
use crate::error::Diagnostic;
use crate::retry::ErrorReporter;
use crate::store::Store;

/// Value written to heartbeat keys
pub(crate) const HEARTBEAT_VALUE: &str = "1";

/// Background task that keeps a connection's heartbeat key alive
pub struct HeartbeatTask {
    store: Arc<dyn Store>,
    key: String,
    interval: Duration,
    ttl: Duration,
    error_limit: u32,
    reporter: ErrorReporter,
    /// Cancelled once `error_limit` consecutive refreshes failed
    consuming: CancellationToken,
    /// Also cancelled at the error limit, ending the task
    shutdown: CancellationToken,
}

impl HeartbeatTask {
    pub fn new(
        store: Arc<dyn Store>,
        key: String,
        config: &ConnectionConfig,
        reporter: ErrorReporter,
        consuming: CancellationToken,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            key,
            interval: config.heartbeat_interval(),
            ttl: config.heartbeat_ttl(),
            error_limit: config.heartbeat_error_limit,
            reporter,
            consuming,
            shutdown,
        }
    }

    /// Refresh the heartbeat every interval until shut down or until
    /// `error_limit` consecutive refreshes failed
    pub async fn run(self) {
        let mut timer = tokio::time::interval(self.interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        // Skip immediate first tick, the key was written on open
        timer.tick().await;

        tracing::debug!(
            key = %self.key,
            interval_ms = self.interval.as_millis() as u64,
            "Heartbeat task started"
        );

        let mut failures = 0u32;

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = timer.tick() => {
                    failures = self.beat(failures).await;
                }
            }
        }

        tracing::debug!(key = %self.key, "Heartbeat task stopped");
    }

    /// One refresh attempt. Returns the new consecutive-failure count.
    async fn beat(&self, failures: u32) -> u32 {
        let error = match self
            .store
            .set_with_expiry(&self.key, HEARTBEAT_VALUE, self.ttl)
            .await
        {
            Ok(()) => {
                if failures > 0 {
                    tracing::info!(key = %self.key, failures = failures, "Heartbeat recovered");
                }
                return 0;
            }
            Err(error) => error,
        };

        let failures = failures + 1;
        self.reporter.report(Diagnostic::Heartbeat {
            error,
            count: failures,
        });

        if failures >= self.error_limit {
            tracing::error!(
                key = %self.key,
                failures = failures,
                "Heartbeat error limit reached, stopping consumers and heartbeat"
            );
            // Let the key lapse so a peer's sweep recovers the unacked work
            self.consuming.cancel();
            self.shutdown.cancel();
        }

        failures
    }
}
