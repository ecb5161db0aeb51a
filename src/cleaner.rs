//! Liveness sweep.
//!
//! A connection whose heartbeat key has expired is considered dead. Its
//! unacked payloads are moved back onto the ready lists of their queues and
//! its bookkeeping keys are removed. Every step is an idempotent store
//! command, so several sweepers may run against the same store at once.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::try_join_all;

use crate::error::Result;
use crate::keys;
use crate::metrics::DeliveryMetrics;
use crate::store::Store;

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Names of the connections removed
    pub cleaned_connections: Vec<String>,
    /// Payloads returned to each queue's ready list
    pub returned: BTreeMap<String, usize>,
}

impl SweepReport {
    pub fn total_returned(&self) -> usize {
        self.returned.values().sum()
    }

    fn merge(&mut self, other: SweepReport) {
        self.cleaned_connections.extend(other.cleaned_connections);
        for (queue, count) in other.returned {
            *self.returned.entry(queue).or_insert(0) += count;
        }
    }
}

#[derive(Clone)]
pub struct Cleaner {
    store: Arc<dyn Store>,
}

impl Cleaner {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Clean every registered connection whose heartbeat is gone.
    pub async fn clean(&self) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        let connections = self.store.smembers(&keys::connections()).await?;

        // Probe every heartbeat concurrently
        let alive = try_join_all(connections.iter().map(|connection| {
            let key = keys::connection_heartbeat(connection);
            let store = self.store.clone();
            async move { store.exists(&key).await }
        }))
        .await?;

        for (connection, alive) in connections.iter().zip(alive) {
            if alive {
                continue;
            }

            report.merge(self.clean_connection(connection).await?);
        }

        if !report.cleaned_connections.is_empty() {
            tracing::info!(
                connections = report.cleaned_connections.len(),
                returned = report.total_returned(),
                "Cleaned dead connections"
            );
        }

        Ok(report)
    }

    /// Return the unacked payloads of `connection` and drop its keys,
    /// regardless of its heartbeat.
    pub async fn clean_connection(&self, connection: &str) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        let queues_key = keys::connection_queues(connection);

        for queue in self.store.smembers(&queues_key).await? {
            let returned = self.return_unacked(connection, &queue).await?;
            if returned > 0 {
                DeliveryMetrics::record_recovered(&queue, returned);
                report.returned.insert(queue.clone(), returned);
            }

            self.store
                .del(&keys::connection_queue_consumers(connection, &queue))
                .await?;
            self.store
                .del(&keys::connection_queue_unacked(connection, &queue))
                .await?;
        }

        self.store.del(&queues_key).await?;
        self.store.srem(&keys::connections(), connection).await?;
        report.cleaned_connections.push(connection.to_string());

        tracing::debug!(
            connection = %connection,
            returned = report.total_returned(),
            "Cleaned connection"
        );

        Ok(report)
    }

    /// Move unacked payloads back one at a time, oldest first.
    async fn return_unacked(&self, connection: &str, queue: &str) -> Result<usize> {
        let unacked_key = keys::connection_queue_unacked(connection, queue);
        let ready_key = keys::queue_ready(queue);
        let mut returned = 0;

        while self
            .store
            .move_tail(&unacked_key, &ready_key)
            .await?
            .is_some()
        {
            returned += 1;
        }

        Ok(returned)
    }
}

impl std::fmt::Debug for Cleaner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cleaner").finish_non_exhaustive()
    }
}
