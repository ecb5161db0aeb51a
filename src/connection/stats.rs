//! Read-only snapshot of queue and connection state.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::keys;
use crate::store::Store;

/// Stats of one connection for one queue
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionStats {
    /// Whether the connection's heartbeat key exists
    pub active: bool,
    pub unacked_count: usize,
    pub consumers: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub ready_count: usize,
    pub rejected_count: usize,
    /// Connections that consume this queue, by name
    pub connections: BTreeMap<String, ConnectionStats>,
}

impl QueueStats {
    pub fn unacked_count(&self) -> usize {
        self.connections.values().map(|c| c.unacked_count).sum()
    }

    pub fn consumer_count(&self) -> usize {
        self.connections.values().map(|c| c.consumers.len()).sum()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub collected_at: DateTime<Utc>,
    pub queues: BTreeMap<String, QueueStats>,
}

impl Stats {
    pub fn queue(&self, name: &str) -> Option<&QueueStats> {
        self.queues.get(name)
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "stats collected at {}", self.collected_at.to_rfc3339())?;

        for (name, queue) in &self.queues {
            writeln!(
                f,
                "queue {}: ready {} rejected {} unacked {} consumers {}",
                name,
                queue.ready_count,
                queue.rejected_count,
                queue.unacked_count(),
                queue.consumer_count()
            )?;

            for (connection, stats) in &queue.connections {
                let status = if stats.active { "active" } else { "inactive" };
                writeln!(
                    f,
                    "  connection {} ({}): unacked {} consumers [{}]",
                    connection,
                    status,
                    stats.unacked_count,
                    stats.consumers.join(", ")
                )?;
            }
        }

        Ok(())
    }
}

pub(super) async fn collect(store: &dyn Store, queues: &[String]) -> Result<Stats> {
    let mut connections = store.smembers(&keys::connections()).await?;
    connections.sort();

    // Queue sets and liveness of every registered connection
    let mut registered = Vec::with_capacity(connections.len());
    for connection in connections {
        let active = store.exists(&keys::connection_heartbeat(&connection)).await?;
        let consumed = store.smembers(&keys::connection_queues(&connection)).await?;
        registered.push((connection, active, consumed));
    }

    let mut stats = BTreeMap::new();
    for queue in queues {
        let mut queue_stats = QueueStats {
            ready_count: store.llen(&keys::queue_ready(queue)).await?,
            rejected_count: store.llen(&keys::queue_rejected(queue)).await?,
            connections: BTreeMap::new(),
        };

        for (connection, active, consumed) in &registered {
            if !consumed.iter().any(|name| name == queue) {
                continue;
            }

            let mut consumers = store
                .smembers(&keys::connection_queue_consumers(connection, queue))
                .await?;
            consumers.sort();

            queue_stats.connections.insert(
                connection.clone(),
                ConnectionStats {
                    active: *active,
                    unacked_count: store
                        .llen(&keys::connection_queue_unacked(connection, queue))
                        .await?,
                    consumers,
                },
            );
        }

        stats.insert(queue.clone(), queue_stats);
    }

    Ok(Stats {
        collected_at: Utc::now(),
        queues: stats,
    })
}
