//! Store key schema.
//!
//! Every process of one deployment must agree on these names.

const PREFIX: &str = "mqr";

/// Set of connection names
pub fn connections() -> String {
    format!("{PREFIX}::connections")
}

/// Expiring liveness marker of a connection
pub fn connection_heartbeat(connection: &str) -> String {
    format!("{PREFIX}::connection::{connection}::heartbeat")
}

/// Set of queues consumed by a connection
pub fn connection_queues(connection: &str) -> String {
    format!("{PREFIX}::connection::{connection}::queues")
}

/// Set of consumer names of a connection on a queue
pub fn connection_queue_consumers(connection: &str, queue: &str) -> String {
    format!("{PREFIX}::connection::{connection}::queue::[{queue}]::consumers")
}

/// List of payloads a connection is currently processing from a queue
pub fn connection_queue_unacked(connection: &str, queue: &str) -> String {
    format!("{PREFIX}::connection::{connection}::queue::[{queue}]::unacked")
}

/// Set of all open queues
pub fn queues() -> String {
    format!("{PREFIX}::queues")
}

/// List of pending payloads; the right end is the oldest
pub fn queue_ready(queue: &str) -> String {
    format!("{PREFIX}::queue::[{queue}]::ready")
}

/// List of rejected payloads
pub fn queue_rejected(queue: &str) -> String {
    format!("{PREFIX}::queue::[{queue}]::rejected")
}
