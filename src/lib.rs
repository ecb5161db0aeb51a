// Storage layer
pub mod keys;
pub mod store;

// Shared infrastructure
pub mod config;
pub mod error;
pub mod metrics;
pub mod retry;

// Queue engine
pub mod cleaner;
pub mod connection;
pub mod consumer;
pub mod delivery;
pub mod queue;

// Background tasks
pub mod tasks;

pub use cleaner::{Cleaner, SweepReport};
pub use config::{ConnectionConfig, Settings};
pub use connection::{Connection, ConnectionStats, QueueStats, Stats};
pub use consumer::{Consumer, ConsumerFn};
pub use delivery::{Deliveries, Delivery, DeliveryState};
pub use error::{Diagnostic, QueueError, Result};
pub use queue::Queue;
pub use store::{MemoryStore, RedisStore, Store, StoreError};
