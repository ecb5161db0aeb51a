//! Error types returned by the queue engine and the diagnostics emitted by
//! its retry loops.

use std::string::FromUtf8Error;

use thiserror::Error;

use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum QueueError {
    /// The connection, queue or delivery was already removed. For deliveries
    /// this means someone else already acted on the payload.
    #[error("entity not found")]
    NotFound,

    #[error("must not call start_consuming() multiple times")]
    AlreadyConsuming,

    #[error("must call start_consuming() before adding consumers")]
    NotConsuming,

    #[error("consuming stopped")]
    ConsumingStopped,

    #[error("Invalid payload: {0}")]
    InvalidPayload(#[from] FromUtf8Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl QueueError {
    /// Whether this error only says that the target was already gone.
    pub fn is_not_found(&self) -> bool {
        matches!(self, QueueError::NotFound)
    }
}

pub type Result<T> = std::result::Result<T, QueueError>;

/// A transient store failure observed inside a retry loop.
///
/// These never surface as return values while the connection is alive. They
/// are sent best-effort on the connection's error channel so that an
/// observer can log or alert on them.
#[derive(Error, Debug)]
pub enum Diagnostic {
    #[error("mqr.HeartbeatError ({count}): {error}")]
    Heartbeat {
        #[source]
        error: StoreError,
        /// Consecutive failures
        count: u32,
    },

    #[error("mqr.ConsumeError ({count}) on queue {queue}: {error}")]
    Consume {
        queue: String,
        #[source]
        error: StoreError,
        count: u32,
    },

    #[error("mqr.DeliveryError ({count}) for [{payload} {unacked_key}]: {error}")]
    Delivery {
        payload: String,
        unacked_key: String,
        #[source]
        error: StoreError,
        count: u32,
    },
}

impl Diagnostic {
    /// Number of consecutive failures this report closes.
    pub fn count(&self) -> u32 {
        match self {
            Diagnostic::Heartbeat { count, .. }
            | Diagnostic::Consume { count, .. }
            | Diagnostic::Delivery { count, .. } => *count,
        }
    }

    /// Short label of the operation that failed, used for metrics.
    pub fn operation(&self) -> &'static str {
        match self {
            Diagnostic::Heartbeat { .. } => "heartbeat",
            Diagnostic::Consume { .. } => "consume",
            Diagnostic::Delivery { .. } => "delivery",
        }
    }
}
