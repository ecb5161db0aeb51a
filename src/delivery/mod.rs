//! A single payload checked out of a queue.
//!
//! While a [`Delivery`] is live its payload sits in the owning connection's
//! unacked list. Exactly one of [`Delivery::ack`], [`Delivery::reject`] or
//! [`Delivery::push`] should be called to terminate it; the terminal state is
//! only visible through list membership in the store.

mod batch;

pub use batch::Deliveries;

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::{Diagnostic, QueueError, Result};
use crate::metrics::DeliveryMetrics;
use crate::retry::{ErrorReporter, RetryPolicy};
use crate::store::Store;

/// Logical lifecycle state of a delivery, used for logging and metrics.
///
/// `Unacked` labels a payload as it is checked out; the other variants are
/// terminal outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    Unacked,
    Acked,
    Rejected,
    Pushed,
}

impl DeliveryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryState::Unacked => "unacked",
            DeliveryState::Acked => "acked",
            DeliveryState::Rejected => "rejected",
            DeliveryState::Pushed => "pushed",
        }
    }
}

/// A payload bound to the list keys that define its lifecycle.
pub struct Delivery {
    payload: String,
    unacked_key: String,
    rejected_key: String,
    push_key: Option<String>,
    store: Arc<dyn Store>,
    reporter: ErrorReporter,
    retry: RetryPolicy,
    /// Consuming token of the owning connection
    cancel: CancellationToken,
}

impl Delivery {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        payload: String,
        unacked_key: String,
        rejected_key: String,
        push_key: Option<String>,
        store: Arc<dyn Store>,
        reporter: ErrorReporter,
        retry: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            payload,
            unacked_key,
            rejected_key,
            push_key,
            store,
            reporter,
            retry,
            cancel,
        }
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Remove the payload from the unacked list.
    ///
    /// Returns [`QueueError::NotFound`] if nothing was removed, meaning the
    /// delivery was already terminated.
    pub async fn ack(&self) -> Result<()> {
        self.remove_unacked().await?;
        DeliveryMetrics::record_outcome(DeliveryState::Acked);
        Ok(())
    }

    /// Move the payload to the queue's rejected list.
    ///
    /// The result is that of the trailing ack, so a [`QueueError::NotFound`]
    /// is passed through unchanged.
    pub async fn reject(&self) -> Result<()> {
        self.move_to(&self.rejected_key, DeliveryState::Rejected)
            .await
    }

    /// Move the payload to the configured push target, or reject it when no
    /// push queue was set.
    pub async fn push(&self) -> Result<()> {
        match &self.push_key {
            Some(push_key) => self.move_to(push_key, DeliveryState::Pushed).await,
            None => self.reject().await,
        }
    }

    async fn move_to(&self, key: &str, outcome: DeliveryState) -> Result<()> {
        let store = &self.store;
        let payload = self.payload.as_str();

        self.retry
            .run(
                &self.cancel,
                &self.reporter,
                move || store.lpush(key, payload),
                |error, count| self.diagnostic(error, count),
            )
            .await?;

        self.remove_unacked().await?;
        DeliveryMetrics::record_outcome(outcome);

        tracing::debug!(
            payload = %self.payload,
            target = %key,
            outcome = outcome.as_str(),
            "Delivery moved"
        );

        Ok(())
    }

    async fn remove_unacked(&self) -> Result<()> {
        let store = &self.store;
        let key = self.unacked_key.as_str();
        let payload = self.payload.as_str();

        let removed = self
            .retry
            .run(
                &self.cancel,
                &self.reporter,
                move || store.lrem(key, 1, payload),
                |error, count| self.diagnostic(error, count),
            )
            .await?;

        if removed == 0 {
            return Err(QueueError::NotFound);
        }

        Ok(())
    }

    fn diagnostic(&self, error: crate::store::StoreError, count: u32) -> Diagnostic {
        Diagnostic::Delivery {
            payload: self.payload.clone(),
            unacked_key: self.unacked_key.clone(),
            error,
            count,
        }
    }
}

impl fmt::Display for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} {}]", self.payload, self.unacked_key)
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("payload", &self.payload)
            .field("unacked_key", &self.unacked_key)
            .field("rejected_key", &self.rejected_key)
            .field("push_key", &self.push_key)
            .finish()
    }
}
