//! Retry discipline shared by every store-interacting loop.
//!
//! Ack/Reject/Push and the poller all follow one shape: attempt the store
//! command; on failure count it, report a [`Diagnostic`] without blocking,
//! and either give up because consuming was cancelled or sleep a fixed
//! interval and try again. There is no retry limit.

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use crate::error::{Diagnostic, QueueError};
use crate::metrics::StoreErrorMetrics;
use crate::store::{StoreError, StoreResult};

/// Fixed-interval retry policy
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run `operation` until it succeeds or `cancel` fires after a failure.
    ///
    /// `diagnose` turns each failure and the consecutive-failure count into
    /// the diagnostic sent on the reporter. Returns
    /// [`QueueError::ConsumingStopped`] when cancelled.
    pub async fn run<T, F, Fut, D>(
        &self,
        cancel: &CancellationToken,
        reporter: &ErrorReporter,
        mut operation: F,
        mut diagnose: D,
    ) -> Result<T, QueueError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
        D: FnMut(StoreError, u32) -> Diagnostic,
    {
        let mut failures = 0u32;

        loop {
            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            failures += 1;
            reporter.report(diagnose(error, failures));

            if cancel.is_cancelled() {
                return Err(QueueError::ConsumingStopped);
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(QueueError::ConsumingStopped),
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}

/// Best-effort sender of diagnostics.
///
/// Wraps the connection's bounded error channel. A full or closed channel
/// drops the report; the producing operation never waits.
#[derive(Debug, Clone, Default)]
pub struct ErrorReporter {
    sender: Option<mpsc::Sender<Diagnostic>>,
}

impl ErrorReporter {
    pub fn new(sender: Option<mpsc::Sender<Diagnostic>>) -> Self {
        Self { sender }
    }

    pub fn report(&self, diagnostic: Diagnostic) {
        StoreErrorMetrics::record(diagnostic.operation());
        tracing::warn!(
            operation = diagnostic.operation(),
            count = diagnostic.count(),
            error = %diagnostic,
            "Store operation failed"
        );

        let Some(sender) = &self.sender else {
            return;
        };

        match sender.try_send(diagnostic) {
            Ok(()) => {}
            Err(TrySendError::Full(dropped)) => {
                tracing::debug!(
                    operation = dropped.operation(),
                    "Error channel full, dropping diagnostic"
                );
            }
            Err(TrySendError::Closed(_)) => {
                tracing::trace!("Error channel closed, dropping diagnostic");
            }
        }
    }
}
