use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::cleaner::Cleaner;

/// Background task that periodically runs the liveness sweep
pub struct SweepTask {
    cleaner: Cleaner,
    interval: Duration,
    shutdown: CancellationToken,
}

impl SweepTask {
    pub fn new(cleaner: Cleaner, interval: Duration, shutdown: CancellationToken) -> Self {
        Self {
            cleaner,
            interval,
            shutdown,
        }
    }

    /// Sweep once immediately, then every interval until shut down
    pub async fn run(self) {
        let mut timer = tokio::time::interval(self.interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(
            interval_ms = self.interval.as_millis() as u64,
            "Sweep task started"
        );

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = timer.tick() => {
                    if let Err(e) = self.cleaner.clean().await {
                        tracing::warn!(error = %e, "Liveness sweep failed");
                    }
                }
            }
        }

        tracing::info!("Sweep task stopped");
    }
}
