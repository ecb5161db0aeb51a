//! Metrics helper structs for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use crate::delivery::DeliveryState;

use super::{
    DELIVERIES_TOTAL, DELIVERY_OUTCOMES_TOTAL, PUBLISHED_TOTAL, RECOVERED_TOTAL,
    STORE_ERRORS_TOTAL,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording delivery lifecycle metrics
pub struct DeliveryMetrics;

impl DeliveryMetrics {
    pub fn record_published(queue: &str) {
        PUBLISHED_TOTAL.with_label_values(&[queue]).inc();
    }

    pub fn record_delivered(queue: &str) {
        DELIVERIES_TOTAL.with_label_values(&[queue]).inc();
    }

    pub fn record_outcome(state: DeliveryState) {
        DELIVERY_OUTCOMES_TOTAL
            .with_label_values(&[state.as_str()])
            .inc();
    }

    pub fn record_recovered(queue: &str, count: usize) {
        RECOVERED_TOTAL
            .with_label_values(&[queue])
            .inc_by(count as u64);
    }
}

/// Helper struct for recording store failures
pub struct StoreErrorMetrics;

impl StoreErrorMetrics {
    pub fn record(operation: &str) {
        STORE_ERRORS_TOTAL.with_label_values(&[operation]).inc();
    }
}
