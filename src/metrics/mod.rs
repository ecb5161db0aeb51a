//! Prometheus metrics for the queue engine.
//!
//! - Publish and delivery counters per queue
//! - Terminal delivery outcomes (acked, rejected, pushed)
//! - Payloads recovered from dead connections
//! - Transient store failures per operation

mod helpers;

pub use helpers::{encode_metrics, DeliveryMetrics, StoreErrorMetrics};

use lazy_static::lazy_static;
use prometheus::{register_int_counter_vec, IntCounterVec};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "mqr";

lazy_static! {
    /// Payloads published to a ready list
    pub static ref PUBLISHED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_published_total", METRIC_PREFIX),
        "Total payloads published",
        &["queue"]
    ).unwrap();

    /// Payloads moved from a ready list into an unacked list
    pub static ref DELIVERIES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_deliveries_total", METRIC_PREFIX),
        "Total payloads handed to consumers",
        &["queue"]
    ).unwrap();

    /// Terminal delivery outcomes
    pub static ref DELIVERY_OUTCOMES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_delivery_outcomes_total", METRIC_PREFIX),
        "Total deliveries by terminal outcome",
        &["outcome"]
    ).unwrap();

    /// Payloads returned to a ready list by the liveness sweep
    pub static ref RECOVERED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_recovered_total", METRIC_PREFIX),
        "Total unacked payloads recovered from dead connections",
        &["queue"]
    ).unwrap();

    /// Store failures absorbed by retry loops
    pub static ref STORE_ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_store_errors_total", METRIC_PREFIX),
        "Total transient store errors by operation",
        &["operation"]
    ).unwrap();
}
