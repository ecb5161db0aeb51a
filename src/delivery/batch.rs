//! Batch helper over a collection of deliveries.

use std::collections::HashMap;
use std::future::Future;

use crate::error::QueueError;

use super::Delivery;

/// An ordered collection of deliveries acted on together.
///
/// Each batch operation returns the errors keyed by position; members that
/// succeeded are absent, so an empty map means every member succeeded.
#[derive(Debug, Default)]
pub struct Deliveries(Vec<Delivery>);

impl Deliveries {
    pub fn new(deliveries: Vec<Delivery>) -> Self {
        Self(deliveries)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn payloads(&self) -> Vec<&str> {
        self.0.iter().map(Delivery::payload).collect()
    }

    pub fn into_inner(self) -> Vec<Delivery> {
        self.0
    }

    pub async fn ack(&self) -> HashMap<usize, QueueError> {
        self.each(|delivery| delivery.ack()).await
    }

    pub async fn reject(&self) -> HashMap<usize, QueueError> {
        self.each(|delivery| delivery.reject()).await
    }

    pub async fn push(&self) -> HashMap<usize, QueueError> {
        self.each(|delivery| delivery.push()).await
    }

    /// Apply `operation` to each member in order.
    async fn each<'a, F, Fut>(&'a self, mut operation: F) -> HashMap<usize, QueueError>
    where
        F: FnMut(&'a Delivery) -> Fut,
        Fut: Future<Output = Result<(), QueueError>> + 'a,
    {
        let mut errors = HashMap::new();

        for (index, delivery) in self.0.iter().enumerate() {
            if let Err(error) = operation(delivery).await {
                errors.insert(index, error);
            }
        }

        errors
    }
}

impl From<Vec<Delivery>> for Deliveries {
    fn from(deliveries: Vec<Delivery>) -> Self {
        Self(deliveries)
    }
}

impl FromIterator<Delivery> for Deliveries {
    fn from_iter<I: IntoIterator<Item = Delivery>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
