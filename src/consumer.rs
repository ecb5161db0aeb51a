//! Consumer callback contract.

use std::future::Future;

use async_trait::async_trait;

use crate::delivery::Delivery;

/// Handles one delivery at a time.
///
/// Implementations must terminate each delivery with exactly one of
/// [`Delivery::ack`], [`Delivery::reject`] or [`Delivery::push`]. A delivery
/// left untouched stays in the connection's unacked list until the
/// connection is swept as dead.
#[async_trait]
pub trait Consumer: Send + Sync + 'static {
    async fn consume(&self, delivery: Delivery);
}

/// Adapter turning an async closure into a [`Consumer`].
///
/// ```rust,ignore
/// queue.add_consumer("mailer", ConsumerFn::new(|delivery: Delivery| async move {
///     let _ = delivery.ack().await;
/// })).await?;
/// ```
pub struct ConsumerFn<F>(F);

impl<F> ConsumerFn<F> {
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F, Fut> Consumer for ConsumerFn<F>
where
    F: Fn(Delivery) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn consume(&self, delivery: Delivery) {
        (self.0)(delivery).await
    }
}
