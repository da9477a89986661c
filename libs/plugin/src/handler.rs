use std::future::Future;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

/// Reacts to one bus message.
///
/// Any `Fn(u64, Bytes, DateTime<Utc>) -> impl Future<Output = anyhow::Result<()>>`
/// is a handler. Errors are logged by the subscription and do not stop it.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, id: u64, payload: Bytes, created: DateTime<Utc>) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(u64, Bytes, DateTime<Utc>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, id: u64, payload: Bytes, created: DateTime<Utc>) -> anyhow::Result<()> {
        (self)(id, payload, created).await
    }
}
