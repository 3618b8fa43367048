use crate::models::{EnrichedEvent, MetricRow};
use crate::query::{Dialect, MetricQuery};
use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Placeholder dialect metric queries must be rendered in
    fn dialect(&self) -> Dialect;

    /// Initialize the storage (create the events table if missing)
    async fn init(&self) -> Result<()>;

    /// Append a batch of events. Rows must already carry their `occurred_at` date.
    ///
    /// Best effort: on failure part of the batch may have been written.
    async fn insert_batch(&self, events: &[EnrichedEvent]) -> Result<()>;

    /// Execute a metric query built for this store's dialect
    async fn query_metrics(&self, query: &MetricQuery) -> Result<Vec<MetricRow>>;
}
