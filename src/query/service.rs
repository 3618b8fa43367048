use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error};

use crate::error::{TrackError, TrackResult};
use crate::models::{MetricRequest, MetricRow};
use crate::query::QueryBuilder;
use crate::storage::EventStore;

/// Runs metric requests against the event store.
#[derive(Clone)]
pub struct StatsService {
    store: Arc<dyn EventStore>,
    builder: QueryBuilder,
    timeout: Duration,
}

impl StatsService {
    pub fn new(store: Arc<dyn EventStore>, timeout: Duration) -> Self {
        let builder = QueryBuilder::new(store.dialect());
        Self {
            store,
            builder,
            timeout,
        }
    }

    pub async fn get_stats(&self, request: &MetricRequest) -> TrackResult<Vec<MetricRow>> {
        let query = self.builder.build(request)?;
        debug!(
            kind = %query.spec.kind,
            site_id = %query.params.site_id,
            start = query.params.start,
            end = query.params.end,
            "running stats query"
        );

        match tokio::time::timeout(self.timeout, self.store.query_metrics(&query)).await {
            Ok(Ok(rows)) => Ok(rows),
            Ok(Err(e)) => {
                error!(kind = %query.spec.kind, site_id = %query.params.site_id, "stats query failed: {e:#}");
                Err(TrackError::StorageFailure(e))
            }
            Err(_) => {
                error!(
                    kind = %query.spec.kind,
                    site_id = %query.params.site_id,
                    "stats query timed out after {:?}",
                    self.timeout
                );
                Err(TrackError::StorageFailure(anyhow::anyhow!(
                    "stats query timed out after {:?}",
                    self.timeout
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EnrichedEvent, MetricKind};
    use crate::query::{Dialect, MetricQuery};
    use async_trait::async_trait;

    struct SlowStore;

    #[async_trait]
    impl EventStore for SlowStore {
        fn dialect(&self) -> Dialect {
            Dialect::Sqlite
        }

        async fn init(&self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn insert_batch(&self, _events: &[EnrichedEvent]) -> anyhow::Result<()> {
            Ok(())
        }

        async fn query_metrics(&self, _query: &MetricQuery) -> anyhow::Result<Vec<MetricRow>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(vec![])
        }
    }

    struct FailingStore;

    #[async_trait]
    impl EventStore for FailingStore {
        fn dialect(&self) -> Dialect {
            Dialect::Postgres
        }

        async fn init(&self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn insert_batch(&self, _events: &[EnrichedEvent]) -> anyhow::Result<()> {
            Ok(())
        }

        async fn query_metrics(&self, _query: &MetricQuery) -> anyhow::Result<Vec<MetricRow>> {
            anyhow::bail!("connection reset")
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_timeout_is_storage_failure() {
        let service = StatsService::new(Arc::new(SlowStore), Duration::from_secs(15));
        let request = MetricRequest::new(MetricKind::Browsers, "site", 20240101, 20240102);

        let result = service.get_stats(&request).await;
        assert!(matches!(result, Err(TrackError::StorageFailure(_))));
    }

    #[tokio::test]
    async fn test_store_error_is_storage_failure() {
        let service = StatsService::new(Arc::new(FailingStore), Duration::from_secs(15));
        let request = MetricRequest::new(MetricKind::Country, "site", 20240101, 20240102);

        let result = service.get_stats(&request).await;
        assert!(matches!(result, Err(TrackError::StorageFailure(_))));
    }

    #[tokio::test]
    async fn test_invalid_request_never_reaches_store() {
        let service = StatsService::new(Arc::new(FailingStore), Duration::from_secs(15));
        let mut request = MetricRequest::new(MetricKind::Country, "site", 20240101, 20240102);
        request.what = 8;

        let result = service.get_stats(&request).await;
        assert!(matches!(result, Err(TrackError::InvalidArgument(_))));
    }
}
