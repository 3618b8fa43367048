use crate::models::{EnrichedEvent, MetricRow};
use crate::query::{Dialect, MetricQuery};
use crate::storage::{EventStore, SqlMetricRow};
use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::sync::Arc;

pub struct SqliteStorage {
    pool: Arc<SqlitePool>,
}

impl SqliteStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

#[async_trait]
impl EventStore for SqliteStorage {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                site_id TEXT NOT NULL,
                occurred_at INTEGER NOT NULL,
                event_type TEXT NOT NULL,
                identity TEXT NOT NULL,
                event TEXT NOT NULL,
                category TEXT NOT NULL,
                referrer TEXT NOT NULL,
                referrer_host TEXT NOT NULL,
                is_touch INTEGER NOT NULL,
                browser_name TEXT NOT NULL,
                os_name TEXT NOT NULL,
                device_type TEXT NOT NULL,
                country TEXT NOT NULL,
                region TEXT NOT NULL,
                inserted_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_events_site_date ON events(site_id, occurred_at)",
        )
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn insert_batch(&self, events: &[EnrichedEvent]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for event in events {
            sqlx::query(
                r#"
                INSERT INTO events (
                    site_id, occurred_at, event_type, identity, event, category,
                    referrer, referrer_host, is_touch, browser_name, os_name,
                    device_type, country, region
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&event.site_id)
            .bind(i64::from(event.occurred_at))
            .bind(&event.event_type)
            .bind(&event.identity)
            .bind(&event.event)
            .bind(&event.category)
            .bind(&event.referrer)
            .bind(&event.referrer_host)
            .bind(event.is_touch_device)
            .bind(&event.browser_name)
            .bind(&event.os_name)
            .bind(&event.device_type)
            .bind(&event.country)
            .bind(&event.region_name)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    async fn query_metrics(&self, query: &MetricQuery) -> Result<Vec<MetricRow>> {
        let rows = sqlx::query_as::<_, SqlMetricRow>(&query.sql)
            .bind(&query.params.site_id)
            .bind(i64::from(query.params.start))
            .bind(i64::from(query.params.end))
            .bind(&query.params.extra)
            .fetch_all(self.pool.as_ref())
            .await?;

        rows.into_iter().map(MetricRow::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MetricKind, MetricRequest};
    use crate::query::QueryBuilder;

    async fn setup_sqlite() -> SqliteStorage {
        let storage = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
        storage.init().await.unwrap();
        storage
    }

    fn page_view(site_id: &str, path: &str, occurred_at: u32) -> EnrichedEvent {
        EnrichedEvent {
            site_id: site_id.to_string(),
            occurred_at,
            event_type: "page".to_string(),
            identity: "visitor".to_string(),
            event: path.to_string(),
            category: "Page views".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_init_is_idempotent() {
        let storage = setup_sqlite().await;
        storage.init().await.unwrap();
    }

    #[tokio::test]
    async fn test_insert_empty_batch_is_noop() {
        let storage = setup_sqlite().await;
        storage.insert_batch(&[]).await.unwrap();
    }

    #[tokio::test]
    async fn test_daily_rows_carry_their_date() {
        let storage = setup_sqlite().await;
        storage
            .insert_batch(&[
                page_view("s1", "/", 20240101),
                page_view("s1", "/", 20240101),
                page_view("s1", "/", 20240102),
            ])
            .await
            .unwrap();

        let request = MetricRequest::new(MetricKind::PageViews, "s1", 20240101, 20240102);
        let query = QueryBuilder::new(Dialect::Sqlite).build(&request).unwrap();
        let rows = storage.query_metrics(&query).await.unwrap();

        assert_eq!(
            rows,
            vec![
                MetricRow {
                    occurred_at: 20240101,
                    value: "/".to_string(),
                    count: 2
                },
                MetricRow {
                    occurred_at: 20240102,
                    value: "/".to_string(),
                    count: 1
                },
            ]
        );
    }
}
