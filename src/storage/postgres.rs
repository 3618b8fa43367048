use crate::models::{EnrichedEvent, MetricRow};
use crate::query::{Dialect, MetricQuery};
use crate::storage::{EventStore, SqlMetricRow};
use anyhow::Result;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;

pub struct PostgresStorage {
    pool: Arc<PgPool>,
}

impl PostgresStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

#[async_trait]
impl EventStore for PostgresStorage {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                site_id TEXT NOT NULL,
                occurred_at BIGINT NOT NULL,
                event_type TEXT NOT NULL,
                identity TEXT NOT NULL,
                event TEXT NOT NULL,
                category TEXT NOT NULL,
                referrer TEXT NOT NULL,
                referrer_host TEXT NOT NULL,
                is_touch BOOLEAN NOT NULL,
                browser_name TEXT NOT NULL,
                os_name TEXT NOT NULL,
                device_type TEXT NOT NULL,
                country TEXT NOT NULL,
                region TEXT NOT NULL,
                inserted_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
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
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
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
