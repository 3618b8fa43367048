use crate::models::{EnrichedEvent, MetricRow};
use crate::query::{Dialect, MetricQuery};
use crate::storage::EventStore;
use anyhow::{Context, Result};
use async_trait::async_trait;
use clickhouse::{insert::Insert, Client, Row};
use serde::{Deserialize, Serialize};

// ClickHouse table schema:
// CREATE TABLE events (
//     site_id String,
//     occurred_at UInt32,
//     ...
//     inserted_at DateTime DEFAULT now()
// ) ENGINE = MergeTree
// ORDER BY (site_id, occurred_at);
#[derive(Debug, Clone, Row, Serialize)]
struct EventRow {
    site_id: String,
    occurred_at: u32,
    event_type: String,
    identity: String,
    event: String,
    category: String,
    referrer: String,
    referrer_host: String,
    is_touch: bool,
    browser_name: String,
    os_name: String,
    device_type: String,
    country: String,
    region: String,
}

impl From<&EnrichedEvent> for EventRow {
    fn from(event: &EnrichedEvent) -> Self {
        Self {
            site_id: event.site_id.clone(),
            occurred_at: event.occurred_at,
            event_type: event.event_type.clone(),
            identity: event.identity.clone(),
            event: event.event.clone(),
            category: event.category.clone(),
            referrer: event.referrer.clone(),
            referrer_host: event.referrer_host.clone(),
            is_touch: event.is_touch_device,
            browser_name: event.browser_name.clone(),
            os_name: event.os_name.clone(),
            device_type: event.device_type.clone(),
            country: event.country.clone(),
            region: event.region_name.clone(),
        }
    }
}

#[derive(Debug, Row, Deserialize)]
struct MetricRecord {
    day: u32,
    value: String,
    hits: u64,
}

pub struct ClickHouseStorage {
    client: Client,
}

impl ClickHouseStorage {
    pub fn new(url: &str, user: &str, password: &str, database: &str) -> Self {
        let client = Client::default()
            .with_url(url)
            .with_user(user)
            .with_password(password)
            .with_database(database)
            .with_option("max_execution_time", "60");

        Self { client }
    }
}

#[async_trait]
impl EventStore for ClickHouseStorage {
    fn dialect(&self) -> Dialect {
        Dialect::ClickHouse
    }

    async fn init(&self) -> Result<()> {
        self.client
            .query(
                r#"
                CREATE TABLE IF NOT EXISTS events (
                    site_id String,
                    occurred_at UInt32,
                    event_type String,
                    identity String,
                    event String,
                    category String,
                    referrer String,
                    referrer_host String,
                    is_touch Bool,
                    browser_name String,
                    os_name String,
                    device_type String,
                    country String,
                    region String,
                    inserted_at DateTime DEFAULT now()
                )
                ENGINE = MergeTree
                ORDER BY (site_id, occurred_at)
                "#,
            )
            .execute()
            .await
            .context("failed to create events table")?;

        Ok(())
    }

    async fn insert_batch(&self, events: &[EnrichedEvent]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }

        let mut insert: Insert<EventRow> = self
            .client
            .insert("events")
            .await
            .context("failed to prepare batch")?;

        for event in events {
            insert
                .write(&EventRow::from(event))
                .await
                .context("failed to append to batch")?;
        }

        insert.end().await.context("failed to send batch")?;
        Ok(())
    }

    async fn query_metrics(&self, query: &MetricQuery) -> Result<Vec<MetricRow>> {
        let records = self
            .client
            .query(&query.sql)
            .param("site_id", &query.params.site_id)
            .param("start", query.params.start)
            .param("end", query.params.end)
            .param("extra", &query.params.extra)
            .fetch_all::<MetricRecord>()
            .await
            .context("stats query failed")?;

        Ok(records
            .into_iter()
            .map(|r| MetricRow {
                occurred_at: r.day,
                value: r.value,
                count: r.hits,
            })
            .collect())
    }
}
