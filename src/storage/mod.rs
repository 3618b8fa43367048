pub mod clickhouse;
pub mod postgres;
pub mod sqlite;
pub mod trait_def;

pub use self::clickhouse::ClickHouseStorage;
pub use postgres::PostgresStorage;
pub use sqlite::SqliteStorage;
pub use trait_def::EventStore;

use anyhow::Context;
use std::sync::Arc;
use tracing::info;

use crate::config::{DatabaseBackend, DatabaseConfig};
use crate::models::MetricRow;

/// Open the configured backend and make sure the schema exists.
pub async fn connect(config: &DatabaseConfig) -> anyhow::Result<Arc<dyn EventStore>> {
    let storage: Arc<dyn EventStore> = match config.backend {
        DatabaseBackend::Sqlite => {
            info!("Using SQLite storage: {}", config.url);
            Arc::new(SqliteStorage::new(&config.url, config.max_connections).await?)
        }
        DatabaseBackend::Postgres => {
            info!("Using PostgreSQL storage");
            Arc::new(PostgresStorage::new(&config.url, config.max_connections).await?)
        }
        DatabaseBackend::ClickHouse => {
            info!("Using ClickHouse storage: {}", config.url);
            Arc::new(ClickHouseStorage::new(
                &config.url,
                &config.user,
                &config.password,
                &config.database,
            ))
        }
    };

    storage
        .init()
        .await
        .context("failed to initialize events table")?;

    Ok(storage)
}

/// Result row shape shared by the sqlx backends.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct SqlMetricRow {
    day: i64,
    value: String,
    hits: i64,
}

impl TryFrom<SqlMetricRow> for MetricRow {
    type Error = anyhow::Error;

    fn try_from(row: SqlMetricRow) -> Result<Self, Self::Error> {
        Ok(MetricRow {
            occurred_at: u32::try_from(row.day)
                .with_context(|| format!("date {} out of range", row.day))?,
            value: row.value,
            count: u64::try_from(row.hits)
                .with_context(|| format!("count {} out of range", row.hits))?,
        })
    }
}
