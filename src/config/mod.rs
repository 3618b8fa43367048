use anyhow::Context;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub api_server: ServerConfig,
    pub auth: AuthConfig,
    pub ingest: IngestConfig,
    pub query: QueryConfig,
    pub analytics: AnalyticsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    pub url: String,
    pub max_connections: u32,
    /// ClickHouse credentials; ignored by the sqlx backends
    pub user: String,
    pub password: String,
    pub database: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    Sqlite,
    Postgres,
    ClickHouse,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Shared secret expected in the `X-API-KEY` header of stats requests.
    /// `None` disables the check.
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Flush as soon as this many events are buffered
    pub max_batch_size: usize,
    /// Flush whatever is buffered after this long without a flush
    pub flush_interval_secs: u64,
    /// Capacity of the bounded input queue
    pub queue_capacity: usize,
    /// How long a tracking request may wait for queue capacity
    pub accept_timeout_ms: u64,
    pub insert_timeout_secs: u64,
}

impl IngestConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    pub fn accept_timeout(&self) -> Duration {
        Duration::from_millis(self.accept_timeout_ms)
    }

    pub fn insert_timeout(&self) -> Duration {
        Duration::from_secs(self.insert_timeout_secs)
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 50,
            flush_interval_secs: 10,
            queue_capacity: 100,
            accept_timeout_ms: 1_000,
            insert_timeout_secs: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    pub timeout_secs: u64,
}

impl QueryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self { timeout_secs: 15 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustedProxyMode {
    /// Use the socket address only
    None,
    /// Trust Forwarded / X-Forwarded-For
    Standard,
    /// Trust CF-Connecting-IP
    Cloudflare,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    pub geoip_city_db_path: Option<String>,
    pub trusted_proxy_mode: TrustedProxyMode,
    pub trusted_proxies: Vec<IpNet>,
    pub num_trusted_proxies: Option<usize>,
    /// Pretend every request comes from this address (local development)
    pub force_client_ip: Option<IpAddr>,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            geoip_city_db_path: None,
            trusted_proxy_mode: TrustedProxyMode::Standard,
            trusted_proxies: vec![],
            num_trusted_proxies: None,
            force_client_ip: None,
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env_opt(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("invalid value for {key}: '{raw}'")),
        None => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let backend = match env_or("DATABASE_BACKEND", "sqlite").to_lowercase().as_str() {
            "postgres" | "postgresql" => DatabaseBackend::Postgres,
            "clickhouse" => DatabaseBackend::ClickHouse,
            "sqlite" => DatabaseBackend::Sqlite,
            other => {
                tracing::warn!(
                    "Unknown DATABASE_BACKEND '{other}', falling back to 'sqlite'. Supported values: sqlite, postgres, clickhouse"
                );
                DatabaseBackend::Sqlite
            }
        };

        let default_url = match backend {
            DatabaseBackend::Sqlite => "sqlite://./sitetrack.db?mode=rwc",
            DatabaseBackend::Postgres => "postgres://localhost/sitetrack",
            DatabaseBackend::ClickHouse => "http://localhost:8123",
        };
        let database_url = env_or("DATABASE_URL", default_url);
        let max_connections = env_parse("DATABASE_MAX_CONNECTIONS", 5u32)?;

        let api_host = env_or("API_HOST", "0.0.0.0");
        let api_port = env_parse("API_PORT", 9876u16)?;

        let defaults = IngestConfig::default();
        let ingest = IngestConfig {
            max_batch_size: env_parse("INGEST_BATCH_SIZE", defaults.max_batch_size)?,
            flush_interval_secs: env_parse(
                "INGEST_FLUSH_INTERVAL_SECS",
                defaults.flush_interval_secs,
            )?,
            queue_capacity: env_parse("INGEST_QUEUE_CAPACITY", defaults.queue_capacity)?,
            accept_timeout_ms: env_parse("INGEST_ACCEPT_TIMEOUT_MS", defaults.accept_timeout_ms)?,
            insert_timeout_secs: env_parse(
                "INGEST_INSERT_TIMEOUT_SECS",
                defaults.insert_timeout_secs,
            )?,
        };
        anyhow::ensure!(ingest.max_batch_size > 0, "INGEST_BATCH_SIZE must be positive");
        anyhow::ensure!(ingest.queue_capacity > 0, "INGEST_QUEUE_CAPACITY must be positive");
        anyhow::ensure!(
            ingest.flush_interval_secs > 0,
            "INGEST_FLUSH_INTERVAL_SECS must be positive"
        );

        let query = QueryConfig {
            timeout_secs: env_parse("QUERY_TIMEOUT_SECS", QueryConfig::default().timeout_secs)?,
        };

        let trusted_proxy_mode = match env_or("TRUSTED_PROXY_MODE", "standard")
            .to_lowercase()
            .as_str()
        {
            "none" => TrustedProxyMode::None,
            "cloudflare" => TrustedProxyMode::Cloudflare,
            "standard" => TrustedProxyMode::Standard,
            other => {
                tracing::warn!(
                    "Unknown TRUSTED_PROXY_MODE '{other}', falling back to 'standard'. Supported values: none, standard, cloudflare"
                );
                TrustedProxyMode::Standard
            }
        };

        let trusted_proxies = env_opt("TRUSTED_PROXIES")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(parse_proxy_net)
                    .collect::<anyhow::Result<Vec<_>>>()
            })
            .transpose()?
            .unwrap_or_default();

        let num_trusted_proxies = env_opt("NUM_TRUSTED_PROXIES")
            .map(|v| v.trim().parse::<usize>())
            .transpose()
            .context("invalid value for NUM_TRUSTED_PROXIES")?;

        let force_client_ip = env_opt("FORCE_CLIENT_IP")
            .map(|v| v.trim().parse::<IpAddr>())
            .transpose()
            .context("invalid value for FORCE_CLIENT_IP")?;

        Ok(Config {
            database: DatabaseConfig {
                backend,
                url: database_url,
                max_connections,
                user: env_or("CLICKHOUSE_USER", "default"),
                password: env_or("CLICKHOUSE_PASSWORD", ""),
                database: env_or("CLICKHOUSE_DB", "default"),
            },
            api_server: ServerConfig {
                host: api_host,
                port: api_port,
            },
            auth: AuthConfig {
                api_key: env_opt("API_KEY"),
            },
            ingest,
            query,
            analytics: AnalyticsConfig {
                geoip_city_db_path: env_opt("GEOIP_CITY_DB_PATH"),
                trusted_proxy_mode,
                trusted_proxies,
                num_trusted_proxies,
                force_client_ip,
            },
        })
    }
}

/// Accepts a CIDR range or a bare address (treated as a single-host network).
fn parse_proxy_net(raw: &str) -> anyhow::Result<IpNet> {
    if let Ok(net) = raw.parse::<IpNet>() {
        return Ok(net);
    }
    let ip = raw
        .parse::<IpAddr>()
        .with_context(|| format!("invalid trusted proxy '{raw}'"))?;
    Ok(IpNet::from(ip))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_proxy_net() {
        let net = parse_proxy_net("10.0.0.0/8").unwrap();
        assert!(net.contains(&"10.1.2.3".parse::<IpAddr>().unwrap()));

        let host = parse_proxy_net("192.168.1.7").unwrap();
        assert!(host.contains(&"192.168.1.7".parse::<IpAddr>().unwrap()));
        assert!(!host.contains(&"192.168.1.8".parse::<IpAddr>().unwrap()));

        assert!(parse_proxy_net("not-an-ip").is_err());
    }

    #[test]
    fn test_ingest_defaults() {
        let ingest = IngestConfig::default();
        assert_eq!(ingest.max_batch_size, 50);
        assert_eq!(ingest.flush_interval(), Duration::from_secs(10));
        assert_eq!(ingest.queue_capacity, 100);
        assert_eq!(ingest.insert_timeout(), Duration::from_secs(20));
    }
}
