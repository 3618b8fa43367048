use anyhow::{Context, Result};
use chrono::{Days, Utc};
use clap::{Parser, Subcommand};
use sitetrack::config::Config;
use sitetrack::models::{date_to_int, MetricKind, MetricRequest};
use sitetrack::query::StatsService;
use sitetrack::storage;

#[derive(Parser)]
#[command(name = "sitetrack-admin")]
#[command(about = "sitetrack management CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the events table if it does not exist
    Init,
    /// Run one metric query and print the rows
    Stats {
        /// Metric name (page-views, page-view-list, unique-visitors, referrer-host,
        /// referrer, browsers, oses, country) or its numeric code
        metric: MetricKind,
        /// Site to report on
        site_id: String,
        /// First day, YYYYMMDD (default: 30 days ago)
        #[arg(long)]
        start: Option<u32>,
        /// Last day, YYYYMMDD (default: today)
        #[arg(long)]
        end: Option<u32>,
        /// Referrer host to drill into (referrer metric only)
        #[arg(long, default_value = "")]
        extra: String,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    // connect() creates the schema
    let store = storage::connect(&config.database).await?;

    match cli.command {
        Commands::Init => {
            println!("✓ Events table ready ({:?} backend)", config.database.backend);
        }
        Commands::Stats {
            metric,
            site_id,
            start,
            end,
            extra,
            json,
        } => {
            let today = Utc::now().date_naive();
            let default_start = today
                .checked_sub_days(Days::new(30))
                .context("date out of range")?;
            let request = MetricRequest::new(
                metric,
                site_id,
                start.unwrap_or_else(|| date_to_int(&default_start)),
                end.unwrap_or_else(|| date_to_int(&today)),
            )
            .with_extra(extra);

            let service = StatsService::new(store, config.query.timeout());
            let rows = service.get_stats(&request).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else if rows.is_empty() {
                println!("No rows for {} on '{}'.", metric, request.site_id);
            } else {
                println!("{:<10} {:<50} {}", "Day", "Value", "Count");
                println!("{}", "-".repeat(70));
                for row in rows {
                    let day = if row.occurred_at == 0 {
                        "-".to_string()
                    } else {
                        row.occurred_at.to_string()
                    };
                    println!("{:<10} {:<50} {}", day, row.value, row.count);
                }
            }
        }
    }

    Ok(())
}
