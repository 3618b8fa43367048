//! Metric query builder
//!
//! Every [`MetricKind`] maps to one entry of a static dispatch table that
//! names the column to group by, the aggregation mode and an optional extra
//! predicate. The table is rendered into SQL for the configured store
//! dialect. Client-supplied values never reach the query text: the four
//! parameters (site id, start, end, extra) are always bound positionally (or
//! by name on ClickHouse) and every template references all four.

pub mod service;

pub use service::StatsService;

use std::fmt::Write;

use crate::error::{TrackError, TrackResult};
use crate::models::{MetricKind, MetricRequest};

/// Category recorded by the tracking script for page views.
pub const PAGE_VIEW_CATEGORY: &str = "Page views";

/// Columns of the `events` table a metric can be grouped by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Event,
    Identity,
    ReferrerHost,
    Referrer,
    BrowserName,
    OsName,
    Country,
}

impl Column {
    pub fn as_str(self) -> &'static str {
        match self {
            Column::Event => "event",
            Column::Identity => "identity",
            Column::ReferrerHost => "referrer_host",
            Column::Referrer => "referrer",
            Column::BrowserName => "browser_name",
            Column::OsName => "os_name",
            Column::Country => "country",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationMode {
    /// One row per (date, value).
    Daily,
    /// One row per value over the whole range.
    Totals,
}

/// Additional filters driven by the request's `extra` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtraPredicate {
    /// `referrer_host = extra`
    ReferrerHostEquals,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricSpec {
    pub kind: MetricKind,
    pub column: Column,
    pub mode: AggregationMode,
    pub predicate: Option<ExtraPredicate>,
}

const fn entry(
    kind: MetricKind,
    column: Column,
    mode: AggregationMode,
    predicate: Option<ExtraPredicate>,
) -> MetricSpec {
    MetricSpec {
        kind,
        column,
        mode,
        predicate,
    }
}

/// Indexed by the kind's wire code.
static DISPATCH: [MetricSpec; 8] = [
    entry(MetricKind::PageViews, Column::Event, AggregationMode::Daily, None),
    entry(MetricKind::PageViewList, Column::Event, AggregationMode::Totals, None),
    entry(MetricKind::UniqueVisitors, Column::Identity, AggregationMode::Daily, None),
    entry(MetricKind::ReferrerHost, Column::ReferrerHost, AggregationMode::Totals, None),
    entry(
        MetricKind::Referrer,
        Column::Referrer,
        AggregationMode::Totals,
        Some(ExtraPredicate::ReferrerHostEquals),
    ),
    entry(MetricKind::Browsers, Column::BrowserName, AggregationMode::Totals, None),
    entry(MetricKind::OSes, Column::OsName, AggregationMode::Totals, None),
    entry(MetricKind::Country, Column::Country, AggregationMode::Totals, None),
];

/// Dispatch table entry for a metric kind.
pub fn spec_for(kind: MetricKind) -> &'static MetricSpec {
    &DISPATCH[kind as usize]
}

/// Bound parameters, in positional order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Param {
    SiteId,
    Start,
    End,
    Extra,
}

impl Param {
    fn position(self) -> u8 {
        match self {
            Param::SiteId => 1,
            Param::Start => 2,
            Param::End => 3,
            Param::Extra => 4,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Param::SiteId => "site_id",
            Param::Start => "start",
            Param::End => "end",
            Param::Extra => "extra",
        }
    }

    fn clickhouse_type(self) -> &'static str {
        match self {
            Param::SiteId | Param::Extra => "String",
            Param::Start | Param::End => "UInt32",
        }
    }
}

/// Placeholder syntax and literal typing of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// `?1` .. `?4`
    Sqlite,
    /// `$1` .. `$4`
    Postgres,
    /// `{site_id:String}` style server-side parameters
    ClickHouse,
}

impl Dialect {
    pub fn placeholder(self, param: Param) -> String {
        match self {
            Dialect::Sqlite => format!("?{}", param.position()),
            Dialect::Postgres => format!("${}", param.position()),
            Dialect::ClickHouse => format!("{{{}:{}}}", param.name(), param.clickhouse_type()),
        }
    }

    /// Date literal reported by totals-mode rows.
    fn zero_date(self) -> &'static str {
        match self {
            Dialect::Sqlite => "0",
            Dialect::Postgres => "CAST(0 AS BIGINT)",
            Dialect::ClickHouse => "toUInt32(0)",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryParams {
    pub site_id: String,
    pub start: u32,
    pub end: u32,
    pub extra: String,
}

/// A rendered metric query, ready to hand to the store.
///
/// Result columns are `day`, `value` and `hits`, in that order.
#[derive(Debug, Clone)]
pub struct MetricQuery {
    pub spec: &'static MetricSpec,
    pub sql: String,
    pub params: QueryParams,
}

#[derive(Debug, Clone, Copy)]
pub struct QueryBuilder {
    dialect: Dialect,
}

impl QueryBuilder {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    /// Validate a request and render its query.
    pub fn build(&self, request: &MetricRequest) -> TrackResult<MetricQuery> {
        let kind = request.kind()?;
        if request.site_id.trim().is_empty() {
            return Err(TrackError::invalid("siteId must not be empty"));
        }
        if request.start > request.end {
            return Err(TrackError::invalid(format!(
                "start {} is after end {}",
                request.start, request.end
            )));
        }

        let spec = spec_for(kind);
        Ok(MetricQuery {
            spec,
            sql: self.render(spec),
            params: QueryParams {
                site_id: request.site_id.clone(),
                start: request.start,
                end: request.end,
                extra: request.extra.clone(),
            },
        })
    }

    /// Render the SQL template for a dispatch table entry.
    pub fn render(&self, spec: &MetricSpec) -> String {
        let d = self.dialect;
        let site_id = d.placeholder(Param::SiteId);
        let start = d.placeholder(Param::Start);
        let end = d.placeholder(Param::End);
        let extra = d.placeholder(Param::Extra);
        let column = spec.column.as_str();

        let extra_filter = match spec.predicate {
            Some(ExtraPredicate::ReferrerHostEquals) => format!("referrer_host = {extra}"),
            None => format!("{extra} = {extra}"),
        };

        let mut sql = String::with_capacity(320);
        match spec.mode {
            // The date range is checked after grouping. Totals mode filters
            // before grouping; both give the same rows for a plain range.
            AggregationMode::Daily => {
                let _ = write!(
                    sql,
                    "SELECT occurred_at AS day, {column} AS value, COUNT(*) AS hits \
                     FROM events \
                     WHERE site_id = {site_id} \
                     AND category = '{PAGE_VIEW_CATEGORY}' \
                     AND {extra_filter} \
                     GROUP BY occurred_at, {column} \
                     HAVING occurred_at BETWEEN {start} AND {end} \
                     ORDER BY hits DESC, value ASC, day ASC"
                );
            }
            AggregationMode::Totals => {
                let _ = write!(
                    sql,
                    "SELECT {zero} AS day, {column} AS value, COUNT(*) AS hits \
                     FROM events \
                     WHERE site_id = {site_id} \
                     AND occurred_at BETWEEN {start} AND {end} \
                     AND category = '{PAGE_VIEW_CATEGORY}' \
                     AND {extra_filter} \
                     GROUP BY {column} \
                     ORDER BY hits DESC, value ASC",
                    zero = d.zero_date(),
                );
            }
        }
        sql
    }
}
