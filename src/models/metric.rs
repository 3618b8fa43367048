use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::TrackError;

/// The aggregate queries the stats endpoint can answer.
///
/// The discriminant is the wire code used by the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MetricKind {
    PageViews = 0,
    PageViewList = 1,
    UniqueVisitors = 2,
    ReferrerHost = 3,
    Referrer = 4,
    Browsers = 5,
    OSes = 6,
    Country = 7,
}

impl MetricKind {
    pub const ALL: [MetricKind; 8] = [
        MetricKind::PageViews,
        MetricKind::PageViewList,
        MetricKind::UniqueVisitors,
        MetricKind::ReferrerHost,
        MetricKind::Referrer,
        MetricKind::Browsers,
        MetricKind::OSes,
        MetricKind::Country,
    ];

    pub fn code(self) -> i64 {
        self as i64
    }

    pub fn from_code(code: i64) -> Result<Self, TrackError> {
        usize::try_from(code)
            .ok()
            .and_then(|idx| Self::ALL.get(idx).copied())
            .ok_or_else(|| TrackError::invalid(format!("unknown metric kind {code}")))
    }

    pub fn name(self) -> &'static str {
        match self {
            MetricKind::PageViews => "page-views",
            MetricKind::PageViewList => "page-view-list",
            MetricKind::UniqueVisitors => "unique-visitors",
            MetricKind::ReferrerHost => "referrer-host",
            MetricKind::Referrer => "referrer",
            MetricKind::Browsers => "browsers",
            MetricKind::OSes => "oses",
            MetricKind::Country => "country",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MetricKind {
    type Err = TrackError;

    /// Accepts either the kebab-case name or the numeric wire code.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(code) = s.parse::<i64>() {
            return Self::from_code(code);
        }
        Self::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| TrackError::invalid(format!("unknown metric kind '{s}'")))
    }
}

/// Stats request body as sent by the dashboard.
///
/// `what` stays a raw code here so unknown kinds can be rejected with a
/// proper error instead of a deserialization failure.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricRequest {
    pub what: i64,
    pub site_id: String,
    pub start: u32,
    pub end: u32,
    #[serde(default)]
    pub extra: String,
}

impl MetricRequest {
    pub fn new(kind: MetricKind, site_id: impl Into<String>, start: u32, end: u32) -> Self {
        Self {
            what: kind.code(),
            site_id: site_id.into(),
            start,
            end,
            extra: String::new(),
        }
    }

    pub fn with_extra(mut self, extra: impl Into<String>) -> Self {
        self.extra = extra.into();
        self
    }

    pub fn kind(&self) -> Result<MetricKind, TrackError> {
        MetricKind::from_code(self.what)
    }
}

/// One aggregated result row. `occurred_at` is 0 for totals-mode queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricRow {
    pub occurred_at: u32,
    pub value: String,
    pub count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_codes_match_position() {
        for (idx, kind) in MetricKind::ALL.iter().enumerate() {
            assert_eq!(kind.code(), idx as i64);
            assert_eq!(MetricKind::from_code(idx as i64).unwrap(), *kind);
        }
    }

    #[test]
    fn test_unknown_kind_rejected() {
        assert!(matches!(
            MetricKind::from_code(8),
            Err(TrackError::InvalidArgument(_))
        ));
        assert!(matches!(
            MetricKind::from_code(-1),
            Err(TrackError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_kind_from_str() {
        assert_eq!("browsers".parse::<MetricKind>().unwrap(), MetricKind::Browsers);
        assert_eq!("OSES".parse::<MetricKind>().unwrap(), MetricKind::OSes);
        assert_eq!("4".parse::<MetricKind>().unwrap(), MetricKind::Referrer);
        assert!("visits".parse::<MetricKind>().is_err());
    }

    #[test]
    fn test_request_wire_format() {
        let req: MetricRequest = serde_json::from_str(
            r#"{"what":4,"siteId":"blog","start":20240101,"end":20240131,"extra":"news.ycombinator.com"}"#,
        )
        .unwrap();
        assert_eq!(req.kind().unwrap(), MetricKind::Referrer);
        assert_eq!(req.site_id, "blog");
        assert_eq!(req.extra, "news.ycombinator.com");

        let req: MetricRequest =
            serde_json::from_str(r#"{"what":0,"siteId":"blog","start":1,"end":2}"#).unwrap();
        assert_eq!(req.extra, "");
    }

    #[test]
    fn test_row_serializes_camel_case() {
        let row = MetricRow {
            occurred_at: 20240101,
            value: "/".to_string(),
            count: 3,
        };
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["occurredAt"], 20240101);
        assert_eq!(json["value"], "/");
        assert_eq!(json["count"], 3);
    }
}
