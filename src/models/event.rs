use serde::{Deserialize, Serialize};

/// Tracking payload as posted by the browser script.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TrackingPayload {
    pub site_id: String,
    pub tracking: TrackingData,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TrackingData {
    #[serde(rename = "type")]
    pub event_type: String,
    pub identity: String,
    #[serde(rename = "ua")]
    pub user_agent: String,
    pub event: String,
    pub category: String,
    pub referrer: String,
    #[serde(rename = "isTouchDevice")]
    pub is_touch_device: bool,
}

/// A tracking event after server-side enrichment, ready for batching.
///
/// Enrichment fields that could not be derived are empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichedEvent {
    pub site_id: String,
    /// YYYYMMDD in UTC; assigned when the batch is flushed.
    pub occurred_at: u32,
    pub event_type: String,
    pub identity: String,
    pub event: String,
    pub category: String,
    pub referrer: String,
    pub referrer_host: String,
    pub is_touch_device: bool,
    pub browser_name: String,
    pub os_name: String,
    pub device_type: String,
    pub country: String,
    pub region_name: String,
}

impl EnrichedEvent {
    /// Returns the event with its date set to `occurred_at`.
    pub fn stamped(mut self, occurred_at: u32) -> Self {
        self.occurred_at = occurred_at;
        self
    }
}

/// Encode a UTC date as the integer YYYYMMDD.
pub fn date_to_int<D: chrono::Datelike>(date: &D) -> u32 {
    date.year() as u32 * 10_000 + date.month() * 100 + date.day()
}

/// Today's UTC date as YYYYMMDD.
pub fn today_as_int() -> u32 {
    date_to_int(&chrono::Utc::now().date_naive())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_date_to_int() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(date_to_int(&date), 20240309);

        let date = NaiveDate::from_ymd_opt(1999, 12, 31).unwrap();
        assert_eq!(date_to_int(&date), 19991231);
    }

    #[test]
    fn test_payload_missing_fields_default_to_empty() {
        let payload: TrackingPayload =
            serde_json::from_str(r#"{"site_id":"s1","tracking":{"type":"page","event":"/"}}"#)
                .unwrap();
        assert_eq!(payload.site_id, "s1");
        assert_eq!(payload.tracking.event_type, "page");
        assert_eq!(payload.tracking.identity, "");
        assert_eq!(payload.tracking.referrer, "");
        assert!(!payload.tracking.is_touch_device);
    }

    #[test]
    fn test_stamped_sets_date_only() {
        let event = EnrichedEvent {
            site_id: "s1".to_string(),
            event: "/".to_string(),
            ..Default::default()
        };
        let stamped = event.clone().stamped(20240101);
        assert_eq!(stamped.occurred_at, 20240101);
        assert_eq!(stamped.event, event.event);
    }
}
