pub mod event;
pub mod metric;

pub use event::{date_to_int, today_as_int, EnrichedEvent, TrackingData, TrackingPayload};
pub use metric::{MetricKind, MetricRequest, MetricRow};
