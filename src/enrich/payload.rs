use base64::{engine::general_purpose::STANDARD, Engine};

use crate::error::{TrackError, TrackResult};
use crate::models::TrackingPayload;

/// Decode a tracking payload sent either as raw JSON or as base64 encoded JSON.
pub fn decode_payload(raw: &[u8]) -> TrackResult<TrackingPayload> {
    let trimmed = raw.trim_ascii();
    if trimmed.is_empty() {
        return Err(TrackError::invalid("empty tracking payload"));
    }

    let payload: TrackingPayload = if trimmed.first() == Some(&b'{') {
        serde_json::from_slice(trimmed)
            .map_err(|e| TrackError::invalid(format!("malformed tracking JSON: {e}")))?
    } else {
        let decoded = STANDARD
            .decode(trimmed)
            .map_err(|e| TrackError::invalid(format!("malformed base64 payload: {e}")))?;
        serde_json::from_slice(&decoded)
            .map_err(|e| TrackError::invalid(format!("malformed tracking JSON: {e}")))?
    };

    if payload.site_id.trim().is_empty() {
        return Err(TrackError::invalid("site_id must not be empty"));
    }

    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    const JSON: &str = r#"{"site_id":"abc","tracking":{"type":"page","ua":"Firefox","event":"/home","category":"Page views","referrer":"https://example.com/x","isTouchDevice":true}}"#;

    #[test]
    fn test_decode_raw_json() {
        let payload = decode_payload(JSON.as_bytes()).unwrap();
        assert_eq!(payload.site_id, "abc");
        assert_eq!(payload.tracking.event_type, "page");
        assert!(payload.tracking.is_touch_device);
        assert_eq!(payload.tracking.identity, "");
    }

    #[test]
    fn test_decode_base64_json() {
        let encoded = STANDARD.encode(JSON);
        let payload = decode_payload(encoded.as_bytes()).unwrap();
        assert_eq!(payload.tracking.event, "/home");
        assert_eq!(payload.tracking.category, "Page views");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(decode_payload(b"%%%"), Err(TrackError::InvalidArgument(_))));
        assert!(matches!(decode_payload(b"{not json"), Err(TrackError::InvalidArgument(_))));
        assert!(matches!(decode_payload(b"  "), Err(TrackError::InvalidArgument(_))));
    }

    #[test]
    fn test_decode_rejects_empty_site() {
        let json = r#"{"site_id":"","tracking":{"type":"page"}}"#;
        assert!(matches!(
            decode_payload(json.as_bytes()),
            Err(TrackError::InvalidArgument(_))
        ));
    }
}
