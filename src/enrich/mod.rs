//! Server-side enrichment of tracking payloads
//!
//! Turns a decoded [`TrackingPayload`] plus request metadata (client IP,
//! headers) into an [`EnrichedEvent`]: referrer host, synthesized identity,
//! user-agent classification and geolocation.

pub mod geoip;
pub mod ip_extractor;
pub mod payload;
pub mod useragent;

pub use geoip::{GeoIpService, GeoLocation};
pub use ip_extractor::extract_client_ip;
pub use payload::decode_payload;
pub use useragent::{parse_user_agent, UserAgentInfo};

use reqwest::Url;
use sha2::{Digest, Sha256};
use std::net::IpAddr;
use tracing::{info, warn};

use crate::config::AnalyticsConfig;
use crate::models::{EnrichedEvent, TrackingPayload};

#[derive(Clone)]
pub struct Enricher {
    geoip: Option<GeoIpService>,
    config: AnalyticsConfig,
}

impl Enricher {
    pub fn new(config: AnalyticsConfig, geoip: Option<GeoIpService>) -> Self {
        Self { geoip, config }
    }

    /// Build from configuration, opening the GeoIP database if one is set.
    pub fn from_config(config: &AnalyticsConfig) -> anyhow::Result<Self> {
        let geoip = match config.geoip_city_db_path.as_deref() {
            Some(path) => {
                let service = GeoIpService::open(path)?;
                info!("GeoIP database loaded from {}", path);
                Some(service)
            }
            None => {
                info!("GEOIP_CITY_DB_PATH not set, country and region will be empty");
                None
            }
        };
        Ok(Self::new(config.clone(), geoip))
    }

    pub fn config(&self) -> &AnalyticsConfig {
        &self.config
    }

    /// Enrich a payload. `user_agent` is the request header and is used when
    /// the payload does not carry one.
    pub fn enrich(
        &self,
        payload: TrackingPayload,
        client_ip: Option<IpAddr>,
        user_agent: Option<&str>,
    ) -> EnrichedEvent {
        let TrackingPayload { site_id, tracking } = payload;

        let ua = if tracking.user_agent.is_empty() {
            user_agent.unwrap_or_default().to_string()
        } else {
            tracking.user_agent
        };

        let identity = if tracking.identity.is_empty() {
            synthesize_identity(client_ip, &ua)
        } else {
            tracking.identity
        };

        let referrer_host = referrer_host(&tracking.referrer);
        let agent = parse_user_agent(&ua);
        let location = match (&self.geoip, client_ip) {
            (Some(geoip), Some(ip)) => geoip.lookup(ip),
            _ => GeoLocation::default(),
        };

        EnrichedEvent {
            site_id,
            occurred_at: 0,
            event_type: tracking.event_type,
            identity,
            event: tracking.event,
            category: tracking.category,
            referrer: tracking.referrer,
            referrer_host,
            is_touch_device: tracking.is_touch_device,
            browser_name: agent.browser_name,
            os_name: agent.os_name,
            device_type: agent.device_type,
            country: location.country,
            region_name: location.region,
        }
    }
}

/// Host part of a referrer URL, empty if there is none.
pub fn referrer_host(referrer: &str) -> String {
    let referrer = referrer.trim();
    if referrer.is_empty() {
        return String::new();
    }

    match Url::parse(referrer) {
        Ok(url) => url.host_str().unwrap_or_default().to_string(),
        Err(e) => {
            warn!(referrer, "Unable to parse referrer: {e}");
            String::new()
        }
    }
}

/// Stable visitor identity for clients that did not send one.
pub fn synthesize_identity(client_ip: Option<IpAddr>, user_agent: &str) -> String {
    let seed = match client_ip {
        Some(ip) => format!("{ip}-{user_agent}"),
        None => format!("unknown-{user_agent}"),
    };
    format!("{:x}", Sha256::digest(seed.as_bytes()))
}
