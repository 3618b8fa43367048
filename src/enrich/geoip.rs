//! GeoIP lookup using a MaxMind GeoLite2/GeoIP2 City database
//!
//! The database is memory-mapped once at startup and shared between request
//! tasks.

use anyhow::{Context, Result};
use maxminddb::{geoip2, Mmap, Reader};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::debug;

/// Location fields recorded on an event. Empty when unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeoLocation {
    pub country: String,
    pub region: String,
}

#[derive(Clone)]
pub struct GeoIpService {
    city_reader: Arc<Reader<Mmap>>,
}

impl GeoIpService {
    /// Open a City (or Country) `.mmdb` file.
    pub fn open(path: &str) -> Result<Self> {
        let reader = unsafe { Reader::open_mmap(path) }
            .with_context(|| format!("Failed to open GeoIP City database at {}", path))?;
        Ok(Self {
            city_reader: Arc::new(reader),
        })
    }

    /// Country name and first subdivision name in English.
    pub fn lookup(&self, ip: IpAddr) -> GeoLocation {
        let mut location = GeoLocation::default();

        let result = match self.city_reader.lookup(ip) {
            Ok(result) => result,
            Err(e) => {
                debug!(%ip, "GeoIP lookup failed: {e}");
                return location;
            }
        };

        if let Ok(Some(city)) = result.decode::<geoip2::City>() {
            location.country = city.country.names.english.unwrap_or_default().to_string();
            if let Some(subdivision) = city.subdivisions.first() {
                location.region = subdivision.names.english.unwrap_or_default().to_string();
            }
        } else if let Ok(Some(country)) = result.decode::<geoip2::Country>() {
            // Country databases carry no subdivisions
            location.country = country.country.names.english.unwrap_or_default().to_string();
        }

        location
    }
}
