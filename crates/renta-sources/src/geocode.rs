use std::time::Duration;

use async_trait::async_trait;
use renta_core::enrich::{field_string, has_geolocation};
use renta_core::Result;
use serde_json::Value;
use url::Url;

use crate::fetch::classify;

const NOMINATIM_ENDPOINT: &str = "https://nominatim.openstreetmap.org/search";
const GEOCODE_TIMEOUT: Duration = Duration::from_secs(5);
// Nominatim rejects requests without an identifying User-Agent.
const GEOCODE_USER_AGENT: &str = concat!("renta/", env!("CARGO_PKG_VERSION"));

/// Free-text address to coordinates. Returns `Ok(None)` when the service
/// has no match; errors are reserved for transport failures.
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn geocode(&self, address: &str) -> Result<Option<(String, String)>>;
}

/// OpenStreetMap Nominatim lookup, scoped to Mendoza, Argentina.
#[derive(Debug, Default)]
pub struct NominatimGeocoder {
    client: reqwest::Client,
}

impl NominatimGeocoder {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Geocoder for NominatimGeocoder {
    async fn geocode(&self, address: &str) -> Result<Option<(String, String)>> {
        let query = format!("{}, Mendoza, Argentina", address);
        let url = match Url::parse_with_params(
            NOMINATIM_ENDPOINT,
            &[("q", query.as_str()), ("format", "json"), ("limit", "1")],
        ) {
            Ok(url) => url,
            Err(_) => return Ok(None),
        };

        let response = self
            .client
            .get(url)
            .timeout(GEOCODE_TIMEOUT)
            .header(reqwest::header::USER_AGENT, GEOCODE_USER_AGENT)
            .send()
            .await
            .map_err(classify)?;

        if !response.status().is_success() {
            return Ok(None);
        }

        let hits: Vec<Value> = response.json().await.map_err(classify)?;
        Ok(hits
            .first()
            .map(|hit| (field_string(hit, "lat"), field_string(hit, "lon")))
            .filter(|(lat, lon)| has_geolocation(lat, lon)))
    }
}
