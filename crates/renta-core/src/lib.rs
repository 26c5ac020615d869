use serde::{Deserialize, Serialize};

pub mod enrich;

pub type Result<T> = std::result::Result<T, RentaError>;

/// Hard cap on `additional_images` per record, to bound payload size.
pub const MAX_ADDITIONAL_IMAGES: usize = 10;

/// Why an upstream site could not be reached. The routing layer maps this
/// to the HTTP status it answers with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamCause {
    /// Upstream answered with a non-2xx status.
    BadStatus(u16),
    Timeout,
    Connection,
}

impl UpstreamCause {
    pub fn suggested_status(&self) -> u16 {
        match self {
            UpstreamCause::BadStatus(_) => 502,
            UpstreamCause::Timeout => 504,
            UpstreamCause::Connection => 503,
        }
    }
}

impl std::fmt::Display for UpstreamCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpstreamCause::BadStatus(code) => write!(f, "upstream status {}", code),
            UpstreamCause::Timeout => write!(f, "timeout"),
            UpstreamCause::Connection => write!(f, "connection failure"),
        }
    }
}

/// Pipeline error taxonomy. Only `UnsupportedSource` and `SourceUnavailable`
/// may cross the pipeline boundary; `Extraction` and `Enhancement` are
/// absorbed inside the source clients.
#[derive(Debug, thiserror::Error)]
pub enum RentaError {
    #[error("unsupported source: {0:?}")]
    UnsupportedSource(String),
    #[error("source unavailable ({cause}): {message}")]
    SourceUnavailable {
        cause: UpstreamCause,
        message: String,
    },
    /// Failure scoped to a single record; the record is dropped and the
    /// batch continues.
    #[error("record extraction failed: {0}")]
    Extraction(String),
    /// Failure of the best-effort image enhancement pass; the original
    /// records are returned unchanged.
    #[error("image enhancement failed: {0}")]
    Enhancement(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingSource {
    Inmoup,
    Mendozaprop,
}

impl std::fmt::Display for ListingSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListingSource::Inmoup => write!(f, "inmoup"),
            ListingSource::Mendozaprop => write!(f, "mendozaprop"),
        }
    }
}

/// Normalized rental-property entry. One record is built per raw source
/// item during enrichment and is not mutated afterwards, except that the
/// inmoup enhancement pass may replace its image fields (keyed by `id`)
/// before the result list is finalized.
///
/// String fields default to empty rather than `Option` so every source
/// produces the same JSON shape downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingRecord {
    pub id: String,
    /// Source-formatted price, currency-qualified where known.
    pub price: String,
    pub address: String,
    /// Absolute URL or empty.
    pub primary_image: String,
    /// Absolute URLs, never containing `primary_image`, capped at
    /// [`MAX_ADDITIONAL_IMAGES`].
    pub additional_images: Vec<String>,
    pub bedrooms: String,
    pub bathrooms: String,
    pub total_area: String,
    pub covered_area: String,
    pub has_parking: bool,
    /// Always absolute.
    pub listing_url: String,
    pub latitude: String,
    pub longitude: String,
    /// True iff both `latitude` and `longitude` are non-empty.
    pub has_geolocation: bool,
    pub description: String,
    pub source: ListingSource,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> ListingRecord {
        ListingRecord {
            id: "123".to_string(),
            price: "150000 ARS".to_string(),
            address: "Calle Falsa 123, Godoy Cruz".to_string(),
            primary_image: "https://inmoup.com.ar/fotos/1.jpg".to_string(),
            additional_images: vec!["https://inmoup.com.ar/fotos/2.jpg".to_string()],
            bedrooms: "2".to_string(),
            bathrooms: "1".to_string(),
            total_area: "120".to_string(),
            covered_area: "90".to_string(),
            has_parking: true,
            listing_url: "https://inmoup.com.ar/inmuebles/123".to_string(),
            latitude: "-32.89".to_string(),
            longitude: "-68.82".to_string(),
            has_geolocation: true,
            description: String::new(),
            source: ListingSource::Inmoup,
        }
    }

    #[test]
    fn record_serializes_with_camel_case_keys() {
        let value = serde_json::to_value(sample_record()).unwrap();
        assert_eq!(value["primaryImage"], "https://inmoup.com.ar/fotos/1.jpg");
        assert_eq!(value["hasGeolocation"], true);
        assert_eq!(value["listingUrl"], "https://inmoup.com.ar/inmuebles/123");
        assert_eq!(value["source"], "inmoup");
    }

    #[test]
    fn record_round_trips_through_json() {
        let record = sample_record();
        let json = serde_json::to_string(&record).unwrap();
        let back: ListingRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, back);
    }

    #[test]
    fn upstream_cause_maps_to_gateway_statuses() {
        assert_eq!(UpstreamCause::BadStatus(500).suggested_status(), 502);
        assert_eq!(UpstreamCause::Timeout.suggested_status(), 504);
        assert_eq!(UpstreamCause::Connection.suggested_status(), 503);
    }

    #[test]
    fn error_display_names_the_cause() {
        let err = RentaError::SourceUnavailable {
            cause: UpstreamCause::Timeout,
            message: "nav timed out".to_string(),
        };
        assert!(err.to_string().contains("timeout"));

        let err = RentaError::UnsupportedSource("zonaprop".to_string());
        assert!(err.to_string().contains("zonaprop"));
    }
}
