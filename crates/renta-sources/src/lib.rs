pub mod browser;
pub mod fetch;
pub mod geocode;
pub mod inmoup;
pub mod mendozaprop;
mod registry;

pub use browser::{DomRenderer, HeadlessChrome};
pub use fetch::{HttpFetcher, PageFetcher};
pub use geocode::{Geocoder, NominatimGeocoder};
pub use inmoup::InmoupClient;
pub use mendozaprop::MendozapropClient;
pub use registry::{get_listings, SourceRegistry};

use async_trait::async_trait;
use renta_core::{ListingRecord, Result};

/// Search filters shared by every source. `province` is carried for
/// logging only; neither current source filters on it.
#[derive(Debug, Clone)]
pub struct SearchCriteria {
    pub property_type: String,
    pub province: String,
    pub cities: Vec<String>,
}

impl SearchCriteria {
    pub fn new(
        property_type: impl Into<String>,
        province: impl Into<String>,
        cities: Vec<String>,
    ) -> Self {
        Self {
            property_type: property_type.into(),
            province: province.into(),
            cities,
        }
    }
}

/// Capability implemented once per external listing site: fetch and
/// normalize listings matching the criteria into [`ListingRecord`]s.
#[async_trait]
pub trait SourceClient: Send + Sync {
    async fn fetch(&self, criteria: &SearchCriteria) -> Result<Vec<ListingRecord>>;
}
