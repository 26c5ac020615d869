use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use renta_core::enrich::{absolutize, field_string, first_non_empty, has_geolocation, split_images};
use renta_core::{ListingRecord, ListingSource, RentaError, Result, MAX_ADDITIONAL_IMAGES};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::fetch::{HttpFetcher, PageFetcher};
use crate::geocode::{Geocoder, NominatimGeocoder};
use crate::{SearchCriteria, SourceClient};

const ORIGIN: &str = "https://www.mendozaprop.com";
const PAGE_SIZE: usize = 50;
/// Deliberate cap: 5 pages (250 listings) per crawl, completeness is a
/// non-goal.
const MAX_PAGES: usize = 5;
const OPERATION_RENTAL: &str = "1";
/// Every residential property-type code, already %2C-joined for the query.
const ALL_RESIDENTIAL_CODES: &str = "40%2C3%2C45%2C46%2C5%2C1119%2C1154%2C1118%2C1117%2C1144%2C1145%2C4%2C7%2C1107%2C1106%2C1108%2C1140";
const APARTMENT_CODE: &str = "3";
const HOUSE_CODE: &str = "1";
const DEFAULT_REGIONS: &str = "guaymallen%2Cmendoza%2Cgodoycruz";

/// Region tokens the API understands. Unknown city names pass through
/// lower-cased.
const KNOWN_REGIONS: [&str; 18] = [
    "mendoza",
    "godoycruz",
    "guaymallen",
    "lasheras",
    "lujandecuyo",
    "maipu",
    "sanrafael",
    "sanmartin",
    "tunuyan",
    "junin",
    "lavalle",
    "tupungato",
    "sancarlos",
    "generalalvear",
    "santarosa",
    "rivadavia",
    "malargue",
    "lapaz",
];

pub struct MendozapropClient {
    fetcher: Arc<dyn PageFetcher>,
    geocoder: Arc<dyn Geocoder>,
    /// Address -> coordinates, scoped to this client instance. Writes are
    /// idempotent (same address resolves to the same pair), so
    /// last-write-wins between concurrent enrichment tasks is fine.
    geocode_cache: Mutex<HashMap<String, (String, String)>>,
}

impl MendozapropClient {
    pub fn new() -> Self {
        Self::with_parts(Arc::new(HttpFetcher::new()), Arc::new(NominatimGeocoder::new()))
    }

    /// Construct with injected fetch/geocode capabilities.
    pub fn with_parts(fetcher: Arc<dyn PageFetcher>, geocoder: Arc<dyn Geocoder>) -> Self {
        Self {
            fetcher,
            geocoder,
            geocode_cache: Mutex::new(HashMap::new()),
        }
    }

    fn property_codes(property_type: &str) -> &'static str {
        let lower = property_type.to_lowercase();
        if lower.contains("depart") || lower.contains("apart") {
            APARTMENT_CODE
        } else if lower.contains("casa") || lower.contains("house") {
            HOUSE_CODE
        } else {
            ALL_RESIDENTIAL_CODES
        }
    }

    fn region_token(city: &str) -> String {
        let lower = city.to_lowercase();
        match KNOWN_REGIONS.iter().find(|region| **region == lower) {
            Some(region) => region.to_string(),
            None => lower,
        }
    }

    fn region_query(cities: &[String]) -> String {
        if cities.is_empty() {
            return DEFAULT_REGIONS.to_string();
        }
        cities
            .iter()
            .map(|city| Self::region_token(city))
            .collect::<Vec<_>>()
            .join("%2C")
    }

    fn page_url(codes: &str, region: &str, offset: usize) -> String {
        format!(
            "{}/api/properties?limit={}&offset={}&isMap=true&operationType={}&propertyType={}&region={}",
            ORIGIN, PAGE_SIZE, offset, OPERATION_RENTAL, codes, region
        )
    }

    /// Fetch one page, retrying once without certificate verification as a
    /// degraded-mode fallback.
    async fn fetch_page(&self, url: &str) -> Result<Vec<Value>> {
        let body = match self.fetcher.get(url).await {
            Ok(body) => body,
            Err(err) => {
                warn!("page fetch failed ({}), retrying in degraded mode", err);
                self.fetcher.get_untrusted(url).await?
            }
        };
        let data: Value = serde_json::from_str(&body).map_err(|e| RentaError::SourceUnavailable {
            cause: renta_core::UpstreamCause::Connection,
            message: format!("page did not parse as JSON: {}", e),
        })?;
        Ok(data.as_array().cloned().unwrap_or_default())
    }

    /// Bounded page-by-page traversal. Pages are strictly sequential: the
    /// termination condition depends on the previous page's result.
    async fn collect_raw_items(&self, codes: &str, region: &str) -> Result<Vec<Value>> {
        let mut items = Vec::new();
        let mut offset = 0;
        let mut page_count = 0;

        while page_count < MAX_PAGES {
            page_count += 1;
            let url = Self::page_url(codes, region, offset);
            info!("querying page {}: {}", page_count, url);

            let page = match self.fetch_page(&url).await {
                Ok(page) => page,
                Err(err) if page_count == 1 => return Err(err),
                Err(err) => {
                    // Keep the pages already collected.
                    error!("aborting pagination on page {}: {}", page_count, err);
                    break;
                }
            };

            if page.is_empty() {
                info!("no more results after page {}", page_count);
                break;
            }

            let received = page.len();
            debug!("page {} returned {} items", page_count, received);
            items.extend(page);
            offset += received;

            if received < PAGE_SIZE {
                info!("short page ({} < {}), end of results", received, PAGE_SIZE);
                break;
            }
        }

        if page_count == MAX_PAGES {
            info!("stopped at the {}-page cap", MAX_PAGES);
        }
        Ok(items)
    }

    fn coordinates_from_fields(prop: &Value) -> (String, String) {
        let mut latitude = first_non_empty(prop, &["latitude", "google_lat"]);
        let mut longitude = first_non_empty(prop, &["longitude", "google_lng"]);

        // Nested shapes in priority order; stop at the first complete pair.
        let nested: [(&str, &[&str], &[&str]); 3] = [
            ("map", &["latitude"], &["longitude"]),
            ("coords", &["lat"], &["lng"]),
            ("location", &["latitude", "lat"], &["longitude", "lng"]),
        ];
        for (key, lat_keys, lng_keys) in nested {
            if has_geolocation(&latitude, &longitude) {
                break;
            }
            if let Some(shape) = prop.get(key) {
                if latitude.is_empty() {
                    latitude = first_non_empty(shape, lat_keys);
                }
                if longitude.is_empty() {
                    longitude = first_non_empty(shape, lng_keys);
                }
            }
        }
        (latitude, longitude)
    }

    async fn resolve_coordinates(&self, prop: &Value) -> (String, String) {
        let (latitude, longitude) = Self::coordinates_from_fields(prop);
        if has_geolocation(&latitude, &longitude) {
            return (latitude, longitude);
        }

        let address = field_string(prop, "address");
        if address.is_empty() {
            return (latitude, longitude);
        }
        match self.cached_geocode(&address).await {
            Some((lat, lng)) => (lat, lng),
            None => (latitude, longitude),
        }
    }

    fn cache_get(&self, address: &str) -> Option<(String, String)> {
        self.geocode_cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(address)
            .cloned()
    }

    fn cache_put(&self, address: &str, coords: (String, String)) {
        self.geocode_cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(address.to_string(), coords);
    }

    /// Consult the per-instance cache before hitting the geocoder; a hit
    /// skips the network entirely. Geocoding failures are non-fatal.
    async fn cached_geocode(&self, address: &str) -> Option<(String, String)> {
        if let Some(hit) = self.cache_get(address) {
            debug!("geocode cache hit for {}", address);
            return Some(hit);
        }
        match self.geocoder.geocode(address).await {
            Ok(Some(coords)) => {
                self.cache_put(address, coords.clone());
                Some(coords)
            }
            Ok(None) => None,
            Err(err) => {
                warn!("geocoding failed for {}: {}", address, err);
                None
            }
        }
    }

    fn image_url(value: &Value) -> String {
        match value {
            Value::String(s) => s.trim().to_string(),
            Value::Object(_) => first_non_empty(value, &["url", "src", "path"]),
            Value::Array(items) => items.first().map(Self::image_url).unwrap_or_default(),
            _ => String::new(),
        }
    }

    /// The API is inconsistent about where images live; probe the known
    /// shapes in order and normalize whatever turns up.
    fn normalize_images(prop: &Value) -> (String, Vec<String>) {
        let candidates = [
            prop.get("images"),
            prop.get("photos"),
            prop.get("gallery"),
            prop.get("media").and_then(|media| media.get("images")),
        ];

        let mut entries: Vec<String> = Vec::new();
        for candidate in candidates.into_iter().flatten() {
            let list: Vec<&Value> = match candidate {
                Value::Array(items) => items.iter().collect(),
                Value::Null => continue,
                single => vec![single],
            };
            entries = list
                .into_iter()
                .map(Self::image_url)
                .filter(|url| !url.is_empty())
                .collect();
            if !entries.is_empty() {
                break;
            }
        }

        let direct = prop
            .get("image")
            .or_else(|| prop.get("photo"))
            .map(Self::image_url)
            .unwrap_or_default();

        let absolute: Vec<String> = entries
            .iter()
            .map(|url| absolutize(ORIGIN, url))
            .collect();
        let primary = if direct.is_empty() {
            String::new()
        } else {
            absolutize(ORIGIN, &direct)
        };
        split_images(&primary, absolute, MAX_ADDITIONAL_IMAGES)
    }

    async fn enrich(&self, prop: &Value) -> Result<ListingRecord> {
        let id = field_string(prop, "id");
        if id.is_empty() {
            return Err(RentaError::Extraction("listing without an id".to_string()));
        }

        let (latitude, longitude) = self.resolve_coordinates(prop).await;
        let (primary_image, additional_images) = Self::normalize_images(prop);

        let currency = if field_string(prop, "currency_id") == "1" {
            "USD"
        } else {
            "ARS"
        };
        let has_parking = field_string(prop, "parking")
            .parse::<f64>()
            .map(|spots| spots > 0.0)
            .unwrap_or(false);

        Ok(ListingRecord {
            price: format!("{} {}", field_string(prop, "price"), currency),
            address: field_string(prop, "address"),
            primary_image,
            additional_images,
            bedrooms: field_string(prop, "bedrooms"),
            bathrooms: field_string(prop, "bathrooms"),
            total_area: field_string(prop, "m2"),
            covered_area: field_string(prop, "m2_covered"),
            has_parking,
            listing_url: format!("{}/alquiler/{}", ORIGIN, id),
            has_geolocation: has_geolocation(&latitude, &longitude),
            latitude,
            longitude,
            description: field_string(prop, "description"),
            source: ListingSource::Mendozaprop,
            id,
        })
    }
}

impl Default for MendozapropClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceClient for MendozapropClient {
    async fn fetch(&self, criteria: &SearchCriteria) -> Result<Vec<ListingRecord>> {
        let codes = Self::property_codes(&criteria.property_type);
        let region = Self::region_query(&criteria.cities);

        let raw = self.collect_raw_items(codes, &region).await?;
        info!("enriching {} raw listings", raw.len());

        // Every item is enriched concurrently; completion order is not
        // input order and a failing task cannot block its siblings.
        let mut tasks: FuturesUnordered<_> = raw.iter().map(|prop| self.enrich(prop)).collect();
        let mut records = Vec::with_capacity(raw.len());
        let mut dropped = 0usize;
        while let Some(result) = tasks.next().await {
            match result {
                Ok(record) => records.push(record),
                Err(err) => {
                    dropped += 1;
                    error!("dropping listing: {}", err);
                }
            }
        }

        if dropped > 0 {
            warn!("{} listings dropped during enrichment", dropped);
        }
        info!("mendozaprop produced {} records", records.len());
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use renta_core::UpstreamCause;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn full_page(start: usize) -> String {
        let items: Vec<Value> = (start..start + PAGE_SIZE)
            .map(|i| {
                json!({
                    "id": i,
                    "price": 100_000,
                    "currency_id": 2,
                    "address": format!("Calle {} 100", i),
                    "latitude": "-32.9",
                    "longitude": "-68.8",
                    "bedrooms": 2,
                    "bathrooms": 1,
                    "m2": 120,
                    "m2_covered": 90,
                    "parking": 1,
                    "images": [format!("/fotos/{}.jpg", i)]
                })
            })
            .collect();
        serde_json::to_string(&items).unwrap()
    }

    fn short_page(start: usize, len: usize) -> String {
        let items: Vec<Value> = (start..start + len)
            .map(|i| json!({"id": i, "latitude": "-32.9", "longitude": "-68.8"}))
            .collect();
        serde_json::to_string(&items).unwrap()
    }

    /// Serves a scripted sequence of responses, counting requests.
    struct ScriptedFetcher {
        pages: Vec<Result<String>>,
        calls: AtomicUsize,
        untrusted_calls: AtomicUsize,
    }

    impl ScriptedFetcher {
        fn new(pages: Vec<Result<String>>) -> Self {
            Self {
                pages,
                calls: AtomicUsize::new(0),
                untrusted_calls: AtomicUsize::new(0),
            }
        }

        fn next_response(&self) -> Result<String> {
            let index = self.calls.fetch_add(1, Ordering::SeqCst);
            match self.pages.get(index) {
                Some(Ok(body)) => Ok(body.clone()),
                Some(Err(_)) | None => Err(RentaError::SourceUnavailable {
                    cause: UpstreamCause::Connection,
                    message: "scripted failure".to_string(),
                }),
            }
        }
    }

    #[async_trait]
    impl PageFetcher for ScriptedFetcher {
        async fn get(&self, _url: &str) -> Result<String> {
            self.next_response()
        }

        async fn get_untrusted(&self, _url: &str) -> Result<String> {
            self.untrusted_calls.fetch_add(1, Ordering::SeqCst);
            self.next_response()
        }
    }

    struct NullGeocoder;

    #[async_trait]
    impl Geocoder for NullGeocoder {
        async fn geocode(&self, _address: &str) -> Result<Option<(String, String)>> {
            Ok(None)
        }
    }

    struct CountingGeocoder {
        calls: AtomicUsize,
    }

    impl CountingGeocoder {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Geocoder for CountingGeocoder {
        async fn geocode(&self, _address: &str) -> Result<Option<(String, String)>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some(("-32.889".to_string(), "-68.845".to_string())))
        }
    }

    fn client_with(
        pages: Vec<Result<String>>,
    ) -> (MendozapropClient, Arc<ScriptedFetcher>) {
        let fetcher = Arc::new(ScriptedFetcher::new(pages));
        let client = MendozapropClient::with_parts(fetcher.clone(), Arc::new(NullGeocoder));
        (client, fetcher)
    }

    fn criteria() -> SearchCriteria {
        SearchCriteria::new("casa", "mendoza", vec!["guaymallen".to_string()])
    }

    #[tokio::test]
    async fn walker_stops_exactly_at_the_page_cap() {
        // Every page is full, so only the cap can stop the walker.
        let pages: Vec<Result<String>> = (0..MAX_PAGES + 3)
            .map(|i| Ok(full_page(i * PAGE_SIZE)))
            .collect();
        let (client, fetcher) = client_with(pages);

        let records = client.fetch(&criteria()).await.unwrap();

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), MAX_PAGES);
        assert_eq!(records.len(), MAX_PAGES * PAGE_SIZE);
    }

    #[tokio::test]
    async fn walker_stops_after_a_short_page() {
        let (client, fetcher) = client_with(vec![Ok(full_page(0)), Ok(short_page(50, 3))]);

        let records = client.fetch(&criteria()).await.unwrap();

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
        assert_eq!(records.len(), PAGE_SIZE + 3);
    }

    #[tokio::test]
    async fn walker_stops_on_an_empty_page() {
        let (client, fetcher) = client_with(vec![Ok(full_page(0)), Ok("[]".to_string())]);

        let records = client.fetch(&criteria()).await.unwrap();

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
        assert_eq!(records.len(), PAGE_SIZE);
    }

    #[tokio::test]
    async fn first_page_failure_is_fatal() {
        let (client, fetcher) = client_with(vec![]);

        let err = client.fetch(&criteria()).await.unwrap_err();

        assert!(matches!(err, RentaError::SourceUnavailable { .. }));
        // The degraded-mode retry also ran before giving up.
        assert_eq!(fetcher.untrusted_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn later_page_failure_keeps_collected_pages() {
        let (client, fetcher) = client_with(vec![Ok(full_page(0))]);

        let records = client.fetch(&criteria()).await.unwrap();

        assert_eq!(records.len(), PAGE_SIZE);
        // Page 2 failed on both the plain and degraded fetch.
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 3);
        assert_eq!(fetcher.untrusted_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn degraded_retry_recovers_a_page() {
        let failure = Err(RentaError::SourceUnavailable {
            cause: UpstreamCause::Connection,
            message: "tls handshake".to_string(),
        });
        let (client, fetcher) = client_with(vec![failure, Ok(short_page(0, 2))]);

        let records = client.fetch(&criteria()).await.unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(fetcher.untrusted_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn geocoding_the_same_address_hits_the_network_once() {
        let geocoder = Arc::new(CountingGeocoder::new());
        let client = MendozapropClient::with_parts(
            Arc::new(ScriptedFetcher::new(vec![])),
            geocoder.clone(),
        );
        let prop = json!({"id": 9, "address": "Saens Pena 1144"});

        let first = client.enrich(&prop).await.unwrap();
        let second = client.enrich(&prop).await.unwrap();

        assert_eq!(geocoder.calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.latitude, "-32.889");
        assert_eq!(first.longitude, "-68.845");
        assert_eq!((first.latitude, first.longitude), (second.latitude, second.longitude));
        assert!(first.has_geolocation);
    }

    #[tokio::test]
    async fn coordinates_are_probed_across_nested_shapes() {
        let client = MendozapropClient::with_parts(
            Arc::new(ScriptedFetcher::new(vec![])),
            Arc::new(NullGeocoder),
        );

        let flat = json!({"id": 1, "google_lat": "-32.1", "google_lng": "-68.1"});
        let map = json!({"id": 2, "map": {"latitude": "-32.2", "longitude": "-68.2"}});
        let coords = json!({"id": 3, "coords": {"lat": "-32.3", "lng": "-68.3"}});
        let location = json!({"id": 4, "location": {"lat": -32.4, "lng": -68.4}});
        let none = json!({"id": 5});

        assert_eq!(client.enrich(&flat).await.unwrap().latitude, "-32.1");
        assert_eq!(client.enrich(&map).await.unwrap().latitude, "-32.2");
        assert_eq!(client.enrich(&coords).await.unwrap().longitude, "-68.3");
        assert_eq!(client.enrich(&location).await.unwrap().latitude, "-32.4");

        let record = client.enrich(&none).await.unwrap();
        assert!(!record.has_geolocation);
        assert_eq!(record.latitude, "");
        assert_eq!(record.longitude, "");
    }

    #[tokio::test]
    async fn images_are_normalized_from_any_known_shape() {
        let client = MendozapropClient::with_parts(
            Arc::new(ScriptedFetcher::new(vec![])),
            Arc::new(NullGeocoder),
        );

        let object_entries = json!({
            "id": 1,
            "images": [{"url": "/a.jpg"}, {"src": "b.jpg"}, {"path": "https://cdn.example.com/c.jpg"}]
        });
        let record = client.enrich(&object_entries).await.unwrap();
        assert_eq!(record.primary_image, "https://www.mendozaprop.com/a.jpg");
        assert_eq!(
            record.additional_images,
            vec![
                "https://www.mendozaprop.com/b.jpg",
                "https://cdn.example.com/c.jpg"
            ]
        );

        let media_shape = json!({"id": 2, "media": {"images": ["/m1.jpg", "/m2.jpg"]}});
        let record = client.enrich(&media_shape).await.unwrap();
        assert_eq!(record.primary_image, "https://www.mendozaprop.com/m1.jpg");

        let direct_primary = json!({"id": 3, "photo": "/p.jpg", "gallery": ["/g1.jpg", "/g2.jpg"]});
        let record = client.enrich(&direct_primary).await.unwrap();
        assert_eq!(record.primary_image, "https://www.mendozaprop.com/p.jpg");
        assert_eq!(
            record.additional_images,
            vec![
                "https://www.mendozaprop.com/g1.jpg",
                "https://www.mendozaprop.com/g2.jpg"
            ]
        );

        let oversized = json!({
            "id": 4,
            "images": (0..30).map(|i| format!("/f{}.jpg", i)).collect::<Vec<_>>()
        });
        let record = client.enrich(&oversized).await.unwrap();
        assert_eq!(record.additional_images.len(), MAX_ADDITIONAL_IMAGES);
    }

    #[tokio::test]
    async fn listing_without_an_id_is_dropped_from_the_batch() {
        let page = serde_json::to_string(&vec![
            json!({"id": 1, "latitude": "-32.9", "longitude": "-68.8"}),
            json!({"price": 5000}),
            json!({"id": 3, "latitude": "-32.9", "longitude": "-68.8"}),
        ])
        .unwrap();
        let (client, _) = client_with(vec![Ok(page)]);

        let mut records = client.fetch(&criteria()).await.unwrap();

        records.sort_by(|a, b| a.id.cmp(&b.id));
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "1");
        assert_eq!(records[1].id, "3");
        for record in &records {
            assert_eq!(record.source, ListingSource::Mendozaprop);
            assert!(record.listing_url.starts_with(ORIGIN));
        }
    }

    #[tokio::test]
    async fn price_is_currency_qualified() {
        let client = MendozapropClient::with_parts(
            Arc::new(ScriptedFetcher::new(vec![])),
            Arc::new(NullGeocoder),
        );

        let usd = json!({"id": 1, "price": 1200, "currency_id": 1});
        assert_eq!(client.enrich(&usd).await.unwrap().price, "1200 USD");

        let ars = json!({"id": 2, "price": "450000", "currency_id": 2});
        assert_eq!(client.enrich(&ars).await.unwrap().price, "450000 ARS");
    }

    #[test]
    fn property_codes_narrow_by_type() {
        assert_eq!(MendozapropClient::property_codes("departamento"), APARTMENT_CODE);
        assert_eq!(MendozapropClient::property_codes("Apartment"), APARTMENT_CODE);
        assert_eq!(MendozapropClient::property_codes("casa"), HOUSE_CODE);
        assert_eq!(MendozapropClient::property_codes("house"), HOUSE_CODE);
        assert_eq!(MendozapropClient::property_codes(""), ALL_RESIDENTIAL_CODES);
    }

    #[test]
    fn regions_map_known_cities_and_pass_through_the_rest() {
        let regions = MendozapropClient::region_query(&[
            "Guaymallen".to_string(),
            "Godoy Cruz City".to_string(),
        ]);
        assert_eq!(regions, "guaymallen%2Cgodoy cruz city");

        assert_eq!(MendozapropClient::region_query(&[]), DEFAULT_REGIONS);
    }
}
