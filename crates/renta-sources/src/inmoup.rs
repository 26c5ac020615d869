use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use renta_core::enrich::{absolutize, field_string, has_geolocation, parse_flag, split_images, value_string};
use renta_core::{ListingRecord, ListingSource, RentaError, Result, UpstreamCause, MAX_ADDITIONAL_IMAGES};
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::browser::{DomRenderer, HeadlessChrome};
use crate::fetch::{HttpFetcher, PageFetcher};
use crate::{SearchCriteria, SourceClient};

const ORIGIN: &str = "https://inmoup.com.ar";
/// Image the site serves for listings that have not uploaded photos yet.
pub const PLACEHOLDER_IMAGE: &str = "https://inmoup.com.ar/images/sin-imagen.jpg";
const DEFAULT_CITY_IDS: &str = "1%2C2%2C7%2C19";
/// Inline script assignment holding the preloaded listing array. Richer
/// than the cards, so it is preferred when present.
const EMBEDDED_LISTINGS_PATTERN: &str = r"(?s)var\s+preloadedListings\s*=\s*(\[.*?\])\s*;";

/// Extraction tactics in escalation order, cheapest first. Adding a tactic
/// means extending this list and the match in `run_tactic`.
#[derive(Debug, Clone, Copy)]
enum FetchTactic {
    LightweightFetch,
    BrowserRender,
}

const FETCH_TACTICS: [FetchTactic; 2] = [FetchTactic::LightweightFetch, FetchTactic::BrowserRender];

pub struct InmoupClient {
    fetcher: Arc<dyn PageFetcher>,
    renderer: Arc<dyn DomRenderer>,
}

impl InmoupClient {
    pub fn new() -> Self {
        Self::with_parts(Arc::new(HttpFetcher::new()), Arc::new(HeadlessChrome::new()))
    }

    /// Construct with injected fetch/render capabilities.
    pub fn with_parts(fetcher: Arc<dyn PageFetcher>, renderer: Arc<dyn DomRenderer>) -> Self {
        Self { fetcher, renderer }
    }

    fn search_url(criteria: &SearchCriteria) -> String {
        let prop_type = if criteria.property_type.to_lowercase().contains("depart") {
            "departamentos-en-alquiler"
        } else {
            "casas-en-alquiler"
        };

        let mut url = format!(
            "{}/{}?favoritos=0&limit=10000&prevEstadoMap=&ordenar=recientes",
            ORIGIN, prop_type
        );
        if criteria.cities.is_empty() {
            url.push_str(&format!("&localidades={}", DEFAULT_CITY_IDS));
        } else {
            url.push_str(&format!("&localidades={}", criteria.cities.join("%2C")));
        }
        url.push_str(
            "&lastZoom=13&precio%5Bmin%5D=&precio%5Bmax%5D=&moneda=1\
             &sup_cubierta%5Bmin%5D=&sup_cubierta%5Bmax%5D=\
             &sup_total%5Bmin%5D=&sup_total%5Bmax%5D=&recientes=mes",
        );
        url
    }

    async fn run_tactic(&self, tactic: FetchTactic, url: &str) -> Result<String> {
        match tactic {
            FetchTactic::LightweightFetch => self.fetcher.get(url).await,
            FetchTactic::BrowserRender => self.renderer.render(url).await,
        }
    }

    /// Try each tactic in order, escalating only on transport-level
    /// failure. Non-transport errors abort immediately.
    async fn page_html(&self, url: &str) -> Result<String> {
        let mut last_error = None;
        for tactic in FETCH_TACTICS {
            match self.run_tactic(tactic, url).await {
                Ok(html) => {
                    debug!("{:?} succeeded for {}", tactic, url);
                    return Ok(html);
                }
                Err(err @ RentaError::SourceUnavailable { .. }) => {
                    warn!("{:?} failed for {}: {}", tactic, url, err);
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_error.unwrap_or_else(|| RentaError::SourceUnavailable {
            cause: UpstreamCause::Connection,
            message: format!("all fetch tactics exhausted for {}", url),
        }))
    }

    fn parse_selector(selector: &str) -> Result<Selector> {
        Selector::parse(selector).map_err(|e| RentaError::Extraction(e.to_string()))
    }

    /// Dual extraction shared by both fetch tactics: embedded JSON first,
    /// DOM cards as fallback.
    fn extract_listings(html: &str) -> Result<Vec<ListingRecord>> {
        if let Some(records) = Self::extract_embedded(html)? {
            info!("extracted {} listings from embedded JSON", records.len());
            return Ok(records);
        }
        Self::extract_cards(html)
    }

    fn extract_embedded(html: &str) -> Result<Option<Vec<ListingRecord>>> {
        let pattern = regex::Regex::new(EMBEDDED_LISTINGS_PATTERN)
            .map_err(|e| RentaError::Extraction(e.to_string()))?;
        let Some(captures) = pattern.captures(html) else {
            return Ok(None);
        };

        let raw: Vec<Value> = match serde_json::from_str(&captures[1]) {
            Ok(items) => items,
            Err(err) => {
                warn!("embedded listing blob did not parse as JSON: {}", err);
                return Ok(None);
            }
        };

        let mut records = Vec::with_capacity(raw.len());
        for item in &raw {
            match Self::record_from_embedded(item) {
                Ok(record) => records.push(record),
                Err(err) => error!("skipping embedded listing: {}", err),
            }
        }
        Ok(Some(records))
    }

    fn record_from_embedded(item: &Value) -> Result<ListingRecord> {
        if !item.is_object() {
            return Err(RentaError::Extraction(
                "embedded listing entry is not an object".to_string(),
            ));
        }

        let latitude = field_string(item, "lat");
        let longitude = field_string(item, "lng");

        let gallery: Vec<String> = item
            .get("fotos")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .map(value_string)
                    .filter(|src| !src.is_empty())
                    .map(|src| absolutize(ORIGIN, &src))
                    .collect()
            })
            .unwrap_or_default();
        let direct = field_string(item, "foto");
        let primary = if direct.is_empty() {
            String::new()
        } else {
            absolutize(ORIGIN, &direct)
        };
        let (primary_image, additional_images) = split_images(&primary, gallery, MAX_ADDITIONAL_IMAGES);

        Ok(ListingRecord {
            id: field_string(item, "kid"),
            price: field_string(item, "precio"),
            address: field_string(item, "direccion"),
            primary_image,
            additional_images,
            bedrooms: field_string(item, "ser_1"),
            bathrooms: field_string(item, "ser_2"),
            total_area: field_string(item, "sup_t"),
            covered_area: field_string(item, "sup_c"),
            has_parking: parse_flag(&field_string(item, "ser_3")),
            listing_url: absolutize(ORIGIN, &field_string(item, "url")),
            has_geolocation: has_geolocation(&latitude, &longitude),
            latitude,
            longitude,
            description: field_string(item, "descripcion"),
            source: ListingSource::Inmoup,
        })
    }

    fn extract_cards(html: &str) -> Result<Vec<ListingRecord>> {
        let document = Html::parse_document(html);
        let card_selector = Self::parse_selector("article")?;

        let mut records = Vec::new();
        for card in document.select(&card_selector) {
            match Self::record_from_card(card) {
                Ok(record) => records.push(record),
                Err(err) => error!("skipping listing card: {}", err),
            }
        }
        info!("extracted {} listings from DOM cards", records.len());
        Ok(records)
    }

    fn attr(card: ElementRef, name: &str) -> String {
        card.value().attr(name).unwrap_or_default().trim().to_string()
    }

    fn record_from_card(card: ElementRef) -> Result<ListingRecord> {
        let address_selector = Self::parse_selector("div.property-data")?;
        let image_selector = Self::parse_selector("img")?;
        let gallery_selector = Self::parse_selector(".fotos-ficha")?;
        let scoped_selector = Self::parse_selector(r#"[itemscope="photo"]"#)?;
        let link_selector = Self::parse_selector("a.cont-photo")?;

        let listing_url = card
            .select(&link_selector)
            .next()
            .and_then(|el| el.value().attr("href"))
            .map(|href| absolutize(ORIGIN, href))
            .ok_or_else(|| RentaError::Extraction("listing card without a detail link".to_string()))?;

        let address = card
            .select(&address_selector)
            .next()
            .map(|el| el.text().collect::<String>())
            .map(|text| text.trim().replace("\n\n", ", "))
            .unwrap_or_default();

        let primary = card
            .select(&image_selector)
            .next()
            .and_then(|el| el.value().attr("src"))
            .map(|src| absolutize(ORIGIN, src))
            .unwrap_or_default();

        let mut gallery: Vec<String> = card
            .select(&gallery_selector)
            .filter_map(|el| el.value().attr("src"))
            .map(|src| absolutize(ORIGIN, src))
            .collect();
        if gallery.is_empty() {
            gallery = card
                .select(&scoped_selector)
                .filter_map(|el| el.value().attr("src"))
                .map(|src| absolutize(ORIGIN, src))
                .collect();
        }

        let latitude = Self::attr(card, "lat");
        let longitude = Self::attr(card, "lng");
        let (primary_image, additional_images) = split_images(&primary, gallery, MAX_ADDITIONAL_IMAGES);

        Ok(ListingRecord {
            id: Self::attr(card, "kid"),
            price: Self::attr(card, "precio"),
            address,
            primary_image,
            additional_images,
            bedrooms: Self::attr(card, "ser_1"),
            bathrooms: Self::attr(card, "ser_2"),
            total_area: Self::attr(card, "sup_t"),
            covered_area: Self::attr(card, "sup_c"),
            has_parking: parse_flag(&Self::attr(card, "ser_3")),
            listing_url,
            has_geolocation: has_geolocation(&latitude, &longitude),
            latitude,
            longitude,
            description: String::new(),
            source: ListingSource::Inmoup,
        })
    }

    /// Visit each listing page and pull real image URLs out of its
    /// carousel. Keyed by record id so the caller can splice them in.
    async fn harvest_replacements(
        &self,
        records: &[ListingRecord],
    ) -> Result<HashMap<String, (String, Vec<String>)>> {
        let mut replacements = HashMap::new();
        for record in records {
            let harvested = self
                .renderer
                .collect_listing_images(&record.listing_url, MAX_ADDITIONAL_IMAGES + 1)
                .await
                .map_err(|e| RentaError::Enhancement(e.to_string()))?;
            if harvested.is_empty() {
                continue;
            }
            let absolute: Vec<String> = harvested
                .into_iter()
                .map(|src| absolutize(ORIGIN, &src))
                .collect();
            replacements.insert(record.id.clone(), split_images("", absolute, MAX_ADDITIONAL_IMAGES));
        }
        Ok(replacements)
    }

    async fn enhance_images(&self, records: &mut [ListingRecord]) {
        info!(
            "all {} primary images are the placeholder, running enhancement pass",
            records.len()
        );
        match self.harvest_replacements(records).await {
            Ok(replacements) => {
                for record in records.iter_mut() {
                    if let Some((primary, additional)) = replacements.get(&record.id) {
                        record.primary_image = primary.clone();
                        record.additional_images = additional.clone();
                    }
                }
            }
            // Non-fatal: the already-produced records keep their
            // placeholder images.
            Err(err) => warn!("{}", err),
        }
    }
}

impl Default for InmoupClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceClient for InmoupClient {
    async fn fetch(&self, criteria: &SearchCriteria) -> Result<Vec<ListingRecord>> {
        let url = Self::search_url(criteria);
        info!("fetching inmoup listings: {}", url);

        let html = self.page_html(&url).await?;
        let mut records = match Self::extract_listings(&html) {
            Ok(records) => records,
            Err(err) => {
                error!("listing extraction failed: {}", err);
                Vec::new()
            }
        };

        let all_placeholders = !records.is_empty()
            && records.iter().all(|r| r.primary_image == PLACEHOLDER_IMAGE);
        if all_placeholders {
            self.enhance_images(&mut records).await;
        }

        Ok(records)
    }
}
