use std::collections::HashMap;
use std::sync::Arc;

use renta_core::{ListingRecord, RentaError, Result};
use tracing::info;

use crate::{InmoupClient, MendozapropClient, SearchCriteria, SourceClient};

type ClientFactory = Box<dyn Fn() -> Arc<dyn SourceClient> + Send + Sync>;

/// Maps source identifiers to client factories. Factories rather than live
/// singletons: every crawl gets a fresh client, which also scopes the
/// mendozaprop geocode cache to a single invocation.
pub struct SourceRegistry {
    factories: HashMap<String, ClientFactory>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry pre-populated with the two built-in sources.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("inmoup", || Arc::new(InmoupClient::new()));
        registry.register("mendozaprop", || Arc::new(MendozapropClient::new()));
        registry
    }

    /// Register a source at runtime. Identifiers are stored lower-cased so
    /// lookups are case-insensitive.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Arc<dyn SourceClient> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_lowercase(), Box::new(factory));
    }

    pub fn resolve(&self, source_id: &str) -> Result<Arc<dyn SourceClient>> {
        if source_id.trim().is_empty() {
            return Err(RentaError::UnsupportedSource(source_id.to_string()));
        }
        self.factories
            .get(&source_id.to_lowercase())
            .map(|factory| factory())
            .ok_or_else(|| RentaError::UnsupportedSource(source_id.to_string()))
    }

    pub fn source_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.factories.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Pipeline entry point: resolve the source and run one stateless crawl.
    pub async fn get_listings(
        &self,
        source_id: &str,
        criteria: &SearchCriteria,
    ) -> Result<Vec<ListingRecord>> {
        info!(
            "searching {}: property_type={} province={} cities={:?}",
            source_id, criteria.property_type, criteria.province, criteria.cities
        );
        let client = self.resolve(source_id)?;
        let records = client.fetch(criteria).await?;
        info!("{} returned {} records", source_id, records.len());
        Ok(records)
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// One-shot convenience over the default registry.
pub async fn get_listings(
    source_id: &str,
    criteria: &SearchCriteria,
) -> Result<Vec<ListingRecord>> {
    SourceRegistry::with_defaults()
        .get_listings(source_id, criteria)
        .await
}
