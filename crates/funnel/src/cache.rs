//! Per-website cache of compiled funnel definitions.

use std::sync::Arc;

use engine_core::{FunnelDefinitionStore, Result};
use moka::future::Cache;
use telemetry::metrics;
use tracing::{debug, warn};

use crate::config::FunnelConfig;
use crate::definition::FunnelDefinition;

pub type Definitions = Arc<Vec<FunnelDefinition>>;

/// Reads active funnels through a TTL cache.
///
/// Failed lookups are not cached. Funnels that fail to compile are logged
/// and left out; the website's other funnels still load.
pub struct DefinitionCache {
    store: Arc<dyn FunnelDefinitionStore>,
    cache: Cache<String, Definitions>,
}

impl DefinitionCache {
    pub fn new(store: Arc<dyn FunnelDefinitionStore>, config: &FunnelConfig) -> Self {
        Self {
            store,
            cache: Cache::builder()
                .max_capacity(config.cache_capacity)
                .time_to_live(config.cache_ttl())
                .build(),
        }
    }

    pub async fn get(&self, website_id: &str) -> Result<Definitions> {
        if let Some(cached) = self.cache.get(website_id).await {
            return Ok(cached);
        }

        let records = self.store.list_active_funnels(website_id).await?;
        let mut definitions = Vec::with_capacity(records.len());
        for record in records {
            let funnel_id = record.id;
            match FunnelDefinition::try_from(record) {
                Ok(definition) => definitions.push(definition),
                Err(e) => {
                    metrics().funnels.invalid_definitions.inc();
                    warn!(
                        website_id = website_id,
                        funnel_id = %funnel_id,
                        error = %e,
                        "Skipping invalid funnel definition"
                    );
                }
            }
        }

        debug!(
            website_id = website_id,
            funnels = definitions.len(),
            "Loaded funnel definitions"
        );

        let definitions = Arc::new(definitions);
        self.cache
            .insert(website_id.to_string(), definitions.clone())
            .await;
        Ok(definitions)
    }

    /// Forgets the cached definitions of a website.
    pub async fn invalidate(&self, website_id: &str) {
        self.cache.invalidate(website_id).await;
    }
}
