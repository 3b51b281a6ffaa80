//! Process-wide application state (§5 "Global mutable caches → process-wide
//! state with an init/teardown contract"). One [`SharedState`] is built at
//! startup, wrapped in `Arc`, and handed to both the Axum router and the
//! background services; nothing outside this module constructs its own copy
//! of the Title Index, Scheduler, or either proxy cache.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};

use crate::absolute_numbering::AbsoluteNumberingService;
use crate::availability::AvailabilityService;
use crate::config::Config;
use crate::db::Store;
use crate::metadata::MetadataService;
use crate::resolver::ProviderResolver;
use crate::scheduler::Scheduler;
use crate::sites::SiteRegistry;
use crate::specials::SpecialsMapper;
use crate::strm::proxy::cache::StrmUrlCache;
use crate::strm::proxy::remux::RemuxCache;
use crate::title_index::TitleIndex;

/// The qBittorrent shim's in-memory category map (§4.6 "Category endpoints
/// ... manipulate an in-memory map").
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct QbitCategory {
    pub name: String,
    pub save_path: String,
}

pub struct SharedState {
    pub config: Arc<RwLock<Config>>,
    pub store: Store,
    pub sites: Arc<SiteRegistry>,
    pub resolver: Arc<ProviderResolver>,
    pub availability: Arc<AvailabilityService>,
    pub title_index: Arc<TitleIndex>,
    pub scheduler: Arc<Scheduler>,
    pub specials: Arc<SpecialsMapper>,
    pub metadata: Arc<MetadataService>,
    pub absolute_numbering: Arc<AbsoluteNumberingService>,
    pub strm_cache: Arc<StrmUrlCache>,
    pub remux_cache: Arc<RemuxCache>,
    pub http_client: reqwest::Client,
    pub categories: Mutex<HashMap<String, QbitCategory>>,
    pub start_time: std::time::Instant,
    pub prometheus_handle: Option<metrics_exporter_prometheus::PrometheusHandle>,
}

impl SharedState {
    pub async fn new(
        config: Config,
        prometheus_handle: Option<metrics_exporter_prometheus::PrometheusHandle>,
    ) -> anyhow::Result<Self> {
        let store = Store::with_pool_options(&config.general.database_path, 5, 1).await?;

        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.outbound.connect_timeout_seconds))
            .timeout(Duration::from_secs(config.outbound.read_timeout_seconds))
            .build()
            .unwrap_or_default();

        let sites = Arc::new(SiteRegistry::new(config.provider.proxy_url.as_deref()));

        let resolver = Arc::new(ProviderResolver::new(
            sites.clone(),
            config.provider.order.clone(),
            config.provider.proxy_enabled,
        ));

        let availability = Arc::new(AvailabilityService::new(
            store.clone(),
            resolver.clone(),
            config.general.availability_ttl_hours as i64,
        ));

        // A single shared refresh interval across sites; per-site overrides
        // (`*_TITLES_REFRESH_HOURS`) are read by the per-site refresh loop in
        // `background`, this one only backs the lazy-refresh-on-lookup path.
        let refresh_hours = config
            .provider
            .titles_refresh_hours
            .values()
            .copied()
            .fold(0.0_f64, f64::max);
        let title_index = Arc::new(TitleIndex::new(
            sites.clone(),
            Duration::from_secs_f64((refresh_hours * 3600.0).max(0.0)),
        ));

        let config_arc = Arc::new(RwLock::new(config.clone()));

        let scheduler = Arc::new(Scheduler::new(
            store.clone(),
            config_arc.clone(),
            sites.clone(),
            resolver.clone(),
            config.general.max_concurrency,
            config.provider.proxy_url.as_deref(),
        ));

        let specials = Arc::new(SpecialsMapper::new(
            config.specials.metadata_enabled,
            config.specials.match_confidence_threshold,
            Duration::from_secs(config.specials.metadata_cache_ttl_minutes * 60),
        ));

        let metadata = Arc::new(MetadataService::new(
            config.specials.metadata_enabled,
            Duration::from_secs(config.specials.metadata_timeout_seconds),
            Duration::from_secs(config.specials.metadata_cache_ttl_minutes * 60),
        ));

        let absolute_numbering = Arc::new(AbsoluteNumberingService::new(store.clone()));

        let strm_cache = Arc::new(StrmUrlCache::new(Duration::from_secs(
            config.strm.proxy_cache_ttl_seconds.max(0) as u64,
        )));

        let remux_cache = Arc::new(RemuxCache::new(config.strm.clone()));

        Ok(Self {
            config: config_arc,
            store,
            sites,
            resolver,
            availability,
            title_index,
            scheduler,
            specials,
            metadata,
            absolute_numbering,
            strm_cache,
            remux_cache,
            http_client,
            categories: Mutex::new(HashMap::new()),
            start_time: std::time::Instant::now(),
            prometheus_handle,
        })
    }

    pub async fn config(&self) -> Config {
        self.config.read().await.clone()
    }
}
