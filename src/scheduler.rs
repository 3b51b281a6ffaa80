//! Job Store & Scheduler (§4.7): a bounded worker pool that turns a
//! submitted download or STRM request into a tracked [`crate::entities::job`]
//! row, from `queued` through to a terminal state. Submission always returns
//! immediately with a Job id; the actual work happens on a spawned task
//! gated by a semaphore sized to `MAX_CONCURRENCY`.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, RwLock, Semaphore, broadcast};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{Config, StrmProxyMode};
use crate::db::Store;
use crate::domain::errors::DownloadError;
use crate::domain::naming::{ReleaseNameSpec, build_release_name};
use crate::fetcher::{self, FetchOptions};
use crate::resolver::ProviderResolver;
use crate::sites::{DualClient, SiteRegistry};
use crate::strm::proxy::auth::build_auth_params;
use crate::strm::writer;

/// One request to resolve and materialize an episode, either as a real
/// download or as a `.strm` pointer file.
#[derive(Debug, Clone)]
pub struct EpisodeRequest {
    pub site: String,
    pub slug: String,
    pub series_title: String,
    pub season: i32,
    pub episode: i32,
    pub absolute_number: Option<i32>,
    pub language: String,
    pub preferred_provider: Option<String>,
    pub strm_mode: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobEvent {
    pub id: String,
    pub status: String,
    pub progress: f64,
    pub downloaded_bytes: i64,
    pub total_bytes: Option<i64>,
    pub speed: Option<f64>,
    pub eta: Option<i64>,
    pub message: Option<String>,
    pub result_path: Option<String>,
}

struct RunningJob {
    cancel: Arc<AtomicBool>,
}

/// Owns the semaphore-bounded worker pool, the in-flight `RUNNING` registry,
/// and a best-effort per-job SSE broadcast channel used by the legacy job
/// control API (§6).
pub struct Scheduler {
    store: Store,
    config: Arc<RwLock<Config>>,
    sites: Arc<SiteRegistry>,
    resolver: Arc<ProviderResolver>,
    client: DualClient,
    semaphore: Arc<Semaphore>,
    running: Mutex<HashMap<String, RunningJob>>,
    events: Mutex<HashMap<String, broadcast::Sender<JobEvent>>>,
}

impl Scheduler {
    #[must_use]
    pub fn new(
        store: Store,
        config: Arc<RwLock<Config>>,
        sites: Arc<SiteRegistry>,
        resolver: Arc<ProviderResolver>,
        max_concurrency: usize,
        proxy_url: Option<&str>,
    ) -> Self {
        Self {
            store,
            config,
            sites,
            resolver,
            client: DualClient::new(proxy_url),
            semaphore: Arc::new(Semaphore::new(max_concurrency.max(1))),
            running: Mutex::new(HashMap::new()),
            events: Mutex::new(HashMap::new()),
        }
    }

    /// Startup recovery sweep: jobs left `queued`/`downloading` by a previous
    /// process are orphaned, since nothing is driving them anymore. Must run
    /// before any worker is allowed to start.
    pub async fn recover_and_start(&self) -> anyhow::Result<u64> {
        let recovered = self.store.jobs().recover_interrupted().await?;
        if recovered > 0 {
            warn!(count = recovered, "recovered jobs interrupted by restart");
        }
        Ok(recovered)
    }

    /// Subscribes to a job's progress stream, creating the broadcast channel
    /// lazily if this is the first subscriber.
    pub async fn subscribe(&self, job_id: &str) -> broadcast::Receiver<JobEvent> {
        let mut events = self.events.lock().await;
        events
            .entry(job_id.to_string())
            .or_insert_with(|| broadcast::channel(32).0)
            .subscribe()
    }

    pub async fn submit_download(&self, req: EpisodeRequest, source_site: String) -> anyhow::Result<String> {
        self.submit(req, source_site, "download").await
    }

    pub async fn submit_strm(&self, req: EpisodeRequest, source_site: String) -> anyhow::Result<String> {
        self.submit(req, source_site, "strm").await
    }

    async fn submit(&self, req: EpisodeRequest, source_site: String, mode: &str) -> anyhow::Result<String> {
        let id = Uuid::new_v4().simple().to_string();
        self.store.jobs().create(&id, mode, Some(source_site)).await?;

        let cancel = Arc::new(AtomicBool::new(false));
        self.running
            .lock()
            .await
            .insert(id.clone(), RunningJob { cancel: cancel.clone() });

        let store = self.store.clone();
        let config = self.config.clone();
        let sites = self.sites.clone();
        let resolver = self.resolver.clone();
        let client = self.client.clone();
        let job_id = id.clone();
        let strm_mode = req.strm_mode;

        let permit = self.semaphore.clone();
        let events = self.clone_event_sender(&job_id).await;

        tokio::spawn(async move {
            let _permit = permit.acquire_owned().await;
            let result = if strm_mode {
                run_strm_job(&store, &config, &sites, &resolver, &job_id, &req, &cancel, &events).await
            } else {
                run_download_job(
                    &store, &config, &client, &resolver, &job_id, &req, &cancel, &events,
                )
                .await
            };

            match result {
                Ok(path) => {
                    info!(job = %job_id, path = %path, "job completed");
                    let _ = store.jobs().complete(&job_id, path).await;
                    emit_terminal(&events, &job_id, "completed", None, None).await;
                }
                Err(err) if err.is_cancelled() => {
                    info!(job = %job_id, "job cancelled");
                    let _ = store.jobs().cancel(&job_id, "Cancelled by user".to_string()).await;
                    emit_terminal(&events, &job_id, "cancelled", Some("Cancelled by user".to_string()), None).await;
                }
                Err(DownloadError::FilesystemPermission(msg)) => {
                    error!(job = %job_id, error = %msg, "job failed: filesystem permission");
                    let message = format!("Filesystem error: {msg}");
                    let _ = store.jobs().fail(&job_id, message.clone()).await;
                    emit_terminal(&events, &job_id, "failed", Some(message), None).await;
                }
                Err(err) => {
                    error!(job = %job_id, error = %err, "job failed");
                    let message = err.to_string();
                    let _ = store.jobs().fail(&job_id, message.clone()).await;
                    emit_terminal(&events, &job_id, "failed", Some(message), None).await;
                }
            }
        });

        Ok(id)
    }

    async fn clone_event_sender(&self, job_id: &str) -> broadcast::Sender<JobEvent> {
        let mut events = self.events.lock().await;
        events
            .entry(job_id.to_string())
            .or_insert_with(|| broadcast::channel(32).0)
            .clone()
    }

    /// Signals cancellation and marks the job cancelled if it hasn't already
    /// reached a terminal state. Returns `false` if the job was never tracked
    /// by this process (e.g. after a restart, before any worker claims it).
    pub async fn cancel(&self, job_id: &str) -> anyhow::Result<bool> {
        let found = {
            let running = self.running.lock().await;
            if let Some(job) = running.get(job_id) {
                job.cancel.store(true, Ordering::SeqCst);
                true
            } else {
                false
            }
        };
        if !found {
            return Ok(false);
        }
        Ok(true)
    }

    /// Shuts down the pool: signals every tracked job to cancel and drops the
    /// registry without waiting for workers to finish (§5 shutdown policy).
    pub async fn shutdown(&self) {
        let running = self.running.lock().await;
        for job in running.values() {
            job.cancel.store(true, Ordering::SeqCst);
        }
    }
}

async fn emit_terminal(
    events: &broadcast::Sender<JobEvent>,
    id: &str,
    status: &str,
    message: Option<String>,
    result_path: Option<String>,
) {
    let _ = events.send(JobEvent {
        id: id.to_string(),
        status: status.to_string(),
        progress: if status == "completed" { 100.0 } else { 0.0 },
        downloaded_bytes: 0,
        total_bytes: None,
        speed: None,
        eta: None,
        message,
        result_path,
    });
}

#[allow(clippy::too_many_arguments)]
async fn run_download_job(
    store: &Store,
    config: &Arc<RwLock<Config>>,
    client: &DualClient,
    resolver: &Arc<ProviderResolver>,
    job_id: &str,
    req: &EpisodeRequest,
    cancel: &Arc<AtomicBool>,
    events: &broadcast::Sender<JobEvent>,
) -> Result<String, DownloadError> {
    let stream = resolver
        .resolve(
            &req.site,
            &req.slug,
            req.season,
            req.episode,
            &req.language,
            req.preferred_provider.as_deref(),
        )
        .await?;

    let (download_dir, source_tag, release_group, rate_limit) = {
        let cfg = config.read().await;
        (
            cfg.general.download_dir.clone(),
            cfg.general.source_tag.clone(),
            cfg.general.release_group.clone(),
            cfg.strm.download_rate_limit_bytes_per_sec,
        )
    };

    let temp_path = download_dir.join("tmp").join(format!("{job_id}.download"));
    let job_id_owned = job_id.to_string();
    let events_owned = events.clone();
    let store_owned = store.clone();
    let last_reported = std::sync::Mutex::new(-1.0_f64);

    let options = FetchOptions {
        rate_limit_bytes_per_sec: rate_limit,
        timeout: Duration::from_secs(3600),
    };

    fetcher::fetch_to_file(
        client.pick(stream.via_proxy),
        &stream.direct_url,
        &temp_path,
        cancel,
        &options,
        move |progress| {
        let total = progress.total_bytes.unwrap_or(0).max(1) as f64;
        let pct = (progress.downloaded_bytes as f64 / total * 100.0).clamp(0.0, 99.0);
        let mut last = last_reported.lock().unwrap();
        if pct - *last < 1.0 {
            debug!(job = %job_id_owned, pct, "progress tick (throttled)");
            return;
        }
        *last = pct;
        let job_id_inner = job_id_owned.clone();
        let store_inner = store_owned.clone();
        let downloaded = progress.downloaded_bytes as i64;
        let total_bytes = progress.total_bytes.map(|t| t as i64);
        let speed = progress.speed_bytes_per_sec;
        let eta = progress.eta_seconds;
        let _ = events_owned.send(JobEvent {
            id: job_id_owned.clone(),
            status: "downloading".to_string(),
            progress: pct,
            downloaded_bytes: downloaded,
            total_bytes,
            speed,
            eta,
            message: None,
            result_path: None,
        });
        info!(job = %job_id_owned, pct, "progress");
        tokio::spawn(async move {
            let _ = store_inner
                .jobs()
                .update_progress(&job_id_inner, pct, downloaded, total_bytes, speed, eta, None)
                .await;
        });
    })
    .await?;

    let (height, vcodec) = fetcher::probe_media(&temp_path).await.unwrap_or((None, None));

    let release_name = build_release_name(&ReleaseNameSpec {
        series_title: &req.series_title,
        season: Some(req.season),
        episode: Some(req.episode),
        absolute_number: req.absolute_number,
        height,
        vcodec: vcodec.as_deref(),
        language: &req.language,
        source_tag: &source_tag,
        release_group: &release_group,
    });

    let ext = extension_from_url(&stream.direct_url).unwrap_or_else(|| "mp4".to_string());
    let final_path = download_dir.join(format!("{release_name}.{ext}"));

    tokio::fs::rename(&temp_path, &final_path)
        .await
        .map_err(|e| DownloadError::FilesystemPermission(e.to_string()))?;

    let _ = store
        .availability()
        .upsert(crate::db::repositories::availability::AvailabilityRecord {
            site: req.site.clone(),
            slug: req.slug.clone(),
            season: req.season,
            episode: req.episode,
            language: req.language.clone(),
            available: true,
            height,
            vcodec: vcodec.clone(),
            provider: Some(stream.provider.clone()),
            extra: None,
        })
        .await;

    Ok(final_path.display().to_string())
}

fn extension_from_url(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let ext = std::path::Path::new(path).extension().and_then(|e| e.to_str())?;
    if ext.len() <= 4 && ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        Some(ext.to_lowercase())
    } else {
        None
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_strm_job(
    store: &Store,
    config: &Arc<RwLock<Config>>,
    _sites: &Arc<SiteRegistry>,
    resolver: &Arc<ProviderResolver>,
    job_id: &str,
    req: &EpisodeRequest,
    _cancel: &Arc<AtomicBool>,
    events: &broadcast::Sender<JobEvent>,
) -> Result<String, DownloadError> {
    let stream = resolver
        .resolve(
            &req.site,
            &req.slug,
            req.season,
            req.episode,
            &req.language,
            req.preferred_provider.as_deref(),
        )
        .await?;

    let _ = store
        .strm_mappings()
        .upsert(
            crate::db::repositories::strm_mappings::StrmMappingKey {
                site: &req.site,
                slug: &req.slug,
                season: req.season,
                episode: req.episode,
                language: &req.language,
                provider: &stream.provider,
            },
            stream.direct_url.clone(),
        )
        .await;

    let (download_dir, proxy_mode, proxy_auth, proxy_secret, token_ttl, public_base_url) = {
        let cfg = config.read().await;
        (
            cfg.general.download_dir.clone(),
            cfg.strm.proxy_mode,
            cfg.strm.proxy_auth,
            cfg.strm.proxy_secret.clone(),
            cfg.strm.proxy_token_ttl_seconds,
            cfg.strm.public_base_url.clone(),
        )
    };

    let path = writer::allocate_path(&download_dir, &req.series_title, req.season, req.episode)
        .await
        .map_err(DownloadError::Upstream)?;

    let url = match proxy_mode {
        StrmProxyMode::Direct => stream.direct_url.clone(),
        StrmProxyMode::Proxy => {
            let mut params = std::collections::BTreeMap::new();
            params.insert("site".to_string(), req.site.clone());
            params.insert("slug".to_string(), req.slug.clone());
            params.insert("s".to_string(), req.season.to_string());
            params.insert("e".to_string(), req.episode.to_string());
            params.insert("lang".to_string(), req.language.clone());
            params.insert("provider".to_string(), stream.provider.clone());

            let auth_params = build_auth_params(proxy_auth, proxy_secret.as_deref(), token_ttl, &params)
                .map_err(|e| DownloadError::Upstream(anyhow::anyhow!(e)))?;
            params.extend(auth_params);

            let query = params
                .into_iter()
                .map(|(k, v)| format!("{}={}", k, urlencoding::encode(&v)))
                .collect::<Vec<_>>()
                .join("&");
            format!("{public_base_url}/strm/stream?{query}")
        }
    };

    writer::write_strm(&path, &url).await.map_err(DownloadError::Upstream)?;

    let _ = events.send(JobEvent {
        id: job_id.to_string(),
        status: "completed".to_string(),
        progress: 100.0,
        downloaded_bytes: 0,
        total_bytes: None,
        speed: None,
        eta: None,
        message: None,
        result_path: Some(path.display().to_string()),
    });

    Ok(path.display().to_string())
}
