//! Legacy job-control API (§6): a thin REST surface over the Scheduler for
//! clients that want to enqueue a download directly rather than going
//! through Torznab + the qBittorrent shim. Predates the magnet-based flow
//! and is kept for direct integrations that already speak it.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::domain::magnet::parse_magnet;
use crate::scheduler::EpisodeRequest;

use super::{ApiError, AppState};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/downloader/download", post(enqueue_download))
        .route("/jobs/{job_id}", get(get_job))
        .route("/jobs/{job_id}/events", get(job_events))
        .route("/jobs/{job_id}", delete(cancel_job))
}

#[derive(Debug, Deserialize)]
struct DownloadRequest {
    link: Option<String>,
    slug: Option<String>,
    season: Option<i32>,
    episode: Option<i32>,
    provider: Option<String>,
    #[serde(default)]
    language: Option<String>,
    title_hint: Option<String>,
}

#[derive(Serialize)]
struct EnqueueResponse {
    job_id: String,
}

#[derive(Serialize)]
struct JobStatusResponse {
    id: String,
    status: String,
    progress: f64,
    downloaded_bytes: i64,
    total_bytes: Option<i64>,
    speed: Option<f64>,
    eta: Option<i64>,
    message: Option<String>,
    result_path: Option<String>,
}

impl From<crate::entities::job::Model> for JobStatusResponse {
    fn from(job: crate::entities::job::Model) -> Self {
        Self {
            id: job.id,
            status: job.status,
            progress: job.progress,
            downloaded_bytes: job.downloaded_bytes,
            total_bytes: job.total_bytes,
            speed: job.speed,
            eta: job.eta,
            message: job.message,
            result_path: job.result_path,
        }
    }
}

async fn enqueue_download(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DownloadRequest>,
) -> Result<Json<EnqueueResponse>, ApiError> {
    let (episode_request, source_site) = build_request(req)?;
    let job_id = state
        .shared
        .scheduler
        .submit_download(episode_request, source_site)
        .await
        .map_err(ApiError::from)?;
    Ok(Json(EnqueueResponse { job_id }))
}

/// Turns a [`DownloadRequest`] into an [`EpisodeRequest`], either by decoding
/// a magnet `link` built by [`crate::domain::magnet::build_magnet`] or by
/// reading the identifiers directly off the body. `site` defaults to
/// `aniworld.to` when it can't be derived either way.
fn build_request(req: DownloadRequest) -> Result<(EpisodeRequest, String), ApiError> {
    if let Some(link) = req.link.filter(|l| !l.trim().is_empty()) {
        let decoded = parse_magnet(&link).map_err(|e| ApiError::BadRequest(e.to_string()))?;
        let site = decoded.site.clone();
        return Ok((
            EpisodeRequest {
                site: site.clone(),
                slug: decoded.slug,
                series_title: decoded.display_name,
                season: decoded.season,
                episode: decoded.episode,
                absolute_number: decoded.absolute_number,
                language: decoded.language,
                preferred_provider: decoded.provider,
                strm_mode: false,
            },
            site,
        ));
    }

    let slug = req
        .slug
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("slug is required when link is not given".to_string()))?;
    let season = req
        .season
        .ok_or_else(|| ApiError::BadRequest("season is required when link is not given".to_string()))?;
    let episode = req
        .episode
        .ok_or_else(|| ApiError::BadRequest("episode is required when link is not given".to_string()))?;

    let site = "aniworld.to".to_string();
    let language = req.language.filter(|l| !l.trim().is_empty()).unwrap_or_else(|| "German Dub".to_string());
    let provider = req.provider.filter(|p| !p.trim().is_empty()).or_else(|| Some("VOE".to_string()));
    let series_title = req
        .title_hint
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| format!("{slug}.S{season:02}E{episode:02}"));

    Ok((
        EpisodeRequest {
            site: site.clone(),
            slug,
            series_title,
            season,
            episode,
            absolute_number: None,
            language,
            preferred_provider: provider,
            strm_mode: false,
        },
        site,
    ))
}

async fn get_job(State(state): State<Arc<AppState>>, Path(job_id): Path<String>) -> Result<Json<JobStatusResponse>, ApiError> {
    let job = state
        .shared
        .store
        .jobs()
        .get(&job_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("job not found".to_string()))?;
    Ok(Json(job.into()))
}

/// Polls the job row every 500ms and emits an event only when the payload
/// changed since the last one sent, matching the original's diff-before-send
/// behaviour. Stops once the job reaches a terminal status, or emits a single
/// `error` event if the job vanished from the table entirely.
async fn job_events(State(state): State<Arc<AppState>>, Path(job_id): Path<String>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let store = state.shared.store.clone();

    let stream = stream::unfold((store, job_id, None::<String>, false), |(store, job_id, last, done)| async move {
        if done {
            return None;
        }
        loop {
            let job = match store.jobs().get(&job_id).await {
                Ok(Some(job)) => job,
                Ok(None) => {
                    let event = Event::default().event("error").data("not_found");
                    return Some((Ok(event), (store, job_id, last, true)));
                }
                Err(_) => {
                    let event = Event::default().event("error").data("not_found");
                    return Some((Ok(event), (store, job_id, last, true)));
                }
            };

            let status = job.status.clone();
            let payload = JobStatusResponse::from(job);
            let body = serde_json::to_string(&payload).unwrap_or_default();

            let terminal = matches!(status.as_str(), "completed" | "failed" | "cancelled");

            if last.as_deref() != Some(body.as_str()) {
                let event = Event::default().data(body.clone());
                return Some((Ok(event), (store, job_id, Some(body), terminal)));
            }

            if terminal {
                return None;
            }

            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Requests cancellation of a running job. `not-running` covers both "never
/// existed" and "already finished/was orphaned by a restart" — the scheduler
/// only tracks jobs claimed by a worker in this process.
async fn cancel_job(State(state): State<Arc<AppState>>, Path(job_id): Path<String>) -> Response {
    let cancelled = state.shared.scheduler.cancel(&job_id).await.unwrap_or(false);
    if cancelled {
        Json(json!({"status": "cancelling"})).into_response()
    } else {
        Json(json!({"status": "not-running"})).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_based_request_defaults_site_and_provider() {
        let req = DownloadRequest {
            link: None,
            slug: Some("my-show".to_string()),
            season: Some(1),
            episode: Some(3),
            provider: None,
            language: None,
            title_hint: None,
        };
        let (episode_request, site) = build_request(req).unwrap();
        assert_eq!(site, "aniworld.to");
        assert_eq!(episode_request.language, "German Dub");
        assert_eq!(episode_request.preferred_provider.as_deref(), Some("VOE"));
        assert_eq!(episode_request.series_title, "my-show.S01E03");
        assert!(!episode_request.strm_mode);
    }

    #[test]
    fn missing_slug_without_link_is_bad_request() {
        let req = DownloadRequest {
            link: None,
            slug: None,
            season: Some(1),
            episode: Some(1),
            provider: None,
            language: None,
            title_hint: None,
        };
        assert!(matches!(build_request(req), Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn title_hint_is_used_as_series_title_when_present() {
        let req = DownloadRequest {
            link: None,
            slug: Some("my-show".to_string()),
            season: Some(1),
            episode: Some(1),
            provider: Some("Filemoon".to_string()),
            language: Some("German Sub".to_string()),
            title_hint: Some("My Show".to_string()),
        };
        let (episode_request, _) = build_request(req).unwrap();
        assert_eq!(episode_request.series_title, "My Show");
        assert_eq!(episode_request.preferred_provider.as_deref(), Some("Filemoon"));
        assert_eq!(episode_request.language, "German Sub");
    }
}
