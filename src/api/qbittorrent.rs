//! qBittorrent WebAPI v2 shim (§4.6): just enough of the surface for
//! Sonarr/Prowlarr to treat this process as a download client. No real
//! torrent/peer semantics exist — every field is synthesized from a [`Job`]
//! and its paired [`ClientTask`], keyed by the magnet's BTIH.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::constants::qbittorrent::{APP_VERSION, SESSION_COOKIE, WEBAPI_VERSION};
use crate::db::repositories::client_tasks::NewClientTask;
use crate::db::repositories::jobs::{
    STATUS_CANCELLED, STATUS_COMPLETED, STATUS_DOWNLOADING, STATUS_FAILED, STATUS_QUEUED,
};
use crate::domain::magnet::parse_magnet;
use crate::entities::client_task::Model as ClientTask;
use crate::entities::job::Model as Job;
use crate::scheduler::EpisodeRequest;
use crate::state::QbitCategory;

use super::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/v2/auth/login", post(login))
        .route("/api/v2/auth/logout", post(logout))
        .route("/api/v2/app/version", get(app_version))
        .route("/api/v2/app/webapiVersion", get(webapi_version))
        .route("/api/v2/app/buildInfo", get(build_info))
        .route("/api/v2/app/preferences", get(preferences))
        .route("/api/v2/torrents/categories", get(categories))
        .route("/api/v2/torrents/createCategory", post(create_category))
        .route("/api/v2/torrents/editCategory", post(edit_category))
        .route("/api/v2/torrents/removeCategories", post(remove_categories))
        .route("/api/v2/torrents/add", post(add_torrent))
        .route("/api/v2/torrents/info", get(torrents_info))
        .route("/api/v2/torrents/properties", get(torrent_properties))
        .route("/api/v2/torrents/files", get(torrent_files))
        .route("/api/v2/torrents/delete", get(delete_torrents).post(delete_torrents))
        .route("/api/v2/sync/maindata", get(sync_maindata))
        .route("/api/v2/transfer/info", get(transfer_info))
}

async fn login() -> Response {
    (
        [(axum::http::header::SET_COOKIE, format!("SID={SESSION_COOKIE}; HttpOnly; Path=/"))],
        "Ok.",
    )
        .into_response()
}

async fn logout() -> &'static str {
    "Ok."
}

async fn app_version() -> &'static str {
    APP_VERSION
}

async fn webapi_version() -> &'static str {
    WEBAPI_VERSION
}

async fn build_info() -> Json<Value> {
    Json(json!({
        "bitness": 64,
        "boost": "1.83.0",
        "libtorrent": "2.0.9",
        "openssl": "3.0.0",
        "qt": "6.5.0",
        "zlib": "1.3",
    }))
}

async fn preferences(State(state): State<Arc<AppState>>) -> Json<Value> {
    let config = state.shared.config().await;
    Json(json!({
        "save_path": config.general.download_dir.display().to_string(),
        "temp_path_enabled": false,
        "max_active_downloads": config.general.max_concurrency,
        "max_active_torrents": config.general.max_concurrency,
        "dht": false,
        "pex": false,
        "lsd": false,
    }))
}

#[derive(Debug, Deserialize)]
struct CategoryParams {
    category: Option<String>,
    #[serde(rename = "savePath")]
    save_path: Option<String>,
    categories: Option<String>,
}

async fn categories(State(state): State<Arc<AppState>>) -> Json<HashMap<String, Value>> {
    let categories = state.shared.categories.lock().await;
    Json(
        categories
            .values()
            .map(|c| {
                (
                    c.name.clone(),
                    json!({"name": c.name, "savePath": c.save_path}),
                )
            })
            .collect(),
    )
}

async fn create_category(State(state): State<Arc<AppState>>, axum::extract::Form(params): axum::extract::Form<CategoryParams>) -> &'static str {
    let Some(name) = params.category.filter(|n| !n.is_empty()) else {
        return "Ok.";
    };
    let save_path = params.save_path.unwrap_or_default();
    state.shared.categories.lock().await.insert(
        name.clone(),
        QbitCategory { name, save_path },
    );
    "Ok."
}

async fn edit_category(State(state): State<Arc<AppState>>, axum::extract::Form(params): axum::extract::Form<CategoryParams>) -> &'static str {
    create_category(State(state), axum::extract::Form(params)).await
}

async fn remove_categories(State(state): State<Arc<AppState>>, axum::extract::Form(params): axum::extract::Form<CategoryParams>) -> &'static str {
    if let Some(list) = params.categories {
        let mut categories = state.shared.categories.lock().await;
        for name in list.split('\n') {
            categories.remove(name.trim());
        }
    }
    "Ok."
}

#[derive(Debug, Deserialize)]
struct AddTorrentParams {
    urls: Option<String>,
    category: Option<String>,
    #[serde(rename = "savepath")]
    save_path: Option<String>,
}

async fn add_torrent(
    State(state): State<Arc<AppState>>,
    axum::extract::Form(params): axum::extract::Form<AddTorrentParams>,
) -> Response {
    let Some(urls) = params.urls.filter(|u| !u.trim().is_empty()) else {
        return (axum::http::StatusCode::BAD_REQUEST, "urls is required").into_response();
    };
    let Some(magnet) = urls.lines().map(str::trim).find(|l| !l.is_empty()) else {
        return (axum::http::StatusCode::BAD_REQUEST, "urls is required").into_response();
    };

    let decoded = match parse_magnet(magnet) {
        Ok(d) => d,
        Err(err) => return (axum::http::StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    };

    let series_title = decoded.display_name.clone();
    let request = EpisodeRequest {
        site: decoded.site.clone(),
        slug: decoded.slug.clone(),
        series_title: series_title.clone(),
        season: decoded.season,
        episode: decoded.episode,
        absolute_number: decoded.absolute_number,
        language: decoded.language.clone(),
        preferred_provider: decoded.provider.clone(),
        strm_mode: decoded.strm_mode,
    };

    let job_id = if decoded.strm_mode {
        state.shared.scheduler.submit_strm(request, decoded.site.clone()).await
    } else {
        state.shared.scheduler.submit_download(request, decoded.site.clone()).await
    };
    let job_id = match job_id {
        Ok(id) => id,
        Err(err) => return (axum::http::StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    };

    let save_path = match params.save_path {
        Some(path) => Some(path),
        None => match &params.category {
            Some(category) => state.shared.categories.lock().await.get(category).map(|c| c.save_path.clone()),
            None => None,
        },
    };

    let mode = if decoded.strm_mode { "strm" } else { "downloading" };
    let _ = state
        .shared
        .store
        .client_tasks()
        .upsert(NewClientTask {
            hash: decoded.info_hash.clone(),
            name: decoded.display_name.clone(),
            site: decoded.site,
            slug: decoded.slug,
            season: decoded.season,
            episode: decoded.episode,
            absolute_number: decoded.absolute_number,
            language: decoded.language,
            job_id: Some(job_id),
            save_path,
            category: params.category,
            state: mode.to_string(),
        })
        .await;

    "Ok.".into_response()
}

#[derive(Debug, Deserialize)]
struct InfoParams {
    hashes: Option<String>,
    category: Option<String>,
}

async fn torrents_info(State(state): State<Arc<AppState>>, Query(params): Query<InfoParams>) -> Json<Vec<Value>> {
    let mut tasks = if let Some(category) = params.category.filter(|c| !c.is_empty()) {
        state
            .shared
            .store
            .client_tasks()
            .list_by_category(&category)
            .await
            .unwrap_or_default()
    } else {
        state.shared.store.client_tasks().list().await.unwrap_or_default()
    };

    if let Some(hashes) = params.hashes.filter(|h| !h.is_empty() && h != "all") {
        let wanted: std::collections::HashSet<&str> = hashes.split('|').collect();
        tasks.retain(|t| wanted.contains(t.hash.as_str()));
    }

    let mut out = Vec::with_capacity(tasks.len());
    for task in tasks {
        out.push(project_task(&state, task).await);
    }
    Json(out)
}

async fn project_task(state: &Arc<AppState>, task: ClientTask) -> Value {
    let config = state.shared.config().await;
    let job = match &task.job_id {
        Some(id) => state.shared.store.jobs().get(id).await.ok().flatten(),
        None => None,
    };

    let (qbit_state, progress, size, eta, dlspeed) = project_job_state(job.as_ref()).await;

    let public_save_path = config.general.qbit_public_save_path.clone();
    let save_path = task
        .save_path
        .clone()
        .or(public_save_path)
        .unwrap_or_else(|| config.general.download_dir.display().to_string());
    let content_path = job
        .as_ref()
        .and_then(|j| j.result_path.clone())
        .map(|p| map_public_path(&config, &p))
        .unwrap_or_else(|| save_path.clone());

    // The Job's own status is the source of truth; mirror a first-time
    // completion into the ClientTask row so completion_on gets stamped once.
    let completion_on = if let Some(existing) = task.completion_on {
        existing.timestamp()
    } else if job.as_ref().is_some_and(|j| j.status.as_str() == STATUS_COMPLETED) {
        let _ = state.shared.store.client_tasks().set_state(&task.hash, STATUS_COMPLETED).await;
        chrono::Utc::now().timestamp()
    } else {
        -1
    };

    let mut entry = json!({
        "hash": task.hash,
        "name": task.name,
        "category": task.category.clone().unwrap_or_default(),
        "state": qbit_state,
        "progress": progress / 100.0,
        "size": size,
        "total_size": size,
        "dlspeed": dlspeed,
        "upspeed": 0,
        "eta": eta,
        "added_on": task.added_on.timestamp(),
        "completion_on": completion_on,
        "save_path": save_path,
        "content_path": content_path,
        "tags": "",
        "ratio": 0.0,
        "num_seeds": 0,
        "num_leechs": 0,
        "priority": 0,
        "amount_left": 0,
        "downloaded": size,
        "uploaded": 0,
        "auto_tmm": false,
    });

    if let Some(abs) = task.absolute_number {
        entry["anibridgeAbsolute"] = json!(abs);
    }
    entry
}

/// Projects a [`Job`]'s status into qBittorrent's state vocabulary
/// (§4.6): `downloading → downloading`, `completed → uploading` (signals
/// "done" without implying seeding activity), `failed → error`,
/// `cancelled → pausedDL`. For a completed job, `size` is read from
/// `result_path` on disk rather than the DB's `total_bytes`, since the
/// fetcher's own metadata may have omitted `Content-Length` for the upstream
/// it actually used.
async fn project_job_state(job: Option<&Job>) -> (&'static str, f64, i64, i64, i64) {
    let Some(job) = job else {
        return ("queuedDL", 0.0, 0, -1, 0);
    };
    let size = job.total_bytes.unwrap_or(job.downloaded_bytes).max(job.downloaded_bytes);
    let eta = job.eta.unwrap_or(-1);
    let speed = job.speed.unwrap_or(0.0) as i64;
    match job.status.as_str() {
        STATUS_QUEUED => ("queuedDL", 0.0, size, eta, speed),
        STATUS_DOWNLOADING => ("downloading", job.progress, size, eta, speed),
        STATUS_COMPLETED => ("uploading", 100.0, completed_size(job, size).await, -1, 0),
        STATUS_FAILED => ("error", job.progress, size, -1, 0),
        STATUS_CANCELLED => ("pausedDL", job.progress, size, -1, 0),
        _ => ("unknown", job.progress, size, eta, speed),
    }
}

/// Stats `job.result_path` for a completed job's true on-disk size,
/// falling back to the DB-reported size if the file is missing or the
/// path wasn't recorded (§4.6, original_source `torrents.py` `getsize`).
async fn completed_size(job: &Job, fallback: i64) -> i64 {
    let Some(path) = job.result_path.as_deref() else {
        return fallback;
    };
    match tokio::fs::metadata(path).await {
        Ok(meta) => i64::try_from(meta.len()).unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn map_public_path(config: &crate::config::Config, path: &str) -> String {
    match &config.general.qbit_public_save_path {
        Some(public_root) => {
            let download_root = config.general.download_dir.display().to_string();
            if let Some(rel) = path.strip_prefix(&download_root) {
                format!("{}{}", public_root.trim_end_matches('/'), rel)
            } else {
                path.to_string()
            }
        }
        None => path.to_string(),
    }
}

async fn torrent_properties(State(state): State<Arc<AppState>>, Query(params): Query<HashMap<String, String>>) -> Response {
    let Some(hash) = params.get("hash") else {
        return axum::http::StatusCode::BAD_REQUEST.into_response();
    };
    let Ok(Some(task)) = state.shared.store.client_tasks().get(hash).await else {
        return axum::http::StatusCode::NOT_FOUND.into_response();
    };
    let job = match &task.job_id {
        Some(id) => state.shared.store.jobs().get(id).await.ok().flatten(),
        None => None,
    };
    let (_, _, size, eta, dlspeed) = project_job_state(job.as_ref()).await;

    Json(json!({
        "save_path": task.save_path.unwrap_or_default(),
        "creation_date": task.added_on.timestamp(),
        "piece_size": 0,
        "comment": "",
        "total_size": size,
        "dl_speed": dlspeed,
        "up_speed": 0,
        "eta": eta,
        "nb_connections": 1,
        "share_ratio": 0.0,
    }))
    .into_response()
}

async fn torrent_files(State(state): State<Arc<AppState>>, Query(params): Query<HashMap<String, String>>) -> Response {
    let Some(hash) = params.get("hash") else {
        return axum::http::StatusCode::BAD_REQUEST.into_response();
    };
    let Ok(Some(task)) = state.shared.store.client_tasks().get(hash).await else {
        return axum::http::StatusCode::NOT_FOUND.into_response();
    };
    let job = match &task.job_id {
        Some(id) => state.shared.store.jobs().get(id).await.ok().flatten(),
        None => None,
    };
    let name = job
        .as_ref()
        .and_then(|j| j.result_path.as_deref())
        .and_then(|p| Path::new(p).file_name())
        .and_then(|n| n.to_str())
        .unwrap_or(&task.name)
        .to_string();
    let size = job.as_ref().and_then(|j| j.total_bytes).unwrap_or(0);

    Json(vec![json!({
        "index": 0,
        "name": name,
        "size": size,
        "progress": 1.0,
        "priority": 1,
        "is_seed": true,
        "piece_range": [0, 0],
        "availability": 1.0,
    })])
    .into_response()
}

#[derive(Debug, Deserialize)]
struct DeleteParams {
    hashes: String,
    #[serde(rename = "deleteFiles")]
    delete_files: Option<bool>,
}

async fn delete_torrents(State(state): State<Arc<AppState>>, Query(params): Query<DeleteParams>) -> &'static str {
    let hashes: Vec<String> = params.hashes.split('|').map(str::to_string).collect();
    for hash in &hashes {
        if let Ok(Some(task)) = state.shared.store.client_tasks().get(hash).await {
            if let Some(job_id) = &task.job_id {
                let _ = state.shared.scheduler.cancel(job_id).await;
            }
            if params.delete_files.unwrap_or(false) {
                if let Ok(Some(job)) = match &task.job_id {
                    Some(id) => state.shared.store.jobs().get(id).await,
                    None => Ok(None),
                } {
                    if let Some(result_path) = job.result_path {
                        let path = Path::new(&result_path);
                        if tokio::fs::remove_file(path).await.is_ok() {
                            if let Some(parent) = path.parent() {
                                let _ = tokio::fs::remove_dir(parent).await;
                            }
                        }
                    }
                }
            }
        }
    }
    let _ = state.shared.store.client_tasks().delete(&hashes).await;
    "Ok."
}

async fn sync_maindata(State(state): State<Arc<AppState>>, Query(params): Query<HashMap<String, String>>) -> Json<Value> {
    let rid: i64 = params.get("rid").and_then(|r| r.parse().ok()).unwrap_or(0);
    let tasks = state.shared.store.client_tasks().list().await.unwrap_or_default();
    let mut torrents = serde_json::Map::new();
    for task in tasks {
        let hash = task.hash.clone();
        torrents.insert(hash, project_task(&state, task).await);
    }

    let categories = state.shared.categories.lock().await;
    let categories_json: serde_json::Map<String, Value> = categories
        .values()
        .map(|c| (c.name.clone(), json!({"name": c.name, "savePath": c.save_path})))
        .collect();

    Json(json!({
        "rid": rid + 1,
        "full_update": true,
        "torrents": torrents,
        "categories": categories_json,
        "tags": [],
        "server_state": {
            "connection_status": "connected",
            "dl_info_speed": 0,
            "up_info_speed": 0,
            "free_space_on_disk": 0,
            "queueing": false,
            "use_alt_speed_limits": false,
        },
    }))
}

async fn transfer_info(State(state): State<Arc<AppState>>) -> Json<Value> {
    let uptime = state.shared.start_time.elapsed().as_secs();
    Json(json!({
        "connection_status": "connected",
        "dl_info_speed": 0,
        "dl_info_data": 0,
        "up_info_speed": 0,
        "up_info_data": 0,
        "dl_rate_limit": 0,
        "up_rate_limit": 0,
        "queueing": false,
        "use_alt_speed_limits": false,
        "uptime": uptime,
    }))
}

#[allow(dead_code)]
fn serialize_category(c: &QbitCategory) -> Value {
    json!({"name": c.name, "savePath": c.save_path})
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::jobs::STATUS_COMPLETED as COMPLETED;

    #[tokio::test]
    async fn project_job_state_maps_vocabulary() {
        let mut job = job_fixture();
        job.status = STATUS_DOWNLOADING.to_string();
        assert_eq!(project_job_state(Some(&job)).await.0, "downloading");

        job.status = COMPLETED.to_string();
        assert_eq!(project_job_state(Some(&job)).await.0, "uploading");

        job.status = STATUS_FAILED.to_string();
        assert_eq!(project_job_state(Some(&job)).await.0, "error");

        job.status = STATUS_CANCELLED.to_string();
        assert_eq!(project_job_state(Some(&job)).await.0, "pausedDL");
    }

    #[tokio::test]
    async fn missing_job_reports_queued() {
        assert_eq!(project_job_state(None).await.0, "queuedDL");
    }

    #[tokio::test]
    async fn completed_job_size_comes_from_result_file() {
        let dir = std::env::temp_dir().join(format!("anibridge-qbit-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let file_path = dir.join("episode.mkv");
        std::fs::write(&file_path, vec![0u8; 42]).unwrap();

        let mut job = job_fixture();
        job.status = COMPLETED.to_string();
        job.total_bytes = Some(999);
        job.result_path = Some(file_path.to_string_lossy().to_string());

        let (_, _, size, _, _) = project_job_state(Some(&job)).await;
        assert_eq!(size, 42);

        std::fs::remove_dir_all(&dir).ok();
    }

    fn job_fixture() -> Job {
        Job {
            id: "abc".to_string(),
            status: STATUS_QUEUED.to_string(),
            mode: "download".to_string(),
            source_site: None,
            progress: 0.0,
            downloaded_bytes: 0,
            total_bytes: Some(1000),
            speed: None,
            eta: None,
            message: None,
            result_path: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }
}
