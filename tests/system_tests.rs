//! Job persistence and restart-recovery behavior: jobs left `queued` or
//! `downloading` by a previous process must never be resurrected, and the
//! legacy job-control API must reflect whatever the store holds.

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use anibridge::config::Config;
use anibridge::db::Store;
use anibridge::db::repositories::jobs::{STATUS_FAILED, STATUS_QUEUED};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

fn temp_db_url() -> String {
    let db_path = std::env::temp_dir().join(format!("anibridge-system-test-{}.db", uuid::Uuid::new_v4()));
    format!("sqlite:{}", db_path.display())
}

async fn temp_store(db_url: &str) -> Store {
    Store::with_pool_options(db_url, 5, 1)
        .await
        .expect("failed to open temp store")
}

/// Builds a fresh app against `db_url`, which must already exist on disk
/// (migrations are idempotent, so re-running them against an already-seeded
/// file is harmless).
async fn spawn_app_against(db_url: &str) -> Router {
    let mut config = Config::default();
    config.general.database_path = db_url.to_string();
    config.general.download_dir = std::env::temp_dir().join(format!("anibridge-system-test-dl-{}", uuid::Uuid::new_v4()));
    config.general.data_dir = std::env::temp_dir().join(format!("anibridge-system-test-data-{}", uuid::Uuid::new_v4()));
    config.validate().expect("default config must validate");

    let shared = std::sync::Arc::new(
        anibridge::state::SharedState::new(config, None)
            .await
            .expect("failed to build shared state"),
    );
    let app_state = anibridge::api::create_app_state(shared).await;
    anibridge::api::router(app_state).await
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).expect("response body must be valid json")
}

#[tokio::test]
async fn recover_interrupted_fails_queued_and_downloading_jobs() {
    let store = temp_store(&temp_db_url()).await;

    let queued = store.jobs().create("queued-job", "download", None).await.unwrap();
    assert_eq!(queued.status, STATUS_QUEUED);

    store.jobs().create("downloading-job", "download", None).await.unwrap();
    store
        .jobs()
        .update_progress("downloading-job", 42.0, 1000, Some(2000), Some(50.0), Some(30), None)
        .await
        .unwrap();

    let recovered = store.jobs().recover_interrupted().await.unwrap();
    assert_eq!(recovered, 2);

    let queued_after = store.jobs().get("queued-job").await.unwrap().unwrap();
    assert_eq!(queued_after.status, STATUS_FAILED);
    assert_eq!(queued_after.message.as_deref(), Some("Interrupted by application restart"));

    let downloading_after = store.jobs().get("downloading-job").await.unwrap().unwrap();
    assert_eq!(downloading_after.status, STATUS_FAILED);
    assert_eq!(downloading_after.message.as_deref(), Some("Interrupted by application restart"));

    // Already-terminal jobs are untouched by a second sweep.
    let recovered_again = store.jobs().recover_interrupted().await.unwrap();
    assert_eq!(recovered_again, 0);
}

#[tokio::test]
async fn legacy_job_api_reflects_a_seeded_job_row() {
    let db_url = temp_db_url();
    {
        let store = temp_store(&db_url).await;
        store.jobs().create("seeded-job", "download", Some("aniworld.to".to_string())).await.unwrap();
        store
            .jobs()
            .update_progress("seeded-job", 17.5, 500, Some(4000), Some(10.0), Some(120), None)
            .await
            .unwrap();
    }

    let app = spawn_app_against(&db_url).await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/jobs/seeded-job")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let payload = body_json(response).await;
    assert_eq!(payload["status"], Value::String("downloading".to_string()));
    assert!((payload["progress"].as_f64().unwrap() - 17.5).abs() < f64::EPSILON);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/jobs/does-not-exist")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // The scheduler never claimed this job (it was inserted directly into the
    // store), so cancellation must report it as not running rather than
    // pretending to cancel something no worker is tracking.
    let response = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/jobs/seeded-job")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let payload = body_json(response).await;
    assert_eq!(payload["status"], Value::String("not-running".to_string()));
}
