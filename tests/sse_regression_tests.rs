//! Regression tests for the legacy job-control API's Server-Sent Events
//! endpoint: it must emit exactly one event per distinct job snapshot and
//! close the stream once the job reaches a terminal status, rather than
//! polling forever.

use axum::{Router, body::Body, http::Request};
use anibridge::config::Config;
use anibridge::db::Store;
use http_body_util::BodyExt;
use tower::ServiceExt;

async fn spawn_app() -> (Router, Store) {
    let mut config = Config::default();
    config.general.database_path = format!(
        "sqlite:{}",
        std::env::temp_dir().join(format!("anibridge-sse-test-{}.db", uuid::Uuid::new_v4())).display()
    );
    config.general.download_dir = std::env::temp_dir().join(format!("anibridge-sse-test-dl-{}", uuid::Uuid::new_v4()));
    config.general.data_dir = std::env::temp_dir().join(format!("anibridge-sse-test-data-{}", uuid::Uuid::new_v4()));
    config.validate().expect("default config must validate");

    let shared = std::sync::Arc::new(
        anibridge::state::SharedState::new(config, None)
            .await
            .expect("failed to build shared state"),
    );
    let store = shared.store.clone();
    let app_state = anibridge::api::create_app_state(shared).await;
    (anibridge::api::router(app_state).await, store)
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn completed_job_emits_a_single_event_and_closes() {
    let (app, store) = spawn_app().await;

    store.jobs().create("done-job", "download", None).await.unwrap();
    store.jobs().complete("done-job", "/data/downloads/anime/Show.mp4".to_string()).await.unwrap();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/jobs/done-job/events")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let body = body_text(response).await;
    assert_eq!(body.matches("data:").count(), 1, "expected exactly one SSE event, got body:\n{body}");
    assert!(body.contains(r#""status":"completed""#));
    assert!(body.contains("Show.mp4"));
}

#[tokio::test]
async fn unknown_job_emits_a_single_not_found_event() {
    let (app, _store) = spawn_app().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/jobs/never-existed/events")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let body = body_text(response).await;
    assert_eq!(body.matches("event:").count(), 1);
    assert!(body.contains("not_found"));
}
