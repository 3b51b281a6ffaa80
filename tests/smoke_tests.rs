//! End-to-end smoke test for the qBittorrent shim's magnet-in, status-out
//! loop, and the STRM proxy's request-validation surface (no live upstream
//! required for either).

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use anibridge::config::Config;
use anibridge::domain::magnet::{MagnetSpec, build_magnet};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

async fn spawn_app() -> Router {
    let mut config = Config::default();
    config.general.database_path = format!(
        "sqlite:{}",
        std::env::temp_dir().join(format!("anibridge-smoke-test-{}.db", uuid::Uuid::new_v4())).display()
    );
    config.general.download_dir = std::env::temp_dir().join(format!("anibridge-smoke-test-dl-{}", uuid::Uuid::new_v4()));
    config.general.data_dir = std::env::temp_dir().join(format!("anibridge-smoke-test-data-{}", uuid::Uuid::new_v4()));
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
async fn magnet_add_projects_into_torrents_info() {
    let app = spawn_app().await;

    let magnet = build_magnet(&MagnetSpec {
        title: "Some Show S01E01",
        slug: "some-show",
        season: 1,
        episode: 1,
        language: "German Dub",
        site: "aniworld.to",
        provider: Some("VOE"),
        absolute_number: None,
        strm_mode: false,
    });
    let decoded = anibridge::domain::magnet::parse_magnet(&magnet).unwrap();

    let add = Request::builder()
        .method("POST")
        .uri("/api/v2/torrents/add")
        .header(axum::http::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(format!(
            "urls={}&category=anime",
            urlencoding::encode(&magnet)
        )))
        .unwrap();
    let response = app.clone().oneshot(add).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let info = Request::builder()
        .uri("/api/v2/torrents/info")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(info).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let torrents = body_json(response).await;
    let entries = torrents.as_array().expect("torrents/info must return a json array");
    let entry = entries
        .iter()
        .find(|t| t["hash"] == Value::String(decoded.info_hash.clone()))
        .expect("added magnet must show up in torrents/info");

    assert_eq!(entry["name"], Value::String(decoded.display_name.clone()));
    assert_eq!(entry["category"], Value::String("anime".to_string()));
    let progress = entry["progress"].as_f64().expect("progress must be numeric");
    assert!((0.0..=1.0).contains(&progress), "progress {progress} out of qBittorrent's 0..1 range");
}

#[tokio::test]
async fn add_torrent_rejects_malformed_magnet() {
    let app = spawn_app().await;

    let add = Request::builder()
        .method("POST")
        .uri("/api/v2/torrents/add")
        .header(axum::http::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from("urls=not-a-magnet"))
        .unwrap();
    let response = app.oneshot(add).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn strm_stream_requires_slug_and_language() {
    let app = spawn_app().await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/strm/stream?s=1&e=1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/strm/stream?slug=my-show&s=1&e=1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn strm_proxy_rejects_non_http_upstream_and_missing_url() {
    let app = spawn_app().await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/strm/proxy?u=ftp%3A%2F%2Fevil.example%2Ffile")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(Request::builder().uri("/strm/proxy").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
