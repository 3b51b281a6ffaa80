//! Torznab indexer and qBittorrent category surface: the two HTTP entry
//! points Prowlarr/Sonarr probe first when an indexer/download client is
//! added.

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use anibridge::config::Config;
use http_body_util::BodyExt;
use tower::ServiceExt;

async fn spawn_app() -> (Router, Config) {
    let mut config = Config::default();
    config.general.database_path = format!(
        "sqlite:{}",
        std::env::temp_dir().join(format!("anibridge-api-test-{}.db", uuid::Uuid::new_v4())).display()
    );
    config.general.download_dir = std::env::temp_dir().join(format!("anibridge-api-test-dl-{}", uuid::Uuid::new_v4()));
    config.general.data_dir = std::env::temp_dir().join(format!("anibridge-api-test-data-{}", uuid::Uuid::new_v4()));
    config.validate().expect("default config must validate");

    let shared = std::sync::Arc::new(
        anibridge::state::SharedState::new(config.clone(), None)
            .await
            .expect("failed to build shared state"),
    );
    let app_state = anibridge::api::create_app_state(shared).await;
    let router = anibridge::api::router(app_state).await;
    (router, config)
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn torznab_caps_lists_search_verbs_and_categories() {
    let (app, config) = spawn_app().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/torznab/api?t=caps")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(content_type.contains("application/rss+xml"));

    let body = body_string(response).await;
    assert!(body.contains("<tv-search"));
    assert!(body.contains("<movie-search"));
    assert!(body.contains(&format!(r#"id="{}""#, config.torznab.cat_anime)));
}

#[tokio::test]
async fn torznab_accepts_requests_when_no_apikey_is_configured() {
    let (app, _) = spawn_app().await;
    let response = app
        .oneshot(
            Request::builder()
                .uri("/torznab/api?t=caps&apikey=whatever")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn torznab_empty_search_returns_connectivity_test_item_by_default() {
    let (app, _) = spawn_app().await;
    let response = app
        .oneshot(
            Request::builder()
                .uri("/torznab/api?t=search")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    assert!(body.contains("AniBridge Connectivity Test"));
    assert!(body.contains("magnet:?xt=urn:btih:"));
}

#[tokio::test]
async fn qbittorrent_app_version_and_webapi_version_respond() {
    let (app, _) = spawn_app().await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v2/app/webapiVersion")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v2/app/version")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn qbittorrent_category_lifecycle_round_trips_through_http() {
    let (app, _) = spawn_app().await;

    let create = Request::builder()
        .method("POST")
        .uri("/api/v2/torrents/createCategory")
        .header(axum::http::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from("category=Anime&savePath=%2Fdata%2Fanime"))
        .unwrap();
    let response = app.clone().oneshot(create).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let list = Request::builder()
        .uri("/api/v2/torrents/categories")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(list).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    assert!(body.contains("Anime"));
    assert!(body.contains("/data/anime"));

    let remove = Request::builder()
        .method("POST")
        .uri("/api/v2/torrents/removeCategories")
        .header(axum::http::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from("categories=Anime"))
        .unwrap();
    let response = app.clone().oneshot(remove).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let list = Request::builder()
        .uri("/api/v2/torrents/categories")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(list).await.unwrap();
    let body = body_string(response).await;
    assert!(!body.contains("Anime"));
}

#[tokio::test]
async fn healthz_and_metrics_respond() {
    let (app, _) = spawn_app().await;

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
