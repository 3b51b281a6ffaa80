//! STRM proxy (§4.8): resolves an episode to a direct upstream URL (or
//! proxies an arbitrary upstream URL handed out by an HLS rewrite) and
//! streams it back, rewriting any HLS playlist along the way so a client
//! never talks to the upstream origin directly.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use chrono::Duration as ChronoDuration;
use url::Url;

use crate::config::{Config, StrmProxyAuth};
use crate::constants::{STALE_MAPPING_STATUSES, STRM_PASSTHROUGH_HEADERS};
use crate::db::repositories::strm_mappings::StrmMappingKey;
use crate::strm::proxy::auth::{AuthError, build_auth_params, require_auth};
use crate::strm::proxy::cache::StrmCacheKey;
use crate::strm::proxy::hls::{looks_like_hls, rewrite_playlist};
use crate::strm::proxy::remux::{RemuxKeyParts, RemuxOutcome, cache_key, source_fingerprint};

use super::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/strm/stream", get(strm_stream_get).head(strm_stream_head))
        .route("/strm/proxy", get(strm_proxy_get).head(strm_proxy_head))
        .route("/strm/proxy/{*hint}", get(strm_proxy_get_hinted).head(strm_proxy_head_hinted))
}

/// One episode's identity as carried in `/strm/stream` query parameters.
/// Mirrors the cache key shape the legacy resolver keys its own tables by.
struct StrmIdentity {
    site: String,
    slug: String,
    season: i32,
    episode: i32,
    language: String,
    provider: Option<String>,
}

fn bad_request(msg: impl Into<String>) -> Response {
    (StatusCode::BAD_REQUEST, msg.into()).into_response()
}

fn bad_gateway(msg: impl Into<String>) -> Response {
    (StatusCode::BAD_GATEWAY, msg.into()).into_response()
}

fn auth_error_response(err: AuthError) -> Response {
    match err {
        AuthError::Misconfigured => (StatusCode::INTERNAL_SERVER_ERROR, "STRM proxy auth misconfigured").into_response(),
        other => (StatusCode::UNAUTHORIZED, other.to_string()).into_response(),
    }
}

fn parse_identity(params: &BTreeMap<String, String>) -> Result<StrmIdentity, Response> {
    let slug = params.get("slug").map(|s| s.trim()).filter(|s| !s.is_empty());
    let Some(slug) = slug else {
        return Err(bad_request("missing slug"));
    };
    let site = params.get("site").map(|s| s.trim()).filter(|s| !s.is_empty()).unwrap_or("aniworld.to");
    let language = params
        .get("lang")
        .or_else(|| params.get("language"))
        .map(|s| s.trim())
        .filter(|s| !s.is_empty());
    let Some(language) = language else {
        return Err(bad_request("missing lang"));
    };
    let season_raw = params.get("s").or_else(|| params.get("season"));
    let episode_raw = params.get("e").or_else(|| params.get("episode"));
    let (Some(season_raw), Some(episode_raw)) = (season_raw, episode_raw) else {
        return Err(bad_request("missing season/episode"));
    };
    let Ok(season) = season_raw.trim().parse::<i32>() else {
        return Err(bad_request("invalid season/episode"));
    };
    let Ok(episode) = episode_raw.trim().parse::<i32>() else {
        return Err(bad_request("invalid season/episode"));
    };
    let provider = params.get("provider").map(|s| s.trim()).filter(|s| !s.is_empty()).map(str::to_string);

    Ok(StrmIdentity {
        site: site.to_string(),
        slug: slug.to_string(),
        season,
        episode,
        language: language.to_string(),
        provider,
    })
}

fn upstream_headers(method: &Method, headers: &HeaderMap) -> Vec<(header::HeaderName, HeaderValue)> {
    let mut out = Vec::new();
    if *method != Method::HEAD {
        if let Some(range) = headers.get(header::RANGE) {
            out.push((header::RANGE, range.clone()));
        }
    }
    if let Some(ua) = headers.get(header::USER_AGENT) {
        out.push((header::USER_AGENT, ua.clone()));
    }
    out
}

fn filtered_headers(resp: &reqwest::Response) -> HeaderMap {
    let mut out = HeaderMap::new();
    for name in STRM_PASSTHROUGH_HEADERS {
        if let Some(value) = resp.headers().get(*name) {
            if let Ok(name) = header::HeaderName::try_from(*name) {
                out.insert(name, value.clone());
            }
        }
    }
    out
}

fn ensure_content_type(headers: &mut HeaderMap, default: &'static str) {
    if !headers.contains_key(header::CONTENT_TYPE) {
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(default));
    }
}

/// Resolves `identity` to a direct URL, consulting the in-memory cache then
/// the `strm_url_mapping` table unless `force_refresh` is set. A resolver
/// miss is a 502; callers are expected to decide freshness themselves since
/// cache-eviction ownership differs between the two layers.
async fn resolve_with_cache(state: &Arc<AppState>, identity: &StrmIdentity, force_refresh: bool) -> Result<(String, String), Response> {
    let cache_provider = identity.provider.clone().unwrap_or_default();
    let cache_key = StrmCacheKey {
        site: identity.site.clone(),
        slug: identity.slug.clone(),
        season: identity.season,
        episode: identity.episode,
        language: identity.language.clone(),
        provider: cache_provider.clone(),
    };

    if !force_refresh && identity.provider.is_some() {
        if let Some(url) = state.shared.strm_cache.get(&cache_key).await {
            return Ok((url, cache_provider));
        }

        let ttl_hours = state.shared.config().await.strm.proxy_cache_ttl_seconds;
        if let Ok(Some(row)) = state
            .shared
            .store
            .strm_mappings()
            .get_fresh(
                StrmMappingKey {
                    site: &identity.site,
                    slug: &identity.slug,
                    season: identity.season,
                    episode: identity.episode,
                    language: &identity.language,
                    provider: &cache_provider,
                },
                ChronoDuration::seconds(ttl_hours),
            )
            .await
        {
            state.shared.strm_cache.put(cache_key, row.direct_url.clone()).await;
            return Ok((row.direct_url, cache_provider));
        }
    }

    let stream = state
        .shared
        .resolver
        .resolve(
            &identity.site,
            &identity.slug,
            identity.season,
            identity.episode,
            &identity.language,
            identity.provider.as_deref(),
        )
        .await
        .map_err(|err| bad_gateway(format!("upstream resolution failed: {err}")))?;

    let resolved_key = StrmCacheKey {
        provider: stream.provider.clone(),
        ..cache_key
    };
    state.shared.strm_cache.put(resolved_key, stream.direct_url.clone()).await;
    let _ = state
        .shared
        .store
        .strm_mappings()
        .upsert(
            StrmMappingKey {
                site: &identity.site,
                slug: &identity.slug,
                season: identity.season,
                episode: identity.episode,
                language: &identity.language,
                provider: &stream.provider,
            },
            stream.direct_url.clone(),
        )
        .await;

    Ok((stream.direct_url, stream.provider))
}

async fn invalidate_identity(state: &Arc<AppState>, identity: &StrmIdentity) {
    let provider = identity.provider.clone().unwrap_or_default();
    state
        .shared
        .strm_cache
        .invalidate(&StrmCacheKey {
            site: identity.site.clone(),
            slug: identity.slug.clone(),
            season: identity.season,
            episode: identity.episode,
            language: identity.language.clone(),
            provider,
        })
        .await;
    let _ = state
        .shared
        .store
        .strm_mappings()
        .invalidate_episode(&identity.site, &identity.slug, identity.season, identity.episode, &identity.language)
        .await;
}

/// Fetches the resolved upstream, retrying once with a forced re-resolve
/// (and cache invalidation) if the first attempt hits a transport error or
/// one of [`STALE_MAPPING_STATUSES`]. The second attempt's outcome is final.
async fn fetch_with_refresh(
    state: &Arc<AppState>,
    identity: &StrmIdentity,
    method: Method,
    headers: &[(header::HeaderName, HeaderValue)],
) -> Result<(reqwest::Response, String), Response> {
    let mut force_refresh = false;
    for attempt in 0..2 {
        let (url, _provider) = resolve_with_cache(state, identity, force_refresh).await?;

        let mut builder = state.shared.http_client.request(method.clone(), &url);
        for (name, value) in headers {
            builder = builder.header(name, value);
        }

        match builder.send().await {
            Ok(resp) if attempt == 0 && STALE_MAPPING_STATUSES.contains(&resp.status().as_u16()) => {
                drop(resp);
                invalidate_identity(state, identity).await;
                force_refresh = true;
            }
            Ok(resp) => return Ok((resp, url)),
            Err(_err) if attempt == 0 => {
                invalidate_identity(state, identity).await;
                force_refresh = true;
            }
            Err(_err) => return Err(bad_gateway("upstream request failed")),
        }
    }
    Err(bad_gateway("upstream request failed"))
}

async fn strm_stream_head(State(state): State<Arc<AppState>>, Query(params): Query<BTreeMap<String, String>>, headers: HeaderMap) -> Response {
    strm_stream_impl(state, params, headers, Method::HEAD).await
}

async fn strm_stream_get(State(state): State<Arc<AppState>>, Query(params): Query<BTreeMap<String, String>>, headers: HeaderMap) -> Response {
    strm_stream_impl(state, params, headers, Method::GET).await
}

async fn strm_stream_impl(state: Arc<AppState>, params: BTreeMap<String, String>, headers: HeaderMap, method: Method) -> Response {
    let config = state.shared.config().await;
    if let Err(err) = check_auth(&config, &params) {
        return auth_error_response(err);
    }
    let identity = match parse_identity(&params) {
        Ok(i) => i,
        Err(resp) => return resp,
    };

    let fwd_headers = upstream_headers(&method, &headers);

    if method == Method::HEAD {
        return handle_head(&state, &identity, &fwd_headers).await;
    }

    let (resp, url) = match fetch_with_refresh(&state, &identity, Method::GET, &fwd_headers).await {
        Ok(pair) => pair,
        Err(resp) => return resp,
    };

    let content_type = resp.headers().get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()).map(str::to_string);
    if !looks_like_hls(content_type.as_deref(), &url) {
        return stream_passthrough(resp).await;
    }

    if config.strm.remux_enabled {
        if let Ok(parsed) = Url::parse(&url) {
            let provider = identity.provider.clone().unwrap_or_default();
            let parts = RemuxKeyParts {
                site: &identity.site,
                slug: &identity.slug,
                season: identity.season,
                episode: identity.episode,
                language: &identity.language,
                provider: &provider,
            };
            let fp = source_fingerprint(&parsed);
            let key = cache_key(&parts, &fp);
            let status = resp.status();
            drop(resp);
            match state.shared.remux_cache.resolve(key, parsed, state.shared.http_client.clone()).await {
                RemuxOutcome::Ready(path) => {
                    return serve_remux_file(&path, headers.get(header::RANGE).and_then(|v| v.to_str().ok())).await;
                }
                RemuxOutcome::FallBackToHls => {
                    // Re-fetch: the original response body was already dropped above.
                    let fwd_headers = upstream_headers(&Method::GET, &headers);
                    return match fetch_with_refresh(&state, &identity, Method::GET, &fwd_headers).await {
                        Ok((resp, url)) => rewrite_and_serve_hls(resp, &url, &config, None).await,
                        Err(resp) => resp,
                    };
                }
            }
            #[allow(unreachable_code)]
            {
                let _ = status;
            }
        }
    }

    rewrite_and_serve_hls(resp, &url, &config, None).await
}

fn check_auth(config: &Config, params: &BTreeMap<String, String>) -> Result<(), AuthError> {
    require_auth(config.strm.proxy_auth, config.strm.proxy_secret.as_deref(), params)
}

async fn handle_head(state: &Arc<AppState>, identity: &StrmIdentity, headers: &[(header::HeaderName, HeaderValue)]) -> Response {
    let (resp, _url) = match fetch_with_refresh(state, identity, Method::HEAD, headers).await {
        Ok(pair) => pair,
        Err(resp) => return resp,
    };

    let resp = if matches!(resp.status().as_u16(), 405 | 501) {
        let mut fallback = headers.to_vec();
        fallback.push((header::RANGE, HeaderValue::from_static("bytes=0-0")));
        match fetch_with_refresh(state, identity, Method::GET, &fallback).await {
            Ok((resp, _url)) => {
                let _ = resp.bytes().await;
                return finish_head_response(StatusCode::OK);
            }
            Err(resp) => return resp,
        }
    } else {
        resp
    };

    let status = resp.status();
    let mut filtered = filtered_headers(&resp);
    ensure_content_type(&mut filtered, "application/octet-stream");
    let mut out = Response::builder().status(status);
    *out.headers_mut().unwrap() = filtered;
    out.body(Body::empty()).unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn finish_head_response(status: StatusCode) -> Response {
    let mut filtered = HeaderMap::new();
    ensure_content_type(&mut filtered, "application/octet-stream");
    let mut out = Response::builder().status(status);
    *out.headers_mut().unwrap() = filtered;
    out.body(Body::empty()).unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

async fn stream_passthrough(resp: reqwest::Response) -> Response {
    let status = resp.status();
    let mut headers = filtered_headers(&resp);
    ensure_content_type(&mut headers, "application/octet-stream");
    let body = Body::from_stream(resp.bytes_stream());
    let mut out = Response::builder().status(status);
    *out.headers_mut().unwrap() = headers;
    out.body(body).unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Buffers an HLS playlist fully, rewrites every URI reference through
/// `proxify` (derived from `config` when not given explicitly), and serves
/// the rewritten text with a freshly computed `Content-Length`.
async fn rewrite_and_serve_hls(resp: reqwest::Response, url: &str, config: &Config, proxify_override: Option<&dyn Fn(&str) -> String>) -> Response {
    let status = resp.status();
    let mut headers = filtered_headers(&resp);
    let Ok(base_url) = Url::parse(url) else {
        return (StatusCode::INTERNAL_SERVER_ERROR, "invalid upstream url").into_response();
    };
    let body = match resp.text().await {
        Ok(b) => b,
        Err(_) => return (StatusCode::BAD_GATEWAY, "upstream request failed").into_response(),
    };

    let default_proxify = |abs: &str| build_proxy_url(config, abs);
    let proxify: &dyn Fn(&str) -> String = proxify_override.unwrap_or(&default_proxify);
    let rewritten = rewrite_playlist(&body, &base_url, proxify);
    let out_bytes = rewritten.into_bytes();

    headers.insert(header::CONTENT_LENGTH, HeaderValue::from_str(&out_bytes.len().to_string()).unwrap());
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/vnd.apple.mpegurl"));

    let mut out = Response::builder().status(status);
    *out.headers_mut().unwrap() = headers;
    out.body(Body::from(out_bytes)).unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn parse_single_range(header: &str, total: u64) -> Option<(u64, u64)> {
    let spec = header.strip_prefix("bytes=")?;
    let (start_s, end_s) = spec.split_once('-')?;
    let start: u64 = start_s.parse().ok()?;
    let end: u64 = if end_s.is_empty() { total.saturating_sub(1) } else { end_s.parse().ok()? };
    if total == 0 || start > end || end >= total {
        return None;
    }
    Some((start, end))
}

/// Serves the remuxed MP4 artifact from disk, honouring a single `Range`
/// request if present. The artifact is small enough (one episode) that
/// buffering it whole is acceptable; this isn't meant for arbitrarily large
/// files.
async fn serve_remux_file(path: &std::path::Path, range: Option<&str>) -> Response {
    let Ok(bytes) = tokio::fs::read(path).await else {
        return (StatusCode::INTERNAL_SERVER_ERROR, "remux artifact missing").into_response();
    };
    let total = bytes.len() as u64;

    if let Some((start, end)) = range.and_then(|r| parse_single_range(r, total)) {
        let slice = bytes[start as usize..=end as usize].to_vec();
        Response::builder()
            .status(StatusCode::PARTIAL_CONTENT)
            .header(header::CONTENT_TYPE, "video/mp4")
            .header(header::CONTENT_RANGE, format!("bytes {start}-{end}/{total}"))
            .header(header::ACCEPT_RANGES, "bytes")
            .header(header::CONTENT_LENGTH, (end - start + 1).to_string())
            .body(Body::from(slice))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
    } else {
        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "video/mp4")
            .header(header::ACCEPT_RANGES, "bytes")
            .header(header::CONTENT_LENGTH, total.to_string())
            .body(Body::from(bytes))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
    }
}

fn is_already_proxied(config: &Config, url: &str) -> bool {
    let base = config.strm.public_base_url.trim_end_matches('/');
    if base.is_empty() {
        return false;
    }
    url.starts_with(&format!("{base}/strm/"))
}

/// Builds an outgoing `/strm/proxy/<hint>?u=...` URL for one absolute
/// upstream reference, deriving a cosmetic filename hint from its path and
/// appending whatever auth params the configured mode requires.
fn build_proxy_url(config: &Config, upstream: &str) -> String {
    if is_already_proxied(config, upstream) {
        return upstream.to_string();
    }

    let hint = Url::parse(upstream)
        .ok()
        .and_then(|u| u.path_segments().and_then(|mut s| s.next_back().map(str::to_string)))
        .filter(|name| !name.is_empty() && name.contains('.'))
        .unwrap_or_else(|| "resource.bin".to_string());

    let mut params = BTreeMap::new();
    params.insert("u".to_string(), upstream.to_string());
    if let Ok(auth) = build_auth_params(
        config.strm.proxy_auth,
        config.strm.proxy_secret.as_deref(),
        config.strm.proxy_token_ttl_seconds,
        &params,
    ) {
        params.extend(auth);
    }

    let query = params
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(&v)))
        .collect::<Vec<_>>()
        .join("&");

    format!("{}/strm/proxy/{hint}?{query}", config.strm.public_base_url.trim_end_matches('/'))
}

async fn strm_proxy_get(state: State<Arc<AppState>>, params: Query<BTreeMap<String, String>>, headers: HeaderMap) -> Response {
    strm_proxy_impl(state.0, params.0, headers, Method::GET).await
}

async fn strm_proxy_head(state: State<Arc<AppState>>, params: Query<BTreeMap<String, String>>, headers: HeaderMap) -> Response {
    strm_proxy_impl(state.0, params.0, headers, Method::HEAD).await
}

async fn strm_proxy_get_hinted(state: State<Arc<AppState>>, Path(_hint): Path<String>, params: Query<BTreeMap<String, String>>, headers: HeaderMap) -> Response {
    strm_proxy_impl(state.0, params.0, headers, Method::GET).await
}

async fn strm_proxy_head_hinted(state: State<Arc<AppState>>, Path(_hint): Path<String>, params: Query<BTreeMap<String, String>>, headers: HeaderMap) -> Response {
    strm_proxy_impl(state.0, params.0, headers, Method::HEAD).await
}

/// Proxies an arbitrary upstream URL passed in the `u` query parameter. Has
/// no cache layer of its own — it's always used with a URL an HLS rewrite
/// just handed out, so there's nothing to invalidate on failure.
async fn strm_proxy_impl(state: Arc<AppState>, params: BTreeMap<String, String>, headers: HeaderMap, method: Method) -> Response {
    let config = state.shared.config().await;
    if let Err(err) = check_auth(&config, &params) {
        return auth_error_response(err);
    }

    let Some(upstream) = params.get("u").map(|s| s.trim()).filter(|s| !s.is_empty()) else {
        return bad_request("missing upstream url");
    };
    let Ok(parsed) = Url::parse(upstream) else {
        return bad_request("invalid upstream url scheme");
    };
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return bad_request("invalid upstream url scheme");
    }

    let fwd_headers = upstream_headers(&method, &headers);

    if method == Method::HEAD {
        return proxy_head(&state, upstream, &fwd_headers).await;
    }

    let resp = match state.shared.http_client.get(upstream).headers(to_header_map(&fwd_headers)).send().await {
        Ok(resp) => resp,
        Err(_) => return bad_gateway("upstream request failed"),
    };

    let content_type = resp.headers().get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()).map(str::to_string);
    if looks_like_hls(content_type.as_deref(), upstream) {
        let proxify = |abs: &str| build_proxy_url(&config, abs);
        return rewrite_and_serve_hls(resp, upstream, &config, Some(&proxify)).await;
    }

    stream_passthrough(resp).await
}

fn to_header_map(pairs: &[(header::HeaderName, HeaderValue)]) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in pairs {
        out.insert(name.clone(), value.clone());
    }
    out
}

async fn proxy_head(state: &Arc<AppState>, upstream: &str, headers: &[(header::HeaderName, HeaderValue)]) -> Response {
    let resp = match state.shared.http_client.head(upstream).headers(to_header_map(headers)).send().await {
        Ok(resp) => resp,
        Err(_) => return bad_gateway("upstream request failed"),
    };

    let resp = if matches!(resp.status().as_u16(), 405 | 501) {
        let mut fallback = headers.to_vec();
        fallback.push((header::RANGE, HeaderValue::from_static("bytes=0-0")));
        match state.shared.http_client.get(upstream).headers(to_header_map(&fallback)).send().await {
            Ok(resp) => {
                let _ = resp.bytes().await;
                return finish_head_response(StatusCode::OK);
            }
            Err(_) => return bad_gateway("upstream request failed"),
        }
    } else {
        resp
    };

    let status = resp.status();
    let mut filtered = filtered_headers(&resp);
    ensure_content_type(&mut filtered, "application/octet-stream");
    let mut out = Response::builder().status(status);
    *out.headers_mut().unwrap() = filtered;
    out.body(Body::empty()).unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_identity_requires_slug_lang_and_episode() {
        let mut params = BTreeMap::new();
        assert!(parse_identity(&params).is_err());

        params.insert("slug".to_string(), "my-show".to_string());
        assert!(parse_identity(&params).is_err());

        params.insert("lang".to_string(), "German Dub".to_string());
        assert!(parse_identity(&params).is_err());

        params.insert("s".to_string(), "1".to_string());
        params.insert("e".to_string(), "2".to_string());
        let identity = parse_identity(&params).unwrap();
        assert_eq!(identity.site, "aniworld.to");
        assert_eq!(identity.season, 1);
        assert_eq!(identity.episode, 2);
    }

    #[test]
    fn parse_single_range_rejects_out_of_bounds() {
        assert_eq!(parse_single_range("bytes=0-99", 50), None);
        assert_eq!(parse_single_range("bytes=10-20", 50), Some((10, 20)));
        assert_eq!(parse_single_range("bytes=10-", 50), Some((10, 49)));
    }

    #[test]
    fn build_proxy_url_derives_filename_hint() {
        let mut config = Config::default();
        config.strm.public_base_url = "https://example.com".to_string();
        config.strm.proxy_auth = StrmProxyAuth::None;
        let url = build_proxy_url(&config, "https://cdn.example.com/path/seg0.ts?x=1");
        assert!(url.starts_with("https://example.com/strm/proxy/seg0.ts?"));
    }

    #[test]
    fn build_proxy_url_is_idempotent_for_already_proxied_urls() {
        let mut config = Config::default();
        config.strm.public_base_url = "https://example.com".to_string();
        let already = "https://example.com/strm/proxy/seg0.ts?u=foo";
        assert_eq!(build_proxy_url(&config, already), already);
    }
}
