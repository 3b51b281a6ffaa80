//! Torznab indexer endpoint (§4.5). Verbs `caps`, `search`, `tvsearch`,
//! `movie` all emit RSS 2.0 with the Torznab attribute extension, built with
//! [`quick_xml::Writer`] rather than string templating so escaping is
//! structural rather than ad hoc.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesText, Event};
use serde::Deserialize;

use crate::availability::AvailabilityVerdict;
use crate::config::{Config, StrmFilesMode};
use crate::constants::torznab::ANIME_CATEGORY_NAME;
use crate::domain::magnet::{MagnetSpec, build_magnet};
use crate::domain::naming::{ReleaseNameSpec, build_release_name, estimate_size_bytes};
use crate::metadata::ExternalIds;
use crate::sites::CatalogSite;
use crate::specials::MetadataEpisode;

use super::AppState;

/// Torznab category id for movies, fixed by the Newznab/Torznab category
/// tree (2000 = Movies) rather than anything AniBridge-specific.
const CAT_MOVIE: u32 = 2000;

#[derive(Debug, Deserialize)]
pub struct TorznabQuery {
    t: Option<String>,
    q: Option<String>,
    season: Option<i32>,
    ep: Option<String>,
    cat: Option<String>,
    apikey: Option<String>,
    tvdbid: Option<String>,
    tmdbid: Option<String>,
    imdbid: Option<String>,
    limit: Option<usize>,
}

struct ReleaseItem {
    title: String,
    magnet: String,
    size_bytes: i64,
    category_id: u32,
}

pub async fn handle(State(state): State<Arc<AppState>>, Query(query): Query<TorznabQuery>) -> Response {
    let config = state.shared.config().await;

    if let Some(required) = &config.torznab.api_key {
        if query.apikey.as_deref() != Some(required.as_str()) {
            return (StatusCode::UNAUTHORIZED, "invalid apikey").into_response();
        }
    }

    let Some(t) = query.t.as_deref() else {
        return rss_response(&config, Vec::new());
    };

    match t {
        "caps" => caps_response(&config),
        "search" => search_verb(&state, &config, &query).await,
        "tvsearch" => tvsearch_verb(&state, &config, &query).await,
        "movie" => movie_verb(&state, &config, &query).await,
        _ => (StatusCode::BAD_REQUEST, "unknown t parameter").into_response(),
    }
}

fn caps_response(config: &Config) -> Response {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None))).ok();

    writer
        .create_element("caps")
        .write_inner_content(|writer| {
            writer
                .create_element("server")
                .with_attribute(("title", config.torznab.indexer_name.as_str()))
                .write_empty()?;
            writer
                .create_element("searching")
                .write_inner_content(|writer| {
                    writer
                        .create_element("search")
                        .with_attribute(("available", "yes"))
                        .with_attribute(("supportedParams", "q"))
                        .write_empty()?;
                    writer
                        .create_element("tv-search")
                        .with_attribute(("available", "yes"))
                        .with_attribute(("supportedParams", "q,season,ep"))
                        .write_empty()?;
                    writer
                        .create_element("movie-search")
                        .with_attribute(("available", "yes"))
                        .with_attribute(("supportedParams", "q"))
                        .write_empty()?;
                    Ok(())
                })?;
            writer
                .create_element("categories")
                .write_inner_content(|writer| {
                    writer
                        .create_element("category")
                        .with_attribute(("id", config.torznab.cat_anime.to_string().as_str()))
                        .with_attribute(("name", ANIME_CATEGORY_NAME))
                        .write_empty()?;
                    writer
                        .create_element("category")
                        .with_attribute(("id", CAT_MOVIE.to_string().as_str()))
                        .with_attribute(("name", "Movies"))
                        .write_empty()?;
                    Ok(())
                })?;
            Ok(())
        })
        .expect("writing to an in-memory buffer never fails");

    xml_response(writer.into_inner())
}

async fn search_verb(state: &Arc<AppState>, config: &Config, query: &TorznabQuery) -> Response {
    let Some(q) = query.q.as_deref().filter(|q| !q.trim().is_empty()) else {
        let mut items = Vec::new();
        if config.torznab.return_test_result {
            items.push(connectivity_test_item(config));
        }
        return rss_response(config, items);
    };

    let is_movie = query
        .cat
        .as_deref()
        .is_some_and(|cat| cat.split(',').any(|c| c.trim() == CAT_MOVIE.to_string()));

    if is_movie {
        return movie_verb(state, config, query).await;
    }

    let Some(title_match) = state.shared.title_index.resolve(q, Default::default()).await else {
        return rss_response(config, Vec::new());
    };
    let Some(site) = state.shared.sites.get(title_match.site) else {
        return rss_response(config, Vec::new());
    };

    let limit = query.limit.unwrap_or(50);
    let items = preview_items(state, config, &site, &title_match.slug, limit).await;
    rss_response(config, items)
}

fn connectivity_test_item(config: &Config) -> ReleaseItem {
    let release_title = build_release_name(&ReleaseNameSpec {
        series_title: &config.torznab.test_title,
        season: Some(config.torznab.test_season),
        episode: Some(config.torznab.test_episode),
        absolute_number: None,
        height: Some(1080),
        vcodec: Some("h264"),
        language: &config.torznab.test_language,
        source_tag: &config.general.source_tag,
        release_group: &config.general.release_group,
    });
    let magnet = build_magnet(&MagnetSpec {
        title: &release_title,
        slug: &config.torznab.test_slug,
        season: config.torznab.test_season,
        episode: config.torznab.test_episode,
        language: &config.torznab.test_language,
        site: "aniworld.to",
        provider: None,
        absolute_number: None,
        strm_mode: false,
    });
    ReleaseItem {
        size_bytes: estimate_size_bytes(&release_title),
        title: release_title,
        magnet,
        category_id: config.torznab.cat_anime,
    }
}

/// Single S01E01 preview across this title's candidate languages, with
/// `SxxEyy` intentionally omitted from the title (§4.5).
async fn preview_items(
    state: &Arc<AppState>,
    config: &Config,
    site: &Arc<dyn CatalogSite>,
    slug: &str,
    limit: usize,
) -> Vec<ReleaseItem> {
    let languages = candidate_languages(state, site, slug, 1, 1).await;
    let series_title = state
        .shared
        .title_index
        .resolve_on_site(site.id(), slug)
        .await
        .unwrap_or_else(|| slug.to_string());

    let mut items = Vec::new();
    for language in languages {
        if items.len() >= limit {
            break;
        }
        let verdict = match state.shared.availability.check(site.id(), slug, 1, 1, &language).await {
            Ok(v) => v,
            Err(_) => continue,
        };
        if !verdict.available {
            continue;
        }
        let release_title = build_release_name(&ReleaseNameSpec {
            series_title: &series_title,
            season: None,
            episode: None,
            absolute_number: None,
            height: verdict.height,
            vcodec: verdict.vcodec.as_deref(),
            language: &language,
            source_tag: &config.general.source_tag,
            release_group: &config.general.release_group,
        });
        let magnet = build_magnet(&MagnetSpec {
            title: &release_title,
            slug,
            season: 1,
            episode: 1,
            language: &language,
            site: site.site_host(),
            provider: verdict.provider.as_deref(),
            absolute_number: None,
            strm_mode: false,
        });
        items.push(ReleaseItem {
            size_bytes: estimate_size_bytes(&release_title),
            title: release_title,
            magnet,
            category_id: config.torznab.cat_anime,
        });
    }
    items
}

async fn movie_verb(state: &Arc<AppState>, config: &Config, query: &TorznabQuery) -> Response {
    let Some(q) = query.q.as_deref().filter(|q| !q.trim().is_empty()) else {
        return rss_response(config, Vec::new());
    };

    for site in state.shared.sites.movie_sites() {
        let items = preview_items(state, config, &site, &slugify_for_site(state, &site, q).await, 10).await;
        if !items.is_empty() {
            return rss_response(config, items);
        }
    }
    for site in state.shared.sites.anime_sites() {
        let items = preview_items(state, config, &site, &slugify_for_site(state, &site, q).await, 10).await;
        if !items.is_empty() {
            return rss_response(config, items);
        }
    }
    rss_response(config, Vec::new())
}

async fn slugify_for_site(state: &Arc<AppState>, site: &Arc<dyn CatalogSite>, q: &str) -> String {
    match state.shared.title_index.resolve(q, Default::default()).await {
        Some(m) if m.site == site.id() => m.slug,
        _ => String::new(),
    }
}

async fn tvsearch_verb(state: &Arc<AppState>, config: &Config, query: &TorznabQuery) -> Response {
    let Some(season) = query.season else {
        return rss_response(config, Vec::new());
    };

    let external_ids = ExternalIds {
        tvdb_id: query.tvdbid.clone(),
        tmdb_id: query.tmdbid.clone(),
        imdb_id: query.imdbid.clone(),
    };

    let (site, slug, series_title, metadata_episodes) =
        match resolve_series(state, query.q.as_deref(), &external_ids).await {
            Some(resolved) => resolved,
            None => return rss_response(config, Vec::new()),
        };

    let limit = query.limit.unwrap_or(200);

    if let Some(ep_raw) = query.ep.as_deref() {
        let Ok(ep) = ep_raw.parse::<i32>() else {
            return rss_response(config, Vec::new());
        };
        let items = episode_search_items(
            state, config, &site, &slug, &series_title, season, ep, None, &metadata_episodes, limit,
        )
        .await;
        return rss_response(config, items);
    }

    let items = season_search_items(
        state,
        config,
        &site,
        &slug,
        &series_title,
        season,
        &metadata_episodes,
        limit,
    )
    .await;
    rss_response(config, items)
}

/// Resolves a series identity either from a free-text `q` via the Title
/// Index, or from external identifiers via the metadata service, returning
/// the site, slug, canonical title, and (if available) an episode listing
/// used to drive season-search discovery.
async fn resolve_series(
    state: &Arc<AppState>,
    q: Option<&str>,
    external_ids: &ExternalIds,
) -> Option<(Arc<dyn CatalogSite>, String, String, Vec<MetadataEpisode>)> {
    if !external_ids.is_empty() {
        if let Ok(Some(identity)) = state.shared.metadata.resolve(external_ids).await {
            if let Some(q) = q.filter(|q| !q.trim().is_empty()) {
                if let Some(m) = state.shared.title_index.resolve(q, Default::default()).await {
                    let site = state.shared.sites.get(m.site)?;
                    return Some((site, m.slug, identity.canonical_title, identity.episodes));
                }
            }
            if let Some(m) = state
                .shared
                .title_index
                .resolve(&identity.canonical_title, Default::default())
                .await
            {
                let site = state.shared.sites.get(m.site)?;
                return Some((site, m.slug, identity.canonical_title, identity.episodes));
            }
            return None;
        }
    }

    let q = q.filter(|q| !q.trim().is_empty())?;
    let m = state.shared.title_index.resolve(q, Default::default()).await?;
    let site = state.shared.sites.get(m.site)?;
    let series_title = state
        .shared
        .title_index
        .resolve_on_site(site.id(), &m.slug)
        .await
        .unwrap_or_else(|| q.to_string());
    Some((site, m.slug, series_title, Vec::new()))
}

#[allow(clippy::too_many_arguments)]
fn episode_search_items<'a>(
    state: &'a Arc<AppState>,
    config: &'a Config,
    site: &'a Arc<dyn CatalogSite>,
    slug: &'a str,
    series_title: &'a str,
    display_season: i32,
    display_episode: i32,
    source_override: Option<(i32, i32)>,
    metadata_episodes: &'a [MetadataEpisode],
    limit: usize,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Vec<ReleaseItem>> + Send + 'a>> {
    Box::pin(async move {
        let (probe_season, probe_episode) = source_override.unwrap_or((display_season, display_episode));
        let languages = candidate_languages(state, site, slug, probe_season, probe_episode).await;

        let mut items = Vec::new();
        for language in languages {
            if items.len() >= limit {
                break;
            }
            let Ok(verdict) = state
                .shared
                .availability
                .check(site.id(), slug, probe_season, probe_episode, &language)
                .await
            else {
                continue;
            };
            if !verdict.available {
                continue;
            }
            items.extend(build_release_items(
                config,
                series_title,
                slug,
                site.site_host(),
                display_season,
                display_episode,
                probe_season,
                probe_episode,
                &language,
                &verdict,
            ));
        }

        // The direct (season, episode) probe found nothing: this may be a
        // special the source site numbers under season 0 while metadata
        // assigns it real coordinates (§4.5 "Special-episode alias mapping").
        if items.is_empty() && source_override.is_none() && !metadata_episodes.is_empty() {
            if let Some(source) =
                specials_source_override(state, site, slug, display_season, display_episode, metadata_episodes).await
            {
                return episode_search_items(
                    state,
                    config,
                    site,
                    slug,
                    series_title,
                    display_season,
                    display_episode,
                    Some(source),
                    metadata_episodes,
                    limit,
                )
                .await;
            }
        }

        items
    })
}

/// Consults the specials mapper for a (season, episode) pair the source site
/// couldn't serve directly, cross-referencing its season-zero catalogue
/// against `metadata_episodes`. Returns the source `(season, film_index)`
/// pair to probe/download instead, with `season` fixed at `0` since that's
/// how every catalogue site numbers specials (§4.5).
async fn specials_source_override(
    state: &Arc<AppState>,
    site: &Arc<dyn CatalogSite>,
    slug: &str,
    display_season: i32,
    display_episode: i32,
    metadata_episodes: &[MetadataEpisode],
) -> Option<(i32, i32)> {
    let sources = site.list_specials(slug).await.ok()?;
    if sources.is_empty() {
        return None;
    }
    let mapping = state.shared.specials.map(slug, &sources, metadata_episodes).await;
    mapping
        .into_iter()
        .find(|m| m.display_season == display_season && m.display_episode == display_episode)
        .map(|m| (0, m.source_film_index))
}

#[allow(clippy::too_many_arguments)]
async fn season_search_items(
    state: &Arc<AppState>,
    config: &Config,
    site: &Arc<dyn CatalogSite>,
    slug: &str,
    series_title: &str,
    season: i32,
    metadata_episodes: &[MetadataEpisode],
    limit: usize,
) -> Vec<ReleaseItem> {
    let season_episodes: Vec<i32> = metadata_episodes
        .iter()
        .filter(|e| e.season == season)
        .map(|e| e.episode)
        .collect();

    let mut items = Vec::new();
    if !season_episodes.is_empty() {
        for episode in season_episodes {
            if items.len() >= limit {
                break;
            }
            items.extend(
                episode_search_items(
                    state,
                    config,
                    site,
                    slug,
                    series_title,
                    season,
                    episode,
                    None,
                    metadata_episodes,
                    limit - items.len(),
                )
                .await,
            );
        }
        return items;
    }

    // Tier (b): the availability cache already knows some of this season's
    // episodes from an earlier search, even with no metadata episode
    // listing to drive discovery (§4.5).
    if let Ok(cached_episodes) = state.shared.availability.fresh_episodes_in_season(site.id(), slug, season).await {
        if !cached_episodes.is_empty() {
            for episode in cached_episodes {
                if items.len() >= limit {
                    break;
                }
                items.extend(
                    episode_search_items(
                        state,
                        config,
                        site,
                        slug,
                        series_title,
                        season,
                        episode,
                        None,
                        metadata_episodes,
                        limit - items.len(),
                    )
                    .await,
                );
            }
            return items;
        }
    }

    let mut consecutive_misses = 0u32;
    for episode in 1..=config.torznab.season_search_max_episodes as i32 {
        if items.len() >= limit || consecutive_misses >= config.torznab.season_search_max_consecutive_misses {
            break;
        }
        let found = episode_search_items(
            state,
            config,
            site,
            slug,
            series_title,
            season,
            episode,
            None,
            metadata_episodes,
            limit - items.len(),
        )
        .await;
        if found.is_empty() {
            consecutive_misses += 1;
        } else {
            consecutive_misses = 0;
            items.extend(found);
        }
    }
    items
}

#[allow(clippy::too_many_arguments)]
fn build_release_items(
    config: &Config,
    series_title: &str,
    slug: &str,
    site_host: &str,
    display_season: i32,
    display_episode: i32,
    source_season: i32,
    source_episode: i32,
    language: &str,
    verdict: &AvailabilityVerdict,
) -> Vec<ReleaseItem> {
    let release_title = build_release_name(&ReleaseNameSpec {
        series_title,
        season: Some(display_season),
        episode: Some(display_episode),
        absolute_number: None,
        height: verdict.height,
        vcodec: verdict.vcodec.as_deref(),
        language,
        source_tag: &config.general.source_tag,
        release_group: &config.general.release_group,
    });

    let mut items = Vec::new();
    let make = |strm_mode: bool, title_suffix: &str| {
        let title = format!("{release_title}{title_suffix}");
        let magnet = build_magnet(&MagnetSpec {
            title: &title,
            slug,
            season: source_season,
            episode: source_episode,
            language,
            site: site_host,
            provider: verdict.provider.as_deref(),
            absolute_number: None,
            strm_mode,
        });
        ReleaseItem {
            size_bytes: estimate_size_bytes(&title),
            title,
            magnet,
            category_id: config.torznab.cat_anime,
        }
    };

    match config.strm.files_mode {
        StrmFilesMode::No => items.push(make(false, "")),
        StrmFilesMode::Only => items.push(make(true, ".STRM")),
        StrmFilesMode::Both => {
            items.push(make(false, ""));
            items.push(make(true, ".STRM"));
        }
    }
    items
}

/// Fresh cached languages for this episode if any exist, else the site's
/// default probing order (§4.5).
async fn candidate_languages(state: &Arc<AppState>, site: &Arc<dyn CatalogSite>, slug: &str, season: i32, episode: i32) -> Vec<String> {
    let fresh = state
        .shared
        .availability
        .fresh_languages(site.id(), slug, season, episode)
        .await
        .unwrap_or_default();
    if !fresh.is_empty() {
        return fresh;
    }
    site.default_languages().iter().map(|s| (*s).to_string()).collect()
}

fn rss_response(config: &Config, items: Vec<ReleaseItem>) -> Response {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None))).ok();

    let now = Utc::now().to_rfc2822();

    writer
        .create_element("rss")
        .with_attribute(("version", "2.0"))
        .with_attribute(("xmlns:torznab", "http://torznab.com/schemas/2015/feed"))
        .write_inner_content(|writer| {
            writer.create_element("channel").write_inner_content(|writer| {
                write_text_element(writer, "title", &config.torznab.indexer_name)?;
                write_text_element(writer, "description", &config.torznab.indexer_name)?;
                write_text_element(writer, "language", "en-us")?;
                write_text_element(writer, "lastBuildDate", &now)?;
                for item in &items {
                    write_item(writer, config, item)?;
                }
                Ok(())
            })?;
            Ok(())
        })
        .expect("writing to an in-memory buffer never fails");

    xml_response(writer.into_inner())
}

fn write_text_element(
    writer: &mut Writer<Vec<u8>>,
    tag: &str,
    text: &str,
) -> Result<(), quick_xml::Error> {
    writer
        .create_element(tag)
        .write_text_content(BytesText::new(text))?;
    Ok(())
}

fn write_item(writer: &mut Writer<Vec<u8>>, config: &Config, item: &ReleaseItem) -> Result<(), quick_xml::Error> {
    writer.create_element("item").write_inner_content(|writer| {
        write_text_element(writer, "title", &item.title)?;
        write_text_element(writer, "guid", &item.magnet)?;
        write_text_element(writer, "comments", &item.magnet)?;
        write_text_element(writer, "pubDate", &Utc::now().to_rfc2822())?;
        write_text_element(writer, "size", &item.size_bytes.to_string())?;

        writer
            .create_element("enclosure")
            .with_attribute(("url", item.magnet.as_str()))
            .with_attribute(("length", item.size_bytes.to_string().as_str()))
            .with_attribute(("type", "application/x-bittorrent;x-scheme-handler/magnet"))
            .write_empty()?;

        write_torznab_attr(writer, "category", &item.category_id.to_string())?;
        write_torznab_attr(writer, "seeders", &config.torznab.fake_seeders.to_string())?;
        write_torznab_attr(writer, "peers", &config.torznab.fake_leechers.to_string())?;
        write_torznab_attr(writer, "minimumratio", "1")?;
        write_torznab_attr(writer, "minimumseedtime", "0")?;
        write_torznab_attr(writer, "downloadvolumefactor", "0")?;
        write_torznab_attr(writer, "uploadvolumefactor", "1")?;
        Ok(())
    })?;
    Ok(())
}

fn write_torznab_attr(writer: &mut Writer<Vec<u8>>, name: &str, value: &str) -> Result<(), quick_xml::Error> {
    writer
        .create_element("torznab:attr")
        .with_attribute(("name", name))
        .with_attribute(("value", value))
        .write_empty()?;
    Ok(())
}

fn xml_response(body: Vec<u8>) -> Response {
    (
        [(header::CONTENT_TYPE, "application/rss+xml; charset=utf-8")],
        body,
    )
        .into_response()
}
