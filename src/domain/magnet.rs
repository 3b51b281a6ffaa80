use std::collections::HashMap;

use sha1::{Digest, Sha1};

use super::errors::MagnetError;

/// Site-specific parameter prefix. AniWorld gets its own (`aw`); every other
/// site shares `sto`, mirroring how the original only ever distinguished
/// AniWorld from "everything else".
fn site_prefix(site: &str) -> &'static str {
    if site == "aniworld.to" || site == "aniworld" {
        "aw"
    } else {
        "sto"
    }
}

fn hash_id(slug: &str, season: i32, episode: i32, language: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(format!("{slug}|{season}|{episode}|{language}").as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone)]
pub struct MagnetSpec<'a> {
    pub title: &'a str,
    pub slug: &'a str,
    pub season: i32,
    pub episode: i32,
    pub language: &'a str,
    pub site: &'a str,
    pub provider: Option<&'a str>,
    pub absolute_number: Option<i32>,
    pub strm_mode: bool,
}

/// A fully decoded magnet payload: the site-prefixed fields are normalized
/// away from their wire prefix so callers never branch on `aw_`/`sto_`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedMagnet {
    pub info_hash: String,
    pub display_name: String,
    pub site: String,
    pub slug: String,
    pub season: i32,
    pub episode: i32,
    pub language: String,
    pub provider: Option<String>,
    pub absolute_number: Option<i32>,
    pub strm_mode: bool,
}

/// Builds a self-describing magnet URI. The `xt` keeps its colons literal
/// (`urn:btih:...`) because some consumers are strict about that literal
/// form rather than its percent-encoded equivalent.
#[must_use]
pub fn build_magnet(spec: &MagnetSpec<'_>) -> String {
    let prefix = site_prefix(spec.site);
    let xt = format!(
        "urn:btih:{}",
        hash_id(spec.slug, spec.season, spec.episode, spec.language)
    );

    let mut parts = vec![
        format!("xt={xt}"),
        format!("dn={}", urlencoding::encode(spec.title)),
        format!("{prefix}_slug={}", urlencoding::encode(spec.slug)),
        format!("{prefix}_s={}", spec.season),
        format!("{prefix}_e={}", spec.episode),
        format!("{prefix}_lang={}", urlencoding::encode(spec.language)),
        format!("{prefix}_site={}", urlencoding::encode(spec.site)),
    ];
    if let Some(provider) = spec.provider {
        parts.push(format!("{prefix}_provider={}", urlencoding::encode(provider)));
    }
    if let Some(abs) = spec.absolute_number {
        parts.push(format!("{prefix}_abs={abs}"));
    }
    if spec.strm_mode {
        parts.push(format!("{prefix}_mode=strm"));
    }

    format!("magnet:?{}", parts.join("&"))
}

/// Parses a magnet URI built by [`build_magnet`]. Rejects input that isn't a
/// magnet, mixes `aw_`/`sto_` keys, or is missing a required field. Falls
/// back to the `aw_` prefix when no prefixed key is present at all, for
/// compatibility with magnets built before a prefix was added.
pub fn parse_magnet(magnet: &str) -> Result<DecodedMagnet, MagnetError> {
    let qs = magnet
        .strip_prefix("magnet:?")
        .ok_or(MagnetError::NotAMagnet)?;

    let mut flat: HashMap<String, String> = HashMap::new();
    for (k, v) in url::form_urlencoded::parse(qs.as_bytes()) {
        if v.is_empty() {
            continue;
        }
        flat.entry(k.into_owned()).or_insert_with(|| v.into_owned());
    }

    let mut prefix: Option<&str> = None;
    for key in flat.keys() {
        if let Some(found) = key.strip_prefix("aw_").map(|_| "aw") {
            if prefix.is_some_and(|p| p != found) {
                return Err(MagnetError::MixedPrefixes);
            }
            prefix = Some(found);
        } else if key.strip_prefix("sto_").is_some() {
            if prefix.is_some_and(|p| p != "sto") {
                return Err(MagnetError::MixedPrefixes);
            }
            prefix = Some("sto");
        }
    }
    let prefix = prefix.unwrap_or("aw");

    let get = |name: &str| -> Result<String, MagnetError> {
        flat.get(name)
            .cloned()
            .ok_or_else(|| MagnetError::MissingParam(name.to_string()))
    };

    let dn = get("dn")?;
    let xt = get("xt")?;
    let slug = get(&format!("{prefix}_slug"))?;
    let season: i32 = get(&format!("{prefix}_s"))?
        .parse()
        .map_err(|_| MagnetError::MissingParam(format!("{prefix}_s")))?;
    let episode: i32 = get(&format!("{prefix}_e"))?
        .parse()
        .map_err(|_| MagnetError::MissingParam(format!("{prefix}_e")))?;
    let language = get(&format!("{prefix}_lang"))?;

    let site = flat
        .get(&format!("{prefix}_site"))
        .cloned()
        .unwrap_or_else(|| if prefix == "aw" { "aniworld.to".to_string() } else { "s.to".to_string() });
    let provider = flat.get(&format!("{prefix}_provider")).cloned();
    let absolute_number = flat
        .get(&format!("{prefix}_abs"))
        .and_then(|s| s.parse::<i32>().ok());
    let strm_mode = flat
        .get(&format!("{prefix}_mode"))
        .is_some_and(|m| m == "strm");

    let info_hash = xt
        .strip_prefix("urn:btih:")
        .unwrap_or(xt.as_str())
        .to_string();

    Ok(DecodedMagnet {
        info_hash,
        display_name: dn,
        site,
        slug,
        season,
        episode,
        language,
        provider,
        absolute_number,
        strm_mode,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_fields() {
        let spec = MagnetSpec {
            title: "T",
            slug: "s",
            season: 1,
            episode: 2,
            language: "German Dub",
            site: "aniworld.to",
            provider: Some("VOE"),
            absolute_number: None,
            strm_mode: false,
        };
        let uri = build_magnet(&spec);
        assert!(uri.starts_with("magnet:?xt=urn:btih:"));
        assert!(!uri.contains("urn%3Abtih"));

        let decoded = parse_magnet(&uri).unwrap();
        assert_eq!(decoded.display_name, "T");
        assert_eq!(decoded.slug, "s");
        assert_eq!(decoded.season, 1);
        assert_eq!(decoded.episode, 2);
        assert_eq!(decoded.language, "German Dub");
        assert_eq!(decoded.provider.as_deref(), Some("VOE"));
        assert_eq!(decoded.info_hash.len(), 40);
    }

    #[test]
    fn hash_is_stable_for_same_identity() {
        let a = hash_id("slug", 1, 2, "German Dub");
        let b = hash_id("slug", 1, 2, "German Dub");
        assert_eq!(a, b);
        assert_eq!(a.len(), 40);
    }

    #[test]
    fn rejects_non_magnet_input() {
        assert_eq!(parse_magnet("http://example.com"), Err(MagnetError::NotAMagnet));
    }

    #[test]
    fn rejects_mixed_prefixes() {
        let magnet = "magnet:?xt=urn:btih:abc&dn=T&aw_slug=s&aw_s=1&aw_e=1&aw_lang=x&sto_slug=s";
        assert_eq!(parse_magnet(magnet), Err(MagnetError::MixedPrefixes));
    }

    #[test]
    fn sto_prefix_used_for_non_aniworld_sites() {
        let spec = MagnetSpec {
            title: "T",
            slug: "s",
            season: 1,
            episode: 1,
            language: "German Sub",
            site: "megakino",
            provider: None,
            absolute_number: Some(42),
            strm_mode: true,
        };
        let uri = build_magnet(&spec);
        assert!(uri.contains("sto_slug="));
        assert!(uri.contains("sto_abs=42"));
        assert!(uri.contains("sto_mode=strm"));

        let decoded = parse_magnet(&uri).unwrap();
        assert_eq!(decoded.absolute_number, Some(42));
        assert!(decoded.strm_mode);
    }
}
