use std::sync::LazyLock;

use regex::Regex;

static NON_ALNUM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^A-Za-z0-9]+").unwrap());
static DOT_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\.+").unwrap());

/// Scene-style language tags for the languages AniBridge recognises out of
/// the box; anything else falls back to a sanitized form of its own name.
fn lang_tag(language: &str) -> String {
    match language {
        "German Dub" => "GER".to_string(),
        "German Sub" => "GER.SUB".to_string(),
        "English Sub" => "ENG.SUB".to_string(),
        other => safe_component(other),
    }
}

fn safe_component(s: &str) -> String {
    let replaced = NON_ALNUM.replace_all(s.trim(), ".");
    DOT_RUN.replace_all(&replaced, ".").trim_matches('.').to_string()
}

/// Public entry point for callers outside release naming (e.g. `.strm`
/// filename allocation) that need the same dot-collapsing sanitisation.
#[must_use]
pub fn safe_filename_component(s: &str) -> String {
    safe_component(s)
}

fn map_codec_name(vcodec: Option<&str>) -> &'static str {
    let Some(v) = vcodec else { return "H264" };
    let v = v.to_lowercase();
    if v.contains("hevc") || v.contains("h265") || v.contains("x265") {
        "H265"
    } else if v.contains("av01") || v.contains("av1") {
        "AV1"
    } else if v.contains("vp9") {
        "VP9"
    } else {
        "H264"
    }
}

fn map_height_to_quality(height: Option<i32>) -> &'static str {
    match height {
        Some(h) if h >= 2160 => "2160p",
        Some(h) if h >= 1440 => "1440p",
        Some(h) if h >= 1080 => "1080p",
        Some(h) if h >= 720 => "720p",
        Some(h) if h >= 480 => "480p",
        _ => "SD",
    }
}

#[derive(Debug, Clone)]
pub struct ReleaseNameSpec<'a> {
    pub series_title: &'a str,
    pub season: Option<i32>,
    pub episode: Option<i32>,
    pub absolute_number: Option<i32>,
    pub height: Option<i32>,
    pub vcodec: Option<&'a str>,
    pub language: &'a str,
    pub source_tag: &'a str,
    pub release_group: &'a str,
}

/// Builds `<Series>.S<ss>E<ee>.<quality>.<source-tag>.<codec>.<lang-tag>-<GROUP>`,
/// or `<Series>.ABS<nnn>...` when the episode is only known by absolute number.
#[must_use]
pub fn build_release_name(spec: &ReleaseNameSpec<'_>) -> String {
    let series_part = safe_component(spec.series_title);
    let se_part = if let Some(abs) = spec.absolute_number {
        format!("ABS{abs:03}")
    } else if let (Some(season), Some(episode)) = (spec.season, spec.episode) {
        format!("S{season:02}E{episode:02}")
    } else {
        String::new()
    };
    let qual_part = map_height_to_quality(spec.height);
    let codec_part = map_codec_name(spec.vcodec);
    let lang_part = lang_tag(spec.language);

    let base = [
        series_part.as_str(),
        se_part.as_str(),
        qual_part,
        spec.source_tag,
        codec_part,
        lang_part.as_str(),
    ]
    .into_iter()
    .filter(|p| !p.is_empty())
    .collect::<Vec<_>>()
    .join(".");

    let group = spec.release_group.trim();
    if group.is_empty() {
        base
    } else {
        format!("{base}-{}", group.to_uppercase())
    }
}

/// Coarse size estimate in bytes, looked up from whatever quality tag
/// appears in the release title. Cosmetic: it only needs to be monotone in
/// quality so a client ranking releases by size picks the higher rung.
#[must_use]
pub fn estimate_size_bytes(release_title: &str) -> i64 {
    let t = release_title.to_lowercase();
    if t.contains("2160p") || t.contains("4k") {
        8 * 1024 * 1024 * 1024
    } else if t.contains("1080p") {
        1_500 * 1024 * 1024
    } else if t.contains("720p") {
        700 * 1024 * 1024
    } else if t.contains("480p") {
        350 * 1024 * 1024
    } else {
        500 * 1024 * 1024
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_standard_release_name() {
        let spec = ReleaseNameSpec {
            series_title: "Some Anime!",
            season: Some(1),
            episode: Some(5),
            absolute_number: None,
            height: Some(1080),
            vcodec: Some("hevc"),
            language: "German Dub",
            source_tag: "WEB-DL",
            release_group: "anibridge",
        };
        let name = build_release_name(&spec);
        assert_eq!(name, "Some.Anime.S01E05.1080p.WEB-DL.H265.GER-ANIBRIDGE");
    }

    #[test]
    fn absolute_number_replaces_season_episode() {
        let spec = ReleaseNameSpec {
            series_title: "One Piece",
            season: None,
            episode: None,
            absolute_number: Some(42),
            height: Some(720),
            vcodec: None,
            language: "German Sub",
            source_tag: "WEB-DL",
            release_group: "",
        };
        let name = build_release_name(&spec);
        assert_eq!(name, "One.Piece.ABS042.720p.WEB-DL.H264.GER.SUB");
    }

    #[test]
    fn unknown_language_falls_back_to_sanitized_form() {
        assert_eq!(lang_tag("French Dub"), "French.Dub");
    }
}
