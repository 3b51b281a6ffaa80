//! HLS playlist rewriting (§4.8): every URI an HLS playlist references —
//! whether tucked inside a tag attribute or sitting bare on its own line —
//! must be resolved against the playlist's own URL and rewritten to a proxy
//! URL, so a client following the playlist never talks to the upstream
//! origin directly.

use url::Url;

/// Tags whose `URI="…"` attribute needs rewriting. `#EXT-X-SESSION-*` covers
/// both `#EXT-X-SESSION-DATA` and `#EXT-X-SESSION-KEY`.
const URI_ATTR_TAGS: &[&str] = &[
    "#EXT-X-KEY",
    "#EXT-X-MAP",
    "#EXT-X-MEDIA",
    "#EXT-X-I-FRAME-STREAM-INF",
    "#EXT-X-SESSION-DATA",
    "#EXT-X-SESSION-KEY",
    "#EXT-X-PRELOAD-HINT",
    "#EXT-X-RENDITION-REPORT",
];

/// Content-type/path sniff used by the proxy handler to decide whether a
/// response body needs playlist rewriting at all.
pub fn looks_like_hls(content_type: Option<&str>, path: &str) -> bool {
    if let Some(ct) = content_type {
        let ct = ct.to_ascii_lowercase();
        if ct.contains("mpegurl") || ct.contains("x-mpegurl") {
            return true;
        }
    }
    path.to_ascii_lowercase().ends_with(".m3u8")
}

/// Rewrites every URI reference in `playlist` (fetched from `base_url`) by
/// passing each absolute URL through `proxify`. Preserves attribute quoting
/// and the original trailing-newline presence/absence.
pub fn rewrite_playlist(playlist: &str, base_url: &Url, proxify: &dyn Fn(&str) -> String) -> String {
    let had_trailing_newline = playlist.ends_with('\n');
    let mut out_lines: Vec<String> = Vec::new();

    for line in playlist.lines() {
        out_lines.push(rewrite_line(line, base_url, proxify));
    }

    let mut result = out_lines.join("\n");
    if had_trailing_newline {
        result.push('\n');
    }
    result
}

fn rewrite_line(line: &str, base_url: &Url, proxify: &dyn Fn(&str) -> String) -> String {
    let trimmed = line.trim_end_matches('\r');

    if trimmed.starts_with("#EXT-X-STREAM-INF") {
        return ensure_bandwidth_attrs(trimmed);
    }

    if trimmed.starts_with('#') {
        for tag in URI_ATTR_TAGS {
            if trimmed.starts_with(tag) {
                return rewrite_uri_attr(trimmed, base_url, proxify);
            }
        }
        return trimmed.to_string();
    }

    if trimmed.trim().is_empty() {
        return trimmed.to_string();
    }

    // Bare segment/variant-playlist reference line.
    match base_url.join(trimmed.trim()) {
        Ok(absolute) => proxify(absolute.as_str()),
        Err(_) => trimmed.to_string(),
    }
}

/// Finds `URI="…"` (single occurrence per tag, per the HLS spec) and replaces
/// the quoted value with its proxified absolute form, leaving the rest of
/// the attribute list untouched.
fn rewrite_uri_attr(line: &str, base_url: &Url, proxify: &dyn Fn(&str) -> String) -> String {
    let Some(uri_pos) = line.find("URI=\"") else {
        return line.to_string();
    };
    let value_start = uri_pos + "URI=\"".len();
    let Some(rel_end) = line[value_start..].find('"') else {
        return line.to_string();
    };
    let original_uri = &line[value_start..value_start + rel_end];

    let rewritten = match base_url.join(original_uri) {
        Ok(absolute) => proxify(absolute.as_str()),
        Err(_) => original_uri.to_string(),
    };

    let mut out = String::with_capacity(line.len() + rewritten.len());
    out.push_str(&line[..value_start]);
    out.push_str(&rewritten);
    out.push_str(&line[value_start + rel_end..]);
    out
}

/// Synthesizes `BANDWIDTH`/`AVERAGE-BANDWIDTH` on a `#EXT-X-STREAM-INF` tag
/// that omits them, since some strict clients reject a master playlist
/// without one. A conservative placeholder is used — real bandwidth isn't
/// knowable from the playlist text alone.
fn ensure_bandwidth_attrs(line: &str) -> String {
    const PLACEHOLDER_BANDWIDTH: &str = "5000000";

    let has_bandwidth = line
        .split(',')
        .any(|attr| attr.trim_start().starts_with("BANDWIDTH="));
    if has_bandwidth {
        return line.to_string();
    }

    format!("{},BANDWIDTH={}", line, PLACEHOLDER_BANDWIDTH)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proxify(url: &str) -> String {
        format!("https://proxy.local/strm/proxy?u={}", urlencoding::encode(url))
    }

    #[test]
    fn rewrites_bare_segment_lines_and_preserves_trailing_newline() {
        let base = Url::parse("https://cdn.example.com/stream/playlist.m3u8").unwrap();
        let playlist = "#EXTM3U\n#EXTINF:6.000,\nseg0.ts\n#EXTINF:6.000,\nseg1.ts\n#EXT-X-ENDLIST\n";
        let rewritten = rewrite_playlist(playlist, &base, &proxify);

        assert!(rewritten.ends_with('\n'));
        assert!(rewritten.contains("proxy.local/strm/proxy?u=https%3A%2F%2Fcdn.example.com%2Fstream%2Fseg0.ts"));
        assert!(!rewritten.lines().any(|l| l == "seg0.ts" || l == "seg1.ts"));
    }

    #[test]
    fn preserves_absence_of_trailing_newline() {
        let base = Url::parse("https://cdn.example.com/stream/playlist.m3u8").unwrap();
        let playlist = "#EXTM3U\nseg0.ts";
        let rewritten = rewrite_playlist(playlist, &base, &proxify);
        assert!(!rewritten.ends_with('\n'));
    }

    #[test]
    fn rewrites_key_uri_preserving_quoting_and_other_attrs() {
        let base = Url::parse("https://cdn.example.com/stream/playlist.m3u8").unwrap();
        let playlist = "#EXT-X-KEY:METHOD=AES-128,URI=\"key.bin\",IV=0x1234\nseg0.ts\n";
        let rewritten = rewrite_playlist(playlist, &base, &proxify);
        let key_line = rewritten.lines().next().unwrap();
        assert!(key_line.starts_with("#EXT-X-KEY:METHOD=AES-128,URI=\""));
        assert!(key_line.ends_with("\",IV=0x1234"));
        assert!(key_line.contains("cdn.example.com%2Fstream%2Fkey.bin"));
    }

    #[test]
    fn adds_bandwidth_when_missing_and_leaves_existing_alone() {
        let line_missing = "#EXT-X-STREAM-INF:RESOLUTION=1920x1080";
        let out = ensure_bandwidth_attrs(line_missing);
        assert!(out.contains("BANDWIDTH="));

        let line_present = "#EXT-X-STREAM-INF:BANDWIDTH=800000,RESOLUTION=1920x1080";
        assert_eq!(ensure_bandwidth_attrs(line_present), line_present);
    }

    #[test]
    fn absolutizes_already_absolute_uris_before_proxifying() {
        let base = Url::parse("https://cdn.example.com/stream/playlist.m3u8").unwrap();
        let playlist = "#EXTM3U\nhttps://other.example.com/seg0.ts\n";
        let rewritten = rewrite_playlist(playlist, &base, &proxify);
        assert!(rewritten.contains("other.example.com%2Fseg0.ts"));
    }
}
