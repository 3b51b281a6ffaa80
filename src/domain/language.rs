use std::sync::LazyLock;

use regex::Regex;

static NON_ALPHA: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z]").unwrap());

/// Canonical language labels AniBridge reasons about everywhere else
/// (release naming, availability cache keys, provider ordering).
pub const GERMAN_DUB: &str = "German Dub";
pub const GERMAN_SUB: &str = "German Sub";
pub const ENGLISH_SUB: &str = "English Sub";
pub const ENGLISH_DUB: &str = "English Dub";

fn alias(cleaned: &str) -> Option<&'static str> {
    match cleaned {
        "german" | "ger" | "gerdub" | "dub" => Some(GERMAN_DUB),
        "germansub" | "gersub" | "subde" | "desub" => Some(GERMAN_SUB),
        "englishsub" | "engsub" | "suben" | "ensub" => Some(ENGLISH_SUB),
        "englishdub" | "engdub" | "duben" | "endub" => Some(ENGLISH_DUB),
        _ => None,
    }
}

/// Maps a free-form language label onto the closed set above. Unrecognised
/// input is returned unchanged rather than rejected — callers that need a
/// hard-fail on unknown languages check membership themselves.
#[must_use]
pub fn normalize_language(lang: Option<&str>) -> String {
    let Some(lang) = lang.filter(|s| !s.is_empty()) else {
        return GERMAN_DUB.to_string();
    };
    let cleaned = NON_ALPHA.replace_all(&lang.to_lowercase(), "").to_string();
    alias(&cleaned).map_or_else(|| lang.to_string(), str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_known_aliases() {
        assert_eq!(normalize_language(Some("de-sub")), GERMAN_SUB);
        assert_eq!(normalize_language(Some("EngDub")), ENGLISH_DUB);
        assert_eq!(normalize_language(Some("GER")), GERMAN_DUB);
    }

    #[test]
    fn defaults_to_german_dub_when_absent() {
        assert_eq!(normalize_language(None), GERMAN_DUB);
        assert_eq!(normalize_language(Some("")), GERMAN_DUB);
    }

    #[test]
    fn passes_through_unrecognised_labels() {
        assert_eq!(normalize_language(Some("French Dub")), "French Dub");
    }
}
