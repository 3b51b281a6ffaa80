use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_opt_str(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "true" | "1" | "yes" | "on"))
        .unwrap_or(default)
}

fn env_csv(key: &str, default: &[&str]) -> Vec<String> {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => v
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => default.iter().map(|s| (*s).to_string()).collect(),
    }
}

/// Top-level configuration, assembled once at startup from the process environment
/// (optionally pre-loaded from a `.env` file). Never read from a config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub general: GeneralConfig,
    pub provider: ProviderConfig,
    pub torznab: TorznabConfig,
    pub strm: StrmConfig,
    pub outbound: OutboundConfig,
    pub specials: SpecialsConfig,
    pub observability: ObservabilityConfig,
    pub server: ServerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            provider: ProviderConfig::default(),
            torznab: TorznabConfig::default(),
            strm: StrmConfig::default(),
            outbound: OutboundConfig::default(),
            specials: SpecialsConfig::default(),
            observability: ObservabilityConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    pub download_dir: PathBuf,
    pub data_dir: PathBuf,
    pub database_path: String,
    pub qbit_public_save_path: Option<String>,
    pub max_concurrency: usize,
    pub source_tag: String,
    pub release_group: String,
    pub availability_ttl_hours: f64,
    pub downloads_ttl_hours: f64,
    pub cleanup_scan_interval_min: u64,
    pub test_mode: bool,
    pub worker_threads: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        let in_docker = Path::new("/.dockerenv").exists();
        let default_download = if in_docker {
            PathBuf::from("/data/downloads/anime")
        } else {
            std::env::current_dir()
                .unwrap_or_default()
                .join("data/downloads/anime")
        };
        let default_data = if in_docker {
            PathBuf::from("/data")
        } else {
            std::env::current_dir().unwrap_or_default().join("data")
        };

        let download_dir = std::env::var("DOWNLOAD_DIR")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(default_download);
        let data_dir = std::env::var("DATA_DIR")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(default_data);

        let qbit_public_save_path = std::env::var("QBIT_PUBLIC_SAVE_PATH")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        let database_path = format!("sqlite:{}", data_dir.join("anibridge_jobs.db").display());

        Self {
            max_concurrency: env_parse("MAX_CONCURRENCY", 3usize).max(1),
            source_tag: env_str("SOURCE_TAG", "WEB"),
            release_group: env_str("RELEASE_GROUP", "aniworld"),
            availability_ttl_hours: env_parse("AVAILABILITY_TTL_HOURS", 24.0),
            downloads_ttl_hours: env_parse("DOWNLOADS_TTL_HOURS", 24.0 * 14.0),
            cleanup_scan_interval_min: env_parse("CLEANUP_SCAN_INTERVAL_MIN", 30u64),
            test_mode: env_bool("ANIBRIDGE_TEST_MODE", false),
            worker_threads: env_parse("WORKER_THREADS", 0usize),
            download_dir,
            data_dir,
            database_path,
            qbit_public_save_path,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub order: Vec<String>,
    pub titles_refresh_hours: HashMap<String, f64>,
    pub proxy_enabled: bool,
    pub proxy_scope: String,
    pub proxy_url: Option<String>,
    pub public_ip_check_enabled: bool,
    pub public_ip_check_interval_min: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        let mut titles_refresh_hours = HashMap::new();
        titles_refresh_hours.insert(
            "aniworld".to_string(),
            env_parse("ANIWORLD_TITLES_REFRESH_HOURS", 24.0),
        );
        titles_refresh_hours.insert("sto".to_string(), env_parse("STO_TITLES_REFRESH_HOURS", 24.0));
        titles_refresh_hours.insert(
            "megakino".to_string(),
            env_parse("MEGAKINO_TITLES_REFRESH_HOURS", 24.0),
        );

        Self {
            order: env_csv(
                "PROVIDER_ORDER",
                &[
                    "VOE",
                    "Filemoon",
                    "Streamtape",
                    "Vidmoly",
                    "SpeedFiles",
                    "Doodstream",
                    "LoadX",
                    "Luluvdo",
                    "Vidoza",
                ],
            ),
            titles_refresh_hours,
            proxy_enabled: env_bool("PROXY_ENABLED", false),
            proxy_scope: env_str("PROXY_SCOPE", "extraction"),
            proxy_url: env_opt_str("PROXY_URL"),
            public_ip_check_enabled: env_bool("PUBLIC_IP_CHECK_ENABLED", false),
            public_ip_check_interval_min: env_parse("PUBLIC_IP_CHECK_INTERVAL_MIN", 60u64),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TorznabConfig {
    pub indexer_name: String,
    pub api_key: Option<String>,
    pub cat_anime: u32,
    pub fake_seeders: u32,
    pub fake_leechers: u32,
    pub return_test_result: bool,
    pub test_title: String,
    pub test_slug: String,
    pub test_season: i32,
    pub test_episode: i32,
    pub test_language: String,
    pub season_search_max_episodes: u32,
    pub season_search_max_consecutive_misses: u32,
}

impl Default for TorznabConfig {
    fn default() -> Self {
        Self {
            indexer_name: env_str("INDEXER_NAME", "AniBridge Torznab"),
            api_key: std::env::var("INDEXER_API_KEY")
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
            cat_anime: env_parse("TORZNAB_CAT_ANIME", 5070u32),
            fake_seeders: env_parse("TORZNAB_FAKE_SEEDERS", 999u32),
            fake_leechers: env_parse("TORZNAB_FAKE_LEECHERS", 787u32),
            return_test_result: env_bool("TORZNAB_RETURN_TEST_RESULT", true),
            test_title: env_str("TORZNAB_TEST_TITLE", "AniBridge Connectivity Test"),
            test_slug: env_str("TORZNAB_TEST_SLUG", "connectivity-test"),
            test_season: env_parse("TORZNAB_TEST_SEASON", 1i32),
            test_episode: env_parse("TORZNAB_TEST_EPISODE", 1i32),
            test_language: env_str("TORZNAB_TEST_LANGUAGE", "German Dub"),
            season_search_max_episodes: env_parse("TORZNAB_SEASON_SEARCH_MAX_EPISODES", 50u32),
            season_search_max_consecutive_misses: env_parse(
                "TORZNAB_SEASON_SEARCH_MAX_CONSECUTIVE_MISSES",
                3u32,
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrmFilesMode {
    No,
    Only,
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrmProxyMode {
    Direct,
    Proxy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrmProxyAuth {
    None,
    Apikey,
    Token,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrmConfig {
    pub files_mode: StrmFilesMode,
    pub proxy_mode: StrmProxyMode,
    pub public_base_url: String,
    pub proxy_auth: StrmProxyAuth,
    pub proxy_secret: Option<String>,
    pub proxy_token_ttl_seconds: i64,
    pub proxy_cache_ttl_seconds: i64,
    pub remux_enabled: bool,
    pub remux_cache_dir: PathBuf,
    pub remux_cache_ttl_seconds: i64,
    pub remux_build_timeout_seconds: u64,
    pub remux_max_concurrent_builds: usize,
    pub remux_fail_cooldown_seconds: i64,
    pub remux_hint_bandwidth: u64,
    pub download_rate_limit_bytes_per_sec: Option<u64>,
}

impl Default for StrmConfig {
    fn default() -> Self {
        let data_dir = GeneralConfig::default().data_dir;
        Self {
            files_mode: match env_str("STRM_FILES_MODE", "no").as_str() {
                "only" => StrmFilesMode::Only,
                "both" => StrmFilesMode::Both,
                _ => StrmFilesMode::No,
            },
            proxy_mode: match env_str("STRM_PROXY_MODE", "direct").as_str() {
                "proxy" => StrmProxyMode::Proxy,
                _ => StrmProxyMode::Direct,
            },
            public_base_url: env_str("STRM_PUBLIC_BASE_URL", "http://localhost:8000"),
            proxy_auth: match env_str("STRM_PROXY_AUTH", "none").as_str() {
                "apikey" => StrmProxyAuth::Apikey,
                "token" => StrmProxyAuth::Token,
                _ => StrmProxyAuth::None,
            },
            proxy_secret: std::env::var("STRM_PROXY_SECRET")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            proxy_token_ttl_seconds: env_parse("STRM_PROXY_TOKEN_TTL_SECONDS", 3600i64),
            proxy_cache_ttl_seconds: env_parse("STRM_PROXY_CACHE_TTL_SECONDS", 1800i64),
            remux_enabled: env_bool("STRM_PROXY_HLS_REMUX_CACHED_ENABLED", false),
            remux_cache_dir: std::env::var("STRM_PROXY_HLS_REMUX_CACHE_DIR")
                .ok()
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("remux_cache")),
            remux_cache_ttl_seconds: env_parse("STRM_PROXY_HLS_REMUX_CACHE_TTL_SECONDS", 86_400i64),
            remux_build_timeout_seconds: env_parse(
                "STRM_PROXY_HLS_REMUX_BUILD_TIMEOUT_SECONDS",
                120u64,
            ),
            remux_max_concurrent_builds: env_parse(
                "STRM_PROXY_HLS_REMUX_MAX_CONCURRENT_BUILDS",
                2usize,
            )
            .max(1),
            remux_fail_cooldown_seconds: env_parse(
                "STRM_PROXY_HLS_REMUX_FAIL_COOLDOWN_SECONDS",
                300i64,
            ),
            remux_hint_bandwidth: env_parse("STRM_PROXY_HLS_HINT_BANDWIDTH", 2_000_000u64),
            download_rate_limit_bytes_per_sec: std::env::var("DOWNLOAD_RATE_LIMIT_BYTES_PER_SEC")
                .ok()
                .and_then(|v| v.trim().parse().ok()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundConfig {
    pub connect_timeout_seconds: u64,
    pub read_timeout_seconds: u64,
    pub resolver_probe_timeout_seconds: u64,
    pub upstream_stream_open_timeout_seconds: u64,
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            connect_timeout_seconds: 10,
            read_timeout_seconds: 60,
            resolver_probe_timeout_seconds: 6,
            upstream_stream_open_timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecialsConfig {
    pub metadata_enabled: bool,
    pub match_confidence_threshold: f64,
    pub metadata_timeout_seconds: u64,
    pub metadata_cache_ttl_minutes: u64,
}

impl Default for SpecialsConfig {
    fn default() -> Self {
        Self {
            metadata_enabled: env_bool("SPECIALS_METADATA_ENABLED", false),
            match_confidence_threshold: env_parse("SPECIALS_MATCH_CONFIDENCE_THRESHOLD", 0.72),
            metadata_timeout_seconds: env_parse("SPECIALS_METADATA_TIMEOUT_SECONDS", 8u64),
            metadata_cache_ttl_minutes: env_parse("SPECIALS_METADATA_CACHE_TTL_MINUTES", 360u64),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub log_format: String,
    pub loki_url: Option<String>,
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: env_str("LOG_LEVEL", "info"),
            log_format: env_str("LOG_FORMAT", "pretty"),
            loki_url: std::env::var("LOKI_URL").ok().filter(|v| !v.trim().is_empty()),
            metrics_enabled: env_bool("METRICS_ENABLED", true),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub cors_allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: env_str("HTTP_LISTEN_ADDR", "0.0.0.0:8000"),
            cors_allowed_origins: env_csv("CORS_ALLOWED_ORIGINS", &["*"]),
        }
    }
}

impl Config {
    /// Load `.env` if present, then build the config from the environment.
    pub fn load() -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(path) => info!("Loaded environment overrides from {}", path.display()),
            Err(dotenvy::Error::Io(_)) => {}
            Err(e) => warn!("Failed to parse .env file: {e}"),
        }
        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    /// Reject invalid combinations and make sure the filesystem roots this
    /// process depends on are writable, before any listener binds.
    pub fn validate(&self) -> Result<()> {
        if self.general.max_concurrency == 0 {
            bail!("MAX_CONCURRENCY must be >= 1");
        }

        if self.strm.proxy_auth == StrmProxyAuth::Token && self.strm.proxy_secret.is_none() {
            bail!("STRM_PROXY_AUTH=token requires STRM_PROXY_SECRET to be set");
        }
        if self.strm.proxy_auth == StrmProxyAuth::Apikey && self.strm.proxy_secret.is_none() {
            bail!("STRM_PROXY_AUTH=apikey requires STRM_PROXY_SECRET to be set");
        }

        if self.provider.proxy_enabled && self.provider.proxy_url.is_none() {
            bail!("PROXY_ENABLED=true requires PROXY_URL to be set");
        }

        Self::ensure_writable_dir(&self.general.download_dir, "DOWNLOAD_DIR")
            .context("download directory is not writable")?;
        Self::ensure_writable_dir(&self.general.data_dir, "DATA_DIR")
            .context("data directory is not writable")?;

        Ok(())
    }

    fn ensure_writable_dir(path: &Path, label: &str) -> Result<()> {
        std::fs::create_dir_all(path)
            .with_context(|| format!("{label}: cannot create {}", path.display()))?;
        let probe = path.join(".anibridge-write-test");
        std::fs::write(&probe, b"ok")
            .with_context(|| format!("{label}: {} is not writable", path.display()))?;
        let _ = std::fs::remove_file(&probe);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_provider_order() {
        let config = Config::default();
        assert!(config.provider.order.contains(&"VOE".to_string()));
        assert_eq!(config.general.max_concurrency, 3);
    }

    #[test]
    fn token_auth_without_secret_is_rejected() {
        let mut config = Config::default();
        config.strm.proxy_auth = StrmProxyAuth::Token;
        config.strm.proxy_secret = None;
        assert!(config.validate().is_err());
    }

    #[test]
    fn proxy_enabled_without_url_is_rejected() {
        let mut config = Config::default();
        config.provider.proxy_enabled = true;
        config.provider.proxy_url = None;
        assert!(config.validate().is_err());

        config.provider.proxy_url = Some("http://127.0.0.1:8080".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn env_csv_falls_back_to_default_when_unset() {
        // SAFETY: test-local env var name unlikely to collide; no other test reads it.
        unsafe {
            std::env::remove_var("ANIBRIDGE_TEST_CSV_VAR_NOT_SET");
        }
        let parsed = env_csv("ANIBRIDGE_TEST_CSV_VAR_NOT_SET", &["a", "b"]);
        assert_eq!(parsed, vec!["a".to_string(), "b".to_string()]);
    }
}
