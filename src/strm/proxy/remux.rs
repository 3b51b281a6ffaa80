//! Optional MP4 remux cache (§4.8): for clients that can't consume an HLS
//! rewrite, build and cache a faststart MP4 copy of the resolved stream on
//! disk, keyed by episode identity plus a fingerprint of the upstream URL.
//! The filesystem is the source of truth; a lock file coordinates concurrent
//! builders across a fleet, an in-process map prevents duplicate launches
//! within this one process.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, Semaphore};
use tracing::{info, warn};
use url::Url;

use crate::config::StrmConfig;

const REMUX_VERSION: u32 = 1;
const LOCK_RECLAIM_GRACE_SECONDS: u64 = 30;
const CLEANUP_MIN_INTERVAL_SECONDS: u64 = 300;

/// The episode-identity half of a remux cache key; the other half is the
/// upstream URL's [`source_fingerprint`].
pub struct RemuxKeyParts<'a> {
    pub site: &'a str,
    pub slug: &'a str,
    pub season: i32,
    pub episode: i32,
    pub language: &'a str,
    pub provider: &'a str,
}

/// Query parameters known to carry volatile auth/expiry material; stripped
/// before fingerprinting so a re-signed URL for the same underlying asset
/// hashes identically.
const VOLATILE_QUERY_PARAMS: &[&str] = &[
    "exp",
    "expires",
    "sig",
    "signature",
    "token",
    "auth",
    "hmac",
    "policy",
    "key-pair-id",
];

fn is_volatile_param(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    VOLATILE_QUERY_PARAMS.contains(&key.as_str()) || key.starts_with("x-amz-")
}

/// SHA-256 (first 24 hex chars) over the lower-cased scheme+host+path plus
/// the query string with volatile params stripped and the rest sorted.
pub fn source_fingerprint(url: &Url) -> String {
    let scheme_host_path = format!(
        "{}://{}{}",
        url.scheme().to_ascii_lowercase(),
        url.host_str().unwrap_or("").to_ascii_lowercase(),
        url.path().to_ascii_lowercase()
    );

    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_volatile_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    params.sort();

    let query = params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");

    let mut hasher = Sha256::new();
    hasher.update(scheme_host_path.as_bytes());
    hasher.update(b"?");
    hasher.update(query.as_bytes());
    format!("{:x}", hasher.finalize())[..24].to_string()
}

/// SHA-256 over the canonical (sorted-key) JSON object `{site, slug, season,
/// episode, language, provider, source_fingerprint, remux_version}`.
pub fn cache_key(parts: &RemuxKeyParts<'_>, source_fingerprint: &str) -> String {
    let canonical = serde_json::json!({
        "episode": parts.episode,
        "language": parts.language,
        "provider": parts.provider,
        "remux_version": REMUX_VERSION,
        "season": parts.season,
        "site": parts.site,
        "slug": parts.slug,
        "source_fingerprint": source_fingerprint,
    });
    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
enum RemuxMeta {
    Ready {
        created_at: chrono::DateTime<Utc>,
        expires_at_ts: i64,
    },
    Failed {
        reason: String,
        failed_at: chrono::DateTime<Utc>,
    },
}

pub enum RemuxOutcome {
    /// Artifact is on disk and ready to serve.
    Ready(PathBuf),
    /// Not ready within the short synchronous wait window; caller should
    /// fall back to HLS rewriting.
    FallBackToHls,
}

pub struct RemuxCache {
    config: StrmConfig,
    semaphore: Arc<Semaphore>,
    active_builds: Mutex<HashMap<String, ()>>,
    last_cleanup: Mutex<Option<std::time::Instant>>,
}

impl RemuxCache {
    pub fn new(config: StrmConfig) -> Self {
        let max_concurrent = config.remux_max_concurrent_builds.max(1);
        Self {
            config,
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            active_builds: Mutex::new(HashMap::new()),
            last_cleanup: Mutex::new(None),
        }
    }

    fn artifact_path(&self, key: &str) -> PathBuf {
        self.config.remux_cache_dir.join(format!("{key}.mp4"))
    }

    fn tmp_path(&self, key: &str) -> PathBuf {
        self.config.remux_cache_dir.join(format!("{key}.tmp.mp4"))
    }

    fn lock_path(&self, key: &str) -> PathBuf {
        self.config.remux_cache_dir.join(format!("{key}.lock"))
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.config.remux_cache_dir.join(format!("{key}.meta.json"))
    }

    fn short_wait(&self) -> Duration {
        let seconds = (self.config.remux_build_timeout_seconds as f64 / 40.0).clamp(1.0, 5.0);
        Duration::from_secs_f64(seconds)
    }

    /// Resolves the artifact for `key`, building it if absent, waiting a
    /// short window for an in-flight build, and falling back to HLS when the
    /// artifact can't be made ready within that window.
    pub async fn resolve(self: &Arc<Self>, key: String, upstream_url: Url, client: reqwest::Client) -> RemuxOutcome {
        if !self.config.remux_enabled {
            return RemuxOutcome::FallBackToHls;
        }

        self.maybe_cleanup().await;

        if let Some(meta) = self.read_meta(&key).await {
            match meta {
                RemuxMeta::Ready { expires_at_ts, .. } => {
                    let now = now_ts();
                    if now < expires_at_ts && self.artifact_path(&key).exists() {
                        return RemuxOutcome::Ready(self.artifact_path(&key));
                    }
                }
                RemuxMeta::Failed { failed_at, .. } => {
                    let cooldown = Duration::from_secs(self.config.remux_fail_cooldown_seconds.max(0) as u64);
                    let age = Utc::now().signed_duration_since(failed_at);
                    if age.num_seconds() >= 0 && (age.to_std().unwrap_or(Duration::ZERO)) < cooldown {
                        return RemuxOutcome::FallBackToHls;
                    }
                }
            }
        }

        self.reclaim_stale_lock(&key).await;

        let already_building = {
            let active = self.active_builds.lock().await;
            active.contains_key(&key)
        };

        if !already_building {
            self.launch_build(key.clone(), upstream_url, client);
        }

        self.wait_for_ready(&key).await
    }

    async fn wait_for_ready(&self, key: &str) -> RemuxOutcome {
        let deadline = std::time::Instant::now() + self.short_wait();
        loop {
            if let Some(RemuxMeta::Ready { expires_at_ts, .. }) = self.read_meta(key).await {
                if now_ts() < expires_at_ts && self.artifact_path(key).exists() {
                    return RemuxOutcome::Ready(self.artifact_path(key));
                }
            }
            if std::time::Instant::now() >= deadline {
                return RemuxOutcome::FallBackToHls;
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }

    fn launch_build(self: &Arc<Self>, key: String, upstream_url: Url, client: reqwest::Client) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let _ = this.active_builds.lock().await.insert(key.clone(), ());
            let permit = this.semaphore.clone().acquire_owned().await;
            let result = this.build(&key, &upstream_url, &client).await;
            drop(permit);
            this.active_builds.lock().await.remove(&key);
            if let Err(err) = result {
                warn!(key = %key, error = %err, "remux build failed");
            }
        });
    }

    async fn build(&self, key: &str, upstream_url: &Url, client: &reqwest::Client) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.config.remux_cache_dir).await?;

        let lock_path = self.lock_path(key);
        if tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
            .await
            .is_err()
        {
            // Someone else (another process, or a previous in-process launch
            // we lost the race with) is already building this key.
            return Ok(());
        }

        let outcome = self
            .run_ffmpeg_pipeline(key, upstream_url, client)
            .await;

        let _ = tokio::fs::remove_file(&lock_path).await;

        match outcome {
            Ok(()) => {
                let expires_at_ts = now_ts() + self.config.remux_cache_ttl_seconds.max(0);
                self.write_meta(
                    key,
                    &RemuxMeta::Ready {
                        created_at: Utc::now(),
                        expires_at_ts,
                    },
                )
                .await?;
                info!(key = %key, "remux build succeeded");
                Ok(())
            }
            Err(err) => {
                self.write_meta(
                    key,
                    &RemuxMeta::Failed {
                        reason: err.to_string(),
                        failed_at: Utc::now(),
                    },
                )
                .await?;
                Err(err)
            }
        }
    }

    async fn run_ffmpeg_pipeline(&self, key: &str, upstream_url: &Url, client: &reqwest::Client) -> anyhow::Result<()> {
        // Validate the upstream is reachable before paying ffmpeg's startup
        // cost; ffmpeg itself performs the actual fetch over the network.
        let head = client.head(upstream_url.as_str()).send().await;
        if let Ok(resp) = head {
            if !resp.status().is_success() && !resp.status().is_redirection() {
                anyhow::bail!("upstream returned status {}", resp.status());
            }
        }

        let tmp_path = self.tmp_path(key);
        let artifact_path = self.artifact_path(key);

        let timeout = Duration::from_secs(self.config.remux_build_timeout_seconds.max(1));
        let status = tokio::time::timeout(
            timeout,
            tokio::process::Command::new("ffmpeg")
                .arg("-y")
                .arg("-i")
                .arg(upstream_url.as_str())
                .arg("-c")
                .arg("copy")
                .arg("-movflags")
                .arg("+faststart")
                .arg("-fflags")
                .arg("+genpts")
                .arg("-avoid_negative_ts")
                .arg("make_zero")
                .arg(&tmp_path)
                .status(),
        )
        .await
        .map_err(|_| anyhow::anyhow!("ffmpeg build timed out after {:?}", timeout))?
        .map_err(|e| anyhow::anyhow!("failed to spawn ffmpeg: {e}"))?;

        if !status.success() {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            anyhow::bail!("ffmpeg exited with status {status}");
        }

        let probe_timeout = Duration::from_secs(self.config.remux_build_timeout_seconds.max(1).min(30));
        let probe = tokio::time::timeout(probe_timeout, probe_artifact(tmp_path.clone()))
            .await
            .map_err(|_| anyhow::anyhow!("ffprobe validation timed out"))?;

        let probe = match probe {
            Some(p) => p,
            None => {
                let _ = tokio::fs::remove_file(&tmp_path).await;
                anyhow::bail!("ffprobe could not read the remuxed artifact");
            }
        };

        if probe.duration_seconds < 30.0 {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            anyhow::bail!("remuxed artifact duration {:.1}s below 30s minimum", probe.duration_seconds);
        }

        let bitrate = probe.bitrate_bps.unwrap_or_else(|| {
            const CONTAINER_OVERHEAD_FACTOR: f64 = 0.97;
            (probe.artifact_size_bytes as f64 * 8.0 / probe.duration_seconds.max(1.0)) * CONTAINER_OVERHEAD_FACTOR
        });
        if bitrate <= 0.0 {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            anyhow::bail!("remuxed artifact has no usable bitrate");
        }

        tokio::fs::rename(&tmp_path, &artifact_path).await?;
        Ok(())
    }

    async fn read_meta(&self, key: &str) -> Option<RemuxMeta> {
        let bytes = tokio::fs::read(self.meta_path(key)).await.ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    async fn write_meta(&self, key: &str, meta: &RemuxMeta) -> anyhow::Result<()> {
        let tmp = self.meta_path(key).with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec(meta)?).await?;
        tokio::fs::rename(&tmp, self.meta_path(key)).await?;
        Ok(())
    }

    async fn reclaim_stale_lock(&self, key: &str) {
        let lock_path = self.lock_path(key);
        let Ok(metadata) = tokio::fs::metadata(&lock_path).await else {
            return;
        };
        let Ok(modified) = metadata.modified() else {
            return;
        };
        let age = SystemTime::now().duration_since(modified).unwrap_or(Duration::ZERO);
        let stale_after = Duration::from_secs(self.config.remux_build_timeout_seconds) + Duration::from_secs(LOCK_RECLAIM_GRACE_SECONDS);
        if age > stale_after {
            warn!(key = %key, "reclaiming stale remux lock");
            let _ = tokio::fs::remove_file(&lock_path).await;
        }
    }

    async fn maybe_cleanup(&self) {
        {
            let mut last = self.last_cleanup.lock().await;
            if let Some(t) = *last {
                if t.elapsed() < Duration::from_secs(CLEANUP_MIN_INTERVAL_SECONDS) {
                    return;
                }
            }
            *last = Some(std::time::Instant::now());
        }

        let Ok(mut entries) = tokio::fs::read_dir(&self.config.remux_cache_dir).await else {
            return;
        };
        let now = now_ts();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            if let Some(key) = name.strip_suffix(".meta.json") {
                if let Some(RemuxMeta::Ready { expires_at_ts, .. }) = self.read_meta(key).await {
                    if now >= expires_at_ts {
                        let _ = tokio::fs::remove_file(&path).await;
                        let _ = tokio::fs::remove_file(self.artifact_path(key)).await;
                    }
                } else if let Some(RemuxMeta::Failed { failed_at, .. }) = self.read_meta(key).await {
                    let cooldown = Duration::from_secs(self.config.remux_fail_cooldown_seconds.max(0) as u64);
                    let age = Utc::now().signed_duration_since(failed_at);
                    if age.to_std().unwrap_or(Duration::MAX) >= cooldown {
                        let _ = tokio::fs::remove_file(&path).await;
                    }
                }
            } else if name.ends_with(".tmp.mp4") {
                if let Ok(metadata) = entry.metadata().await {
                    if let Ok(modified) = metadata.modified() {
                        let age = SystemTime::now().duration_since(modified).unwrap_or(Duration::ZERO);
                        if age > Duration::from_secs(self.config.remux_build_timeout_seconds * 2) {
                            let _ = tokio::fs::remove_file(&path).await;
                        }
                    }
                }
            } else if name.ends_with(".lock") {
                if let Some(key) = name.strip_suffix(".lock") {
                    self.reclaim_stale_lock(key).await;
                }
            }
        }
    }
}

fn now_ts() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

struct ProbeResult {
    duration_seconds: f64,
    bitrate_bps: Option<f64>,
    artifact_size_bytes: u64,
}

async fn probe_artifact(path: PathBuf) -> Option<ProbeResult> {
    let size = tokio::fs::metadata(&path).await.ok()?.len();
    tokio::task::spawn_blocking(move || {
        let info = ffprobe::ffprobe(&path).ok()?;
        let duration_seconds: f64 = info
            .format
            .duration
            .as_deref()
            .and_then(|d| d.parse().ok())
            .unwrap_or(0.0);
        let bitrate_bps: Option<f64> = info.format.bit_rate.as_deref().and_then(|b| b.parse().ok());
        Some(ProbeResult {
            duration_seconds,
            bitrate_bps,
            artifact_size_bytes: size,
        })
    })
    .await
    .ok()
    .flatten()
}

#[allow(dead_code)]
fn _assert_path_helpers_used(_p: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_ignores_volatile_params_and_their_order() {
        let a = Url::parse("https://CDN.example.com/v/seg.ts?exp=100&b=2&a=1").unwrap();
        let b = Url::parse("https://cdn.example.com/v/seg.ts?a=1&b=2&exp=999&sig=deadbeef").unwrap();
        assert_eq!(source_fingerprint(&a), source_fingerprint(&b));
    }

    #[test]
    fn fingerprint_differs_on_path() {
        let a = Url::parse("https://cdn.example.com/v/seg1.ts").unwrap();
        let b = Url::parse("https://cdn.example.com/v/seg2.ts").unwrap();
        assert_ne!(source_fingerprint(&a), source_fingerprint(&b));
    }

    #[test]
    fn cache_key_is_stable_for_equal_inputs() {
        let parts = RemuxKeyParts {
            site: "aniworld",
            slug: "my-show",
            season: 1,
            episode: 2,
            language: "German Dub",
            provider: "VOE",
        };
        let fp = "abc123";
        assert_eq!(cache_key(&parts, fp), cache_key(&parts, fp));
    }

    #[test]
    fn cache_key_differs_on_episode() {
        let base = RemuxKeyParts {
            site: "aniworld",
            slug: "my-show",
            season: 1,
            episode: 2,
            language: "German Dub",
            provider: "VOE",
        };
        let other = RemuxKeyParts { episode: 3, ..base_copy(&base) };
        assert_ne!(cache_key(&base, "fp"), cache_key(&other, "fp"));
    }

    fn base_copy<'a>(p: &RemuxKeyParts<'a>) -> RemuxKeyParts<'a> {
        RemuxKeyParts {
            site: p.site,
            slug: p.slug,
            season: p.season,
            episode: p.episode,
            language: p.language,
            provider: p.provider,
        }
    }
}
