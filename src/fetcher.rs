//! External media fetcher: streams a resolved direct URL to disk with
//! progress callbacks, cancellation, and an optional byte-rate cap (§4.7,
//! §5). AniBridge never speaks BitTorrent; this is the one place bytes
//! actually cross the network into a file on behalf of a download Job.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio::io::AsyncWriteExt;

use crate::domain::errors::DownloadError;

#[derive(Debug, Clone, Copy)]
pub struct FetchProgress {
    pub downloaded_bytes: u64,
    pub total_bytes: Option<u64>,
    pub speed_bytes_per_sec: Option<f64>,
    pub eta_seconds: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub rate_limit_bytes_per_sec: Option<u64>,
    pub timeout: Duration,
}

/// Streams `url` to `dest`, writing through a sibling `.part` file and
/// renaming on success so a reader never observes a truncated download.
/// Checks `cancel` between chunks rather than only at the start, so a
/// cancellation request takes effect mid-transfer instead of after it
/// completes.
pub async fn fetch_to_file<F>(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
    cancel: &AtomicBool,
    options: &FetchOptions,
    mut on_progress: F,
) -> Result<u64, DownloadError>
where
    F: FnMut(FetchProgress) + Send,
{
    let resp = client
        .get(url)
        .timeout(options.timeout)
        .send()
        .await
        .map_err(|e| DownloadError::Upstream(e.into()))?;
    if !resp.status().is_success() {
        return Err(DownloadError::Upstream(anyhow::anyhow!(
            "upstream returned status {}",
            resp.status()
        )));
    }
    let total_bytes = resp.content_length();

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| DownloadError::FilesystemPermission(e.to_string()))?;
    }

    let tmp_path = dest.with_extension("part");
    let mut file = tokio::fs::File::create(&tmp_path)
        .await
        .map_err(|e| DownloadError::FilesystemPermission(e.to_string()))?;

    let mut stream = resp.bytes_stream();
    let mut downloaded: u64 = 0;
    let start = Instant::now();
    let mut last_report = Instant::now();

    while let Some(chunk) = stream.next().await {
        if cancel.load(Ordering::SeqCst) {
            drop(file);
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(DownloadError::Cancelled);
        }

        let chunk = chunk.map_err(|e| DownloadError::Upstream(e.into()))?;
        file.write_all(&chunk)
            .await
            .map_err(|e| DownloadError::FilesystemPermission(e.to_string()))?;
        downloaded += chunk.len() as u64;

        if let Some(limit) = options.rate_limit_bytes_per_sec.filter(|l| *l > 0) {
            let elapsed = start.elapsed().as_secs_f64();
            let expected = downloaded as f64 / limit as f64;
            if expected > elapsed {
                tokio::time::sleep(Duration::from_secs_f64(expected - elapsed)).await;
            }
        }

        if last_report.elapsed() >= Duration::from_millis(500) {
            let elapsed = start.elapsed().as_secs_f64().max(0.001);
            let speed = downloaded as f64 / elapsed;
            let eta = total_bytes.map(|t| {
                let remaining = t.saturating_sub(downloaded) as f64;
                (remaining / speed.max(1.0)) as i64
            });
            on_progress(FetchProgress {
                downloaded_bytes: downloaded,
                total_bytes,
                speed_bytes_per_sec: Some(speed),
                eta_seconds: eta,
            });
            last_report = Instant::now();
        }
    }

    file.flush()
        .await
        .map_err(|e| DownloadError::FilesystemPermission(e.to_string()))?;
    drop(file);
    tokio::fs::rename(&tmp_path, dest)
        .await
        .map_err(|e| DownloadError::FilesystemPermission(e.to_string()))?;

    on_progress(FetchProgress {
        downloaded_bytes: downloaded,
        total_bytes: Some(total_bytes.unwrap_or(downloaded)),
        speed_bytes_per_sec: None,
        eta_seconds: Some(0),
    });

    Ok(downloaded)
}

/// Best-effort ffprobe pass over a finished download, used as a fallback
/// when the resolver's own metadata-only probe didn't already learn the
/// stream's height/codec. Runs on the blocking pool since ffprobe shells out.
pub async fn probe_media(path: &Path) -> Option<(Option<i32>, Option<String>)> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let info = ffprobe::ffprobe(&path).ok()?;
        let video = info
            .streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some("video"))?;
        Some((video.height, video.codec_name.clone()))
    })
    .await
    .ok()
    .flatten()
}
