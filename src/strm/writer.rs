use std::path::{Path, PathBuf};

use tokio::fs;

use crate::domain::naming::safe_filename_component;

/// Picks a `.strm` path under `download_dir` for one episode, sanitising the
/// basename and avoiding collisions with an existing file by appending a
/// numeric suffix — media servers key off the filename alone, so two
/// episodes must never share one.
pub async fn allocate_path(
    download_dir: &Path,
    series_title: &str,
    season: i32,
    episode: i32,
) -> anyhow::Result<PathBuf> {
    let base = format!(
        "{}.S{season:02}E{episode:02}",
        safe_filename_component(series_title)
    );
    let mut candidate = download_dir.join(format!("{base}.strm"));
    let mut suffix = 2;
    while fs::try_exists(&candidate).await.unwrap_or(false) {
        candidate = download_dir.join(format!("{base}.{suffix}.strm"));
        suffix += 1;
    }
    Ok(candidate)
}

/// Writes the resolved URL atomically: write to a sibling `.tmp` file, fsync
/// via the OS page cache on close, then rename over the final path so a
/// reader never observes a partially written `.strm`.
pub async fn write_strm(path: &Path, url: &str) -> anyhow::Result<()> {
    let tmp_path = path.with_extension("strm.tmp");
    fs::write(&tmp_path, format!("{url}\n")).await?;
    fs::rename(&tmp_path, path).await?;
    Ok(())
}
