//! Background services (§2, §9): periodic work that runs independent of
//! request traffic. Every loop here checks a shutdown signal on each
//! wakeup rather than running unconditionally forever, so the process can
//! exit promptly.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::state::SharedState;

/// Spawns every background loop this process runs and returns their join
/// handles. Callers abort them on shutdown rather than waiting, matching
/// the scheduler's own best-effort teardown.
pub async fn spawn_all(shared: Arc<SharedState>, shutdown: watch::Receiver<bool>) -> Vec<tokio::task::JoinHandle<()>> {
    let mut handles = Vec::new();

    handles.push(tokio::spawn(downloads_cleanup_loop(Arc::clone(&shared), shutdown.clone())));

    if shared.config().await.provider.public_ip_check_enabled {
        handles.push(tokio::spawn(public_ip_monitor_loop(Arc::clone(&shared), shutdown.clone())));
    } else {
        debug!("public IP monitor disabled (PUBLIC_IP_CHECK_ENABLED=false)");
    }

    handles.push(tokio::spawn(domain_resolution_monitor_loop(Arc::clone(&shared), shutdown.clone())));

    tokio::spawn(update_notifier_task());

    handles
}

async fn sleep_or_shutdown(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = shutdown.changed() => false,
    }
}

/// Periodically deletes job and STRM-mapping rows older than their
/// configured TTL, mirroring §4.7's retention policy for finished jobs and
/// the resolved-URL cache table.
async fn downloads_cleanup_loop(shared: Arc<SharedState>, mut shutdown: watch::Receiver<bool>) {
    let interval = Duration::from_secs(shared.config().await.general.cleanup_scan_interval_min.max(1) * 60);
    info!(interval_min = interval.as_secs() / 60, "starting downloads TTL cleanup loop");

    loop {
        let config = shared.config().await;
        let jobs_cutoff = chrono::Utc::now() - chrono::Duration::seconds((config.general.downloads_ttl_hours * 3600.0) as i64);
        let availability_cutoff = chrono::Utc::now() - chrono::Duration::seconds((config.general.availability_ttl_hours * 3600.0) as i64);

        match shared.store.jobs().delete_older_than(jobs_cutoff).await {
            Ok(count) if count > 0 => info!(count, "cleaned up expired job rows"),
            Ok(_) => {}
            Err(err) => warn!(%err, "job cleanup sweep failed"),
        }

        match shared.store.availability().delete_older_than(availability_cutoff).await {
            Ok(count) if count > 0 => info!(count, "cleaned up stale availability rows"),
            Ok(_) => {}
            Err(err) => warn!(%err, "availability cleanup sweep failed"),
        }

        match shared.store.strm_mappings().delete_older_than(availability_cutoff).await {
            Ok(count) if count > 0 => info!(count, "cleaned up stale STRM url mappings"),
            Ok(_) => {}
            Err(err) => warn!(%err, "STRM mapping cleanup sweep failed"),
        }

        if !sleep_or_shutdown(interval, &mut shutdown).await {
            info!("downloads cleanup loop shutting down");
            return;
        }
    }
}

const PUBLIC_IP_ENDPOINTS: &[&str] = &["https://api.ipify.org", "https://ifconfig.me/ip", "https://ipinfo.io/ip"];

async fn fetch_public_ip(client: &reqwest::Client) -> Option<String> {
    for url in PUBLIC_IP_ENDPOINTS {
        match client.get(*url).send().await {
            Ok(resp) if resp.status().is_success() => {
                if let Ok(body) = resp.text().await {
                    let ip = body.trim();
                    if !ip.is_empty() {
                        return Some(ip.to_string());
                    }
                }
            }
            Ok(resp) => debug!(url = *url, status = %resp.status(), "public IP endpoint returned non-success"),
            Err(err) => debug!(url = *url, %err, "public IP fetch failed"),
        }
    }
    None
}

/// Periodically re-checks this process's own egress IP and logs it,
/// useful when the process sits behind a rotating outbound proxy.
async fn public_ip_monitor_loop(shared: Arc<SharedState>, mut shutdown: watch::Receiver<bool>) {
    let interval_min = shared.config().await.provider.public_ip_check_interval_min.max(1);
    let interval = Duration::from_secs(interval_min * 60);
    info!(interval_min, "starting public IP monitor");

    loop {
        match fetch_public_ip(&shared.http_client).await {
            Some(ip) => info!(ip, "public IP"),
            None => warn!("public IP: unavailable"),
        }

        if !sleep_or_shutdown(interval, &mut shutdown).await {
            info!("public IP monitor shutting down");
            return;
        }
    }
}

/// Periodically re-resolves every configured catalogue site's host and
/// logs when the resolved address set changes, so operators notice a
/// mirror-domain rotation before every episode lookup starts failing.
async fn domain_resolution_monitor_loop(shared: Arc<SharedState>, mut shutdown: watch::Receiver<bool>) {
    let interval = Duration::from_secs(30 * 60);
    info!("starting domain resolution monitor");

    let mut last_seen: std::collections::HashMap<&'static str, Vec<std::net::IpAddr>> = std::collections::HashMap::new();

    loop {
        for site in shared.sites.iter() {
            let host = site.site_host();
            let lookup_target = format!("{host}:443");
            let resolved = tokio::time::timeout(Duration::from_secs(6), tokio::net::lookup_host(&lookup_target)).await;

            match resolved {
                Ok(Ok(addrs)) => {
                    let mut ips: Vec<std::net::IpAddr> = addrs.map(|a| a.ip()).collect();
                    ips.sort();
                    ips.dedup();

                    if let Some(previous) = last_seen.get(host) {
                        if previous != &ips {
                            warn!(host, ?previous, current = ?ips, "catalogue site resolved to a different address set, mirror may have rotated");
                        }
                    } else {
                        debug!(host, ?ips, "initial domain resolution");
                    }
                    last_seen.insert(host, ips);
                }
                Ok(Err(err)) => warn!(host, %err, "domain resolution failed"),
                Err(_) => warn!(host, "domain resolution timed out"),
            }
        }

        if !sleep_or_shutdown(interval, &mut shutdown).await {
            info!("domain resolution monitor shutting down");
            return;
        }
    }
}

const GITHUB_OWNER: &str = "zzackllack";
const GITHUB_REPO: &str = "AniBridge";

/// Compares the running version against the latest published GitHub
/// release once at startup and logs a one-line notice. Never auto-updates
/// and never fails startup — any error here is logged at debug and
/// swallowed.
async fn update_notifier_task() {
    if !std::env::var("ANIBRIDGE_UPDATE_CHECK")
        .ok()
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(true)
    {
        info!("update check disabled via ANIBRIDGE_UPDATE_CHECK=0");
        return;
    }

    let current = env!("CARGO_PKG_VERSION");
    let client = match reqwest::Client::builder().timeout(Duration::from_secs(5)).build() {
        Ok(c) => c,
        Err(_) => return,
    };

    let url = format!("https://api.github.com/repos/{GITHUB_OWNER}/{GITHUB_REPO}/releases/latest");
    let latest = match client.get(&url).header("Accept", "application/vnd.github+json").send().await {
        Ok(resp) if resp.status().is_success() => resp
            .json::<serde_json::Value>()
            .await
            .ok()
            .and_then(|v| v.get("tag_name").and_then(|t| t.as_str()).map(normalize_version)),
        Ok(resp) => {
            debug!(status = %resp.status(), "github releases endpoint returned non-success");
            None
        }
        Err(err) => {
            debug!(%err, "update check request failed");
            None
        }
    };

    match latest {
        Some(latest) if latest.as_str() != current => {
            warn!(current, latest = latest.as_str(), "a newer AniBridge release is available");
        }
        Some(_) => info!(current, "AniBridge is up to date"),
        None => info!(current, "could not determine the latest published release"),
    }
}

fn normalize_version(tag: &str) -> String {
    tag.strip_prefix('v').unwrap_or(tag).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_version_strips_leading_v() {
        assert_eq!(normalize_version("v1.4.2"), "1.4.2");
        assert_eq!(normalize_version("1.4.2"), "1.4.2");
    }
}
