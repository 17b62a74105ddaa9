//! Manifest-segment downloads: fetch the playlist, pin its segment
//! references to absolute URLs, then remux with ffmpeg.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use tracing::{debug, error, info};
use url::Url;

use super::process;
use super::progress::{Progress, Unit};
use super::{Dispatcher, DownloadRequest};
use crate::error::{Result, ScrapeError};

pub const MANIFEST_ACCEPT: &str = "application/vnd.apple.mpegurl";

/// `scheme://host[:port]` of `url`.
pub fn origin_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    match parsed.origin() {
        origin @ url::Origin::Tuple(..) => Some(origin.ascii_serialization()),
        url::Origin::Opaque(_) => None,
    }
}

/// Rewrite relative segment lines of `content` against the directory of
/// `manifest_url`. Returns the new manifest and its segment count.
pub fn rewrite_manifest(content: &str, manifest_url: &str) -> (String, usize) {
    let base = match manifest_url.rsplit_once('/') {
        Some((dir, _)) => format!("{}/", dir),
        None => manifest_url.to_string(),
    };
    let base = Url::parse(&base).ok();

    let mut out = String::with_capacity(content.len());
    let mut segments = 0;
    for line in content.lines() {
        if line.is_empty() || line.starts_with('#') {
            out.push_str(line);
        } else {
            segments += 1;
            if line.starts_with("http") {
                out.push_str(line);
            } else {
                match base.as_ref().and_then(|b| b.join(line.trim()).ok()) {
                    Some(absolute) => out.push_str(absolute.as_str()),
                    None => out.push_str(line),
                }
            }
        }
        out.push('\n');
    }
    (out, segments)
}

/// Headers for the playlist request itself.
pub fn manifest_headers(
    headers: &IndexMap<String, String>,
    user_agent: &str,
    origin: Option<&str>,
) -> IndexMap<String, String> {
    let mut fetch = IndexMap::new();
    fetch.insert("User-Agent".to_string(), user_agent.to_string());
    fetch.insert(
        "Referer".to_string(),
        headers.get("Referer").cloned().unwrap_or_default(),
    );
    fetch.insert("Accept".to_string(), MANIFEST_ACCEPT.to_string());
    if let Some(cookie) = headers.get("Cookie").filter(|c| !c.is_empty()) {
        fetch.insert("Cookie".to_string(), cookie.clone());
    }
    if let Some(origin) = origin {
        fetch.insert("Origin".to_string(), origin.to_string());
    }
    fetch
}

/// Scratch playlist path next to the destination.
pub fn scratch_manifest_path(destination: &Path) -> PathBuf {
    let mut name = destination.as_os_str().to_os_string();
    name.push(".m3u8");
    PathBuf::from(name)
}

fn ffmpeg_args(manifest: &Path, destination: &Path) -> Vec<String> {
    vec![
        "-protocol_whitelist".to_string(),
        "file,http,https,tcp,tls,crypto".to_string(),
        "-i".to_string(),
        manifest.to_string_lossy().into_owned(),
        "-c".to_string(),
        "copy".to_string(),
        "-bsf:a".to_string(),
        "aac_adtstoasc".to_string(),
        "-y".to_string(),
        destination.to_string_lossy().into_owned(),
    ]
}

pub(super) async fn download(dispatcher: &Dispatcher, request: &DownloadRequest<'_>) -> Result<()> {
    let user_agent = dispatcher.user_agent_for(request.headers);
    let origin = origin_of(request.url);
    let fetch = manifest_headers(request.headers, &user_agent, origin.as_deref());

    debug!("Fetching manifest {} with headers: {:?}", request.url, fetch);
    let content = dispatcher.http.fetch_with_headers(request.url, &fetch).await?;
    let (manifest, segments) = rewrite_manifest(&content, request.url);
    debug!("Found {} segments in manifest", segments);

    let scratch = scratch_manifest_path(request.destination);
    tokio::fs::write(&scratch, manifest).await?;

    let result = remux(dispatcher, request, &scratch, segments).await;
    if let Err(e) = tokio::fs::remove_file(&scratch).await {
        debug!("Could not remove {}: {}", scratch.display(), e);
    }
    result
}

async fn remux(
    dispatcher: &Dispatcher,
    request: &DownloadRequest<'_>,
    scratch: &Path,
    segments: usize,
) -> Result<()> {
    let progress = Progress::new(
        &request.label(),
        Unit::Segments,
        Some(segments as u64),
        dispatcher.show_progress,
    );
    let args = ffmpeg_args(scratch, request.destination);
    let exit = process::run(
        "ffmpeg",
        &args,
        dispatcher.timeouts.process(),
        &dispatcher.cancel,
        |line| {
            if line.contains("Opening 'http") && line.contains(".ts") {
                progress.inc(1);
            } else {
                let lower = line.to_lowercase();
                if lower.contains("error") || lower.contains("failed") {
                    error!("FFmpeg error: {}", line);
                } else if line.contains("Duration:") {
                    debug!("FFmpeg output: {}", line);
                }
            }
        },
    )
    .await;

    let exit = match exit {
        Ok(exit) => exit,
        Err(e) => {
            progress.abandon();
            return Err(e);
        }
    };
    progress.finish();
    if !exit.success() {
        return Err(ScrapeError::DownloadFailed(format!(
            "ffmpeg failed with {}",
            exit.describe()
        )));
    }
    info!("Successfully completed ffmpeg download to {}", request.destination.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrite_manifest() {
        let content = "#EXTM3U\n#EXT-X-TARGETDURATION:10\n#EXTINF:10.0,\nseg-001.ts\n#EXTINF:10.0,\n../alt/seg-002.ts\n#EXTINF:4.2,\nhttps://other.example/seg-003.ts\n#EXT-X-ENDLIST";
        let (rewritten, segments) = rewrite_manifest(content, "https://cdn.example/hls/720p/index.m3u8?token=1");
        assert_eq!(segments, 3);
        let lines: Vec<&str> = rewritten.lines().collect();
        assert_eq!(lines[3], "https://cdn.example/hls/720p/seg-001.ts");
        assert_eq!(lines[5], "https://cdn.example/hls/alt/seg-002.ts");
        assert_eq!(lines[7], "https://other.example/seg-003.ts");
        assert_eq!(lines[8], "#EXT-X-ENDLIST");
    }

    #[test]
    fn test_origin_of() {
        assert_eq!(
            origin_of("https://cdn.example:8443/a/b.m3u8").as_deref(),
            Some("https://cdn.example:8443")
        );
        assert_eq!(origin_of("https://cdn.example/x").as_deref(), Some("https://cdn.example"));
        assert_eq!(origin_of("not a url"), None);
    }

    #[test]
    fn test_manifest_headers() {
        let mut headers = IndexMap::new();
        headers.insert("Referer".to_string(), "https://site.example/embed/1".to_string());
        headers.insert("Cookie".to_string(), String::new());
        let fetch = manifest_headers(&headers, "UA/1", Some("https://cdn.example"));
        assert_eq!(fetch["Accept"], MANIFEST_ACCEPT);
        assert_eq!(fetch["Referer"], "https://site.example/embed/1");
        assert_eq!(fetch["Origin"], "https://cdn.example");
        assert!(!fetch.contains_key("Cookie"));
    }

    #[test]
    fn test_scratch_manifest_path() {
        assert_eq!(
            scratch_manifest_path(Path::new("/tmp/Title.mp4")),
            PathBuf::from("/tmp/Title.mp4.m3u8")
        );
    }
}
