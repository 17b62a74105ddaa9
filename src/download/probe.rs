//! Container metadata probe (ffprobe).

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

/// What ffprobe reports about a media file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaInfo {
    pub size: u64,
    /// `HH:MM:SS`
    pub duration: String,
    /// `WxH`, or "Unknown" when no video stream reports dimensions.
    pub resolution: String,
    /// kbps, when reported.
    pub bitrate: Option<u64>,
}

impl MediaInfo {
    pub fn size_str(&self) -> String {
        format!("{:.2} MB", self.size as f64 / 1024.0 / 1024.0)
    }

    pub fn bitrate_str(&self) -> String {
        match self.bitrate {
            Some(kbps) => format!("{} kbps", kbps),
            None => "Unknown".to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    format: ProbeFormat,
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
    bit_rate: Option<String>,
    size: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u64>,
    height: Option<u64>,
}

/// Format seconds as `HH:MM:SS`.
pub fn format_duration(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds as u64
    } else {
        0
    };
    format!("{:02}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

/// Interpret ffprobe's JSON. `file_size` is used when the container doesn't
/// report one.
pub fn parse_probe_json(json: &str, file_size: u64) -> Result<MediaInfo> {
    let output: ProbeOutput = serde_json::from_str(json).context("Failed to parse ffprobe JSON output")?;

    let size = output
        .format
        .size
        .as_deref()
        .and_then(|s| s.parse().ok())
        .unwrap_or(file_size);
    let duration = output
        .format
        .duration
        .as_deref()
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.0);
    let resolution = output
        .streams
        .iter()
        .find_map(|s| match (s.width, s.height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => Some(format!("{}x{}", w, h)),
            _ => None,
        })
        .unwrap_or_else(|| "Unknown".to_string());
    let bitrate = output
        .format
        .bit_rate
        .as_deref()
        .and_then(|s| s.parse::<u64>().ok())
        .map(|bps| bps / 1000)
        .filter(|kbps| *kbps > 0);

    Ok(MediaInfo {
        size,
        duration: format_duration(duration),
        resolution,
        bitrate,
    })
}

/// Probe `path`.
///
/// `Ok(Some)` for a readable media file, `Ok(None)` when ffprobe rejects it.
/// `Err` means the probe itself could not run (ffprobe missing, timeout).
pub async fn probe(path: &Path, timeout: Duration) -> Result<Option<MediaInfo>> {
    let file_size = tokio::fs::metadata(path)
        .await
        .with_context(|| format!("Cannot stat {}", path.display()))?
        .len();

    let child = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration,bit_rate,size:stream=width,height",
            "-of",
            "json",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    let output = tokio::time::timeout(timeout, child)
        .await
        .map_err(|_| anyhow::anyhow!("ffprobe timed out on {}", path.display()))?
        .context("Failed to execute ffprobe")?;

    if !output.status.success() {
        debug!(
            "ffprobe rejected {}: {}",
            path.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        );
        return Ok(None);
    }

    match parse_probe_json(&String::from_utf8_lossy(&output.stdout), file_size) {
        Ok(info) => Ok(Some(info)),
        Err(e) => {
            debug!("Unusable ffprobe output for {}: {:#}", path.display(), e);
            Ok(None)
        }
    }
}
