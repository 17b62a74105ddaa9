//! Generic download for URLs no site adapter handles: yt-dlp picks the
//! media and names the file itself inside a scratch directory.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::download::process;
use crate::download::progress::{Progress, Unit};
use crate::download::{parse_percent, YTDLP_PROGRESS};
use crate::error::{Result, ScrapeError};
use crate::storage::{Placement, Storage};

static DESTINATION_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[download\] Destination: (.+)").unwrap());

/// Arguments for a yt-dlp run that writes into `dir`.
pub fn ytdlp_fallback_args(url: &str, dir: &Path, user_agent: &str) -> Vec<String> {
    vec![
        "--paths".to_string(),
        dir.to_string_lossy().into_owned(),
        "--format".to_string(),
        "best".to_string(),
        "--add-metadata".to_string(),
        "--newline".to_string(),
        "--user-agent".to_string(),
        user_agent.to_string(),
        url.to_string(),
    ]
}

/// File name announced by a yt-dlp output line, if any.
fn announced_file(line: &str) -> Option<String> {
    let captured = DESTINATION_LINE.captures(line)?.get(1)?.as_str().trim();
    Path::new(captured)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
}

fn scratch_dir() -> PathBuf {
    let id = uuid::Uuid::new_v4().simple().to_string();
    std::env::temp_dir().join(format!(
        "download_{}_{}",
        &id[..8],
        chrono::Local::now().format("%Y%m%d_%H%M%S")
    ))
}

/// Download `url` with yt-dlp and place whatever it produced. Returns the
/// number of files stored; files already at the destination are skipped.
/// The scratch directory is removed on every path.
#[allow(clippy::too_many_arguments)]
pub(super) async fn download(
    url: &str,
    user_agent: &str,
    storage: &Storage,
    timeout: Duration,
    cancel: &CancellationToken,
    overwrite: bool,
    show_progress: bool,
) -> Result<usize> {
    let dir = scratch_dir();
    tokio::fs::create_dir_all(&dir).await?;
    info!("Fallback download for: {}", url);

    let result = fetch_and_place(url, user_agent, storage, &dir, timeout, cancel, overwrite, show_progress).await;
    if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
        debug!("Could not remove {}: {}", dir.display(), e);
    }
    result
}

#[allow(clippy::too_many_arguments)]
async fn fetch_and_place(
    url: &str,
    user_agent: &str,
    storage: &Storage,
    dir: &Path,
    timeout: Duration,
    cancel: &CancellationToken,
    overwrite: bool,
    show_progress: bool,
) -> Result<usize> {
    let progress = Progress::new("Downloading", Unit::Percent, None, show_progress);
    let mut announced: Vec<String> = Vec::new();
    let args = ytdlp_fallback_args(url, dir, user_agent);
    let exit = process::run("yt-dlp", &args, timeout, cancel, |line| {
        if let Some(name) = announced_file(line) {
            if !announced.contains(&name) {
                announced.push(name);
            }
        } else if let Some(percent) = parse_percent(&YTDLP_PROGRESS, line) {
            progress.set_percent(percent);
        } else {
            debug!("yt-dlp output: {}", line);
        }
    })
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
            "yt-dlp failed with {}: {}",
            exit.describe(),
            exit.tail.join(" | ")
        )));
    }

    let mut files: Vec<PathBuf> = announced
        .iter()
        .map(|name| dir.join(name))
        .filter(|p| p.is_file())
        .collect();
    if files.is_empty() {
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
    }
    if files.is_empty() {
        return Err(ScrapeError::DownloadFailed(format!("yt-dlp produced no files for {}", url)));
    }

    let mut stored = 0;
    for file in files {
        match storage.finish(&file, overwrite).await? {
            Placement::Stored(path) => {
                info!("Stored fallback download at {}", path);
                stored += 1;
            }
            Placement::Skipped(path) => warn!("{} already exists. Skipping.", path),
        }
    }
    Ok(stored)
}
