//! Download dispatcher.
//!
//! One closed set of backends, selected per site: a direct streaming HTTP
//! fetch, curl, wget, yt-dlp, and the manifest-segment downloader built on
//! ffmpeg. Whatever the backend, the caller gets a [`DownloadOutcome`].

pub mod hls;
pub mod probe;
pub mod process;
pub mod progress;

pub use probe::{probe, MediaInfo};

use std::path::Path;
use std::sync::LazyLock;

use futures::StreamExt;
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::TimeoutConfig;
use crate::error::{ErrorKind, Result, ScrapeError};
use crate::http_client::{header_map, HttpClient};
use progress::{Progress, Unit};

/// Retrieval backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DownloadMethod {
    /// Streaming HTTP fetch in-process.
    #[serde(alias = "requests")]
    Direct,
    #[default]
    Curl,
    Wget,
    #[serde(alias = "ytdlp", alias = "yt_dlp")]
    YtDlp,
    /// Manifest download remuxed by ffmpeg.
    Ffmpeg,
}

impl DownloadMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadMethod::Direct => "direct",
            DownloadMethod::Curl => "curl",
            DownloadMethod::Wget => "wget",
            DownloadMethod::YtDlp => "yt-dlp",
            DownloadMethod::Ffmpeg => "ffmpeg",
        }
    }
}

impl std::fmt::Display for DownloadMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One transfer to perform.
#[derive(Debug, Clone)]
pub struct DownloadRequest<'a> {
    pub url: &'a str,
    pub destination: &'a Path,
    pub method: DownloadMethod,
    /// `Cookie`, `Referer`, `User-Agent` as exported by the stream resolver
    /// or the site's page fetch.
    pub headers: &'a IndexMap<String, String>,
    /// Thumbnail known from the page metadata; yt-dlp embeds one when set.
    pub thumbnail: Option<&'a str>,
    pub overwrite: bool,
}

impl DownloadRequest<'_> {
    pub fn label(&self) -> String {
        let name = self
            .destination
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        format!("Downloading {}", name)
    }
}

/// Result of one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadOutcome {
    pub success: bool,
    pub bytes_written: u64,
    pub error_kind: Option<ErrorKind>,
}

impl DownloadOutcome {
    pub fn succeeded(bytes_written: u64) -> Self {
        Self {
            success: true,
            bytes_written,
            error_kind: None,
        }
    }

    pub fn failed(kind: ErrorKind) -> Self {
        Self {
            success: false,
            bytes_written: 0,
            error_kind: Some(kind),
        }
    }

    pub fn interrupted(&self) -> bool {
        self.error_kind == Some(ErrorKind::Interrupted)
    }
}

/// Runs transfers for one worker.
pub struct Dispatcher {
    pub(crate) http: HttpClient,
    pub(crate) timeouts: TimeoutConfig,
    pub(crate) cancel: CancellationToken,
    pub(crate) show_progress: bool,
}

impl Dispatcher {
    pub fn new(http: HttpClient, timeouts: TimeoutConfig, cancel: CancellationToken) -> Self {
        Self {
            http,
            timeouts,
            cancel,
            show_progress: true,
        }
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn timeouts(&self) -> &TimeoutConfig {
        &self.timeouts
    }

    /// The request's own user agent, else the client's.
    pub(crate) fn user_agent_for(&self, headers: &IndexMap<String, String>) -> String {
        headers
            .get("User-Agent")
            .filter(|ua| !ua.is_empty())
            .cloned()
            .unwrap_or_else(|| self.http.user_agent().to_string())
    }

    /// Run the selected backend.
    ///
    /// Failures leave partial output in place. Success requires the
    /// destination to exist with a non-zero size.
    pub async fn download(&self, request: &DownloadRequest<'_>) -> DownloadOutcome {
        if request.url.trim().is_empty() {
            error!("Invalid or empty URL for {}", request.destination.display());
            return DownloadOutcome::failed(ErrorKind::NotFound);
        }
        let url = if request.url.starts_with("//") {
            format!("http:{}", request.url)
        } else {
            request.url.to_string()
        };
        let request = DownloadRequest {
            url: &url,
            ..request.clone()
        };

        if let Some(parent) = request.destination.parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    error!("Cannot create {}: {}", parent.display(), e);
                    return DownloadOutcome::failed(ErrorKind::DownloadFailed);
                }
            }
        }

        info!("Downloading {} via {} to {}", url, request.method, request.destination.display());
        let result = match request.method {
            DownloadMethod::Direct => self.direct(&request).await,
            DownloadMethod::Curl => self.curl(&request).await,
            DownloadMethod::Wget => self.wget(&request).await,
            DownloadMethod::YtDlp => self.ytdlp(&request).await,
            DownloadMethod::Ffmpeg => hls::download(self, &request).await,
        };

        match result {
            Ok(()) => match tokio::fs::metadata(request.destination).await {
                Ok(meta) if meta.len() > 0 => DownloadOutcome::succeeded(meta.len()),
                _ => {
                    error!(
                        "{} reported success but {} is missing or empty",
                        request.method,
                        request.destination.display()
                    );
                    DownloadOutcome::failed(ErrorKind::DownloadFailed)
                }
            },
            Err(e) => {
                error!("Download method '{}' failed for {}: {}", request.method, url, e);
                DownloadOutcome::failed(e.kind())
            }
        }
    }

    async fn direct(&self, request: &DownloadRequest<'_>) -> Result<()> {
        let mut headers = request.headers.clone();
        headers.insert("User-Agent".to_string(), self.user_agent_for(request.headers));
        debug!("Executing direct GET: {} with headers: {:?}", request.url, headers);

        let response = self
            .http
            .client()
            .get(request.url)
            .headers(header_map(&headers))
            .timeout(self.timeouts.process())
            .send()
            .await?
            .error_for_status()?;

        let progress = Progress::new(
            &request.label(),
            Unit::Bytes,
            response.content_length(),
            self.show_progress,
        );
        let mut file = tokio::fs::File::create(request.destination).await?;
        let mut stream = response.bytes_stream();

        let transfer = async {
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                file.write_all(&chunk).await?;
                progress.inc(chunk.len() as u64);
            }
            file.flush().await?;
            Ok::<(), ScrapeError>(())
        };

        let result = tokio::select! {
            _ = self.cancel.cancelled() => Err(ScrapeError::Interrupted),
            result = transfer => result,
        };
        match &result {
            Ok(()) => progress.finish(),
            Err(_) => progress.abandon(),
        }
        result
    }

    async fn curl(&self, request: &DownloadRequest<'_>) -> Result<()> {
        let args = curl_args(request, &self.user_agent_for(request.headers), self.timeouts.process);
        self.run_with_percent("curl", &args, request, &CURL_PROGRESS).await
    }

    async fn wget(&self, request: &DownloadRequest<'_>) -> Result<()> {
        let args = wget_args(request, &self.user_agent_for(request.headers), self.timeouts.process);
        self.run_with_percent("wget", &args, request, &WGET_PROGRESS).await
    }

    async fn ytdlp(&self, request: &DownloadRequest<'_>) -> Result<()> {
        let args = ytdlp_args(request, &self.user_agent_for(request.headers));
        self.run_with_percent("yt-dlp", &args, request, &YTDLP_PROGRESS).await
    }

    async fn run_with_percent(
        &self,
        program: &str,
        args: &[String],
        request: &DownloadRequest<'_>,
        pattern: &LazyLock<Regex>,
    ) -> Result<()> {
        let progress = Progress::new(&request.label(), Unit::Percent, None, self.show_progress);
        let exit = process::run(program, args, self.timeouts.process(), &self.cancel, |line| {
            match parse_percent(pattern, line) {
                Some(percent) => progress.set_percent(percent),
                None => debug!("{} output: {}", program, line),
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
                "{} failed with {}: {}",
                program,
                exit.describe(),
                exit.tail.join(" | ")
            )));
        }
        info!("Successfully completed {} download to {}", program, request.destination.display());
        Ok(())
    }
}

static CURL_PROGRESS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?)%").unwrap());
static WGET_PROGRESS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+)%\s+(\d+[KMG]?)").unwrap());
pub(crate) static YTDLP_PROGRESS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[download\]\s+(\d+(?:\.\d+)?)%").unwrap());

/// Percentage in a progress line, if the line is one.
pub fn parse_percent(pattern: &Regex, line: &str) -> Option<f64> {
    pattern
        .captures(line)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn dest_arg(request: &DownloadRequest<'_>) -> String {
    request.destination.to_string_lossy().into_owned()
}

pub fn curl_args(request: &DownloadRequest<'_>, user_agent: &str, max_time: u64) -> Vec<String> {
    let mut args = vec![
        "-L".to_string(),
        "-o".to_string(),
        dest_arg(request),
        "--retry".to_string(),
        "3".to_string(),
        "--max-time".to_string(),
        max_time.to_string(),
        "-#".to_string(),
        "-w".to_string(),
        "Downloaded: %{size_download} bytes / Total: %{size_total} bytes (%{speed_download} bytes/s)\n"
            .to_string(),
        "-A".to_string(),
        user_agent.to_string(),
    ];
    for name in ["Referer", "Cookie"] {
        if let Some(value) = request.headers.get(name).filter(|v| !v.is_empty()) {
            args.push("-H".to_string());
            args.push(format!("{}: {}", name, value));
        }
    }
    args.push(request.url.to_string());
    args
}

pub fn wget_args(request: &DownloadRequest<'_>, user_agent: &str, timeout: u64) -> Vec<String> {
    let mut args = vec![
        "--tries=3".to_string(),
        format!("--timeout={}", timeout),
        "-O".to_string(),
        dest_arg(request),
        "--user-agent".to_string(),
        user_agent.to_string(),
    ];
    if let Some(referer) = request.headers.get("Referer").filter(|v| !v.is_empty()) {
        args.push("--referer".to_string());
        args.push(referer.clone());
    }
    if let Some(cookie) = request.headers.get("Cookie").filter(|v| !v.is_empty()) {
        args.push("--header".to_string());
        args.push(format!("Cookie: {}", cookie));
    }
    args.push(request.url.to_string());
    args
}

pub fn ytdlp_args(request: &DownloadRequest<'_>, user_agent: &str) -> Vec<String> {
    let mut args = vec![
        "-o".to_string(),
        dest_arg(request),
        "--user-agent".to_string(),
        user_agent.to_string(),
        "--progress".to_string(),
        "--newline".to_string(),
    ];
    if request.overwrite {
        args.push("--force-overwrites".to_string());
    }
    if request.thumbnail.is_some_and(|t| !t.is_empty()) {
        args.extend(["--embed-thumbnail", "--convert-thumbnails", "jpg"].map(String::from));
    }
    if let Some(referer) = request.headers.get("Referer").filter(|v| !v.is_empty()) {
        args.push("--referer".to_string());
        args.push(referer.clone());
    }
    if let Some(cookie) = request.headers.get("Cookie").filter(|v| !v.is_empty()) {
        args.push("--add-header".to_string());
        args.push(format!("Cookie:{}", cookie));
    }
    args.push(request.url.to_string());
    args
}
