//! Crawl orchestration.
//!
//! A [`Crawler`] is one worker: it owns its HTTP client, download
//! dispatcher, destination and (lazily) a browser session, and processes
//! one detail or list page at a time. Failures are caught at the item
//! boundary and counted; only an interrupt stops the run.

mod detail;
mod fallback;
pub mod filter;
pub mod listing;

pub use fallback::ytdlp_fallback_args;
pub use filter::{IgnoreFilter, IgnoreMatch};
pub use listing::{parse_list_page, resolve_item_url, ListItem};

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::browser::{ChromiumFactory, SessionFactory, SessionSlot};
use crate::config::{ModeKind, Settings, SiteAdapter};
use crate::download::Dispatcher;
use crate::error::{ErrorKind, Result, ScrapeError};
use crate::extract::FrameDocuments;
use crate::http_client::HttpClient;
use crate::metadata::CaseOverrides;
use crate::router::{self, mode_url};
use crate::storage::Storage;

/// Per-run switches from the command line.
#[derive(Debug, Clone)]
pub struct CrawlOptions {
    /// Replace files already present at the destination.
    pub overwrite: bool,
    /// Regenerate sidecars even when one exists.
    pub re_nfo: bool,
    /// First page of list modes.
    pub start_page: u32,
    /// Process items that match ignored terms.
    pub ignore_filters: bool,
    /// Probe downloads with ffprobe before accepting them.
    pub verify_downloads: bool,
    pub show_progress: bool,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self {
            overwrite: false,
            re_nfo: false,
            start_page: 1,
            ignore_filters: false,
            verify_downloads: true,
            show_progress: true,
        }
    }
}

/// Result of one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Downloaded,
    /// Nothing to do; the reason is logged.
    Skipped(String),
}

/// An item that failed, with the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub url: String,
    pub kind: ErrorKind,
    pub reason: String,
}

/// Counts for a whole run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failures: Vec<ItemFailure>,
    pub pages: usize,
    pub interrupted: bool,
}

impl CrawlSummary {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

/// One crawl worker.
pub struct Crawler {
    settings: Settings,
    options: CrawlOptions,
    http: HttpClient,
    dispatcher: Dispatcher,
    storage: Storage,
    filter: IgnoreFilter,
    overrides: CaseOverrides,
    session: Option<SessionSlot>,
    cancel: CancellationToken,
    summary: CrawlSummary,
}

impl Crawler {
    pub fn new(settings: Settings, options: CrawlOptions, cancel: CancellationToken) -> Result<Self> {
        let storage = Storage::from_settings(&settings);
        Self::with_storage(settings, options, cancel, storage)
    }

    pub fn with_storage(
        settings: Settings,
        options: CrawlOptions,
        cancel: CancellationToken,
        storage: Storage,
    ) -> Result<Self> {
        let http = HttpClient::new(&settings)?;
        let dispatcher = Dispatcher::new(http.clone(), settings.timeouts.clone(), cancel.clone())
            .with_progress(options.show_progress);
        let filter = if options.ignore_filters {
            IgnoreFilter::default()
        } else {
            IgnoreFilter::new(&settings.ignored)
        };
        Ok(Self {
            overrides: CaseOverrides::from_settings(&settings),
            settings,
            options,
            http,
            dispatcher,
            storage,
            filter,
            session: None,
            cancel,
            summary: CrawlSummary::default(),
        })
    }

    /// Use `factory` for browser sessions instead of launching Chrome.
    pub fn with_session_factory(mut self, factory: Box<dyn SessionFactory>) -> Self {
        self.session = Some(SessionSlot::new(factory));
        self
    }

    pub fn summary(&self) -> &CrawlSummary {
        &self.summary
    }

    /// Close the browser session and hand back the run's counts.
    pub async fn finish(mut self) -> CrawlSummary {
        if let Some(slot) = self.session.as_mut() {
            slot.close().await;
        }
        self.summary
    }

    fn needs_browser(site: &SiteAdapter) -> bool {
        site.use_browser || site.stream.is_some()
    }

    fn ensure_session(&mut self, site: &SiteAdapter) {
        if self.session.is_none() && Self::needs_browser(site) {
            debug!("Site '{}' needs a browser session", site.name);
            self.session = Some(SessionSlot::new(Box::new(ChromiumFactory::new(
                self.settings.browser.clone(),
            ))));
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(ScrapeError::Interrupted)
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration` unless interrupted first.
    async fn pause(&self, duration: Duration) -> Result<()> {
        if duration.is_zero() {
            return self.check_cancelled();
        }
        tokio::select! {
            _ = self.cancel.cancelled() => Err(ScrapeError::Interrupted),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    /// Load a page, through the browser session when the site wants one
    /// (with `frames` captured), else or on session failure over HTTP.
    async fn fetch_document(
        &mut self,
        site: &SiteAdapter,
        url: &str,
        frames: &[&str],
    ) -> Result<(String, FrameDocuments)> {
        self.check_cancelled()?;
        if site.use_browser {
            self.ensure_session(site);
            if let Some(slot) = self.session.as_mut() {
                let frames: Vec<String> = frames.iter().map(|f| f.to_string()).collect();
                let result = slot
                    .run(|mut session| {
                        let url = url.to_string();
                        let frames = frames.clone();
                        async move {
                            let loaded = async {
                                session.navigate(&url).await?;
                                let html = session.content().await?;
                                let mut documents = FrameDocuments::new();
                                for frame in &frames {
                                    match session.frame_html(frame).await? {
                                        Some(frame_html) => documents.insert(frame.clone(), frame_html),
                                        None => debug!("Frame '{}' not present on {}", frame, url),
                                    }
                                }
                                Ok::<_, anyhow::Error>((html, documents))
                            }
                            .await;
                            (session, loaded)
                        }
                    })
                    .await;
                match result {
                    Ok(loaded) => return Ok(loaded),
                    Err(e) => warn!("Browser fetch of {} failed ({}); retrying with plain HTTP", url, e),
                }
            }
        }

        let timeout = self.settings.timeouts.page_fetch();
        let html = tokio::select! {
            _ = self.cancel.cancelled() => return Err(ScrapeError::Interrupted),
            fetched = tokio::time::timeout(timeout, self.http.fetch_page(url)) => match fetched {
                Ok(result) => result?,
                Err(_) => return Err(ScrapeError::NotFound(format!("timed out fetching {}", url))),
            },
        };
        Ok((html, FrameDocuments::new()))
    }

    /// Run one detail item and record its outcome. Only an interrupt is
    /// returned as an error.
    async fn run_item(&mut self, site: &SiteAdapter, url: &str) -> Result<bool> {
        self.check_cancelled()?;
        let result = self.process_detail(site, url).await;
        self.record_item(url, result)
    }

    /// Count one item in the summary. Returns whether it succeeded.
    fn record_item(&mut self, url: &str, result: Result<ItemOutcome>) -> Result<bool> {
        if matches!(result, Err(ScrapeError::Interrupted)) {
            return Err(ScrapeError::Interrupted);
        }
        self.summary.attempted += 1;
        match result {
            Ok(ItemOutcome::Downloaded) => {
                self.summary.succeeded += 1;
                Ok(true)
            }
            Ok(ItemOutcome::Skipped(reason)) => {
                info!("Skipped {}: {}", url, reason);
                self.summary.skipped += 1;
                Ok(true)
            }
            Err(e) => {
                error!("Failed to process {}: {}", url, e);
                self.summary.failures.push(ItemFailure {
                    url: url.to_string(),
                    kind: e.kind(),
                    reason: e.to_string(),
                });
                Ok(false)
            }
        }
    }

    /// Crawl `url` on `site`: route it, run the matched mode, else try
    /// every mode's construction path, else fall back to a generic download.
    pub async fn process_url(&mut self, site: &SiteAdapter, url: &str) -> Result<()> {
        let routed = router::route(url, site).map(|m| (m.mode.clone(), m.identifier));
        if let Some((mode, identifier)) = routed {
            info!("Matched URL to mode '{}' with scraper '{}'", mode.name, mode.scraper);
            return match mode.kind {
                ModeKind::Detail => self.run_item(site, url).await.map(|_| ()),
                ModeKind::List => {
                    let identifier = identifier.unwrap_or_else(|| last_segment(url));
                    let start = if self.options.start_page > 1 && mode.paged_pattern.is_some() {
                        let paged = mode_url(site, &mode, &identifier, self.options.start_page)?;
                        info!("Starting at custom page {}: {}", self.options.start_page, paged);
                        paged.to_string()
                    } else {
                        url.to_string()
                    };
                    self.crawl_list(site, &mode, &start, &identifier).await.map(|_| ())
                }
            };
        }

        warn!("URL didn't match any specific mode; attempting all configured modes");
        let identifier = last_segment(url);
        for mode in site.modes.values() {
            self.check_cancelled()?;
            let succeeded = match mode.kind {
                ModeKind::Detail => {
                    info!("Trying '{}' mode...", mode.name);
                    self.check_cancelled()?;
                    // A failed trial is not counted; the URL is counted
                    // by whichever attempt ends the search.
                    match self.process_detail(site, url).await {
                        Err(ScrapeError::Interrupted) => return Err(ScrapeError::Interrupted),
                        Err(e) => {
                            debug!("Mode '{}' failed: {}", mode.name, e);
                            false
                        }
                        Ok(outcome) => self.record_item(url, Ok(outcome))?,
                    }
                }
                ModeKind::List => {
                    info!("Attempting mode '{}'...", mode.name);
                    match mode_url(site, mode, &identifier, self.options.start_page) {
                        Ok(constructed) => self
                            .crawl_list(site, mode, constructed.as_str(), &identifier)
                            .await?,
                        Err(e) => {
                            debug!("Mode '{}' failed: {}", mode.name, e);
                            false
                        }
                    }
                }
            };
            if succeeded {
                info!("Mode '{}' succeeded.", mode.name);
                return Ok(());
            }
        }

        error!("Failed to process URL '{}' with any mode", url);
        self.fallback(url).await
    }

    /// Crawl a mode by name, building its URL from `query`.
    pub async fn process_mode(&mut self, site: &SiteAdapter, mode_name: &str, query: &str) -> Result<()> {
        let mode = site.mode(mode_name).cloned().ok_or_else(|| {
            ScrapeError::ConfigMismatch(format!("site '{}' has no mode '{}'", site.name, mode_name))
        })?;
        let url = mode_url(site, &mode, query, self.options.start_page)?;
        info!("Processing {} mode '{}' for '{}': {}", site.name, mode.name, query, url);
        match mode.kind {
            ModeKind::Detail => self.run_item(site, url.as_str()).await.map(|_| ()),
            ModeKind::List => self.crawl_list(site, &mode, url.as_str(), query).await.map(|_| ()),
        }
    }

    /// Hand a URL no site claims to the generic downloader.
    pub async fn process_unknown(&mut self, url: &str) -> Result<()> {
        warn!("No site configuration matches {}; using generic download", url);
        self.fallback(url).await
    }

    async fn fallback(&mut self, url: &str) -> Result<()> {
        self.summary.attempted += 1;
        match fallback::download(
            url,
            self.dispatcher.user_agent_for(&self.settings.headers).as_str(),
            &self.storage,
            self.settings.timeouts.process(),
            &self.cancel,
            self.options.overwrite,
            self.options.show_progress,
        )
        .await
        {
            Ok(0) => {
                self.summary.skipped += 1;
                Ok(())
            }
            Ok(_) => {
                self.summary.succeeded += 1;
                Ok(())
            }
            Err(ScrapeError::Interrupted) => Err(ScrapeError::Interrupted),
            Err(e) => {
                error!("Fallback download of {} failed: {}", url, e);
                self.summary.failures.push(ItemFailure {
                    url: url.to_string(),
                    kind: e.kind(),
                    reason: e.to_string(),
                });
                Ok(())
            }
        }
    }
}

/// Last path segment of `url` without its extension, used as the
/// identifier when a URL does not route.
pub fn last_segment(url: &str) -> String {
    let path = Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| url.to_string());
    let segment = path.trim_end_matches('/').rsplit('/').next().unwrap_or_default();
    let stem = segment.split('.').next().unwrap_or_default();
    urlencoding::decode(stem)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| stem.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::testing::{FakeBrowser, FakeFactory, FakePage};

    #[test]
    fn test_last_segment() {
        assert_eq!(last_segment("https://a.example/tag/big-cats.html"), "big-cats");
        assert_eq!(last_segment("https://a.example/tag/big%20cats/"), "big cats");
        assert_eq!(last_segment("https://a.example/"), "");
    }

    #[test]
    fn test_summary_failed_count() {
        let mut summary = CrawlSummary::default();
        summary.failures.push(ItemFailure {
            url: "u".into(),
            kind: ErrorKind::DownloadFailed,
            reason: "r".into(),
        });
        assert_eq!(summary.failed(), 1);
    }

    const BROWSER_SITE: &str = r#"
name: Rendered
base_url: https://rendered.example/
use_browser: true
modes:
  video:
    url_pattern: /v/{video}
    scraper: video_scraper
  tag:
    url_pattern: /tag/{tag}
    scraper: list_scraper
scrapers:
  video_scraper:
    title: h1
    tags: .tags a
  list_scraper:
    video_container:
      selector: ul
    video_item:
      selector: li
      fields:
        url:
          selector: a
          attribute: href
"#;

    fn page(html: &str) -> FakePage {
        FakePage {
            html: html.to_string(),
            ..FakePage::default()
        }
    }

    #[tokio::test]
    async fn test_browser_crawl_through_session_factory() {
        let site = SiteAdapter::from_yaml(BROWSER_SITE).unwrap();
        let browser = FakeBrowser::new()
            .with_page(
                "https://rendered.example/tag/teasers",
                page(r#"<ul><li><a href="/v/1">1</a></li><li><a href="/v/2">2</a></li></ul>"#),
            )
            .with_page("https://rendered.example/v/1", page("<h1>Trailer One</h1>"))
            .with_page("https://rendered.example/v/2", page("<h1>Trailer Two</h1>"));

        let mut settings = Settings::default();
        settings.sleep.between_items = 0.0;
        settings.sleep.between_pages = 0.0;
        settings.ignored = vec!["trailer".to_string()];
        let dest = tempfile::tempdir().unwrap();
        let options = CrawlOptions {
            show_progress: false,
            verify_downloads: false,
            ..CrawlOptions::default()
        };
        let mut crawler = Crawler::with_storage(settings, options, CancellationToken::new(), Storage::local(dest.path()))
            .unwrap()
            .with_session_factory(Box::new(FakeFactory::new(browser.clone())));

        crawler
            .process_url(&site, "https://rendered.example/tag/teasers")
            .await
            .unwrap();
        let summary = crawler.finish().await;

        assert_eq!(summary.pages, 1);
        assert_eq!(summary.attempted, 2);
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.failed(), 0);

        let state = browser.state.lock().unwrap();
        assert_eq!(
            state.visited,
            vec![
                "https://rendered.example/tag/teasers",
                "https://rendered.example/v/1",
                "https://rendered.example/v/2",
            ]
        );
        assert_eq!(state.created, 1);
        assert_eq!(state.closed, 1);
    }
}
