//! Detail-page workflow: fetch, extract, resolve the stream, download,
//! verify, write the sidecar and place the file.

use std::path::Path;

use indexmap::IndexMap;
use tracing::{debug, info, warn};

use super::{Crawler, ItemOutcome};
use crate::config::SiteAdapter;
use crate::download::{probe, DownloadRequest};
use crate::error::{ErrorKind, Result, ScrapeError};
use crate::extract::{extract_document, required_frames};
use crate::metadata::{construct_filename, finalize, write_nfo, FinalMetadata, UNTITLED};
use crate::storage::Placement;
use crate::stream::{self, StreamCandidate};

/// Download attempts per item: the first plus one retry after a corrupt file.
const DOWNLOAD_ATTEMPTS: usize = 2;

/// What the probe made of a file on disk.
enum Verdict {
    Valid,
    Corrupt,
}

/// `href` resolved against the page it was found on. Protocol-relative
/// links are left for the dispatcher.
fn absolute_url(page: &str, href: &str) -> String {
    if href.starts_with("//") || href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }
    match url::Url::parse(page).and_then(|base| base.join(href)) {
        Ok(joined) => joined.to_string(),
        Err(_) => href.to_string(),
    }
}

impl Crawler {
    pub(super) async fn process_detail(&mut self, site: &SiteAdapter, url: &str) -> Result<ItemOutcome> {
        info!("Processing detail page: {}", url);
        let mode = site
            .detail_mode()
            .ok_or_else(|| ScrapeError::ConfigMismatch(format!("site '{}' has no detail mode", site.name)))?;
        let scraper = site.detail_scraper(mode)?;

        let candidate = self.resolve_stream(site, url).await?;

        let frames = required_frames(&scraper.fields);
        let (html, frame_docs) = self.fetch_document(site, url, &frames).await?;
        let mut record = extract_document(&html, &scraper.fields, &frame_docs);
        for diagnostic in record.diagnostics() {
            debug!("{}: {}", url, diagnostic);
        }

        let video_url = match &candidate {
            Some(c) => c.url.clone(),
            None => {
                let download_url = record.text("download_url").trim();
                if download_url.is_empty() {
                    url.to_string()
                } else {
                    absolute_url(url, download_url)
                }
            }
        };
        let title = match record.text("title").trim() {
            "" => UNTITLED.to_string(),
            t => t.to_string(),
        };
        record.insert("Title", title);
        record.insert("URL", url);

        if let Some(hit) = self.filter.check(&record) {
            warn!("Ignoring {} due to term '{}' in {}: '{}'", url, hit.term, hit.field, hit.value);
            return Ok(ItemOutcome::Skipped(format!("ignored term '{}'", hit.term)));
        }

        let meta = finalize(&record, &self.overrides);
        let filename = construct_filename(
            &meta.title,
            &site.name_prefix,
            &site.name_suffix,
            &self.settings.file_naming,
        );
        let write_sidecar = self.settings.make_nfo && site.has_metadata_selectors();

        if self.storage.is_remote() && !self.options.overwrite && self.storage.exists_remotely(&filename).await? {
            info!("File '{}' exists on share. Skipping download.", filename);
            if write_sidecar {
                self.storage
                    .ensure_remote_nfo(&filename, &meta, self.options.re_nfo)
                    .await?;
            }
            return Ok(ItemOutcome::Skipped("already on share".to_string()));
        }

        let destination = self.storage.working_path(&filename).await?;
        let headers = match &candidate {
            Some(c) => c.headers(&self.settings.headers),
            None => self.settings.headers.clone(),
        };
        // A failed transfer leaves its partial file in place.
        self.download_verified(site, &video_url, &destination, &headers, &meta)
            .await?;

        if write_sidecar {
            if let Err(e) = write_nfo(&destination, &meta, self.options.overwrite || self.options.re_nfo).await {
                warn!("Could not write sidecar for {}: {:#}", destination.display(), e);
            }
        }

        let outcome = match self.storage.finish(&destination, self.options.overwrite).await? {
            Placement::Stored(path) => {
                info!("Stored {} at {}", url, path);
                ItemOutcome::Downloaded
            }
            Placement::Skipped(path) => ItemOutcome::Skipped(format!("already present at {}", path)),
        };

        self.pause(self.settings.sleep.between_items()).await?;
        Ok(outcome)
    }

    /// Run the stream resolver for sites that hide their media. A missing
    /// manifest or a broken session is not fatal: the item falls back to the
    /// extracted download URL or the page itself.
    async fn resolve_stream(&mut self, site: &SiteAdapter, url: &str) -> Result<Option<StreamCandidate>> {
        let Some(config) = &site.stream else {
            return Ok(None);
        };
        self.check_cancelled()?;
        self.ensure_session(site);
        let Some(slot) = self.session.as_mut() else {
            return Ok(None);
        };

        let settle = self.settings.timeouts.manifest_settle();
        let resolved = slot
            .run(|mut session| {
                let url = url.to_string();
                let config = config.clone();
                async move {
                    let result = stream::resolve(session.as_mut(), &url, &config, settle).await;
                    (session, result)
                }
            })
            .await;

        match resolved {
            Ok(Some(candidate)) => Ok(Some(candidate)),
            Ok(None) => {
                warn!("{}; falling back to the page's own download URL", ScrapeError::ManifestNotFound(url.to_string()));
                Ok(None)
            }
            Err(e) => {
                warn!("Stream resolution for {} failed: {}", url, e);
                Ok(None)
            }
        }
    }

    async fn probe_file(&self, path: &Path) -> Verdict {
        match probe(path, self.settings.timeouts.probe()).await {
            Ok(Some(info)) => {
                debug!(
                    "{}: {} {} {} {}",
                    path.display(),
                    info.size_str(),
                    info.duration,
                    info.resolution,
                    info.bitrate_str()
                );
                Verdict::Valid
            }
            Ok(None) => Verdict::Corrupt,
            Err(e) => {
                warn!("Could not verify {} ({:#}); accepting it unverified", path.display(), e);
                Verdict::Valid
            }
        }
    }

    /// Download to `destination`, reusing a valid existing file and retrying
    /// once when the result does not probe as media.
    async fn download_verified(
        &self,
        site: &SiteAdapter,
        video_url: &str,
        destination: &Path,
        headers: &IndexMap<String, String>,
        meta: &FinalMetadata,
    ) -> Result<()> {
        if !self.options.overwrite && tokio::fs::try_exists(destination).await.unwrap_or(false) {
            if !self.options.verify_downloads {
                info!("File exists at {}. Skipping download.", destination.display());
                return Ok(());
            }
            match self.probe_file(destination).await {
                Verdict::Valid => {
                    info!("Valid video exists at {}. Skipping download.", destination.display());
                    return Ok(());
                }
                Verdict::Corrupt => {
                    warn!("Invalid video file at {}. Redownloading.", destination.display());
                    tokio::fs::remove_file(destination).await?;
                }
            }
        }

        let request = DownloadRequest {
            url: video_url,
            destination,
            method: site.download_method,
            headers,
            thumbnail: Some(meta.image.as_str()).filter(|i| !i.is_empty()),
            overwrite: self.options.overwrite,
        };

        for attempt in 1..=DOWNLOAD_ATTEMPTS {
            let outcome = self.dispatcher.download(&request).await;
            if let Some(kind) = outcome.error_kind {
                return Err(ScrapeError::from_kind(
                    kind,
                    format!("{} download of {} failed", request.method, video_url),
                ));
            }
            if !self.options.verify_downloads {
                return Ok(());
            }
            match self.probe_file(destination).await {
                Verdict::Valid => {
                    info!("Downloaded video to {} ({} bytes)", destination.display(), outcome.bytes_written);
                    return Ok(());
                }
                Verdict::Corrupt => {
                    warn!(
                        "Downloaded file {} is not playable (attempt {}/{}); deleting",
                        destination.display(),
                        attempt,
                        DOWNLOAD_ATTEMPTS
                    );
                    tokio::fs::remove_file(destination).await?;
                }
            }
        }
        Err(ScrapeError::from_kind(
            ErrorKind::DownloadFailed,
            format!("{} failed verification after {} attempts", video_url, DOWNLOAD_ATTEMPTS),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absolute_url() {
        let page = "https://v.example/watch/1";
        assert_eq!(absolute_url(page, "/media/1.mp4"), "https://v.example/media/1.mp4");
        assert_eq!(absolute_url(page, "hd.mp4"), "https://v.example/watch/hd.mp4");
        assert_eq!(absolute_url(page, "//cdn.example/a.mp4"), "//cdn.example/a.mp4");
        assert_eq!(absolute_url(page, "https://cdn.example/a.mp4"), "https://cdn.example/a.mp4");
    }
}
