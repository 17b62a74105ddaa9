//! List-page workflow: find the item container, turn each item into a
//! detail URL, process the items in document order, then paginate.

use scraper::{ElementRef, Html};
use tracing::{debug, error, info, warn};

use super::Crawler;
use crate::config::{ListScraper, Mode, SiteAdapter};
use crate::error::{Result, ScrapeError};
use crate::extract::{extract, ExtractedRecord, FrameDocuments};
use crate::pagination::{self, PageCursor, PageState};
use crate::router::mode_url;

/// One entry of a list page.
#[derive(Debug, Clone, PartialEq)]
pub struct ListItem {
    pub url: String,
    pub title: String,
    pub record: ExtractedRecord,
}

/// Detail URL for an extracted list item: its `url` field (protocol-relative
/// and relative forms resolved), else its `video_key` built with the detail
/// mode's pattern.
pub fn resolve_item_url(site: &SiteAdapter, record: &ExtractedRecord) -> Option<String> {
    let url = record.text("url").trim();
    if !url.is_empty() {
        if url.starts_with("http://") || url.starts_with("https://") {
            return Some(url.to_string());
        }
        if url.starts_with("//") {
            return Some(format!("http:{}", url));
        }
        return match site.base_url.join(url) {
            Ok(joined) => Some(joined.to_string()),
            Err(e) => {
                warn!("Cannot resolve item URL '{}': {}", url, e);
                None
            }
        };
    }

    let key = record.text("video_key").trim();
    if key.is_empty() {
        return None;
    }
    let mode = site.detail_mode()?;
    match mode_url(site, mode, key, 1) {
        Ok(url) => Some(url.to_string()),
        Err(e) => {
            warn!("Cannot build detail URL for key '{}': {}", key, e);
            None
        }
    }
}

fn node_text(node: ElementRef<'_>) -> String {
    node.text()
        .flat_map(|t| t.split_whitespace())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Items of one list page, in document order.
///
/// `NotFound` when none of the container selectors match. Items that yield
/// no usable URL are dropped with a warning.
pub fn parse_list_page(site: &SiteAdapter, scraper: &ListScraper, document: &Html) -> Result<Vec<ListItem>> {
    let root = document.root_element();
    let container = scraper.container.iter().find_map(|sel| {
        sel.select_one(root).inspect(|_| {
            debug!("Found container with selector '{}'", sel.css);
        })
    });
    let Some(container) = container else {
        let tried: Vec<&str> = scraper.container.iter().map(|s| s.css.as_str()).collect();
        return Err(ScrapeError::NotFound(format!(
            "no item container matching any of {:?}",
            tried
        )));
    };

    let nodes: Vec<ElementRef<'_>> = container.select(scraper.item.selector()).collect();
    debug!("Found {} items with selector '{}'", nodes.len(), scraper.item.css);

    let frames = FrameDocuments::new();
    let mut items = Vec::with_capacity(nodes.len());
    for node in nodes {
        let record = extract(node, &scraper.item_fields, &frames);
        let Some(url) = resolve_item_url(site, &record) else {
            warn!("Unable to construct video URL for list item");
            continue;
        };
        let title = match record.text("title").trim() {
            "" => node_text(node),
            t => t.to_string(),
        };
        items.push(ListItem { url, title, record });
    }
    Ok(items)
}

impl Crawler {
    /// Crawl a list mode starting at `url`. Returns whether any page
    /// yielded items.
    ///
    /// The cursor only advances after every item of the current page has
    /// been attempted; an interrupt leaves it on the page in progress.
    pub(super) async fn crawl_list(
        &mut self,
        site: &SiteAdapter,
        mode: &Mode,
        url: &str,
        identifier: &str,
    ) -> Result<bool> {
        let scraper = site.list_scraper(mode)?;
        let mut cursor = PageCursor::new(url, &mode.name, identifier, self.options.start_page);
        let mut found_items = false;

        loop {
            self.check_cancelled()?;
            let html = match self.fetch_document(site, &cursor.url, &[]).await {
                Ok((html, _)) => html,
                Err(ScrapeError::Interrupted) => return Err(ScrapeError::Interrupted),
                Err(e) => {
                    error!("Failed to fetch page {}: {}", cursor.url, e);
                    break;
                }
            };

            let (items, next) = {
                let document = Html::parse_document(&html);
                match parse_list_page(site, scraper, &document) {
                    Ok(items) if !items.is_empty() => {
                        let next = pagination::advance(site, mode, scraper, &cursor, &document);
                        (items, next)
                    }
                    Ok(_) => {
                        info!("No items on page {} ({})", cursor.current_page, cursor.url);
                        (Vec::new(), PageState::Exhausted)
                    }
                    Err(e) => {
                        error!("{} at {}", e, cursor.url);
                        (Vec::new(), PageState::Exhausted)
                    }
                }
            };
            if items.is_empty() {
                break;
            }

            found_items = true;
            self.summary.pages += 1;
            info!(
                "Page {}, {} {}: \"{}\" ({} items)",
                cursor.current_page,
                site.name.to_lowercase(),
                mode.name,
                identifier,
                items.len()
            );
            let total = items.len();
            for (i, item) in items.iter().enumerate() {
                info!("{} of {}: {} ({})", i + 1, total, item.title, item.url);
                self.run_item(site, &item.url).await?;
            }

            match next {
                PageState::HasNextPage(next_cursor) => {
                    self.pause(self.settings.sleep.between_pages()).await?;
                    cursor = next_cursor;
                }
                PageState::Exhausted => break,
            }
        }
        Ok(found_items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SITE: &str = r##"
name: Lister
base_url: https://list.example/
modes:
  video:
    url_pattern: /watch/{video}
    scraper: video_scraper
  tag:
    url_pattern: /tag/{tag}
    scraper: list_scraper
scrapers:
  video_scraper:
    title: h1
  list_scraper:
    video_container:
      selector: ["#missing", "ul.videos", "div.videos"]
    video_item:
      selector: li
      fields:
        url:
          selector: a
          attribute: href
        video_key:
          attribute: data-key
        title: .name
"##;

    const PAGE: &str = r#"<html><body>
<div class="videos"><li><a href="/ignored">decoy</a></li></div>
<ul class="videos">
  <li><a href="https://list.example/watch/1">one</a><span class="name">First</span></li>
  <li><a href="//cdn.list.example/watch/2">two</a></li>
  <li data-key="three"><em>Third   clip</em></li>
  <li><a href="/watch/4"></a><span class="name">Fourth</span></li>
  <li><span>no link</span></li>
</ul>
</body></html>"#;

    fn site() -> SiteAdapter {
        SiteAdapter::from_yaml(SITE).unwrap()
    }

    #[test]
    fn test_parse_list_page_order_and_urls() {
        let site = site();
        let mode = site.mode("tag").unwrap();
        let scraper = site.list_scraper(mode).unwrap();
        let items = parse_list_page(&site, scraper, &Html::parse_document(PAGE)).unwrap();

        let urls: Vec<&str> = items.iter().map(|i| i.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://list.example/watch/1",
                "http://cdn.list.example/watch/2",
                "https://list.example/watch/three",
                "https://list.example/watch/4",
            ]
        );
        assert_eq!(items[0].title, "First");
        assert_eq!(items[1].title, "two");
        assert_eq!(items[2].title, "Third clip");
    }

    #[test]
    fn test_missing_container_is_not_found() {
        let site = site();
        let mode = site.mode("tag").unwrap();
        let scraper = site.list_scraper(mode).unwrap();
        let err = parse_list_page(&site, scraper, &Html::parse_document("<p>nothing</p>")).unwrap_err();
        assert!(matches!(err, ScrapeError::NotFound(_)));
    }

    #[test]
    fn test_resolve_item_url_without_fields() {
        assert_eq!(resolve_item_url(&site(), &ExtractedRecord::new()), None);
    }
}
