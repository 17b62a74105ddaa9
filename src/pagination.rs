//! Pagination controller for list modes.
//!
//! Rules are evaluated in priority order: the mode's paginated-path
//! template, then the scraper's `subsequent_pages` template, then its
//! next-link selector. The page cap (mode, else scraper, else unbounded)
//! is checked before any of them.

use scraper::Html;
use tracing::{debug, warn};

use crate::config::{ListScraper, Mode, PaginationRule, SiteAdapter};
use crate::router::{construct_url, format_template};

/// Position of a crawl within a paginated listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCursor {
    pub current_page: u32,
    pub url: String,
    pub mode: String,
    pub identifier: String,
}

impl PageCursor {
    pub fn new(url: impl Into<String>, mode: impl Into<String>, identifier: impl Into<String>, page: u32) -> Self {
        Self {
            current_page: page.max(1),
            url: url.into(),
            mode: mode.into(),
            identifier: identifier.into(),
        }
    }
}

/// Outcome of one pagination step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageState {
    HasNextPage(PageCursor),
    Exhausted,
}

/// Effective page cap: the mode's, else the scraper's, else none.
pub fn page_cap(mode: &Mode, scraper: &ListScraper) -> Option<u32> {
    mode.max_pages.or(scraper.pagination.max_pages)
}

/// Compute the cursor following `cursor`, given the document of the page
/// it points at.
pub fn advance(
    site: &SiteAdapter,
    mode: &Mode,
    scraper: &ListScraper,
    cursor: &PageCursor,
    document: &Html,
) -> PageState {
    if let Some(cap) = page_cap(mode, scraper) {
        if cursor.current_page >= cap {
            warn!(
                "Stopping pagination: current_page={} >= max_pages={}",
                cursor.current_page, cap
            );
            return PageState::Exhausted;
        }
    }

    let Some(next_page) = cursor.current_page.checked_add(1) else {
        warn!("Stopping pagination: page {} is the last representable page", cursor.current_page);
        return PageState::Exhausted;
    };
    let next_url = match (&mode.paged_pattern, &scraper.pagination.rule) {
        (Some(paged), rule) => {
            if rule.is_some() {
                warn!(
                    "Mode '{}' has both url_pattern_pages and scraper pagination; using url_pattern_pages",
                    mode.name
                );
            }
            let args = [
                (mode.name.as_str(), cursor.identifier.clone()),
                ("page", next_page.to_string()),
            ];
            match construct_url(site, paged, Some(&mode.name), &args) {
                Ok(url) => {
                    debug!("Generated next page URL (pattern-based): {}", url);
                    Some(url.to_string())
                }
                Err(e) => {
                    warn!("Could not build next page URL for '{}': {}", mode.name, e);
                    None
                }
            }
        }
        (None, Some(PaginationRule::SubsequentPages(template))) => {
            subsequent_page_url(site, mode, template, &cursor.identifier, next_page)
        }
        (None, Some(PaginationRule::NextLink { selector, attribute })) => {
            match selector.select_one(document.root_element()) {
                Some(link) => {
                    let href = link.value().attr(attribute).unwrap_or_default().trim();
                    if href.is_empty() {
                        None
                    } else {
                        match site.base_url.join(href) {
                            Ok(url) => {
                                debug!("Found next page URL (selector-based): {}", url);
                                Some(url.to_string())
                            }
                            Err(e) => {
                                warn!("Invalid next page link '{}': {}", href, e);
                                None
                            }
                        }
                    }
                }
                None => {
                    debug!("No 'next' element found with selector '{}'", selector.css);
                    None
                }
            }
        }
        (None, None) => None,
    };

    match next_url {
        Some(url) if url == cursor.url => {
            warn!("Next page URL {} repeats the current page; stopping pagination", url);
            PageState::Exhausted
        }
        Some(url) => PageState::HasNextPage(PageCursor {
            current_page: next_page,
            url,
            mode: cursor.mode.clone(),
            identifier: cursor.identifier.clone(),
        }),
        None => {
            debug!("No next page URL generated; stopping pagination");
            PageState::Exhausted
        }
    }
}

/// Fill a `subsequent_pages` template and resolve it against the base URL.
fn subsequent_page_url(
    site: &SiteAdapter,
    mode: &Mode,
    template: &str,
    identifier: &str,
    page: u32,
) -> Option<String> {
    let rules = site.encoding_rules_for(Some(&mode.name));
    let encoded = rules.apply(identifier);
    let url_pattern = format_template(&mode.url_pattern, |name| {
        (name == mode.name || name == "search").then(|| encoded.clone())
    })
    .unwrap_or_else(|_| mode.url_pattern.clone());

    let filled = format_template(template, |name| match name {
        "url_pattern" => Some(url_pattern.clone()),
        "page" => Some(page.to_string()),
        "search" => Some(encoded.clone()),
        other if other == mode.name => Some(encoded.clone()),
        _ => None,
    });

    match filled {
        Ok(path) => match site.base_url.join(&path) {
            Ok(url) => {
                debug!("Generated next page URL (subsequent_pages): {}", url);
                Some(url.to_string())
            }
            Err(e) => {
                warn!("Invalid subsequent_pages URL '{}': {}", path, e);
                None
            }
        },
        Err(e) => {
            warn!("Could not fill subsequent_pages template: {}", e);
            None
        }
    }
}
