//! URL routing against a site's modes, and URL construction from mode patterns.

use regex::{Regex, RegexBuilder};
use tracing::{debug, info};
use url::Url;

use crate::config::{normalize_host, Mode, SiteAdapter};
use crate::error::ScrapeError;

/// A successful route.
#[derive(Debug, Clone)]
pub struct RouteMatch<'a> {
    pub mode: &'a Mode,
    /// Name of the scraper the mode uses.
    pub scraper: &'a str,
    /// Value captured by the pattern's first placeholder, percent-decoded.
    pub identifier: Option<String>,
}

/// Host and path of `url`, normalized for matching: host lower-cased without
/// `www.`, path without trailing slash.
pub fn normalize_url(url: &str) -> Option<(String, String)> {
    let parsed = Url::parse(url).ok()?;
    let host = normalize_host(parsed.host_str()?);
    let path = parsed.path().trim_end_matches('/').to_string();
    Some((host, path))
}

fn is_placeholder(segment: &str) -> bool {
    segment.contains('{') && segment.contains('}')
}

fn split_segments(path: &str) -> Vec<&str> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        Vec::new()
    } else {
        trimmed.split('/').collect()
    }
}

/// Build the anchored matcher for a mode pattern. `None` for patterns
/// without placeholders, which match by equality instead.
fn pattern_matcher(pattern: &str, path_segment_count: usize) -> Option<Regex> {
    let segments = split_segments(pattern);
    if !segments.iter().any(|s| is_placeholder(s)) {
        return None;
    }

    let parts: Vec<String> = segments
        .iter()
        .map(|segment| {
            if is_placeholder(segment) {
                "([^/]+)".to_string()
            } else {
                regex::escape(segment)
            }
        })
        .collect();

    let mut source = format!("^/{}", parts.join("/"));
    let ends_with_placeholder = segments.last().is_some_and(|s| is_placeholder(s));
    if ends_with_placeholder && path_segment_count > segments.len() {
        source.push_str("(?:/.*)?");
    }
    source.push('$');

    RegexBuilder::new(&source).case_insensitive(true).build().ok()
}

/// Match `url` against the site's modes in declaration order.
pub fn route<'a>(url: &str, site: &'a SiteAdapter) -> Option<RouteMatch<'a>> {
    let (host, path) = normalize_url(url)?;
    if host != site.domain {
        debug!("No match: host '{}' does not match site domain '{}'", host, site.domain);
        return None;
    }

    let path_segments = split_segments(&path).len();
    for mode in site.modes.values() {
        let pattern = mode.url_pattern.trim_end_matches('/');
        let required = split_segments(pattern).len();
        if path_segments < required {
            continue;
        }

        match pattern_matcher(pattern, path_segments) {
            None => {
                if path.trim_start_matches('/').eq_ignore_ascii_case(pattern.trim_start_matches('/')) {
                    info!("Matched URL '{}' to mode '{}' with exact pattern '{}'", url, mode.name, pattern);
                    return Some(RouteMatch {
                        mode,
                        scraper: &mode.scraper,
                        identifier: None,
                    });
                }
            }
            Some(matcher) => {
                if let Some(captures) = matcher.captures(&path) {
                    info!("Matched URL '{}' to mode '{}' with pattern '{}'", url, mode.name, pattern);
                    let identifier = captures.get(1).map(|m| {
                        urlencoding::decode(m.as_str())
                            .map(|s| s.into_owned())
                            .unwrap_or_else(|_| m.as_str().to_string())
                    });
                    return Some(RouteMatch {
                        mode,
                        scraper: &mode.scraper,
                        identifier,
                    });
                }
            }
        }
    }

    debug!("No mode matched for URL: {}", url);
    None
}

/// Substitute `{name}` placeholders in `template`. `{{` and `}}` are literal
/// braces. Unknown names are an error.
pub fn format_template<F>(template: &str, mut lookup: F) -> Result<String, String>
where
    F: FnMut(&str) -> Option<String>,
{
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut name = String::new();
                let mut closed = false;
                for ch in chars.by_ref() {
                    if ch == '}' {
                        closed = true;
                        break;
                    }
                    name.push(ch);
                }
                if !closed {
                    return Err(format!("unclosed placeholder in '{}'", template));
                }
                let value = lookup(&name)
                    .ok_or_else(|| format!("no value for placeholder '{{{}}}' in '{}'", name, template))?;
                out.push_str(&value);
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

/// Build a URL from a mode pattern.
///
/// Arguments pass through the mode's encoding rules when it has them, else
/// the site's. The filled path is resolved against the site's base URL.
pub fn construct_url(
    site: &SiteAdapter,
    pattern: &str,
    mode: Option<&str>,
    args: &[(&str, String)],
) -> Result<Url, ScrapeError> {
    let rules = site.encoding_rules_for(mode);
    let path = format_template(pattern, |name| {
        args.iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| rules.apply(value))
    })
    .map_err(ScrapeError::ConfigMismatch)?;

    let url = site
        .base_url
        .join(&path)
        .map_err(|e| ScrapeError::ConfigMismatch(format!("cannot join '{}' onto base: {}", path, e)))?;
    debug!("Constructed URL: {}", url);
    Ok(url)
}

/// URL of `mode` for `identifier`, on `page` (page > 1 uses the paginated
/// pattern when the mode has one).
pub fn mode_url(site: &SiteAdapter, mode: &Mode, identifier: &str, page: u32) -> Result<Url, ScrapeError> {
    match (&mode.paged_pattern, page > 1) {
        (Some(paged), true) => construct_url(
            site,
            paged,
            Some(&mode.name),
            &[(mode.name.as_str(), identifier.to_string()), ("page", page.to_string())],
        ),
        _ => construct_url(
            site,
            &mode.url_pattern,
            Some(&mode.name),
            &[(mode.name.as_str(), identifier.to_string())],
        ),
    }
}
