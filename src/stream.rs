//! Stream resolution for pages whose player hides the media URL.
//!
//! The page is loaded in a browser session, the player frame (if any) is
//! entered, network activity is observed for a settle window and the best
//! manifest URL is picked from it. The session's cookies and the frame URL
//! travel with the result so the download can replay the request.

use std::time::Duration;

use anyhow::Result;
use indexmap::IndexMap;
use tracing::{debug, info, warn};
use url::Url;

use crate::browser::{cookie_header, BrowserSession, RESPONSE_RECEIVED};
use crate::config::StreamConfig;

/// A resolved manifest and what is needed to fetch it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamCandidate {
    pub url: String,
    /// Header-ready `name=value; ...` string.
    pub cookies: String,
    /// Frame (or page) URL the manifest was requested from.
    pub referer: String,
    pub user_agent: Option<String>,
}

impl StreamCandidate {
    /// Request headers for fetching the manifest, layered over `base`.
    pub fn headers(&self, base: &IndexMap<String, String>) -> IndexMap<String, String> {
        let mut headers = base.clone();
        if !self.cookies.is_empty() {
            headers.insert("Cookie".to_string(), self.cookies.clone());
        }
        headers.insert("Referer".to_string(), self.referer.clone());
        if let Some(ua) = &self.user_agent {
            headers.insert("User-Agent".to_string(), ua.clone());
        }
        headers
    }
}

/// Rank of `url` among `markers` (lower is better); unmarked URLs rank last.
fn resolution_rank(url: &str, markers: &[String]) -> usize {
    markers
        .iter()
        .position(|m| url.contains(m.as_str()))
        .unwrap_or(markers.len())
}

/// Pick the candidate with the highest resolution marker. Ties keep the
/// first one found.
pub fn select_best<'a>(candidates: &'a [String], markers: &[String]) -> Option<&'a str> {
    let mut best: Option<(&'a str, usize)> = None;
    for url in candidates {
        let rank = resolution_rank(url, markers);
        match best {
            Some((_, best_rank)) if rank >= best_rank => {}
            _ => best = Some((url.as_str(), rank)),
        }
    }
    best.map(|(url, _)| url)
}

/// Manifest URLs in the session's network log, in observation order and
/// without repeats.
pub async fn manifest_candidates(
    session: &mut dyn BrowserSession,
    config: &StreamConfig,
) -> Result<Vec<String>> {
    let mut found: Vec<String> = Vec::new();
    for event in session.network_log().await? {
        if event.method != RESPONSE_RECEIVED || !config.manifest_pattern.is_match(&event.url) {
            continue;
        }
        if !found.contains(&event.url) {
            debug!("Found manifest URL: {}", event.url);
            found.push(event.url);
        }
    }
    Ok(found)
}

/// Load `page_url`, pierce the player frame and find the best manifest.
///
/// `Ok(None)` means the page loaded but no manifest showed up within the
/// settle window. Errors are session failures.
pub async fn resolve(
    session: &mut dyn BrowserSession,
    page_url: &str,
    config: &StreamConfig,
    settle: Duration,
) -> Result<Option<StreamCandidate>> {
    // Responses from earlier pages on this session must not be ranked.
    let stale = session.network_log().await?;
    if !stale.is_empty() {
        debug!("Discarding {} earlier network responses", stale.len());
    }
    session.navigate(page_url).await?;

    let mut referer = page_url.to_string();
    if let Some(frame) = &config.iframe {
        debug!("Piercing iframe '{}' for manifest", frame);
        match session.find_attribute(frame, "src").await? {
            Some(src) if !src.trim().is_empty() => {
                let frame_url = Url::parse(page_url)
                    .and_then(|base| base.join(src.trim()))
                    .map(|u| u.to_string())
                    .unwrap_or_else(|_| src.trim().to_string());
                info!("Found iframe: {}", frame_url);
                session.navigate(&frame_url).await?;
                referer = frame_url;
            }
            _ => warn!("Iframe '{}' not found on {}; using the outer page", frame, page_url),
        }
    }

    if !settle.is_zero() {
        tokio::time::sleep(settle).await;
    }

    let candidates = manifest_candidates(session, config).await?;
    let Some(best) = select_best(&candidates, &config.resolution_markers) else {
        debug!("No manifest among network responses for {}", page_url);
        return Ok(None);
    };
    info!("Selected best manifest: {}", best);

    let cookies = cookie_header(&session.cookies().await.unwrap_or_default());
    let user_agent = session.user_agent().await;
    Ok(Some(StreamCandidate {
        url: best.to_string(),
        cookies,
        referer,
        user_agent,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::testing::{FakeBrowser, FakePage};
    use crate::browser::BrowserCookie;
    use crate::config::site::DEFAULT_RESOLUTION_MARKERS;
    use regex::Regex;

    fn config(iframe: Option<&str>) -> StreamConfig {
        StreamConfig {
            iframe: iframe.map(|s| s.to_string()),
            manifest_pattern: Regex::new(r"\.m3u8").unwrap(),
            resolution_markers: DEFAULT_RESOLUTION_MARKERS.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn markers() -> Vec<String> {
        DEFAULT_RESOLUTION_MARKERS.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_select_best_prefers_resolution_marker() {
        let candidates = vec![
            "https://cdn/480p/index.m3u8".to_string(),
            "https://cdn/1920x1080/index.m3u8".to_string(),
            "https://cdn/720p/index.m3u8".to_string(),
        ];
        assert_eq!(select_best(&candidates, &markers()), Some("https://cdn/1920x1080/index.m3u8"));
    }

    #[test]
    fn test_select_best_ties_keep_first() {
        let candidates = vec!["https://cdn/a.m3u8".to_string(), "https://cdn/b.m3u8".to_string()];
        assert_eq!(select_best(&candidates, &markers()), Some("https://cdn/a.m3u8"));
        assert_eq!(select_best(&[], &markers()), None);
    }

    #[tokio::test]
    async fn test_resolve_pierces_frame() {
        let mut attributes = std::collections::HashMap::new();
        attributes.insert(
            ("iframe#player".to_string(), "src".to_string()),
            "/embed/42".to_string(),
        );
        let browser = FakeBrowser {
            user_agent: Some("FakeUA/1.0".into()),
            ..FakeBrowser::new()
        }
        .with_page(
            "https://site.example/watch/42",
            FakePage {
                attributes,
                responses: vec!["https://site.example/app.js".into()],
                ..FakePage::default()
            },
        )
        .with_page(
            "https://site.example/embed/42",
            FakePage {
                responses: vec![
                    "https://cdn.example/hls/720p/index.m3u8".into(),
                    "https://cdn.example/seg1.ts".into(),
                    "https://cdn.example/hls/1080p/index.m3u8".into(),
                ],
                ..FakePage::default()
            },
        );
        browser.state.lock().unwrap().cookies = vec![BrowserCookie::new("sid", "abc")];

        let mut session = browser.session();
        let candidate = resolve(
            &mut session,
            "https://site.example/watch/42",
            &config(Some("iframe#player")),
            Duration::ZERO,
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(candidate.url, "https://cdn.example/hls/1080p/index.m3u8");
        assert_eq!(candidate.referer, "https://site.example/embed/42");
        assert_eq!(candidate.cookies, "sid=abc");

        let headers = candidate.headers(&IndexMap::new());
        assert_eq!(headers.get("Cookie").map(|s| s.as_str()), Some("sid=abc"));
        assert_eq!(headers.get("User-Agent").map(|s| s.as_str()), Some("FakeUA/1.0"));
    }

    #[tokio::test]
    async fn test_missing_frame_falls_back_to_outer_page() {
        let browser = FakeBrowser::new().with_page(
            "https://site.example/watch/1",
            FakePage {
                responses: vec!["https://cdn.example/master.m3u8".into()],
                ..FakePage::default()
            },
        );
        let mut session = browser.session();
        let candidate = resolve(
            &mut session,
            "https://site.example/watch/1",
            &config(Some("iframe.missing")),
            Duration::ZERO,
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(candidate.url, "https://cdn.example/master.m3u8");
        assert_eq!(candidate.referer, "https://site.example/watch/1");
        assert_eq!(candidate.cookies, "");
    }

    #[test]
    fn test_candidate_headers_layer_over_base() {
        let candidate = StreamCandidate {
            url: "https://cdn.example/hls/1080p.m3u8".to_string(),
            cookies: "sid=abc".to_string(),
            referer: "https://player.example/embed/1".to_string(),
            user_agent: Some("SessionAgent/1.0".to_string()),
        };
        let mut base = IndexMap::new();
        base.insert("User-Agent".to_string(), "Configured/1.0".to_string());
        base.insert("Accept".to_string(), "*/*".to_string());

        let headers = candidate.headers(&base);
        assert_eq!(headers["Cookie"], "sid=abc");
        assert_eq!(headers["Referer"], "https://player.example/embed/1");
        assert_eq!(headers["User-Agent"], "SessionAgent/1.0");
        assert_eq!(headers["Accept"], "*/*");
        assert!(!headers.contains_key("Origin"));
    }

    #[tokio::test]
    async fn test_consecutive_resolves_on_one_session() {
        let page = |manifest: &str| FakePage {
            responses: vec![manifest.to_string()],
            ..FakePage::default()
        };
        let browser = FakeBrowser::new()
            .with_page("https://site.example/v/1", page("https://cdn.example/one/1080p/index.m3u8"))
            .with_page("https://site.example/v/2", page("https://cdn.example/two/720p/index.m3u8"))
            .with_page("https://site.example/tag/x", page("https://cdn.example/preview/1080p/index.m3u8"));
        let mut session = browser.session();
        let config = config(None);

        let first = resolve(&mut session, "https://site.example/v/1", &config, Duration::ZERO)
            .await
            .unwrap()
            .unwrap();
        // A page load between items, e.g. a list page fetched through the browser.
        session.navigate("https://site.example/tag/x").await.unwrap();
        let second = resolve(&mut session, "https://site.example/v/2", &config, Duration::ZERO)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(first.url, "https://cdn.example/one/1080p/index.m3u8");
        assert_eq!(second.url, "https://cdn.example/two/720p/index.m3u8");
        assert!(session.network_log().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_no_manifest_is_none() {
        let browser = FakeBrowser::new();
        let mut session = browser.session();
        let result = resolve(&mut session, "https://site.example/x", &config(None), Duration::ZERO)
            .await
            .unwrap();
        assert!(result.is_none());
    }
}
