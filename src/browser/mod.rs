//! Browser automation collaborator.
//!
//! The crawl engine only needs a small contract from a headless browser:
//! navigate, query elements, read cookies and a log of completed network
//! responses. [`BrowserSession`] captures that contract; the chromiumoxide
//! implementation lives behind the `browser` feature.
//!
//! A worker owns exactly one session through a [`SessionSlot`], which
//! recreates the session when it stops responding and always closes it.

mod chromium;
mod config;

pub use chromium::ChromiumFactory;
pub use config::BrowserSettings;

use std::future::Future;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::ScrapeError;

/// CDP method name of a completed response in the network log.
pub const RESPONSE_RECEIVED: &str = "Network.responseReceived";

/// Cookie extracted from a browser session.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BrowserCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
}

impl BrowserCookie {
    pub fn new(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
            domain: String::new(),
            path: "/".to_string(),
            secure: false,
            http_only: false,
        }
    }
}

/// Render cookies as a `Cookie` header value.
pub fn cookie_header(cookies: &[BrowserCookie]) -> String {
    cookies
        .iter()
        .map(|c| format!("{}={}", c.name, c.value))
        .collect::<Vec<_>>()
        .join("; ")
}

/// One entry of the network-activity log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkEvent {
    pub method: String,
    pub url: String,
}

impl NetworkEvent {
    pub fn response(url: impl Into<String>) -> Self {
        Self {
            method: RESPONSE_RECEIVED.to_string(),
            url: url.into(),
        }
    }
}

/// A live browser-automation session.
///
/// Network instrumentation is installed once when the session is created;
/// [`BrowserSession::network_log`] drains what was observed since the
/// previous read.
#[async_trait]
pub trait BrowserSession: Send {
    async fn navigate(&mut self, url: &str) -> Result<()>;

    /// HTML of the current document.
    async fn content(&mut self) -> Result<String>;

    async fn current_url(&mut self) -> Result<String>;

    /// Attribute of the first element matching `selector`. `Ok(None)` when
    /// the element or attribute is absent.
    async fn find_attribute(&mut self, selector: &str, attribute: &str) -> Result<Option<String>>;

    /// HTML of the frame located by `selector`, if any.
    async fn frame_html(&mut self, selector: &str) -> Result<Option<String>>;

    async fn cookies(&mut self) -> Result<Vec<BrowserCookie>>;

    /// Drain the responses observed since the previous call.
    async fn network_log(&mut self) -> Result<Vec<NetworkEvent>>;

    async fn execute_script(&mut self, script: &str) -> Result<serde_json::Value>;

    /// User agent the session presents, when known.
    async fn user_agent(&mut self) -> Option<String>;

    async fn is_alive(&mut self) -> bool;

    async fn close(&mut self);
}

/// Creates fresh sessions.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn create(&self) -> Result<Box<dyn BrowserSession>>;
}

/// Attempts an operation gets before the slot gives up: the first try plus
/// one try on a recreated session.
pub const SESSION_ATTEMPTS: usize = 2;

/// Exclusively-owned session holder for one worker.
pub struct SessionSlot {
    factory: Box<dyn SessionFactory>,
    session: Option<Box<dyn BrowserSession>>,
}

impl SessionSlot {
    pub fn new(factory: Box<dyn SessionFactory>) -> Self {
        Self {
            factory,
            session: None,
        }
    }

    /// Take the live session, creating one if there is none and replacing
    /// one that fails its liveness check.
    async fn take(&mut self) -> Result<Box<dyn BrowserSession>, ScrapeError> {
        if let Some(mut session) = self.session.take() {
            if session.is_alive().await {
                return Ok(session);
            }
            warn!("Browser session failed liveness check; recreating");
            session.close().await;
        }
        debug!("Creating browser session");
        self.factory
            .create()
            .await
            .map_err(|e| ScrapeError::SessionInvalid(format!("{:#}", e)))
    }

    /// Run `op` against the session.
    ///
    /// The session is handed to `op` by value and handed back with the
    /// result. On failure the session is discarded and `op` retried once on
    /// a fresh one.
    pub async fn run<T, F, Fut>(&mut self, mut op: F) -> Result<T, ScrapeError>
    where
        F: FnMut(Box<dyn BrowserSession>) -> Fut,
        Fut: Future<Output = (Box<dyn BrowserSession>, Result<T>)>,
    {
        let mut last_error = String::new();
        for attempt in 1..=SESSION_ATTEMPTS {
            let session = self.take().await?;
            let (mut session, result) = op(session).await;
            match result {
                Ok(value) => {
                    self.session = Some(session);
                    return Ok(value);
                }
                Err(e) => {
                    warn!("Browser operation failed (attempt {}/{}): {:#}", attempt, SESSION_ATTEMPTS, e);
                    last_error = format!("{:#}", e);
                    session.close().await;
                }
            }
        }
        Err(ScrapeError::SessionInvalid(last_error))
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    /// Close the held session, if any.
    pub async fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close().await;
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted in-memory session for tests.

    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use super::*;

    /// A page the fake browser can "load".
    #[derive(Debug, Clone, Default)]
    pub struct FakePage {
        pub html: String,
        /// (selector, attribute) -> value
        pub attributes: HashMap<(String, String), String>,
        pub frames: HashMap<String, String>,
        /// Responses observed when the page loads.
        pub responses: Vec<String>,
    }

    #[derive(Debug, Default)]
    pub struct FakeState {
        pub pages: HashMap<String, FakePage>,
        pub cookies: Vec<BrowserCookie>,
        pub visited: Vec<String>,
        pub closed: usize,
        pub created: usize,
        /// Navigations that fail before the session recovers.
        pub failing_navigations: usize,
        pub alive: bool,
    }

    #[derive(Clone, Default)]
    pub struct FakeBrowser {
        pub state: Arc<Mutex<FakeState>>,
        pub user_agent: Option<String>,
    }

    impl FakeBrowser {
        pub fn new() -> Self {
            let browser = Self::default();
            browser.state.lock().unwrap().alive = true;
            browser
        }

        pub fn with_page(self, url: &str, page: FakePage) -> Self {
            self.state.lock().unwrap().pages.insert(url.to_string(), page);
            self
        }

        pub fn session(&self) -> FakeSession {
            FakeSession {
                browser: self.clone(),
                current: String::new(),
                log: Vec::new(),
            }
        }
    }

    pub struct FakeSession {
        browser: FakeBrowser,
        current: String,
        log: Vec<NetworkEvent>,
    }

    impl FakeSession {
        fn page(&self) -> FakePage {
            let state = self.browser.state.lock().unwrap();
            state.pages.get(&self.current).cloned().unwrap_or_default()
        }
    }

    #[async_trait]
    impl BrowserSession for FakeSession {
        async fn navigate(&mut self, url: &str) -> Result<()> {
            let responses = {
                let mut state = self.browser.state.lock().unwrap();
                if state.failing_navigations > 0 {
                    state.failing_navigations -= 1;
                    state.alive = false;
                    anyhow::bail!("navigation crashed");
                }
                state.visited.push(url.to_string());
                state.pages.get(url).map(|p| p.responses.clone()).unwrap_or_default()
            };
            self.current = url.to_string();
            self.log.extend(responses.into_iter().map(NetworkEvent::response));
            Ok(())
        }

        async fn content(&mut self) -> Result<String> {
            Ok(self.page().html)
        }

        async fn current_url(&mut self) -> Result<String> {
            Ok(self.current.clone())
        }

        async fn find_attribute(&mut self, selector: &str, attribute: &str) -> Result<Option<String>> {
            Ok(self
                .page()
                .attributes
                .get(&(selector.to_string(), attribute.to_string()))
                .cloned())
        }

        async fn frame_html(&mut self, selector: &str) -> Result<Option<String>> {
            Ok(self.page().frames.get(selector).cloned())
        }

        async fn cookies(&mut self) -> Result<Vec<BrowserCookie>> {
            Ok(self.browser.state.lock().unwrap().cookies.clone())
        }

        async fn network_log(&mut self) -> Result<Vec<NetworkEvent>> {
            Ok(std::mem::take(&mut self.log))
        }

        async fn execute_script(&mut self, _script: &str) -> Result<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }

        async fn user_agent(&mut self) -> Option<String> {
            self.browser.user_agent.clone()
        }

        async fn is_alive(&mut self) -> bool {
            self.browser.state.lock().unwrap().alive
        }

        async fn close(&mut self) {
            self.browser.state.lock().unwrap().closed += 1;
        }
    }

    pub struct FakeFactory {
        pub browser: FakeBrowser,
        pub creations: AtomicUsize,
    }

    impl FakeFactory {
        pub fn new(browser: FakeBrowser) -> Self {
            Self {
                browser,
                creations: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SessionFactory for FakeFactory {
        async fn create(&self) -> Result<Box<dyn BrowserSession>> {
            self.creations.fetch_add(1, Ordering::SeqCst);
            let mut state = self.browser.state.lock().unwrap();
            state.created += 1;
            state.alive = true;
            drop(state);
            Ok(Box::new(self.browser.session()))
        }
    }
}
