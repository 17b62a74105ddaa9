//! chromiumoxide-backed browser sessions.

#[cfg(feature = "browser")]
use std::sync::{Arc, Mutex};
#[cfg(feature = "browser")]
use std::time::Duration;

#[cfg(feature = "browser")]
use anyhow::Context;
use anyhow::Result;
use async_trait::async_trait;
#[cfg(feature = "browser")]
use tracing::{debug, info, warn};

#[cfg(feature = "browser")]
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, EventResponseReceived, GetCookiesParams, SetUserAgentOverrideParams,
};
#[cfg(feature = "browser")]
use chromiumoxide::{Browser, BrowserConfig, Page};
#[cfg(feature = "browser")]
use futures::StreamExt;
#[cfg(feature = "browser")]
use tokio::task::JoinHandle;

use super::config::BrowserSettings;
#[cfg(feature = "browser")]
use super::NetworkEvent;
use super::{BrowserCookie, BrowserSession, SessionFactory};

/// Launches (or connects to) Chrome for each new session.
pub struct ChromiumFactory {
    settings: BrowserSettings,
}

impl ChromiumFactory {
    pub fn new(settings: BrowserSettings) -> Self {
        Self { settings }
    }
}

#[cfg(feature = "browser")]
impl ChromiumFactory {
    /// Common Chrome executable paths to check.
    const CHROME_PATHS: &'static [&'static str] = &[
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/snap/bin/chromium",
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
        "/opt/google/chrome/google-chrome",
    ];

    fn find_chrome(&self) -> Result<std::path::PathBuf> {
        if let Some(binary) = &self.settings.chrome_binary {
            let expanded = shellexpand::tilde(binary).into_owned();
            return Ok(std::path::PathBuf::from(expanded));
        }
        for path in Self::CHROME_PATHS {
            let p = std::path::Path::new(path);
            if p.exists() {
                info!("Found Chrome at: {}", path);
                return Ok(p.to_path_buf());
            }
        }
        for cmd in ["google-chrome", "google-chrome-stable", "chromium", "chromium-browser"] {
            if let Ok(path) = which::which(cmd) {
                info!("Found Chrome in PATH: {}", path.display());
                return Ok(path);
            }
        }
        Err(anyhow::anyhow!(
            "Chrome/Chromium not found. Install it or set browser.chrome_binary"
        ))
    }

    async fn launch(&self) -> Result<(Browser, JoinHandle<()>)> {
        if let Some(remote_url) = &self.settings.remote_url {
            return Self::connect_remote(remote_url).await;
        }

        info!("Launching browser (headless={})", self.settings.headless);
        let mut builder = BrowserConfig::builder().chrome_executable(self.find_chrome()?);
        if !self.settings.headless {
            builder = builder.with_head();
        }
        if let Some(ref proxy) = self.settings.proxy {
            builder = builder.arg(format!("--proxy-server={}", proxy));
        }
        builder = builder
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--mute-audio")
            .arg("--autoplay-policy=no-user-gesture-required")
            .arg("--no-sandbox")
            .arg("--disable-gpu");
        for arg in &self.settings.chrome_args {
            builder = builder.arg(arg);
        }
        let config = builder
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build browser config: {}", e))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("Failed to launch browser")?;
        let handle = tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });
        Ok((browser, handle))
    }

    /// Connect to a remote Chrome through its `/json/version` endpoint.
    async fn connect_remote(url: &str) -> Result<(Browser, JoinHandle<()>)> {
        info!("Connecting to remote browser at {}", url);
        let http_url = url
            .replace("ws://", "http://")
            .replace("wss://", "https://");
        let version_url = format!("{}/json/version", http_url.trim_end_matches('/'));

        let resp: serde_json::Value = reqwest::Client::new()
            .get(&version_url)
            .send()
            .await
            .context("Failed to connect to remote browser")?
            .json()
            .await
            .context("Failed to parse browser version info")?;
        let ws_url = resp
            .get("webSocketDebuggerUrl")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("No webSocketDebuggerUrl in response"))?;

        let (browser, mut handler) = Browser::connect(ws_url)
            .await
            .context("Failed to connect to remote browser")?;
        let handle = tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });
        Ok((browser, handle))
    }
}

#[cfg(feature = "browser")]
#[async_trait]
impl SessionFactory for ChromiumFactory {
    async fn create(&self) -> Result<Box<dyn BrowserSession>> {
        let (browser, handler) = self.launch().await?;
        let page = browser
            .new_page("about:blank")
            .await
            .context("Failed to open browser page")?;

        if let Some(ua) = &self.settings.user_agent {
            page.execute(SetUserAgentOverrideParams::new(ua.clone())).await?;
        }

        // Network instrumentation, installed once per session.
        page.execute(EnableParams::default()).await?;
        let log: Arc<Mutex<Vec<NetworkEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let mut events = page
            .event_listener::<EventResponseReceived>()
            .await
            .context("Failed to subscribe to network responses")?;
        let sink = Arc::clone(&log);
        let listener = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let Ok(mut entries) = sink.lock() {
                    entries.push(NetworkEvent::response(event.response.url.clone()));
                }
            }
        });

        Ok(Box::new(ChromiumSession {
            browser,
            page,
            handler,
            listener,
            log,
            timeout: Duration::from_secs(self.settings.timeout),
            user_agent: self.settings.user_agent.clone(),
        }))
    }
}

#[cfg(not(feature = "browser"))]
#[async_trait]
impl SessionFactory for ChromiumFactory {
    async fn create(&self) -> Result<Box<dyn BrowserSession>> {
        let _ = &self.settings;
        Err(anyhow::anyhow!(
            "Browser support not compiled. Rebuild with: cargo build --features browser"
        ))
    }
}

/// One browser with one page and its network log.
#[cfg(feature = "browser")]
pub struct ChromiumSession {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
    listener: JoinHandle<()>,
    log: Arc<Mutex<Vec<NetworkEvent>>>,
    timeout: Duration,
    user_agent: Option<String>,
}

#[cfg(feature = "browser")]
impl ChromiumSession {
    async fn eval_string(&self, script: String) -> Result<Option<String>> {
        let result = self.page.evaluate(script).await?;
        Ok(result.into_value::<Option<String>>().unwrap_or_default())
    }
}

#[cfg(feature = "browser")]
fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

#[cfg(feature = "browser")]
#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        debug!("Navigating to {}", url);
        match tokio::time::timeout(self.timeout, self.page.goto(url)).await {
            Ok(result) => {
                result.with_context(|| format!("Failed to navigate to {}", url))?;
                Ok(())
            }
            Err(_) => Err(anyhow::anyhow!("Timeout navigating to {}", url)),
        }
    }

    async fn content(&mut self) -> Result<String> {
        Ok(self.page.content().await?)
    }

    async fn current_url(&mut self) -> Result<String> {
        Ok(self.page.url().await?.unwrap_or_default())
    }

    async fn find_attribute(&mut self, selector: &str, attribute: &str) -> Result<Option<String>> {
        let element = match self.page.find_element(selector).await {
            Ok(element) => element,
            Err(e) => {
                debug!("Element '{}' not found: {}", selector, e);
                return Ok(None);
            }
        };
        Ok(element.attribute(attribute).await?)
    }

    async fn frame_html(&mut self, selector: &str) -> Result<Option<String>> {
        // Same-origin frames can be read in place.
        let script = format!(
            "(() => {{ const f = document.querySelector({}); \
             try {{ return f && f.contentDocument ? f.contentDocument.documentElement.outerHTML : null; }} \
             catch (e) {{ return null; }} }})()",
            js_string(selector)
        );
        if let Some(html) = self.eval_string(script).await? {
            return Ok(Some(html));
        }

        // Cross-origin: load the frame source in a second page.
        let Some(src) = self.find_attribute(selector, "src").await? else {
            return Ok(None);
        };
        let src = match url::Url::parse(&self.current_url().await?).and_then(|base| base.join(&src)) {
            Ok(u) => u.to_string(),
            Err(_) => src,
        };
        let frame_page = self.browser.new_page("about:blank").await?;
        let html = match tokio::time::timeout(self.timeout, frame_page.goto(src.as_str())).await {
            Ok(Ok(_)) => frame_page.content().await.ok(),
            Ok(Err(e)) => {
                warn!("Failed to load frame {}: {}", src, e);
                None
            }
            Err(_) => {
                warn!("Timeout loading frame {}", src);
                None
            }
        };
        let _ = frame_page.close().await;
        Ok(html)
    }

    async fn cookies(&mut self) -> Result<Vec<BrowserCookie>> {
        let current = self.current_url().await?;
        let params = GetCookiesParams::builder().urls(vec![current]).build();
        let cookies = match self.page.execute(params).await {
            Ok(result) => result.result.cookies,
            Err(e) => {
                warn!("Failed to get cookies via CDP: {}, trying page.get_cookies()", e);
                self.page.get_cookies().await.unwrap_or_default()
            }
        };
        Ok(cookies
            .iter()
            .map(|c| BrowserCookie {
                name: c.name.clone(),
                value: c.value.clone(),
                domain: c.domain.clone(),
                path: c.path.clone(),
                secure: c.secure,
                http_only: c.http_only,
            })
            .collect())
    }

    async fn network_log(&mut self) -> Result<Vec<NetworkEvent>> {
        let mut entries = self
            .log
            .lock()
            .map_err(|_| anyhow::anyhow!("network log poisoned"))?;
        Ok(std::mem::take(&mut *entries))
    }

    async fn execute_script(&mut self, script: &str) -> Result<serde_json::Value> {
        let result = self.page.evaluate(script.to_string()).await?;
        Ok(result.into_value::<serde_json::Value>().unwrap_or(serde_json::Value::Null))
    }

    async fn user_agent(&mut self) -> Option<String> {
        if self.user_agent.is_none() {
            self.user_agent = self
                .eval_string("navigator.userAgent".to_string())
                .await
                .ok()
                .flatten();
        }
        self.user_agent.clone()
    }

    async fn is_alive(&mut self) -> bool {
        if self.handler.is_finished() {
            return false;
        }
        self.browser.version().await.is_ok()
    }

    async fn close(&mut self) {
        let _ = self.page.clone().close().await;
        if let Err(e) = self.browser.close().await {
            debug!("Browser close: {}", e);
        }
        self.listener.abort();
        self.handler.abort();
    }
}
