//! Browser engine settings.

use serde::{Deserialize, Serialize};

/// Headless browser settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrowserSettings {
    /// Run in headless mode (default: true).
    #[serde(default = "default_headless")]
    pub headless: bool,

    /// Proxy server URL (e.g., "socks5://127.0.0.1:1080").
    #[serde(default)]
    pub proxy: Option<String>,

    /// Page load timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Additional Chrome arguments.
    #[serde(default)]
    pub chrome_args: Vec<String>,

    /// Explicit Chrome/Chromium executable.
    #[serde(default)]
    pub chrome_binary: Option<String>,

    /// Remote Chrome DevTools URL (e.g., "ws://localhost:9222").
    /// If set, connects to an existing browser instead of launching one.
    #[serde(default)]
    pub remote_url: Option<String>,

    /// User agent forced on every page; the browser's own when unset.
    #[serde(default)]
    pub user_agent: Option<String>,
}

fn default_headless() -> bool {
    true
}

fn default_timeout() -> u64 {
    30
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: default_headless(),
            proxy: None,
            timeout: default_timeout(),
            chrome_args: Vec::new(),
            chrome_binary: None,
            remote_url: None,
            user_agent: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_browser_settings_defaults() {
        let settings: BrowserSettings = serde_yaml::from_str("proxy: socks5://127.0.0.1:1080").unwrap();
        assert!(settings.headless);
        assert_eq!(settings.timeout, 30);
        assert_eq!(settings.proxy.as_deref(), Some("socks5://127.0.0.1:1080"));
    }
}
