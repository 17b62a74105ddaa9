//! User agent rotation.

/// Browser user agents used when the settings don't list any.
pub const BROWSER_USER_AGENTS: &[&str] = &[
    // Chrome on Windows
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36",
    // Chrome on Mac
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    // Firefox
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:133.0) Gecko/20100101 Firefox/133.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:133.0) Gecko/20100101 Firefox/133.0",
    // Safari on Mac
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/18.1 Safari/605.1.15",
    // Edge on Windows
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36 Edg/131.0.0.0",
];

fn clock_index(len: usize) -> usize {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos() as usize)
        .unwrap_or(0);
    nanos % len.max(1)
}

/// A random built-in browser user agent.
pub fn random_user_agent() -> &'static str {
    BROWSER_USER_AGENTS[clock_index(BROWSER_USER_AGENTS.len())]
}

/// Pick one of the configured user agents, falling back to the built-in list
/// when none are configured.
pub fn pick_user_agent(configured: &[String]) -> String {
    let configured: Vec<&String> = configured.iter().filter(|ua| !ua.trim().is_empty()).collect();
    if configured.is_empty() {
        return random_user_agent().to_string();
    }
    configured[clock_index(configured.len())].trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pick_user_agent_builtin() {
        let ua = pick_user_agent(&[]);
        assert!(ua.contains("Mozilla"));
        assert!(BROWSER_USER_AGENTS.contains(&ua.as_str()));
    }

    #[test]
    fn test_pick_user_agent_configured() {
        let ua = pick_user_agent(&["MyBot/1.0".to_string(), "  ".to_string()]);
        assert_eq!(ua, "MyBot/1.0");
    }
}
