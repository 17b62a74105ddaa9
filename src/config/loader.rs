//! Settings discovery and site registry loading.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};
use url::Url;

use super::settings::{resolve_path, Settings};
use super::site::{normalize_host, SiteAdapter};

/// Environment variable pointing at a settings file.
pub const CONFIG_ENV_VAR: &str = "SITEGRAB_CONFIG";

const APP_NAME: &str = "sitegrab";

/// Options for loading settings and sites.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit settings file (overrides discovery).
    pub config_path: Option<PathBuf>,
    /// Explicit site directory (overrides discovery).
    pub sites_dir: Option<PathBuf>,
}

/// Find the settings file: explicit path, `$SITEGRAB_CONFIG`, then the
/// `sitegrab` config files prefer discovers in the standard locations.
pub async fn discover_settings_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(resolve_path(&path.to_string_lossy(), Path::new(".")));
    }
    if let Ok(env_path) = std::env::var(CONFIG_ENV_VAR) {
        if !env_path.trim().is_empty() {
            return Some(resolve_path(&env_path, Path::new(".")));
        }
    }

    match prefer::load(APP_NAME).await {
        Ok(found) => found.source_path().map(|p| p.to_path_buf()),
        Err(_) => None,
    }
}

/// Read a settings file, choosing the format from its extension.
pub async fn load_settings_from_path(path: &Path) -> Result<Settings> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read config file {}", path.display()))?;

    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("yaml");
    let mut settings: Settings = match ext {
        "toml" => toml::from_str(&contents)
            .with_context(|| format!("Failed to parse TOML config {}", path.display()))?,
        _ => serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML config {}", path.display()))?,
    };
    settings.source_path = Some(path.to_path_buf());
    Ok(settings)
}

/// Load settings via discovery. A missing file yields defaults; an
/// unreadable or malformed one is an error.
pub async fn load_settings(options: &LoadOptions) -> Result<Settings> {
    match discover_settings_path(options.config_path.as_deref()).await {
        Some(path) => {
            info!("Loading settings from {}", path.display());
            load_settings_from_path(&path).await
        }
        None => {
            debug!("No settings file found; using defaults");
            Ok(Settings::default())
        }
    }
}

/// Find the site directory: explicit path, `sites/` next to the settings
/// file, `./sites`, then the user config directory.
pub fn discover_sites_dir(options: &LoadOptions, settings: &Settings) -> Option<PathBuf> {
    if let Some(dir) = &options.sites_dir {
        return Some(resolve_path(&dir.to_string_lossy(), Path::new(".")));
    }
    let mut candidates = vec![settings.base_dir().join("sites"), PathBuf::from("sites")];
    if let Some(config_dir) = dirs::config_dir() {
        candidates.push(config_dir.join(APP_NAME).join("sites"));
    }
    candidates.into_iter().find(|p| p.is_dir())
}

/// All loaded site adapters.
#[derive(Debug, Clone, Default)]
pub struct SiteRegistry {
    sites: Vec<SiteAdapter>,
}

impl SiteRegistry {
    pub fn new(sites: Vec<SiteAdapter>) -> Self {
        Self { sites }
    }

    /// Load every `*.yaml`/`*.yml` in `dir`, sorted by file name. Files that
    /// fail validation are logged and skipped.
    pub async fn load_dir(dir: &Path) -> Result<Self> {
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .with_context(|| format!("Failed to read site directory {}", dir.display()))?;

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_yaml = matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("yaml") | Some("yml")
            );
            if is_yaml {
                paths.push(path);
            }
        }
        paths.sort();

        let mut sites = Vec::new();
        for path in paths {
            let source = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            match SiteAdapter::from_yaml(&source) {
                Ok(site) => {
                    debug!("Loaded site '{}' from {}", site.name, path.display());
                    sites.push(site);
                }
                Err(e) => warn!("Skipping site file {}: {}", path.display(), e),
            }
        }
        info!("Loaded {} site(s) from {}", sites.len(), dir.display());
        Ok(Self { sites })
    }

    pub fn sites(&self) -> &[SiteAdapter] {
        &self.sites
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    /// Look a site up by shortcode, name or domain.
    pub fn find(&self, key: &str) -> Option<&SiteAdapter> {
        self.sites.iter().find(|s| s.matches_key(key))
    }

    /// The site whose domain matches the host of `url`.
    pub fn for_url(&self, url: &str) -> Option<&SiteAdapter> {
        let parsed = Url::parse(url).ok()?;
        let host = normalize_host(parsed.host_str()?);
        self.sites.iter().find(|s| s.domain == host)
    }
}
