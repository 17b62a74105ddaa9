//! Run-wide settings shared by every site.

use std::path::{Path, PathBuf};
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::browser::BrowserSettings;

/// Characters stripped from titles before they become filenames.
pub const DEFAULT_INVALID_CHARS: &str = "<>:\"/\\|?*";

/// Hard filesystem ceiling on a filename, in UTF-8 bytes.
pub const MAX_FILENAME_BYTES: usize = 255;

/// Delays between crawl steps, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepConfig {
    #[serde(default = "default_between_items", alias = "between_videos")]
    pub between_items: f64,
    #[serde(default = "default_between_pages")]
    pub between_pages: f64,
}

fn default_between_items() -> f64 {
    1.0
}

fn default_between_pages() -> f64 {
    2.0
}

impl Default for SleepConfig {
    fn default() -> Self {
        Self {
            between_items: default_between_items(),
            between_pages: default_between_pages(),
        }
    }
}

impl SleepConfig {
    pub fn between_items(&self) -> Duration {
        seconds(self.between_items)
    }

    pub fn between_pages(&self) -> Duration {
        seconds(self.between_pages)
    }
}

fn seconds(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::from_secs_f64(value.min(3600.0))
    } else {
        Duration::ZERO
    }
}

/// Upper bounds on every blocking operation, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_page_fetch")]
    pub page_fetch: u64,
    /// How long network activity is observed while looking for a manifest.
    #[serde(default = "default_manifest_settle")]
    pub manifest_settle: u64,
    /// Overall limit on an external download process.
    #[serde(default = "default_process")]
    pub process: u64,
    #[serde(default = "default_probe")]
    pub probe: u64,
}

fn default_page_fetch() -> u64 {
    30
}

fn default_manifest_settle() -> u64 {
    5
}

fn default_process() -> u64 {
    600
}

fn default_probe() -> u64 {
    30
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            page_fetch: default_page_fetch(),
            manifest_settle: default_manifest_settle(),
            process: default_process(),
            probe: default_probe(),
        }
    }
}

impl TimeoutConfig {
    pub fn page_fetch(&self) -> Duration {
        Duration::from_secs(self.page_fetch)
    }

    pub fn manifest_settle(&self) -> Duration {
        Duration::from_secs(self.manifest_settle)
    }

    pub fn process(&self) -> Duration {
        Duration::from_secs(self.process)
    }

    pub fn probe(&self) -> Duration {
        Duration::from_secs(self.probe)
    }
}

/// Filename rendering rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileNaming {
    #[serde(default = "default_invalid_chars")]
    pub invalid_chars: String,
    #[serde(default = "default_extension")]
    pub extension: String,
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
}

fn default_invalid_chars() -> String {
    DEFAULT_INVALID_CHARS.to_string()
}

fn default_extension() -> String {
    ".mp4".to_string()
}

fn default_max_chars() -> usize {
    MAX_FILENAME_BYTES
}

impl Default for FileNaming {
    fn default() -> Self {
        Self {
            invalid_chars: default_invalid_chars(),
            extension: default_extension(),
            max_chars: default_max_chars(),
        }
    }
}

/// Where finished downloads end up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Destination {
    /// Write straight into a local directory.
    Local { path: String },
    /// Download into temporary storage, then upload to a mounted share.
    #[serde(alias = "smb")]
    Remote {
        /// Mount point of the share.
        share: String,
        /// Directory inside the share.
        #[serde(default)]
        path: String,
        #[serde(default)]
        temporary_storage: Option<String>,
    },
}

impl Default for Destination {
    fn default() -> Self {
        Destination::Local {
            path: ".".to_string(),
        }
    }
}

/// Application settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// User agents to rotate through. Empty uses the built-in list.
    #[serde(default)]
    pub user_agents: Vec<String>,
    /// Extra headers sent with every page fetch.
    #[serde(default)]
    pub headers: IndexMap<String, String>,
    #[serde(default)]
    pub sleep: SleepConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub file_naming: FileNaming,
    /// The first entry is used.
    #[serde(default = "default_destinations")]
    pub download_destinations: Vec<Destination>,
    #[serde(default)]
    pub make_nfo: bool,
    /// Exact-match casing for entity names and titles (e.g. "McFly").
    #[serde(default)]
    pub case_overrides: Vec<String>,
    /// Additional casing overrides applied to tags only.
    #[serde(default)]
    pub tag_case_overrides: Vec<String>,
    /// Items mentioning any of these terms are skipped.
    #[serde(default)]
    pub ignored: Vec<String>,
    #[serde(default)]
    pub browser: BrowserSettings,
    /// Path this was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

fn default_destinations() -> Vec<Destination> {
    vec![Destination::default()]
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            user_agents: Vec::new(),
            headers: IndexMap::new(),
            sleep: SleepConfig::default(),
            timeouts: TimeoutConfig::default(),
            file_naming: FileNaming::default(),
            download_destinations: default_destinations(),
            make_nfo: false,
            case_overrides: Vec::new(),
            tag_case_overrides: Vec::new(),
            ignored: Vec::new(),
            browser: BrowserSettings::default(),
            source_path: None,
        }
    }
}

impl Settings {
    /// The active download destination.
    pub fn destination(&self) -> Destination {
        self.download_destinations
            .first()
            .cloned()
            .unwrap_or_default()
    }

    /// Directory relative paths are resolved against: the settings file's
    /// directory when known, otherwise the working directory.
    pub fn base_dir(&self) -> PathBuf {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Expand `~` and environment variables, then resolve relative paths
    /// against [`Settings::base_dir`].
    pub fn resolve_path(&self, path_str: &str) -> PathBuf {
        resolve_path(path_str, &self.base_dir())
    }
}

/// Expand `~`/`$VAR` in `path_str` and anchor relative results at `base_dir`.
pub fn resolve_path(path_str: &str, base_dir: &Path) -> PathBuf {
    let expanded = shellexpand::full(path_str)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| shellexpand::tilde(path_str).into_owned());
    let path = Path::new(&expanded);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.file_naming.extension, ".mp4");
        assert_eq!(settings.file_naming.max_chars, 255);
        assert_eq!(settings.timeouts.manifest_settle(), Duration::from_secs(5));
        assert_eq!(
            settings.destination(),
            Destination::Local {
                path: ".".to_string()
            }
        );
    }

    #[test]
    fn test_settings_yaml() {
        let yaml = r#"
make_nfo: true
sleep:
  between_videos: 0.5
file_naming:
  extension: .mkv
download_destinations:
  - type: smb
    share: /mnt/media
    path: videos
case_overrides: [McFly, AC/DC]
"#;
        let settings: Settings = serde_yaml::from_str(yaml).unwrap();
        assert!(settings.make_nfo);
        assert_eq!(settings.sleep.between_items(), Duration::from_millis(500));
        assert_eq!(settings.file_naming.extension, ".mkv");
        assert_eq!(settings.file_naming.invalid_chars, DEFAULT_INVALID_CHARS);
        match settings.destination() {
            Destination::Remote { share, path, .. } => {
                assert_eq!(share, "/mnt/media");
                assert_eq!(path, "videos");
            }
            other => panic!("unexpected destination {:?}", other),
        }
    }

    #[test]
    fn test_settings_toml() {
        let toml_src = r#"
ignored = ["spoiler"]

[timeouts]
process = 60

[[download_destinations]]
type = "local"
path = "~/Videos"
"#;
        let settings: Settings = toml::from_str(toml_src).unwrap();
        assert_eq!(settings.ignored, vec!["spoiler"]);
        assert_eq!(settings.timeouts.process(), Duration::from_secs(60));
        assert_eq!(settings.timeouts.page_fetch, 30);
    }

    #[test]
    fn test_negative_sleep_is_zero() {
        let sleep = SleepConfig {
            between_items: -1.0,
            between_pages: f64::NAN,
        };
        assert_eq!(sleep.between_items(), Duration::ZERO);
        assert_eq!(sleep.between_pages(), Duration::ZERO);
    }

    #[test]
    fn test_resolve_path() {
        let base = Path::new("/etc/sitegrab");
        assert_eq!(resolve_path("/abs/dir", base), PathBuf::from("/abs/dir"));
        assert_eq!(resolve_path("sites", base), PathBuf::from("/etc/sitegrab/sites"));
    }
}
