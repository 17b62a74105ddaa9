//! Configuration: run-wide settings and per-site adapters.

pub mod loader;
pub mod settings;
pub mod site;

pub use loader::{
    discover_settings_path, discover_sites_dir, load_settings, load_settings_from_path,
    LoadOptions, SiteRegistry, CONFIG_ENV_VAR,
};
pub use settings::{
    resolve_path, Destination, FileNaming, Settings, SleepConfig, TimeoutConfig,
    MAX_FILENAME_BYTES,
};
pub use site::{
    normalize_host, DetailScraper, EncodingRules, ListScraper, Mode, ModeKind, PaginationRule,
    Scraper, ScraperPagination, SiteAdapter, StreamConfig,
};
