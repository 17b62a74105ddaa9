//! Site adapters: the per-site YAML document and its validated form.
//!
//! Raw documents are deserialized leniently (strings or lists, optional keys)
//! and then validated exactly once into a [`SiteAdapter`]: selectors and
//! regexes compiled, field cardinality fixed, pagination rule resolved.

use indexmap::IndexMap;
use regex::Regex;
use serde::Deserialize;
use tracing::warn;
use url::Url;

use crate::download::DownloadMethod;
use crate::error::ScrapeError;
use crate::extract::{
    AttributeType, Cardinality, CompiledSelector, FieldSource, FieldSpec, PostProcessStep,
    ReplaceRule,
};

/// Manifest URL pattern used when a site does not set one.
pub const DEFAULT_MANIFEST_PATTERN: &str = r"\.m3u8";

/// Resolution markers, best first.
pub const DEFAULT_RESOLUTION_MARKERS: &[&str] = &[
    "2160p", "3840x2160", "1440p", "2560x1440", "1080p", "1920x1080", "720p", "1280x720", "480p",
    "360p",
];

// ---------------------------------------------------------------------------
// Raw document
// ---------------------------------------------------------------------------

/// A string or a list of strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(v) => vec![v],
            OneOrMany::Many(v) => v,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawSite {
    pub name: String,
    #[serde(default)]
    pub shortcode: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    pub base_url: String,
    /// Fetch pages through the browser session instead of plain HTTP.
    #[serde(default)]
    pub use_browser: bool,
    #[serde(default)]
    pub name_prefix: Option<String>,
    #[serde(default)]
    pub name_suffix: Option<String>,
    #[serde(default)]
    pub url_encoding_rules: IndexMap<String, String>,
    #[serde(default)]
    pub download: RawDownload,
    pub modes: IndexMap<String, RawMode>,
    pub scrapers: IndexMap<String, RawScraper>,
    #[serde(default)]
    pub stream: Option<RawStream>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawDownload {
    #[serde(default)]
    pub method: DownloadMethod,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawMode {
    pub url_pattern: String,
    #[serde(default)]
    pub url_pattern_pages: Option<String>,
    pub scraper: String,
    #[serde(default)]
    pub max_pages: Option<u32>,
    #[serde(default)]
    pub url_encoding_rules: Option<IndexMap<String, String>>,
    #[serde(default)]
    pub tip: Option<String>,
    #[serde(default)]
    pub examples: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawScraper {
    List(RawListScraper),
    Detail(IndexMap<String, RawFieldSpec>),
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawListScraper {
    pub video_container: RawContainer,
    pub video_item: RawItem,
    #[serde(default)]
    pub pagination: Option<RawPagination>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawContainer {
    pub selector: OneOrMany<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawItem {
    pub selector: String,
    #[serde(default)]
    pub fields: IndexMap<String, RawFieldSpec>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawPagination {
    #[serde(default)]
    pub max_pages: Option<u32>,
    #[serde(default)]
    pub subsequent_pages: Option<String>,
    #[serde(default)]
    pub next_page: Option<RawNextPage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawNextPage {
    pub selector: String,
    #[serde(default = "default_href")]
    pub attribute: String,
}

fn default_href() -> String {
    "href".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawStream {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub iframe: Option<String>,
    #[serde(default)]
    pub manifest_pattern: Option<String>,
    #[serde(default)]
    pub resolution_markers: Option<Vec<String>>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawFieldSpec {
    Selector(String),
    Detailed(RawFieldDetail),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawFieldDetail {
    #[serde(default)]
    pub selector: Option<OneOrMany<String>>,
    #[serde(default)]
    pub attribute: Option<String>,
    #[serde(default)]
    pub iframe: Option<String>,
    #[serde(default)]
    pub json_key: Option<String>,
    #[serde(default, rename = "postProcess", alias = "post_process")]
    pub post_process: Vec<RawStep>,
    #[serde(default)]
    pub multiple: Option<bool>,
}

/// One post-processing step. Exactly one key must be set.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawStep {
    #[serde(default)]
    pub replace: Option<OneOrMany<RawReplace>>,
    #[serde(default, rename = "parseDate", alias = "parse_date")]
    pub parse_date: Option<String>,
    #[serde(default, rename = "maxByAttribute", alias = "max_by_attribute")]
    pub max_by_attribute: Option<RawMaxBy>,
    #[serde(default)]
    pub first: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawReplace {
    pub regex: String,
    #[serde(default)]
    pub with: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawMaxBy {
    pub attribute: String,
    #[serde(default, rename = "type")]
    pub kind: AttributeType,
}

// ---------------------------------------------------------------------------
// Validated form
// ---------------------------------------------------------------------------

/// Ordered literal substitutions applied to URL arguments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncodingRules(Vec<(String, String)>);

impl EncodingRules {
    pub fn new(rules: impl IntoIterator<Item = (String, String)>) -> Self {
        Self(rules.into_iter().collect())
    }

    pub fn apply(&self, value: &str) -> String {
        self.0
            .iter()
            .fold(value.to_string(), |acc, (from, to)| acc.replace(from.as_str(), to))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeKind {
    Detail,
    List,
}

#[derive(Debug, Clone)]
pub struct Mode {
    pub name: String,
    pub kind: ModeKind,
    pub url_pattern: String,
    pub paged_pattern: Option<String>,
    pub scraper: String,
    pub max_pages: Option<u32>,
    pub encoding_rules: Option<EncodingRules>,
    pub tip: Option<String>,
    pub examples: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DetailScraper {
    pub fields: Vec<FieldSpec>,
}

impl DetailScraper {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Scraper-level pagination rule, resolved at load.
#[derive(Debug, Clone)]
pub enum PaginationRule {
    /// Relative URL template with `{url_pattern}`, `{page}`, `{search}` and
    /// mode-name placeholders.
    SubsequentPages(String),
    /// Link on the current page pointing to the next one.
    NextLink {
        selector: CompiledSelector,
        attribute: String,
    },
}

#[derive(Debug, Clone, Default)]
pub struct ScraperPagination {
    pub max_pages: Option<u32>,
    pub rule: Option<PaginationRule>,
}

#[derive(Debug, Clone)]
pub struct ListScraper {
    /// Container candidates, first match wins.
    pub container: Vec<CompiledSelector>,
    pub item: CompiledSelector,
    pub item_fields: Vec<FieldSpec>,
    pub pagination: ScraperPagination,
}

#[derive(Debug, Clone)]
pub enum Scraper {
    Detail(DetailScraper),
    List(ListScraper),
}

/// Stream resolution settings for sites whose player hides the media URL.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub iframe: Option<String>,
    pub manifest_pattern: Regex,
    pub resolution_markers: Vec<String>,
}

/// Immutable, validated site configuration.
#[derive(Debug, Clone)]
pub struct SiteAdapter {
    pub name: String,
    pub shortcode: Option<String>,
    /// Normalized host: lower-case, no leading `www.`.
    pub domain: String,
    pub base_url: Url,
    pub use_browser: bool,
    pub name_prefix: String,
    pub name_suffix: String,
    pub encoding_rules: EncodingRules,
    pub download_method: DownloadMethod,
    pub modes: IndexMap<String, Mode>,
    pub scrapers: IndexMap<String, Scraper>,
    pub stream: Option<StreamConfig>,
}

/// Lower-case a host and strip a leading `www.` label.
pub fn normalize_host(host: &str) -> String {
    let host = host.trim().to_lowercase();
    match host.strip_prefix("www.") {
        Some(rest) => rest.to_string(),
        None => host,
    }
}

impl SiteAdapter {
    /// Parse and validate a YAML site document.
    pub fn from_yaml(source: &str) -> Result<Self, ScrapeError> {
        let raw: RawSite = serde_yaml::from_str(source)
            .map_err(|e| ScrapeError::ConfigMismatch(format!("invalid site document: {}", e)))?;
        Self::validate(raw)
    }

    pub fn validate(raw: RawSite) -> Result<Self, ScrapeError> {
        let base_url = Url::parse(&raw.base_url).map_err(|e| {
            ScrapeError::ConfigMismatch(format!("{}: invalid base_url '{}': {}", raw.name, raw.base_url, e))
        })?;
        let domain = match raw.domain.as_deref() {
            Some(d) => normalize_host(d),
            None => normalize_host(base_url.host_str().unwrap_or_default()),
        };

        let mut scrapers = IndexMap::new();
        for (name, scraper) in raw.scrapers {
            let validated = validate_scraper(&raw.name, &name, scraper)?;
            scrapers.insert(name, validated);
        }

        let mut modes = IndexMap::new();
        for (name, mode) in raw.modes {
            let kind = match scrapers.get(&mode.scraper) {
                Some(Scraper::Detail(_)) => ModeKind::Detail,
                Some(Scraper::List(_)) => ModeKind::List,
                None => {
                    return Err(ScrapeError::ConfigMismatch(format!(
                        "{}: mode '{}' references unknown scraper '{}'",
                        raw.name, name, mode.scraper
                    )))
                }
            };
            if let (Some(Scraper::List(list)), Some(_)) =
                (scrapers.get(&mode.scraper), mode.url_pattern_pages.as_ref())
            {
                if list.pagination.rule.is_some() {
                    warn!(
                        "{}: mode '{}' has url_pattern_pages and scraper pagination; the template takes priority",
                        raw.name, name
                    );
                }
            }
            modes.insert(
                name.clone(),
                Mode {
                    name,
                    kind,
                    url_pattern: mode.url_pattern,
                    paged_pattern: mode.url_pattern_pages,
                    scraper: mode.scraper,
                    max_pages: mode.max_pages,
                    encoding_rules: mode.url_encoding_rules.map(EncodingRules::new),
                    tip: mode.tip,
                    examples: mode.examples,
                },
            );
        }

        let stream = match raw.stream {
            Some(stream) if stream.enabled => Some(validate_stream(&raw.name, stream, &scrapers)?),
            _ => None,
        };

        Ok(Self {
            name: raw.name,
            shortcode: raw.shortcode,
            domain,
            base_url,
            use_browser: raw.use_browser,
            name_prefix: raw.name_prefix.unwrap_or_default(),
            name_suffix: raw.name_suffix.unwrap_or_default(),
            encoding_rules: EncodingRules::new(raw.url_encoding_rules),
            download_method: raw.download.method,
            modes,
            scrapers,
            stream,
        })
    }

    pub fn mode(&self, name: &str) -> Option<&Mode> {
        self.modes.get(name)
    }

    /// The first mode backed by a detail scraper.
    pub fn detail_mode(&self) -> Option<&Mode> {
        self.modes.values().find(|m| m.kind == ModeKind::Detail)
    }

    pub fn detail_scraper(&self, mode: &Mode) -> Result<&DetailScraper, ScrapeError> {
        match self.scrapers.get(&mode.scraper) {
            Some(Scraper::Detail(d)) => Ok(d),
            _ => Err(ScrapeError::ConfigMismatch(format!(
                "{}: mode '{}' is not a detail mode",
                self.name, mode.name
            ))),
        }
    }

    pub fn list_scraper(&self, mode: &Mode) -> Result<&ListScraper, ScrapeError> {
        match self.scrapers.get(&mode.scraper) {
            Some(Scraper::List(l)) => Ok(l),
            _ => Err(ScrapeError::ConfigMismatch(format!(
                "{}: mode '{}' is not a list mode",
                self.name, mode.name
            ))),
        }
    }

    /// Encoding rules for `mode`: the mode's own when set, else the site's.
    pub fn encoding_rules_for(&self, mode: Option<&str>) -> &EncodingRules {
        mode.and_then(|m| self.modes.get(m))
            .and_then(|m| m.encoding_rules.as_ref())
            .unwrap_or(&self.encoding_rules)
    }

    /// Whether the detail scraper extracts anything beyond a title and a
    /// download URL (worth writing a sidecar for).
    pub fn has_metadata_selectors(&self) -> bool {
        self.detail_mode()
            .and_then(|m| self.detail_scraper(m).ok())
            .map(|d| {
                d.fields
                    .iter()
                    .any(|f| f.name != "title" && f.name != "download_url")
            })
            .unwrap_or(false)
    }

    /// Whether `key` names this site by shortcode, name or domain.
    pub fn matches_key(&self, key: &str) -> bool {
        let key = key.trim();
        self.shortcode
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case(key))
            || self.name.eq_ignore_ascii_case(key)
            || self.domain == normalize_host(key)
    }
}

fn validate_scraper(site: &str, name: &str, raw: RawScraper) -> Result<Scraper, ScrapeError> {
    match raw {
        RawScraper::Detail(fields) => Ok(Scraper::Detail(DetailScraper {
            fields: validate_fields(site, name, fields)?,
        })),
        RawScraper::List(list) => {
            let container = list
                .video_container
                .selector
                .into_vec()
                .iter()
                .map(|css| CompiledSelector::parse(css))
                .collect::<Result<Vec<_>, _>>()?;
            if container.is_empty() {
                return Err(ScrapeError::ConfigMismatch(format!(
                    "{}: scraper '{}' has no container selector",
                    site, name
                )));
            }
            let item = CompiledSelector::parse(&list.video_item.selector)?;
            let item_fields = validate_fields(site, name, list.video_item.fields)?;
            let pagination = match list.pagination {
                Some(p) => validate_pagination(site, name, p)?,
                None => ScraperPagination::default(),
            };
            Ok(Scraper::List(ListScraper {
                container,
                item,
                item_fields,
                pagination,
            }))
        }
    }
}

fn validate_pagination(
    site: &str,
    scraper: &str,
    raw: RawPagination,
) -> Result<ScraperPagination, ScrapeError> {
    let rule = match (raw.subsequent_pages, raw.next_page) {
        (Some(template), next) => {
            if next.is_some() {
                warn!(
                    "{}: scraper '{}' sets subsequent_pages and next_page; using subsequent_pages",
                    site, scraper
                );
            }
            Some(PaginationRule::SubsequentPages(template))
        }
        (None, Some(next)) => Some(PaginationRule::NextLink {
            selector: CompiledSelector::parse(&next.selector)?,
            attribute: next.attribute,
        }),
        (None, None) => None,
    };
    Ok(ScraperPagination {
        max_pages: raw.max_pages,
        rule,
    })
}

fn validate_stream(
    site: &str,
    raw: RawStream,
    scrapers: &IndexMap<String, Scraper>,
) -> Result<StreamConfig, ScrapeError> {
    let pattern = raw
        .manifest_pattern
        .unwrap_or_else(|| DEFAULT_MANIFEST_PATTERN.to_string());
    let manifest_pattern = Regex::new(&pattern).map_err(|e| {
        ScrapeError::ConfigMismatch(format!("{}: invalid manifest_pattern '{}': {}", site, pattern, e))
    })?;

    // Without an explicit frame, use the first frame a detail field pierces.
    let iframe = raw.iframe.or_else(|| {
        scrapers.values().find_map(|s| match s {
            Scraper::Detail(d) => d.fields.iter().find_map(|f| f.frame.clone()),
            Scraper::List(_) => None,
        })
    });

    Ok(StreamConfig {
        iframe,
        manifest_pattern,
        resolution_markers: raw.resolution_markers.unwrap_or_else(|| {
            DEFAULT_RESOLUTION_MARKERS
                .iter()
                .map(|s| s.to_string())
                .collect()
        }),
    })
}

fn validate_fields(
    site: &str,
    scraper: &str,
    raw: IndexMap<String, RawFieldSpec>,
) -> Result<Vec<FieldSpec>, ScrapeError> {
    raw.into_iter()
        .map(|(name, spec)| validate_field(site, scraper, &name, spec))
        .collect()
}

/// Validate one raw field spec.
pub fn validate_field(
    site: &str,
    scraper: &str,
    name: &str,
    raw: RawFieldSpec,
) -> Result<FieldSpec, ScrapeError> {
    let detail = match raw {
        RawFieldSpec::Selector(css) => RawFieldDetail {
            selector: Some(OneOrMany::One(css)),
            ..RawFieldDetail::default()
        },
        RawFieldSpec::Detailed(detail) => detail,
    };

    let source = match detail.selector {
        Some(selectors) => FieldSource::Selectors(
            selectors
                .into_vec()
                .iter()
                .map(|css| CompiledSelector::parse(css))
                .collect::<Result<Vec<_>, _>>()?,
        ),
        None if detail.attribute.is_some() => FieldSource::SelfNode,
        None => {
            return Err(ScrapeError::ConfigMismatch(format!(
                "{}: field '{}' in scraper '{}' has neither selector nor attribute",
                site, name, scraper
            )))
        }
    };

    let steps = detail
        .post_process
        .into_iter()
        .filter_map(|step| validate_step(site, name, step).transpose())
        .collect::<Result<Vec<_>, _>>()?;

    Ok(FieldSpec {
        name: name.to_string(),
        source,
        attribute: detail.attribute,
        frame: detail.iframe,
        json_key: detail.json_key,
        steps,
        cardinality: Cardinality::for_field(name, detail.multiple),
    })
}

fn validate_step(site: &str, field: &str, raw: RawStep) -> Result<Option<PostProcessStep>, ScrapeError> {
    let set = [
        raw.replace.is_some(),
        raw.parse_date.is_some(),
        raw.max_by_attribute.is_some(),
        raw.first.is_some(),
    ]
    .iter()
    .filter(|s| **s)
    .count();
    if set != 1 {
        return Err(ScrapeError::ConfigMismatch(format!(
            "{}: postProcess step for '{}' must set exactly one of replace, parseDate, maxByAttribute, first",
            site, field
        )));
    }

    if let Some(pairs) = raw.replace {
        let rules: Vec<ReplaceRule> = pairs
            .into_vec()
            .iter()
            .map(|pair| ReplaceRule::new(&pair.regex, &pair.with))
            .collect();
        for rule in rules.iter().filter(|r| !r.is_valid()) {
            warn!(
                "{}: malformed regex '{}' for '{}': {}",
                site,
                rule.pattern,
                field,
                rule.error().unwrap_or_default()
            );
        }
        return Ok(Some(PostProcessStep::Replace(rules)));
    }
    if let Some(format) = raw.parse_date {
        return Ok(Some(PostProcessStep::ParseDate { format }));
    }
    if let Some(max) = raw.max_by_attribute {
        return Ok(Some(PostProcessStep::MaxByAttribute {
            attribute: max.attribute,
            kind: max.kind,
        }));
    }
    Ok(match raw.first {
        Some(true) => Some(PostProcessStep::First),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SITE: &str = r##"
name: Example Tube
shortcode: ex
base_url: https://www.example.com/
url_encoding_rules:
  " ": "-"
download:
  method: yt-dlp
name_suffix: " [EX]"
modes:
  video:
    url_pattern: /videos/{video}
    scraper: video_scraper
  tag:
    url_pattern: /tags/{tag}
    url_pattern_pages: /tags/{tag}/page/{page}
    scraper: list_scraper
    max_pages: 3
  search:
    url_pattern: /search/{search}
    scraper: list_scraper
    url_encoding_rules:
      " ": "+"
scrapers:
  video_scraper:
    title: h1.title
    date:
      selector: script[type="application/ld+json"]
      postProcess:
        - replace:
            - regex: '.*"uploadDate":\s*"([^"]+)".*'
              with: '\1'
        - parseDate: "%Y-%m-%dT%H:%M:%S%z"
    tags:
      selector: [".tags a", ".categories a"]
    download_url:
      selector: video source
      attribute: src
      postProcess:
        - maxByAttribute:
            attribute: data-res
            type: int
  list_scraper:
    video_container:
      selector: [".results", "#videos"]
    video_item:
      selector: .item
      fields:
        url:
          selector: a
          attribute: href
        title: a
    pagination:
      next_page:
        selector: a.next
"##;

    #[test]
    fn test_site_validation() {
        let site = SiteAdapter::from_yaml(SITE).unwrap();
        assert_eq!(site.domain, "example.com");
        assert_eq!(site.download_method, DownloadMethod::YtDlp);
        assert_eq!(site.name_suffix, " [EX]");
        assert_eq!(
            site.modes.keys().collect::<Vec<_>>(),
            vec!["video", "tag", "search"]
        );
        assert_eq!(site.mode("video").unwrap().kind, ModeKind::Detail);
        assert_eq!(site.mode("tag").unwrap().kind, ModeKind::List);
        assert_eq!(site.detail_mode().unwrap().name, "video");
        assert!(site.has_metadata_selectors());

        let detail = site.detail_scraper(site.mode("video").unwrap()).unwrap();
        assert_eq!(detail.field("date").unwrap().steps.len(), 2);
        assert!(detail.field("tags").unwrap().is_multiple());
        assert!(!detail.field("title").unwrap().is_multiple());

        let list = site.list_scraper(site.mode("tag").unwrap()).unwrap();
        assert_eq!(list.container.len(), 2);
        match &list.pagination.rule {
            Some(PaginationRule::NextLink { attribute, .. }) => assert_eq!(attribute, "href"),
            other => panic!("unexpected rule {:?}", other),
        }
    }

    #[test]
    fn test_encoding_rules_precedence() {
        let site = SiteAdapter::from_yaml(SITE).unwrap();
        assert_eq!(site.encoding_rules_for(Some("search")).apply("a b"), "a+b");
        assert_eq!(site.encoding_rules_for(Some("tag")).apply("a b"), "a-b");
        assert_eq!(site.encoding_rules_for(None).apply("a b"), "a-b");
    }

    #[test]
    fn test_site_key_matching() {
        let site = SiteAdapter::from_yaml(SITE).unwrap();
        assert!(site.matches_key("EX"));
        assert!(site.matches_key("example tube"));
        assert!(site.matches_key("www.example.com"));
        assert!(!site.matches_key("other"));
    }

    #[test]
    fn test_unknown_scraper_is_config_mismatch() {
        let doc = r#"
name: Broken
base_url: https://broken.example/
modes:
  video:
    url_pattern: /v/{video}
    scraper: missing
scrapers:
  other:
    title: h1
"#;
        let err = SiteAdapter::from_yaml(doc).unwrap_err();
        assert!(matches!(err, ScrapeError::ConfigMismatch(_)));
    }

    #[test]
    fn test_step_with_two_keys_is_rejected() {
        let raw = RawFieldSpec::Detailed(RawFieldDetail {
            selector: Some(OneOrMany::One("h1".into())),
            post_process: vec![RawStep {
                first: Some(true),
                parse_date: Some("%Y".into()),
                ..RawStep::default()
            }],
            ..RawFieldDetail::default()
        });
        assert!(validate_field("s", "sc", "title", raw).is_err());
    }

    #[test]
    fn test_malformed_regex_is_kept_for_runtime() {
        let raw = RawFieldSpec::Detailed(RawFieldDetail {
            selector: Some(OneOrMany::One("h1".into())),
            post_process: vec![RawStep {
                replace: Some(OneOrMany::One(RawReplace {
                    regex: "(".into(),
                    with: String::new(),
                })),
                ..RawStep::default()
            }],
            ..RawFieldDetail::default()
        });
        let spec = validate_field("s", "sc", "title", raw).unwrap();
        assert_eq!(spec.steps.len(), 1);
    }

    #[test]
    fn test_stream_defaults_to_field_frame() {
        let doc = r#"
name: Framed
base_url: https://framed.example/
stream: {}
modes:
  video:
    url_pattern: /watch/{video}
    scraper: video_scraper
scrapers:
  video_scraper:
    title: h1
    download_url:
      iframe: iframe.player
      selector: video source
      attribute: src
"#;
        let site = SiteAdapter::from_yaml(doc).unwrap();
        let stream = site.stream.unwrap();
        assert_eq!(stream.iframe.as_deref(), Some("iframe.player"));
        assert!(stream.manifest_pattern.is_match("https://cdn/x/index.m3u8?t=1"));
        assert_eq!(stream.resolution_markers[0], "2160p");
    }
}
