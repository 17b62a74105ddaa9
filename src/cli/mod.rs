//! Command-line interface.

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use console::style;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::{
    discover_sites_dir, load_settings, LoadOptions, ModeKind, SiteAdapter, SiteRegistry,
};
use crate::crawler::{CrawlOptions, CrawlSummary, Crawler};
use crate::error::ScrapeError;

#[derive(Parser, Debug)]
#[command(name = "sitegrab")]
#[command(about = "Crawl media sites described by declarative site adapters")]
#[command(version)]
#[command(after_help = "Examples:\n  sitegrab https://example.com/watch/123\n  sitegrab ex tag \"big cats\"\n  sitegrab ex")]
pub struct Cli {
    /// URL to crawl, or a site shortcode, name or domain
    target: Option<String>,

    /// Mode of the site to crawl
    mode: Option<String>,

    /// Query for the mode (words are joined with spaces)
    query: Vec<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Replace files that already exist at the destination
    #[arg(short, long)]
    overwrite: bool,

    /// Regenerate sidecar files even when present
    #[arg(short = 'n', long)]
    re_nfo: bool,

    /// Page of list modes to start at
    #[arg(short, long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    page: u32,

    /// Settings file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory of site adapter files
    #[arg(long)]
    sites_dir: Option<PathBuf>,

    /// Process items even when they match ignored terms
    #[arg(long)]
    ignore_filters: bool,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

fn is_url(target: &str) -> bool {
    target.starts_with("http://") || target.starts_with("https://")
}

/// Parse arguments and run.
pub async fn run(cancel: CancellationToken) -> anyhow::Result<()> {
    let cli = Cli::parse();

    let options = LoadOptions {
        config_path: cli.config.clone(),
        sites_dir: cli.sites_dir.clone(),
    };
    let settings = load_settings(&options).await?;
    let registry = match discover_sites_dir(&options, &settings) {
        Some(dir) => SiteRegistry::load_dir(&dir).await?,
        None => {
            warn!("No site directory found; only generic downloads are available");
            SiteRegistry::default()
        }
    };

    let Some(target) = cli.target.as_deref() else {
        print_sites(&registry);
        return Ok(());
    };

    let crawl_options = CrawlOptions {
        overwrite: cli.overwrite,
        re_nfo: cli.re_nfo,
        start_page: cli.page,
        ignore_filters: cli.ignore_filters,
        ..CrawlOptions::default()
    };

    if is_url(target) {
        let mut crawler = Crawler::new(settings, crawl_options, cancel)?;
        let result = match registry.for_url(target) {
            Some(site) => crawler.process_url(site, target).await,
            None => crawler.process_unknown(target).await,
        };
        return report(crawler, result).await;
    }

    let site = registry
        .find(target)
        .with_context(|| format!("Unknown site '{}'", target))?;
    let Some(mode) = cli.mode.as_deref() else {
        print_site_details(site);
        return Ok(());
    };
    if site.mode(mode).is_none() {
        bail!(
            "Site '{}' has no mode '{}' (available: {})",
            site.name,
            mode,
            site.modes.keys().cloned().collect::<Vec<_>>().join(", ")
        );
    }

    let query = cli.query.join(" ");
    let mut crawler = Crawler::new(settings, crawl_options, cancel)?;
    let result = crawler.process_mode(site, mode, &query).await;
    report(crawler, result).await
}

async fn report(crawler: Crawler, result: Result<(), ScrapeError>) -> anyhow::Result<()> {
    let mut summary = crawler.finish().await;
    match result {
        Ok(()) => {}
        Err(ScrapeError::Interrupted) => summary.interrupted = true,
        Err(e) => {
            print_summary(&summary);
            return Err(e.into());
        }
    }
    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &CrawlSummary) {
    println!();
    if summary.interrupted {
        println!("{} Interrupted", style("!").yellow());
    }
    println!(
        "{} {} of {} items succeeded",
        style("✓").green(),
        summary.succeeded,
        summary.attempted
    );
    if summary.pages > 0 {
        println!("  {} {} list pages crawled", style("→").dim(), summary.pages);
    }
    if summary.skipped > 0 {
        println!("  {} {} skipped", style("→").dim(), summary.skipped);
    }
    if !summary.failures.is_empty() {
        println!("  {} {} failed", style("✗").red(), summary.failed());
        for failure in &summary.failures {
            println!(
                "    {} [{}] {}",
                style(&failure.url).dim(),
                failure.kind,
                failure.reason
            );
        }
    }
}

fn print_sites(registry: &SiteRegistry) {
    if registry.is_empty() {
        println!("{} No sites configured", style("!").yellow());
        println!("  {} Pass a URL to use the generic downloader", style("→").dim());
        return;
    }
    println!("{}", style("SITES").cyan().bold());
    for site in registry.sites() {
        let code = site.shortcode.as_deref().unwrap_or("-");
        let modes: Vec<&str> = site.modes.keys().map(String::as_str).collect();
        println!(
            "  {:<8} {:<24} {}",
            style(code).bold(),
            site.name,
            style(modes.join(", ")).dim()
        );
    }
}

/// Modes a user can start from: everything but the detail mode.
pub fn listable_modes(site: &SiteAdapter) -> Vec<&crate::config::Mode> {
    site.modes
        .values()
        .filter(|m| m.kind != ModeKind::Detail)
        .collect()
}

/// Fields the detail scraper extracts besides the title and download URL.
pub fn metadata_fields(site: &SiteAdapter) -> Vec<&str> {
    site.detail_mode()
        .and_then(|m| site.detail_scraper(m).ok())
        .map(|d| {
            d.fields
                .iter()
                .map(|f| f.name.as_str())
                .filter(|n| *n != "title" && *n != "download_url")
                .collect()
        })
        .unwrap_or_default()
}

fn print_site_details(site: &SiteAdapter) {
    println!("{}", style(&site.name).cyan().bold());
    println!("  {:<12} {}", "Domain:", site.domain);
    println!("  {:<12} {}", "Base URL:", site.base_url);
    if let Some(code) = &site.shortcode {
        println!("  {:<12} {}", "Shortcode:", code);
    }
    println!("  {:<12} {}", "Download:", site.download_method);
    if site.use_browser || site.stream.is_some() {
        println!("  {:<12} yes", "Browser:");
    }

    println!();
    println!("{}", style("MODES").cyan().bold());
    let modes = listable_modes(site);
    if modes.is_empty() {
        println!("  {} none", style("→").dim());
    }
    for mode in modes {
        println!("  {:<12} {}", style(&mode.name).bold(), mode.url_pattern);
        if let Some(tip) = &mode.tip {
            println!("  {:<12} {}", "", style(tip).dim());
        }
        for example in &mode.examples {
            println!("  {:<12} {} {} {}", "", style("e.g.").dim(), mode.name, example);
        }
    }

    let fields = metadata_fields(site);
    if !fields.is_empty() {
        println!();
        println!("{}", style("METADATA").cyan().bold());
        println!("  {}", fields.join(", "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SITE: &str = r#"
name: Details
base_url: https://details.example/
modes:
  video:
    url_pattern: /v/{video}
    scraper: video_scraper
  tag:
    url_pattern: /tag/{tag}
    scraper: list_scraper
scrapers:
  video_scraper:
    title: h1
    download_url:
      selector: video source
      attribute: src
    tags: .tags a
    date: time
  list_scraper:
    video_container:
      selector: .list
    video_item:
      selector: .item
"#;

    #[test]
    fn test_site_details_listing() {
        let site = SiteAdapter::from_yaml(SITE).unwrap();
        let modes: Vec<&str> = listable_modes(&site).iter().map(|m| m.name.as_str()).collect();
        assert_eq!(modes, vec!["tag"]);
        assert_eq!(metadata_fields(&site), vec!["tags", "date"]);
    }

    #[test]
    fn test_cli_shapes() {
        let cli = Cli::try_parse_from(["sitegrab", "ex", "tag", "big", "cats", "-p", "3", "-o"]).unwrap();
        assert_eq!(cli.target.as_deref(), Some("ex"));
        assert_eq!(cli.mode.as_deref(), Some("tag"));
        assert_eq!(cli.query, vec!["big", "cats"]);
        assert_eq!(cli.page, 3);
        assert!(cli.overwrite);

        let cli = Cli::try_parse_from(["sitegrab", "https://a.example/v/1", "-n"]).unwrap();
        assert!(is_url(cli.target.as_deref().unwrap()));
        assert!(cli.re_nfo);

        assert!(Cli::try_parse_from(["sitegrab", "ex", "tag", "-p", "0"]).is_err());
    }
}
