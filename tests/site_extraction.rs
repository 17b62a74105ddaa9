//! End-to-end extraction against a full site adapter and saved pages.

use scraper::Html;

use sitegrab::config::{FileNaming, SiteAdapter};
use sitegrab::crawler::parse_list_page;
use sitegrab::download::DownloadMethod;
use sitegrab::extract::{extract_document, FrameDocuments};
use sitegrab::metadata::{construct_filename, finalize, render_nfo, CaseOverrides};
use sitegrab::pagination::{advance, PageCursor, PageState};
use sitegrab::router::{mode_url, route};

const SITE: &str = include_str!("fixtures/clips.yaml");
const DETAIL: &str = include_str!("fixtures/detail.html");
const TAG_PAGE: &str = include_str!("fixtures/tag_page.html");
const SEARCH_PAGE: &str = include_str!("fixtures/search_page.html");

fn site() -> SiteAdapter {
    SiteAdapter::from_yaml(SITE).expect("fixture site should validate")
}

#[test]
fn site_loads_with_modes_in_order() {
    let site = site();
    assert_eq!(site.domain, "clips.example");
    assert_eq!(site.download_method, DownloadMethod::Direct);
    let modes: Vec<&str> = site.modes.keys().map(String::as_str).collect();
    assert_eq!(modes, vec!["video", "tag", "search"]);
    assert!(site.has_metadata_selectors());
}

#[test]
fn routes_detail_and_list_urls() {
    let site = site();
    let matched = route("https://clips.example/watch/31/", &site).unwrap();
    assert_eq!(matched.mode.name, "video");
    assert_eq!(matched.identifier.as_deref(), Some("31"));

    let matched = route("https://www.CLIPS.example/tag/big-cats/page/3", &site).unwrap();
    assert_eq!(matched.mode.name, "tag");
    assert_eq!(matched.identifier.as_deref(), Some("big-cats"));

    assert!(route("https://clips.example/about", &site).is_none());
    assert!(route("https://other.example/watch/31", &site).is_none());
}

#[test]
fn detail_page_extracts_and_finalizes() {
    let site = site();
    let mode = site.detail_mode().unwrap();
    let scraper = site.detail_scraper(mode).unwrap();
    let record = extract_document(DETAIL, &scraper.fields, &FrameDocuments::new());

    assert_eq!(record.text("download_url"), "https://media.clips.example/31/1080.mp4");
    assert_eq!(record.text("date"), "2017-05-06");
    assert_eq!(record.text("code"), "CLX-031");
    assert_eq!(record.list("actors"), vec!["Jane Doe", "#Max Power"]);
    assert_eq!(record.text("description"), "Two strangers meet.");

    let meta = finalize(&record, &CaseOverrides::default());
    assert_eq!(meta.title, "A Night In The City");
    assert_eq!(meta.actors, vec!["Jane Doe", "Max Power"]);
    assert_eq!(meta.studios, vec!["Jane Doe Productions"]);
    assert_eq!(meta.tags, vec!["Drama", "Night"]);
    assert_eq!(meta.image, "https://img.clips.example/poster/31.jpg");

    let filename = construct_filename(&meta.title, "[CLX] ", "", &FileNaming::default());
    assert_eq!(filename, "[CLX] A Night In The City.mp4");

    let nfo = render_nfo(&meta).unwrap();
    assert!(nfo.contains("<premiered>2017-05-06</premiered>"));
    assert!(nfo.contains("<uniqueid>CLX-031</uniqueid>"));
}

#[test]
fn tag_page_items_and_template_pagination() {
    let site = site();
    let mode = site.mode("tag").unwrap();
    let scraper = site.list_scraper(mode).unwrap();
    let document = Html::parse_document(TAG_PAGE);

    let items = parse_list_page(&site, scraper, &document).unwrap();
    let urls: Vec<&str> = items.iter().map(|i| i.url.as_str()).collect();
    assert_eq!(
        urls,
        vec![
            "https://www.clips.example/watch/31",
            "http://cdn.clips.example/watch/32",
            "https://www.clips.example/watch/33",
        ]
    );
    assert_eq!(items[2].title, "Evening Walk");

    let start = mode_url(&site, mode, "big cats", 1).unwrap();
    assert_eq!(start.as_str(), "https://www.clips.example/tag/big-cats");
    let mut cursor = PageCursor::new(start.as_str(), "tag", "big cats", 1);
    let mut visited = vec![cursor.url.clone()];
    while let PageState::HasNextPage(next) = advance(&site, mode, scraper, &cursor, &document) {
        assert_eq!(next.current_page, cursor.current_page + 1);
        visited.push(next.url.clone());
        cursor = next;
    }
    assert_eq!(visited.len(), 5);
    assert_eq!(visited[1], "https://www.clips.example/tag/big-cats/page/2");
}

#[test]
fn search_page_uses_video_keys_and_next_link() {
    let site = site();
    let mode = site.mode("search").unwrap();
    let scraper = site.list_scraper(mode).unwrap();
    let document = Html::parse_document(SEARCH_PAGE);

    let items = parse_list_page(&site, scraper, &document).unwrap();
    assert_eq!(items[0].url, "https://www.clips.example/watch/41");
    assert_eq!(items[1].url, "https://www.clips.example/watch/42");

    let start = mode_url(&site, mode, "big cats", 1).unwrap();
    assert_eq!(start.as_str(), "https://www.clips.example/search/big+cats");
    let cursor = PageCursor::new(start.as_str(), "search", "big cats", 1);
    let PageState::HasNextPage(next) = advance(&site, mode, scraper, &cursor, &document) else {
        panic!("expected a second page");
    };
    assert_eq!(next.url, "https://www.clips.example/search/big+cats?page=2");
    assert_eq!(advance(&site, mode, scraper, &next, &document), PageState::Exhausted);
}

#[test]
fn sample_configs_validate() {
    let site = SiteAdapter::from_yaml(include_str!("../config/sites/example.yaml")).unwrap();
    assert_eq!(site.shortcode.as_deref(), Some("ex"));
    assert_eq!(site.download_method, DownloadMethod::YtDlp);
    let tag = site.mode("tag").unwrap();
    assert_eq!(
        mode_url(&site, tag, "big cats", 2).unwrap().as_str(),
        "https://www.example.com/tag/big-cats/page/2"
    );

    let settings: sitegrab::config::Settings =
        serde_yaml::from_str(include_str!("../config/sitegrab.example.yaml")).unwrap();
    assert!(settings.make_nfo);
    assert_eq!(settings.ignored, vec!["trailer", "teaser"]);
}
