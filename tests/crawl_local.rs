//! Full crawl against a local HTTP server: list pages, detail pages,
//! direct downloads, sidecars and local placement.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use sitegrab::config::{Settings, SiteAdapter};
use sitegrab::crawler::{CrawlOptions, Crawler};
use sitegrab::error::{ErrorKind, ScrapeError};
use sitegrab::storage::Storage;

/// A canned response. `declared_len` overrides the Content-Length header,
/// so a reply can promise more bytes than it sends.
#[derive(Clone)]
struct Reply {
    content_type: &'static str,
    body: Vec<u8>,
    declared_len: Option<usize>,
}

impl Reply {
    fn new(content_type: &'static str, body: impl Into<Vec<u8>>) -> Self {
        Self {
            content_type,
            body: body.into(),
            declared_len: None,
        }
    }
}

type Routes = Arc<HashMap<String, Reply>>;

async fn handle(mut stream: tokio::net::TcpStream, routes: Routes) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
    let request = String::from_utf8_lossy(&buf);
    let path = request.split_whitespace().nth(1).unwrap_or("/").to_string();

    let response = match routes.get(&path) {
        Some(reply) => {
            let mut head = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                reply.content_type,
                reply.declared_len.unwrap_or(reply.body.len())
            )
            .into_bytes();
            head.extend_from_slice(&reply.body);
            head
        }
        None => b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_vec(),
    };
    let _ = stream.write_all(&response).await;
    let _ = stream.shutdown().await;
}

async fn serve(routes: HashMap<String, Reply>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let routes: Routes = Arc::new(routes);
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(handle(stream, Arc::clone(&routes)));
        }
    });
    addr
}

fn html(body: &str) -> Reply {
    Reply::new("text/html", format!("<!DOCTYPE html><html><body>{}</body></html>", body))
}

fn detail(title: &str, media: &str) -> Reply {
    html(&format!(
        r#"<h1>{}</h1><video><source src="{}"></video><div class="tags"><a>Drama</a></div>"#,
        title, media
    ))
}

fn site_yaml(addr: SocketAddr) -> String {
    format!(
        r#"
name: Local
shortcode: loc
base_url: http://{addr}/
download:
  method: direct
modes:
  video:
    url_pattern: /watch/{{video}}
    scraper: video_scraper
  tag:
    url_pattern: /tag/{{tag}}
    scraper: list_scraper
scrapers:
  video_scraper:
    title: h1
    download_url:
      selector: video source
      attribute: src
    tags: .tags a
  list_scraper:
    video_container:
      selector: ul.items
    video_item:
      selector: li
      fields:
        url:
          selector: a
          attribute: href
    pagination:
      next_page:
        selector: a.next
"#
    )
}

async fn fixture_site() -> SiteAdapter {
    let mut routes = HashMap::new();
    routes.insert(
        "/tag/cats".to_string(),
        html(r#"<ul class="items"><li><a href="/watch/1">1</a></li><li><a href="/watch/2">2</a></li></ul><a class="next" href="/tag/cats/2">next</a>"#),
    );
    routes.insert(
        "/tag/cats/2".to_string(),
        html(r#"<ul class="items"><li><a href="/watch/3">3</a></li></ul>"#),
    );
    routes.insert("/watch/1".to_string(), detail("clip one", "/media/1.mp4"));
    routes.insert("/watch/2".to_string(), detail("Spoiler Reel", "/media/2.mp4"));
    routes.insert("/watch/3".to_string(), detail("clip three", "/media/missing.mp4"));
    routes.insert("/watch/4".to_string(), detail("clip cut", "/media/cut.mp4"));
    routes.insert("/media/1.mp4".to_string(), Reply::new("video/mp4", &b"FAKE-MP4-DATA"[..]));
    routes.insert("/media/2.mp4".to_string(), Reply::new("video/mp4", &b"FAKE-MP4-DATA"[..]));
    routes.insert(
        "/media/cut.mp4".to_string(),
        Reply {
            declared_len: Some(100_000),
            ..Reply::new("video/mp4", &b"PARTIAL-BYTES"[..])
        },
    );

    let addr = serve(routes).await;
    SiteAdapter::from_yaml(&site_yaml(addr)).unwrap()
}

fn settings() -> Settings {
    let mut settings = Settings::default();
    settings.sleep.between_items = 0.0;
    settings.sleep.between_pages = 0.0;
    settings.make_nfo = true;
    settings.ignored = vec!["spoiler".to_string()];
    settings
}

fn options() -> CrawlOptions {
    CrawlOptions {
        verify_downloads: false,
        show_progress: false,
        ..CrawlOptions::default()
    }
}

#[tokio::test]
async fn crawls_list_pages_and_downloads_items() {
    let site = fixture_site().await;
    let dest = tempfile::tempdir().unwrap();
    let mut crawler = Crawler::with_storage(
        settings(),
        options(),
        CancellationToken::new(),
        Storage::local(dest.path()),
    )
    .unwrap();

    let start = format!("{}tag/cats", site.base_url);
    crawler.process_url(&site, &start).await.unwrap();
    let summary = crawler.finish().await;

    assert_eq!(summary.pages, 2);
    assert_eq!(summary.attempted, 3);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.failed(), 1);
    assert!(summary.failures[0].url.ends_with("/watch/3"));
    assert_eq!(summary.failures[0].kind, ErrorKind::DownloadFailed);

    let media = dest.path().join("Clip One.mp4");
    assert_eq!(std::fs::read(&media).unwrap(), b"FAKE-MP4-DATA");
    let nfo = std::fs::read_to_string(dest.path().join("Clip One.nfo")).unwrap();
    assert!(nfo.contains("<title>Clip One</title>"));
    assert!(nfo.contains("<tag>Drama</tag>"));
    assert!(!dest.path().join("Spoiler Reel.mp4").exists());
}

#[tokio::test]
async fn ignore_filters_flag_processes_everything() {
    let site = fixture_site().await;
    let dest = tempfile::tempdir().unwrap();
    let mut crawler = Crawler::with_storage(
        settings(),
        CrawlOptions {
            ignore_filters: true,
            ..options()
        },
        CancellationToken::new(),
        Storage::local(dest.path()),
    )
    .unwrap();

    crawler
        .process_mode(&site, "video", "2")
        .await
        .unwrap();
    let summary = crawler.finish().await;
    assert_eq!(summary.succeeded, 1);
    assert!(dest.path().join("Spoiler Reel.mp4").exists());
}

#[tokio::test]
async fn cut_short_transfer_keeps_partial_file() {
    let site = fixture_site().await;
    let dest = tempfile::tempdir().unwrap();
    let mut crawler = Crawler::with_storage(
        settings(),
        options(),
        CancellationToken::new(),
        Storage::local(dest.path()),
    )
    .unwrap();

    crawler.process_mode(&site, "video", "4").await.unwrap();
    let summary = crawler.finish().await;

    assert_eq!(summary.attempted, 1);
    assert_eq!(summary.failed(), 1);
    assert_eq!(summary.failures[0].kind, ErrorKind::DownloadFailed);
    assert!(dest.path().join("Clip Cut.mp4").exists());
    assert!(!dest.path().join("Clip Cut.nfo").exists());
}

#[tokio::test]
async fn unrouted_url_counts_once_after_failed_mode_trials() {
    let site = fixture_site().await;
    let dest = tempfile::tempdir().unwrap();
    let mut crawler = Crawler::with_storage(
        settings(),
        options(),
        CancellationToken::new(),
        Storage::local(dest.path()),
    )
    .unwrap();

    // Neither mode matches; the video and tag trials both miss, then the
    // generic download fails too.
    let start = format!("{}clips/9", site.base_url);
    crawler.process_url(&site, &start).await.unwrap();
    let summary = crawler.finish().await;

    assert_eq!(summary.attempted, 1);
    assert_eq!(summary.failed(), 1);
    assert_eq!(summary.failures[0].url, start);
    assert_eq!(summary.pages, 0);
}

#[tokio::test]
async fn interrupt_stops_before_any_item() {
    let site = fixture_site().await;
    let dest = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();
    let mut crawler =
        Crawler::with_storage(settings(), options(), cancel.clone(), Storage::local(dest.path())).unwrap();

    cancel.cancel();
    let start = format!("{}tag/cats", site.base_url);
    let err = crawler.process_url(&site, &start).await.unwrap_err();
    assert!(matches!(err, ScrapeError::Interrupted));
    let summary = crawler.finish().await;
    assert_eq!(summary.attempted, 0);
    assert_eq!(summary.pages, 0);
}
