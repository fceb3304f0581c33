//! Paginated watchlist scraping.
//!
//! Pages are fetched strictly one after another. Pagination ends at
//! `max_pages`, at the first later page answering non-OK, or at the first
//! page that adds no film not already seen on an earlier page.

use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info};
use url::Url;

use crate::canonical::{LETTERBOXD_ORIGIN, normalize_username};
use crate::error::WatchlistError;
use crate::scrape::{FilmRecord, parse_watchlist_page};

pub const DEFAULT_MAX_PAGES: usize = 15;
pub const MAX_PAGES_HARD_LIMIT: usize = 50;
pub const USER_AGENT: &str = "ihavewatchit/0.1 (+https://letterboxd.com)";

static BASE_URL: LazyLock<Url> =
    LazyLock::new(|| Url::parse(LETTERBOXD_ORIGIN).expect("static url"));

/// Raw answer for one page request.
#[derive(Debug, Clone)]
pub struct PageResponse {
    pub status: u16,
    pub body: String,
}

impl PageResponse {
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Source of watchlist HTML. Transport failures are errors; HTTP error
/// statuses are not, the orchestrator decides what they mean.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_page(&self, url: &str) -> Result<PageResponse, WatchlistError>;
}

/// Fetches pages from letterboxd.com over HTTPS.
pub struct HttpPageFetcher {
    client: reqwest::Client,
}

impl HttpPageFetcher {
    pub fn new() -> Result<Self, WatchlistError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(8))
            .timeout(Duration::from_secs(25))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch_page(&self, url: &str) -> Result<PageResponse, WatchlistError> {
        let rsp = self.client.get(url).send().await?;
        let status = rsp.status().as_u16();
        let body = if rsp.status().is_success() {
            rsp.text().await?
        } else {
            String::new()
        };
        Ok(PageResponse { status, body })
    }
}

#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Requested page cap; clamped to `1..=MAX_PAGES_HARD_LIMIT`.
    pub max_pages: Option<i64>,
    /// Log per-page progress at info instead of debug.
    pub log: bool,
    pub progress: Option<mpsc::Sender<FetchEvent>>,
}

impl FetchOptions {
    pub fn with_max_pages(max_pages: i64) -> Self {
        Self {
            max_pages: Some(max_pages),
            ..Self::default()
        }
    }
}

/// Progress notifications emitted while a scrape runs.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum FetchEvent {
    Start {
        username: String,
        max_pages: usize,
    },
    Page {
        page: usize,
        url: String,
        parsed: usize,
        added: usize,
        total: usize,
    },
}

macro_rules! progress {
    ($loud:expr, $($arg:tt)+) => {
        if $loud { info!($($arg)+) } else { debug!($($arg)+) }
    };
}

pub fn clamp_max_pages(requested: Option<i64>) -> usize {
    match requested {
        None => DEFAULT_MAX_PAGES,
        Some(n) => n.clamp(1, MAX_PAGES_HARD_LIMIT as i64) as usize,
    }
}

/// `https://letterboxd.com/<user>/watchlist/`, or `.../watchlist/page/<n>/`
/// past the first page.
pub fn watchlist_page_url(username: &str, page: usize) -> String {
    let mut url = BASE_URL.clone();
    if let Ok(mut segs) = url.path_segments_mut() {
        segs.clear().push(username).push("watchlist");
        if page > 1 {
            segs.push("page").push(&page.to_string());
        }
        segs.push("");
    }
    url.into()
}

/// Scrapes a user's public watchlist into deduplicated film records, in
/// page order.
pub async fn fetch_watchlist(
    fetcher: &dyn PageFetcher,
    username: &str,
    opts: &FetchOptions,
) -> Result<Vec<FilmRecord>, WatchlistError> {
    let user = normalize_username(username);
    if user.is_empty() {
        return Err(WatchlistError::UsernameRequired);
    }
    let max_pages = clamp_max_pages(opts.max_pages);
    progress!(opts.log, "[fetch] username={} maxPages={}", user, max_pages);
    notify(
        opts,
        FetchEvent::Start {
            username: user.clone(),
            max_pages,
        },
    )
    .await;

    let mut films: Vec<FilmRecord> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for page in 1..=max_pages {
        let url = watchlist_page_url(&user, page);
        progress!(opts.log, "[fetch] page {} GET {}", page, url);

        let rsp = fetcher.fetch_page(&url).await?;
        if !rsp.is_ok() {
            progress!(opts.log, "[fetch] page {} HTTP {}", page, rsp.status);
            if page == 1 {
                return Err(WatchlistError::UpstreamStatus(rsp.status));
            }
            // a failing later page is read as the end of the list
            break;
        }

        let parsed = parse_watchlist_page(&rsp.body);
        let parsed_count = parsed.len();
        let mut added = 0usize;
        for film in parsed {
            let key = film.uri().to_string();
            if key.is_empty() || !seen.insert(key) {
                continue;
            }
            films.push(film);
            added += 1;
        }

        progress!(
            opts.log,
            "[fetch] page {} parsed {} films, {} new (total so far: {})",
            page,
            parsed_count,
            added,
            films.len()
        );
        notify(
            opts,
            FetchEvent::Page {
                page,
                url,
                parsed: parsed_count,
                added,
                total: films.len(),
            },
        )
        .await;

        if added == 0 {
            break;
        }
    }

    progress!(opts.log, "[fetch] done: {} films", films.len());
    Ok(films)
}

/// Same scrape, reduced to canonical URIs.
pub async fn fetch_watchlist_uris(
    fetcher: &dyn PageFetcher,
    username: &str,
    opts: &FetchOptions,
) -> Result<Vec<String>, WatchlistError> {
    fetch_watchlist(fetcher, username, opts).await.map(into_uris)
}

pub fn into_uris(films: Vec<FilmRecord>) -> Vec<String> {
    films
        .into_iter()
        .map(|f| {
            if f.film_uri.is_empty() {
                f.letterboxd_uri
            } else {
                f.film_uri
            }
        })
        .filter(|u| !u.is_empty())
        .collect()
}

async fn notify(opts: &FetchOptions, event: FetchEvent) {
    if let Some(tx) = &opts.progress {
        let _ = tx.send(event).await;
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    /// Serves canned pages by URL; anything else is a 404.
    #[derive(Default)]
    pub struct FakeFetcher {
        pages: HashMap<String, PageResponse>,
        pub requests: Mutex<Vec<String>>,
    }

    impl FakeFetcher {
        pub fn page(mut self, user: &str, page: usize, status: u16, body: String) -> Self {
            self.pages
                .insert(watchlist_page_url(user, page), PageResponse { status, body });
            self
        }

        pub fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl PageFetcher for FakeFetcher {
        async fn fetch_page(&self, url: &str) -> Result<PageResponse, WatchlistError> {
            self.requests.lock().unwrap().push(url.to_string());
            Ok(self.pages.get(url).cloned().unwrap_or(PageResponse {
                status: 404,
                body: String::new(),
            }))
        }
    }

    /// One-shot HTTP/1.1 server on localhost. Answers the first request with
    /// `status` and `body`, and hands back the raw request head.
    pub async fn serve_once(
        status: &str,
        body: &str,
    ) -> (String, tokio::task::JoinHandle<String>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let response = format!(
            "HTTP/1.1 {status}\r\ncontent-type: application/json\r\n\
             content-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        );
        let handle = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut head = Vec::new();
            let mut buf = [0u8; 1024];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = sock.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                head.extend_from_slice(&buf[..n]);
            }
            sock.write_all(response.as_bytes()).await.unwrap();
            let _ = sock.shutdown().await;
            String::from_utf8_lossy(&head).into_owned()
        });
        (base, handle)
    }

    /// Poster markup for `film-<from>` .. `film-<to - 1>`.
    pub fn poster_page(from: usize, to: usize) -> String {
        (from..to)
            .map(|i| {
                format!(
                    r#"<li><div data-film-slug="film-{i}" data-target-link="/film/film-{i}/"></div></li>"#
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{FakeFetcher, poster_page, serve_once};
    use super::*;

    #[tokio::test]
    async fn http_fetcher_sends_its_user_agent() {
        let (base, server) = serve_once("200 OK", "<ul></ul>").await;

        let rsp = HttpPageFetcher::new()
            .unwrap()
            .fetch_page(&format!("{base}/u/watchlist/"))
            .await
            .unwrap();

        assert_eq!(rsp.status, 200);
        assert_eq!(rsp.body, "<ul></ul>");
        let head = server.await.unwrap().to_lowercase();
        assert!(head.starts_with("get /u/watchlist/ http/1.1"));
        assert!(head.contains(&format!("user-agent: {}", USER_AGENT.to_lowercase())));
    }

    #[tokio::test]
    async fn http_fetcher_reports_error_statuses_as_responses() {
        let (base, server) = serve_once("404 Not Found", "gone").await;

        let rsp = HttpPageFetcher::new()
            .unwrap()
            .fetch_page(&format!("{base}/ghost/watchlist/"))
            .await
            .unwrap();

        assert_eq!(rsp.status, 404);
        assert!(!rsp.is_ok());
        assert_eq!(rsp.body, "");
        server.await.unwrap();
    }

    #[test]
    fn page_urls() {
        assert_eq!(
            watchlist_page_url("moviefanx", 1),
            "https://letterboxd.com/moviefanx/watchlist/"
        );
        assert_eq!(
            watchlist_page_url("moviefanx", 3),
            "https://letterboxd.com/moviefanx/watchlist/page/3/"
        );
    }

    #[test]
    fn page_cap_is_clamped() {
        assert_eq!(clamp_max_pages(None), DEFAULT_MAX_PAGES);
        assert_eq!(clamp_max_pages(Some(0)), 1);
        assert_eq!(clamp_max_pages(Some(-4)), 1);
        assert_eq!(clamp_max_pages(Some(1000)), MAX_PAGES_HARD_LIMIT);
        assert_eq!(clamp_max_pages(Some(7)), 7);
    }

    #[tokio::test]
    async fn stops_at_first_page_without_new_films() {
        let fetcher = FakeFetcher::default()
            .page("moviefanx", 1, 200, poster_page(0, 20))
            .page("moviefanx", 2, 200, poster_page(20, 40))
            .page("moviefanx", 3, 200, poster_page(0, 40))
            .page("moviefanx", 4, 200, poster_page(40, 60));

        let uris = fetch_watchlist_uris(&fetcher, " @MoviefanX ", &FetchOptions::with_max_pages(10))
            .await
            .unwrap();

        assert_eq!(uris.len(), 40);
        assert_eq!(uris[0], "https://letterboxd.com/film/film-0/");
        assert_eq!(uris[39], "https://letterboxd.com/film/film-39/");
        assert_eq!(fetcher.request_count(), 3);
    }

    #[tokio::test]
    async fn zero_page_cap_still_fetches_one_page() {
        let fetcher = FakeFetcher::default()
            .page("u", 1, 200, poster_page(0, 5))
            .page("u", 2, 200, poster_page(5, 10));

        let films = fetch_watchlist(&fetcher, "u", &FetchOptions::with_max_pages(0))
            .await
            .unwrap();

        assert_eq!(films.len(), 5);
        assert_eq!(fetcher.request_count(), 1);
    }

    #[tokio::test]
    async fn first_page_failure_is_fatal() {
        let fetcher = FakeFetcher::default().page("ghost", 1, 404, String::new());

        let err = fetch_watchlist(&fetcher, "ghost", &FetchOptions::default())
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "Failed to fetch watchlist: HTTP 404");
    }

    #[tokio::test]
    async fn later_page_failure_keeps_what_was_scraped() {
        let fetcher = FakeFetcher::default()
            .page("u", 1, 200, poster_page(0, 3))
            .page("u", 2, 503, String::new());

        let films = fetch_watchlist(&fetcher, "u", &FetchOptions::default())
            .await
            .unwrap();

        assert_eq!(films.len(), 3);
        assert_eq!(fetcher.request_count(), 2);
    }

    #[tokio::test]
    async fn blank_username_fails_before_any_request() {
        let fetcher = FakeFetcher::default();

        let err = fetch_watchlist(&fetcher, "  @ ", &FetchOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, WatchlistError::UsernameRequired));
        assert_eq!(err.to_string(), "Username is required");
        assert_eq!(fetcher.request_count(), 0);
    }

    #[tokio::test]
    async fn progress_events_follow_the_pages() {
        let fetcher = FakeFetcher::default()
            .page("u", 1, 200, poster_page(0, 2))
            .page("u", 2, 200, String::new());
        let (tx, mut rx) = mpsc::channel(16);
        let opts = FetchOptions {
            max_pages: Some(5),
            progress: Some(tx),
            ..FetchOptions::default()
        };

        fetch_watchlist(&fetcher, "u", &opts).await.unwrap();
        drop(opts);

        let mut events = Vec::new();
        while let Some(ev) = rx.recv().await {
            events.push(ev);
        }
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], FetchEvent::Start { max_pages: 5, .. }));
        assert!(matches!(events[1], FetchEvent::Page { page: 1, added: 2, total: 2, .. }));
        assert!(matches!(events[2], FetchEvent::Page { page: 2, added: 0, .. }));
    }
}
