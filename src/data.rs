use std::io::Read;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use parking_lot::Mutex;
use reqwest::blocking::Client;
use tracing::debug;

use crate::cancel::{self, CancellationToken, Cancelled};
use crate::model::{Item, MediaReference, Page, Query, Section};

pub const DEFAULT_FIRST_PAGE_SIZE: usize = 10;
pub const DEFAULT_PAGE_SIZE: usize = 30;

/// Remote paginated search backend.
pub trait GifService: Send + Sync {
    fn fetch_featured(
        &self,
        limit: usize,
        cursor: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Page>;

    fn fetch_search(
        &self,
        term: &str,
        limit: usize,
        cursor: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Page>;
}

/// Raw binary download for one media reference.
pub trait MediaFetcher: Send + Sync {
    fn fetch_media_bytes(&self, url: &str, cancel: &CancellationToken) -> Result<Vec<u8>>;
}

pub trait RecentsProvider: Send + Sync {
    fn recent_items(&self) -> Vec<Item>;
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("load cancelled")]
    Cancelled,
    #[error("{0:#}")]
    Failed(anyhow::Error),
}

impl From<Cancelled> for LoadError {
    fn from(_: Cancelled) -> Self {
        LoadError::Cancelled
    }
}

/// Loader capability the pagination engine drives.
pub trait PageLoader: Send + Sync {
    fn load(
        &self,
        query: &Query,
        previous: Option<&Page>,
        cancel: &CancellationToken,
    ) -> Result<Page, LoadError>;

    /// Pages that can be produced without suspending, e.g. from a local list.
    fn load_local(&self, _query: &Query) -> Option<Page> {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Dispatch {
    Recents,
    Featured,
    Search(String),
}

fn dispatch(query: &Query) -> Dispatch {
    match query.selected_section {
        Section::Recents => Dispatch::Recents,
        Section::Trending => Dispatch::Featured,
        Section::SearchResults => Dispatch::Search(query.search_text.trim().to_string()),
        mood => match mood.search_term() {
            Some(term) => Dispatch::Search(term.to_string()),
            None => unreachable!("section {mood} has no loader dispatch entry"),
        },
    }
}

pub struct GifLoader {
    service: Arc<dyn GifService>,
    recents: Arc<dyn RecentsProvider>,
    first_page_size: usize,
    page_size: usize,
}

impl GifLoader {
    pub fn new(service: Arc<dyn GifService>, recents: Arc<dyn RecentsProvider>) -> Self {
        Self {
            service,
            recents,
            first_page_size: DEFAULT_FIRST_PAGE_SIZE,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_sizes(mut self, first_page_size: usize, page_size: usize) -> Self {
        self.first_page_size = first_page_size.max(1);
        self.page_size = page_size.max(1);
        self
    }

    fn recents_page(&self) -> Page {
        Page {
            items: self.recents.recent_items(),
            next_cursor: None,
        }
    }
}

impl PageLoader for GifLoader {
    fn load(
        &self,
        query: &Query,
        previous: Option<&Page>,
        cancel: &CancellationToken,
    ) -> Result<Page, LoadError> {
        cancel.check()?;
        let limit = if previous.is_some() {
            self.page_size
        } else {
            self.first_page_size
        };
        let cursor = previous.and_then(|page| page.next_cursor.as_deref());

        let result = match dispatch(query) {
            Dispatch::Recents => return Ok(self.recents_page()),
            Dispatch::Featured => {
                debug!(limit, ?cursor, "loading featured page");
                self.service
                    .fetch_featured(limit, cursor, cancel)
                    .context("fetch featured page")
            }
            Dispatch::Search(term) => {
                debug!(%term, limit, ?cursor, "loading search page");
                self.service
                    .fetch_search(&term, limit, cursor, cancel)
                    .with_context(|| format!("fetch search page for {term:?}"))
            }
        };

        if cancel.is_cancelled() {
            return Err(LoadError::Cancelled);
        }
        result.map_err(|err| {
            if cancel::is_cancellation(&err) {
                LoadError::Cancelled
            } else {
                LoadError::Failed(err)
            }
        })
    }

    fn load_local(&self, query: &Query) -> Option<Page> {
        match dispatch(query) {
            Dispatch::Recents => Some(self.recents_page()),
            Dispatch::Featured | Dispatch::Search(_) => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StaticRecents {
    items: Vec<Item>,
}

impl StaticRecents {
    pub fn new(items: Vec<Item>) -> Self {
        Self { items }
    }
}

impl RecentsProvider for StaticRecents {
    fn recent_items(&self) -> Vec<Item> {
        self.items.clone()
    }
}

const MEDIA_READ_CHUNK: usize = 16 * 1024;

pub struct HttpMediaFetcher {
    client: Client,
}

impl HttpMediaFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(format!("gif-picker/{}", crate::VERSION))
            .build()
            .context("media: build http client")?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl MediaFetcher for HttpMediaFetcher {
    fn fetch_media_bytes(&self, url: &str, cancel: &CancellationToken) -> Result<Vec<u8>> {
        let parsed = url::Url::parse(url).with_context(|| format!("media: invalid url {url}"))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            bail!("media: unsupported scheme {}", parsed.scheme());
        }
        cancel.check()?;

        let mut response = self
            .client
            .get(parsed)
            .send()
            .context("media: download")?;
        if !response.status().is_success() {
            return Err(anyhow!("media: request failed: {}", response.status()));
        }

        let mut bytes = Vec::new();
        let mut chunk = vec![0u8; MEDIA_READ_CHUNK];
        loop {
            cancel.check()?;
            let read = response.read(&mut chunk).context("media: body")?;
            if read == 0 {
                break;
            }
            bytes.extend_from_slice(&chunk[..read]);
        }
        Ok(bytes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceCall {
    Featured {
        limit: usize,
        cursor: Option<String>,
    },
    Search {
        term: String,
        limit: usize,
        cursor: Option<String>,
    },
}

/// Deterministic in-memory catalogue standing in for the remote backend.
///
/// Cursors are decimal offsets into the catalogue. Every call is recorded so
/// callers can assert on what was dispatched.
pub struct MockGifService {
    catalogue_size: usize,
    latency: Duration,
    calls: Mutex<Vec<ServiceCall>>,
    failures: Mutex<usize>,
}

impl Default for MockGifService {
    fn default() -> Self {
        Self::new(120)
    }
}

impl MockGifService {
    pub fn new(catalogue_size: usize) -> Self {
        Self {
            catalogue_size,
            latency: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(0),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Makes the next `count` calls fail with a backend error.
    pub fn fail_next(&self, count: usize) {
        *self.failures.lock() = count;
    }

    pub fn calls(&self) -> Vec<ServiceCall> {
        self.calls.lock().clone()
    }

    fn respond(
        &self,
        prefix: &str,
        limit: usize,
        cursor: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Page> {
        wait(self.latency, cancel)?;
        {
            let mut failures = self.failures.lock();
            if *failures > 0 {
                *failures -= 1;
                bail!("mock backend unavailable");
            }
        }

        let start = match cursor {
            Some(raw) => raw
                .parse::<usize>()
                .with_context(|| format!("invalid cursor {raw:?}"))?,
            None => 0,
        };
        let end = start.saturating_add(limit).min(self.catalogue_size);
        let items = (start..end).map(|n| mock_item(prefix, n)).collect();
        let next_cursor = (end < self.catalogue_size).then(|| end.to_string());
        Ok(Page { items, next_cursor })
    }
}

impl GifService for MockGifService {
    fn fetch_featured(
        &self,
        limit: usize,
        cursor: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Page> {
        self.calls.lock().push(ServiceCall::Featured {
            limit,
            cursor: cursor.map(str::to_string),
        });
        self.respond("featured", limit, cursor, cancel)
    }

    fn fetch_search(
        &self,
        term: &str,
        limit: usize,
        cursor: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Page> {
        self.calls.lock().push(ServiceCall::Search {
            term: term.to_string(),
            limit,
            cursor: cursor.map(str::to_string),
        });
        let prefix = term.replace(' ', "-");
        self.respond(&prefix, limit, cursor, cancel)
    }
}

/// Serves bytes derived from the url; urls containing `broken` fail.
pub struct MockMediaFetcher {
    latency: Duration,
    payload_len: usize,
    calls: Mutex<Vec<String>>,
}

impl Default for MockMediaFetcher {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl MockMediaFetcher {
    pub fn new(payload_len: usize) -> Self {
        Self {
            latency: Duration::ZERO,
            payload_len,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

impl MediaFetcher for MockMediaFetcher {
    fn fetch_media_bytes(&self, url: &str, cancel: &CancellationToken) -> Result<Vec<u8>> {
        self.calls.lock().push(url.to_string());
        wait(self.latency, cancel)?;
        if url.contains("broken") {
            bail!("media: request failed: 404 Not Found");
        }
        Ok(url.bytes().cycle().take(self.payload_len).collect())
    }
}

/// Sleeps in short steps so a cancelled token is noticed promptly.
fn wait(total: Duration, cancel: &CancellationToken) -> Result<(), Cancelled> {
    const STEP: Duration = Duration::from_millis(5);
    let mut remaining = total;
    while !remaining.is_zero() {
        cancel.check()?;
        let step = remaining.min(STEP);
        thread::sleep(step);
        remaining -= step;
    }
    cancel.check()
}

pub fn mock_item(prefix: &str, n: usize) -> Item {
    let width = 200;
    let height = 100 + ((n * 37) % 150) as u32;
    let base = format!("https://media.example.test/{prefix}/{n}");
    Item {
        id: format!("{prefix}-{n}"),
        title: format!("{prefix} #{n}"),
        description: format!("{prefix} gif number {n}"),
        preview_media: Arc::new(MediaReference::new(
            format!("{base}/preview.mp4"),
            width,
            height,
        )),
        attachment_media: Arc::new(MediaReference::new(
            format!("{base}/full.mp4"),
            width * 2,
            height * 2,
        )),
    }
}
