use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, warn};

use crate::cancel::CancellationToken;
use crate::data::{LoadError, PageLoader};
use crate::model::{Item, Page, Query};

/// Snapshot handed to whatever renders the result list.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeedState {
    pub items: Vec<Item>,
    pub pending: bool,
    pub rejected: bool,
    pub has_next_page: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LoadMode {
    Replace,
    Append,
}

struct PendingLoad {
    request_id: u64,
    generation: u64,
    cancel: CancellationToken,
    mode: LoadMode,
}

struct LoadResponse {
    request_id: u64,
    generation: u64,
    result: Result<Page, LoadError>,
}

/// Cursor-paginated result list for the active query.
///
/// One load is in flight at most. Loads run on their own thread and report
/// back over a channel; results are applied only from [`poll`](Self::poll),
/// and only when they carry the tag of the current pending load.
pub struct PaginationEngine {
    loader: Arc<dyn PageLoader>,
    query: Option<Query>,
    generation: u64,
    pages: Vec<Page>,
    items: Vec<Item>,
    seen_ids: HashSet<String>,
    pending: Option<PendingLoad>,
    rejected: bool,
    next_request_id: u64,
    response_tx: Sender<LoadResponse>,
    response_rx: Receiver<LoadResponse>,
}

impl PaginationEngine {
    pub fn new(loader: Arc<dyn PageLoader>) -> Self {
        let (response_tx, response_rx) = unbounded();
        Self {
            loader,
            query: None,
            generation: 0,
            pages: Vec::new(),
            items: Vec::new(),
            seen_ids: HashSet::new(),
            pending: None,
            rejected: false,
            next_request_id: 0,
            response_tx,
            response_rx,
        }
    }

    pub fn query(&self) -> Option<&Query> {
        self.query.as_ref()
    }

    /// Identity of the current query; bumps whenever accumulated pages are
    /// thrown away.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn is_rejected(&self) -> bool {
        self.rejected
    }

    pub fn has_next_page(&self) -> bool {
        self.pages.last().map(Page::has_next).unwrap_or(false)
    }

    pub fn state(&self) -> FeedState {
        FeedState {
            items: self.items.clone(),
            pending: self.is_pending(),
            rejected: self.rejected,
            has_next_page: self.has_next_page(),
        }
    }

    /// Switches to `query`, discarding every page of the previous one and
    /// cancelling its in-flight load. Returns false if `query` is already
    /// current.
    pub fn set_query(&mut self, query: Query) -> bool {
        if self.query.as_ref() == Some(&query) {
            return false;
        }
        self.query = Some(query);
        self.reset_pages();
        self.issue(None, LoadMode::Replace);
        true
    }

    /// Requests the page after the last one. No-op while a load is in flight,
    /// after a rejection, or once the cursor is exhausted.
    pub fn fetch_next_page(&mut self) -> bool {
        if self.pending.is_some() || self.rejected || self.query.is_none() {
            return false;
        }
        let Some(last) = self.pages.last() else {
            return false;
        };
        if !last.has_next() {
            return false;
        }
        let previous = last.clone();
        self.issue(Some(previous), LoadMode::Append);
        true
    }

    /// Manual retry. After a rejection the failed load is re-issued from the
    /// last successful page; otherwise the whole list is reloaded.
    pub fn revalidate(&mut self) -> bool {
        if self.query.is_none() {
            return false;
        }
        self.cancel_pending();
        if self.rejected {
            self.rejected = false;
            match self.pages.last().cloned() {
                Some(previous) => self.issue(Some(previous), LoadMode::Append),
                None => self.issue(None, LoadMode::Replace),
            }
        } else {
            self.reset_pages();
            self.issue(None, LoadMode::Replace);
        }
        true
    }

    /// Cancels outstanding work and forgets the query.
    pub fn unmount(&mut self) {
        self.cancel_pending();
        self.query = None;
        self.generation = self.generation.wrapping_add(1);
        self.pages.clear();
        self.items.clear();
        self.seen_ids.clear();
        self.rejected = false;
    }

    /// Applies every response that has arrived. Returns true if state changed.
    pub fn poll(&mut self) -> bool {
        let mut changed = false;
        while let Ok(response) = self.response_rx.try_recv() {
            changed |= self.apply_response(response);
        }
        changed
    }

    /// Blocks until the in-flight load settles or `timeout` elapses.
    pub fn wait_idle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut changed = self.poll();
        while self.pending.is_some() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.response_rx.recv_timeout(remaining) {
                Ok(response) => changed |= self.apply_response(response),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        changed
    }

    fn reset_pages(&mut self) {
        self.cancel_pending();
        self.generation = self.generation.wrapping_add(1);
        self.pages.clear();
        self.items.clear();
        self.seen_ids.clear();
        self.rejected = false;
    }

    fn cancel_pending(&mut self) {
        if let Some(pending) = self.pending.take() {
            debug!(request_id = pending.request_id, "cancelling page load");
            pending.cancel.cancel();
        }
    }

    fn issue(&mut self, previous: Option<Page>, mode: LoadMode) {
        let Some(query) = self.query.clone() else {
            return;
        };

        if previous.is_none() {
            if let Some(page) = self.loader.load_local(&query) {
                debug!(section = %query.selected_section, "page resolved locally");
                self.append_page(page);
                return;
            }
        }

        let request_id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);
        let generation = self.generation;
        let cancel = CancellationToken::new();
        self.pending = Some(PendingLoad {
            request_id,
            generation,
            cancel: cancel.clone(),
            mode,
        });
        debug!(
            request_id,
            generation,
            ?mode,
            cursor = ?previous.as_ref().and_then(|p| p.next_cursor.as_deref()),
            "issuing page load"
        );

        let tx = self.response_tx.clone();
        let loader = self.loader.clone();
        thread::spawn(move || {
            if cancel.is_cancelled() {
                return;
            }
            let result = loader.load(&query, previous.as_ref(), &cancel);
            if cancel.is_cancelled() {
                return;
            }
            let _ = tx.send(LoadResponse {
                request_id,
                generation,
                result,
            });
        });
    }

    fn apply_response(&mut self, response: LoadResponse) -> bool {
        let Some(pending) = &self.pending else {
            debug!(request_id = response.request_id, "dropping unsolicited page");
            return false;
        };
        if pending.cancel.is_cancelled()
            || pending.request_id != response.request_id
            || pending.generation != response.generation
        {
            debug!(
                request_id = response.request_id,
                generation = response.generation,
                current_generation = self.generation,
                "dropping stale page"
            );
            return false;
        }
        let mode = pending.mode;
        self.pending = None;

        match response.result {
            Ok(page) => {
                if mode == LoadMode::Replace {
                    self.pages.clear();
                    self.items.clear();
                    self.seen_ids.clear();
                }
                self.append_page(page);
            }
            // Our token is live, so the loader gave up on its own.
            Err(LoadError::Cancelled) => {
                debug!(request_id = response.request_id, "loader cancelled unprompted");
                self.rejected = true;
            }
            Err(LoadError::Failed(err)) => {
                warn!(error = %format!("{err:#}"), "page load rejected");
                self.rejected = true;
            }
        }
        true
    }

    fn append_page(&mut self, mut page: Page) {
        let before = page.items.len();
        page.items.retain(|item| self.seen_ids.insert(item.id.clone()));
        if page.items.len() != before {
            debug!(
                dropped = before - page.items.len(),
                "dropped duplicate items from page"
            );
        }
        self.items.extend(page.items.iter().cloned());
        self.pages.push(page);
    }
}

impl Drop for PaginationEngine {
    fn drop(&mut self) {
        self.cancel_pending();
    }
}
