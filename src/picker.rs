use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use crossterm::event::KeyCode;
use serde::Serialize;
use tracing::{debug, info};

use crate::cache::MediaCache;
use crate::config::Config;
use crate::data::{GifLoader, GifService, MediaFetcher, RecentsProvider};
use crate::keyboard::{KeyOutcome, KeyboardNav};
use crate::layout::{VisibleRange, WaterfallLayout};
use crate::media::{MediaLoader, MediaSlot};
use crate::model::{Query, Section};
use crate::pagination::{FeedState, PaginationEngine};
use crate::query::{ControllerEvent, QueryController};

/// Notifications for whatever hosts the picker panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PickerEvent {
    SearchTextChanged(String),
    SectionChanged(Section),
    ItemSelected(crate::model::Selection),
    CloseRequested,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaStatus {
    Unmounted,
    Loading,
    Ready,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisibleItem {
    pub index: usize,
    pub id: String,
    pub title: String,
    pub lane: usize,
    pub offset: f32,
    pub size: f32,
    pub tabbable: bool,
    pub media: MediaStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub query: Query,
    pub item_count: usize,
    pub pending: bool,
    pub rejected: bool,
    pub has_next_page: bool,
    pub scroll_offset: f32,
    pub content_extent: f32,
    pub visible: Vec<VisibleItem>,
}

#[derive(Clone)]
pub struct Options {
    pub service: Arc<dyn GifService>,
    pub fetcher: Arc<dyn MediaFetcher>,
    pub recents: Arc<dyn RecentsProvider>,
    pub cache: Arc<MediaCache>,
    pub config: Config,
}

/// The picker panel core: search input through to rendered window and focus.
///
/// Everything is driven from one thread: input handlers plus [`tick`](Self::tick),
/// which applies due debounced queries and drains finished loads.
pub struct Picker {
    controller: QueryController,
    feed: PaginationEngine,
    layout: WaterfallLayout,
    nav: KeyboardNav,
    media: MediaLoader,
    events_tx: Sender<PickerEvent>,
    events_rx: Receiver<PickerEvent>,
    synced_generation: u64,
    synced_len: usize,
    synced_pending: bool,
    closed: bool,
}

impl Picker {
    pub fn new(opts: Options) -> Self {
        let cfg = opts.config;
        let has_recents = !opts.recents.recent_items().is_empty();
        let loader = GifLoader::new(opts.service, opts.recents)
            .with_page_sizes(cfg.picker.first_page_size, cfg.picker.page_size);

        let resting = if has_recents {
            Section::Recents
        } else {
            cfg.picker.default_section
        };
        let initial = Query::new(resting, "");

        let (events_tx, events_rx) = unbounded();
        let mut picker = Self {
            controller: QueryController::new(initial.clone(), cfg.picker.debounce)
                .with_recents(has_recents)
                .with_default_section(cfg.picker.default_section),
            feed: PaginationEngine::new(Arc::new(loader)),
            layout: WaterfallLayout::new(cfg.layout),
            nav: KeyboardNav::new(),
            media: MediaLoader::new(opts.cache, opts.fetcher, cfg.media.workers),
            events_tx,
            events_rx,
            synced_generation: 0,
            synced_len: 0,
            synced_pending: false,
            closed: false,
        };
        picker.apply_query(initial);
        picker
    }

    /// Receiver for outbound [`PickerEvent`]s.
    pub fn events(&self) -> Receiver<PickerEvent> {
        self.events_rx.clone()
    }

    pub fn search_text(&self) -> &str {
        &self.controller.current().search_text
    }

    pub fn section(&self) -> Section {
        self.controller.current().selected_section
    }

    pub fn active_query(&self) -> &Query {
        self.controller.active()
    }

    pub fn feed_state(&self) -> FeedState {
        self.feed.state()
    }

    pub fn layout(&self) -> &WaterfallLayout {
        &self.layout
    }

    pub fn keyboard(&self) -> &KeyboardNav {
        &self.nav
    }

    pub fn media(&self) -> &MediaLoader {
        &self.media
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn on_search_text_change(&mut self, text: &str, now: Instant) {
        if self.closed {
            return;
        }
        let events = self.controller.set_search_text(text, now);
        self.dispatch(events);
        self.sync();
    }

    pub fn on_section_change(&mut self, section: Section, now: Instant) {
        if self.closed {
            return;
        }
        let events = self.controller.select_section(section, now);
        self.dispatch(events);
        self.sync();
    }

    /// Applies a due debounced query and any finished loads. Returns true if
    /// something visible changed.
    pub fn tick(&mut self, now: Instant) -> bool {
        if self.closed {
            return false;
        }
        let mut changed = false;
        if let Some(event) = self.controller.poll(now) {
            self.dispatch(vec![event]);
            changed = true;
        }
        changed |= self.feed.poll();
        changed |= self.media.poll();
        if changed {
            self.sync();
        }
        changed
    }

    /// Drives [`tick`](Self::tick) with the wall clock until no debounce,
    /// page load or media download is outstanding, or `timeout` elapses.
    pub fn settle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.tick(Instant::now());
            let busy = self.controller.has_pending()
                || self.feed.is_pending()
                || self.media.has_pending();
            if !busy {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    pub fn set_viewport(&mut self, height: f32) {
        self.layout.set_viewport(height);
        self.sync();
    }

    pub fn scroll_to(&mut self, offset: f32) {
        self.layout.scroll_to(offset);
        self.sync();
    }

    pub fn scroll_by(&mut self, delta: f32) {
        self.layout.scroll_by(delta);
        self.sync();
    }

    /// Pointer or programmatic focus; the item becomes the tabbable one.
    pub fn focus(&mut self, index: usize) {
        if index < self.layout.len() {
            self.nav.focus(index);
        }
    }

    pub fn handle_key(&mut self, code: KeyCode) -> KeyOutcome {
        if self.closed {
            return KeyOutcome::Ignored;
        }
        let outcome = self.nav.handle_key(code, &self.layout);
        match outcome {
            KeyOutcome::Moved(index) => {
                self.layout.scroll_into_view(index);
                self.sync();
            }
            KeyOutcome::Select(index) => {
                self.select(index);
            }
            KeyOutcome::Ignored => {}
        }
        outcome
    }

    /// Reports the item at `index` and asks the host to close. Happens once;
    /// the picker ignores input afterwards.
    pub fn select(&mut self, index: usize) -> bool {
        if self.closed {
            return false;
        }
        let Some(item) = self.feed.items().get(index) else {
            return false;
        };
        let selection = item.selection();
        info!(id = %selection.id, "item selected");
        self.emit(PickerEvent::ItemSelected(selection));
        self.emit(PickerEvent::CloseRequested);
        self.close();
        true
    }

    /// Retry affordance after a rejected load.
    pub fn retry(&mut self) {
        if self.closed {
            return;
        }
        self.feed.revalidate();
        self.sync();
    }

    /// Unmount: drops the pending debounce, the page load and every download.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.controller.cancel();
        self.feed.unmount();
        self.media.unmount_all();
    }

    pub fn snapshot(&self) -> Snapshot {
        let items = self.feed.items();
        let count = items.len();
        let visible = self
            .layout
            .visible_range()
            .map(|range| range.indices)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|index| {
                let item = items.get(index)?;
                let pos = self.layout.position(index)?;
                let media = match self.media.slot(&item.id) {
                    None => MediaStatus::Unmounted,
                    Some(MediaSlot::Loading) => MediaStatus::Loading,
                    Some(MediaSlot::Ready(_)) => MediaStatus::Ready,
                    Some(MediaSlot::Failed) => MediaStatus::Failed,
                };
                Some(VisibleItem {
                    index,
                    id: item.id.clone(),
                    title: item.title.clone(),
                    lane: pos.lane,
                    offset: pos.offset,
                    size: pos.size,
                    tabbable: self.nav.is_tabbable(index, count),
                    media,
                })
            })
            .collect();

        Snapshot {
            query: self.controller.active().clone(),
            item_count: count,
            pending: self.feed.is_pending(),
            rejected: self.feed.is_rejected(),
            has_next_page: self.feed.has_next_page(),
            scroll_offset: self.layout.scroll_offset(),
            content_extent: self.layout.content_extent(),
            visible,
        }
    }

    fn dispatch(&mut self, events: Vec<ControllerEvent>) {
        for event in events {
            match event {
                ControllerEvent::SearchTextChanged(text) => {
                    self.emit(PickerEvent::SearchTextChanged(text))
                }
                ControllerEvent::SectionChanged(section) => {
                    self.emit(PickerEvent::SectionChanged(section))
                }
                ControllerEvent::QueryApplied(query) => self.apply_query(query),
            }
        }
    }

    fn apply_query(&mut self, query: Query) {
        if self.feed.set_query(query) {
            self.layout.reset();
            self.nav.reset();
            self.sync();
        }
    }

    fn emit(&self, event: PickerEvent) {
        let _ = self.events_tx.send(event);
    }

    /// Brings layout, prefetching and media mounts in line with the feed.
    fn sync(&mut self) {
        if self.closed {
            return;
        }
        let generation = self.feed.generation();
        let len = self.feed.items().len();
        let pending = self.feed.is_pending();
        // A reload or a page of duplicates can land on a count the
        // prefetch trigger already fired for.
        let settled = self.synced_pending && !pending;
        if generation != self.synced_generation || settled {
            self.layout.rearm_prefetch();
        }
        if generation != self.synced_generation || len != self.synced_len {
            self.layout.set_items(self.feed.items());
            self.nav.clamp(len);
            self.synced_generation = generation;
            self.synced_len = len;
        }
        self.synced_pending = pending;

        let blocked = pending || self.feed.is_rejected();
        if self.layout.should_prefetch(self.feed.has_next_page(), blocked) {
            debug!(count = len, "prefetching next page");
            self.feed.fetch_next_page();
        }

        let range = self.layout.visible_range();
        self.sync_media(range.as_ref());
    }

    fn sync_media(&mut self, range: Option<&VisibleRange>) {
        let items = self.feed.items();
        let wanted: HashSet<&str> = range
            .map(|range| {
                range
                    .indices
                    .iter()
                    .filter_map(|index| items.get(*index))
                    .map(|item| item.id.as_str())
                    .collect()
            })
            .unwrap_or_default();

        let stale: Vec<String> = self
            .media
            .mounted_ids()
            .filter(|id| !wanted.contains(id))
            .map(str::to_string)
            .collect();
        for id in stale {
            self.media.unmount(&id);
        }

        if let Some(range) = range {
            for index in &range.indices {
                if let Some(item) = items.get(*index) {
                    self.media.mount(&item.id, item.preview_media.clone());
                }
            }
        }
    }
}

impl Drop for Picker {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{MockGifService, MockMediaFetcher, ServiceCall, StaticRecents};
    use crate::model::Item;

    struct Harness {
        service: Arc<MockGifService>,
        fetcher: Arc<MockMediaFetcher>,
        picker: Picker,
    }

    fn harness_with(service: MockGifService, recents: Vec<Item>) -> Harness {
        let service = Arc::new(service);
        let fetcher = Arc::new(MockMediaFetcher::new(64));
        let picker = Picker::new(Options {
            service: service.clone(),
            fetcher: fetcher.clone(),
            recents: Arc::new(StaticRecents::new(recents)),
            cache: Arc::new(MediaCache::default()),
            config: Config::default(),
        });
        Harness {
            service,
            fetcher,
            picker,
        }
    }

    fn harness() -> Harness {
        harness_with(MockGifService::new(100), Vec::new())
    }

    fn drain(rx: &Receiver<PickerEvent>) -> Vec<PickerEvent> {
        rx.try_iter().collect()
    }

    #[test]
    fn opens_on_trending_and_fills_the_first_window() {
        let mut h = harness();
        h.picker.set_viewport(400.0);
        assert!(h.picker.settle(Duration::from_secs(5)));

        assert_eq!(h.picker.section(), Section::Trending);
        let calls = h.service.calls();
        assert_eq!(
            calls[0],
            ServiceCall::Featured {
                limit: 10,
                cursor: None
            }
        );
        // Ten items never cover the overscanned window, so page two follows.
        assert_eq!(
            calls[1],
            ServiceCall::Featured {
                limit: 30,
                cursor: Some("10".into())
            }
        );
        assert_eq!(calls.len(), 2);

        let snapshot = h.picker.snapshot();
        assert_eq!(snapshot.item_count, 40);
        assert!(snapshot.has_next_page);
        assert!(snapshot.visible[0].tabbable);
        assert!(snapshot
            .visible
            .iter()
            .all(|item| item.media == MediaStatus::Ready));
        assert!(!h.fetcher.calls().is_empty());
    }

    #[test]
    fn typing_is_debounced_into_one_search() {
        let mut h = harness();
        assert!(h.picker.settle(Duration::from_secs(5)));
        let events = h.picker.events();
        drain(&events);
        let before = h.service.calls().len();

        let t0 = Instant::now();
        h.picker.on_search_text_change("cat", t0);
        h.picker
            .on_search_text_change("cats", t0 + Duration::from_millis(100));
        assert!(!h.picker.tick(t0 + Duration::from_millis(400)));
        assert_eq!(h.picker.active_query().selected_section, Section::Trending);

        assert!(h.picker.tick(t0 + Duration::from_millis(700)));
        assert!(h.picker.settle(Duration::from_secs(5)));

        let searches: Vec<_> = h.service.calls()[before..]
            .iter()
            .filter(|call| matches!(call, ServiceCall::Search { .. }))
            .cloned()
            .collect();
        assert_eq!(
            searches[0],
            ServiceCall::Search {
                term: "cats".into(),
                limit: 10,
                cursor: None
            }
        );
        assert!(searches
            .iter()
            .all(|call| matches!(call, ServiceCall::Search { term, .. } if term == "cats")));
        assert!(h
            .picker
            .feed_state()
            .items
            .iter()
            .all(|item| item.id.starts_with("cats-")));

        assert_eq!(
            drain(&events),
            vec![
                PickerEvent::SearchTextChanged("cat".into()),
                PickerEvent::SectionChanged(Section::SearchResults),
                PickerEvent::SearchTextChanged("cats".into()),
            ]
        );
    }

    #[test]
    fn clearing_search_returns_to_recents() {
        let recents = vec![crate::data::mock_item("recent", 0), crate::data::mock_item("recent", 1)];
        let mut h = harness_with(MockGifService::new(50), recents);
        assert_eq!(h.picker.section(), Section::Recents);
        assert_eq!(h.picker.feed_state().items.len(), 2);
        assert!(h.service.calls().is_empty());

        let t0 = Instant::now();
        h.picker.on_search_text_change("dog", t0);
        h.picker.tick(t0 + Duration::from_secs(1));
        assert!(h.picker.settle(Duration::from_secs(5)));
        assert_eq!(h.picker.active_query().selected_section, Section::SearchResults);

        h.picker.on_search_text_change("", t0 + Duration::from_secs(2));
        assert_eq!(h.picker.section(), Section::Recents);
        let state = h.picker.feed_state();
        assert_eq!(state.items.len(), 2);
        assert!(!state.has_next_page);
    }

    #[test]
    fn category_pick_applies_immediately() {
        let mut h = harness();
        assert!(h.picker.settle(Duration::from_secs(5)));
        h.picker.on_section_change(Section::Love, Instant::now());
        assert_eq!(h.picker.active_query().selected_section, Section::Love);
        assert!(h.picker.settle(Duration::from_secs(5)));
        assert!(h
            .service
            .calls()
            .iter()
            .any(|call| matches!(call, ServiceCall::Search { term, .. } if term == "love")));
    }

    #[test]
    fn selection_fires_once_then_closes() {
        let mut h = harness();
        h.picker.set_viewport(400.0);
        assert!(h.picker.settle(Duration::from_secs(5)));
        let events = h.picker.events();
        drain(&events);

        assert_eq!(h.picker.handle_key(KeyCode::Tab), KeyOutcome::Moved(0));
        assert_eq!(h.picker.handle_key(KeyCode::Enter), KeyOutcome::Select(0));
        assert!(h.picker.is_closed());
        assert!(!h.picker.select(1));
        assert_eq!(h.picker.handle_key(KeyCode::Enter), KeyOutcome::Ignored);

        let events = drain(&events);
        assert_eq!(events.len(), 2);
        match &events[0] {
            PickerEvent::ItemSelected(selection) => {
                assert_eq!(selection.id, "featured-0");
                assert!(selection.url.ends_with("/full.mp4"));
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(events[1], PickerEvent::CloseRequested);
        assert_eq!(h.picker.media().mounted_ids().count(), 0);
    }

    #[test]
    fn keyboard_focus_scrolls_into_view() {
        let mut h = harness();
        h.picker.set_viewport(300.0);
        assert!(h.picker.settle(Duration::from_secs(5)));
        assert_eq!(h.picker.layout().scroll_offset(), 0.0);

        let last = h.picker.layout().len() - 1;
        assert_eq!(h.picker.handle_key(KeyCode::End), KeyOutcome::Moved(0));
        assert_eq!(h.picker.handle_key(KeyCode::End), KeyOutcome::Moved(last));
        assert!(h.picker.layout().scroll_offset() > 0.0);
        assert_eq!(h.picker.keyboard().focused(), Some(last));
    }

    #[test]
    fn failed_load_waits_for_retry() {
        let service = MockGifService::new(100);
        service.fail_next(1);
        let mut h = harness_with(service, Vec::new());
        assert!(h.picker.settle(Duration::from_secs(5)));
        let state = h.picker.feed_state();
        assert!(state.rejected);
        assert!(state.items.is_empty());

        h.picker.scroll_by(500.0);
        h.picker.settle(Duration::from_secs(1));
        assert_eq!(h.service.calls().len(), 1);

        h.picker.retry();
        assert!(h.picker.settle(Duration::from_secs(5)));
        let state = h.picker.feed_state();
        assert!(!state.rejected);
        assert!(!state.items.is_empty());
    }

    #[test]
    fn retry_keeps_infinite_scroll_alive() {
        let mut h = harness_with(MockGifService::new(200), Vec::new());
        h.picker.set_viewport(400.0);
        assert!(h.picker.settle(Duration::from_secs(5)));
        assert_eq!(h.picker.feed_state().items.len(), 40);

        h.picker.retry();
        assert!(h.picker.settle(Duration::from_secs(5)));
        let reloaded = h.picker.feed_state().items.len();
        assert!(reloaded >= 10);

        h.picker.scroll_to(100_000.0);
        assert!(h.picker.settle(Duration::from_secs(5)));
        let state = h.picker.feed_state();
        assert!(state.items.len() > reloaded, "stuck at {} items", reloaded);
    }

    /// Second page repeats the first; the third carries new items.
    struct RepeatingService;

    impl GifService for RepeatingService {
        fn fetch_featured(
            &self,
            _limit: usize,
            cursor: Option<&str>,
            _cancel: &crate::cancel::CancellationToken,
        ) -> anyhow::Result<crate::model::Page> {
            let (range, next) = match cursor {
                None | Some("again") => (0..10, if cursor.is_none() { "again" } else { "more" }),
                _ => (10..40, ""),
            };
            Ok(crate::model::Page {
                items: range.map(|n| crate::data::mock_item("featured", n)).collect(),
                next_cursor: (!next.is_empty()).then(|| next.to_string()),
            })
        }

        fn fetch_search(
            &self,
            term: &str,
            _limit: usize,
            _cursor: Option<&str>,
            _cancel: &crate::cancel::CancellationToken,
        ) -> anyhow::Result<crate::model::Page> {
            anyhow::bail!("no search for {term}")
        }
    }

    #[test]
    fn page_of_duplicates_does_not_stall_prefetch() {
        let mut picker = Picker::new(Options {
            service: Arc::new(RepeatingService),
            fetcher: Arc::new(MockMediaFetcher::new(16)),
            recents: Arc::new(StaticRecents::default()),
            cache: Arc::new(MediaCache::default()),
            config: Config::default(),
        });
        picker.set_viewport(400.0);
        assert!(picker.settle(Duration::from_secs(5)));

        let state = picker.feed_state();
        assert_eq!(state.items.len(), 40);
        assert!(!state.has_next_page);
    }

    #[test]
    fn close_drops_in_flight_work() {
        let mut h = harness_with(
            MockGifService::new(100).with_latency(Duration::from_millis(200)),
            Vec::new(),
        );
        assert!(h.picker.feed_state().pending);
        h.picker.close();
        assert!(!h.picker.feed_state().pending);
        assert!(!h.picker.tick(Instant::now()));
        thread::sleep(Duration::from_millis(250));
        assert!(!h.picker.tick(Instant::now()));
        assert!(h.picker.feed_state().items.is_empty());
    }
}
