use std::time::{Duration, Instant};

use tracing::debug;

use crate::model::{Query, Section};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Outbound notifications produced while reducing user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    SearchTextChanged(String),
    SectionChanged(Section),
    /// A new stabilized query is active and must be fetched.
    QueryApplied(Query),
}

#[derive(Debug, Clone)]
struct PendingQuery {
    query: Query,
    deadline: Instant,
}

/// Turns raw search text / section edits into a stabilized query.
///
/// `current` is the live input, `active` the debounced value driving fetches.
/// At most one pending application exists; every edit replaces it.
#[derive(Debug)]
pub struct QueryController {
    current: Query,
    active: Query,
    pending: Option<PendingQuery>,
    debounce: Duration,
    has_recents: bool,
    default_section: Section,
}

impl QueryController {
    pub fn new(initial: Query, debounce: Duration) -> Self {
        Self {
            current: initial.clone(),
            active: initial,
            pending: None,
            debounce,
            has_recents: false,
            default_section: Section::Trending,
        }
    }

    pub fn with_recents(mut self, has_recents: bool) -> Self {
        self.has_recents = has_recents;
        self
    }

    pub fn with_default_section(mut self, section: Section) -> Self {
        self.default_section = section;
        self
    }

    pub fn set_has_recents(&mut self, has_recents: bool) {
        self.has_recents = has_recents;
    }

    pub fn current(&self) -> &Query {
        &self.current
    }

    pub fn active(&self) -> &Query {
        &self.active
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|pending| pending.deadline)
    }

    /// Section shown when the search box is cleared.
    pub fn resting_section(&self) -> Section {
        if self.has_recents {
            Section::Recents
        } else {
            self.default_section
        }
    }

    /// Search box edit. Entering text switches to search results, clearing it
    /// falls back to recents (or the default category).
    pub fn set_search_text(&mut self, text: &str, now: Instant) -> Vec<ControllerEvent> {
        let mut events = Vec::new();
        if text == self.current.search_text {
            return events;
        }

        let was_empty = self.current.search_text.is_empty();
        let mut section = self.current.selected_section;
        if was_empty && !text.is_empty() {
            section = Section::SearchResults;
        } else if !was_empty && text.is_empty() {
            section = self.resting_section();
        }

        events.push(ControllerEvent::SearchTextChanged(text.to_string()));
        if section != self.current.selected_section {
            events.push(ControllerEvent::SectionChanged(section));
        }
        events.extend(self.request(Query::new(section, text), now));
        events
    }

    /// Category pick from the sub-navigation. Clears any search text so the
    /// switch applies immediately.
    pub fn select_section(&mut self, section: Section, now: Instant) -> Vec<ControllerEvent> {
        let mut events = Vec::new();
        if !self.current.search_text.is_empty() {
            events.push(ControllerEvent::SearchTextChanged(String::new()));
        }
        if section != self.current.selected_section {
            events.push(ControllerEvent::SectionChanged(section));
        }
        events.extend(self.request(Query::new(section, ""), now));
        events
    }

    /// Core reduction: record `requested` as the live input and decide when
    /// (if ever) it becomes active.
    pub fn request(&mut self, requested: Query, now: Instant) -> Option<ControllerEvent> {
        self.current = requested.clone();

        if requested == self.active {
            if self.pending.take().is_some() {
                debug!("debounced query superseded by the active one");
            }
            return None;
        }

        if requested.search_text.is_empty() {
            self.pending = None;
            return Some(self.apply(requested));
        }

        debug!(text = %requested.search_text, "debouncing query");
        self.pending = Some(PendingQuery {
            query: requested,
            deadline: now + self.debounce,
        });
        None
    }

    /// Applies the pending query once its window has elapsed.
    pub fn poll(&mut self, now: Instant) -> Option<ControllerEvent> {
        let due = self
            .pending
            .as_ref()
            .map(|pending| now >= pending.deadline)
            .unwrap_or(false);
        if !due {
            return None;
        }
        let pending = self.pending.take()?;
        Some(self.apply(pending.query))
    }

    /// Drops the pending application without applying it.
    pub fn cancel(&mut self) {
        self.pending = None;
    }

    fn apply(&mut self, query: Query) -> ControllerEvent {
        debug!(section = %query.selected_section, text = %query.search_text, "query applied");
        self.active = query.clone();
        ControllerEvent::QueryApplied(query)
    }
}
