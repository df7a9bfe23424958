use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// One media asset variant (preview or full attachment).
///
/// Items hold their references behind an `Arc`; the allocation is what the
/// identity tier of the media cache keys on, the `url` is what the durable
/// tier keys on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaReference {
    pub url: String,
    pub width: u32,
    pub height: u32,
}

impl MediaReference {
    pub fn new<U: Into<String>>(url: U, width: u32, height: u32) -> Self {
        Self {
            url: url.into(),
            width,
            height,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub preview_media: Arc<MediaReference>,
    pub attachment_media: Arc<MediaReference>,
}

impl Item {
    pub fn selection(&self) -> Selection {
        Selection {
            id: self.id.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            url: self.attachment_media.url.clone(),
            width: self.attachment_media.width,
            height: self.attachment_media.height,
        }
    }
}

/// Payload handed to the surrounding panel when the user picks an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub id: String,
    pub title: String,
    pub description: String,
    pub url: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Section {
    Recents,
    #[default]
    Trending,
    Celebrate,
    Love,
    ThumbsUp,
    Surprised,
    Excited,
    Sad,
    Angry,
    SearchResults,
}

impl Section {
    /// Sections a user can pick from the sub-navigation, in display order.
    pub const ALL: [Section; 9] = [
        Section::Recents,
        Section::Trending,
        Section::Celebrate,
        Section::Love,
        Section::ThumbsUp,
        Section::Surprised,
        Section::Excited,
        Section::Sad,
        Section::Angry,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Section::Recents => "recents",
            Section::Trending => "trending",
            Section::Celebrate => "celebrate",
            Section::Love => "love",
            Section::ThumbsUp => "thumbs-up",
            Section::Surprised => "surprised",
            Section::Excited => "excited",
            Section::Sad => "sad",
            Section::Angry => "angry",
            Section::SearchResults => "search-results",
        }
    }

    /// Search term a mood category is dispatched as.
    pub fn search_term(&self) -> Option<&'static str> {
        match self {
            Section::Celebrate => Some("celebrate"),
            Section::Love => Some("love"),
            Section::ThumbsUp => Some("thumbs up"),
            Section::Surprised => Some("surprised"),
            Section::Excited => Some("excited"),
            Section::Sad => Some("sad"),
            Section::Angry => Some("angry"),
            Section::Recents | Section::Trending | Section::SearchResults => None,
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown section {0:?}")]
pub struct ParseSectionError(pub String);

impl FromStr for Section {
    type Err = ParseSectionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let key = value.trim().to_ascii_lowercase().replace('_', "-");
        Section::ALL
            .iter()
            .chain(std::iter::once(&Section::SearchResults))
            .find(|section| section.as_str() == key)
            .copied()
            .ok_or_else(|| ParseSectionError(value.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Query {
    pub selected_section: Section,
    pub search_text: String,
}

impl Query {
    pub fn new<S: Into<String>>(selected_section: Section, search_text: S) -> Self {
        Self {
            selected_section,
            search_text: search_text.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Page {
    pub items: Vec<Item>,
    pub next_cursor: Option<String>,
}

impl Page {
    pub fn has_next(&self) -> bool {
        self.next_cursor
            .as_deref()
            .map(|cursor| !cursor.trim().is_empty())
            .unwrap_or(false)
    }
}
