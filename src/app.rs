use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use tracing::info;

use crate::cache::MediaCache;
use crate::config;
use crate::data::{HttpMediaFetcher, MediaFetcher, MockGifService, MockMediaFetcher, StaticRecents};
use crate::logging;
use crate::model::Section;
use crate::picker::{Options, Picker, PickerEvent, Snapshot};

const SETTLE_TIMEOUT: Duration = Duration::from_secs(10);
const MOCK_CATALOGUE_SIZE: usize = 200;
const MOCK_PAYLOAD_BYTES: usize = 4 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    pub search: Option<String>,
    pub section: Option<Section>,
    pub scroll: Option<f32>,
    pub viewport: f32,
    pub select: Option<usize>,
    pub json: bool,
    /// Download previews over HTTP instead of the in-memory fetcher.
    pub http_media: bool,
    pub config_file: Option<PathBuf>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            search: None,
            section: None,
            scroll: None,
            viewport: 600.0,
            select: None,
            json: false,
            http_media: false,
            config_file: None,
        }
    }
}

/// Runs one headless picker session against the built-in mock catalogue and
/// prints the rendered window.
pub fn run(options: RunOptions) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    run_with(options, &mut out)
}

pub fn run_with(options: RunOptions, out: &mut dyn Write) -> Result<()> {
    let cfg = config::load(config::LoadOptions {
        config_file: options.config_file.clone(),
        env_prefix: None,
    })
    .context("load config")?;
    logging::init(&cfg.log.filter);
    let config_path = options.config_file.clone().or_else(config::default_path);
    info!(config = %friendly_path(config_path.as_ref()), "starting picker session");

    let fetcher: Arc<dyn MediaFetcher> = if options.http_media {
        Arc::new(HttpMediaFetcher::new(cfg.media.timeout).context("build media client")?)
    } else {
        Arc::new(MockMediaFetcher::new(MOCK_PAYLOAD_BYTES))
    };
    let debounce = cfg.picker.debounce;
    let mut picker = Picker::new(Options {
        service: Arc::new(MockGifService::new(MOCK_CATALOGUE_SIZE)),
        fetcher,
        recents: Arc::new(StaticRecents::default()),
        cache: Arc::new(MediaCache::new(cfg.media.cache_max_bytes)),
        config: cfg,
    });
    let events = picker.events();
    picker.set_viewport(options.viewport);

    let now = Instant::now();
    if let Some(section) = options.section {
        picker.on_section_change(section, now);
    }
    if let Some(text) = options.search.as_deref() {
        picker.on_search_text_change(text, now);
        // Headless: skip the wall-clock wait for the debounce window.
        picker.tick(now + debounce);
    }
    settle(&mut picker)?;

    if let Some(offset) = options.scroll {
        picker.scroll_to(offset);
        settle(&mut picker)?;
    }

    let snapshot = picker.snapshot();
    if let Some(index) = options.select {
        if !picker.select(index) {
            bail!("no item at index {index} ({} loaded)", snapshot.item_count);
        }
    }

    if options.json {
        let selection = events.try_iter().find_map(|event| match event {
            PickerEvent::ItemSelected(selection) => Some(selection),
            _ => None,
        });
        let body = serde_json::json!({
            "snapshot": snapshot,
            "selection": selection,
        });
        writeln!(out, "{}", serde_json::to_string_pretty(&body)?)?;
    } else {
        write_text(out, &snapshot)?;
        for event in events.try_iter() {
            match event {
                PickerEvent::ItemSelected(selection) => {
                    writeln!(out, "selected {} {}", selection.id, selection.url)?
                }
                PickerEvent::CloseRequested => writeln!(out, "close requested")?,
                PickerEvent::SearchTextChanged(_) | PickerEvent::SectionChanged(_) => {}
            }
        }
    }

    picker.close();
    Ok(())
}

fn settle(picker: &mut Picker) -> Result<()> {
    if !picker.settle(SETTLE_TIMEOUT) {
        bail!("picker did not settle within {:?}", SETTLE_TIMEOUT);
    }
    let state = picker.feed_state();
    if state.rejected {
        bail!("loading results failed");
    }
    Ok(())
}

fn write_text(out: &mut dyn Write, snapshot: &Snapshot) -> io::Result<()> {
    let query = &snapshot.query;
    writeln!(
        out,
        "section: {}  search: {:?}  items: {}  more: {}",
        query.selected_section,
        query.search_text,
        snapshot.item_count,
        if snapshot.has_next_page { "yes" } else { "no" }
    )?;
    writeln!(
        out,
        "scroll: {:.0}/{:.0}",
        snapshot.scroll_offset, snapshot.content_extent
    )?;
    for item in &snapshot.visible {
        let marker = if item.tabbable { '*' } else { ' ' };
        writeln!(
            out,
            "{marker}{:>4}  lane {}  {:>7.1} +{:>5.1}  {:<8} {}",
            item.index,
            item.lane,
            item.offset,
            item.size,
            format!("{:?}", item.media).to_lowercase(),
            item.id
        )?;
    }
    Ok(())
}

fn friendly_path(path: Option<&PathBuf>) -> String {
    if let Some(path) = path {
        if let Some(home) = dirs::home_dir() {
            if let Ok(stripped) = path.strip_prefix(&home) {
                let mut display = String::from("~");
                if !stripped.as_os_str().is_empty() {
                    display.push_str(&format!("/{}", stripped.display()));
                }
                return display;
            }
        }
        path.display().to_string()
    } else {
        "~/.config/gif-picker/config.yaml".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn isolated() -> RunOptions {
        RunOptions {
            config_file: Some(PathBuf::from("/nonexistent/gif-picker.yaml")),
            ..RunOptions::default()
        }
    }

    fn render(options: RunOptions) -> String {
        let mut buf = Vec::new();
        run_with(options, &mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn default_session_shows_trending() {
        let text = render(isolated());
        assert!(text.starts_with("section: trending"));
        assert!(text.contains("featured-0"));
        assert!(text.contains("ready"));
    }

    #[test]
    fn search_session_prints_json() {
        let text = render(RunOptions {
            search: Some("party cat".into()),
            json: true,
            ..isolated()
        });
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            value["snapshot"]["query"]["selected_section"],
            "search-results"
        );
        assert_eq!(value["snapshot"]["query"]["search_text"], "party cat");
        assert!(value["snapshot"]["visible"][0]["id"]
            .as_str()
            .unwrap()
            .starts_with("party-cat-"));
        assert!(value["selection"].is_null());
    }

    #[test]
    fn selecting_reports_the_attachment() {
        let text = render(RunOptions {
            section: Some(Section::Love),
            select: Some(3),
            ..isolated()
        });
        assert!(text.contains("selected love-3 https://media.example.test/love/3/full.mp4"));
        assert!(text.trim_end().ends_with("close requested"));
    }

    #[test]
    fn selecting_past_the_end_fails() {
        let mut buf = Vec::new();
        let err = run_with(
            RunOptions {
                select: Some(10_000),
                ..isolated()
            },
            &mut buf,
        )
        .unwrap_err();
        assert!(err.to_string().contains("no item at index 10000"));
    }

    #[test]
    fn friendly_path_falls_back() {
        assert_eq!(friendly_path(None), "~/.config/gif-picker/config.yaml");
    }
}
