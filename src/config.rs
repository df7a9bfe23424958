use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::cache;
use crate::data;
use crate::layout::LayoutConfig;
use crate::media;
use crate::model::Section;
use crate::query;

const DEFAULT_ENV_PREFIX: &str = "GIF_PICKER";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub picker: PickerConfig,
    #[serde(default)]
    pub layout: LayoutConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PickerConfig {
    #[serde(default = "default_debounce", with = "humantime_serde")]
    pub debounce: Duration,
    #[serde(default = "default_first_page_size")]
    pub first_page_size: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default)]
    pub default_section: Section,
}

impl Default for PickerConfig {
    fn default() -> Self {
        Self {
            debounce: default_debounce(),
            first_page_size: default_first_page_size(),
            page_size: default_page_size(),
            default_section: Section::default(),
        }
    }
}

fn default_debounce() -> Duration {
    query::DEFAULT_DEBOUNCE
}

fn default_first_page_size() -> usize {
    data::DEFAULT_FIRST_PAGE_SIZE
}

fn default_page_size() -> usize {
    data::DEFAULT_PAGE_SIZE
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaConfig {
    #[serde(default = "default_cache_max_bytes")]
    pub cache_max_bytes: usize,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            cache_max_bytes: default_cache_max_bytes(),
            workers: default_workers(),
            timeout: default_timeout(),
        }
    }
}

fn default_cache_max_bytes() -> usize {
    cache::DEFAULT_MAX_BYTES
}

fn default_workers() -> usize {
    media::DEFAULT_WORKERS
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogConfig {
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_log_filter() -> String {
    "gif_picker=info".into()
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

pub fn load(options: LoadOptions) -> Result<Config> {
    let mut cfg = Config::default();

    if let Some(path) = options.config_file.as_ref() {
        if path.exists() {
            let from_file = read_config_file(path)?;
            cfg = merge_config(cfg, from_file);
        }
    } else if let Some(default_path) = default_config_path() {
        if default_path.exists() {
            let from_file = read_config_file(&default_path)?;
            cfg = merge_config(cfg, from_file);
        }
    }

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    apply_env(&mut cfg, prefix);

    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
    Ok(config)
}

fn merge_config(mut base: Config, other: Config) -> Config {
    base.picker.debounce = other.picker.debounce;
    if other.picker.first_page_size != 0 {
        base.picker.first_page_size = other.picker.first_page_size;
    }
    if other.picker.page_size != 0 {
        base.picker.page_size = other.picker.page_size;
    }
    base.picker.default_section = other.picker.default_section;

    if other.layout.lanes != 0 {
        base.layout.lanes = other.layout.lanes;
    }
    if other.layout.item_width > 0.0 {
        base.layout.item_width = other.layout.item_width;
    }
    if other.layout.gap >= 0.0 {
        base.layout.gap = other.layout.gap;
    }
    base.layout.overscan_per_lane = other.layout.overscan_per_lane;

    if other.media.cache_max_bytes != 0 {
        base.media.cache_max_bytes = other.media.cache_max_bytes;
    }
    if other.media.workers != 0 {
        base.media.workers = other.media.workers;
    }
    if !other.media.timeout.is_zero() {
        base.media.timeout = other.media.timeout;
    }

    if !other.log.filter.trim().is_empty() {
        base.log.filter = other.log.filter;
    }

    base
}

fn apply_env(cfg: &mut Config, prefix: &str) {
    let mut map: HashMap<String, String> = HashMap::new();
    let upper_prefix = format!("{}_", prefix.to_uppercase());

    for (key, value) in env::vars() {
        if let Some(stripped) = key.strip_prefix(&upper_prefix) {
            let normalized = stripped.to_ascii_lowercase().replace("__", ".");
            map.insert(normalized, value);
        }
    }

    for (key, value) in map {
        apply_env_value(cfg, &key, value);
    }
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "picker.debounce" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.picker.debounce = duration;
            }
        }
        "picker.first_page_size" => {
            if let Ok(parsed) = value.parse::<usize>() {
                cfg.picker.first_page_size = parsed.max(1);
            }
        }
        "picker.page_size" => {
            if let Ok(parsed) = value.parse::<usize>() {
                cfg.picker.page_size = parsed.max(1);
            }
        }
        "picker.default_section" => {
            if let Ok(section) = value.parse::<Section>() {
                cfg.picker.default_section = section;
            }
        }
        "layout.lanes" => {
            if let Ok(parsed) = value.parse::<usize>() {
                cfg.layout.lanes = parsed.max(1);
            }
        }
        "layout.item_width" => {
            if let Ok(parsed) = value.parse::<f32>() {
                cfg.layout.item_width = parsed;
            }
        }
        "layout.gap" => {
            if let Ok(parsed) = value.parse::<f32>() {
                cfg.layout.gap = parsed;
            }
        }
        "layout.overscan_per_lane" => {
            if let Ok(parsed) = value.parse::<usize>() {
                cfg.layout.overscan_per_lane = parsed;
            }
        }
        "media.cache_max_bytes" => {
            if let Ok(parsed) = value.parse::<usize>() {
                cfg.media.cache_max_bytes = parsed;
            }
        }
        "media.workers" => {
            if let Ok(parsed) = value.parse::<usize>() {
                cfg.media.workers = parsed;
            }
        }
        "media.timeout" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.media.timeout = duration;
            }
        }
        "log.filter" => cfg.log.filter = value,
        _ => {}
    }
}

pub fn default_path() -> Option<PathBuf> {
    default_config_path()
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("gif-picker").join("config.yaml"))
}
