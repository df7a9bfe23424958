#![allow(clippy::uninlined_format_args)]

pub mod app;
pub mod cache;
pub mod cancel;
pub mod config;
pub mod data;
pub mod keyboard;
pub mod layout;
pub mod logging;
pub mod media;
pub mod model;
pub mod pagination;
pub mod picker;
pub mod query;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::run;
