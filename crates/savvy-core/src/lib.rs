//! Core domain + application logic for the VideoSavvy Telegram bot.
//!
//! Framework-agnostic: Telegram and the media engine (yt-dlp) live behind
//! ports (traits) implemented in adapter crates.

pub mod broadcast;
pub mod config;
pub mod conversation;
pub mod domain;
pub mod download;
pub mod errors;
pub mod formatting;
pub mod gate;
pub mod logging;
pub mod media;
pub mod messaging;
pub mod registry;
pub mod resolve;
pub mod session;
pub mod settings;
pub mod ui;

#[cfg(test)]
pub(crate) mod testing;

pub use errors::{Error, Result};
