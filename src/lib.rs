//! mediadupe - duplicate and similar media detection
//!
//! Groups byte-identical photos and videos by content signature and visually
//! similar images by perceptual hash. Every fingerprint is cached in SQLite
//! and keyed by path, size and modification second, so a rescan only touches
//! files that changed.

pub mod app;
pub mod cache;
pub mod cli;
pub mod config;
pub mod duplicates;
pub mod error;
pub mod logging;
pub mod media;
pub mod progress;
pub mod repository;
pub mod results;
pub mod scanner;
pub mod session;
pub mod signal;

pub use app::run_app;
