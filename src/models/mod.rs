// src/models/mod.rs

//! Domain models for the harvester application.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod config;
mod cursor;
mod record;
mod report;

// Re-export all public types
pub use config::{ArchiveConfig, CacheConfig, Config, FetcherConfig, FlickrConfig};
pub use cursor::{FetchCursor, SourcePhase};
pub use record::{RawRecord, SourceKind, UnifiedRecord};
pub use report::{MergeDecision, RunReport, SourceReport};
