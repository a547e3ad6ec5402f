// src/storage/mod.rs

//! Cache store abstractions.
//!
//! The cache is the pipeline's only durable state: per-source fetch cursors
//! plus the merged record set. A run interrupted mid-page resumes from the
//! last committed cursor without losing or re-processing committed records.
//!
//! ## Storage Layout
//!
//! ```text
//! {root}/
//! ├── config.toml           # Pipeline configuration
//! ├── cursors.json          # Per-source pagination state
//! └── records.json          # Merged record set, in merge order
//! ```

pub mod local;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{FetchCursor, UnifiedRecord};

// Re-export for convenience
pub use local::JsonCacheStore;

/// Everything the cache holds, as loaded at pipeline start.
#[derive(Debug, Clone, Default)]
pub struct CacheSnapshot {
    pub cursors: Vec<FetchCursor>,
    pub records: Vec<UnifiedRecord>,
}

/// Envelope for records.json.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheData {
    /// ISO 8601 timestamp of last update
    pub updated_at: DateTime<Utc>,
    /// Total record count
    pub count: usize,
    /// The records, in merge order
    pub records: Vec<UnifiedRecord>,
}

impl CacheData {
    pub fn new(records: Vec<UnifiedRecord>) -> Self {
        Self {
            updated_at: Utc::now(),
            count: records.len(),
            records,
        }
    }
}

/// Trait for cache store backends.
///
/// Commits must be atomic and idempotent: committing the same cursors and
/// records twice leaves the stored state unchanged. Write failures are
/// fatal to the whole run (`AppError::CacheWrite`).
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Load the committed state. Empty on first run.
    async fn load(&self) -> Result<CacheSnapshot>;

    /// Durably commit the cursor table and the full record set.
    async fn commit(&self, cursors: &[FetchCursor], records: &[UnifiedRecord]) -> Result<()>;
}
