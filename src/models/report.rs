// src/models/report.rs

//! Run outcome reporting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{SourceKind, SourcePhase};

/// How the merger resolved one incoming record.
///
/// Ephemeral: logged and counted, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeDecision {
    /// Unseen id, appended to the dataset
    Inserted,
    /// Same id already present; non-null fields overwritten, tags unioned
    Updated,
    /// Different id but same similarity key as an earlier record from the
    /// other source. Both records are kept.
    CrossSourceDuplicate { canonical_id: String },
}

/// Per-source accounting for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceReport {
    pub source: SourceKind,
    pub phase: SourcePhase,
    pub pages: usize,
    pub fetched: usize,
    pub normalized: usize,
    pub skipped: usize,
    /// Message of the error that ended the source, if any
    pub error: Option<String>,
}

impl SourceReport {
    pub fn new(source: SourceKind) -> Self {
        Self {
            source,
            phase: SourcePhase::NotStarted,
            pages: 0,
            fetched: 0,
            normalized: 0,
            skipped: 0,
            error: None,
        }
    }
}

/// Summary of a full pipeline run. Always produced, even on partial failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub sources: Vec<SourceReport>,
    pub inserted: usize,
    pub updated: usize,
    pub cross_source_duplicates: usize,
    /// Records in the dataset after the run
    pub dataset_len: usize,
}

impl RunReport {
    /// True when any source ended without completing its result set.
    ///
    /// Surfaced to the caller as a warning status, not an error.
    pub fn has_warnings(&self) -> bool {
        self.sources
            .iter()
            .any(|s| matches!(s.phase, SourcePhase::Exhausted | SourcePhase::Paused))
    }

    pub fn total_fetched(&self) -> usize {
        self.sources.iter().map(|s| s.fetched).sum()
    }

    pub fn total_skipped(&self) -> usize {
        self.sources.iter().map(|s| s.skipped).sum()
    }
}
