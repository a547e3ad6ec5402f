// src/models/cursor.rs

//! Per-source pagination state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::SourceKind;

/// Pagination progress through one source's result set.
///
/// Owned by the orchestrator and persisted in the cache store so an
/// interrupted run resumes from the last committed page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FetchCursor {
    /// Which source this cursor tracks
    pub source: SourceKind,

    /// Opaque page token. `None` means "start from the first page".
    pub token: Option<String>,

    /// Set once the source reports no further pages
    pub completed: bool,

    /// Timestamp of the last successfully committed page
    pub last_success_at: Option<DateTime<Utc>>,
}

impl FetchCursor {
    /// Fresh cursor at the start of a source.
    pub fn new(source: SourceKind) -> Self {
        Self {
            source,
            token: None,
            completed: false,
            last_success_at: None,
        }
    }

    /// Advance past a successfully committed page.
    ///
    /// A `None` next token finalizes the cursor.
    pub fn advance(&mut self, next: Option<String>) {
        self.completed = next.is_none();
        self.token = next;
        self.last_success_at = Some(Utc::now());
    }
}

/// Lifecycle of one source within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourcePhase {
    /// Not yet driven (disabled, or already complete in the cache)
    NotStarted,
    /// Actively paging
    Fetching,
    /// Stopped between pages by the cancellation signal
    Paused,
    /// Stopped early: auth failure or retry budget spent. Partial data.
    Exhausted,
    /// Source reported no further pages
    Completed,
}

impl SourcePhase {
    /// Terminal phases end a source's task for this run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SourcePhase::Paused | SourcePhase::Exhausted | SourcePhase::Completed
        )
    }
}
