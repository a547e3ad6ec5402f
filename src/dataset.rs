// src/dataset.rs

//! Read-only dataset handle.
//!
//! The handoff to analysis code: an ordered view over the committed
//! records, exportable as a CSV table for notebooks.

use std::path::Path;

use crate::error::Result;
use crate::models::UnifiedRecord;

/// Separator used when flattening the tag list into one CSV column.
const TAG_SEPARATOR: &str = "|";

/// The final ordered record sequence of a run. Insertion order is merge
/// order.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    records: Vec<UnifiedRecord>,
}

impl Dataset {
    pub fn from_records(records: Vec<UnifiedRecord>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[UnifiedRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &UnifiedRecord> {
        self.records.iter()
    }

    /// Write the dataset as a CSV table.
    ///
    /// One row per record, columns matching the unified schema; tags are
    /// joined with `|`. Returns the number of rows written.
    pub fn write_csv(&self, path: impl AsRef<Path>) -> Result<usize> {
        let mut writer = csv::Writer::from_path(path.as_ref())?;
        writer.write_record([
            "id",
            "title",
            "author",
            "created_at",
            "tags",
            "media_url",
            "source",
        ])?;

        for record in &self.records {
            let created_at = record
                .created_at
                .map(|dt| dt.to_rfc3339())
                .unwrap_or_default();
            let tags = record.tags.join(TAG_SEPARATOR);
            writer.write_record([
                record.id.as_str(),
                record.title.as_deref().unwrap_or(""),
                record.author.as_deref().unwrap_or(""),
                created_at.as_str(),
                tags.as_str(),
                record.media_url.as_str(),
                record.source.as_str(),
            ])?;
        }

        writer.flush().map_err(crate::error::AppError::Io)?;
        Ok(self.records.len())
    }
}
