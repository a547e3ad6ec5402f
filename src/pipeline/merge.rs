// src/pipeline/merge.rs

//! Deduplication and merging.
//!
//! [`DedupMerger`] accumulates the canonical record set in insertion order.
//! Same-id collisions update the existing record; cross-source lookalikes
//! (same similarity key, different source) are kept side by side because
//! source-specific provenance must survive for analysis. Given the same
//! batches in the same order the outcome is reproducible, and similarity
//! ties always resolve to the earliest-seen record.

use std::collections::HashMap;

use sha2::{Digest, Sha256};

use crate::models::{MergeDecision, UnifiedRecord};

/// Accumulating canonical record set.
#[derive(Debug, Default)]
pub struct DedupMerger {
    records: Vec<UnifiedRecord>,
    by_id: HashMap<String, usize>,
    /// Similarity key -> index of the earliest record carrying it
    by_similarity: HashMap<String, usize>,
}

impl DedupMerger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the merger from previously committed records, preserving
    /// their order so resumed runs merge identically.
    pub fn from_records(records: Vec<UnifiedRecord>) -> Self {
        let mut merger = Self::new();
        for record in records {
            merger.absorb(record);
        }
        merger
    }

    /// Records in merge order.
    pub fn records(&self) -> &[UnifiedRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_records(self) -> Vec<UnifiedRecord> {
        self.records
    }

    /// Fold one normalized record into the set.
    pub fn absorb(&mut self, record: UnifiedRecord) -> MergeDecision {
        if let Some(&index) = self.by_id.get(&record.id) {
            merge_into(&mut self.records[index], record);
            return MergeDecision::Updated;
        }

        let similarity = similarity_key(&record);
        let duplicate_of = similarity.as_ref().and_then(|key| {
            self.by_similarity
                .get(key)
                .map(|&index| &self.records[index])
                .filter(|earlier| earlier.source != record.source)
                .map(|earlier| earlier.id.clone())
        });

        let index = self.records.len();
        self.by_id.insert(record.id.clone(), index);
        if let Some(key) = similarity {
            // First carrier stays canonical for this key.
            self.by_similarity.entry(key).or_insert(index);
        }
        self.records.push(record);

        match duplicate_of {
            Some(canonical_id) => MergeDecision::CrossSourceDuplicate { canonical_id },
            None => MergeDecision::Inserted,
        }
    }
}

/// Overwrite fields that are non-null in the incoming record; tags become
/// the union of both, first-seen order preserved.
fn merge_into(existing: &mut UnifiedRecord, incoming: UnifiedRecord) {
    if incoming.title.is_some() {
        existing.title = incoming.title;
    }
    if incoming.author.is_some() {
        existing.author = incoming.author;
    }
    if incoming.created_at.is_some() {
        existing.created_at = incoming.created_at;
    }
    for tag in incoming.tags {
        if !existing.tags.contains(&tag) {
            existing.tags.push(tag);
        }
    }
    existing.media_url = incoming.media_url;
    existing.raw = incoming.raw;
    existing.fetched_at = incoming.fetched_at;
}

/// Conservative cross-source identity: normalized title, lowercased author,
/// and the creation timestamp truncated to the hour. Records missing a
/// title or timestamp never participate.
fn similarity_key(record: &UnifiedRecord) -> Option<String> {
    let title = record.title.as_deref()?;
    let created_at = record.created_at?;

    let title = title.to_lowercase();
    let title = title.split_whitespace().collect::<Vec<_>>().join(" ");
    let author = record
        .author
        .as_deref()
        .map(str::to_lowercase)
        .unwrap_or_default();
    let hour = created_at.format("%Y-%m-%dT%H");

    let digest = Sha256::digest(format!("{title}|{author}|{hour}"));
    Some(hex::encode(digest))
}
