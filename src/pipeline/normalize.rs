// src/pipeline/normalize.rs

//! Record normalization.
//!
//! Pure per-source mappings from a raw payload into the unified schema.
//! Missing optional fields become `None`; a record without an identifier or
//! a media URL is rejected with a `Normalization` error that the
//! orchestrator logs and counts. A single bad record never aborts a page.

use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::models::{RawRecord, SourceKind, UnifiedRecord};

/// Normalize one raw record according to its source.
pub fn normalize(raw: &RawRecord) -> Result<UnifiedRecord> {
    match raw.source {
        SourceKind::Flickr => normalize_flickr(raw),
        SourceKind::Archive => normalize_archive(raw),
    }
}

/// Trim, lowercase, drop empties, and deduplicate preserving first-seen
/// order.
pub fn normalize_tags<'a, I>(parts: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = HashSet::new();
    let mut tags = Vec::new();
    for part in parts {
        let tag = part.trim().to_lowercase();
        if tag.is_empty() {
            continue;
        }
        if seen.insert(tag.clone()) {
            tags.push(tag);
        }
    }
    tags
}

fn normalize_flickr(raw: &RawRecord) -> Result<UnifiedRecord> {
    let source = SourceKind::Flickr;
    let payload = &raw.payload;

    let native_id = str_field(payload, "id")
        .ok_or_else(|| AppError::normalization(source, "photo without id"))?;

    let media_url = flickr_media_url(payload).ok_or_else(|| {
        AppError::normalization(source, format!("photo {native_id} has no media URL"))
    })?;

    // Flickr tags come as one space-delimited string.
    let tags = str_field(payload, "tags")
        .map(|t| normalize_tags(t.split(' ')))
        .unwrap_or_default();

    Ok(UnifiedRecord {
        id: UnifiedRecord::qualified_id(source, native_id),
        title: non_empty(str_field(payload, "title")),
        author: non_empty(str_field(payload, "ownername")),
        created_at: str_field(payload, "datetaken").and_then(parse_flickr_datetime),
        tags,
        media_url,
        source,
        raw: raw.payload.clone(),
        fetched_at: raw.fetched_at,
    })
}

fn normalize_archive(raw: &RawRecord) -> Result<UnifiedRecord> {
    let source = SourceKind::Archive;
    let payload = &raw.payload;

    let identifier = str_field(payload, "identifier")
        .ok_or_else(|| AppError::normalization(source, "item without identifier"))?;

    // Subjects arrive as a semicolon-joined string or as an array of them.
    let tags = normalize_tags(
        string_or_list(payload.get("subject"))
            .iter()
            .flat_map(|s| s.split(';')),
    );

    Ok(UnifiedRecord {
        id: UnifiedRecord::qualified_id(source, identifier),
        title: non_empty(string_or_list(payload.get("title")).into_iter().next()),
        author: non_empty(string_or_list(payload.get("creator")).into_iter().next()),
        created_at: str_field(payload, "date").and_then(parse_archive_date),
        tags,
        media_url: format!("https://archive.org/download/{identifier}"),
        source,
        raw: raw.payload.clone(),
        fetched_at: raw.fetched_at,
    })
}

/// Prefer the sized URL from `extras`; otherwise assemble the static photo
/// URL from its parts.
fn flickr_media_url(payload: &Value) -> Option<String> {
    if let Some(url) = str_field(payload, "url_m") {
        return Some(url.to_string());
    }

    let id = str_field(payload, "id")?;
    let server = str_field(payload, "server")?;
    let secret = str_field(payload, "secret")?;
    Some(format!(
        "https://live.staticflickr.com/{server}/{id}_{secret}.jpg"
    ))
}

/// `datetaken` is a naive local timestamp like `2012-05-01 14:30:00`.
fn parse_flickr_datetime(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Archive dates vary: RFC 3339, `YYYY-MM-DD`, or a bare year.
fn parse_archive_date(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
    }
    if let Ok(year) = s.parse::<i32>() {
        return NaiveDate::from_ymd_opt(year, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc());
    }
    None
}

fn str_field<'a>(payload: &'a Value, key: &str) -> Option<&'a str> {
    payload.get(key).and_then(|v| v.as_str())
}

/// Accept either a JSON string or an array of strings.
fn string_or_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

fn non_empty<S: Into<String>>(value: Option<S>) -> Option<String> {
    value.map(Into::into).filter(|s| !s.trim().is_empty())
}
