// src/ingest/types.rs
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::sync::Arc;

use crate::config::SourceConfig;

/// One fetched payload, owned by the fetch stage and consumed by normalization.
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub source: Arc<SourceConfig>,
    /// URL the payload was fetched from (base for relative links).
    pub url: String,
    pub body: String,
    pub fetched_at: DateTime<Utc>,
}

/// A parsed news item with a UTC timestamp and a canonical URL.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedItem {
    pub source_id: String,
    pub source_domain: String,
    #[serde(with = "crate::iso_utc")]
    pub published_at: DateTime<Utc>,
    /// Zone the source publishes in, kept as metadata.
    pub source_timezone: Tz,
    /// `true` when the feed gave no usable date and fetch time was used.
    pub published_fallback: bool,
    pub url: String,
    pub title: Option<String>,
    pub summary: String,
}

impl NormalizedItem {
    /// Deterministic processing order: oldest first, then source, then URL.
    pub fn order_key(&self) -> (DateTime<Utc>, &str, &str) {
        (self.published_at, self.source_id.as_str(), self.url.as_str())
    }
}

/// An entry as read from a document, before timestamp and URL normalization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawEntry {
    pub title: Option<String>,
    pub summary: Option<String>,
    pub link: Option<String>,
    pub published: Option<String>,
}

/// Per-source-type document parser.
pub trait DocumentParser: Send + Sync {
    /// Extract entries from a payload. Errors mean the whole document is malformed.
    fn parse(&self, body: &str) -> anyhow::Result<Vec<RawEntry>>;
    fn name(&self) -> &'static str;
}

/// Per-run outcome of one source, reported in audit files and `/debug/last-run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Ok,
    /// Some URLs or documents failed, others produced items.
    Partial,
    Unavailable,
    ParseFailure,
}

impl SourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceStatus::Ok => "ok",
            SourceStatus::Partial => "partial",
            SourceStatus::Unavailable => "unavailable",
            SourceStatus::ParseFailure => "parse_failure",
        }
    }
}
