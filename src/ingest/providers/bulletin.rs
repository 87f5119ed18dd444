// src/ingest/providers/bulletin.rs
//! JSON bulletin parser (exchange / regulator notices).
//!
//! Accepts a bare array of entries or an object with an `items` array,
//! which is also the layout the per-source audit files are written in.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;

use crate::ingest::types::{DocumentParser, RawEntry};

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BulletinDoc {
    Wrapped { items: Vec<Value> },
    List(Vec<Value>),
}

/// Fields are read as raw values so one odd entry cannot sink the document.
#[derive(Debug, Default, Deserialize)]
struct BulletinEntry {
    title: Option<Value>,
    summary: Option<Value>,
    content: Option<Value>,
    description: Option<Value>,
    url: Option<Value>,
    link: Option<Value>,
    published_at: Option<Value>,
    published: Option<Value>,
    date: Option<Value>,
}

/// Strings pass through; integers become unix-seconds text.
fn date_text(v: Option<Value>) -> Option<String> {
    match v? {
        Value::String(s) if !s.trim().is_empty() => Some(s),
        Value::Number(n) => n.as_i64().map(|i| i.to_string()),
        _ => None,
    }
}

/// Non-blank strings only; anything else counts as missing.
fn non_empty(v: Option<Value>) -> Option<String> {
    match v? {
        Value::String(s) if !s.trim().is_empty() => Some(s),
        _ => None,
    }
}

/// Parser for `type = "bulletin"` sources.
#[derive(Debug, Default, Clone, Copy)]
pub struct BulletinParser;

impl DocumentParser for BulletinParser {
    fn parse(&self, body: &str) -> Result<Vec<RawEntry>> {
        let doc: BulletinDoc = serde_json::from_str(body).context("parsing bulletin json")?;
        let items = match doc {
            BulletinDoc::Wrapped { items } => items,
            BulletinDoc::List(items) => items,
        };
        Ok(items
            .into_iter()
            .map(|v| serde_json::from_value::<BulletinEntry>(v).unwrap_or_default())
            .map(|b| RawEntry {
                title: non_empty(b.title),
                summary: non_empty(b.summary)
                    .or_else(|| non_empty(b.content))
                    .or_else(|| non_empty(b.description)),
                link: non_empty(b.url).or_else(|| non_empty(b.link)),
                published: date_text(b.published_at)
                    .or_else(|| date_text(b.published))
                    .or_else(|| date_text(b.date)),
            })
            .collect())
    }

    fn name(&self) -> &'static str {
        "bulletin"
    }
}
