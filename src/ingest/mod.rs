// src/ingest/mod.rs
pub mod canonical;
pub mod fetcher;
pub mod providers;
pub mod sink;
pub mod timestamp;
pub mod types;

use metrics::{counter, describe_counter, describe_histogram};
use once_cell::sync::{Lazy, OnceCell};
use regex::Regex;
use std::collections::HashSet;

use crate::error::PipelineError;
use crate::ingest::canonical::{canonical_url, registrable_domain};
use crate::ingest::providers::parser_for;
use crate::ingest::timestamp::parse_published;
use crate::ingest::types::{NormalizedItem, RawDocument, RawEntry};

/// Longest text kept for a title or summary, in chars.
pub const MAX_TEXT_CHARS: usize = 1500;

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("fetch_attempts_total", "HTTP attempts against source URLs.");
        describe_counter!("fetch_retries_total", "Retried source URL fetches.");
        describe_counter!(
            "fetch_deadline_exceeded_total",
            "Source URL fetches abandoned at the run deadline."
        );
        describe_counter!(
            "fetch_source_unavailable_total",
            "Sources skipped for a run after retries, timeouts or the run deadline."
        );
        describe_histogram!("fetch_source_ms", "Wall time to fetch one source, in milliseconds.");
        describe_counter!("normalize_items_total", "Items kept after normalization.");
        describe_counter!(
            "normalize_dropped_total",
            "Entries dropped for having no text or no usable link."
        );
        describe_counter!("normalize_dedup_url_total", "Same-source duplicate URLs collapsed.");
        describe_counter!(
            "normalize_date_fallback_total",
            "Items whose publish date fell back to fetch time."
        );
        describe_counter!("normalize_parse_failures_total", "Malformed source documents.");
    });
}

static RE_TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)</?[^>]+>").expect("tag regex"));
static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));

/// Normalize text: decode entities, strip markup, collapse whitespace, cap length.
pub fn normalize_text(s: &str) -> String {
    // Entities first so escaped markup (`&lt;p&gt;`) is stripped too.
    let decoded = html_escape::decode_html_entities(s);
    let stripped = RE_TAGS.replace_all(&decoded, " ");

    let quoted = stripped
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'")
        .replace('\u{00A0}', " ");

    let mut out = RE_WS.replace_all(&quoted, " ").trim().to_string();

    if out.chars().count() > MAX_TEXT_CHARS {
        out = out.chars().take(MAX_TEXT_CHARS).collect();
    }
    out
}

/// Items and counters for one source after normalization.
#[derive(Debug, Default)]
pub struct SourceItems {
    pub items: Vec<NormalizedItem>,
    /// Documents that parsed.
    pub documents: usize,
    pub parse_failures: Vec<PipelineError>,
    pub dropped: usize,
    pub duplicate_urls: usize,
    pub date_fallbacks: usize,
    pub capped: usize,
}

impl SourceItems {
    /// Every fetched document was malformed.
    pub fn all_failed(&self) -> bool {
        self.documents == 0 && !self.parse_failures.is_empty()
    }
}

enum Skip {
    NoText,
    NoLink,
}

fn normalize_entry(entry: RawEntry, doc: &RawDocument) -> Result<NormalizedItem, Skip> {
    let title = entry
        .title
        .as_deref()
        .map(normalize_text)
        .filter(|t| !t.is_empty());
    let summary = entry
        .summary
        .as_deref()
        .map(normalize_text)
        .unwrap_or_default();
    if title.is_none() && summary.is_empty() {
        return Err(Skip::NoText);
    }

    let url = entry
        .link
        .as_deref()
        .and_then(|l| canonical_url(l, Some(&doc.url)))
        .ok_or(Skip::NoLink)?;

    let src = &doc.source;
    let parsed = entry
        .published
        .as_deref()
        .and_then(|raw| parse_published(raw, src.timezone, src.date_format.as_deref()));

    Ok(NormalizedItem {
        source_id: src.id.clone(),
        source_domain: registrable_domain(&url),
        published_at: parsed.unwrap_or(doc.fetched_at),
        source_timezone: src.timezone,
        published_fallback: parsed.is_none(),
        url: url.to_string(),
        title,
        summary,
    })
}

/// Normalize every document fetched for a single source.
///
/// Duplicate canonical URLs keep the first entry seen. With `max_per_source > 0`
/// only the newest items survive. Items come back in processing order
/// (`NormalizedItem::order_key`).
pub fn normalize_source(docs: &[RawDocument], max_per_source: usize) -> SourceItems {
    ensure_metrics_described();

    let mut out = SourceItems::default();
    let mut seen: HashSet<String> = HashSet::new();

    for doc in docs {
        let parser = parser_for(doc.source.kind);
        let entries = match parser.parse(&doc.body) {
            Ok(v) => v,
            Err(e) => {
                let err = PipelineError::parse_failure(&doc.source.id, format!("{}: {e:#}", doc.url));
                tracing::warn!(target: "normalize", source = %doc.source.id, url = %doc.url, parser = parser.name(), error = %err, "document skipped");
                out.parse_failures.push(err);
                continue;
            }
        };
        out.documents += 1;

        for entry in entries {
            match normalize_entry(entry, doc) {
                Ok(item) => {
                    if !seen.insert(item.url.clone()) {
                        out.duplicate_urls += 1;
                        continue;
                    }
                    if item.published_fallback {
                        out.date_fallbacks += 1;
                    }
                    out.items.push(item);
                }
                Err(Skip::NoText) | Err(Skip::NoLink) => out.dropped += 1,
            }
        }
    }

    if max_per_source > 0 && out.items.len() > max_per_source {
        out.items.sort_by(|a, b| {
            b.published_at
                .cmp(&a.published_at)
                .then_with(|| a.url.cmp(&b.url))
        });
        out.capped = out.items.len() - max_per_source;
        out.items.truncate(max_per_source);
    }
    out.items.sort_by(|a, b| a.order_key().cmp(&b.order_key()));

    counter!("normalize_items_total").increment(out.items.len() as u64);
    counter!("normalize_dropped_total").increment(out.dropped as u64);
    counter!("normalize_dedup_url_total").increment(out.duplicate_urls as u64);
    counter!("normalize_date_fallback_total").increment(out.date_fallbacks as u64);
    counter!("normalize_parse_failures_total").increment(out.parse_failures.len() as u64);

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SourceConfig, SourceKind};
    use chrono::{TimeZone, Utc};
    use chrono_tz::Tz;
    use std::sync::Arc;

    fn source(kind: SourceKind) -> Arc<SourceConfig> {
        Arc::new(SourceConfig {
            id: "moex".into(),
            kind,
            timezone: chrono_tz::Europe::Moscow,
            outfile: None,
            urls: vec!["https://www.moex.com/export/news".into()],
            date_format: Some("%d.%m.%Y %H:%M".into()),
        })
    }

    fn doc(body: &str) -> RawDocument {
        RawDocument {
            source: source(SourceKind::Bulletin),
            url: "https://www.moex.com/export/news".into(),
            body: body.into(),
            fetched_at: Utc.with_ymd_and_hms(2025, 3, 14, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn normalize_text_cleans_markup() {
        assert_eq!(
            normalize_text("  <p>Rate&nbsp;held  at <b>21%</b>.</p>\n\n"),
            "Rate held at 21% ."
        );
        assert_eq!(normalize_text("\u{00AB}Moex\u{00BB} index"), "\"Moex\" index");
        assert_eq!(normalize_text(&"x".repeat(2000)).chars().count(), MAX_TEXT_CHARS);
    }

    #[test]
    fn dedups_urls_and_drops_empty_entries() {
        let body = r#"[
            {"title": "A", "url": "/n/1?utm_source=tg", "date": "14.03.2025 10:00"},
            {"title": "A again", "url": "https://www.moex.com/n/1"},
            {"title": " ", "summary": "<br/>", "url": "https://www.moex.com/n/2"},
            {"title": "No link"}
        ]"#;
        let out = normalize_source(&[doc(body)], 0);
        assert_eq!(out.items.len(), 1);
        assert_eq!(out.duplicate_urls, 1);
        assert_eq!(out.dropped, 2);

        let it = &out.items[0];
        assert_eq!(it.url, "https://www.moex.com/n/1");
        assert_eq!(it.source_domain, "moex.com");
        assert_eq!(it.title.as_deref(), Some("A"));
        // 10:00 Moscow is 07:00 UTC.
        assert_eq!(it.published_at, Utc.with_ymd_and_hms(2025, 3, 14, 7, 0, 0).unwrap());
        assert!(!it.published_fallback);
        assert_eq!(it.source_timezone, chrono_tz::Europe::Moscow);
    }

    #[test]
    fn missing_or_bad_date_falls_back_to_fetch_time() {
        let body = r#"[
            {"summary": "Only a summary", "url": "https://www.moex.com/n/3", "date": "soon"}
        ]"#;
        let out = normalize_source(&[doc(body)], 0);
        let it = &out.items[0];
        assert!(it.published_fallback);
        assert_eq!(it.published_at, Utc.with_ymd_and_hms(2025, 3, 14, 12, 0, 0).unwrap());
        assert!(it.title.is_none());
        assert_eq!(out.date_fallbacks, 1);
    }

    #[test]
    fn malformed_document_is_a_parse_failure_for_its_source() {
        let good = doc(r#"[{"title": "ok", "url": "https://www.moex.com/n/9"}]"#);
        let out = normalize_source(&[doc("<html>oops"), good], 0);
        assert_eq!(out.items.len(), 1);
        assert_eq!(out.documents, 1);
        assert!(!out.all_failed());
        assert!(matches!(
            &out.parse_failures[0],
            PipelineError::ParseFailure { source_id, .. } if source_id == "moex"
        ));

        let bad = normalize_source(&[doc("nope")], 0);
        assert!(bad.all_failed());
        assert!(bad.items.is_empty());
    }

    #[test]
    fn cap_keeps_newest() {
        let body = r#"[
            {"title": "old", "url": "https://www.moex.com/a", "date": "10.03.2025 10:00"},
            {"title": "new", "url": "https://www.moex.com/b", "date": "13.03.2025 10:00"},
            {"title": "mid", "url": "https://www.moex.com/c", "date": "12.03.2025 10:00"}
        ]"#;
        let out = normalize_source(&[doc(body)], 2);
        let titles: Vec<_> = out.items.iter().filter_map(|i| i.title.as_deref()).collect();
        assert_eq!(titles, vec!["mid", "new"]);
        assert_eq!(out.capped, 1);
    }

    #[test]
    fn feed_documents_use_the_feed_parser() {
        let rss = r#"<rss version="2.0"><channel>
            <item><title>Key rate</title><link>https://www.cbr.ru/press/1</link>
            <pubDate>Fri, 14 Mar 2025 13:30:00 +0300</pubDate></item>
        </channel></rss>"#;
        let d = RawDocument {
            source: Arc::new(SourceConfig {
                id: "cbr_press".into(),
                kind: SourceKind::Feed,
                timezone: Tz::UTC,
                outfile: None,
                urls: vec!["https://www.cbr.ru/rss".into()],
                date_format: None,
            }),
            url: "https://www.cbr.ru/rss".into(),
            body: rss.into(),
            fetched_at: Utc::now(),
        };
        let out = normalize_source(&[d], 0);
        assert_eq!(out.items.len(), 1);
        assert_eq!(out.items[0].source_domain, "cbr.ru");
        assert_eq!(
            out.items[0].published_at,
            Utc.with_ymd_and_hms(2025, 3, 14, 10, 30, 0).unwrap()
        );
    }
}
