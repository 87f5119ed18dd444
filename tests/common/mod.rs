// tests/common/mod.rs
//
// Shared test doubles: a deterministic bag-of-words encoder and a scripted
// transport, plus builders for feeds, sources and pipelines.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use market_radar::config::{PipelineConfig, SourceConfig, SourceKind, SourceRegistry};
use market_radar::embed::{Embedder, TextEncoder};
use market_radar::error::{PipelineError, Result};
use market_radar::ingest::fetcher::{SourceFetch, Transport};
use market_radar::ingest::types::RawDocument;
use market_radar::pipeline::Pipeline;

pub const DIM: usize = 256;

/// Hashes lowercase word tokens into a fixed-size count vector. Same words,
/// same vector; disjoint vocabularies are orthogonal up to collisions.
/// Texts containing "poison" fail to encode.
pub struct HashEncoder {
    pub calls: AtomicUsize,
}

impl HashEncoder {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

fn fnv1a(s: &str) -> u64 {
    let mut h: u64 = 0xcbf2_9ce4_8422_2325;
    for b in s.bytes() {
        h ^= u64::from(b);
        h = h.wrapping_mul(0x0100_0000_01b3);
    }
    h
}

impl TextEncoder for HashEncoder {
    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        texts
            .iter()
            .map(|t| {
                if t.contains("poison") {
                    return Err(PipelineError::EmbeddingFailure("unsupported text".into()));
                }
                let mut v = vec![0f32; DIM];
                for tok in t
                    .to_lowercase()
                    .split(|c: char| !c.is_alphanumeric())
                    .filter(|w| !w.is_empty())
                {
                    v[(fnv1a(tok) % DIM as u64) as usize] += 1.0;
                }
                Ok(v)
            })
            .collect()
    }

    fn dimension(&self) -> usize {
        DIM
    }

    fn name(&self) -> &str {
        "hash-bow"
    }
}

#[derive(Clone)]
pub enum Reply {
    Body(String),
    Fail,
    Hang,
}

/// URL → scripted reply. Unknown URLs fail.
#[derive(Default)]
pub struct StubTransport {
    pub replies: HashMap<String, Reply>,
    pub calls: AtomicUsize,
}

impl StubTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, url: &str, reply: Reply) -> Self {
        self.replies.insert(url.to_string(), reply);
        self
    }
}

#[async_trait]
impl Transport for StubTransport {
    async fn get(&self, url: &str) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.replies.get(url).cloned() {
            Some(Reply::Body(b)) => Ok(b),
            Some(Reply::Hang) => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            Some(Reply::Fail) | None => anyhow::bail!("503 Service Unavailable for {url}"),
        }
    }
}

/// RSS 2.0 document; each entry is (title, link, RFC 2822 date).
pub fn rss(entries: &[(&str, &str, DateTime<Utc>)]) -> String {
    let mut s = String::from(r#"<?xml version="1.0" encoding="UTF-8"?><rss version="2.0"><channel><title>t</title>"#);
    for (title, link, at) in entries {
        s.push_str(&format!(
            "<item><title>{title}</title><link>{link}</link><pubDate>{}</pubDate></item>",
            at.to_rfc2822()
        ));
    }
    s.push_str("</channel></rss>");
    s
}

pub fn feed_source(id: &str, url: &str) -> SourceConfig {
    SourceConfig {
        id: id.to_string(),
        kind: SourceKind::Feed,
        timezone: chrono_tz::Tz::UTC,
        outfile: None,
        urls: vec![url.to_string()],
        date_format: None,
    }
}

/// Fast, offline config: no retries, no sink, 1s request timeout.
pub fn test_config() -> PipelineConfig {
    let mut cfg = PipelineConfig::default();
    cfg.fetch.retries = 0;
    cfg.fetch.backoff_base_ms = 1;
    cfg.fetch.request_timeout_secs = 1;
    cfg.fetch.run_deadline_secs = 10;
    cfg.embedding.text_prefix = String::new();
    cfg.output.enabled = false;
    cfg.domains.weights.insert("cbr.ru".to_string(), 0.9);
    cfg
}

pub fn pipeline(
    cfg: PipelineConfig,
    sources: Vec<SourceConfig>,
    transport: StubTransport,
) -> Pipeline {
    shared_pipeline(cfg, sources, Arc::new(transport))
}

/// Same as [`pipeline`] but the caller keeps a handle on the transport.
pub fn shared_pipeline(
    cfg: PipelineConfig,
    sources: Vec<SourceConfig>,
    transport: Arc<StubTransport>,
) -> Pipeline {
    let registry = SourceRegistry::new(sources).expect("valid test registry");
    let embedder = Arc::new(Embedder::new(
        Arc::new(HashEncoder::new()),
        cfg.embedding.clone(),
    ));
    Pipeline::new(cfg, registry, transport, embedder)
}

/// A frozen successful fetch of one document.
pub fn fetched(source: &SourceConfig, body: String, fetched_at: DateTime<Utc>) -> SourceFetch {
    let source = Arc::new(source.clone());
    SourceFetch {
        source: source.clone(),
        outcome: Ok(vec![RawDocument {
            url: source.urls[0].clone(),
            source,
            body,
            fetched_at,
        }]),
    }
}
