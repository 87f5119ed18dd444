// src/ingest/sink.rs
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::config::SourceConfig;
use crate::ingest::types::{NormalizedItem, SourceStatus};

/// Header of a per-source audit file.
#[derive(Debug, Clone, Serialize)]
pub struct SinkMeta {
    pub source_id: String,
    pub timezone: String,
    pub urls: Vec<String>,
    #[serde(with = "crate::iso_utc")]
    pub generated_at: DateTime<Utc>,
    pub status: SourceStatus,
    pub documents: usize,
    pub items: usize,
    /// Short digest of the serialized items, for spotting unchanged runs.
    pub items_digest: String,
}

/// `{meta, items}` as written to disk. Bulletin sources can read it back.
#[derive(Debug, Serialize)]
pub struct SinkRecord<'a> {
    pub meta: SinkMeta,
    pub items: &'a [NormalizedItem],
}

impl<'a> SinkRecord<'a> {
    pub fn new(
        source: &SourceConfig,
        status: SourceStatus,
        documents: usize,
        items: &'a [NormalizedItem],
        generated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            meta: SinkMeta {
                source_id: source.id.clone(),
                timezone: source.timezone.name().to_string(),
                urls: source.urls.clone(),
                generated_at,
                status,
                documents,
                items: items.len(),
                items_digest: items_digest(items),
            },
            items,
        }
    }
}

fn items_digest(items: &[NormalizedItem]) -> String {
    let mut hasher = Sha256::new();
    for it in items {
        hasher.update(it.url.as_bytes());
        hasher.update([0u8]);
        hasher.update(crate::iso_utc::format(&it.published_at).as_bytes());
        hasher.update([0u8]);
    }
    let digest = hasher.finalize();
    let mut out = String::with_capacity(16);
    for b in digest.iter().take(8) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

#[async_trait::async_trait]
pub trait ItemSink: Send + Sync {
    /// Persist one source's output. Failures are reported, never fatal to a run.
    async fn store(&self, source: &SourceConfig, record: &SinkRecord<'_>) -> Result<()>;
}

/// Writes `<dir>/<outfile>` via a temp file and rename.
#[derive(Debug, Clone)]
pub struct FileSink {
    dir: PathBuf,
}

impl FileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, source: &SourceConfig) -> PathBuf {
        self.dir.join(source.outfile_name())
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes)
        .await
        .with_context(|| format!("writing {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("renaming into {}", path.display()))?;
    Ok(())
}

#[async_trait::async_trait]
impl ItemSink for FileSink {
    async fn store(&self, source: &SourceConfig, record: &SinkRecord<'_>) -> Result<()> {
        let path = self.path_for(source);
        let json = serde_json::to_vec_pretty(record).context("serializing audit record")?;
        write_atomic(&path, &json).await?;
        tracing::debug!(target: "sink", source = %source.id, path = %path.display(), items = record.meta.items, "audit file written");
        Ok(())
    }
}

// --- Test helper ---
/// Records `(source_id, status, item count)` per call.
pub struct MemorySink {
    pub calls: std::sync::Mutex<Vec<(String, SourceStatus, usize)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self {
            calls: std::sync::Mutex::new(vec![]),
        }
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ItemSink for MemorySink {
    async fn store(&self, source: &SourceConfig, record: &SinkRecord<'_>) -> Result<()> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((source.id.clone(), record.meta.status, record.meta.items));
        }
        Ok(())
    }
}
