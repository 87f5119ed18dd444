// src/config/sources.rs
//! Source registry: the static list of news sources, loaded once at startup.
//!
//! Accepted shapes (JSON or TOML, chosen by file extension):
//! - `{"sources": [ {...}, ... ]}` (the exporter's native layout)
//! - a bare JSON array of source records
//! - TOML with `[[sources]]` tables

use anyhow::Context;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{PipelineError, Result};

pub const ENV_SOURCES_PATH: &str = "MARKET_RADAR_SOURCES";
pub const DEFAULT_SOURCES_PATH: &str = "config/sources.json";

/// How a source's documents are parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// RSS 2.0 or Atom feed.
    #[serde(alias = "rss", alias = "atom")]
    Feed,
    /// Exchange/regulator bulletin published as JSON.
    #[serde(alias = "json")]
    Bulletin,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: SourceKind,
    /// IANA zone the source publishes in (used for naive timestamps).
    #[serde(default = "default_timezone")]
    pub timezone: Tz,
    /// Audit file name relative to the output directory; `<id>.json` if absent.
    #[serde(default)]
    pub outfile: Option<PathBuf>,
    pub urls: Vec<String>,
    /// Optional chrono strftime pattern tried before the generic formats.
    #[serde(default)]
    pub date_format: Option<String>,
}

fn default_timezone() -> Tz {
    Tz::UTC
}

impl SourceConfig {
    pub fn outfile_name(&self) -> PathBuf {
        self.outfile
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("{}.json", self.id)))
    }
}

/// Immutable, validated list of sources shared by every run.
#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    sources: Vec<Arc<SourceConfig>>,
}

impl SourceRegistry {
    /// Build a registry from already-parsed records, validating them.
    pub fn new(sources: Vec<SourceConfig>) -> Result<Self> {
        validate(&sources)?;
        Ok(Self {
            sources: sources.into_iter().map(Arc::new).collect(),
        })
    }

    /// Load from an explicit path. Supports JSON or TOML.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading sources from {}", path.display()))
            .map_err(|e| PipelineError::ConfigInvalid(format!("{e:#}")))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let sources = parse_sources(&content, ext.as_str())?;
        Self::new(sources)
    }

    /// Load using env var + fallback:
    /// 1) $MARKET_RADAR_SOURCES
    /// 2) config/sources.json
    pub fn load_default() -> Result<Self> {
        let path = std::env::var(ENV_SOURCES_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_SOURCES_PATH));
        if !path.exists() {
            return Err(PipelineError::ConfigInvalid(format!(
                "source list not found at {}",
                path.display()
            )));
        }
        Self::load_from(&path)
    }

    pub fn sources(&self) -> &[Arc<SourceConfig>] {
        &self.sources
    }

    pub fn get(&self, id: &str) -> Option<&Arc<SourceConfig>> {
        self.sources.iter().find(|s| s.id == id)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

fn parse_sources(s: &str, hint_ext: &str) -> Result<Vec<SourceConfig>> {
    #[derive(Deserialize)]
    struct Wrapped {
        sources: Vec<SourceConfig>,
    }

    if hint_ext == "toml" {
        let v: Wrapped =
            toml::from_str(s).map_err(|e| PipelineError::ConfigInvalid(e.to_string()))?;
        return Ok(v.sources);
    }

    // JSON: wrapped object first, bare array as fallback.
    match serde_json::from_str::<Wrapped>(s) {
        Ok(v) => Ok(v.sources),
        Err(wrapped_err) => serde_json::from_str::<Vec<SourceConfig>>(s).map_err(|_| {
            PipelineError::ConfigInvalid(format!("malformed source list: {wrapped_err}"))
        }),
    }
}

fn validate(sources: &[SourceConfig]) -> Result<()> {
    if sources.is_empty() {
        return Err(PipelineError::ConfigInvalid(
            "source list is empty".to_string(),
        ));
    }
    let mut seen = HashSet::new();
    for s in sources {
        if s.id.trim().is_empty() {
            return Err(PipelineError::ConfigInvalid(
                "source with empty id".to_string(),
            ));
        }
        if !seen.insert(s.id.as_str()) {
            return Err(PipelineError::ConfigInvalid(format!(
                "duplicate source id `{}`",
                s.id
            )));
        }
        if s.urls.iter().all(|u| u.trim().is_empty()) {
            return Err(PipelineError::ConfigInvalid(format!(
                "source `{}` has no urls",
                s.id
            )));
        }
        for u in &s.urls {
            url::Url::parse(u.trim()).map_err(|e| {
                PipelineError::ConfigInvalid(format!("source `{}` url `{u}`: {e}", s.id))
            })?;
        }
    }
    Ok(())
}
