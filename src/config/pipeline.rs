// src/config/pipeline.rs
//! Tunables for every pipeline stage, loaded from `config/pipeline.toml`.
//!
//! Every field has a default, so a missing file (or a partial one) is fine.
//! Values are validated once at startup; anything out of range is a
//! `ConfigInvalid` error rather than a silent clamp.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain_weights::DomainWeightsConfig;
use crate::error::{PipelineError, Result};

pub const ENV_PIPELINE_CONFIG_PATH: &str = "MARKET_RADAR_CONFIG";
pub const ENV_MODEL_CACHE: &str = "MARKET_RADAR_MODEL_CACHE";
pub const DEFAULT_PIPELINE_CONFIG_PATH: &str = "config/pipeline.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub fetch: FetchConfig,
    pub embedding: EmbeddingConfig,
    pub clustering: ClusteringConfig,
    pub scoring: ScoringConfig,
    pub domains: DomainWeightsConfig,
    pub cache: CacheConfig,
    pub output: OutputConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub concurrency: usize,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub retries: u32,
    pub backoff_base_ms: u64,
    pub run_deadline_secs: u64,
    pub max_per_source: usize,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            request_timeout_secs: 15,
            connect_timeout_secs: 5,
            retries: 2,
            backoff_base_ms: 500,
            run_deadline_secs: 60,
            max_per_source: 200,
            user_agent: "market-radar/0.1 (+https://localhost)".to_string(),
        }
    }
}

impl FetchConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn run_deadline(&self) -> Duration {
        Duration::from_secs(self.run_deadline_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Model code, e.g. "multilingual-e5-small" or "bge-small-en-v1.5".
    pub model: String,
    /// Local weights cache; reused across restarts.
    pub cache_dir: Option<PathBuf>,
    pub max_chars: usize,
    /// Leading summary sentences included in the embedded text.
    pub summary_sentences: usize,
    pub text_prefix: String,
    pub batch_size: usize,
    pub timeout_secs: u64,
    pub show_download_progress: bool,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "multilingual-e5-small".to_string(),
            cache_dir: None,
            max_chars: 512,
            summary_sentences: 2,
            text_prefix: "passage: ".to_string(),
            batch_size: 64,
            timeout_secs: 30,
            show_download_progress: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    /// Cosine similarity a member must exceed to join a cluster.
    pub similarity_threshold: f32,
    /// Whether repeated reports from one source raise `corroboration_count`.
    pub count_same_source: bool,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.85,
            count_same_source: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct HotnessWeights {
    pub time: f64,
    pub density: f64,
    pub domain: f64,
}

impl Default for HotnessWeights {
    fn default() -> Self {
        Self {
            time: 1.0 / 3.0,
            density: 1.0 / 3.0,
            domain: 1.0 / 3.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub half_life_hours: f64,
    pub weights: HotnessWeights,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            half_life_hours: 12.0,
            weights: HotnessWeights::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Age after which a cached run is recomputed; 0 disables caching.
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_secs: 30 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub enabled: bool,
    pub dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from("news"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub default_since: String,
    pub max_limit: usize,
    pub metrics: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            default_since: "24h".to_string(),
            max_limit: 500,
            metrics: true,
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: PipelineConfig =
            toml::from_str(s).map_err(|e| PipelineError::ConfigInvalid(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let s = fs::read_to_string(path).map_err(|e| {
            PipelineError::ConfigInvalid(format!("reading {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&s)
    }

    /// Resolve the config file ($MARKET_RADAR_CONFIG, then the default path),
    /// falling back to built-in defaults when no file exists. The model cache
    /// directory may be overridden by $MARKET_RADAR_MODEL_CACHE.
    pub fn load_default() -> Result<Self> {
        let mut cfg = match std::env::var(ENV_PIPELINE_CONFIG_PATH) {
            Ok(p) => {
                let pb = PathBuf::from(p);
                if !pb.exists() {
                    return Err(PipelineError::ConfigInvalid(format!(
                        "{ENV_PIPELINE_CONFIG_PATH} points to non-existent path {}",
                        pb.display()
                    )));
                }
                Self::load_from(&pb)?
            }
            Err(_) => {
                let pb = PathBuf::from(DEFAULT_PIPELINE_CONFIG_PATH);
                if pb.exists() {
                    Self::load_from(&pb)?
                } else {
                    Self::default()
                }
            }
        };
        if let Ok(dir) = std::env::var(ENV_MODEL_CACHE) {
            if !dir.trim().is_empty() {
                cfg.embedding.cache_dir = Some(PathBuf::from(dir));
            }
        }
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(PipelineError::ConfigInvalid(msg));

        let t = self.clustering.similarity_threshold;
        if !(t > 0.0 && t <= 1.0) {
            return invalid(format!("clustering.similarity_threshold {t} not in (0, 1]"));
        }
        let hl = self.scoring.half_life_hours;
        if !(hl.is_finite() && hl > 0.0) {
            return invalid(format!("scoring.half_life_hours {hl} must be > 0"));
        }
        let w = self.scoring.weights;
        for (name, v) in [("time", w.time), ("density", w.density), ("domain", w.domain)] {
            if !(v.is_finite() && v >= 0.0) {
                return invalid(format!("scoring.weights.{name} {v} must be >= 0"));
            }
        }
        if w.time + w.density + w.domain <= 0.0 {
            return invalid("scoring.weights must not all be zero".to_string());
        }
        if self.fetch.concurrency == 0 {
            return invalid("fetch.concurrency must be >= 1".to_string());
        }
        if self.embedding.max_chars == 0 || self.embedding.batch_size == 0 {
            return invalid("embedding.max_chars and batch_size must be >= 1".to_string());
        }
        self.domains.validate()?;
        crate::window::TimeFilter::parse(&self.api.default_since)
            .map_err(|e| PipelineError::ConfigInvalid(format!("api.default_since: {e}")))?;
        Ok(())
    }
}
