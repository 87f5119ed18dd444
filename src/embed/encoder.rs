// src/embed/encoder.rs
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::Mutex;

use crate::config::EmbeddingConfig;
use crate::error::{PipelineError, Result};

/// Sentence encoder: text in, fixed-length vectors out.
///
/// Implementations are called from blocking threads and may be shared across
/// concurrent runs.
pub trait TextEncoder: Send + Sync {
    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
    fn dimension(&self) -> usize;
    fn name(&self) -> &str;
}

/// Supported model codes and their output dimension.
fn resolve_model(code: &str) -> Option<(EmbeddingModel, usize)> {
    let m = match code.trim().to_ascii_lowercase().as_str() {
        "multilingual-e5-small" | "intfloat/multilingual-e5-small" => {
            (EmbeddingModel::MultilingualE5Small, 384)
        }
        "bge-small-en-v1.5" | "baai/bge-small-en-v1.5" => (EmbeddingModel::BGESmallENV15, 384),
        "bge-base-en-v1.5" | "baai/bge-base-en-v1.5" => (EmbeddingModel::BGEBaseENV15, 768),
        "all-minilm-l6-v2" | "sentence-transformers/all-minilm-l6-v2" => {
            (EmbeddingModel::AllMiniLML6V2, 384)
        }
        "paraphrase-multilingual-minilm-l12-v2"
        | "sentence-transformers/paraphrase-multilingual-minilm-l12-v2" => {
            (EmbeddingModel::ParaphraseMLMiniLML12V2, 384)
        }
        _ => return None,
    };
    Some(m)
}

/// ONNX encoder via fastembed. Inference is serialized on one model instance.
pub struct FastEmbedEncoder {
    model: Mutex<TextEmbedding>,
    name: String,
    dimension: usize,
}

impl FastEmbedEncoder {
    /// Load weights (downloading into `cache_dir` on first use) and run a probe.
    pub fn new(cfg: &EmbeddingConfig) -> Result<Self> {
        let (model_id, dimension) = resolve_model(&cfg.model).ok_or_else(|| {
            PipelineError::ConfigInvalid(format!("unknown embedding model `{}`", cfg.model))
        })?;

        let mut opts =
            InitOptions::new(model_id).with_show_download_progress(cfg.show_download_progress);
        if let Some(dir) = &cfg.cache_dir {
            opts = opts.with_cache_dir(dir.clone());
        }

        let t0 = std::time::Instant::now();
        let model = TextEmbedding::try_new(opts)
            .map_err(|e| PipelineError::ModelUnavailable(format!("{}: {e}", cfg.model)))?;

        let encoder = Self {
            model: Mutex::new(model),
            name: cfg.model.clone(),
            dimension,
        };

        let probe = encoder
            .encode(&[format!("{}probe", cfg.text_prefix)])
            .map_err(|e| PipelineError::ModelUnavailable(e.to_string()))?;
        match probe.first() {
            Some(v) if v.len() == dimension => {}
            other => {
                return Err(PipelineError::ModelUnavailable(format!(
                    "{} produced {} dims, expected {dimension}",
                    cfg.model,
                    other.map(|v| v.len()).unwrap_or(0)
                )))
            }
        }

        tracing::info!(
            target: "embed",
            model = %cfg.model,
            dimension,
            cache_dir = ?cfg.cache_dir,
            load_ms = t0.elapsed().as_millis() as u64,
            "embedding model ready"
        );
        Ok(encoder)
    }
}

impl TextEncoder for FastEmbedEncoder {
    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let mut model = self
            .model
            .lock()
            .map_err(|_| PipelineError::EmbeddingFailure("model lock poisoned".into()))?;
        model
            .embed(texts, None)
            .map_err(|e| PipelineError::EmbeddingFailure(e.to_string()))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for FastEmbedEncoder {
    fn drop(&mut self) {
        tracing::info!(target: "embed", model = %self.name, "embedding model released");
    }
}
