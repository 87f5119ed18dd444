// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod cluster;
pub mod config;
pub mod domain_weights;
pub mod embed;
pub mod error;
pub mod ingest;
pub mod iso_utc;
pub mod metrics;
pub mod pipeline;
pub mod scoring;
pub mod window;

// ---- Re-exports for stable public API ----
pub use crate::api::{router, AppState};
pub use crate::config::{PipelineConfig, SourceConfig, SourceKind, SourceRegistry};
pub use crate::embed::{Embedder, FastEmbedEncoder, TextEncoder};
pub use crate::error::PipelineError;
pub use crate::ingest::fetcher::{HttpTransport, Transport};
pub use crate::pipeline::{NewsItem, Pipeline, RunReport};
pub use crate::window::TimeFilter;
