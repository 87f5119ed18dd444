// src/config/mod.rs
pub mod pipeline;
pub mod sources;

pub use pipeline::{
    ApiConfig, CacheConfig, ClusteringConfig, EmbeddingConfig, FetchConfig, HotnessWeights,
    OutputConfig, PipelineConfig, ScoringConfig,
};
pub use sources::{SourceConfig, SourceKind, SourceRegistry};
