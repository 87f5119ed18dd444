use axum::{routing::get, Router};
use metrics::gauge;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::config::PipelineConfig;

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder and publish static config gauges.
    /// Fails if a recorder is already installed in this process.
    pub fn init(cfg: &PipelineConfig) -> Result<Self, BuildError> {
        let handle = PrometheusBuilder::new().install_recorder()?;

        gauge!("config_cache_ttl_secs").set(cfg.cache.ttl_secs as f64);
        gauge!("config_similarity_threshold").set(f64::from(cfg.clustering.similarity_threshold));
        gauge!("config_half_life_hours").set(cfg.scoring.half_life_hours);

        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router<S>(&self) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}
