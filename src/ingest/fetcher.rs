// src/ingest/fetcher.rs
//! Concurrent per-source fetch with per-request timeout, bounded retries and
//! a run-level deadline. A failing source never fails the run.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use metrics::{counter, histogram};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, timeout_at, Instant};

use crate::config::{FetchConfig, SourceConfig};
use crate::error::PipelineError;
use crate::ingest::types::RawDocument;

/// Byte transport for source URLs. Swappable so runs can be replayed offline.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str) -> Result<String>;
}

/// reqwest-backed transport.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(cfg: &FetchConfig) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .user_agent(cfg.user_agent.as_str())
            .connect_timeout(Duration::from_secs(cfg.connect_timeout_secs))
            .timeout(cfg.request_timeout())
            .build()
            .map_err(|e| PipelineError::ConfigInvalid(format!("http client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str) -> Result<String> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;
        let resp = resp
            .error_for_status()
            .with_context(|| format!("GET {url}"))?;
        resp.text().await.context("reading response body")
    }
}

/// Result of fetching one source.
#[derive(Debug)]
pub struct SourceFetch {
    pub source: Arc<SourceConfig>,
    pub outcome: Result<Vec<RawDocument>, PipelineError>,
}

impl SourceFetch {
    pub fn is_available(&self) -> bool {
        self.outcome.is_ok()
    }
}

#[derive(Clone)]
pub struct Fetcher {
    transport: Arc<dyn Transport>,
    cfg: FetchConfig,
}

impl Fetcher {
    pub fn new(transport: Arc<dyn Transport>, cfg: FetchConfig) -> Self {
        Self { transport, cfg }
    }

    /// Fetch every source with at most `concurrency` in flight. Results keep
    /// registry order. URLs still running at `deadline` are abandoned; a source
    /// keeps whatever documents it collected before then. Returns only once
    /// every source has settled.
    pub async fn fetch_all(
        &self,
        sources: &[Arc<SourceConfig>],
        deadline: Instant,
    ) -> Vec<SourceFetch> {
        crate::ingest::ensure_metrics_described();

        stream::iter(sources.iter().cloned())
            .map(|source| async move {
                let outcome = self.fetch_source(&source, deadline).await;
                if let Err(e) = &outcome {
                    tracing::warn!(target: "fetch", source = %source.id, error = %e, "source unavailable");
                    counter!("fetch_source_unavailable_total").increment(1);
                }
                SourceFetch { source, outcome }
            })
            .buffered(self.cfg.concurrency.max(1))
            .collect()
            .await
    }

    /// All URLs of one source, in order. Partial success keeps what arrived.
    async fn fetch_source(
        &self,
        source: &Arc<SourceConfig>,
        deadline: Instant,
    ) -> Result<Vec<RawDocument>, PipelineError> {
        let t0 = std::time::Instant::now();
        let mut docs = Vec::with_capacity(source.urls.len());
        let mut last_err: Option<anyhow::Error> = None;

        for url in source.urls.iter().map(|u| u.trim()).filter(|u| !u.is_empty()) {
            let res = match timeout_at(deadline, self.fetch_url(&source.id, url)).await {
                Ok(r) => r,
                Err(_) => {
                    counter!("fetch_deadline_exceeded_total").increment(1);
                    tracing::warn!(target: "fetch", source = %source.id, url, "run deadline exceeded");
                    last_err = Some(anyhow!("run deadline exceeded"));
                    break;
                }
            };
            match res {
                Ok(body) => docs.push(RawDocument {
                    source: source.clone(),
                    url: url.to_string(),
                    body,
                    fetched_at: Utc::now(),
                }),
                Err(e) => {
                    tracing::warn!(target: "fetch", source = %source.id, url, error = %format!("{e:#}"), "url failed after retries");
                    last_err = Some(e);
                }
            }
        }

        histogram!("fetch_source_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);

        if docs.is_empty() {
            let reason = last_err
                .map(|e| format!("{e:#}"))
                .unwrap_or_else(|| "no urls".to_string());
            return Err(PipelineError::source_unavailable(&source.id, reason));
        }
        Ok(docs)
    }

    async fn fetch_url(&self, source_id: &str, url: &str) -> Result<String> {
        let attempts = self.cfg.retries.saturating_add(1);
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            counter!("fetch_attempts_total").increment(1);

            let res = match timeout(self.cfg.request_timeout(), self.transport.get(url)).await {
                Ok(r) => r,
                Err(_) => Err(anyhow!(
                    "timed out after {}s",
                    self.cfg.request_timeout().as_secs_f64()
                )),
            };

            match res {
                Ok(body) => return Ok(body),
                Err(e) if attempt < attempts => {
                    let delay = self.backoff(attempt);
                    tracing::debug!(target: "fetch", source = source_id, url, attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying");
                    counter!("fetch_retries_total").increment(1);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e.context(format!("{attempts} attempt(s)"))),
            }
        }
    }

    /// Exponential backoff with up to 50% jitter.
    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.cfg.backoff_base_ms;
        let exp = base.saturating_mul(1u64 << (attempt - 1).min(16));
        let jitter = if base > 1 {
            rand::random_range(0..=base / 2)
        } else {
            0
        };
        Duration::from_millis(exp.saturating_add(jitter))
    }
}
