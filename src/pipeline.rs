// src/pipeline.rs
//! Fetch → normalize → embed → cluster → score → filter → sort.
//!
//! A run holds no state across runs except the age-bounded result cache. The
//! cache stores the scored, sorted list for every item; time filters are
//! applied per request on top of it.

use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::cmp::Ordering;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::cluster::{Cluster, Clusterer};
use crate::config::{PipelineConfig, SourceRegistry};
use crate::embed::Embedder;
use crate::ingest::fetcher::{Fetcher, SourceFetch, Transport};
use crate::ingest::normalize_source;
use crate::ingest::sink::{FileSink, ItemSink, SinkRecord};
use crate::ingest::types::{NormalizedItem, SourceStatus};
use crate::scoring::{Coefficients, Scorer};
use crate::window::TimeFilter;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("pipeline_runs_total", "Completed pipeline runs.");
        describe_counter!("pipeline_cache_hits_total", "Requests served from the run cache.");
        describe_counter!("pipeline_sink_errors_total", "Audit sink write failures.");
        describe_histogram!("pipeline_run_ms", "End-to-end run time in milliseconds.");
        describe_gauge!("pipeline_clusters", "Clusters produced by the last run.");
        describe_gauge!("pipeline_sources_unavailable", "Sources unavailable in the last run.");
        describe_gauge!("pipeline_last_run_ts", "Unix ts of the last completed run.");
    });
}

/// One ranked story. Fields and order are the public JSON contract.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewsItem {
    pub source: String,
    pub source_domain: String,
    #[serde(with = "crate::iso_utc")]
    pub published_at: DateTime<Utc>,
    pub url: String,
    pub title: Option<String>,
    pub summary: String,
    pub time_coef: f64,
    pub density_coef: f64,
    pub domain_coef: f64,
    pub hotness: f64,
    #[serde(skip)]
    pub corroboration_count: usize,
}

impl NewsItem {
    fn from_cluster(cluster: &Cluster, coef: Coefficients) -> Self {
        let rep = cluster.representative();
        let c = coef.rounded();
        Self {
            source: rep.source_id.clone(),
            source_domain: rep.source_domain.clone(),
            published_at: rep.published_at,
            url: rep.url.clone(),
            title: rep.title.clone(),
            summary: rep.summary.clone(),
            time_coef: c.time_coef,
            density_coef: c.density_coef,
            domain_coef: c.domain_coef,
            hotness: c.hotness,
            corroboration_count: cluster.corroboration_count,
        }
    }
}

/// Hotness desc, then newest first, then domain and URL ascending.
pub fn rank_order(a: &NewsItem, b: &NewsItem) -> Ordering {
    b.hotness
        .total_cmp(&a.hotness)
        .then_with(|| b.published_at.cmp(&a.published_at))
        .then_with(|| a.source_domain.cmp(&b.source_domain))
        .then_with(|| a.url.cmp(&b.url))
}

/// Keep the items the filter admits. Order is preserved.
pub fn apply_filter(items: &[NewsItem], filter: TimeFilter, now: DateTime<Utc>) -> Vec<NewsItem> {
    if filter.is_unbounded() {
        return items.to_vec();
    }
    items
        .iter()
        .filter(|it| filter.admits(it.published_at, now))
        .cloned()
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub source_id: String,
    pub status: SourceStatus,
    pub documents: usize,
    pub items: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Diagnostics for one run, served by `/debug/last-run`.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    #[serde(with = "crate::iso_utc")]
    pub generated_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub sources: Vec<SourceReport>,
    pub normalized_items: usize,
    pub embedding_failures: usize,
    pub clusters: usize,
    pub model: String,
}

impl RunReport {
    pub fn unavailable_sources(&self) -> usize {
        self.sources
            .iter()
            .filter(|s| s.status == SourceStatus::Unavailable)
            .count()
    }
}

/// Scored output of one run, shared between requests.
#[derive(Debug, Clone)]
pub struct CachedRun {
    pub items: Arc<Vec<NewsItem>>,
    pub report: Arc<RunReport>,
    pub generated_at: DateTime<Utc>,
    computed_at: Instant,
}

/// A filtered view of a run, as returned to callers.
#[derive(Debug, Clone)]
pub struct NewsPage {
    pub items: Vec<NewsItem>,
    pub generated_at: DateTime<Utc>,
    pub cache_hit: bool,
}

/// Age-only result cache with single-flight refresh.
struct ResultCache {
    ttl: Duration,
    slot: Mutex<Option<CachedRun>>,
    last_report: RwLock<Option<Arc<RunReport>>>,
}

impl ResultCache {
    fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: Mutex::new(None),
            last_report: RwLock::new(None),
        }
    }

    fn is_fresh(&self, run: &CachedRun) -> bool {
        !self.ttl.is_zero() && run.computed_at.elapsed() < self.ttl
    }
}

pub struct Pipeline {
    registry: SourceRegistry,
    fetcher: Fetcher,
    embedder: Arc<Embedder>,
    clusterer: Clusterer,
    scorer: Scorer,
    sink: Option<Arc<dyn ItemSink>>,
    cfg: PipelineConfig,
    cache: ResultCache,
}

impl Pipeline {
    pub fn new(
        cfg: PipelineConfig,
        registry: SourceRegistry,
        transport: Arc<dyn Transport>,
        embedder: Arc<Embedder>,
    ) -> Self {
        ensure_metrics_described();
        let sink: Option<Arc<dyn ItemSink>> = if cfg.output.enabled {
            Some(Arc::new(FileSink::new(cfg.output.dir.clone())))
        } else {
            None
        };
        Self {
            fetcher: Fetcher::new(transport, cfg.fetch.clone()),
            clusterer: Clusterer::new(&cfg.clustering),
            scorer: Scorer::new(cfg.scoring.clone(), cfg.domains.clone()),
            cache: ResultCache::new(Duration::from_secs(cfg.cache.ttl_secs)),
            registry,
            embedder,
            sink,
            cfg,
        }
    }

    /// Replace the audit sink (`None` disables it).
    pub fn with_sink(mut self, sink: Option<Arc<dyn ItemSink>>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.cfg
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    /// Ranked items admitted by `filter`, evaluated at the current instant.
    pub async fn run(&self, filter: TimeFilter) -> Vec<NewsItem> {
        self.news(filter).await.items
    }

    /// Like [`run`](Self::run) but also says where the data came from.
    pub async fn news(&self, filter: TimeFilter) -> NewsPage {
        let (run, cache_hit) = self.current().await;
        NewsPage {
            items: apply_filter(&run.items, filter, Utc::now()),
            generated_at: run.generated_at,
            cache_hit,
        }
    }

    /// Report of the last completed run, if any.
    pub fn last_report(&self) -> Option<Arc<RunReport>> {
        self.cache.last_report.read().ok().and_then(|g| g.clone())
    }

    /// Cached run if fresh; otherwise compute one. Concurrent callers wait for
    /// the in-flight refresh and share its result.
    async fn current(&self) -> (CachedRun, bool) {
        let mut slot = self.cache.slot.lock().await;
        if let Some(run) = slot.as_ref().filter(|r| self.cache.is_fresh(r)) {
            counter!("pipeline_cache_hits_total").increment(1);
            return (run.clone(), true);
        }
        let run = self.refresh().await;
        *slot = Some(run.clone());
        (run, false)
    }

    /// Full uncached run against live sources.
    pub async fn refresh(&self) -> CachedRun {
        let t0 = Instant::now();
        let deadline = t0 + self.cfg.fetch.run_deadline();
        let fetched = self.fetcher.fetch_all(self.registry.sources(), deadline).await;

        let now = Utc::now();
        let (items, mut report) = self.process_until(fetched, now, deadline).await;
        report.duration_ms = t0.elapsed().as_millis() as u64;

        histogram!("pipeline_run_ms").record(report.duration_ms as f64);
        counter!("pipeline_runs_total").increment(1);
        gauge!("pipeline_clusters").set(report.clusters as f64);
        gauge!("pipeline_sources_unavailable").set(report.unavailable_sources() as f64);
        gauge!("pipeline_last_run_ts").set(now.timestamp() as f64);
        tracing::info!(
            target: "pipeline",
            sources = report.sources.len(),
            unavailable = report.unavailable_sources(),
            items = report.normalized_items,
            clusters = report.clusters,
            duration_ms = report.duration_ms,
            "run complete"
        );

        let report = Arc::new(report);
        if let Ok(mut last) = self.cache.last_report.write() {
            *last = Some(report.clone());
        }
        CachedRun {
            items: Arc::new(items),
            report,
            generated_at: now,
            computed_at: Instant::now(),
        }
    }

    /// Everything after the fetch barrier, evaluated at `now`. Returns every
    /// cluster representative, ranked and unfiltered. Embedding gets a fresh
    /// `run_deadline_secs` budget.
    pub async fn process(
        &self,
        fetched: Vec<SourceFetch>,
        now: DateTime<Utc>,
    ) -> (Vec<NewsItem>, RunReport) {
        let deadline = Instant::now() + self.cfg.fetch.run_deadline();
        self.process_until(fetched, now, deadline).await
    }

    async fn process_until(
        &self,
        fetched: Vec<SourceFetch>,
        now: DateTime<Utc>,
        deadline: Instant,
    ) -> (Vec<NewsItem>, RunReport) {
        let mut sources = Vec::with_capacity(fetched.len());
        let mut items: Vec<NormalizedItem> = Vec::new();

        for f in fetched {
            let docs = match f.outcome {
                Ok(docs) => docs,
                Err(e) => {
                    sources.push(SourceReport {
                        source_id: f.source.id.clone(),
                        status: SourceStatus::Unavailable,
                        documents: 0,
                        items: 0,
                        error: Some(e.to_string()),
                    });
                    continue;
                }
            };

            let out = normalize_source(&docs, self.cfg.fetch.max_per_source);
            let status = if out.all_failed() {
                SourceStatus::ParseFailure
            } else if !out.parse_failures.is_empty() || docs.len() < f.source.urls.len() {
                SourceStatus::Partial
            } else {
                SourceStatus::Ok
            };
            tracing::debug!(
                target: "pipeline",
                source = %f.source.id,
                status = status.as_str(),
                documents = out.documents,
                items = out.items.len(),
                dropped = out.dropped,
                duplicate_urls = out.duplicate_urls,
                capped = out.capped,
                "source normalized"
            );

            if status != SourceStatus::ParseFailure {
                if let Some(sink) = &self.sink {
                    let record = SinkRecord::new(&f.source, status, out.documents, &out.items, now);
                    if let Err(e) = sink.store(&f.source, &record).await {
                        counter!("pipeline_sink_errors_total").increment(1);
                        tracing::warn!(target: "pipeline", source = %f.source.id, error = %format!("{e:#}"), "audit sink failed");
                    }
                }
            }

            sources.push(SourceReport {
                source_id: f.source.id.clone(),
                status,
                documents: out.documents,
                items: out.items.len(),
                error: out.parse_failures.first().map(|e| e.to_string()),
            });
            items.extend(out.items);
        }

        let normalized_items = items.len();
        let embeddings = if items.is_empty() {
            Vec::new()
        } else {
            self.embedder.embed_items(&items, deadline).await
        };
        let embedding_failures = embeddings.iter().filter(|e| e.is_none()).count();

        let clusters = self.clusterer.cluster(items, embeddings);
        let mut ranked: Vec<NewsItem> = clusters
            .iter()
            .map(|c| NewsItem::from_cluster(c, self.scorer.score(c, now)))
            .collect();
        ranked.sort_by(rank_order);

        let report = RunReport {
            generated_at: now,
            duration_ms: 0,
            sources,
            normalized_items,
            embedding_failures,
            clusters: clusters.len(),
            model: self.embedder.model_name().to_string(),
        };
        (ranked, report)
    }
}
