// src/embed/mod.rs
//! Item embeddings for near-duplicate clustering.
//!
//! `Embedder` is built once at startup around a warm [`TextEncoder`] and shared
//! by every run. A failure never fails the run: the affected items come back as
//! `None` and are clustered as singletons.

pub mod encoder;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use once_cell::sync::OnceCell;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};

use crate::config::EmbeddingConfig;
use crate::error::{PipelineError, Result};
use crate::ingest::types::NormalizedItem;

pub use encoder::{FastEmbedEncoder, TextEncoder};

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("embedding_items_total", "Items sent to the encoder.");
        describe_counter!(
            "embedding_failures_total",
            "Items left without an embedding (singleton clusters)."
        );
        describe_counter!("embedding_batch_failures_total", "Encoder batches that failed.");
        describe_histogram!("embedding_batch_ms", "Encoder batch latency in milliseconds.");
    });
}

/// Up to `n` leading sentences of `text`.
fn lead_sentences(text: &str, n: usize) -> &str {
    if n == 0 {
        return "";
    }
    let mut count = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if !matches!(c, '.' | '!' | '?' | '\u{2026}') {
            continue;
        }
        match chars.peek() {
            Some((_, next)) if next.is_whitespace() => {
                count += 1;
                if count == n {
                    return &text[..i + c.len_utf8()];
                }
            }
            _ => {}
        }
    }
    text
}

pub struct Embedder {
    encoder: Arc<dyn TextEncoder>,
    cfg: EmbeddingConfig,
}

impl Embedder {
    pub fn new(encoder: Arc<dyn TextEncoder>, cfg: EmbeddingConfig) -> Self {
        ensure_metrics_described();
        Self { encoder, cfg }
    }

    pub fn model_name(&self) -> &str {
        self.encoder.name()
    }

    /// Prefix + title + summary lead, capped at `max_chars` (prefix excluded).
    pub fn embedding_text(&self, item: &NormalizedItem) -> String {
        let lead = lead_sentences(&item.summary, self.cfg.summary_sentences);
        let body = match item.title.as_deref() {
            Some(t) if lead.is_empty() => t.to_string(),
            Some(t) if t.ends_with(['.', '!', '?', ':']) => format!("{t} {lead}"),
            Some(t) => format!("{t}. {lead}"),
            None => lead.to_string(),
        };
        let body: String = body.chars().take(self.cfg.max_chars.max(1)).collect();
        format!("{}{}", self.cfg.text_prefix, body)
    }

    /// One slot per item, in input order. Nothing is sent to the encoder
    /// after `deadline` or after a batch has timed out; those items stay `None`.
    pub async fn embed_items(
        &self,
        items: &[NormalizedItem],
        deadline: Instant,
    ) -> Vec<Option<Vec<f32>>> {
        let texts: Vec<String> = items.iter().map(|it| self.embedding_text(it)).collect();
        let mut out = Vec::with_capacity(texts.len());
        let mut stalled = false;

        for chunk in texts.chunks(self.cfg.batch_size.max(1)) {
            if stalled {
                out.extend(std::iter::repeat_with(|| None).take(chunk.len()));
                continue;
            }
            counter!("embedding_items_total").increment(chunk.len() as u64);
            match self.encode_blocking(chunk.to_vec(), deadline).await {
                Ok(vectors) => out.extend(vectors.into_iter().map(|v| self.checked(v))),
                Err(e) => {
                    counter!("embedding_batch_failures_total").increment(1);
                    tracing::warn!(target: "embed", batch = chunk.len(), error = %e, "batch failed");
                    if is_timeout(&e) {
                        stalled = true;
                        out.extend(std::iter::repeat_with(|| None).take(chunk.len()));
                    } else if chunk.len() > 1 {
                        for text in chunk {
                            if stalled {
                                out.push(None);
                                continue;
                            }
                            let one = match self.encode_blocking(vec![text.clone()], deadline).await {
                                Ok(mut v) => v.pop().and_then(|v| self.checked(v)),
                                Err(e) => {
                                    stalled = is_timeout(&e);
                                    None
                                }
                            };
                            out.push(one);
                        }
                    } else {
                        out.extend(std::iter::repeat_with(|| None).take(chunk.len()));
                    }
                }
            }
        }

        let failed = out.iter().filter(|v| v.is_none()).count();
        if failed > 0 {
            counter!("embedding_failures_total").increment(failed as u64);
            tracing::warn!(target: "embed", failed, total = out.len(), stalled, "items left unembedded");
        }
        out
    }

    /// Run the encoder off the async runtime, bounded by `timeout_secs` and
    /// by `deadline`, whichever comes first.
    async fn encode_blocking(
        &self,
        texts: Vec<String>,
        deadline: Instant,
    ) -> Result<Vec<Vec<f32>>> {
        let n = texts.len();
        let t0 = Instant::now();
        let until = deadline.min(t0 + Duration::from_secs(self.cfg.timeout_secs));
        if until <= t0 {
            return Err(PipelineError::EmbeddingFailure(
                "timed out: run deadline reached".to_string(),
            ));
        }
        let encoder = Arc::clone(&self.encoder);
        let task = tokio::task::spawn_blocking(move || encoder.encode(&texts));
        let res = timeout_at(until, task).await;
        histogram!("embedding_batch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);

        let vectors = match res {
            Err(_) => {
                return Err(PipelineError::EmbeddingFailure(format!(
                    "timed out after {:.1}s",
                    t0.elapsed().as_secs_f64()
                )))
            }
            Ok(Err(join)) => return Err(PipelineError::EmbeddingFailure(join.to_string())),
            Ok(Ok(r)) => r?,
        };
        if vectors.len() != n {
            return Err(PipelineError::EmbeddingFailure(format!(
                "encoder returned {} vectors for {n} texts",
                vectors.len()
            )));
        }
        Ok(vectors)
    }

    /// Reject wrong-sized or non-finite vectors; L2-normalize the rest.
    fn checked(&self, mut v: Vec<f32>) -> Option<Vec<f32>> {
        let dim = self.encoder.dimension();
        if v.is_empty() || (dim > 0 && v.len() != dim) || v.iter().any(|x| !x.is_finite()) {
            return None;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm <= f32::EPSILON {
            return None;
        }
        v.iter_mut().for_each(|x| *x /= norm);
        Some(v)
    }
}

fn is_timeout(e: &PipelineError) -> bool {
    matches!(e, PipelineError::EmbeddingFailure(msg) if msg.starts_with("timed out"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Two-dim encoder: vector depends on text length; "bad" texts fail.
    struct Toy {
        calls: AtomicUsize,
    }

    impl TextEncoder for Toy {
        fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if texts.iter().any(|t| t.contains("bad")) {
                return Err(PipelineError::EmbeddingFailure("unsupported input".into()));
            }
            Ok(texts
                .iter()
                .map(|t| {
                    if t.contains("nan") {
                        vec![f32::NAN, 1.0]
                    } else {
                        vec![t.len() as f32, 1.0]
                    }
                })
                .collect())
        }
        fn dimension(&self) -> usize {
            2
        }
        fn name(&self) -> &str {
            "toy"
        }
    }

    fn item(title: Option<&str>, summary: &str) -> NormalizedItem {
        NormalizedItem {
            source_id: "s".into(),
            source_domain: "s.test".into(),
            published_at: Utc::now(),
            source_timezone: chrono_tz::Tz::UTC,
            published_fallback: false,
            url: "https://s.test/1".into(),
            title: title.map(str::to_string),
            summary: summary.into(),
        }
    }

    fn later() -> Instant {
        Instant::now() + Duration::from_secs(30)
    }

    fn embedder(cfg: EmbeddingConfig) -> (Embedder, Arc<Toy>) {
        let toy = Arc::new(Toy {
            calls: AtomicUsize::new(0),
        });
        (Embedder::new(toy.clone(), cfg), toy)
    }

    #[test]
    fn lead_takes_leading_sentences() {
        let s = "Rate held at 21%. Next meeting in April. Inflation slowed.";
        assert_eq!(lead_sentences(s, 1), "Rate held at 21%.");
        assert_eq!(lead_sentences(s, 2), "Rate held at 21%. Next meeting in April.");
        assert_eq!(lead_sentences(s, 5), s);
        assert_eq!(lead_sentences("v1.5 released", 1), "v1.5 released");
        assert_eq!(lead_sentences(s, 0), "");
    }

    #[test]
    fn embedding_text_joins_title_and_lead() {
        let (e, _) = embedder(EmbeddingConfig {
            summary_sentences: 1,
            ..EmbeddingConfig::default()
        });
        let it = item(Some("Key rate"), "Held at 21%. More text follows.");
        assert_eq!(e.embedding_text(&it), "passage: Key rate. Held at 21%.");
        assert_eq!(
            e.embedding_text(&item(None, "Only summary.")),
            "passage: Only summary."
        );
    }

    #[test]
    fn embedding_text_is_capped() {
        let (e, _) = embedder(EmbeddingConfig {
            max_chars: 8,
            text_prefix: String::new(),
            ..EmbeddingConfig::default()
        });
        assert_eq!(e.embedding_text(&item(Some("Headline words"), "")), "Headline");
    }

    #[tokio::test]
    async fn vectors_are_unit_length() {
        let (e, _) = embedder(EmbeddingConfig::default());
        let out = e.embed_items(&[item(Some("abc"), "")], later()).await;
        let v = out[0].as_ref().unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn failed_batch_degrades_per_item() {
        let (e, toy) = embedder(EmbeddingConfig {
            batch_size: 8,
            ..EmbeddingConfig::default()
        });
        let items = vec![
            item(Some("good one"), ""),
            item(Some("bad one"), ""),
            item(Some("nan one"), ""),
        ];
        let out = e.embed_items(&items, later()).await;
        assert!(out[0].is_some());
        assert!(out[1].is_none());
        assert!(out[2].is_none());
        // one batch call, then three single-item retries
        assert_eq!(toy.calls.load(Ordering::SeqCst), 4);
    }

    /// Sleeps on every call.
    struct Slow {
        calls: AtomicUsize,
    }

    impl TextEncoder for Slow {
        fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(1500));
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
        fn dimension(&self) -> usize {
            2
        }
        fn name(&self) -> &str {
            "slow"
        }
    }

    #[tokio::test]
    async fn stalled_encoder_is_bounded_by_the_run_deadline() {
        let slow = Arc::new(Slow {
            calls: AtomicUsize::new(0),
        });
        let e = Embedder::new(
            slow.clone(),
            EmbeddingConfig {
                batch_size: 1,
                timeout_secs: 10,
                ..EmbeddingConfig::default()
            },
        );
        let items: Vec<_> = (0..6).map(|i| item(Some(&format!("story {i}")), "")).collect();

        let started = Instant::now();
        let out = e
            .embed_items(&items, started + Duration::from_millis(300))
            .await;
        assert!(started.elapsed() < Duration::from_secs(1), "{:?}", started.elapsed());
        assert_eq!(out.len(), 6);
        assert!(out.iter().all(Option::is_none));
        assert_eq!(slow.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn nothing_is_encoded_past_the_deadline() {
        let (e, toy) = embedder(EmbeddingConfig::default());
        let out = e
            .embed_items(&[item(Some("abc"), "")], Instant::now())
            .await;
        assert!(out[0].is_none());
        assert_eq!(toy.calls.load(Ordering::SeqCst), 0);
    }
}
