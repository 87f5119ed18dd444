// src/cluster.rs
//! Single-pass nearest-representative clustering.
//!
//! Items are visited oldest first (`NormalizedItem::order_key`). Each one joins
//! the existing cluster whose representative is most similar, if that
//! similarity reaches the threshold; otherwise it starts a new cluster. The
//! first member is the representative and never changes, so the result only
//! depends on the input set, not on input order.

use std::collections::HashSet;

use crate::config::ClusteringConfig;
use crate::ingest::types::NormalizedItem;

/// Near-duplicate reports of one story. `members[0]` is the earliest reporter.
#[derive(Debug, Clone)]
pub struct Cluster {
    pub members: Vec<NormalizedItem>,
    pub corroboration_count: usize,
}

impl Cluster {
    pub fn representative(&self) -> &NormalizedItem {
        &self.members[0]
    }

    pub fn distinct_sources(&self) -> usize {
        self.members
            .iter()
            .map(|m| m.source_id.as_str())
            .collect::<HashSet<_>>()
            .len()
    }
}

/// Cosine similarity; 0 for mismatched or zero vectors.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na * nb)
}

#[derive(Debug, Clone)]
pub struct Clusterer {
    threshold: f32,
    count_same_source: bool,
}

impl Clusterer {
    pub fn new(cfg: &ClusteringConfig) -> Self {
        Self {
            threshold: cfg.similarity_threshold,
            count_same_source: cfg.count_same_source,
        }
    }

    /// Partition `items` into clusters. `embeddings[i]` belongs to `items[i]`;
    /// `None` (or a missing slot) makes that item a singleton nobody can join.
    pub fn cluster(
        &self,
        items: Vec<NormalizedItem>,
        embeddings: Vec<Option<Vec<f32>>>,
    ) -> Vec<Cluster> {
        let mut paired: Vec<(NormalizedItem, Option<Vec<f32>>)> = items
            .into_iter()
            .zip(embeddings.into_iter().chain(std::iter::repeat(None)))
            .collect();
        paired.sort_by(|a, b| a.0.order_key().cmp(&b.0.order_key()));

        let mut clusters: Vec<Cluster> = Vec::new();
        // Representative vector per cluster, parallel to `clusters`.
        let mut reps: Vec<Option<Vec<f32>>> = Vec::new();

        for (item, emb) in paired {
            let best = emb.as_ref().and_then(|v| {
                let mut best: Option<(usize, f32)> = None;
                for (idx, rep) in reps.iter().enumerate() {
                    let Some(rep) = rep else { continue };
                    let sim = cosine(v, rep);
                    // Strictly greater keeps the lowest index on ties.
                    if sim >= self.threshold && best.is_none_or(|(_, s)| sim > s) {
                        best = Some((idx, sim));
                    }
                }
                best
            });

            match best {
                Some((idx, sim)) => {
                    tracing::trace!(target: "cluster", url = %item.url, into = %clusters[idx].representative().url, sim, "joined");
                    clusters[idx].members.push(item);
                }
                None => {
                    clusters.push(Cluster {
                        members: vec![item],
                        corroboration_count: 1,
                    });
                    reps.push(emb);
                }
            }
        }

        for c in &mut clusters {
            c.corroboration_count = if self.count_same_source {
                c.members.len()
            } else {
                c.distinct_sources()
            };
        }
        clusters
    }
}
