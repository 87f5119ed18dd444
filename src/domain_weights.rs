//! # Domain Weights
//!
//! Static authority table mapping a news source's registrable domain
//! (e.g. `cbr.ru`, `reuters.com`) to a weight in `[0.0, 1.0]`.
//!
//! - Loaded from the `[domains]` section of the pipeline config.
//! - Case-insensitive lookup; `www.` and trailing dots are ignored.
//! - Aliases map mirror or vanity domains to a canonical entry.
//! - Fallback order: alias → exact match → parent domain → default floor.

use serde::Deserialize;
use std::collections::HashMap;

use crate::error::{PipelineError, Result};

/// Domain → authority weight table.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DomainWeightsConfig {
    /// Weight used when no entry matches.
    pub default_weight: f64,
    /// Explicit weights keyed by domain.
    pub weights: HashMap<String, f64>,
    /// Alias domain → canonical domain.
    pub aliases: HashMap<String, String>,
}

impl Default for DomainWeightsConfig {
    fn default() -> Self {
        Self {
            default_weight: 0.5,
            weights: HashMap::new(),
            aliases: HashMap::new(),
        }
    }
}

impl DomainWeightsConfig {
    /// Get the authority weight for a domain.
    ///
    /// Steps:
    /// 1. Alias lookup → canonical → weight.
    /// 2. Exact weight match.
    /// 3. Nearest parent domain (`press.cbr.ru` → `cbr.ru`).
    /// 4. Default weight.
    pub fn weight_for(&self, domain: &str) -> f64 {
        let d = normalize(domain);

        // 1) Alias resolution.
        if let Some(canon) = self.lookup_alias(&d) {
            if let Some(w) = self.lookup_weight(&normalize(canon)) {
                return clamp01(w);
            }
        }

        // 2) Exact weight match.
        if let Some(w) = self.lookup_weight(&d) {
            return clamp01(w);
        }

        // 3) Parent domains, most specific first.
        let mut rest = d.as_str();
        while let Some((_, parent)) = rest.split_once('.') {
            if !parent.contains('.') {
                break;
            }
            if let Some(w) = self.lookup_weight(parent) {
                return clamp01(w);
            }
            rest = parent;
        }

        // 4) Default.
        clamp01(self.default_weight)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        let ok = |v: f64| v.is_finite() && (0.0..=1.0).contains(&v);
        if !ok(self.default_weight) {
            return Err(PipelineError::ConfigInvalid(format!(
                "domains.default_weight {} not in [0, 1]",
                self.default_weight
            )));
        }
        if let Some((k, v)) = self.weights.iter().find(|(_, &v)| !ok(v)) {
            return Err(PipelineError::ConfigInvalid(format!(
                "domains.weights.{k} = {v} not in [0, 1]"
            )));
        }
        Ok(())
    }

    // Config keys are user-written, so compare them normalized as well.
    fn lookup_weight(&self, d: &str) -> Option<f64> {
        self.weights
            .get(d)
            .copied()
            .or_else(|| {
                self.weights
                    .iter()
                    .find(|(k, _)| normalize(k) == d)
                    .map(|(_, &w)| w)
            })
    }

    fn lookup_alias(&self, d: &str) -> Option<&String> {
        self.aliases.get(d).or_else(|| {
            self.aliases
                .iter()
                .find(|(k, _)| normalize(k) == d)
                .map(|(_, c)| c)
        })
    }
}

/// Lowercase, trim, drop a leading `www.` and any trailing dot.
fn normalize(s: &str) -> String {
    let out = s.trim().trim_end_matches('.').to_ascii_lowercase();
    match out.strip_prefix("www.") {
        Some(rest) => rest.to_string(),
        None => out,
    }
}

fn clamp01(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}
