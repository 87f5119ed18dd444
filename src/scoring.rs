// src/scoring.rs
//! Hotness scoring for cluster representatives.
//!
//! Three coefficients, each in [0,1]:
//! - `time_coef`    : half-life decay since publish, 1 at (or before) publish
//! - `density_coef` : `1 - 1/(1+n)` over the corroboration count
//! - `domain_coef`  : authority weight of the representative's domain
//!
//! hotness = w_t*time + w_d*density + w_s*domain, divided by the weight sum
//! and clamped to [0,1].

use chrono::{DateTime, Utc};

use crate::cluster::Cluster;
use crate::config::{HotnessWeights, ScoringConfig};
use crate::domain_weights::DomainWeightsConfig;

/// Smallest `time_coef` reported after rounding; keeps it strictly positive.
pub const MIN_REPORTED_TIME_COEF: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coefficients {
    pub time_coef: f64,
    pub density_coef: f64,
    pub domain_coef: f64,
    pub hotness: f64,
}

impl Coefficients {
    /// Values as they appear in API output.
    pub fn rounded(&self) -> Self {
        Self {
            time_coef: round6(self.time_coef).max(MIN_REPORTED_TIME_COEF),
            density_coef: round6(self.density_coef),
            domain_coef: round6(self.domain_coef),
            hotness: round6(self.hotness),
        }
    }
}

pub fn round6(x: f64) -> f64 {
    (x * 1e6).round() / 1e6
}

/// `0.5^(elapsed/half_life)`. Future timestamps count as "just published".
pub fn time_coef(published_at: DateTime<Utc>, now: DateTime<Utc>, half_life_hours: f64) -> f64 {
    let elapsed_ms = (now - published_at).num_milliseconds();
    if elapsed_ms <= 0 {
        return 1.0;
    }
    let hours = elapsed_ms as f64 / 3_600_000.0;
    0.5f64
        .powf(hours / half_life_hours.max(f64::EPSILON))
        .max(f64::MIN_POSITIVE)
}

pub fn density_coef(corroboration_count: usize) -> f64 {
    1.0 - 1.0 / (1.0 + corroboration_count as f64)
}

pub fn combine(time: f64, density: f64, domain: f64, w: &HotnessWeights) -> f64 {
    let raw = time * w.time + density * w.density + domain * w.domain;
    let denom = (w.time + w.density + w.domain).max(1e-12);
    (raw / denom).clamp(0.0, 1.0)
}

#[derive(Debug, Clone)]
pub struct Scorer {
    cfg: ScoringConfig,
    domains: DomainWeightsConfig,
}

impl Scorer {
    pub fn new(cfg: ScoringConfig, domains: DomainWeightsConfig) -> Self {
        Self { cfg, domains }
    }

    pub fn score(&self, cluster: &Cluster, now: DateTime<Utc>) -> Coefficients {
        let rep = cluster.representative();
        let time = time_coef(rep.published_at, now, self.cfg.half_life_hours);
        let density = density_coef(cluster.corroboration_count);
        let domain = self.domains.weight_for(&rep.source_domain);
        Coefficients {
            time_coef: time,
            density_coef: density,
            domain_coef: domain,
            hotness: combine(time, density, domain, &self.cfg.weights),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 14, 12, 0, 0).unwrap()
    }

    #[test]
    fn time_coef_halves_every_half_life() {
        let n = now();
        assert_eq!(time_coef(n, n, 12.0), 1.0);
        assert!((time_coef(n - Duration::hours(12), n, 12.0) - 0.5).abs() < 1e-12);
        assert!((time_coef(n - Duration::hours(24), n, 12.0) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn time_coef_is_strictly_decreasing_and_positive() {
        let n = now();
        let mut prev = 1.0;
        for h in [1, 5, 24, 72, 24 * 30] {
            let t = time_coef(n - Duration::hours(h), n, 12.0);
            assert!(t < prev, "{h}h");
            assert!(t > 0.0);
            prev = t;
        }
        assert!(time_coef(n - Duration::days(3650), n, 1.0) > 0.0);
    }

    #[test]
    fn future_timestamps_clamp_to_one() {
        let n = now();
        assert_eq!(time_coef(n + Duration::minutes(5), n, 12.0), 1.0);
    }

    #[test]
    fn density_saturates() {
        assert_eq!(density_coef(0), 0.0);
        assert_eq!(density_coef(1), 0.5);
        assert!(density_coef(2) > density_coef(1));
        assert!(density_coef(1000) < 1.0);
    }

    #[test]
    fn combine_normalizes_weights() {
        let w = HotnessWeights {
            time: 2.0,
            density: 1.0,
            domain: 1.0,
        };
        let h = combine(1.0, 0.5, 0.5, &w);
        assert!((h - 0.75).abs() < 1e-12);
        let eq = HotnessWeights::default();
        assert!((combine(1.0, 0.5, 0.9, &eq) - 0.8).abs() < 1e-9);
    }

    #[test]
    fn rounding_keeps_time_positive() {
        let c = Coefficients {
            time_coef: 1e-9,
            density_coef: 0.6666666666,
            domain_coef: 0.9,
            hotness: 0.1234564,
        }
        .rounded();
        assert_eq!(c.time_coef, MIN_REPORTED_TIME_COEF);
        assert_eq!(c.density_coef, 0.666667);
        assert_eq!(c.hotness, 0.123456);
    }
}
