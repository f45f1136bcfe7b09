//! Link quality scoring
//!
//! `score = weighted_latency + loss_penalty + jitter_penalty`, lower is
//! better. One point of loss costs 100 score points, so loss dominates any
//! realistic latency difference.

use crate::config::Thresholds;
use crate::model::LatencyMetrics;
use serde::{Deserialize, Serialize};

/// Weight of the peer-hop latency
pub const PEER_LATENCY_WEIGHT: f64 = 0.7;
/// Weight of the destination-hop latency
pub const DEST_LATENCY_WEIGHT: f64 = 0.3;
/// Score points per loss percentage point (summed over both legs)
pub const LOSS_WEIGHT: f64 = 100.0;
/// Score points per millisecond of jitter (summed over both legs)
pub const JITTER_WEIGHT: f64 = 0.5;

/// Largest finite latency/jitter taken at face value (ms)
pub const LATENCY_CEILING_MS: f64 = 1.0e7;
/// Latency substituted for an unreachable leg (ms), above the ceiling
pub const UNREACHABLE_LATENCY_MS: f64 = 1.0e8;

/// Score with its components
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityScore {
    /// Total score (lower is better)
    pub score: f64,
    /// `0.7 * peer + 0.3 * destination` latency
    pub weighted_latency: f64,
    /// `100 * (peer_loss + dest_loss)`
    pub loss_penalty: f64,
    /// `0.5 * (peer_jitter + dest_jitter)`
    pub jitter_penalty: f64,
}

/// Score a snapshot.
///
/// Total over every input: an infinite latency yields a large finite score
/// that ranks worse than any finite latency, never NaN.
#[inline]
pub fn score(metrics: &LatencyMetrics) -> f64 {
    breakdown(metrics).score
}

/// Score a snapshot, keeping the components
pub fn breakdown(metrics: &LatencyMetrics) -> QualityScore {
    let weighted_latency = PEER_LATENCY_WEIGHT * bounded_latency(metrics.peer_avg_ms)
        + DEST_LATENCY_WEIGHT * bounded_latency(metrics.dest_avg_ms);
    let loss_penalty = LOSS_WEIGHT * (bounded_loss(metrics.peer_loss_pct) + bounded_loss(metrics.dest_loss_pct));
    let jitter_penalty = JITTER_WEIGHT
        * (bounded_jitter(metrics.peer_stddev_ms) + bounded_jitter(metrics.dest_stddev_ms));

    QualityScore {
        score: weighted_latency + loss_penalty + jitter_penalty,
        weighted_latency,
        loss_penalty,
        jitter_penalty,
    }
}

#[inline(always)]
fn bounded_latency(ms: f64) -> f64 {
    if ms.is_finite() {
        ms.clamp(0.0, LATENCY_CEILING_MS)
    } else if ms.is_sign_negative() {
        0.0
    } else {
        UNREACHABLE_LATENCY_MS
    }
}

#[inline(always)]
fn bounded_jitter(ms: f64) -> f64 {
    if ms.is_nan() {
        0.0
    } else {
        ms.clamp(0.0, LATENCY_CEILING_MS)
    }
}

#[inline(always)]
fn bounded_loss(pct: f64) -> f64 {
    if pct.is_nan() {
        100.0
    } else {
        pct.clamp(0.0, 100.0)
    }
}

/// Scorer bound to the observability thresholds.
///
/// The warning/critical flags feed telemetry only; switching decisions use
/// the score and the loss-based health flag.
#[derive(Debug, Clone)]
pub struct QualityScorer {
    thresholds: Thresholds,
}

impl QualityScorer {
    /// Create scorer with the given thresholds
    pub fn new(thresholds: Thresholds) -> Self {
        Self { thresholds }
    }

    /// Thresholds in use
    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Score a snapshot
    #[inline]
    pub fn score(&self, metrics: &LatencyMetrics) -> f64 {
        score(metrics)
    }

    /// Either leg at or above its warning latency
    pub fn has_latency_warning(&self, metrics: &LatencyMetrics) -> bool {
        metrics.peer_avg_ms >= self.thresholds.peer_warning_ms
            || metrics.dest_avg_ms >= self.thresholds.dest_warning_ms
    }

    /// Either leg at or above its critical latency
    pub fn has_latency_critical(&self, metrics: &LatencyMetrics) -> bool {
        metrics.peer_avg_ms >= self.thresholds.peer_critical_ms
            || metrics.dest_avg_ms >= self.thresholds.dest_critical_ms
    }
}

impl Default for QualityScorer {
    fn default() -> Self {
        Self::new(Thresholds::default())
    }
}
