//! Baseline calibration
//!
//! Aggregates repeated measurements per provider and derives thresholds,
//! probe parameters and a cycle interval suited to the observed network.

use crate::config::{LinkPilotConfig, ProbeConfig, Thresholds};
use crate::model::{LatencyMetrics, ProviderId};
use serde::{Deserialize, Serialize};

/// Accumulates measurement rounds for one provider
#[derive(Debug, Clone)]
pub struct BaselineCollector {
    provider: ProviderId,
    peer_latency: Vec<f64>,
    peer_jitter: Vec<f64>,
    peer_loss: Vec<f64>,
    dest_latency: Vec<f64>,
    dest_jitter: Vec<f64>,
    dest_loss: Vec<f64>,
    failures: u32,
}

impl BaselineCollector {
    /// Create collector for a provider
    pub fn new(provider: ProviderId) -> Self {
        Self {
            provider,
            peer_latency: Vec::new(),
            peer_jitter: Vec::new(),
            peer_loss: Vec::new(),
            dest_latency: Vec::new(),
            dest_jitter: Vec::new(),
            dest_loss: Vec::new(),
            failures: 0,
        }
    }

    /// Record a successful round.
    ///
    /// A round whose latency is not finite (a hop that never answered)
    /// counts as a failure so it cannot leak into the thresholds.
    pub fn record(&mut self, m: &LatencyMetrics) {
        if !m.peer_avg_ms.is_finite() || !m.dest_avg_ms.is_finite() {
            self.record_failure();
            return;
        }
        self.peer_latency.push(m.peer_avg_ms);
        self.peer_jitter.push(finite_or_zero(m.peer_stddev_ms));
        self.peer_loss.push(m.peer_loss_pct);
        self.dest_latency.push(m.dest_avg_ms);
        self.dest_jitter.push(finite_or_zero(m.dest_stddev_ms));
        self.dest_loss.push(m.dest_loss_pct);
    }

    /// Record a failed round
    pub fn record_failure(&mut self) {
        self.failures += 1;
    }

    /// Aggregate into a baseline
    pub fn finish(&self) -> ProviderBaseline {
        let successes = self.peer_latency.len() as u32;
        let total = successes + self.failures;

        ProviderBaseline {
            provider: self.provider.clone(),
            peer_latency: Spread::of(&self.peer_latency),
            peer_jitter_avg: mean(&self.peer_jitter),
            peer_jitter_max: max(&self.peer_jitter),
            peer_loss_max: max(&self.peer_loss),
            dest_latency: Spread::of(&self.dest_latency),
            dest_jitter_avg: mean(&self.dest_jitter),
            dest_jitter_max: max(&self.dest_jitter),
            dest_loss_max: max(&self.dest_loss),
            measurements: successes,
            success_rate: if total > 0 {
                successes as f64 / total as f64 * 100.0
            } else {
                0.0
            },
        }
    }
}

/// Mean / min / max / sample standard deviation of a series
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Spread {
    /// Mean
    pub avg: f64,
    /// Minimum
    pub min: f64,
    /// Maximum
    pub max: f64,
    /// Sample standard deviation (0 with fewer than two values)
    pub std: f64,
}

impl Spread {
    /// Compute over `values`; all zero when empty
    pub fn of(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        let avg = mean(values);
        let std = if values.len() > 1 {
            let var = values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
            var.sqrt()
        } else {
            0.0
        };
        Self {
            avg,
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: max(values),
            std,
        }
    }
}

/// Aggregated measurements for one provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderBaseline {
    /// Provider
    pub provider: ProviderId,
    /// Peer-hop latency (ms)
    pub peer_latency: Spread,
    /// Mean peer jitter (ms)
    pub peer_jitter_avg: f64,
    /// Max peer jitter (ms)
    pub peer_jitter_max: f64,
    /// Max peer loss (%)
    pub peer_loss_max: f64,
    /// Destination-hop latency (ms)
    pub dest_latency: Spread,
    /// Mean destination jitter (ms)
    pub dest_jitter_avg: f64,
    /// Max destination jitter (ms)
    pub dest_jitter_max: f64,
    /// Max destination loss (%)
    pub dest_loss_max: f64,
    /// Successful rounds
    pub measurements: u32,
    /// Successful rounds (%)
    pub success_rate: f64,
}

/// Recommended settings derived from baselines
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    /// Latency thresholds and switch margin
    pub thresholds: Thresholds,
    /// Probe count
    pub probe_count: u32,
    /// Probe interval (s)
    pub probe_interval_secs: f64,
    /// Cycle interval (s)
    pub cycle_interval_secs: u64,
    /// Worst mean peer latency across providers (ms)
    pub peer_baseline_ms: f64,
    /// Worst mean destination latency across providers (ms)
    pub dest_baseline_ms: f64,
    /// Mean peer jitter across providers (ms)
    pub avg_peer_jitter_ms: f64,
    /// Mean destination jitter across providers (ms)
    pub avg_dest_jitter_ms: f64,
    /// Spread of mean latency between providers (ms)
    pub provider_diff_ms: f64,
}

impl Recommendation {
    /// Merge into a config, keeping the catalog and integrations untouched
    pub fn apply_to(&self, config: &mut LinkPilotConfig) {
        let t = &mut config.thresholds;
        t.peer_warning_ms = self.thresholds.peer_warning_ms;
        t.peer_critical_ms = self.thresholds.peer_critical_ms;
        t.dest_warning_ms = self.thresholds.dest_warning_ms;
        t.dest_critical_ms = self.thresholds.dest_critical_ms;
        t.switch_margin = self.thresholds.switch_margin;

        config.probe = ProbeConfig {
            count: self.probe_count,
            interval_secs: self.probe_interval_secs,
            timeout_secs: config.probe.timeout_secs.min(self.cycle_interval_secs.saturating_sub(1)).max(1),
            ..config.probe.clone()
        };
        config.cycle_interval_secs = self.cycle_interval_secs;
    }
}

/// Derive settings from per-provider baselines.
///
/// Warning/critical levels are multiples of the worst mean latency seen;
/// the switch margin tracks how far apart providers are plus typical
/// jitter, bounded to `[3, 10]`.
pub fn recommend(baselines: &[ProviderBaseline]) -> Recommendation {
    // Providers that never answered have no latency to learn from
    let baselines: Vec<&ProviderBaseline> = baselines.iter().filter(|b| b.measurements > 0).collect();

    let peer_avgs: Vec<f64> = baselines.iter().map(|b| b.peer_latency.avg).collect();
    let dest_avgs: Vec<f64> = baselines.iter().map(|b| b.dest_latency.avg).collect();

    let peer_baseline = if peer_avgs.is_empty() { 10.0 } else { max(&peer_avgs) };
    let dest_baseline = if dest_avgs.is_empty() { 10.0 } else { max(&dest_avgs) };

    let peer_diff = range(&peer_avgs);
    let dest_diff = range(&dest_avgs);

    let avg_peer_jitter = if baselines.is_empty() {
        1.0
    } else {
        mean(&baselines.iter().map(|b| b.peer_jitter_avg).collect::<Vec<_>>())
    };
    let avg_dest_jitter = if baselines.is_empty() {
        1.0
    } else {
        mean(&baselines.iter().map(|b| b.dest_jitter_avg).collect::<Vec<_>>())
    };

    let thresholds = Thresholds {
        peer_warning_ms: (peer_baseline * 2.0).round(),
        peer_critical_ms: (peer_baseline * 4.0).round(),
        dest_warning_ms: (dest_baseline * 2.5).round(),
        dest_critical_ms: (dest_baseline * 5.0).round(),
        switch_margin: (peer_diff + dest_diff + avg_peer_jitter).round().clamp(3.0, 10.0),
        ..Thresholds::default()
    };

    let all_latencies: Vec<f64> = peer_avgs.iter().chain(dest_avgs.iter()).copied().collect();
    let avg_latency = mean(&all_latencies);
    let (probe_count, probe_interval_secs) = if avg_latency < 50.0 { (5, 0.5) } else { (3, 1.0) };

    let max_jitter = max(&baselines.iter().map(|b| b.peer_jitter_max).collect::<Vec<_>>());
    let cycle_interval_secs = if max_jitter > 10.0 || avg_latency > 50.0 { 60 } else { 30 };

    Recommendation {
        thresholds,
        probe_count,
        probe_interval_secs,
        cycle_interval_secs,
        peer_baseline_ms: peer_baseline,
        dest_baseline_ms: dest_baseline,
        avg_peer_jitter_ms: avg_peer_jitter,
        avg_dest_jitter_ms: avg_dest_jitter,
        provider_diff_ms: peer_diff + dest_diff,
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn max(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }
}

fn finite_or_zero(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

fn range(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    max(values) - min
}
