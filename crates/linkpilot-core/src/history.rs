//! Rolling per-provider measurement history
//!
//! Scores are smoothed as the plain mean over a short FIFO window. Health is
//! read from the latest sample only, so critical loss is acted on in the
//! cycle it is observed.

use crate::model::{LatencyMetrics, ProviderId};
use crate::scorer;
use std::collections::{HashMap, VecDeque};

/// Bounded FIFO of recent snapshots for one provider
#[derive(Debug, Clone)]
pub struct ProviderHistory {
    window: VecDeque<LatencyMetrics>,
    capacity: usize,
}

impl ProviderHistory {
    /// Create an empty history holding at most `capacity` samples
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a sample, evicting the oldest past capacity
    pub fn record(&mut self, metrics: LatencyMetrics) {
        while self.window.len() >= self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(metrics);
    }

    /// Mean score over the window.
    ///
    /// An empty window scores as the penalty snapshot.
    pub fn smoothed_score(&self) -> f64 {
        if self.window.is_empty() {
            return scorer::score(&LatencyMetrics::penalty());
        }
        let sum: f64 = self.window.iter().map(scorer::score).sum();
        sum / self.window.len() as f64
    }

    /// Whether both legs of the latest sample are below `loss_threshold_pct`
    pub fn is_healthy(&self, loss_threshold_pct: f64) -> bool {
        let latest = self.latest_or_penalty();
        latest.peer_loss_pct < loss_threshold_pct && latest.dest_loss_pct < loss_threshold_pct
    }

    /// Most recent sample
    pub fn latest(&self) -> Option<&LatencyMetrics> {
        self.window.back()
    }

    /// Most recent sample, or the penalty snapshot when empty
    pub fn latest_or_penalty(&self) -> LatencyMetrics {
        self.latest().copied().unwrap_or_else(LatencyMetrics::penalty)
    }

    /// Samples currently in the window
    pub fn len(&self) -> usize {
        self.window.len()
    }

    /// Whether no sample was recorded yet
    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// Window capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Iterate samples, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &LatencyMetrics> {
        self.window.iter()
    }
}

/// Smoothed view of one provider handed to the decision engine
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderStanding {
    /// Provider
    pub provider: ProviderId,
    /// Smoothed score (lower is better)
    pub score: f64,
    /// Latest-sample loss health
    pub healthy: bool,
    /// Latest sample
    pub latest: LatencyMetrics,
}

/// Histories for every provider
#[derive(Debug, Clone)]
pub struct HistoryTracker {
    capacity: usize,
    loss_threshold_pct: f64,
    providers: HashMap<ProviderId, ProviderHistory>,
}

impl HistoryTracker {
    /// Create tracker with window size and immediate-failover loss threshold
    pub fn new(capacity: usize, loss_threshold_pct: f64) -> Self {
        Self {
            capacity: capacity.max(1),
            loss_threshold_pct,
            providers: HashMap::new(),
        }
    }

    /// Record a sample for a provider
    pub fn record(&mut self, provider: &ProviderId, metrics: LatencyMetrics) {
        let capacity = self.capacity;
        self.providers
            .entry(provider.clone())
            .or_insert_with(|| ProviderHistory::new(capacity))
            .record(metrics);
    }

    /// History of a provider
    pub fn get(&self, provider: &ProviderId) -> Option<&ProviderHistory> {
        self.providers.get(provider)
    }

    /// Smoothed score of a provider (penalty score when never recorded)
    pub fn smoothed_score(&self, provider: &ProviderId) -> f64 {
        match self.providers.get(provider) {
            Some(history) => history.smoothed_score(),
            None => scorer::score(&LatencyMetrics::penalty()),
        }
    }

    /// Latest-sample health of a provider (unhealthy when never recorded)
    pub fn is_healthy(&self, provider: &ProviderId) -> bool {
        self.providers
            .get(provider)
            .map(|h| h.is_healthy(self.loss_threshold_pct))
            .unwrap_or(false)
    }

    /// Standings for `providers`, in the given order
    pub fn standings(&self, providers: &[ProviderId]) -> Vec<ProviderStanding> {
        providers
            .iter()
            .map(|provider| ProviderStanding {
                provider: provider.clone(),
                score: self.smoothed_score(provider),
                healthy: self.is_healthy(provider),
                latest: self
                    .providers
                    .get(provider)
                    .map(ProviderHistory::latest_or_penalty)
                    .unwrap_or_else(LatencyMetrics::penalty),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample(latency: f64, loss: f64) -> LatencyMetrics {
        LatencyMetrics {
            peer_avg_ms: latency,
            peer_loss_pct: loss,
            peer_stddev_ms: 0.0,
            dest_avg_ms: latency,
            dest_loss_pct: 0.0,
            dest_stddev_ms: 0.0,
        }
    }

    #[test]
    fn test_single_sample_equals_raw_score() {
        let mut history = ProviderHistory::new(3);
        let m = sample(7.5, 0.0);
        history.record(m);
        assert_eq!(history.smoothed_score(), scorer::score(&m));
    }

    #[test]
    fn test_window_evicts_oldest() {
        let mut history = ProviderHistory::new(3);
        history.record(sample(1000.0, 0.0));
        history.record(sample(10.0, 0.0));
        history.record(sample(20.0, 0.0));
        history.record(sample(30.0, 0.0));

        assert_eq!(history.len(), 3);
        // The 1000ms sample no longer contributes
        assert!((history.smoothed_score() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_health_uses_latest_sample_only() {
        let mut history = ProviderHistory::new(3);
        history.record(sample(5.0, 0.0));
        history.record(sample(5.0, 0.0));
        assert!(history.is_healthy(20.0));

        history.record(sample(5.0, 20.0));
        assert!(!history.is_healthy(20.0));

        history.record(sample(5.0, 19.9));
        assert!(history.is_healthy(20.0));
    }

    #[test]
    fn test_destination_loss_counts() {
        let mut history = ProviderHistory::new(3);
        let mut m = sample(5.0, 0.0);
        m.dest_loss_pct = 50.0;
        history.record(m);
        assert!(!history.is_healthy(20.0));
    }

    #[test]
    fn test_empty_history_scores_as_penalty() {
        let history = ProviderHistory::new(3);
        assert_eq!(history.smoothed_score(), scorer::score(&LatencyMetrics::penalty()));
        assert!(!history.is_healthy(20.0));
    }

    #[test]
    fn test_tracker_standings_in_catalog_order() {
        let a = ProviderId::new("A");
        let b = ProviderId::new("B");
        let mut tracker = HistoryTracker::new(3, 20.0);
        tracker.record(&b, sample(20.0, 0.0));
        tracker.record(&a, sample(5.0, 0.0));

        let standings = tracker.standings(&[a.clone(), b.clone()]);
        assert_eq!(standings[0].provider, a);
        assert_eq!(standings[1].provider, b);
        assert!((standings[0].score - 5.0).abs() < 1e-9);
        assert!(standings[1].healthy);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut history = ProviderHistory::new(0);
        history.record(sample(5.0, 0.0));
        history.record(sample(6.0, 0.0));
        assert_eq!(history.capacity(), 1);
        assert_eq!(history.len(), 1);
    }

    proptest! {
        #[test]
        fn prop_loss_at_threshold_is_unhealthy(
            latency in prop_oneof![
                0.0f64..5000.0,
                Just(LatencyMetrics::PENALTY_LATENCY_MS),
                Just(f64::INFINITY)
            ],
            loss in 20.0f64..=100.0,
            on_peer in any::<bool>()
        ) {
            let mut m = sample(latency, 0.0);
            if on_peer {
                m.peer_loss_pct = loss;
            } else {
                m.dest_loss_pct = loss;
            }
            let mut history = ProviderHistory::new(3);
            history.record(sample(latency, 0.0));
            history.record(m);
            prop_assert!(!history.is_healthy(20.0));
        }
    }
}
