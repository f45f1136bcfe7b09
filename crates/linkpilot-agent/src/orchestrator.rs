//! Measure-decide-apply-report control loop

use crate::error::{AgentError, ProbeError, Result, TelemetryError};
use crate::policy::{PolicyApplier, PolicyOutcome, PolicyStore};
use crate::prober::{probe_with_timeout, PathProber, ProbeTarget};
use crate::telemetry::{CycleRecord, ProviderSnapshot, TelemetrySink};
use chrono::Utc;
use linkpilot_core::extract::extract_for_peer;
use linkpilot_core::{
    Decision, DecisionEngine, DecisionError, DecisionState, Evaluation, HistoryTracker, LatencyMetrics,
    LinkPilotConfig, ProviderId, QualityScorer, SwitchPolicy,
};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// What happened to the cycle's telemetry record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelemetryOutcome {
    /// Record accepted by the sink
    Sent,
    /// Sink is disabled
    Skipped,
    /// Sink rejected or was unreachable
    Failed(String),
}

/// Observable result of one cycle
#[derive(Debug, Clone)]
pub struct CycleReport {
    /// Cycle number, from 1
    pub cycle: u64,
    /// Decision engine output
    pub evaluation: Evaluation,
    /// Per-provider state, catalog order
    pub providers: Vec<ProviderSnapshot>,
    /// Policy writes, on a switching cycle
    pub policy: Option<PolicyOutcome>,
    /// Telemetry delivery
    pub telemetry: TelemetryOutcome,
    /// Primary after the cycle
    pub primary: ProviderId,
}

impl CycleReport {
    /// Whether the primary changed this cycle
    pub fn switched(&self) -> bool {
        self.policy.as_ref().map(PolicyOutcome::is_committed).unwrap_or(false)
    }
}

/// Owns decision state and history; drives one cycle at a time
pub struct CycleOrchestrator {
    config: LinkPilotConfig,
    prober: Arc<dyn PathProber>,
    policy: PolicyApplier,
    telemetry: Arc<dyn TelemetrySink>,
    scorer: QualityScorer,
    engine: DecisionEngine,
    history: HistoryTracker,
    state: DecisionState,
    cycle: u64,
}

impl CycleOrchestrator {
    /// Create orchestrator with the configured default primary
    pub fn new(
        config: LinkPilotConfig,
        prober: Arc<dyn PathProber>,
        store: Arc<dyn PolicyStore>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Result<Self> {
        let primary = config.initial_primary().ok_or(DecisionError::NoProviders)?;
        if config.provider(&primary).is_none() {
            return Err(DecisionError::UnknownPrimary(primary.to_string()).into());
        }

        Ok(Self {
            policy: PolicyApplier::new(store, config.policy_store.clone()),
            scorer: QualityScorer::new(config.thresholds.clone()),
            engine: DecisionEngine::new(SwitchPolicy::from(&config.thresholds)),
            history: HistoryTracker::new(config.history_window, config.thresholds.immediate_failover_loss_pct),
            state: DecisionState::new(primary),
            cycle: 0,
            config,
            prober,
            telemetry,
        })
    }

    /// Current decision state
    pub fn state(&self) -> &DecisionState {
        &self.state
    }

    /// Per-provider history
    pub fn history(&self) -> &HistoryTracker {
        &self.history
    }

    /// Cycles run so far
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Run cycles until Ctrl-C, sleeping the cycle interval after each one
    pub async fn run(&mut self) -> Result<()> {
        info!(
            primary = %self.state.current_primary,
            providers = self.config.providers.len(),
            interval_secs = self.config.cycle_interval_secs,
            dry_run = self.policy.is_dry_run(),
            "starting failover loop"
        );

        loop {
            if let Err(e) = self.run_cycle().await {
                error!(cycle = self.cycle, "cycle aborted: {}", e);
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.cycle_interval()) => {}
                _ = tokio::signal::ctrl_c() => {
                    info!(primary = %self.state.current_primary, "shutting down");
                    return Ok(());
                }
            }
        }
    }

    /// Run one cycle
    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        self.cycle += 1;
        let cycle = self.cycle;
        let start_primary = self.state.current_primary.clone();
        info!(cycle, primary = %start_primary, "cycle start");

        let measurements = self.measure_all().await;
        let ids = self.config.provider_ids();
        let mut failed = vec![false; ids.len()];
        for (i, (id, measurement)) in ids.iter().zip(measurements).enumerate() {
            let metrics = match measurement {
                Ok(metrics) => metrics,
                Err(e) => {
                    warn!(provider = %id, "measurement failed, using penalty: {}", e);
                    failed[i] = true;
                    LatencyMetrics::penalty()
                }
            };
            self.history.record(id, metrics);
        }

        let standings = self.history.standings(&ids);
        let (next_state, evaluation) = self.engine.evaluate(self.state.clone(), &standings)?;

        let providers: Vec<ProviderSnapshot> = standings
            .iter()
            .zip(self.config.providers.iter())
            .zip(failed)
            .map(|((standing, provider), measurement_failed)| {
                info!(
                    provider = %standing.provider,
                    score = standing.score,
                    healthy = standing.healthy,
                    peer_ms = standing.latest.peer_avg_ms,
                    dest_ms = standing.latest.dest_avg_ms,
                    "provider standing"
                );
                ProviderSnapshot {
                    provider: standing.provider.clone(),
                    ip_version: provider.ip_version(),
                    score: standing.score,
                    healthy: standing.healthy,
                    is_primary: standing.provider == start_primary,
                    metrics: standing.latest,
                    latency_warning: self.scorer.has_latency_warning(&standing.latest),
                    latency_critical: self.scorer.has_latency_critical(&standing.latest),
                    measurement_failed,
                }
            })
            .collect();

        info!(cycle, best = %evaluation.best, diff = evaluation.diff, "decision: {}", evaluation.reason);

        let (previous_provider, new_provider) = match &evaluation.decision {
            Decision::Switch { from, to } => (Some(from.clone()), Some(to.clone())),
            Decision::Stay => (None, None),
        };
        let record = CycleRecord {
            timestamp: Utc::now(),
            cycle,
            current_provider: start_primary.clone(),
            provider_changed: evaluation.decision.is_switch(),
            previous_provider,
            new_provider,
            change_reason: evaluation.reason.to_string(),
            providers: providers.clone(),
        };
        let telemetry = match self.telemetry.emit(&record).await {
            Ok(()) => TelemetryOutcome::Sent,
            Err(TelemetryError::Disabled) => TelemetryOutcome::Skipped,
            Err(e) => {
                warn!(cycle, "telemetry emit failed: {}", e);
                TelemetryOutcome::Failed(e.to_string())
            }
        };

        let policy = match &evaluation.decision {
            Decision::Switch { from, to } => {
                info!(from = %from, to = %to, "switching primary: {}", evaluation.reason);
                let outcome = self.policy.apply(&self.config.providers, to).await;
                if outcome.is_committed() {
                    self.state = next_state;
                    info!(primary = %to, dry_run = outcome.dry_run, "switch committed");
                } else {
                    error!(
                        primary = %from,
                        failed_rules = outcome.failed.len(),
                        "policy update incomplete, keeping current primary"
                    );
                    self.state = DecisionState {
                        current_primary: from.clone(),
                        ..next_state
                    };
                }
                Some(outcome)
            }
            Decision::Stay => {
                self.state = next_state;
                None
            }
        };

        Ok(CycleReport {
            cycle,
            evaluation,
            providers,
            policy,
            telemetry,
            primary: self.state.current_primary.clone(),
        })
    }

    /// Probe every provider concurrently; one slot per provider, catalog order
    async fn measure_all(&self) -> Vec<Result<LatencyMetrics>> {
        let timeout = self.config.probe.timeout();
        let mut set = JoinSet::new();

        for (slot, provider) in self.config.providers.iter().enumerate() {
            let prober = Arc::clone(&self.prober);
            let target = ProbeTarget::from(provider);
            let peer = provider.peer;
            set.spawn(async move {
                let result = async {
                    let report = probe_with_timeout(prober.as_ref(), &target, timeout).await?;
                    Ok::<_, AgentError>(extract_for_peer(&report, &peer)?)
                }
                .await;
                (slot, result)
            });
        }

        let mut slots: Vec<Option<Result<LatencyMetrics>>> = (0..self.config.providers.len()).map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((slot, result)) => slots[slot] = Some(result),
                Err(e) => warn!("probe task did not complete: {}", e),
            }
        }

        slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| Err(ProbeError::Malformed("probe task aborted".into()).into()))
            })
            .collect()
    }
}
