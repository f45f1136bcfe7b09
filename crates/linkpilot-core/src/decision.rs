//! Primary-provider decision engine
//!
//! Rules, evaluated every cycle against smoothed standings:
//!
//! 1. Current primary is the best scorer: stay, clear degradation tracking.
//! 2. Another provider leads by no more than `switch_margin`: stay.
//! 3. Current primary's latest sample crosses the loss threshold: switch now.
//! 4. The same candidate has led for `sustained_cycles` cycles: switch.
//! 5. Otherwise keep evaluating the candidate.
//!
//! The margin check runs before both switch rules, so small persistent
//! differences never accumulate into a switch.

use crate::config::Thresholds;
use crate::error::DecisionError;
use crate::history::ProviderStanding;
use crate::model::ProviderId;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Process-wide decision state, owned by the control loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionState {
    /// Provider currently carrying primary traffic
    pub current_primary: ProviderId,
    /// Consecutive cycles `better_candidate` has led
    pub degradation_counter: u32,
    /// Provider currently leading the primary
    pub better_candidate: Option<ProviderId>,
}

impl DecisionState {
    /// Fresh state with `primary` active and no degradation tracked
    pub fn new(primary: ProviderId) -> Self {
        Self {
            current_primary: primary,
            degradation_counter: 0,
            better_candidate: None,
        }
    }

    /// Phase the state machine is in
    pub fn phase(&self) -> EnginePhase {
        if self.better_candidate.is_some() {
            EnginePhase::Evaluating
        } else {
            EnginePhase::Stable
        }
    }

    fn reset_tracking(&mut self) {
        self.degradation_counter = 0;
        self.better_candidate = None;
    }
}

/// State machine phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnginePhase {
    /// Current primary is the best scorer
    Stable,
    /// A different provider leads, not yet acted on
    Evaluating,
    /// A switch was decided this cycle
    Switching,
}

/// Outcome of one evaluation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    /// Keep the current primary
    Stay,
    /// Move primary traffic
    Switch {
        /// Primary being left
        from: ProviderId,
        /// New primary
        to: ProviderId,
    },
}

impl Decision {
    /// Whether this is a switch
    pub fn is_switch(&self) -> bool {
        matches!(self, Self::Switch { .. })
    }

    /// Switch target, if any
    pub fn target(&self) -> Option<&ProviderId> {
        match self {
            Self::Switch { to, .. } => Some(to),
            Self::Stay => None,
        }
    }
}

/// Why a decision was taken
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DecisionReason {
    /// Current primary is the best scorer
    Stable,
    /// Candidate leads by no more than the margin
    InsufficientDifference {
        /// Score advantage of the candidate
        diff: f64,
        /// Configured margin
        margin: f64,
    },
    /// Current primary lost too many packets in its latest sample
    CriticalPacketLoss {
        /// Unhealthy primary
        primary: ProviderId,
        /// Its latest peer loss (%)
        peer_loss_pct: f64,
        /// Its latest destination loss (%)
        dest_loss_pct: f64,
    },
    /// Candidate led for the required number of cycles
    SustainedDegradation {
        /// Candidate switched to
        candidate: ProviderId,
        /// Score advantage of the candidate
        diff: f64,
        /// Cycles required
        cycles: u32,
    },
    /// Candidate leads but has not persisted long enough
    EvaluatingCandidate {
        /// Candidate
        candidate: ProviderId,
        /// Cycles observed so far
        count: u32,
        /// Cycles required
        threshold: u32,
    },
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stable => write!(f, "stable"),
            Self::InsufficientDifference { diff, margin } => {
                write!(f, "insufficient difference ({:.2} <= {:.2})", diff, margin)
            }
            Self::CriticalPacketLoss {
                primary,
                peer_loss_pct,
                dest_loss_pct,
            } => write!(
                f,
                "critical packet loss on {} (peer {:.1}%, destination {:.1}%)",
                primary, peer_loss_pct, dest_loss_pct
            ),
            Self::SustainedDegradation { candidate, diff, cycles } => write!(
                f,
                "sustained degradation ({} better by {:.2} for {} cycles)",
                candidate, diff, cycles
            ),
            Self::EvaluatingCandidate {
                candidate,
                count,
                threshold,
            } => write!(f, "evaluating candidate {} ({}/{})", candidate, count, threshold),
        }
    }
}

/// Result of one evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    /// Stay or switch
    pub decision: Decision,
    /// Why
    pub reason: DecisionReason,
    /// Phase reached this cycle
    pub phase: EnginePhase,
    /// Best scorer this cycle
    pub best: ProviderId,
    /// `score(current_primary) - score(best)`
    pub diff: f64,
}

/// Switching policy parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SwitchPolicy {
    /// Hysteresis band
    pub switch_margin: f64,
    /// Cycles a candidate must lead
    pub sustained_cycles: u32,
}

impl Default for SwitchPolicy {
    fn default() -> Self {
        Self::from(&Thresholds::default())
    }
}

impl From<&Thresholds> for SwitchPolicy {
    fn from(t: &Thresholds) -> Self {
        Self {
            switch_margin: t.switch_margin,
            sustained_cycles: t.sustained_cycles.max(1),
        }
    }
}

/// Stateless rule evaluator; state is passed in and handed back
#[derive(Debug, Clone, Default)]
pub struct DecisionEngine {
    policy: SwitchPolicy,
}

impl DecisionEngine {
    /// Create engine with a switching policy
    pub fn new(policy: SwitchPolicy) -> Self {
        Self { policy }
    }

    /// Switching policy in use
    pub fn policy(&self) -> &SwitchPolicy {
        &self.policy
    }

    /// Evaluate one cycle.
    ///
    /// `standings` must be in catalog order: ties on score go to the first
    /// provider listed. Returns the next state together with the decision.
    pub fn evaluate(
        &self,
        mut state: DecisionState,
        standings: &[ProviderStanding],
    ) -> Result<(DecisionState, Evaluation), DecisionError> {
        let best = best_standing(standings).ok_or(DecisionError::NoProviders)?;
        let current = standings
            .iter()
            .find(|s| s.provider == state.current_primary)
            .ok_or_else(|| DecisionError::UnknownPrimary(state.current_primary.to_string()))?;

        if best.provider == state.current_primary {
            if state.degradation_counter > 0 {
                debug!(primary = %state.current_primary, "primary is best again, clearing degradation");
            }
            state.reset_tracking();
            let evaluation = Evaluation {
                decision: Decision::Stay,
                reason: DecisionReason::Stable,
                phase: EnginePhase::Stable,
                best: best.provider.clone(),
                diff: 0.0,
            };
            return Ok((state, evaluation));
        }

        let diff = current.score - best.score;

        if state.better_candidate.as_ref() == Some(&best.provider) {
            state.degradation_counter = state.degradation_counter.saturating_add(1);
        } else {
            state.better_candidate = Some(best.provider.clone());
            state.degradation_counter = 1;
        }
        debug!(
            candidate = %best.provider,
            count = state.degradation_counter,
            diff,
            "candidate leads current primary"
        );

        let stay = |state: DecisionState, reason: DecisionReason| {
            let evaluation = Evaluation {
                decision: Decision::Stay,
                reason,
                phase: EnginePhase::Evaluating,
                best: best.provider.clone(),
                diff,
            };
            (state, evaluation)
        };

        if diff <= self.policy.switch_margin {
            return Ok(stay(
                state,
                DecisionReason::InsufficientDifference {
                    diff,
                    margin: self.policy.switch_margin,
                },
            ));
        }

        let reason = if !current.healthy {
            DecisionReason::CriticalPacketLoss {
                primary: current.provider.clone(),
                peer_loss_pct: current.latest.peer_loss_pct,
                dest_loss_pct: current.latest.dest_loss_pct,
            }
        } else if state.degradation_counter >= self.policy.sustained_cycles {
            DecisionReason::SustainedDegradation {
                candidate: best.provider.clone(),
                diff,
                cycles: self.policy.sustained_cycles,
            }
        } else {
            let reason = DecisionReason::EvaluatingCandidate {
                candidate: best.provider.clone(),
                count: state.degradation_counter,
                threshold: self.policy.sustained_cycles,
            };
            return Ok(stay(state, reason));
        };

        let from = std::mem::replace(&mut state.current_primary, best.provider.clone());
        state.reset_tracking();
        let evaluation = Evaluation {
            decision: Decision::Switch {
                from,
                to: best.provider.clone(),
            },
            reason,
            phase: EnginePhase::Switching,
            best: best.provider.clone(),
            diff,
        };
        Ok((state, evaluation))
    }
}

/// Lowest-scoring standing; the earliest one wins ties
pub fn best_standing(standings: &[ProviderStanding]) -> Option<&ProviderStanding> {
    standings.iter().fold(None, |best: Option<&ProviderStanding>, s| match best {
        Some(b) if b.score.total_cmp(&s.score).is_le() => Some(b),
        _ => Some(s),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LatencyMetrics;
    use proptest::prelude::*;

    fn standing(name: &str, score: f64, healthy: bool) -> ProviderStanding {
        let loss = if healthy { 0.0 } else { 100.0 };
        ProviderStanding {
            provider: ProviderId::new(name),
            score,
            healthy,
            latest: LatencyMetrics {
                peer_avg_ms: score,
                peer_loss_pct: loss,
                peer_stddev_ms: 0.0,
                dest_avg_ms: score,
                dest_loss_pct: loss,
                dest_stddev_ms: 0.0,
            },
        }
    }

    fn engine() -> DecisionEngine {
        DecisionEngine::new(SwitchPolicy {
            switch_margin: 3.0,
            sustained_cycles: 3,
        })
    }

    #[test]
    fn test_primary_best_stays_stable() {
        let engine = engine();
        let mut state = DecisionState::new("A".into());
        for _ in 0..3 {
            let (next, eval) = engine
                .evaluate(state, &[standing("A", 5.0, true), standing("B", 20.0, true)])
                .unwrap();
            assert_eq!(eval.decision, Decision::Stay);
            assert_eq!(eval.reason, DecisionReason::Stable);
            assert_eq!(next.degradation_counter, 0);
            state = next;
        }
        assert_eq!(state.current_primary, "A");
    }

    #[test]
    fn test_sustained_degradation_switches_on_third_cycle() {
        let engine = engine();
        let standings = [standing("A", 20.0, true), standing("B", 5.0, true)];
        let state = DecisionState::new("A".into());

        let (state, eval) = engine.evaluate(state, &standings).unwrap();
        assert_eq!(eval.reason.to_string(), "evaluating candidate B (1/3)");
        assert_eq!(eval.phase, EnginePhase::Evaluating);

        let (state, eval) = engine.evaluate(state, &standings).unwrap();
        assert_eq!(eval.reason.to_string(), "evaluating candidate B (2/3)");

        let (state, eval) = engine.evaluate(state, &standings).unwrap();
        assert_eq!(
            eval.decision,
            Decision::Switch {
                from: "A".into(),
                to: "B".into()
            }
        );
        assert!(matches!(eval.reason, DecisionReason::SustainedDegradation { .. }));
        assert_eq!(eval.phase, EnginePhase::Switching);
        assert_eq!(state, DecisionState::new("B".into()));
    }

    #[test]
    fn test_critical_loss_switches_immediately() {
        let engine = engine();
        let standings = [standing("A", 20_999.0, false), standing("B", 5.0, true)];
        let (state, eval) = engine
            .evaluate(DecisionState::new("A".into()), &standings)
            .unwrap();

        assert_eq!(eval.decision.target(), Some(&ProviderId::new("B")));
        assert!(matches!(eval.reason, DecisionReason::CriticalPacketLoss { .. }));
        assert_eq!(state.current_primary, "B");
        assert_eq!(state.degradation_counter, 0);
        assert_eq!(state.better_candidate, None);
    }

    #[test]
    fn test_unhealthy_primary_within_margin_stays() {
        let engine = engine();
        let standings = [standing("A", 10.0, false), standing("B", 8.0, true)];
        let (_, eval) = engine
            .evaluate(DecisionState::new("A".into()), &standings)
            .unwrap();
        assert_eq!(eval.decision, Decision::Stay);
        assert!(matches!(eval.reason, DecisionReason::InsufficientDifference { .. }));
    }

    #[test]
    fn test_candidate_change_restarts_count() {
        let engine = engine();
        let state = DecisionState::new("A".into());

        let (state, _) = engine
            .evaluate(state, &[standing("A", 30.0, true), standing("B", 5.0, true), standing("C", 10.0, true)])
            .unwrap();
        let (state, _) = engine
            .evaluate(state, &[standing("A", 30.0, true), standing("B", 5.0, true), standing("C", 10.0, true)])
            .unwrap();
        assert_eq!(state.degradation_counter, 2);

        let (state, eval) = engine
            .evaluate(state, &[standing("A", 30.0, true), standing("B", 10.0, true), standing("C", 5.0, true)])
            .unwrap();
        assert_eq!(state.better_candidate, Some("C".into()));
        assert_eq!(state.degradation_counter, 1);
        assert_eq!(eval.decision, Decision::Stay);
    }

    #[test]
    fn test_recovery_resets_tracking() {
        let engine = engine();
        let (state, _) = engine
            .evaluate(
                DecisionState::new("A".into()),
                &[standing("A", 20.0, true), standing("B", 5.0, true)],
            )
            .unwrap();
        assert_eq!(state.phase(), EnginePhase::Evaluating);

        let (state, eval) = engine
            .evaluate(state, &[standing("A", 5.0, true), standing("B", 20.0, true)])
            .unwrap();
        assert_eq!(eval.reason, DecisionReason::Stable);
        assert_eq!(state, DecisionState::new("A".into()));
    }

    #[test]
    fn test_margin_counts_but_never_switches() {
        let engine = engine();
        let mut state = DecisionState::new("A".into());
        for cycle in 1..=10 {
            let (next, eval) = engine
                .evaluate(state, &[standing("A", 8.0, true), standing("B", 5.0, true)])
                .unwrap();
            assert_eq!(eval.decision, Decision::Stay);
            assert_eq!(next.degradation_counter, cycle);
            state = next;
        }
    }

    #[test]
    fn test_input_errors() {
        let engine = engine();
        assert_eq!(
            engine.evaluate(DecisionState::new("A".into()), &[]).unwrap_err(),
            DecisionError::NoProviders
        );
        assert_eq!(
            engine
                .evaluate(DecisionState::new("Z".into()), &[standing("A", 1.0, true)])
                .unwrap_err(),
            DecisionError::UnknownPrimary("Z".into())
        );
    }

    #[test]
    fn test_reason_strings() {
        assert_eq!(DecisionReason::Stable.to_string(), "stable");
        let r = DecisionReason::InsufficientDifference { diff: 1.5, margin: 3.0 };
        assert_eq!(r.to_string(), "insufficient difference (1.50 <= 3.00)");
    }

    proptest! {
        #[test]
        fn prop_ties_go_to_first_listed(score in 0.0f64..30_000.0, n in 2usize..6) {
            let standings: Vec<_> = (0..n)
                .map(|i| standing(&format!("P{}", i), score, true))
                .collect();
            let best = best_standing(&standings).unwrap();
            prop_assert_eq!(best.provider.as_str(), "P0");
        }

        #[test]
        fn prop_no_switch_within_margin(
            primary_score in 0.0f64..1000.0,
            advantage in 0.0f64..2.999,
            counter in 0u32..100,
            healthy in any::<bool>()
        ) {
            let engine = engine();
            let state = DecisionState {
                current_primary: "A".into(),
                degradation_counter: counter,
                better_candidate: Some("B".into()),
            };
            let standings = [
                standing("A", primary_score, healthy),
                standing("B", primary_score - advantage, true),
            ];
            let (next, eval) = engine.evaluate(state, &standings).unwrap();
            prop_assert_eq!(eval.decision, Decision::Stay);
            prop_assert_eq!(next.current_primary.as_str(), "A");
        }

        #[test]
        fn prop_new_candidate_starts_at_one(counter in 0u32..100, lead in 0.0f64..500.0) {
            let engine = engine();
            let state = DecisionState {
                current_primary: "A".into(),
                degradation_counter: counter,
                better_candidate: Some("C".into()),
            };
            let standings = [
                standing("A", 600.0, true),
                standing("B", 600.0 - lead - 0.001, true),
                standing("C", 700.0, true),
            ];
            let (next, _) = engine.evaluate(state, &standings).unwrap();
            prop_assert_eq!(next.better_candidate, Some(ProviderId::new("B")));
            prop_assert_eq!(next.degradation_counter, 1);
        }
    }
}
