//! LinkPilot decision core
//!
//! Link-quality scoring and primary-uplink selection for BGP failover.
//!
//! # Features
//!
//! - Peer and destination hop extraction from path probe reports
//! - Weighted latency/loss/jitter scoring, total over every input
//! - Windowed score smoothing with latest-sample health
//! - Hysteresis and sustained-degradation switching
//! - Baseline calibration of thresholds and timing

#![warn(missing_docs)]

pub mod calibrate;
pub mod config;
pub mod decision;
pub mod error;
pub mod extract;
pub mod history;
pub mod model;
pub mod scorer;

pub use calibrate::{recommend, BaselineCollector, ProviderBaseline, Recommendation};
pub use config::{LinkPilotConfig, PolicyStoreConfig, ProbeConfig, ProviderConfig, TelemetryConfig, Thresholds};
pub use decision::{Decision, DecisionEngine, DecisionReason, DecisionState, EnginePhase, Evaluation, SwitchPolicy};
pub use error::{ConfigError, DecisionError, ExtractError};
pub use history::{HistoryTracker, ProviderHistory, ProviderStanding};
pub use model::{Hop, HopReport, IpVersion, LatencyMetrics, ProviderId};
pub use scorer::{QualityScore, QualityScorer};
