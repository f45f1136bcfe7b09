//! Agent error types

use linkpilot_core::{ConfigError, DecisionError, ExtractError};
use std::time::Duration;
use thiserror::Error;

/// Path measurement failure
#[derive(Error, Debug)]
pub enum ProbeError {
    /// Prober could not be started
    #[error("failed to spawn prober: {0}")]
    Spawn(#[from] std::io::Error),

    /// Prober did not finish in time
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),

    /// Prober exited unsuccessfully
    #[error("prober exited with {status}: {stderr}")]
    Failed {
        /// Exit status description
        status: String,
        /// Captured standard error
        stderr: String,
    },

    /// Prober output is not a valid report
    #[error("malformed probe report: {0}")]
    Malformed(String),
}

/// Policy store read or write failure
#[derive(Error, Debug)]
pub enum PolicyStoreError {
    /// Transport failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success response
    #[error("policy store returned {status} for rule {rule_id}: {body}")]
    Status {
        /// Rule being read or written
        rule_id: u64,
        /// HTTP status code
        status: u16,
        /// Response body
        body: String,
    },

    /// Rule document lacks required fields
    #[error("malformed rule {rule_id}: {reason}")]
    Malformed {
        /// Rule id
        rule_id: u64,
        /// What is wrong with it
        reason: String,
    },
}

/// Telemetry emit failure
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// Transport failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success response
    #[error("telemetry sink returned {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body
        body: String,
    },

    /// Sink was disabled at startup
    #[error("telemetry sink is disabled")]
    Disabled,
}

/// Umbrella agent error
#[derive(Error, Debug)]
pub enum AgentError {
    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Decision engine input error
    #[error(transparent)]
    Decision(#[from] DecisionError),

    /// Extraction error
    #[error(transparent)]
    Extract(#[from] ExtractError),

    /// Probe error
    #[error(transparent)]
    Probe(#[from] ProbeError),

    /// Policy store error
    #[error(transparent)]
    PolicyStore(#[from] PolicyStoreError),

    /// Telemetry error
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
}

/// Result type for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;
