//! Error types for the decision core

use thiserror::Error;

/// Hop extraction failure.
///
/// Always recoverable: the caller substitutes the penalty snapshot.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    /// Report holds no hops
    #[error("hop report is empty")]
    EmptyReport,

    /// Configured peer address does not appear in the path
    #[error("peer hop {peer} not found in path")]
    MissingPeerHop {
        /// Peer address that was searched for
        peer: String,
    },

    /// No hop carries the final index
    #[error("destination hop (index {expected}) not found in path")]
    MissingDestinationHop {
        /// Index the destination hop was expected at
        expected: usize,
    },
}

/// Configuration error, fatal at startup
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid JSON for the config schema
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Config parsed but violates a constraint
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Decision engine input error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecisionError {
    /// No provider standings were supplied
    #[error("no providers to evaluate")]
    NoProviders,

    /// Current primary has no standing in this cycle
    #[error("current primary {0} missing from provider standings")]
    UnknownPrimary(String),
}

/// Result type for configuration loading
pub type ConfigResult<T> = Result<T, ConfigError>;
