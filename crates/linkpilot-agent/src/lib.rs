//! LinkPilot agent
//!
//! I/O around the decision core: path probing, routing policy updates,
//! telemetry and the periodic control loop.
//!
//! ```text
//!   mtr ──► extract ──► history ──► decision ──► telemetry
//!                                        │
//!                                        └──(switch)──► policy store
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod orchestrator;
pub mod policy;
pub mod prober;
pub mod telemetry;

pub use error::{AgentError, PolicyStoreError, ProbeError, Result, TelemetryError};
pub use orchestrator::{CycleOrchestrator, CycleReport, TelemetryOutcome};
pub use policy::{NetBoxPolicyStore, PolicyApplier, PolicyOutcome, PolicyStore, RuleChange, RuleUpdate};
pub use prober::{probe_with_timeout, MtrProber, PathProber, ProbeTarget};
pub use telemetry::{CycleRecord, ElasticsearchSink, LogSink, ProviderSnapshot, TelemetrySink};

use linkpilot_core::{ConfigError, LinkPilotConfig};
use std::path::Path;
use tracing::warn;

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "LINKPILOT_CONFIG";

/// Config file path from the environment, or the default location
pub fn config_path() -> String {
    std::env::var(CONFIG_ENV).unwrap_or_else(|_| linkpilot_core::config::DEFAULT_CONFIG_PATH.into())
}

/// Load config, falling back to defaults when the file does not exist.
///
/// A file that exists but cannot be parsed or validated is an error.
pub fn load_config(path: impl AsRef<Path>) -> std::result::Result<LinkPilotConfig, ConfigError> {
    let path = path.as_ref();
    match LinkPilotConfig::load(path) {
        Err(ConfigError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "config not found, using defaults");
            Ok(LinkPilotConfig::default())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_config_uses_defaults() {
        let config = load_config("/nonexistent/linkpilot.json").unwrap();
        assert_eq!(config.providers.len(), 2);
    }

    #[test]
    fn test_malformed_config_is_error() {
        let path = std::env::temp_dir().join(format!("linkpilot-bad-{}.json", std::process::id()));
        std::fs::write(&path, "{ not json").unwrap();
        let result = load_config(&path);
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }
}
