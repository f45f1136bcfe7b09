//! Path probing
//!
//! Hop-by-hop measurements come from an external `mtr` process run in JSON
//! report mode.

use crate::error::ProbeError;
use async_trait::async_trait;
use linkpilot_core::{HopReport, IpVersion, ProbeConfig, ProviderConfig};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// What to probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    /// Destination address or hostname
    pub destination: String,
    /// Protocol version
    pub ip_version: IpVersion,
}

impl From<&ProviderConfig> for ProbeTarget {
    fn from(provider: &ProviderConfig) -> Self {
        Self {
            destination: provider.destination.clone(),
            ip_version: provider.ip_version(),
        }
    }
}

/// Source of hop reports
#[async_trait]
pub trait PathProber: Send + Sync {
    /// Measure the path to `target`
    async fn probe(&self, target: &ProbeTarget) -> Result<HopReport, ProbeError>;
}

/// Run `prober` with a hard deadline; an elapsed deadline is a probe failure
pub async fn probe_with_timeout(
    prober: &dyn PathProber,
    target: &ProbeTarget,
    timeout: Duration,
) -> Result<HopReport, ProbeError> {
    match tokio::time::timeout(timeout, prober.probe(target)).await {
        Ok(result) => result,
        Err(_) => Err(ProbeError::Timeout(timeout)),
    }
}

/// `mtr` subprocess prober
#[derive(Debug, Clone)]
pub struct MtrProber {
    config: ProbeConfig,
}

impl MtrProber {
    /// Create prober from probe settings
    pub fn new(config: ProbeConfig) -> Self {
        Self { config }
    }

    /// Command-line arguments for `target`
    pub fn args(&self, target: &ProbeTarget) -> Vec<String> {
        vec![
            format!("-{}", target.ip_version.as_flag()),
            "-n".into(),
            "-j".into(),
            "-c".into(),
            self.config.count.to_string(),
            "-s".into(),
            self.config.packet_size.to_string(),
            "-i".into(),
            self.config.interval_secs.to_string(),
            target.destination.clone(),
        ]
    }
}

#[async_trait]
impl PathProber for MtrProber {
    async fn probe(&self, target: &ProbeTarget) -> Result<HopReport, ProbeError> {
        let args = self.args(target);
        debug!(command = %self.config.command, ?args, "running prober");

        // The child is killed if the surrounding timeout drops this future
        let output = Command::new(&self.config.command)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Err(ProbeError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        HopReport::from_mtr_json(&stdout).map_err(|e| ProbeError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowProber;

    #[async_trait]
    impl PathProber for SlowProber {
        async fn probe(&self, _target: &ProbeTarget) -> Result<HopReport, ProbeError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(HopReport::default())
        }
    }

    fn target() -> ProbeTarget {
        ProbeTarget {
            destination: "2001:db8:8888::100".into(),
            ip_version: IpVersion::V6,
        }
    }

    #[test]
    fn test_mtr_arguments() {
        let prober = MtrProber::new(ProbeConfig::default());
        assert_eq!(
            prober.args(&target()),
            vec!["-6", "-n", "-j", "-c", "5", "-s", "64", "-i", "0.5", "2001:db8:8888::100"]
        );
    }

    #[test]
    fn test_target_from_provider() {
        let config = linkpilot_core::LinkPilotConfig::default();
        let t = ProbeTarget::from(&config.providers[0]);
        assert_eq!(t.ip_version, IpVersion::V6);
        assert_eq!(t.destination, "2001:db8:8888::100");
    }

    #[tokio::test]
    async fn test_timeout_is_probe_failure() {
        let err = probe_with_timeout(&SlowProber, &target(), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_missing_command_is_spawn_error() {
        let prober = MtrProber::new(ProbeConfig {
            command: "/nonexistent/linkpilot-mtr".into(),
            ..ProbeConfig::default()
        });
        let err = prober.probe(&target()).await.unwrap_err();
        assert!(matches!(err, ProbeError::Spawn(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_failure() {
        let prober = MtrProber::new(ProbeConfig {
            command: "false".into(),
            ..ProbeConfig::default()
        });
        let err = prober.probe(&target()).await.unwrap_err();
        assert!(matches!(err, ProbeError::Failed { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_json_output_is_malformed() {
        // `echo` prints its arguments, which is not a report
        let prober = MtrProber::new(ProbeConfig {
            command: "echo".into(),
            ..ProbeConfig::default()
        });
        let err = prober.probe(&target()).await.unwrap_err();
        assert!(matches!(err, ProbeError::Malformed(_)));
    }
}
