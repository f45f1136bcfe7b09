//! LinkPilot configuration
//!
//! Loaded once at startup. Every field has a default so a partial document
//! (or no document at all) yields a working two-provider setup.

use crate::error::{ConfigError, ConfigResult};
use crate::model::{IpVersion, ProviderId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv6Addr};
use std::path::Path;
use std::time::Duration;

/// Default config file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/linkpilot/linkpilot.json";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkPilotConfig {
    /// Provider catalog, in tie-break order
    pub providers: Vec<ProviderConfig>,
    /// Primary at startup (first provider when unset)
    pub default_primary: Option<ProviderId>,
    /// Decision and observability thresholds
    pub thresholds: Thresholds,
    /// Samples kept per provider for smoothing
    pub history_window: usize,
    /// Path prober settings
    pub probe: ProbeConfig,
    /// Seconds to sleep between cycles
    pub cycle_interval_secs: u64,
    /// Routing policy store
    pub policy_store: PolicyStoreConfig,
    /// Telemetry sink
    pub telemetry: TelemetryConfig,
}

impl Default for LinkPilotConfig {
    fn default() -> Self {
        Self {
            providers: vec![
                ProviderConfig {
                    name: ProviderId::new("IXA"),
                    destination: "2001:db8:8888::100".into(),
                    peer: IpAddr::V6(Ipv6Addr::new(0x2001, 0xdb8, 0xffaa, 0, 0, 0, 0, 0x255)),
                    ip_version: Some(IpVersion::V6),
                    export_rule_id: Some(1),
                    local_pref_rule_id: Some(3),
                },
                ProviderConfig {
                    name: ProviderId::new("UFINET"),
                    destination: "2001:db8:4444::100".into(),
                    peer: IpAddr::V6(Ipv6Addr::new(0x2001, 0xdb8, 0xffac, 0, 0, 0, 0, 0x255)),
                    ip_version: Some(IpVersion::V6),
                    export_rule_id: Some(2),
                    local_pref_rule_id: Some(4),
                },
            ],
            default_primary: None,
            thresholds: Thresholds::default(),
            history_window: 3,
            probe: ProbeConfig::default(),
            cycle_interval_secs: 30,
            policy_store: PolicyStoreConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl LinkPilotConfig {
    /// Load and validate from a JSON file
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Parse and validate a JSON document
    pub fn from_json(content: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save to file as pretty JSON
    pub fn save(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> ConfigResult<()> {
        if self.providers.is_empty() {
            return Err(ConfigError::Invalid("provider catalog is empty".into()));
        }

        let mut seen = HashSet::new();
        for provider in &self.providers {
            if provider.name.as_str().trim().is_empty() {
                return Err(ConfigError::Invalid("provider with empty name".into()));
            }
            if !seen.insert(provider.name.clone()) {
                return Err(ConfigError::Invalid(format!("duplicate provider {}", provider.name)));
            }
            if provider.destination.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "provider {} has no probe destination",
                    provider.name
                )));
            }
        }

        if self.providers.len() < 2 {
            tracing::warn!("Only one provider configured, failover is not possible");
        }

        if let Some(primary) = &self.default_primary {
            if !seen.contains(primary) {
                return Err(ConfigError::Invalid(format!(
                    "default primary {} is not in the provider catalog",
                    primary
                )));
            }
        }

        if self.history_window == 0 {
            return Err(ConfigError::Invalid("history_window must be at least 1".into()));
        }

        self.thresholds.validate()?;

        if self.probe.count == 0 {
            return Err(ConfigError::Invalid("probe.count must be at least 1".into()));
        }
        if !(self.probe.interval_secs.is_finite() && self.probe.interval_secs > 0.0) {
            return Err(ConfigError::Invalid("probe.interval_secs must be positive".into()));
        }
        if self.probe.timeout_secs == 0 || self.probe.timeout_secs >= self.cycle_interval_secs {
            return Err(ConfigError::Invalid(format!(
                "probe.timeout_secs ({}) must be positive and shorter than cycle_interval_secs ({})",
                self.probe.timeout_secs, self.cycle_interval_secs
            )));
        }

        Ok(())
    }

    /// Primary at startup
    pub fn initial_primary(&self) -> Option<ProviderId> {
        self.default_primary
            .clone()
            .or_else(|| self.providers.first().map(|p| p.name.clone()))
    }

    /// Provider by name
    pub fn provider(&self, name: &ProviderId) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| &p.name == name)
    }

    /// Catalog order of provider identifiers
    pub fn provider_ids(&self) -> Vec<ProviderId> {
        self.providers.iter().map(|p| p.name.clone()).collect()
    }

    /// Sleep between cycles
    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_secs)
    }
}

/// Catalog entry for one uplink provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider identifier
    pub name: ProviderId,
    /// Probe target (address or hostname)
    pub destination: String,
    /// BGP peer address, expected somewhere on the probed path
    pub peer: IpAddr,
    /// Protocol version to probe with (inferred when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_version: Option<IpVersion>,
    /// Policy-store rule exporting routes to this provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_rule_id: Option<u64>,
    /// Policy-store rule setting local preference for this provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_pref_rule_id: Option<u64>,
}

impl ProviderConfig {
    /// Protocol version to probe with.
    ///
    /// Explicit setting first, then the destination when it is an IP
    /// literal, then the peer address.
    pub fn ip_version(&self) -> IpVersion {
        if let Some(version) = self.ip_version {
            return version;
        }
        match self.destination.trim().parse::<IpAddr>() {
            Ok(addr) => IpVersion::of(&addr),
            Err(_) => IpVersion::of(&self.peer),
        }
    }
}

/// Decision and observability thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Peer latency warning (ms)
    pub peer_warning_ms: f64,
    /// Peer latency critical (ms)
    pub peer_critical_ms: f64,
    /// Destination latency warning (ms)
    pub dest_warning_ms: f64,
    /// Destination latency critical (ms)
    pub dest_critical_ms: f64,
    /// Minimum smoothed-score advantage before a switch is considered
    pub switch_margin: f64,
    /// Loss (%) on either leg of the latest sample that marks a provider unhealthy
    pub immediate_failover_loss_pct: f64,
    /// Consecutive cycles a candidate must lead before a latency-driven switch
    pub sustained_cycles: u32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            peer_warning_ms: 12.0,
            peer_critical_ms: 25.0,
            dest_warning_ms: 10.0,
            dest_critical_ms: 30.0,
            switch_margin: 3.0,
            immediate_failover_loss_pct: 20.0,
            sustained_cycles: 3,
        }
    }
}

impl Thresholds {
    fn validate(&self) -> ConfigResult<()> {
        for (name, value) in [
            ("peer_warning_ms", self.peer_warning_ms),
            ("peer_critical_ms", self.peer_critical_ms),
            ("dest_warning_ms", self.dest_warning_ms),
            ("dest_critical_ms", self.dest_critical_ms),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::Invalid(format!("{} must be a positive number", name)));
            }
        }
        if !(self.switch_margin.is_finite() && self.switch_margin >= 0.0) {
            return Err(ConfigError::Invalid("switch_margin must be a non-negative number".into()));
        }
        if !(self.immediate_failover_loss_pct > 0.0 && self.immediate_failover_loss_pct <= 100.0) {
            return Err(ConfigError::Invalid(
                "immediate_failover_loss_pct must be in (0, 100]".into(),
            ));
        }
        if self.sustained_cycles == 0 {
            return Err(ConfigError::Invalid("sustained_cycles must be at least 1".into()));
        }
        Ok(())
    }
}

/// Path prober settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Prober executable
    pub command: String,
    /// Probes sent per hop
    pub count: u32,
    /// Probe packet size (bytes)
    pub packet_size: u32,
    /// Seconds between probe packets
    pub interval_secs: f64,
    /// Hard timeout for one measurement, shorter than the cycle interval
    pub timeout_secs: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            command: "mtr".into(),
            count: 5,
            packet_size: 64,
            interval_secs: 0.5,
            timeout_secs: 25,
        }
    }
}

impl ProbeConfig {
    /// Measurement timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Routing policy store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyStoreConfig {
    /// Base URL of the policy store
    pub url: String,
    /// API token
    pub token: String,
    /// Log updates instead of sending them
    pub dry_run: bool,
    /// AS-path prepend count exported to the primary
    pub primary_prepend: u32,
    /// AS-path prepend count exported to backups
    pub backup_prepend: u32,
    /// Local preference of the primary
    pub primary_local_pref: u32,
    /// Local preference of backups
    pub backup_local_pref: u32,
    /// HTTP request timeout
    pub request_timeout_secs: u64,
}

impl Default for PolicyStoreConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8000".into(),
            token: String::new(),
            dry_run: true,
            primary_prepend: 0,
            backup_prepend: 3,
            primary_local_pref: 200,
            backup_local_pref: 100,
            request_timeout_secs: 10,
        }
    }
}

/// Telemetry sink settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Ship cycle documents to the sink
    pub enabled: bool,
    /// Sink base URL
    pub url: String,
    /// Index name prefix; the UTC date is appended daily
    pub index_prefix: String,
    /// HTTP request timeout
    pub request_timeout_secs: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "http://127.0.0.1:9200".into(),
            index_prefix: "bgp-failover".into(),
            request_timeout_secs: 10,
        }
    }
}
