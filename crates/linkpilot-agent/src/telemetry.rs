//! Per-cycle telemetry
//!
//! One flat document per cycle, with per-provider fields prefixed by the
//! lower-cased provider name (`ixa_score`, `ufinet_peer_latency_ms`, ...).

use crate::error::TelemetryError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use linkpilot_core::{IpVersion, LatencyMetrics, ProviderId, TelemetryConfig};
use reqwest::Client;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// One provider's state in a cycle
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSnapshot {
    /// Provider
    pub provider: ProviderId,
    /// Probed protocol version
    pub ip_version: IpVersion,
    /// Smoothed score
    pub score: f64,
    /// Latest-sample loss health
    pub healthy: bool,
    /// Primary at the start of the cycle
    pub is_primary: bool,
    /// Snapshot measured this cycle (penalty on failure)
    pub metrics: LatencyMetrics,
    /// Either leg at or above warning latency
    pub latency_warning: bool,
    /// Either leg at or above critical latency
    pub latency_critical: bool,
    /// Measurement failed and the penalty snapshot was used
    pub measurement_failed: bool,
}

/// Telemetry record for one cycle, as of the start of the cycle
#[derive(Debug, Clone, PartialEq)]
pub struct CycleRecord {
    /// Emission time
    pub timestamp: DateTime<Utc>,
    /// Cycle number, from 1
    pub cycle: u64,
    /// Primary before any switch this cycle
    pub current_provider: ProviderId,
    /// Whether a switch was decided
    pub provider_changed: bool,
    /// Primary being left, on a switching cycle
    pub previous_provider: Option<ProviderId>,
    /// Switch target, on a switching cycle
    pub new_provider: Option<ProviderId>,
    /// Decision reason
    pub change_reason: String,
    /// Per-provider state, catalog order
    pub providers: Vec<ProviderSnapshot>,
}

impl CycleRecord {
    /// Flat JSON document
    pub fn to_document(&self) -> Value {
        let mut doc = Map::new();
        doc.insert("@timestamp".into(), json!(self.timestamp.to_rfc3339()));
        doc.insert("cycle".into(), json!(self.cycle));
        doc.insert("current_provider".into(), json!(self.current_provider));
        doc.insert("provider_changed".into(), json!(self.provider_changed));
        doc.insert("previous_provider".into(), json!(self.previous_provider));
        doc.insert("new_provider".into(), json!(self.new_provider));
        doc.insert("change_reason".into(), json!(self.change_reason));

        for p in &self.providers {
            let prefix = p.provider.as_str().to_lowercase().replace(' ', "_");
            let m = &p.metrics;
            let mut put = |key: &str, value: Value| {
                doc.insert(format!("{}_{}", prefix, key), value);
            };
            put("score", json!(round2(p.score)));
            put("is_healthy", json!(p.healthy));
            put("is_primary", json!(p.is_primary));
            put("peer_latency_ms", json!(round2(m.peer_avg_ms)));
            put("peer_jitter_ms", json!(round2(m.peer_stddev_ms)));
            put("peer_loss_pct", json!(round2(m.peer_loss_pct)));
            put("dest_latency_ms", json!(round2(m.dest_avg_ms)));
            put("dest_jitter_ms", json!(round2(m.dest_stddev_ms)));
            put("dest_loss_pct", json!(round2(m.dest_loss_pct)));
            put("ip_version", json!(p.ip_version.label()));
            put("has_latency_warning", json!(p.latency_warning));
            put("has_latency_critical", json!(p.latency_critical));
            put("has_packet_loss", json!(m.has_packet_loss()));
        }

        Value::Object(doc)
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Destination for cycle records
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    /// Ship one record
    async fn emit(&self, record: &CycleRecord) -> Result<(), TelemetryError>;
}

/// Elasticsearch sink writing to a daily index
pub struct ElasticsearchSink {
    base_url: String,
    index_prefix: String,
    client: Client,
    enabled: AtomicBool,
}

impl ElasticsearchSink {
    /// Create sink from telemetry settings
    pub fn new(config: &TelemetryConfig) -> Result<Self, TelemetryError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            index_prefix: config.index_prefix.clone(),
            client,
            enabled: AtomicBool::new(true),
        })
    }

    /// Check cluster health; an unreachable or unhealthy-responding cluster
    /// disables the sink. Returns whether the sink is enabled.
    pub async fn verify(&self) -> bool {
        let url = format!("{}/_cluster/health", self.base_url);
        match self.client.get(&url).send().await {
            Ok(response) if response.status().is_success() => {
                let health: Value = response.json().await.unwrap_or(Value::Null);
                info!(
                    url = %self.base_url,
                    cluster = health.get("cluster_name").and_then(serde_json::Value::as_str).unwrap_or("unknown"),
                    status = health.get("status").and_then(serde_json::Value::as_str).unwrap_or("unknown"),
                    "connected to Elasticsearch"
                );
            }
            Ok(response) => {
                warn!(url = %self.base_url, status = response.status().as_u16(), "Elasticsearch health check failed, telemetry disabled");
                self.enabled.store(false, Ordering::Relaxed);
            }
            Err(e) => {
                warn!(url = %self.base_url, "Elasticsearch unreachable, telemetry disabled: {}", e);
                self.enabled.store(false, Ordering::Relaxed);
            }
        }
        self.is_enabled()
    }

    /// Whether records are being shipped
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Daily index for a timestamp
    pub fn index_name(&self, timestamp: &DateTime<Utc>) -> String {
        format!("{}-{}", self.index_prefix, timestamp.format("%Y.%m.%d"))
    }
}

#[async_trait]
impl TelemetrySink for ElasticsearchSink {
    async fn emit(&self, record: &CycleRecord) -> Result<(), TelemetryError> {
        if !self.is_enabled() {
            return Err(TelemetryError::Disabled);
        }

        let url = format!("{}/{}/_doc", self.base_url, self.index_name(&record.timestamp));
        debug!("POST {}", url);

        let response = self.client.post(&url).json(&record.to_document()).send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(TelemetryError::Status { status, body });
        }

        debug!(cycle = record.cycle, "telemetry sent");
        Ok(())
    }
}

/// Sink that only logs the document
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl TelemetrySink for LogSink {
    async fn emit(&self, record: &CycleRecord) -> Result<(), TelemetryError> {
        debug!(cycle = record.cycle, document = %record.to_document(), "cycle record");
        Ok(())
    }
}
