//! Measurement data model
//!
//! Hop reports as produced by the path prober and the per-provider
//! latency snapshot extracted from them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// Uplink provider identifier (catalog name, e.g. `IXA`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(String);

impl ProviderId {
    /// Create a provider identifier
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Identifier as string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProviderId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl PartialEq<str> for ProviderId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for ProviderId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// IP protocol version used to probe a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IpVersion {
    /// IPv4
    #[serde(rename = "4")]
    V4,
    /// IPv6
    #[serde(rename = "6")]
    V6,
}

impl IpVersion {
    /// Version of an address
    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => Self::V4,
            IpAddr::V6(_) => Self::V6,
        }
    }

    /// Numeric flag as passed to the prober (`4` or `6`)
    pub const fn as_flag(&self) -> u8 {
        match self {
            Self::V4 => 4,
            Self::V6 => 6,
        }
    }

    /// Label used in telemetry (`IPv4` / `IPv6`)
    pub const fn label(&self) -> &'static str {
        match self {
            Self::V4 => "IPv4",
            Self::V6 => "IPv6",
        }
    }
}

impl fmt::Display for IpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One hop of a path-probe report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hop {
    /// 1-based hop index
    #[serde(rename = "count")]
    pub index: u32,
    /// Responding host address (`???` when the hop did not answer)
    #[serde(default)]
    pub host: String,
    /// Loss percentage (0-100)
    #[serde(rename = "Loss%", default = "full_loss")]
    pub loss_pct: f64,
    /// Average round-trip latency in milliseconds
    #[serde(rename = "Avg", default = "unreachable")]
    pub avg_ms: f64,
    /// Standard deviation of the round-trip latency in milliseconds
    #[serde(rename = "StDev", default)]
    pub stddev_ms: f64,
}

fn full_loss() -> f64 {
    100.0
}

fn unreachable() -> f64 {
    f64::INFINITY
}

impl Hop {
    /// Create a hop record
    pub fn new(index: u32, host: impl Into<String>, avg_ms: f64, loss_pct: f64, stddev_ms: f64) -> Self {
        Self {
            index,
            host: host.into(),
            loss_pct,
            avg_ms,
            stddev_ms,
        }
    }

    /// Whether this hop's host is `addr`.
    ///
    /// Compares parsed addresses when the host is an IP literal so that
    /// differently formatted IPv6 addresses still match.
    pub fn is_host(&self, addr: &IpAddr) -> bool {
        match self.host.trim().parse::<IpAddr>() {
            Ok(host) => host == *addr,
            Err(_) => self.host.trim() == addr.to_string(),
        }
    }
}

/// Hop-by-hop path report, ordered from the first hop to the last
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HopReport {
    /// Hops in path order
    pub hops: Vec<Hop>,
}

impl HopReport {
    /// Build a report from hops
    pub fn new(hops: Vec<Hop>) -> Self {
        Self { hops }
    }

    /// Parse the JSON document emitted by `mtr --json`
    pub fn from_mtr_json(raw: &str) -> Result<Self, serde_json::Error> {
        let doc: MtrDocument = serde_json::from_str(raw)?;
        Ok(Self { hops: doc.report.hubs })
    }

    /// Number of hops
    pub fn len(&self) -> usize {
        self.hops.len()
    }

    /// Whether the report holds no hops
    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct MtrDocument {
    report: MtrReport,
}

#[derive(Debug, Deserialize)]
struct MtrReport {
    #[serde(default)]
    hubs: Vec<Hop>,
}

/// Per-provider latency snapshot for one measurement cycle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatencyMetrics {
    /// Peer hop average latency (ms)
    pub peer_avg_ms: f64,
    /// Peer hop loss (0-100)
    pub peer_loss_pct: f64,
    /// Peer hop jitter (ms)
    pub peer_stddev_ms: f64,
    /// Destination hop average latency (ms)
    pub dest_avg_ms: f64,
    /// Destination hop loss (0-100)
    pub dest_loss_pct: f64,
    /// Destination hop jitter (ms)
    pub dest_stddev_ms: f64,
}

impl LatencyMetrics {
    /// Latency recorded for a failed measurement
    pub const PENALTY_LATENCY_MS: f64 = 999.0;

    /// Snapshot substituted when a provider could not be measured
    pub const fn penalty() -> Self {
        Self {
            peer_avg_ms: Self::PENALTY_LATENCY_MS,
            peer_loss_pct: 100.0,
            peer_stddev_ms: 0.0,
            dest_avg_ms: Self::PENALTY_LATENCY_MS,
            dest_loss_pct: 100.0,
            dest_stddev_ms: 0.0,
        }
    }

    /// Build a snapshot from the peer and destination hops.
    ///
    /// Loss is clamped to `[0, 100]`; a NaN loss counts as total loss and a
    /// NaN latency as unreachable.
    pub fn from_hops(peer: &Hop, dest: &Hop) -> Self {
        Self {
            peer_avg_ms: sanitize_latency(peer.avg_ms),
            peer_loss_pct: sanitize_loss(peer.loss_pct),
            peer_stddev_ms: sanitize_jitter(peer.stddev_ms),
            dest_avg_ms: sanitize_latency(dest.avg_ms),
            dest_loss_pct: sanitize_loss(dest.loss_pct),
            dest_stddev_ms: sanitize_jitter(dest.stddev_ms),
        }
    }

    /// Whether any loss was observed on either leg
    pub fn has_packet_loss(&self) -> bool {
        self.peer_loss_pct > 0.0 || self.dest_loss_pct > 0.0
    }
}

fn sanitize_loss(loss: f64) -> f64 {
    if loss.is_nan() {
        100.0
    } else {
        loss.clamp(0.0, 100.0)
    }
}

fn sanitize_latency(ms: f64) -> f64 {
    if ms.is_nan() {
        f64::INFINITY
    } else {
        ms.max(0.0)
    }
}

fn sanitize_jitter(ms: f64) -> f64 {
    if ms.is_nan() {
        0.0
    } else {
        ms.max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MTR_SAMPLE: &str = r#"{
        "report": {
            "mtr": {"src": "edge01", "dst": "2001:db8:8888::100", "tests": 5},
            "hubs": [
                {"count": 1, "host": "2001:db8:1::1", "Loss%": 0.0, "Snt": 5, "Avg": 0.41, "StDev": 0.05},
                {"count": 2, "host": "2001:db8:ffaa::255", "Loss%": 0.0, "Snt": 5, "Avg": 6.33, "StDev": 0.8},
                {"count": 3, "host": "???", "Loss%": 100.0, "Snt": 5},
                {"count": 4, "host": "2001:db8:8888::100", "Loss%": 20.0, "Snt": 5, "Avg": 9.1, "StDev": 1.2}
            ]
        }
    }"#;

    #[test]
    fn test_parse_mtr_json() {
        let report = HopReport::from_mtr_json(MTR_SAMPLE).unwrap();
        assert_eq!(report.len(), 4);
        assert_eq!(report.hops[1].host, "2001:db8:ffaa::255");
        assert_eq!(report.hops[3].loss_pct, 20.0);

        // Silent hop falls back to unreachable defaults
        assert!(report.hops[2].avg_ms.is_infinite());
        assert_eq!(report.hops[2].stddev_ms, 0.0);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(HopReport::from_mtr_json("mtr: unable to get raw sockets").is_err());
        assert!(HopReport::from_mtr_json(r#"{"hubs": []}"#).is_err());
    }

    #[test]
    fn test_hop_matches_normalized_ipv6() {
        let hop = Hop::new(2, "2001:0db8:ffaa:0000::0255", 6.0, 0.0, 0.1);
        let peer: IpAddr = "2001:db8:ffaa::255".parse().unwrap();
        assert!(hop.is_host(&peer));

        let other: IpAddr = "2001:db8:ffac::255".parse().unwrap();
        assert!(!hop.is_host(&other));
    }

    #[test]
    fn test_snapshot_sanitizes_inputs() {
        let peer = Hop::new(1, "10.0.0.1", f64::NAN, 140.0, f64::NAN);
        let dest = Hop::new(2, "10.0.0.2", -1.0, -3.0, 0.5);
        let m = LatencyMetrics::from_hops(&peer, &dest);

        assert!(m.peer_avg_ms.is_infinite());
        assert_eq!(m.peer_loss_pct, 100.0);
        assert_eq!(m.peer_stddev_ms, 0.0);
        assert_eq!(m.dest_avg_ms, 0.0);
        assert_eq!(m.dest_loss_pct, 0.0);
    }

    #[test]
    fn test_penalty_snapshot() {
        let p = LatencyMetrics::penalty();
        assert_eq!(p.peer_avg_ms, 999.0);
        assert_eq!(p.dest_loss_pct, 100.0);
        assert!(p.has_packet_loss());
    }

    #[test]
    fn test_ip_version_serde() {
        let v: IpVersion = serde_json::from_str("\"6\"").unwrap();
        assert_eq!(v, IpVersion::V6);
        assert_eq!(v.label(), "IPv6");
        assert_eq!(IpVersion::V4.as_flag(), 4);
    }
}
