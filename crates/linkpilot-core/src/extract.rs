//! Hop report to latency snapshot extraction

use crate::config::ProviderConfig;
use crate::error::ExtractError;
use crate::model::{Hop, HopReport, LatencyMetrics};
use std::net::IpAddr;

/// Extract the snapshot for a catalog provider from its hop report
pub fn extract(report: &HopReport, provider: &ProviderConfig) -> Result<LatencyMetrics, ExtractError> {
    extract_for_peer(report, &provider.peer)
}

/// Extract the peer-hop and destination-hop metrics from a report.
///
/// The destination hop is the hop whose index equals the hop count, i.e.
/// the last responding node, which is not necessarily the probed target.
pub fn extract_for_peer(report: &HopReport, peer: &IpAddr) -> Result<LatencyMetrics, ExtractError> {
    let (peer_hop, dest_hop) = locate_hops(report, peer)?;
    Ok(LatencyMetrics::from_hops(peer_hop, dest_hop))
}

/// Locate the peer hop and destination hop.
///
/// When a hop appears more than once, the occurrence closest to the end of
/// the path wins.
pub fn locate_hops<'a>(report: &'a HopReport, peer: &IpAddr) -> Result<(&'a Hop, &'a Hop), ExtractError> {
    if report.is_empty() {
        return Err(ExtractError::EmptyReport);
    }

    let peer_hop = report
        .hops
        .iter()
        .rev()
        .find(|hop| hop.is_host(peer))
        .ok_or_else(|| ExtractError::MissingPeerHop {
            peer: peer.to_string(),
        })?;

    let total = report.len();
    let dest_hop = report
        .hops
        .iter()
        .rev()
        .find(|hop| hop.index as usize == total)
        .ok_or(ExtractError::MissingDestinationHop { expected: total })?;

    Ok((peer_hop, dest_hop))
}
