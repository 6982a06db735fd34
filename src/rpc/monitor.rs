//! Link Liveness Monitor
//!
//! Probes every linked peer's `/health` endpoint and turns state changes into
//! `NodeConnected` / `NodeDisconnected` events on the local roles.
//!
//! - A link is declared up on its first successful probe.
//! - A link is declared down after `PROBE_FAILURE_LIMIT` consecutive failed
//!   probes, including a link that never came up.
//!
//! All links are probed concurrently, so one dead peer never delays the others.

use super::transport::HttpTransport;

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

pub const PROBE_INTERVAL: Duration = Duration::from_secs(1);

pub fn spawn_liveness_monitor(transport: Arc<HttpTransport>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PROBE_INTERVAL);

        loop {
            interval.tick().await;
            probe_round(&transport).await;
        }
    })
}

/// Probes every current link once and applies the results.
pub async fn probe_round(transport: &Arc<HttpTransport>) {
    let mut probes = JoinSet::new();

    for (node_id, addr, generation) in transport.probe_targets() {
        let transport = transport.clone();
        probes.spawn(async move {
            let healthy = transport.probe(&addr).await;
            (node_id, generation, healthy)
        });
    }

    while let Some(result) = probes.join_next().await {
        match result {
            Ok((node_id, generation, healthy)) => {
                if let Some(transition) = transport.record_probe(&node_id, generation, healthy) {
                    transport.announce(&node_id, transition);
                }
            }
            Err(e) => tracing::error!("Probe task failed: {}", e),
        }
    }
}
