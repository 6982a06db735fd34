use super::collaborators::DiscoveryListener;
use crate::discovery::types::{DiscoveryEvent, NodeId};

use dashmap::DashMap;
use serde::Serialize;
use std::sync::Mutex;

const HISTORY_LIMIT: usize = 256;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DiscoveredNode {
    pub node_id: NodeId,
    pub services: Vec<String>,
    /// Draining: still reachable, but should not receive new work.
    pub retire: bool,
}

/// Services currently surfaced on this node, fed by discovery events.
///
/// Also keeps the most recent raw events so callers can inspect what was raised.
#[derive(Default)]
pub struct ServiceDirectory {
    nodes: DashMap<NodeId, DiscoveredNode>,
    history: Mutex<Vec<DiscoveryEvent>>,
}

impl ServiceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn services_of(&self, node_id: &NodeId) -> Option<Vec<String>> {
        self.nodes
            .get(node_id)
            .map(|entry| entry.value().services.clone())
    }

    pub fn is_retired(&self, node_id: &NodeId) -> Option<bool> {
        self.nodes.get(node_id).map(|entry| entry.value().retire)
    }

    /// Nodes offering `service`, in id order.
    pub fn providers_of(&self, service: &str) -> Vec<NodeId> {
        let mut providers: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|entry| entry.value().services.iter().any(|s| s == service))
            .map(|entry| entry.key().clone())
            .collect();
        providers.sort();
        providers
    }

    pub fn snapshot(&self) -> Vec<DiscoveredNode> {
        let mut nodes: Vec<DiscoveredNode> = self
            .nodes
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        nodes
    }

    pub fn events(&self) -> Vec<DiscoveryEvent> {
        match self.history.lock() {
            Ok(history) => history.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl DiscoveryListener for ServiceDirectory {
    fn on_discovery_event(&self, event: DiscoveryEvent) {
        match &event {
            DiscoveryEvent::Discovered {
                node_id,
                services,
                retire,
            } => {
                tracing::info!(
                    "Discovered node {} with services {:?} (retire={})",
                    node_id,
                    services,
                    retire
                );
                self.nodes.insert(
                    node_id.clone(),
                    DiscoveredNode {
                        node_id: node_id.clone(),
                        services: services.clone(),
                        retire: *retire,
                    },
                );
            }
            DiscoveryEvent::Lost { node_id, forgotten } => {
                if !forgotten {
                    tracing::debug!("Node {} is still vouched for by another master", node_id);
                } else if self.nodes.remove(node_id).is_some() {
                    tracing::info!("Lost node {}", node_id);
                }
            }
        }

        let mut history = match self.history.lock() {
            Ok(history) => history,
            Err(poisoned) => poisoned.into_inner(),
        };
        if history.len() == HISTORY_LIMIT {
            history.remove(0);
        }
        history.push(event);
    }
}
