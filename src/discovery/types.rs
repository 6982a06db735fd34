use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable, cluster-wide identifier of a node.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub String);

impl NodeId {
    /// Generates a random UUID v4-based NodeId.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for NodeId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Identity and capability advertisement of one cluster node.
///
/// A descriptor with an empty `public_service_list` has nothing to publish and
/// is never stored by a coordinator. `private` nodes are never offered to
/// other subscribers; `retire` marks a node that is draining but still reachable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeDescriptor {
    pub node_id: NodeId,
    pub listen_addr: String,
    #[serde(default)]
    pub public_service_list: Vec<String>,
    #[serde(default = "crate::cluster::config::default_max_rpc_param_len")]
    pub max_rpc_param_len: u32,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub retire: bool,
}

impl NodeDescriptor {
    pub fn has_public_services(&self) -> bool {
        !self.public_service_list.is_empty()
    }
}

/// Per-coordinator allow-list of services the local node wants to surface.
///
/// `master_node_id == None` is the wildcard entry that matches every coordinator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct MasterDiscoveryService {
    #[serde(default)]
    pub master_node_id: Option<NodeId>,
    #[serde(default)]
    pub discovery_services: Vec<String>,
}

/// Raised towards the local node-management layer whenever the subscriber's
/// view of a remote node changes.
///
/// `Lost` is raised whenever a coordinator stops vouching for a node.
/// `forgotten` is set once no coordinator vouches for it anymore and the peer
/// has been removed; until then the node is still reachable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DiscoveryEvent {
    Discovered {
        node_id: NodeId,
        services: Vec<String>,
        retire: bool,
    },
    Lost {
        node_id: NodeId,
        forgotten: bool,
    },
}

impl DiscoveryEvent {
    pub fn node_id(&self) -> &NodeId {
        match self {
            DiscoveryEvent::Discovered { node_id, .. } | DiscoveryEvent::Lost { node_id, .. } => {
                node_id
            }
        }
    }
}
