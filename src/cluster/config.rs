//! Cluster Configuration
//!
//! Static description of the local node and of the discovery coordinators it
//! talks to. Loaded from a JSON file by the binary; built directly in tests.

use crate::discovery::types::{MasterDiscoveryService, NodeDescriptor, NodeId};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

pub const DEFAULT_MAX_RPC_PARAM_LEN: u32 = 4 * 1024 * 1024;

pub(crate) fn default_max_rpc_param_len() -> u32 {
    DEFAULT_MAX_RPC_PARAM_LEN
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalNodeConfig {
    #[serde(default)]
    pub node_id: NodeId,
    pub listen_addr: String,
    #[serde(default)]
    pub public_services: Vec<String>,
    #[serde(default = "default_max_rpc_param_len")]
    pub max_rpc_param_len: u32,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub retire: bool,
    /// Which services to surface from which coordinator.
    #[serde(default)]
    pub discovery_policy: Vec<MasterDiscoveryService>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub local: LocalNodeConfig,
    /// The discovery coordinators of this cluster network.
    #[serde(default)]
    pub discovery_nodes: Vec<NodeDescriptor>,
}

impl ClusterConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.local.node_id.is_empty() {
            anyhow::bail!("local.node_id must not be empty");
        }
        if self.local.listen_addr.is_empty() {
            anyhow::bail!("local.listen_addr must not be empty");
        }
        if self.local.max_rpc_param_len == 0 {
            anyhow::bail!("local.max_rpc_param_len must be positive");
        }

        let mut seen = HashSet::new();
        for node in &self.discovery_nodes {
            if !seen.insert(&node.node_id) {
                anyhow::bail!("duplicate discovery node {}", node.node_id);
            }
        }

        Ok(())
    }

    pub fn local_node_id(&self) -> &NodeId {
        &self.local.node_id
    }

    /// Descriptor advertised for the local node.
    pub fn local_descriptor(&self) -> NodeDescriptor {
        NodeDescriptor {
            node_id: self.local.node_id.clone(),
            listen_addr: self.local.listen_addr.clone(),
            public_service_list: self.local.public_services.clone(),
            max_rpc_param_len: self.local.max_rpc_param_len,
            private: self.local.private,
            retire: self.local.retire,
        }
    }

    pub fn discovery_nodes(&self) -> &[NodeDescriptor] {
        &self.discovery_nodes
    }

    pub fn master_discovery_node(&self, node_id: &NodeId) -> Option<&NodeDescriptor> {
        self.discovery_nodes.iter().find(|n| &n.node_id == node_id)
    }

    /// True when the local node is one of the discovery coordinators.
    pub fn is_master_discovery_node(&self) -> bool {
        self.master_discovery_node(&self.local.node_id).is_some()
    }

    pub fn discovery_policy(&self) -> &[MasterDiscoveryService] {
        &self.local.discovery_policy
    }
}
