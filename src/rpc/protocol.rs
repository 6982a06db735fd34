//! HTTP Endpoint Definitions
//!
//! `/rpc` carries bincode frames (`RpcEnvelope` in, `RpcReply` out). The other
//! endpoints are JSON and exist for probing and operating a node.

use crate::cluster::directory::DiscoveredNode;
use crate::discovery::types::{NodeDescriptor, NodeId};
use serde::{Deserialize, Serialize};

pub const ENDPOINT_RPC: &str = "/rpc";
pub const ENDPOINT_HEALTH: &str = "/health";
pub const ENDPOINT_SERVICES: &str = "/services";
pub const ENDPOINT_REGISTRY: &str = "/registry";
pub const ENDPOINT_RETIRE: &str = "/retire";

pub const CONTENT_TYPE_FRAME: &str = "application/octet-stream";

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub node_id: NodeId,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct ServicesResponse {
    pub nodes: Vec<DiscoveredNode>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegistryResponse {
    pub nodes: Vec<NodeDescriptor>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RetireResponse {
    pub node_id: NodeId,
    pub retire: bool,
}

pub fn url(addr: &str, endpoint: &str) -> String {
    format!("http://{}{}", addr, endpoint)
}
