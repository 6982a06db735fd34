//! Discovery Wire Protocol
//!
//! Request and reply types exchanged between coordinators and subscribers,
//! plus the bincode framing used when they cross a process boundary.
//!
//! Constants name the RPC methods the way they are addressed on the wire
//! (`<Service>.<Method>`).

use super::types::{NodeDescriptor, NodeId};
use anyhow::Result;
use serde::{Deserialize, Serialize};

pub const DISCOVERY_MASTER_NAME: &str = "DiscoveryMaster";
pub const DISCOVERY_CLIENT_NAME: &str = "DiscoveryClient";

pub const REG_SERVICE_DISCOVER: &str = "DiscoveryMaster.RPC_RegServiceDiscover";
pub const SUB_SERVICE_DISCOVER: &str = "DiscoveryClient.RPC_SubServiceDiscover";
pub const NODE_RETIRE: &str = "DiscoveryMaster.RPC_NodeRetire";
/// Reserved for a single-node incremental push. No role handles it.
pub const ADD_SUB_SERVICE_DISCOVER: &str = "DiscoveryMaster.RPC_AddSubServiceDiscover";

/// Registration of a subscriber's node with a coordinator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceDiscoverReq {
    pub node_info: Option<NodeDescriptor>,
}

/// Retirement notice; carries the full descriptor with `retire` set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeRetireReq {
    pub node_info: NodeDescriptor,
}

/// Push notification from a coordinator to its registered subscribers.
///
/// - `is_full`: `node_info` is the coordinator's complete registry.
/// - `del_node_id`: a node the coordinator no longer vouches for.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SubscribeDiscoverNotify {
    pub is_full: bool,
    pub node_info: Vec<NodeDescriptor>,
    pub master_node_id: NodeId,
    pub del_node_id: Option<NodeId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum RpcRequest {
    RegServiceDiscover(ServiceDiscoverReq),
    SubServiceDiscover(SubscribeDiscoverNotify),
    NodeRetire(NodeRetireReq),
}

impl RpcRequest {
    pub fn method(&self) -> &'static str {
        match self {
            RpcRequest::RegServiceDiscover(_) => REG_SERVICE_DISCOVER,
            RpcRequest::SubServiceDiscover(_) => SUB_SERVICE_DISCOVER,
            RpcRequest::NodeRetire(_) => NODE_RETIRE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum RpcReply {
    Ack,
    Error(String),
}

impl RpcReply {
    pub fn from_result(result: Result<()>) -> Self {
        match result {
            Ok(()) => RpcReply::Ack,
            Err(e) => RpcReply::Error(e.to_string()),
        }
    }

    pub fn into_result(self) -> Result<()> {
        match self {
            RpcReply::Ack => Ok(()),
            RpcReply::Error(e) => Err(anyhow::anyhow!(e)),
        }
    }
}

/// A request as it travels between processes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcEnvelope {
    pub from: NodeId,
    pub request: RpcRequest,
}

/// Encodes a frame, refusing anything longer than `max_len` bytes.
pub fn encode_frame<T: Serialize>(value: &T, max_len: u32) -> Result<Vec<u8>> {
    let encoded = bincode::serialize(value)?;
    if encoded.len() > max_len as usize {
        anyhow::bail!(
            "rpc frame of {} bytes exceeds max_rpc_param_len {}",
            encoded.len(),
            max_len
        );
    }
    Ok(encoded)
}

pub fn decode_frame<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(bytes)?)
}
