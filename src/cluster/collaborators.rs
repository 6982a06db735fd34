//! Collaborator Interfaces
//!
//! The discovery roles never touch sockets or the connection table directly.
//! Everything they need from the surrounding runtime goes through these traits,
//! which are injected when a role is constructed.

use crate::discovery::protocol::RpcRequest;
use crate::discovery::types::{DiscoveryEvent, NodeDescriptor, NodeId};

use anyhow::Result;
use std::future::Future;
use std::pin::Pin;

/// Completion of a request/reply call. Resolves to `Err` on transport failure
/// or when the callee answered with an error.
pub type RpcFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// Outbound RPC primitives.
pub trait Transport: Send + Sync {
    /// Fire-and-forget send. `Err` only when the request could not be
    /// dispatched at all; delivery itself is never confirmed.
    fn go_node(&self, node_id: &NodeId, request: RpcRequest) -> Result<()>;

    /// Request/reply call. The returned future does not borrow the transport.
    fn call_node(&self, node_id: &NodeId, request: RpcRequest) -> RpcFuture;
}

/// The peer-connection manager: establishes, updates and tears down live peers.
pub trait PeerManager: Send + Sync {
    /// Establish or update a live peer. Raises a connect event once the link is up.
    fn upsert_peer(&self, descriptor: &NodeDescriptor);

    /// Tear a peer down. Never raises a disconnect event.
    fn remove_peer(&self, node_id: &NodeId, graceful: bool);

    /// Drop any connection state left behind by a disconnected peer.
    fn discard_peer(&self, node_id: &NodeId);
}

/// Receives subscriber discovery events.
pub trait DiscoveryListener: Send + Sync {
    fn on_discovery_event(&self, event: DiscoveryEvent);
}
