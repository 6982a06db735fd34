//! In-Process Network
//!
//! Runs several discovery nodes inside one process. Each `LocalNode` is the
//! transport and peer manager of its own roles; requests are handed straight
//! to the target node's roles, in the order they were sent.
//!
//! Links follow the peer manager contract: a node only hears `NodeConnected`
//! for peers it upserted itself, and `NodeDisconnected` only when a linked
//! peer leaves the network. Removing or discarding a peer is silent. Links to
//! configured discovery nodes survive a discard, so a master that rejoins is
//! reconnected (and re-registered with) automatically.

use super::collaborators::{PeerManager, RpcFuture, Transport};
use super::config::ClusterConfig;
use super::directory::ServiceDirectory;
use super::node::NodeRoles;
use crate::discovery::protocol::RpcRequest;
use crate::discovery::types::{NodeDescriptor, NodeId};

use anyhow::Result;
use dashmap::DashMap;
use std::sync::{Arc, Mutex, RwLock, Weak};

/// A peer manager call, as recorded by a `LocalNode`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerCall {
    Upsert(NodeDescriptor),
    Remove { node_id: NodeId, graceful: bool },
    Discard(NodeId),
}

#[derive(Debug, Clone)]
struct LinkState {
    descriptor: NodeDescriptor,
    connected: bool,
}

#[derive(Default)]
pub struct LocalNetwork {
    nodes: DashMap<NodeId, Arc<LocalNode>>,
    /// Remaining request/reply calls to a node that should fail.
    injected_failures: DashMap<NodeId, usize>,
}

impl LocalNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Adds a node, starts its roles and connects anyone already linked to it.
    pub fn join(self: &Arc<Self>, config: ClusterConfig) -> Arc<LocalNode> {
        let config = Arc::new(config);
        let node_id = config.local_node_id().clone();

        let node = Arc::new(LocalNode {
            node_id: node_id.clone(),
            config: config.clone(),
            network: Arc::downgrade(self),
            roles: RwLock::new(None),
            links: DashMap::new(),
            directory: Arc::new(ServiceDirectory::new()),
            peer_calls: Mutex::new(Vec::new()),
        });

        let roles = NodeRoles::spawn(
            config,
            node.clone(),
            node.clone(),
            node.directory.clone(),
        );
        if let Ok(mut slot) = node.roles.write() {
            *slot = Some(roles.clone());
        }

        self.nodes.insert(node_id.clone(), node.clone());
        tracing::info!("Node {} joined the local network", node_id);
        roles.start();

        for other in self.nodes.iter() {
            if other.key() != &node_id && other.value().mark_link(&node_id, true) {
                other.value().notify_connected(&node_id);
            }
        }

        node
    }

    /// Takes a node down. Everyone linked to it sees a disconnect.
    pub fn leave(&self, node_id: &NodeId) {
        let Some((_, node)) = self.nodes.remove(node_id) else {
            return;
        };

        let roles = match node.roles.write() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        drop(roles);

        tracing::info!("Node {} left the local network", node_id);

        for other in self.nodes.iter() {
            if other.value().mark_link(node_id, false)
                && let Some(roles) = other.value().roles()
            {
                roles.node_disconnected(node_id);
            }
        }
    }

    pub fn node(&self, node_id: &NodeId) -> Option<Arc<LocalNode>> {
        self.nodes.get(node_id).map(|entry| entry.value().clone())
    }

    /// Makes the next `count` calls addressed to `node_id` fail.
    pub fn fail_calls(&self, node_id: &NodeId, count: usize) {
        self.injected_failures.insert(node_id.clone(), count);
    }

    fn take_injected_failure(&self, node_id: &NodeId) -> bool {
        match self.injected_failures.get_mut(node_id) {
            Some(mut remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    fn roles_of(&self, node_id: &NodeId) -> Result<NodeRoles> {
        self.node(node_id)
            .and_then(|node| node.roles())
            .ok_or_else(|| anyhow::anyhow!("node {} is not reachable", node_id))
    }
}

pub struct LocalNode {
    node_id: NodeId,
    config: Arc<ClusterConfig>,
    network: Weak<LocalNetwork>,
    roles: RwLock<Option<NodeRoles>>,
    links: DashMap<NodeId, LinkState>,
    directory: Arc<ServiceDirectory>,
    peer_calls: Mutex<Vec<PeerCall>>,
}

impl LocalNode {
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn roles(&self) -> Option<NodeRoles> {
        match self.roles.read() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn directory(&self) -> &Arc<ServiceDirectory> {
        &self.directory
    }

    pub fn is_linked(&self, node_id: &NodeId) -> bool {
        self.links.contains_key(node_id)
    }

    /// The descriptor this node last upserted for `node_id`.
    pub fn linked_descriptor(&self, node_id: &NodeId) -> Option<NodeDescriptor> {
        self.links
            .get(node_id)
            .map(|link| link.value().descriptor.clone())
    }

    pub fn is_connected(&self, node_id: &NodeId) -> bool {
        self.links
            .get(node_id)
            .is_some_and(|link| link.value().connected)
    }

    /// Flips an existing link's state. Returns `true` if the state changed.
    fn mark_link(&self, node_id: &NodeId, connected: bool) -> bool {
        match self.links.get_mut(node_id) {
            Some(mut link) if link.connected != connected => {
                link.connected = connected;
                true
            }
            _ => false,
        }
    }

    /// Every peer manager call made by this node's roles, oldest first.
    pub fn peer_calls(&self) -> Vec<PeerCall> {
        match self.peer_calls.lock() {
            Ok(calls) => calls.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn record(&self, call: PeerCall) {
        match self.peer_calls.lock() {
            Ok(mut calls) => calls.push(call),
            Err(poisoned) => poisoned.into_inner().push(call),
        }
    }

    fn notify_connected(&self, node_id: &NodeId) {
        if let Some(roles) = self.roles() {
            roles.node_connected(node_id);
        }
    }

    fn network(&self) -> Result<Arc<LocalNetwork>> {
        self.network
            .upgrade()
            .ok_or_else(|| anyhow::anyhow!("local network is gone"))
    }
}

impl Transport for LocalNode {
    fn go_node(&self, node_id: &NodeId, request: RpcRequest) -> Result<()> {
        let roles = self.network()?.roles_of(node_id)?;
        roles.deliver(request, None);
        Ok(())
    }

    fn call_node(&self, node_id: &NodeId, request: RpcRequest) -> RpcFuture {
        let target = self.network().and_then(|network| {
            if network.take_injected_failure(node_id) {
                anyhow::bail!("injected call failure to {}", node_id);
            }
            network.roles_of(node_id)
        });

        Box::pin(async move {
            let roles = target?;
            roles.call(request).await.into_result()
        })
    }
}

impl PeerManager for LocalNode {
    fn upsert_peer(&self, descriptor: &NodeDescriptor) {
        self.record(PeerCall::Upsert(descriptor.clone()));

        let reachable = self
            .network
            .upgrade()
            .is_some_and(|network| network.nodes.contains_key(&descriptor.node_id));

        let was_connected = self
            .links
            .insert(
                descriptor.node_id.clone(),
                LinkState {
                    descriptor: descriptor.clone(),
                    connected: reachable,
                },
            )
            .is_some_and(|previous| previous.connected);

        if reachable && !was_connected {
            self.notify_connected(&descriptor.node_id);
        }
    }

    fn remove_peer(&self, node_id: &NodeId, graceful: bool) {
        self.record(PeerCall::Remove {
            node_id: node_id.clone(),
            graceful,
        });
        self.links.remove(node_id);
    }

    fn discard_peer(&self, node_id: &NodeId) {
        self.record(PeerCall::Discard(node_id.clone()));
        if self.config.master_discovery_node(node_id).is_none() {
            self.links.remove(node_id);
        }
    }
}
