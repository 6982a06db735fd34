//! Discovery Coordinator
//!
//! Owns the authoritative registry of nodes that registered with this
//! coordinator and fans every change out to all of them.
//!
//! ## Push Rules
//! - **Connect**: a registered node that (re)connects receives a full snapshot.
//!   Unregistered nodes receive nothing, so coordinators of unrelated networks
//!   sharing a transport never leak registry state to each other.
//! - **Disconnect**: the node is dropped and everyone left gets `del_node_id`.
//!   Links to other configured discovery nodes are kept, never removed.
//! - **Register / Retire**: the descriptor is broadcast as an incremental push.
//!
//! Broadcasts are fire-and-forget. A missed push is repaired by the full
//! snapshot the node receives on its next reconnect.

use super::protocol::{
    NodeRetireReq, RpcReply, RpcRequest, ServiceDiscoverReq, SubscribeDiscoverNotify,
};
use super::types::{NodeDescriptor, NodeId};
use crate::cluster::collaborators::{PeerManager, Transport};
use crate::cluster::config::ClusterConfig;
use crate::cluster::mailbox::{Actor, ActorRef, Mailbox, spawn_actor};

use anyhow::Result;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

pub enum MasterMessage {
    Start,
    NodeConnected(NodeId),
    NodeDisconnected(NodeId),
    RegServiceDiscover {
        req: ServiceDiscoverReq,
        reply: Option<oneshot::Sender<RpcReply>>,
    },
    NodeRetire {
        req: NodeRetireReq,
        reply: Option<oneshot::Sender<RpcReply>>,
    },
    Snapshot(oneshot::Sender<Vec<NodeDescriptor>>),
}

pub struct DiscoveryMaster {
    config: Arc<ClusterConfig>,
    transport: Arc<dyn Transport>,
    peers: Arc<dyn PeerManager>,

    /// Membership test for `node_info`; both always hold the same ids.
    registered: HashSet<NodeId>,
    node_info: Vec<NodeDescriptor>,
}

impl DiscoveryMaster {
    pub fn new(
        config: Arc<ClusterConfig>,
        transport: Arc<dyn Transport>,
        peers: Arc<dyn PeerManager>,
    ) -> Self {
        Self {
            config,
            transport,
            peers,
            registered: HashSet::with_capacity(20),
            node_info: Vec::new(),
        }
    }

    /// Starts the coordinator actor and returns the handle RPC dispatch talks to.
    pub fn spawn(self) -> MasterHandle {
        let (actor, _) = spawn_actor(self);
        MasterHandle { actor }
    }

    pub fn is_registered(&self, node_id: &NodeId) -> bool {
        self.registered.contains(node_id)
    }

    pub fn node_info(&self) -> &[NodeDescriptor] {
        &self.node_info
    }

    fn local_node_id(&self) -> NodeId {
        self.config.local_node_id().clone()
    }

    fn is_discovery_node(&self, node_id: &NodeId) -> bool {
        self.config.master_discovery_node(node_id).is_some()
    }

    fn add_node_info(&mut self, descriptor: &NodeDescriptor) {
        if !descriptor.has_public_services() {
            return;
        }

        if !self.registered.insert(descriptor.node_id.clone()) {
            return;
        }

        self.node_info.push(descriptor.clone());
        info!(
            "Registered node {} ({} nodes in registry)",
            descriptor.node_id,
            self.node_info.len()
        );
    }

    fn update_node_info(&mut self, descriptor: &NodeDescriptor) {
        if let Some(stored) = self
            .node_info
            .iter_mut()
            .find(|stored| stored.node_id == descriptor.node_id)
        {
            *stored = descriptor.clone();
        }
    }

    fn remove_node_info(&mut self, node_id: &NodeId) {
        if !self.registered.remove(node_id) {
            return;
        }

        self.node_info.retain(|stored| &stored.node_id != node_id);
        info!(
            "Removed node {} ({} nodes in registry)",
            node_id,
            self.node_info.len()
        );
    }

    /// Fire-and-forget push to every registered node.
    fn broadcast(&self, notify: SubscribeDiscoverNotify) {
        for target in &self.node_info {
            let request = RpcRequest::SubServiceDiscover(notify.clone());
            if let Err(e) = self.transport.go_node(&target.node_id, request) {
                warn!("Failed to push discovery update to {}: {}", target.node_id, e);
            }
        }
    }

    pub fn on_start(&mut self) {
        let local = self.config.local_descriptor();
        info!("Discovery master {} starting", local.node_id);
        self.add_node_info(&local);
    }

    pub fn on_node_connected(&mut self, node_id: &NodeId) {
        if !self.is_registered(node_id) {
            return;
        }

        debug!(
            "Pushing full discovery snapshot ({} nodes) to {}",
            self.node_info.len(),
            node_id
        );

        let notify = SubscribeDiscoverNotify {
            is_full: true,
            node_info: self.node_info.clone(),
            master_node_id: self.local_node_id(),
            del_node_id: None,
        };

        if let Err(e) = self
            .transport
            .go_node(node_id, RpcRequest::SubServiceDiscover(notify))
        {
            warn!("Failed to push full snapshot to {}: {}", node_id, e);
        }
    }

    pub fn on_node_disconnect(&mut self, node_id: &NodeId) {
        if !self.is_registered(node_id) {
            return;
        }

        self.remove_node_info(node_id);
        if !self.is_discovery_node(node_id) {
            self.peers.remove_peer(node_id, true);
        }

        self.broadcast(SubscribeDiscoverNotify {
            is_full: false,
            node_info: Vec::new(),
            master_node_id: self.local_node_id(),
            del_node_id: Some(node_id.clone()),
        });
    }

    pub fn rpc_reg_service_discover(&mut self, req: ServiceDiscoverReq) -> Result<()> {
        let Some(descriptor) = req.node_info else {
            error!("RPC_RegServiceDiscover req is error");
            anyhow::bail!("RPC_RegServiceDiscover req is error");
        };

        info!(
            "Node {} registering services {:?}",
            descriptor.node_id, descriptor.public_service_list
        );

        // Everyone registered so far hears about the node before it is stored.
        self.broadcast(SubscribeDiscoverNotify {
            is_full: false,
            node_info: vec![descriptor.clone()],
            master_node_id: self.local_node_id(),
            del_node_id: None,
        });

        self.add_node_info(&descriptor);

        if self.is_discovery_node(&descriptor.node_id) {
            // Links between discovery nodes are never torn down; relinking would
            // raise a connect on both sides and restart registration.
            self.peers.upsert_peer(&descriptor);
            self.on_node_connected(&descriptor.node_id);
        } else {
            // Disconnect first so the node always sees a fresh connect.
            self.peers.remove_peer(&descriptor.node_id, true);
            self.peers.upsert_peer(&descriptor);
        }

        Ok(())
    }

    pub fn rpc_node_retire(&mut self, req: NodeRetireReq) -> Result<()> {
        let descriptor = req.node_info;
        info!(
            "Node {} is retire (retire={})",
            descriptor.node_id, descriptor.retire
        );

        if !self.is_registered(&descriptor.node_id) {
            debug!(
                "Ignoring retire notice from unregistered node {}",
                descriptor.node_id
            );
            return Ok(());
        }

        self.update_node_info(&descriptor);

        self.broadcast(SubscribeDiscoverNotify {
            is_full: false,
            node_info: vec![descriptor],
            master_node_id: self.local_node_id(),
            del_node_id: None,
        });

        Ok(())
    }
}

fn send_reply(reply: Option<oneshot::Sender<RpcReply>>, result: Result<()>) {
    if let Some(reply) = reply {
        let _ = reply.send(RpcReply::from_result(result));
    }
}

impl Actor for DiscoveryMaster {
    type Message = MasterMessage;

    fn name(&self) -> &'static str {
        super::protocol::DISCOVERY_MASTER_NAME
    }

    fn handle(&mut self, message: MasterMessage, _mailbox: &Mailbox<MasterMessage>) {
        match message {
            MasterMessage::Start => self.on_start(),
            MasterMessage::NodeConnected(node_id) => self.on_node_connected(&node_id),
            MasterMessage::NodeDisconnected(node_id) => self.on_node_disconnect(&node_id),
            MasterMessage::RegServiceDiscover { req, reply } => {
                let result = self.rpc_reg_service_discover(req);
                send_reply(reply, result);
            }
            MasterMessage::NodeRetire { req, reply } => {
                let result = self.rpc_node_retire(req);
                send_reply(reply, result);
            }
            MasterMessage::Snapshot(reply) => {
                let _ = reply.send(self.node_info.clone());
            }
        }
    }
}

/// Cloneable handle to a running coordinator.
#[derive(Clone)]
pub struct MasterHandle {
    actor: ActorRef<MasterMessage>,
}

impl MasterHandle {
    pub fn start(&self) {
        self.actor.send(MasterMessage::Start);
    }

    pub fn node_connected(&self, node_id: NodeId) {
        self.actor.send(MasterMessage::NodeConnected(node_id));
    }

    pub fn node_disconnected(&self, node_id: NodeId) {
        self.actor.send(MasterMessage::NodeDisconnected(node_id));
    }

    /// Routes an inbound request; the reply, if wanted, arrives on `reply`.
    pub fn deliver(&self, request: RpcRequest, reply: Option<oneshot::Sender<RpcReply>>) {
        let message = match request {
            RpcRequest::RegServiceDiscover(req) => MasterMessage::RegServiceDiscover { req, reply },
            RpcRequest::NodeRetire(req) => MasterMessage::NodeRetire { req, reply },
            other => {
                warn!("{} is not a discovery master method", other.method());
                if let Some(reply) = reply {
                    let _ = reply.send(RpcReply::Error(format!(
                        "{} is not a discovery master method",
                        other.method()
                    )));
                }
                return;
            }
        };

        if !self.actor.send(message) {
            warn!("Discovery master has stopped, dropping request");
        }
    }

    /// Current registry contents, in registration order.
    pub async fn snapshot(&self) -> Result<Vec<NodeDescriptor>> {
        let (tx, rx) = oneshot::channel();
        if !self.actor.send(MasterMessage::Snapshot(tx)) {
            anyhow::bail!("discovery master has stopped");
        }
        Ok(rx.await?)
    }
}
