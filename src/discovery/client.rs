//! Discovery Subscriber
//!
//! Registers the local node with every configured coordinator and turns their
//! push notifications into peer upserts/removals on the local node.
//!
//! ## Reconciliation
//! Each coordinator vouches for a set of remote nodes. A full snapshot from a
//! coordinator is diffed against the set recorded for it; nodes missing from
//! the snapshot are removed. A node is only handed to the peer manager for
//! removal once no coordinator vouches for it anymore.

use super::policy::filter_services;
use super::protocol::{
    DISCOVERY_CLIENT_NAME, NodeRetireReq, REG_SERVICE_DISCOVER, RpcReply, RpcRequest,
    ServiceDiscoverReq, SubscribeDiscoverNotify,
};
use super::types::{DiscoveryEvent, NodeDescriptor, NodeId};
use crate::cluster::collaborators::{DiscoveryListener, PeerManager, Transport};
use crate::cluster::config::ClusterConfig;
use crate::cluster::mailbox::{Actor, ActorRef, Mailbox, spawn_actor};

use anyhow::Result;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// Fixed delay between registration attempts. There is no attempt cap.
pub const REGISTER_RETRY_DELAY: Duration = Duration::from_secs(3);

/// `master node id -> remote node ids` the master vouches for.
pub type DiscoveryMap = HashMap<NodeId, HashSet<NodeId>>;

pub enum ClientMessage {
    Start,
    NodeConnected(NodeId),
    NodeDisconnected(NodeId),
    Retire,
    SubServiceDiscover(SubscribeDiscoverNotify),
    RegisterReply { master: NodeId, result: Result<()> },
    RetryRegister(NodeId),
    Snapshot(oneshot::Sender<DiscoveryMap>),
}

pub struct DiscoveryClient {
    config: Arc<ClusterConfig>,
    transport: Arc<dyn Transport>,
    peers: Arc<dyn PeerManager>,
    listener: Arc<dyn DiscoveryListener>,

    local_node_id: NodeId,
    discovery: DiscoveryMap,
    retire: bool,
}

impl DiscoveryClient {
    pub fn new(
        config: Arc<ClusterConfig>,
        transport: Arc<dyn Transport>,
        peers: Arc<dyn PeerManager>,
        listener: Arc<dyn DiscoveryListener>,
    ) -> Self {
        Self {
            local_node_id: config.local_node_id().clone(),
            retire: config.local.retire,
            config,
            transport,
            peers,
            listener,
            discovery: HashMap::new(),
        }
    }

    /// Starts the subscriber actor and returns the handle RPC dispatch talks to.
    pub fn spawn(self) -> ClientHandle {
        let (actor, _) = spawn_actor(self);
        ClientHandle { actor }
    }

    pub fn discovery_map(&self) -> &DiscoveryMap {
        &self.discovery
    }

    pub fn is_retired(&self) -> bool {
        self.retire
    }

    fn local_descriptor(&self) -> NodeDescriptor {
        let mut descriptor = self.config.local_descriptor();
        descriptor.retire = self.retire;
        descriptor
    }

    fn add_master_node(&mut self, master: &NodeId, node_id: &NodeId) {
        self.discovery
            .entry(master.clone())
            .or_default()
            .insert(node_id.clone());
    }

    fn remove_master_node(&mut self, master: &NodeId, node_id: &NodeId) {
        if let Some(nodes) = self.discovery.get_mut(master) {
            nodes.remove(node_id);
        }
    }

    /// True while any coordinator still vouches for `node_id`.
    fn is_vouched(&self, node_id: &NodeId) -> bool {
        self.discovery.values().any(|nodes| nodes.contains(node_id))
    }

    /// Nodes recorded under `master` that a full snapshot no longer lists.
    fn full_compare_diff(&self, master: &NodeId, snapshot: &[NodeDescriptor]) -> Vec<NodeId> {
        let Some(known) = self.discovery.get(master) else {
            return Vec::new();
        };

        let mut missing: Vec<NodeId> = known
            .iter()
            .filter(|node_id| !snapshot.iter().any(|d| &d.node_id == *node_id))
            .cloned()
            .collect();
        missing.sort();
        missing
    }

    pub fn on_start(&mut self) {
        for master in self.config.discovery_nodes() {
            if master.node_id == self.local_node_id {
                continue;
            }
            debug!("Connecting to discovery master {}", master.node_id);
            self.peers.upsert_peer(master);
        }
    }

    pub fn on_node_connected(&mut self, node_id: &NodeId, mailbox: &Mailbox<ClientMessage>) {
        self.reg_service_discover(node_id, mailbox);
    }

    pub fn on_node_disconnect(&mut self, node_id: &NodeId) {
        self.peers.discard_peer(node_id);
    }

    fn reg_service_discover(&mut self, master: &NodeId, mailbox: &Mailbox<ClientMessage>) {
        if self.config.master_discovery_node(master).is_none() {
            return;
        }

        let req = ServiceDiscoverReq {
            node_info: Some(self.local_descriptor()),
        };

        debug!("Registering with discovery master {}", master);
        let call = self
            .transport
            .call_node(master, RpcRequest::RegServiceDiscover(req));

        let master = master.clone();
        mailbox.pipe(call, move |result| ClientMessage::RegisterReply { master, result });
    }

    pub fn on_register_reply(
        &mut self,
        master: NodeId,
        result: Result<()>,
        mailbox: &Mailbox<ClientMessage>,
    ) {
        match result {
            Ok(()) => info!("Registered with discovery master {}", master),
            Err(e) => {
                error!("call {} is fail: {}", REG_SERVICE_DISCOVER, e);
                mailbox.post_after(REGISTER_RETRY_DELAY, ClientMessage::RetryRegister(master));
            }
        }
    }

    pub fn on_retire(&mut self) {
        self.retire = true;
        info!("Local node {} is retiring", self.local_node_id);

        let descriptor = self.local_descriptor();
        for master in self.config.discovery_nodes() {
            let req = NodeRetireReq {
                node_info: descriptor.clone(),
            };
            if let Err(e) = self
                .transport
                .go_node(&master.node_id, RpcRequest::NodeRetire(req))
            {
                error!("Failed to notify {} of retirement: {}", master.node_id, e);
            }
        }
    }

    /// Collapses a push into one candidate per remote node.
    fn collect_candidates(&self, pushed: &[NodeDescriptor]) -> Vec<NodeDescriptor> {
        let is_master = self.config.is_master_discovery_node();
        let mut candidates: Vec<NodeDescriptor> = Vec::new();

        for descriptor in pushed {
            if descriptor.node_id == self.local_node_id {
                continue;
            }

            if !is_master
                && descriptor.public_service_list.len() == 1
                && descriptor.public_service_list[0] == DISCOVERY_CLIENT_NAME
            {
                continue;
            }

            for service in &descriptor.public_service_list {
                let index = match candidates
                    .iter()
                    .position(|c| c.node_id == descriptor.node_id)
                {
                    Some(index) => index,
                    None => {
                        candidates.push(NodeDescriptor {
                            public_service_list: Vec::new(),
                            ..descriptor.clone()
                        });
                        candidates.len() - 1
                    }
                };
                candidates[index].public_service_list.push(service.clone());
            }
        }

        candidates
    }

    /// Applies the discovery policy and records the survivor. Returns `false`
    /// when nothing of the node is surfaced.
    fn set_node_info(&mut self, master: &NodeId, candidate: NodeDescriptor) -> bool {
        if candidate.private || candidate.node_id == self.local_node_id {
            return false;
        }

        let services = filter_services(
            self.config.discovery_policy(),
            master,
            &candidate.public_service_list,
        );
        if services.is_empty() {
            return false;
        }

        let filtered = NodeDescriptor {
            public_service_list: services.clone(),
            ..candidate
        };

        self.add_master_node(master, &filtered.node_id);
        self.peers.upsert_peer(&filtered);
        self.listener.on_discovery_event(DiscoveryEvent::Discovered {
            node_id: filtered.node_id,
            services,
            retire: filtered.retire,
        });

        true
    }

    pub fn rpc_sub_service_discover(&mut self, req: SubscribeDiscoverNotify) {
        let master = req.master_node_id;
        let candidates = self.collect_candidates(&req.node_info);

        let mut removals = Vec::new();
        if req.is_full {
            removals.extend(self.full_compare_diff(&master, &candidates));
        }
        if let Some(del_node_id) = req.del_node_id
            && !del_node_id.is_empty()
            && del_node_id != self.local_node_id
        {
            removals.push(del_node_id);
        }

        debug!(
            "Discovery push from {} (full={}): {} candidates, {} removals",
            master,
            req.is_full,
            candidates.len(),
            removals.len()
        );

        for node_id in removals {
            self.remove_master_node(&master, &node_id);
            let forgotten = !self.is_vouched(&node_id);
            if forgotten {
                info!("Node {} is no longer discovered by any master", node_id);
                self.peers.remove_peer(&node_id, false);
            }
            self.listener
                .on_discovery_event(DiscoveryEvent::Lost { node_id, forgotten });
        }

        for candidate in candidates {
            self.set_node_info(&master, candidate);
        }
    }
}

impl Actor for DiscoveryClient {
    type Message = ClientMessage;

    fn name(&self) -> &'static str {
        DISCOVERY_CLIENT_NAME
    }

    fn handle(&mut self, message: ClientMessage, mailbox: &Mailbox<ClientMessage>) {
        match message {
            ClientMessage::Start => self.on_start(),
            ClientMessage::NodeConnected(node_id) => self.on_node_connected(&node_id, mailbox),
            ClientMessage::NodeDisconnected(node_id) => self.on_node_disconnect(&node_id),
            ClientMessage::Retire => self.on_retire(),
            ClientMessage::SubServiceDiscover(req) => self.rpc_sub_service_discover(req),
            ClientMessage::RegisterReply { master, result } => {
                self.on_register_reply(master, result, mailbox)
            }
            ClientMessage::RetryRegister(master) => self.reg_service_discover(&master, mailbox),
            ClientMessage::Snapshot(reply) => {
                let _ = reply.send(self.discovery.clone());
            }
        }
    }
}

/// Cloneable handle to a running subscriber.
#[derive(Clone)]
pub struct ClientHandle {
    actor: ActorRef<ClientMessage>,
}

impl ClientHandle {
    pub fn start(&self) {
        self.actor.send(ClientMessage::Start);
    }

    pub fn node_connected(&self, node_id: NodeId) {
        self.actor.send(ClientMessage::NodeConnected(node_id));
    }

    pub fn node_disconnected(&self, node_id: NodeId) {
        self.actor.send(ClientMessage::NodeDisconnected(node_id));
    }

    pub fn retire(&self) {
        self.actor.send(ClientMessage::Retire);
    }

    /// Routes an inbound request. Pushes are one-way, so the reply is an
    /// immediate ack.
    pub fn deliver(&self, request: RpcRequest, reply: Option<oneshot::Sender<RpcReply>>) {
        let outcome = match request {
            RpcRequest::SubServiceDiscover(req) => {
                if self.actor.send(ClientMessage::SubServiceDiscover(req)) {
                    RpcReply::Ack
                } else {
                    RpcReply::Error("discovery client has stopped".to_string())
                }
            }
            other => {
                warn!("{} is not a discovery client method", other.method());
                RpcReply::Error(format!("{} is not a discovery client method", other.method()))
            }
        };

        if let Some(reply) = reply {
            let _ = reply.send(outcome);
        }
    }

    pub async fn snapshot(&self) -> Result<DiscoveryMap> {
        let (tx, rx) = oneshot::channel();
        if !self.actor.send(ClientMessage::Snapshot(tx)) {
            anyhow::bail!("discovery client has stopped");
        }
        Ok(rx.await?)
    }
}
