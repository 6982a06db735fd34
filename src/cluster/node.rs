//! Node Role Wiring
//!
//! Every node runs a discovery client; nodes listed among the discovery
//! nodes also run a discovery master. `NodeRoles` owns both handles, fans
//! connection events out to them and routes inbound RPCs by method.

use super::collaborators::{DiscoveryListener, PeerManager, Transport};
use super::config::ClusterConfig;
use crate::discovery::client::{ClientHandle, DiscoveryClient};
use crate::discovery::master::{DiscoveryMaster, MasterHandle};
use crate::discovery::protocol::{RpcReply, RpcRequest};
use crate::discovery::types::NodeId;

use std::sync::Arc;
use tokio::sync::oneshot;

#[derive(Clone)]
pub struct NodeRoles {
    node_id: NodeId,
    master: Option<MasterHandle>,
    client: ClientHandle,
}

impl NodeRoles {
    pub fn spawn(
        config: Arc<ClusterConfig>,
        transport: Arc<dyn Transport>,
        peers: Arc<dyn PeerManager>,
        listener: Arc<dyn DiscoveryListener>,
    ) -> Self {
        let master = config.is_master_discovery_node().then(|| {
            DiscoveryMaster::new(config.clone(), transport.clone(), peers.clone()).spawn()
        });
        let client = DiscoveryClient::new(config.clone(), transport, peers, listener).spawn();

        Self {
            node_id: config.local_node_id().clone(),
            master,
            client,
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn master(&self) -> Option<&MasterHandle> {
        self.master.as_ref()
    }

    pub fn client(&self) -> &ClientHandle {
        &self.client
    }

    /// The master starts first so its own services are registered before the
    /// client begins dialing other masters.
    pub fn start(&self) {
        tracing::info!(
            "Starting discovery roles on {} (master={})",
            self.node_id,
            self.master.is_some()
        );
        if let Some(master) = &self.master {
            master.start();
        }
        self.client.start();
    }

    pub fn node_connected(&self, node_id: &NodeId) {
        tracing::debug!("Node {} connected to {}", node_id, self.node_id);
        if let Some(master) = &self.master {
            master.node_connected(node_id.clone());
        }
        self.client.node_connected(node_id.clone());
    }

    pub fn node_disconnected(&self, node_id: &NodeId) {
        tracing::debug!("Node {} disconnected from {}", node_id, self.node_id);
        if let Some(master) = &self.master {
            master.node_disconnected(node_id.clone());
        }
        self.client.node_disconnected(node_id.clone());
    }

    pub fn retire(&self) {
        self.client.retire();
    }

    /// Routes an inbound request without waiting for it to be handled.
    pub fn deliver(&self, request: RpcRequest, reply: Option<oneshot::Sender<RpcReply>>) {
        match request {
            RpcRequest::SubServiceDiscover(_) => self.client.deliver(request, reply),
            RpcRequest::RegServiceDiscover(_) | RpcRequest::NodeRetire(_) => match &self.master {
                Some(master) => master.deliver(request, reply),
                None => {
                    tracing::warn!(
                        "{} received {} but runs no discovery master",
                        self.node_id,
                        request.method()
                    );
                    if let Some(reply) = reply {
                        let _ = reply.send(RpcReply::Error(format!(
                            "node {} runs no discovery master",
                            self.node_id
                        )));
                    }
                }
            },
        }
    }

    /// Routes an inbound request and waits for the role's reply.
    pub async fn call(&self, request: RpcRequest) -> RpcReply {
        let (tx, rx) = oneshot::channel();
        self.deliver(request, Some(tx));
        rx.await.unwrap_or_else(|_| {
            RpcReply::Error(format!("discovery role on {} dropped the request", self.node_id))
        })
    }
}
