//! HTTP Transport
//!
//! Implements the discovery collaborators over HTTP: outbound requests are
//! bincode frames POSTed to the peer's `/rpc` endpoint, and the peer table
//! doubles as the set of links the liveness monitor probes.
//!
//! Requests addressed to the local node never leave the process.

use super::protocol::{CONTENT_TYPE_FRAME, ENDPOINT_HEALTH, ENDPOINT_RPC, url};
use crate::cluster::collaborators::{PeerManager, RpcFuture, Transport};
use crate::cluster::config::ClusterConfig;
use crate::cluster::node::NodeRoles;
use crate::discovery::protocol::{RpcEnvelope, RpcReply, RpcRequest, decode_frame, encode_frame};
use crate::discovery::types::{NodeDescriptor, NodeId};

use anyhow::Result;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

const RPC_TIMEOUT: Duration = Duration::from_secs(5);
const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Consecutive failed probes before a connected link is declared down.
pub const PROBE_FAILURE_LIMIT: u32 = 3;

#[derive(Debug, Clone)]
struct PeerLink {
    /// Latest descriptor upserted for the peer; its `listen_addr` is probed.
    descriptor: NodeDescriptor,
    generation: u64,
    connected: bool,
    failures: u32,
}

/// Outcome of a probe that changes a link's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkTransition {
    Connected,
    Disconnected,
}

pub struct HttpTransport {
    config: Arc<ClusterConfig>,
    client: reqwest::Client,
    links: DashMap<NodeId, PeerLink>,
    next_generation: AtomicU64,
    roles: OnceLock<NodeRoles>,
}

impl HttpTransport {
    pub fn new(config: Arc<ClusterConfig>) -> Arc<Self> {
        Arc::new(Self {
            config,
            client: reqwest::Client::new(),
            links: DashMap::new(),
            next_generation: AtomicU64::new(1),
            roles: OnceLock::new(),
        })
    }

    /// Connects the transport to the roles it delivers local requests and
    /// connection events to. Only the first call has an effect.
    pub fn attach(&self, roles: NodeRoles) {
        if self.roles.set(roles).is_err() {
            tracing::warn!("HTTP transport already attached to node roles");
        }
    }

    fn local_node_id(&self) -> &NodeId {
        self.config.local_node_id()
    }

    fn roles(&self) -> Result<&NodeRoles> {
        self.roles
            .get()
            .ok_or_else(|| anyhow::anyhow!("HTTP transport is not attached to node roles"))
    }

    /// Address of a peer: its live link, falling back to the configured
    /// discovery nodes.
    fn peer_addr(&self, node_id: &NodeId) -> Result<String> {
        if let Some(link) = self.links.get(node_id) {
            return Ok(link.descriptor.listen_addr.clone());
        }

        self.config
            .master_discovery_node(node_id)
            .map(|node| node.listen_addr.clone())
            .ok_or_else(|| anyhow::anyhow!("no address known for node {}", node_id))
    }

    fn frame(&self, request: RpcRequest) -> Result<Vec<u8>> {
        let envelope = RpcEnvelope {
            from: self.local_node_id().clone(),
            request,
        };
        encode_frame(&envelope, self.config.local.max_rpc_param_len)
    }

    /// Links the monitor should probe: `(node id, address, generation)`.
    pub fn probe_targets(&self) -> Vec<(NodeId, String, u64)> {
        self.links
            .iter()
            .map(|entry| {
                (
                    entry.key().clone(),
                    entry.value().descriptor.listen_addr.clone(),
                    entry.value().generation,
                )
            })
            .collect()
    }

    /// The descriptor last upserted for `node_id`, including its `retire` flag.
    pub fn peer_descriptor(&self, node_id: &NodeId) -> Option<NodeDescriptor> {
        self.links
            .get(node_id)
            .map(|link| link.value().descriptor.clone())
    }

    pub fn is_connected(&self, node_id: &NodeId) -> bool {
        self.links
            .get(node_id)
            .is_some_and(|link| link.value().connected)
    }

    /// Applies one probe result. Results for a link that has since been
    /// replaced or removed are ignored.
    ///
    /// `PROBE_FAILURE_LIMIT` consecutive failures report the link down once,
    /// whether or not it was ever up; it is reported again only after a
    /// successful probe.
    pub fn record_probe(
        &self,
        node_id: &NodeId,
        generation: u64,
        healthy: bool,
    ) -> Option<LinkTransition> {
        let mut link = self.links.get_mut(node_id)?;
        if link.generation != generation {
            return None;
        }

        match (healthy, link.connected) {
            (true, false) => {
                link.connected = true;
                link.failures = 0;
                Some(LinkTransition::Connected)
            }
            (true, true) => {
                link.failures = 0;
                None
            }
            (false, _) => {
                link.failures = link.failures.saturating_add(1);
                if link.failures == PROBE_FAILURE_LIMIT {
                    link.connected = false;
                    Some(LinkTransition::Disconnected)
                } else {
                    None
                }
            }
        }
    }

    /// Raises the connection event for a transition on the local roles.
    pub fn announce(&self, node_id: &NodeId, transition: LinkTransition) {
        let Ok(roles) = self.roles() else {
            return;
        };

        match transition {
            LinkTransition::Connected => {
                tracing::info!("Link to {} is up", node_id);
                roles.node_connected(node_id);
            }
            LinkTransition::Disconnected => {
                tracing::warn!("Link to {} is down", node_id);
                roles.node_disconnected(node_id);
            }
        }
    }

    pub async fn probe(&self, addr: &str) -> bool {
        match self
            .client
            .get(url(addr, ENDPOINT_HEALTH))
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::trace!("Probe of {} failed: {}", addr, e);
                false
            }
        }
    }
}

async fn post_frame(client: reqwest::Client, target: String, frame: Vec<u8>) -> Result<RpcReply> {
    let response = client
        .post(target)
        .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE_FRAME)
        .timeout(RPC_TIMEOUT)
        .body(frame)
        .send()
        .await?
        .error_for_status()?;

    let bytes = response.bytes().await?;
    decode_frame(&bytes)
}

impl Transport for HttpTransport {
    fn go_node(&self, node_id: &NodeId, request: RpcRequest) -> Result<()> {
        if node_id == self.local_node_id() {
            self.roles()?.deliver(request, None);
            return Ok(());
        }

        let method = request.method();
        let target = url(&self.peer_addr(node_id)?, ENDPOINT_RPC);
        let frame = self.frame(request)?;
        let client = self.client.clone();
        let node_id = node_id.clone();

        tokio::spawn(async move {
            match post_frame(client, target, frame).await {
                Ok(RpcReply::Ack) => {
                    tracing::trace!("{} delivered to {}", method, node_id);
                }
                Ok(RpcReply::Error(e)) => {
                    tracing::warn!("{} rejected by {}: {}", method, node_id, e);
                }
                Err(e) => {
                    tracing::warn!("{} to {} failed: {}", method, node_id, e);
                }
            }
        });

        Ok(())
    }

    fn call_node(&self, node_id: &NodeId, request: RpcRequest) -> RpcFuture {
        if node_id == self.local_node_id() {
            let roles = self.roles().cloned();
            return Box::pin(async move { roles?.call(request).await.into_result() });
        }

        let prepared = self
            .peer_addr(node_id)
            .and_then(|addr| Ok((url(&addr, ENDPOINT_RPC), self.frame(request)?)));
        let client = self.client.clone();

        Box::pin(async move {
            let (target, frame) = prepared?;
            post_frame(client, target, frame).await?.into_result()
        })
    }
}

impl PeerManager for HttpTransport {
    fn upsert_peer(&self, descriptor: &NodeDescriptor) {
        if &descriptor.node_id == self.local_node_id() {
            return;
        }

        if let Some(mut link) = self.links.get_mut(&descriptor.node_id)
            && link.descriptor.listen_addr == descriptor.listen_addr
        {
            link.descriptor = descriptor.clone();
            return;
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            "Linking peer {} at {} (generation {})",
            descriptor.node_id,
            descriptor.listen_addr,
            generation
        );
        self.links.insert(
            descriptor.node_id.clone(),
            PeerLink {
                descriptor: descriptor.clone(),
                generation,
                connected: false,
                failures: 0,
            },
        );
    }

    fn remove_peer(&self, node_id: &NodeId, graceful: bool) {
        if self.links.remove(node_id).is_some() {
            tracing::debug!("Removed peer {} (graceful={})", node_id, graceful);
        }
    }

    /// Links to configured discovery nodes survive a discard so the monitor
    /// keeps probing them and a returning master is re-registered with.
    fn discard_peer(&self, node_id: &NodeId) {
        if self.config.master_discovery_node(node_id).is_some() {
            return;
        }

        if self.links.remove(node_id).is_some() {
            tracing::debug!("Discarded peer {}", node_id);
        }
    }
}
