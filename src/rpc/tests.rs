//! RPC Module Tests
//!
//! ## Test Scopes
//! - **Link State**: probe bookkeeping and the connect/disconnect transitions it raises.
//! - **Peer Table**: upsert, remove and discard semantics of `HttpTransport`.
//! - **Handlers**: frame decoding and role dispatch behind `/rpc`, the `/services` view.
//! - **Monitor**: concurrent probe rounds.
//! - **End To End**: a coordinator and a subscriber talking over real sockets.

#[cfg(test)]
mod tests {
    use crate::cluster::config::{ClusterConfig, DEFAULT_MAX_RPC_PARAM_LEN, LocalNodeConfig};
    use crate::cluster::directory::ServiceDirectory;
    use crate::cluster::node::NodeRoles;
    use crate::cluster::collaborators::{DiscoveryListener, PeerManager};
    use crate::discovery::protocol::{
        RpcEnvelope, RpcReply, RpcRequest, ServiceDiscoverReq, decode_frame, encode_frame,
    };
    use crate::discovery::types::{DiscoveryEvent, NodeDescriptor, NodeId};
    use crate::rpc::handlers::{RpcState, handle_rpc, handle_services, router};
    use crate::rpc::monitor::{probe_round, spawn_liveness_monitor};
    use crate::rpc::protocol::{
        ENDPOINT_HEALTH, ENDPOINT_REGISTRY, ENDPOINT_SERVICES, HealthResponse, RegistryResponse,
        url,
    };
    use crate::rpc::transport::{HttpTransport, LinkTransition, PROBE_FAILURE_LIMIT};

    use axum::Json;
    use axum::body::Bytes;
    use axum::extract::Extension;
    use axum::http::StatusCode;
    use std::sync::Arc;
    use std::time::Duration;

    fn id(value: &str) -> NodeId {
        NodeId::from(value)
    }

    fn descriptor(node_id: &str, addr: &str, services: &[&str]) -> NodeDescriptor {
        NodeDescriptor {
            node_id: id(node_id),
            listen_addr: addr.to_string(),
            public_service_list: services.iter().map(|s| s.to_string()).collect(),
            max_rpc_param_len: DEFAULT_MAX_RPC_PARAM_LEN,
            private: false,
            retire: false,
        }
    }

    fn config(local: &NodeDescriptor, masters: &[NodeDescriptor]) -> ClusterConfig {
        ClusterConfig {
            local: LocalNodeConfig {
                node_id: local.node_id.clone(),
                listen_addr: local.listen_addr.clone(),
                public_services: local.public_service_list.clone(),
                max_rpc_param_len: DEFAULT_MAX_RPC_PARAM_LEN,
                private: false,
                retire: false,
                discovery_policy: Vec::new(),
            },
            discovery_nodes: masters.to_vec(),
        }
    }

    fn worker_transport() -> Arc<HttpTransport> {
        let local = descriptor("A", "127.0.0.1:7101", &["Search"]);
        let master = descriptor("M", "127.0.0.1:7100", &["Master"]);
        HttpTransport::new(Arc::new(config(&local, &[master])))
    }

    fn generation_of(transport: &HttpTransport, node_id: &NodeId) -> Option<u64> {
        transport
            .probe_targets()
            .into_iter()
            .find(|(target, _, _)| target == node_id)
            .map(|(_, _, generation)| generation)
    }

    // ============================================================
    // LINK STATE TESTS
    // ============================================================

    #[test]
    fn test_first_healthy_probe_connects() {
        let transport = worker_transport();
        transport.upsert_peer(&descriptor("B", "127.0.0.1:7102", &["Storage"]));
        let generation = generation_of(&transport, &id("B")).unwrap();

        assert!(!transport.is_connected(&id("B")));
        assert_eq!(
            transport.record_probe(&id("B"), generation, true),
            Some(LinkTransition::Connected)
        );
        assert_eq!(transport.record_probe(&id("B"), generation, true), None);
        assert!(transport.is_connected(&id("B")));
    }

    #[test]
    fn test_link_goes_down_after_consecutive_failures() {
        let transport = worker_transport();
        transport.upsert_peer(&descriptor("B", "127.0.0.1:7102", &["Storage"]));
        let generation = generation_of(&transport, &id("B")).unwrap();
        transport.record_probe(&id("B"), generation, true);

        for _ in 1..PROBE_FAILURE_LIMIT {
            assert_eq!(transport.record_probe(&id("B"), generation, false), None);
        }
        // A success in between resets the count.
        transport.record_probe(&id("B"), generation, true);
        for _ in 1..PROBE_FAILURE_LIMIT {
            assert_eq!(transport.record_probe(&id("B"), generation, false), None);
        }

        assert_eq!(
            transport.record_probe(&id("B"), generation, false),
            Some(LinkTransition::Disconnected)
        );
        assert!(!transport.is_connected(&id("B")));
        assert_eq!(transport.record_probe(&id("B"), generation, false), None);
    }

    #[test]
    fn test_link_that_never_came_up_is_reported_down_once() {
        let transport = worker_transport();
        transport.upsert_peer(&descriptor("B", "127.0.0.1:7102", &["Storage"]));
        let generation = generation_of(&transport, &id("B")).unwrap();

        for _ in 1..PROBE_FAILURE_LIMIT {
            assert_eq!(transport.record_probe(&id("B"), generation, false), None);
        }
        assert_eq!(
            transport.record_probe(&id("B"), generation, false),
            Some(LinkTransition::Disconnected)
        );
        for _ in 0..10 {
            assert_eq!(transport.record_probe(&id("B"), generation, false), None);
        }

        // Coming up later is still reported.
        assert_eq!(
            transport.record_probe(&id("B"), generation, true),
            Some(LinkTransition::Connected)
        );
    }

    #[test]
    fn test_probe_result_for_replaced_link_is_ignored() {
        let transport = worker_transport();
        transport.upsert_peer(&descriptor("B", "127.0.0.1:7102", &["Storage"]));
        let stale = generation_of(&transport, &id("B")).unwrap();

        transport.remove_peer(&id("B"), true);
        transport.upsert_peer(&descriptor("B", "127.0.0.1:7102", &["Storage"]));
        let fresh = generation_of(&transport, &id("B")).unwrap();

        assert_ne!(stale, fresh);
        assert_eq!(transport.record_probe(&id("B"), stale, true), None);
        assert_eq!(
            transport.record_probe(&id("B"), fresh, true),
            Some(LinkTransition::Connected)
        );
    }

    // ============================================================
    // PEER TABLE TESTS
    // ============================================================

    #[test]
    fn test_upsert_with_same_address_keeps_link() {
        let transport = worker_transport();
        transport.upsert_peer(&descriptor("B", "127.0.0.1:7102", &["Storage"]));
        let first = generation_of(&transport, &id("B")).unwrap();

        transport.upsert_peer(&descriptor("B", "127.0.0.1:7102", &["Storage", "Index"]));
        assert_eq!(generation_of(&transport, &id("B")), Some(first));

        transport.upsert_peer(&descriptor("B", "127.0.0.1:7202", &["Storage"]));
        assert_ne!(generation_of(&transport, &id("B")), Some(first));
    }

    #[test]
    fn test_upsert_keeps_latest_retire_flag() {
        let transport = worker_transport();
        transport.upsert_peer(&descriptor("B", "127.0.0.1:7102", &["Storage"]));
        let generation = generation_of(&transport, &id("B"));

        let mut retired = descriptor("B", "127.0.0.1:7102", &["Storage"]);
        retired.retire = true;
        transport.upsert_peer(&retired);

        assert_eq!(generation_of(&transport, &id("B")), generation);
        assert_eq!(transport.peer_descriptor(&id("B")), Some(retired));
    }

    #[test]
    fn test_upsert_of_local_node_is_ignored() {
        let transport = worker_transport();

        transport.upsert_peer(&descriptor("A", "127.0.0.1:7101", &["Search"]));

        assert!(transport.probe_targets().is_empty());
    }

    #[test]
    fn test_discard_keeps_discovery_node_links() {
        let transport = worker_transport();
        transport.upsert_peer(&descriptor("M", "127.0.0.1:7100", &["Master"]));
        transport.upsert_peer(&descriptor("B", "127.0.0.1:7102", &["Storage"]));

        transport.discard_peer(&id("M"));
        transport.discard_peer(&id("B"));

        let targets: Vec<NodeId> = transport
            .probe_targets()
            .into_iter()
            .map(|(node_id, _, _)| node_id)
            .collect();
        assert_eq!(targets, vec![id("M")]);
    }

    // ============================================================
    // HANDLER TESTS
    // ============================================================

    fn master_state() -> RpcState {
        let local = descriptor("M", "127.0.0.1:7100", &["Master"]);
        let config = Arc::new(config(&local, &[local.clone()]));
        let transport = HttpTransport::new(config.clone());
        let directory = Arc::new(ServiceDirectory::new());
        let roles = NodeRoles::spawn(
            config.clone(),
            transport.clone(),
            transport.clone(),
            directory.clone(),
        );
        transport.attach(roles.clone());
        roles.start();

        RpcState {
            roles,
            directory,
            max_rpc_param_len: config.local.max_rpc_param_len,
        }
    }

    #[tokio::test]
    async fn test_rpc_handler_dispatches_registration() {
        // ARRANGE
        let state = master_state();
        let envelope = RpcEnvelope {
            from: id("A"),
            request: RpcRequest::RegServiceDiscover(ServiceDiscoverReq {
                node_info: Some(descriptor("A", "127.0.0.1:7101", &["Search"])),
            }),
        };
        let frame = encode_frame(&envelope, DEFAULT_MAX_RPC_PARAM_LEN).unwrap();

        // ACT
        let (status, body) = handle_rpc(Extension(state.clone()), Bytes::from(frame)).await;

        // ASSERT
        assert_eq!(status, StatusCode::OK);
        assert_eq!(decode_frame::<RpcReply>(&body).unwrap(), RpcReply::Ack);

        let registry = state.roles.master().unwrap().snapshot().await.unwrap();
        let ids: Vec<NodeId> = registry.into_iter().map(|d| d.node_id).collect();
        assert_eq!(ids, vec![id("M"), id("A")]);
    }

    #[tokio::test]
    async fn test_rpc_handler_reports_role_errors_in_reply() {
        let state = master_state();
        let envelope = RpcEnvelope {
            from: id("A"),
            request: RpcRequest::RegServiceDiscover(ServiceDiscoverReq { node_info: None }),
        };
        let frame = encode_frame(&envelope, DEFAULT_MAX_RPC_PARAM_LEN).unwrap();

        let (status, body) = handle_rpc(Extension(state), Bytes::from(frame)).await;

        assert_eq!(status, StatusCode::OK);
        match decode_frame::<RpcReply>(&body).unwrap() {
            RpcReply::Error(e) => assert!(e.contains("req is error")),
            RpcReply::Ack => panic!("registration without descriptor must fail"),
        }
    }

    #[tokio::test]
    async fn test_services_endpoint_reports_retired_nodes() {
        let state = master_state();
        state.directory.on_discovery_event(DiscoveryEvent::Discovered {
            node_id: id("B"),
            services: vec!["Storage".to_string()],
            retire: true,
        });

        let Json(response) = handle_services(Extension(state)).await;

        assert_eq!(response.nodes.len(), 1);
        assert_eq!(response.nodes[0].node_id, id("B"));
        assert!(response.nodes[0].retire);
    }

    #[tokio::test]
    async fn test_rpc_handler_rejects_garbage() {
        let state = master_state();

        let (status, _) =
            handle_rpc(Extension(state), Bytes::from_static(&[0xff, 0xff, 0xff])).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    // ============================================================
    // MONITOR TESTS
    // ============================================================

    /// Accepts connections and never answers, so every probe runs into its timeout.
    async fn silent_peer() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        addr
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_probe_round_probes_links_concurrently() {
        // ARRANGE
        let transport = worker_transport();
        for name in ["B", "C", "D", "E"] {
            let addr = silent_peer().await;
            transport.upsert_peer(&descriptor(name, &addr, &["Storage"]));
        }

        // ACT
        let started = std::time::Instant::now();
        probe_round(&transport).await;
        let elapsed = started.elapsed();

        // ASSERT: four 1s timeouts overlap instead of adding up
        assert!(elapsed < Duration::from_millis(2500), "probe round took {:?}", elapsed);
        for name in ["B", "C", "D", "E"] {
            assert!(!transport.is_connected(&id(name)));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_probe_round_connects_healthy_peer() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let peer = descriptor("B", &addr, &["Storage"]);
        serve_node(listener, config(&peer, &[])).await;

        let transport = worker_transport();
        transport.upsert_peer(&peer);
        probe_round(&transport).await;

        assert!(transport.is_connected(&id("B")));
    }

    // ============================================================
    // END TO END TESTS
    // ============================================================

    async fn serve_node(listener: tokio::net::TcpListener, config: ClusterConfig) -> NodeRoles {
        let config = Arc::new(config);
        let transport = HttpTransport::new(config.clone());
        let directory = Arc::new(ServiceDirectory::new());
        let roles = NodeRoles::spawn(
            config.clone(),
            transport.clone(),
            transport.clone(),
            directory.clone(),
        );
        transport.attach(roles.clone());

        let app = router(RpcState {
            roles: roles.clone(),
            directory,
            max_rpc_param_len: config.local.max_rpc_param_len,
        });
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        roles.start();
        spawn_liveness_monitor(transport);
        roles
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_worker_registers_with_master_over_http() {
        // ARRANGE
        let master_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let worker_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let master_addr = master_listener.local_addr().unwrap().to_string();
        let worker_addr = worker_listener.local_addr().unwrap().to_string();

        let master = descriptor("M", &master_addr, &["Master"]);
        let worker = descriptor("W", &worker_addr, &["Search"]);

        // ACT
        serve_node(master_listener, config(&master, &[master.clone()])).await;
        serve_node(worker_listener, config(&worker, &[master.clone()])).await;

        // ASSERT
        let client = reqwest::Client::new();

        let health: HealthResponse = client
            .get(url(&worker_addr, ENDPOINT_HEALTH))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health.node_id, id("W"));

        let mut registered = false;
        for _ in 0..50 {
            let registry: RegistryResponse = client
                .get(url(&master_addr, ENDPOINT_REGISTRY))
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            if registry.nodes.iter().any(|d| d.node_id == id("W")) {
                registered = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        assert!(registered, "worker never registered with master");

        let mut discovered = false;
        for _ in 0..50 {
            let services: serde_json::Value = client
                .get(url(&worker_addr, ENDPOINT_SERVICES))
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            if services["nodes"]
                .as_array()
                .is_some_and(|nodes| nodes.iter().any(|n| n["node_id"] == "M"))
            {
                discovered = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        assert!(discovered, "worker never received the master's snapshot");

        let status = client
            .get(url(&worker_addr, ENDPOINT_REGISTRY))
            .send()
            .await
            .unwrap()
            .status();
        assert_eq!(status, reqwest::StatusCode::NOT_FOUND);
    }
}
