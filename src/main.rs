use discovery_cluster::cluster::config::ClusterConfig;
use discovery_cluster::cluster::directory::ServiceDirectory;
use discovery_cluster::cluster::node::NodeRoles;
use discovery_cluster::discovery::types::NodeId;
use discovery_cluster::rpc::handlers::{RpcState, router};
use discovery_cluster::rpc::monitor::spawn_liveness_monitor;
use discovery_cluster::rpc::transport::HttpTransport;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        // .with_max_level(tracing::Level::DEBUG)
        .with_max_level(tracing::Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 3 {
        eprintln!(
            "Usage: {} --config <file> [--bind <addr:port>] [--node-id <id>]",
            args[0]
        );
        eprintln!("Example: {} --config master.json", args[0]);
        eprintln!(
            "Example: {} --config worker.json --bind 127.0.0.1:7002 --node-id worker-2",
            args[0]
        );

        std::process::exit(1);
    }

    let mut config_path: Option<String> = None;
    let mut bind_addr: Option<String> = None;
    let mut node_id: Option<String> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                config_path = args.get(i + 1).cloned();
                i += 2;
            }
            "--bind" => {
                bind_addr = args.get(i + 1).cloned();
                i += 2;
            }
            "--node-id" => {
                node_id = args.get(i + 1).cloned();
                i += 2;
            }
            _ => {
                i += 1;
            }
        }
    }

    let Some(config_path) = config_path else {
        anyhow::bail!("--config is required");
    };

    let mut config = ClusterConfig::from_file(&config_path)?;
    if let Some(bind_addr) = bind_addr {
        config.local.listen_addr = bind_addr;
    }
    if let Some(node_id) = node_id {
        config.local.node_id = NodeId(node_id);
    }
    if config.local.node_id.is_empty() {
        config.local.node_id = NodeId::generate();
    }
    config.validate()?;

    let config = Arc::new(config);
    tracing::info!(
        "Starting node {} on {}",
        config.local.node_id,
        config.local.listen_addr
    );
    tracing::info!(
        "Discovery masters: {:?}",
        config
            .discovery_nodes()
            .iter()
            .map(|node| node.node_id.as_str())
            .collect::<Vec<_>>()
    );
    if config.is_master_discovery_node() {
        tracing::info!("This node is a discovery master");
    }

    // 1. Transport and local service view:
    let transport = HttpTransport::new(config.clone());
    let directory = Arc::new(ServiceDirectory::new());

    // 2. Discovery roles:
    let roles = NodeRoles::spawn(
        config.clone(),
        transport.clone(),
        transport.clone(),
        directory.clone(),
    );
    transport.attach(roles.clone());

    // 3. HTTP server:
    let app = router(RpcState {
        roles: roles.clone(),
        directory,
        max_rpc_param_len: config.local.max_rpc_param_len,
    });
    let listener = tokio::net::TcpListener::bind(&config.local.listen_addr).await?;
    tracing::info!("HTTP server listening on {}", config.local.listen_addr);

    // 4. Start roles and link probing:
    roles.start();
    let _monitor = spawn_liveness_monitor(transport.clone());

    tracing::info!("Press Ctrl+C to shutdown");
    axum::serve(listener, app).await?;

    Ok(())
}
