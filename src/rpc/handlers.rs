use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Extension},
    http::StatusCode,
    routing::{get, post},
};
use std::sync::Arc;

use super::protocol::{
    ENDPOINT_HEALTH, ENDPOINT_REGISTRY, ENDPOINT_RETIRE, ENDPOINT_RPC, ENDPOINT_SERVICES,
    HealthResponse, RegistryResponse, RetireResponse, ServicesResponse,
};
use crate::cluster::directory::ServiceDirectory;
use crate::cluster::node::NodeRoles;
use crate::discovery::protocol::{RpcEnvelope, RpcReply, decode_frame, encode_frame};

#[derive(Clone)]
pub struct RpcState {
    pub roles: NodeRoles,
    pub directory: Arc<ServiceDirectory>,
    pub max_rpc_param_len: u32,
}

pub fn router(state: RpcState) -> Router {
    let body_limit = state.max_rpc_param_len as usize;

    Router::new()
        .route(ENDPOINT_RPC, post(handle_rpc))
        .route(ENDPOINT_HEALTH, get(handle_health))
        .route(ENDPOINT_SERVICES, get(handle_services))
        .route(ENDPOINT_REGISTRY, get(handle_registry))
        .route(ENDPOINT_RETIRE, post(handle_retire))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(Extension(state))
}

pub async fn handle_rpc(
    Extension(state): Extension<RpcState>,
    body: Bytes,
) -> (StatusCode, Vec<u8>) {
    let envelope: RpcEnvelope = match decode_frame(&body) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::error!("Failed to decode rpc frame: {}", e);
            return (StatusCode::BAD_REQUEST, Vec::new());
        }
    };

    tracing::debug!(
        "Received {} from {}",
        envelope.request.method(),
        envelope.from
    );

    let reply = state.roles.call(envelope.request).await;
    if let RpcReply::Error(e) = &reply {
        tracing::warn!("Request from {} failed: {}", envelope.from, e);
    }

    match encode_frame(&reply, state.max_rpc_param_len) {
        Ok(frame) => (StatusCode::OK, frame),
        Err(e) => {
            tracing::error!("Failed to encode rpc reply: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, Vec::new())
        }
    }
}

pub async fn handle_health(Extension(state): Extension<RpcState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        node_id: state.roles.node_id().clone(),
        status: "ok".to_string(),
    })
}

pub async fn handle_services(Extension(state): Extension<RpcState>) -> Json<ServicesResponse> {
    Json(ServicesResponse {
        nodes: state.directory.snapshot(),
    })
}

pub async fn handle_registry(
    Extension(state): Extension<RpcState>,
) -> (StatusCode, Json<RegistryResponse>) {
    let Some(master) = state.roles.master() else {
        return (
            StatusCode::NOT_FOUND,
            Json(RegistryResponse { nodes: Vec::new() }),
        );
    };

    match master.snapshot().await {
        Ok(nodes) => (StatusCode::OK, Json(RegistryResponse { nodes })),
        Err(e) => {
            tracing::error!("Failed to read registry: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(RegistryResponse { nodes: Vec::new() }),
            )
        }
    }
}

pub async fn handle_retire(
    Extension(state): Extension<RpcState>,
) -> (StatusCode, Json<RetireResponse>) {
    state.roles.retire();

    (
        StatusCode::ACCEPTED,
        Json(RetireResponse {
            node_id: state.roles.node_id().clone(),
            retire: true,
        }),
    )
}
