//! HTTP Transport Module
//!
//! Carries discovery RPCs between processes.
//!
//! ## Submodules
//! - **`transport`**: `HttpTransport`, the outbound side (reqwest) and the peer link table.
//! - **`handlers`**: the axum router serving `/rpc` plus operational endpoints.
//! - **`monitor`**: periodic `/health` probes that raise connect/disconnect events.
//! - **`protocol`**: endpoint paths and JSON response bodies.

pub mod handlers;
pub mod monitor;
pub mod protocol;
pub mod transport;

#[cfg(test)]
mod tests;
