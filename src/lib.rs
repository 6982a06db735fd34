//! Dynamic Service Discovery Cluster Library
//!
//! This library crate implements the service-discovery protocol of a node
//! cluster. It serves as the foundation for the binary executable (`main.rs`).
//!
//! ## Architecture Modules
//! - **`discovery`**: The protocol core. Discovery masters keep a registry of
//!   registered nodes and push full and incremental updates; discovery clients
//!   register, filter, diff and reconcile those pushes into the local node.
//! - **`cluster`**: The runtime around the core: configuration, collaborator
//!   traits, the per-role actor mailbox, node role wiring and an in-process network.
//! - **`rpc`**: The HTTP transport. Bincode frames over axum/reqwest and
//!   `/health` probing that raises connect/disconnect events.

pub mod cluster;
pub mod discovery;
pub mod rpc;
