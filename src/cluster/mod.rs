//! Cluster Runtime
//!
//! Everything the discovery roles rely on but do not implement themselves.
//!
//! ## Submodules
//! - **`config`**: the local node and the configured discovery masters.
//! - **`collaborators`**: `Transport`, `PeerManager` and `DiscoveryListener`,
//!   the seams through which roles reach the outside world.
//! - **`mailbox`**: the sequential actor each role runs as.
//! - **`node`**: spawns a node's roles and routes events and RPCs to them.
//! - **`directory`**: the local view of discovered services.
//! - **`local`**: an in-process network of nodes, for embedding and tests.

pub mod collaborators;
pub mod config;
pub mod directory;
pub mod local;
pub mod mailbox;
pub mod node;
