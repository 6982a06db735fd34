//! Dynamic Service Discovery
//!
//! Worker nodes announce the services they host to one or more discovery
//! masters (coordinators); the masters push that information to every
//! registered node, and each node keeps an eventually-consistent view of
//! which remote nodes and services exist, appear, disappear or retire.
//!
//! ## Roles
//! - **`master`**: owns the registry of registered nodes and fans out full
//!   snapshots (on connect) and incremental pushes (on register, retire, disconnect).
//! - **`client`**: registers the local node (retrying every 3s until it
//!   succeeds), filters and diffs incoming pushes, and forwards the net
//!   result to the local peer manager.
//!
//! Convergence comes from the full snapshot a node receives whenever it
//! (re)connects to a master. There is no leader election and no total order.

pub mod client;
pub mod master;
pub mod policy;
pub mod protocol;
pub mod types;
