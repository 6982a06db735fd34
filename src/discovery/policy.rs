use super::types::{MasterDiscoveryService, NodeId};

/// Decides whether `service` may be surfaced when pushed by `from_master`.
///
/// An empty policy table allows everything. Otherwise the first entry whose
/// coordinator id equals `from_master` (or is the wildcard) decides alone;
/// when no entry matches, the service is rejected.
pub fn can_discover_service(
    policy: &[MasterDiscoveryService],
    from_master: &NodeId,
    service: &str,
) -> bool {
    if policy.is_empty() {
        return true;
    }

    policy
        .iter()
        .find(|entry| match &entry.master_node_id {
            Some(master) => master == from_master,
            None => true,
        })
        .is_some_and(|entry| entry.discovery_services.iter().any(|s| s == service))
}

/// Keeps the services of `services` that pass [`can_discover_service`], in order.
pub fn filter_services(
    policy: &[MasterDiscoveryService],
    from_master: &NodeId,
    services: &[String],
) -> Vec<String> {
    services
        .iter()
        .filter(|service| can_discover_service(policy, from_master, service))
        .cloned()
        .collect()
}
