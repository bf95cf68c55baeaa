use std::collections::BTreeMap;
use std::net::Ipv4Addr;

/// First hop and accumulated cost toward a destination router.
#[derive(Debug, Clone, PartialEq)]
pub struct PathInfo {
    pub first_hop: String,
    pub cost: f64,
}

/// Destination router id -> forwarding choice. Only reachable
/// destinations with a finite-cost path appear.
pub type RoutingTable = BTreeMap<String, PathInfo>;

/// Target state for one kernel route: the prefix maps to this next hop,
/// optionally pinned to an outbound interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredRoute {
    pub next_hop: Ipv4Addr,
    pub interface: Option<String>,
}
