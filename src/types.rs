//! Data structures used throughout the discovery daemon.
//!
//! [`ContainerData`] is the normalized record built for every container or
//! swarm service; the registry indexes it by id, hostname and address.
//! [`RuntimeEvent`] and [`ServiceDescriptor`] are the runtime-neutral shapes
//! the container runtime hands to the reconciler.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Explicit host name override.
pub const HOST_LABEL: &str = "dockerdns.host";
/// Explicit network override: only this network contributes addresses.
pub const NETWORK_LABEL: &str = "dockerdns.network";
/// `"true"` opts a container in, `"false"` forces it out.
pub const ENABLE_LABEL: &str = "dockerdns.enable";
/// Marks the containers whose networks the daemon itself serves.
pub const IDENTITY_LABEL: &str = "dockerdns.identity";
pub const COMPOSE_PROJECT_LABEL: &str = "com.docker.compose.project";
pub const COMPOSE_SERVICE_LABEL: &str = "com.docker.compose.service";
pub const STACK_NAMESPACE_LABEL: &str = "com.docker.stack.namespace";
/// Set by swarm on every task container.
pub const SWARM_SERVICE_ID_LABEL: &str = "com.docker.swarm.service.id";

/// Normalized discovery record of one container or service.
///
/// Handed to the registry by value on insert and never mutated afterwards;
/// network updates build a fresh copy under the same `id`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerData {
    pub id: String,
    /// Container name without the leading `/`.
    pub name: String,
    pub hostname: String,
    pub labeled_host: Option<String>,
    pub labeled_network: Option<String>,
    pub project: String,
    pub service: String,
    /// Permitted networks the container is attached to.
    pub networks: Vec<String>,
    pub enabled: bool,
    pub force_disabled: bool,
    pub ipv4: Vec<Ipv4Addr>,
    pub ipv6: Vec<Ipv6Addr>,
    /// Fully-qualified names (trailing dot) this record answers to.
    pub hosts: Vec<String>,
}

impl ContainerData {
    /// Both address families are empty.
    pub fn has_no_addresses(&self) -> bool {
        self.ipv4.is_empty() && self.ipv6.is_empty()
    }

    /// Every address of the record, IPv4 first, in stored order.
    pub fn addresses(&self) -> impl Iterator<Item = IpAddr> + '_ {
        self.ipv4
            .iter()
            .map(|ip| IpAddr::V4(*ip))
            .chain(self.ipv6.iter().map(|ip| IpAddr::V6(*ip)))
    }
}

/// A swarm service, reduced to what discovery needs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub id: String,
    /// Full service name, including any stack prefix.
    pub name: String,
    pub labels: HashMap<String, String>,
    /// `(network name, CIDR address)` of every virtual IP.
    pub virtual_ips: Vec<(String, String)>,
    /// `(network name, address)` of every running task attachment.
    pub task_addresses: Vec<(String, String)>,
}

/// A lifecycle event from the runtime's event stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeEvent {
    /// Object type, e.g. `container`, `network`, `service`.
    pub kind: String,
    /// Action, e.g. `start`, `die`, `connect`.
    pub action: String,
    pub actor_id: String,
    pub attributes: HashMap<String, String>,
}

/// First 12 characters of a runtime id, for logging.
pub fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}
