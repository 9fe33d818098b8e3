//! Address extraction from container and service descriptors.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bollard::models::{ContainerInspectResponse, EndpointSettings};
use log::{debug, info};

use crate::error::DiscoveryError;
use crate::runtime::ContainerRuntime;
use crate::types::{short_id, ServiceDescriptor, NETWORK_LABEL};

/// How many `container:<id>` network modes we follow before giving up.
const MAX_NAMESPACE_DEPTH: usize = 4;

/// Which container networks may contribute addresses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkPolicy {
    allowed: Vec<String>,
}

impl NetworkPolicy {
    /// An empty list permits every network.
    pub fn new(allowed: Vec<String>) -> Self {
        Self { allowed }
    }

    pub fn allowed(&self) -> &[String] {
        &self.allowed
    }

    /// A network is permitted when no list is configured, when it is listed,
    /// or when it is the container's own network override.
    pub fn permits(&self, network: &str, labeled_network: Option<&str>) -> bool {
        self.allowed.is_empty()
            || labeled_network == Some(network)
            || self.allowed.iter().any(|n| n == network)
    }
}

/// IPv4 and IPv6 addresses in extraction order, without duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Addresses {
    pub ipv4: Vec<Ipv4Addr>,
    pub ipv6: Vec<Ipv6Addr>,
}

impl Addresses {
    pub fn is_empty(&self) -> bool {
        self.ipv4.is_empty() && self.ipv6.is_empty()
    }

    fn push(&mut self, ip: IpAddr) {
        match ip {
            IpAddr::V4(v4) if !self.ipv4.contains(&v4) => self.ipv4.push(v4),
            IpAddr::V6(v6) if !self.ipv6.contains(&v6) => self.ipv6.push(v6),
            _ => {}
        }
    }

    fn add_endpoint(&mut self, endpoint: &EndpointSettings) {
        for raw in [&endpoint.ip_address, &endpoint.global_ipv6_address]
            .into_iter()
            .flatten()
        {
            if let Some(ip) = parse_ip(raw) {
                self.push(ip);
            }
        }
    }
}

/// Parse a literal address, discarding any `%zone` suffix.
pub fn parse_ip(addr: &str) -> Option<IpAddr> {
    let addr = addr.split('%').next().unwrap_or_default();
    if addr.is_empty() {
        return None;
    }
    addr.parse().ok()
}

/// Parse the address part of `10.0.0.5/24`. A bare address is accepted too.
pub fn parse_cidr(cidr: &str) -> Option<IpAddr> {
    parse_ip(cidr.split('/').next().unwrap_or_default())
}

pub fn container_label<'a>(detail: &'a ContainerInspectResponse, key: &str) -> Option<&'a str> {
    detail
        .config
        .as_ref()
        .and_then(|c| c.labels.as_ref())
        .and_then(|labels| labels.get(key))
        .map(String::as_str)
        .filter(|v| !v.is_empty())
}

fn container_id(detail: &ContainerInspectResponse) -> &str {
    detail.id.as_deref().unwrap_or_default()
}

/// Id of the container whose network stack `detail` shares, if any.
fn shared_namespace(detail: &ContainerInspectResponse) -> Option<&str> {
    detail
        .host_config
        .as_ref()
        .and_then(|h| h.network_mode.as_deref())
        .and_then(|mode| mode.strip_prefix("container:"))
        .filter(|other| !other.is_empty())
}

/// Collect the permitted addresses of a container.
///
/// A container sharing another's network stack reports the addresses of
/// that container. The network override label, when present, is the only
/// network consulted. Fails with `NoPermittedNetwork` when no network was
/// usable; finding networks but no addresses on them is not an error here.
pub async fn extract_addresses(
    runtime: &dyn ContainerRuntime,
    detail: &ContainerInspectResponse,
    policy: &NetworkPolicy,
) -> Result<Addresses, DiscoveryError> {
    let id = container_id(detail).to_string();
    let labeled_network = container_label(detail, NETWORK_LABEL).map(str::to_string);

    let mut inherited: Option<ContainerInspectResponse> = None;
    let mut depth = 0;
    loop {
        let current = inherited.as_ref().unwrap_or(detail);
        let Some(other) = shared_namespace(current) else {
            break;
        };
        depth += 1;
        if depth > MAX_NAMESPACE_DEPTH {
            return Err(DiscoveryError::NamespaceDepth(short_id(&id).to_string()));
        }
        info!(
            "Container {} is in another container's network namespace ({})",
            short_id(container_id(current)),
            short_id(other)
        );
        let other = other.to_string();
        inherited = Some(runtime.inspect_container(&other).await?);
    }
    let current = inherited.as_ref().unwrap_or(detail);

    let networks = current
        .network_settings
        .as_ref()
        .and_then(|s| s.networks.as_ref());
    let mut addrs = Addresses::default();
    let mut found = false;

    if let Some(labeled) = labeled_network.as_deref() {
        info!("Network name {} specified ({})", labeled, short_id(&id));
        if let Some(endpoint) = networks.and_then(|n| n.get(labeled)) {
            addrs.add_endpoint(endpoint);
            found = true;
        }
    } else if let Some(networks) = networks {
        let mut names: Vec<&String> = networks.keys().collect();
        names.sort();
        for name in names {
            if !policy.permits(name, None) {
                continue;
            }
            debug!("Add network {} for container {}", name, short_id(&id));
            addrs.add_endpoint(&networks[name]);
            found = true;
        }
    }

    if !found {
        return Err(DiscoveryError::NoPermittedNetwork(short_id(&id).to_string()));
    }
    Ok(addrs)
}

/// Permitted network names of a container, sorted.
pub fn permitted_networks(
    detail: &ContainerInspectResponse,
    policy: &NetworkPolicy,
    labeled_network: Option<&str>,
) -> Vec<String> {
    crate::runtime::network_names(detail)
        .into_iter()
        .filter(|name| match labeled_network {
            Some(labeled) => name == labeled,
            None => policy.permits(name, None),
        })
        .collect()
}

/// Virtual IPs and task addresses of a service on permitted networks, plus
/// those networks.
pub fn service_addresses(
    service: &ServiceDescriptor,
    policy: &NetworkPolicy,
    labeled_network: Option<&str>,
) -> (Addresses, Vec<String>) {
    let mut addrs = Addresses::default();
    let mut networks: Vec<String> = Vec::new();
    for (network, cidr) in service.virtual_ips.iter().chain(&service.task_addresses) {
        let permitted = match labeled_network {
            Some(labeled) => network == labeled,
            None => policy.permits(network, None),
        };
        if !permitted {
            continue;
        }
        if !networks.contains(network) {
            networks.push(network.clone());
        }
        if let Some(ip) = parse_cidr(cidr) {
            addrs.push(ip);
        }
    }
    (addrs, networks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::mock::{ContainerBuilder, MockRuntime};

    #[test]
    fn test_parse_ip_strips_zone() {
        assert_eq!(parse_ip("fe80::1%eth0"), Some("fe80::1".parse().unwrap()));
        assert_eq!(parse_ip("172.28.0.4"), Some("172.28.0.4".parse().unwrap()));
        assert_eq!(parse_ip(""), None);
        assert_eq!(parse_ip("not-an-ip"), None);
        assert_eq!(parse_cidr("10.0.0.5/24"), Some("10.0.0.5".parse().unwrap()));
    }

    #[test]
    fn test_policy() {
        let open = NetworkPolicy::default();
        assert!(open.permits("anything", None));

        let policy = NetworkPolicy::new(vec!["front".into()]);
        assert!(policy.permits("front", None));
        assert!(!policy.permits("back", None));
        assert!(policy.permits("back", Some("back")));
    }

    #[tokio::test]
    async fn test_all_permitted_networks_contribute() {
        let (runtime, _tx) = MockRuntime::new();
        let detail = ContainerBuilder::new("aaaaaaaaaaaaaaaa", "web")
            .network("back", "10.0.1.2", "")
            .network("front", "10.0.0.2", "fd00::2")
            .network("mgmt", "10.0.9.2", "")
            .build();
        let policy = NetworkPolicy::new(vec!["front".into(), "back".into()]);

        let addrs = extract_addresses(&runtime, &detail, &policy).await.unwrap();
        assert_eq!(
            addrs.ipv4,
            vec![
                "10.0.1.2".parse::<Ipv4Addr>().unwrap(),
                "10.0.0.2".parse().unwrap()
            ]
        );
        assert_eq!(addrs.ipv6, vec!["fd00::2".parse::<Ipv6Addr>().unwrap()]);
    }

    #[tokio::test]
    async fn test_network_override_wins() {
        let (runtime, _tx) = MockRuntime::new();
        let detail = ContainerBuilder::new("aaaaaaaaaaaaaaaa", "web")
            .label(NETWORK_LABEL, "back")
            .network("back", "10.0.1.2", "")
            .network("front", "10.0.0.2", "")
            .build();
        let policy = NetworkPolicy::new(vec!["front".into()]);

        let addrs = extract_addresses(&runtime, &detail, &policy).await.unwrap();
        assert_eq!(addrs.ipv4, vec!["10.0.1.2".parse::<Ipv4Addr>().unwrap()]);
    }

    #[tokio::test]
    async fn test_no_permitted_network() {
        let (runtime, _tx) = MockRuntime::new();
        let detail = ContainerBuilder::new("aaaaaaaaaaaaaaaa", "web")
            .network("mgmt", "10.0.9.2", "")
            .build();
        let policy = NetworkPolicy::new(vec!["front".into()]);

        let err = extract_addresses(&runtime, &detail, &policy)
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::NoPermittedNetwork(_)));
    }

    #[tokio::test]
    async fn test_permitted_network_without_addresses_is_not_an_error() {
        let (runtime, _tx) = MockRuntime::new();
        let detail = ContainerBuilder::new("aaaaaaaaaaaaaaaa", "web")
            .network("front", "", "")
            .build();

        let addrs = extract_addresses(&runtime, &detail, &NetworkPolicy::default())
            .await
            .unwrap();
        assert!(addrs.is_empty());
    }

    #[tokio::test]
    async fn test_shared_namespace_is_followed() {
        let (runtime, _tx) = MockRuntime::new();
        runtime.insert(
            ContainerBuilder::new("bbbbbbbbbbbbbbbb", "app")
                .network("front", "10.0.0.7", "")
                .build(),
        );
        let sidecar = ContainerBuilder::new("cccccccccccccccc", "sidecar")
            .network_mode("container:bbbbbbbbbbbbbbbb")
            .build();

        let addrs = extract_addresses(&runtime, &sidecar, &NetworkPolicy::default())
            .await
            .unwrap();
        assert_eq!(addrs.ipv4, vec!["10.0.0.7".parse::<Ipv4Addr>().unwrap()]);
    }

    #[tokio::test]
    async fn test_namespace_cycle_is_bounded() {
        let (runtime, _tx) = MockRuntime::new();
        runtime.insert(
            ContainerBuilder::new("aaaaaaaaaaaaaaaa", "a")
                .network_mode("container:bbbbbbbbbbbbbbbb")
                .build(),
        );
        runtime.insert(
            ContainerBuilder::new("bbbbbbbbbbbbbbbb", "b")
                .network_mode("container:aaaaaaaaaaaaaaaa")
                .build(),
        );
        let detail = runtime.inspect_container("aaaaaaaaaaaaaaaa").await.unwrap();

        let err = extract_addresses(&runtime, &detail, &NetworkPolicy::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::NamespaceDepth(_)));
    }

    #[test]
    fn test_service_addresses_filtered() {
        let service = ServiceDescriptor {
            id: "svc".into(),
            name: "stack_api".into(),
            virtual_ips: vec![
                ("ingress".into(), "10.255.0.5/16".into()),
                ("stack_default".into(), "10.0.1.5/24".into()),
            ],
            ..Default::default()
        };
        let policy = NetworkPolicy::new(vec!["stack_default".into()]);

        let (addrs, networks) = service_addresses(&service, &policy, None);
        assert_eq!(addrs.ipv4, vec!["10.0.1.5".parse::<Ipv4Addr>().unwrap()]);
        assert_eq!(networks, vec!["stack_default".to_string()]);
    }
}
