//! Turns runtime descriptors into [`ContainerData`] records.

use std::sync::Arc;

use bollard::models::ContainerInspectResponse;
use log::debug;

use crate::error::DiscoveryError;
use crate::extract::{
    container_label, extract_addresses, permitted_networks, service_addresses, Addresses,
    NetworkPolicy,
};
use crate::names::NameResolver;
use crate::runtime::ContainerRuntime;
use crate::types::{
    short_id, ContainerData, ServiceDescriptor, COMPOSE_PROJECT_LABEL, COMPOSE_SERVICE_LABEL,
    ENABLE_LABEL, HOST_LABEL, NETWORK_LABEL, STACK_NAMESPACE_LABEL,
};

/// Which records get published.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Eligibility {
    /// Publish containers without an enable label.
    pub exposed_by_default: bool,
    /// A host label publishes even a container labeled `enable=false`.
    pub host_label_overrides_disable: bool,
}

impl Eligibility {
    pub fn is_eligible(&self, c: &ContainerData) -> bool {
        if c.labeled_host.is_some() {
            return self.host_label_overrides_disable || !c.force_disabled;
        }
        (self.exposed_by_default || c.enabled) && !c.force_disabled
    }
}

/// Parsing policy shared by containers and services.
#[derive(Clone)]
pub struct ContainerParser {
    runtime: Arc<dyn ContainerRuntime>,
    policy: NetworkPolicy,
    names: NameResolver,
    eligibility: Eligibility,
    /// Reject records without IPv4 instead of accepting IPv6-only ones.
    require_ipv4: bool,
}

fn lookup<'a>(labels: impl Fn(&str) -> Option<&'a str>, key: &str) -> String {
    labels(key).unwrap_or_default().to_string()
}

/// Base record from labels: overrides, enable flag and compose identity.
fn record_from_labels<'a>(
    id: &str,
    label: impl Fn(&str) -> Option<&'a str>,
    by_label: bool,
) -> ContainerData {
    let enable = label(ENABLE_LABEL);
    ContainerData {
        id: id.to_string(),
        labeled_host: label(HOST_LABEL)
            .filter(|_| by_label)
            .map(str::to_string),
        labeled_network: label(NETWORK_LABEL).map(str::to_string),
        enabled: enable == Some("true"),
        force_disabled: enable == Some("false"),
        project: lookup(&label, COMPOSE_PROJECT_LABEL),
        service: lookup(&label, COMPOSE_SERVICE_LABEL),
        ..Default::default()
    }
}

impl ContainerParser {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        policy: NetworkPolicy,
        names: NameResolver,
        eligibility: Eligibility,
        require_ipv4: bool,
    ) -> Self {
        Self {
            runtime,
            policy,
            names,
            eligibility,
            require_ipv4,
        }
    }

    pub fn is_eligible(&self, c: &ContainerData) -> bool {
        self.eligibility.is_eligible(c)
    }

    /// Apply the address policy: strict mode needs IPv4, lenient mode
    /// accepts any family and treats "none at all" as nothing to publish.
    fn check_addresses(&self, id: &str, addrs: &Addresses) -> Result<(), DiscoveryError> {
        if self.require_ipv4 && addrs.ipv4.is_empty() {
            return Err(DiscoveryError::NoIpv4(short_id(id).to_string()));
        }
        Ok(())
    }

    /// Current permitted addresses of a container, under the address policy.
    pub async fn addresses(
        &self,
        detail: &ContainerInspectResponse,
    ) -> Result<Addresses, DiscoveryError> {
        let addrs = extract_addresses(self.runtime.as_ref(), detail, &self.policy).await?;
        self.check_addresses(detail.id.as_deref().unwrap_or_default(), &addrs)?;
        Ok(addrs)
    }

    /// Parse an inspected container.
    ///
    /// A record without any address comes back with empty `hosts` so that
    /// nothing gets published for it.
    pub async fn parse_container(
        &self,
        detail: &ContainerInspectResponse,
    ) -> Result<ContainerData, DiscoveryError> {
        let id = detail.id.as_deref().unwrap_or_default();
        let by_label = self.names.options().by_label;
        let mut c = record_from_labels(id, |key| container_label(detail, key), by_label);
        c.networks = permitted_networks(detail, &self.policy, c.labeled_network.as_deref());
        c.name = detail
            .name
            .as_deref()
            .unwrap_or_default()
            .trim_start_matches('/')
            .to_string();
        c.hostname = detail
            .config
            .as_ref()
            .and_then(|conf| conf.hostname.clone())
            .unwrap_or_default();

        let addrs = self.addresses(detail).await?;
        if addrs.is_empty() {
            debug!("Container {} has no addresses", short_id(id));
            return Ok(c);
        }
        c.ipv4 = addrs.ipv4;
        c.ipv6 = addrs.ipv6;
        c.hosts = self.names.resolve_hosts(&c);
        debug!(
            "Container {} has ipv4 {:?} ipv6 {:?} and hosts {:?}",
            short_id(id),
            c.ipv4,
            c.ipv6,
            c.hosts
        );
        Ok(c)
    }

    /// Parse a swarm service. The stack namespace is the project and the
    /// service name without its `<project>_` prefix is name and service.
    pub fn parse_service(
        &self,
        service: &ServiceDescriptor,
    ) -> Result<ContainerData, DiscoveryError> {
        let label = |key: &str| {
            service
                .labels
                .get(key)
                .map(String::as_str)
                .filter(|v| !v.is_empty())
        };
        let mut c = record_from_labels(&service.id, label, self.names.options().by_label);
        c.project = lookup(label, STACK_NAMESPACE_LABEL);
        let prefix = format!("{}_", c.project);
        c.name = match service.name.strip_prefix(&prefix) {
            Some(short) if !c.project.is_empty() && !short.is_empty() => short.to_string(),
            _ => service.name.clone(),
        };
        c.service = c.name.clone();

        let (addrs, networks) =
            service_addresses(service, &self.policy, c.labeled_network.as_deref());
        c.networks = networks;
        if c.networks.is_empty() {
            return Err(DiscoveryError::NoPermittedNetwork(
                short_id(&service.id).to_string(),
            ));
        }
        self.check_addresses(&service.id, &addrs)?;
        if addrs.is_empty() {
            return Ok(c);
        }
        c.ipv4 = addrs.ipv4;
        c.ipv6 = addrs.ipv6;
        c.hosts = self.names.resolve_hosts(&c);
        debug!(
            "Service {} ({}) has ipv4 {:?} and hosts {:?}",
            c.name,
            short_id(&c.id),
            c.ipv4,
            c.hosts
        );
        Ok(c)
    }
}
