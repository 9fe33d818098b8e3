//! Host name derivation.
//!
//! Bare candidates come from the container name, its hostname and the
//! compose `service.project` pair, each behind its own toggle. Every
//! candidate is expanded against all zones. The host label is merged in
//! last, independently of the toggles.

use log::{debug, warn};

use crate::error::DiscoveryError;
use crate::types::ContainerData;
use crate::zones::Zones;

/// Which fields of a container become host names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NameOptions {
    pub by_domain: bool,
    pub by_hostname: bool,
    pub by_compose_domain: bool,
    /// Honour the host override label.
    pub by_label: bool,
}

impl Default for NameOptions {
    fn default() -> Self {
        Self {
            by_domain: false,
            by_hostname: false,
            by_compose_domain: false,
            by_label: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NameResolver {
    zones: Zones,
    opts: NameOptions,
}

impl NameResolver {
    pub fn new(zones: Zones, opts: NameOptions) -> Self {
        Self { zones, opts }
    }

    pub fn options(&self) -> NameOptions {
        self.opts
    }

    /// Bare names enabled by the options, in priority order.
    pub fn candidates(&self, c: &ContainerData) -> Vec<String> {
        let mut domains = Vec::new();
        if self.opts.by_domain && !c.name.is_empty() {
            domains.push(c.name.clone());
        }
        if self.opts.by_hostname && !c.hostname.is_empty() {
            domains.push(c.hostname.clone());
        }
        if self.opts.by_compose_domain && !c.service.is_empty() && !c.project.is_empty() {
            domains.push(format!("{}.{}", c.service, c.project));
        }
        domains
    }

    /// Expand every candidate against every zone. Names that end up
    /// outside the zones are dropped.
    pub fn make_fqdns(&self, domains: &[String]) -> Vec<String> {
        let mut hosts: Vec<String> = Vec::with_capacity(domains.len());
        for domain in domains {
            for name in self.zones.expand(domain) {
                match self.zones.to_fqdn(&name) {
                    Ok(fqdn) => {
                        let fqdn = fqdn.to_string();
                        if !hosts.contains(&fqdn) {
                            hosts.push(fqdn);
                        }
                    }
                    Err(e) => warn!("Dropping host name: {}", e),
                }
            }
        }
        hosts
    }

    /// Normalize an explicit host name. A name already inside a zone is
    /// kept as is, otherwise it is expanded against the zones.
    pub fn labeled_fqdns(&self, name: &str) -> Result<Vec<String>, DiscoveryError> {
        if name.trim_end_matches('.').is_empty() {
            return Err(DiscoveryError::NameRejected(name.to_string()));
        }
        if let Ok(fqdn) = self.zones.to_fqdn(name) {
            return Ok(vec![fqdn.to_string()]);
        }
        let expanded = self.make_fqdns(&[name.to_string()]);
        if expanded.is_empty() {
            return Err(DiscoveryError::NameRejected(name.to_string()));
        }
        Ok(expanded)
    }

    /// The full host list of `c`: enabled candidates, then the host label.
    pub fn resolve_hosts(&self, c: &ContainerData) -> Vec<String> {
        let mut hosts = self.make_fqdns(&self.candidates(c));
        if !self.opts.by_label {
            return hosts;
        }
        if let Some(labeled) = c.labeled_host.as_deref() {
            debug!("Labeled host: {}", labeled);
            match self.labeled_fqdns(labeled) {
                Ok(names) => {
                    for name in names {
                        if !hosts.contains(&name) {
                            hosts.push(name);
                        }
                    }
                }
                Err(e) => warn!("Ignoring host label of {}: {}", c.name, e),
            }
        }
        hosts
    }
}
