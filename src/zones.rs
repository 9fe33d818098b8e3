//! Zone matching and FQDN helpers.
//!
//! Names are held as hickory [`LowerName`]s: case-folded and fully
//! qualified. Their `Display` form (`whoami.loc.`) is the registry key.
//! The root zone `.` contains every name.

use std::net::IpAddr;

use hickory_server::proto::rr::{LowerName, Name};

use crate::error::DiscoveryError;

/// Parse `name` as a fully-qualified, lower-cased domain name.
pub fn parse_name(name: &str) -> Result<LowerName, DiscoveryError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(DiscoveryError::NameRejected(name.to_string()));
    }
    let mut parsed = Name::from_ascii(trimmed)
        .map_err(|e| DiscoveryError::NameRejected(format!("{trimmed} ({e})")))?;
    parsed.set_fqdn(true);
    Ok(LowerName::from(parsed))
}

/// Whether `name` is under `in-addr.arpa.` or `ip6.arpa.`.
pub fn is_reverse(name: &LowerName) -> bool {
    Name::from(name.clone()).parse_arpa_name().is_ok()
}

/// Recover the address from a full-length reverse name, e.g.
/// `4.0.28.172.in-addr.arpa.` becomes `172.28.0.4`. Partial names such as
/// `0.28.172.in-addr.arpa.` name a network, not an address.
pub fn reverse_to_ip(name: &LowerName) -> Option<IpAddr> {
    let net = Name::from(name.clone()).parse_arpa_name().ok()?;
    (net.prefix_len() == net.max_prefix_len()).then(|| net.addr())
}

/// The authoritative zones this server answers for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zones {
    origins: Vec<LowerName>,
}

impl Zones {
    /// Parse and deduplicate `origins`. At least one of them must be a
    /// forward (non-reverse) zone.
    pub fn new<I, S>(origins: I) -> Result<Self, DiscoveryError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut parsed: Vec<LowerName> = Vec::new();
        for origin in origins {
            let zone = parse_name(origin.as_ref())
                .map_err(|e| DiscoveryError::Config(format!("invalid zone: {e}")))?;
            if !parsed.contains(&zone) {
                parsed.push(zone);
            }
        }
        if parsed.is_empty() {
            return Err(DiscoveryError::Config("no zones configured".into()));
        }
        if parsed.iter().all(is_reverse) {
            return Err(DiscoveryError::Config(
                "non-reverse zone name must be used".into(),
            ));
        }
        Ok(Self { origins: parsed })
    }

    /// The longest configured zone containing `name`.
    pub fn matches(&self, name: &LowerName) -> Option<&LowerName> {
        self.origins
            .iter()
            .filter(|zone| zone.zone_of(name))
            .max_by_key(|zone| zone.num_labels())
    }

    /// Parse `name` and require it to fall inside a zone.
    pub fn to_fqdn(&self, name: &str) -> Result<LowerName, DiscoveryError> {
        let fqdn = parse_name(name)?;
        if fqdn.is_root() || self.matches(&fqdn).is_none() {
            return Err(DiscoveryError::NameRejected(fqdn.to_string()));
        }
        Ok(fqdn)
    }

    /// `label` appended to every zone, e.g. `web` with zones `loc.` and
    /// `docker.` gives `web.loc.` and `web.docker.`.
    pub fn expand<'a>(&'a self, label: &'a str) -> impl Iterator<Item = String> + 'a {
        let label = label.trim_end_matches('.');
        self.origins.iter().map(move |zone| {
            if zone.is_root() {
                format!("{label}.")
            } else {
                format!("{label}.{zone}")
            }
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &LowerName> {
        self.origins.iter()
    }
}
