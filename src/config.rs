use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

use crate::error::DiscoveryError;
use crate::names::NameOptions;
use crate::parser::Eligibility;
use crate::responder::Fallthrough;
use crate::zones::Zones;

const ENV_PREFIX: &str = "DOCKERDNS_";
const MAX_TTL: u32 = 3600;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Authoritative zones, e.g. `["loc."]`.
    pub zones: Vec<String>,
    /// Docker endpoint; the local defaults when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    pub dns_bind: SocketAddr,
    pub by_domain: bool,
    pub by_hostname: bool,
    pub by_label: bool,
    pub by_compose_domain: bool,
    pub exposed_by_default: bool,
    /// Older spelling of `exposed_by_default`; wins when set.
    #[serde(default, skip_serializing)]
    pub enabled_by_default: Option<bool>,
    pub ttl: u32,
    /// Permitted networks; empty permits all.
    pub networks: Vec<String>,
    /// Older spelling of `networks`; wins when set.
    #[serde(default, skip_serializing)]
    pub from_networks: Option<Vec<String>>,
    pub no_reverse: bool,
    /// Zones to fall through on a miss; an empty list means all.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallthrough: Option<Vec<String>>,
    /// Reject containers without an IPv4 address.
    pub require_ipv4: bool,
    /// A host label publishes even containers labeled `enable=false`.
    pub host_label_overrides_disable: bool,
    /// Value of the identity label marking this server's own containers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    /// Detect swarm mode and publish services.
    pub swarm: bool,
    /// Forward out-of-zone questions to the system resolver.
    pub forward_upstream: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            zones: vec!["loc.".into()],
            endpoint: None,
            dns_bind: SocketAddr::from(([0, 0, 0, 0], 53)),
            by_domain: false,
            by_hostname: false,
            by_label: true,
            by_compose_domain: false,
            exposed_by_default: false,
            enabled_by_default: None,
            ttl: MAX_TTL,
            networks: Vec::new(),
            from_networks: None,
            no_reverse: false,
            fallthrough: None,
            require_ipv4: false,
            host_label_overrides_disable: false,
            identity: None,
            swarm: true,
            forward_upstream: true,
        }
    }
}

/// Docker network names: `^[A-Za-z0-9][A-Za-z0-9_.-]+$`.
pub fn valid_network_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphanumeric() => {}
        _ => return false,
    }
    let rest = chars.as_str();
    !rest.is_empty()
        && rest
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .collect()
}

impl Config {
    /// Defaults, then `dockerdns.toml`, then `dockerdns.json`, then the
    /// `DOCKERDNS_*` environment.
    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("dockerdns.toml"))
            .merge(Json::file("dockerdns.json"))
            .merge(Env::prefixed(ENV_PREFIX).ignore(&["networks", "from_networks"]))
    }

    pub fn load() -> anyhow::Result<Self> {
        Self::extract(Self::figment())
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))
    }

    pub fn extract(figment: Figment) -> Result<Self, DiscoveryError> {
        let mut config: Config = figment
            .extract()
            .map_err(|e| DiscoveryError::Config(e.to_string()))?;

        if let Some(enabled) = config.enabled_by_default.take() {
            config.exposed_by_default = enabled;
        }
        if let Some(networks) = config.from_networks.take() {
            config.networks = networks;
        }

        // A plain comma-separated list is easier to pass than a TOML array.
        // The current spelling is applied last so it wins.
        for key in ["FROM_NETWORKS", "NETWORKS"] {
            if let Ok(networks) = std::env::var(format!("{ENV_PREFIX}{key}")) {
                config.networks = split_list(&networks);
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), DiscoveryError> {
        if self.ttl > MAX_TTL {
            return Err(DiscoveryError::Config(format!(
                "ttl must be in range [0, {MAX_TTL}]: {}",
                self.ttl
            )));
        }
        if let Some(bad) = self.networks.iter().find(|n| !valid_network_name(n)) {
            return Err(DiscoveryError::Config(format!(
                "invalid network name: {bad}"
            )));
        }
        self.zones()?;
        Ok(())
    }

    pub fn zones(&self) -> Result<Zones, DiscoveryError> {
        Zones::new(&self.zones)
    }

    pub fn name_options(&self) -> NameOptions {
        NameOptions {
            by_domain: self.by_domain,
            by_hostname: self.by_hostname,
            by_compose_domain: self.by_compose_domain,
            by_label: self.by_label,
        }
    }

    pub fn eligibility(&self) -> Eligibility {
        Eligibility {
            exposed_by_default: self.exposed_by_default,
            host_label_overrides_disable: self.host_label_overrides_disable,
        }
    }

    pub fn fallthrough(&self) -> Fallthrough {
        Fallthrough::from_zones(self.fallthrough.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults() {
        Jail::expect_with(|_jail| {
            let config = Config::extract(Config::figment()).unwrap();
            assert_eq!(config.zones, vec!["loc."]);
            assert_eq!(config.ttl, 3600);
            assert!(config.by_label);
            assert!(!config.exposed_by_default);
            assert!(!config.no_reverse);
            assert_eq!(config.fallthrough(), Fallthrough::Off);
            Ok(())
        });
    }

    #[test]
    fn test_toml_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "dockerdns.toml",
                r#"
                zones = ["loc"]
                endpoint = "unix:///var/run/docker.sock"
                by_domain = true
                by_hostname = true
                by_compose_domain = true
                enabled_by_default = true
                ttl = 2400
                from_networks = ["dnsproxynet"]
                fallthrough = []
                "#,
            )?;
            let config = Config::extract(Config::figment()).unwrap();
            assert_eq!(
                config.endpoint.as_deref(),
                Some("unix:///var/run/docker.sock")
            );
            assert!(config.by_domain && config.by_hostname && config.by_compose_domain);
            assert!(config.exposed_by_default);
            assert_eq!(config.ttl, 2400);
            assert_eq!(config.networks, vec!["dnsproxynet"]);
            assert_eq!(config.fallthrough(), Fallthrough::All);
            let zones = config.zones().unwrap();
            let zones: Vec<String> = zones.iter().map(ToString::to_string).collect();
            assert_eq!(zones, vec!["loc."]);
            Ok(())
        });
    }

    #[test]
    fn test_env_wins() {
        Jail::expect_with(|jail| {
            jail.create_file("dockerdns.toml", "ttl = 2400\nexposed_by_default = false")?;
            jail.set_env("DOCKERDNS_TTL", "30");
            jail.set_env("DOCKERDNS_EXPOSED_BY_DEFAULT", "true");
            jail.set_env("DOCKERDNS_ENDPOINT", "tcp://10.0.0.1:2375");
            jail.set_env("DOCKERDNS_NETWORKS", "front, back");
            let config = Config::extract(Config::figment()).unwrap();
            assert_eq!(config.ttl, 30);
            assert!(config.exposed_by_default);
            assert_eq!(config.endpoint.as_deref(), Some("tcp://10.0.0.1:2375"));
            assert_eq!(config.networks, vec!["front", "back"]);
            Ok(())
        });
    }

    #[test]
    fn test_legacy_spellings() {
        Jail::expect_with(|jail| {
            jail.create_file("dockerdns.json", r#"{"from_networks": ["back"]}"#)?;
            jail.set_env("DOCKERDNS_ENABLED_BY_DEFAULT", "true");
            let config = Config::extract(Config::figment()).unwrap();
            assert!(config.exposed_by_default);
            assert_eq!(config.networks, vec!["back"]);
            Ok(())
        });
    }

    #[test]
    fn test_legacy_networks_env() {
        Jail::expect_with(|jail| {
            jail.create_file("dockerdns.toml", r#"networks = ["front"]"#)?;
            jail.set_env("DOCKERDNS_FROM_NETWORKS", "back,mgmt");
            let config = Config::extract(Config::figment()).unwrap();
            assert_eq!(config.networks, vec!["back", "mgmt"]);

            jail.set_env("DOCKERDNS_NETWORKS", "edge");
            let config = Config::extract(Config::figment()).unwrap();
            assert_eq!(config.networks, vec!["edge"]);
            Ok(())
        });
    }

    #[test]
    fn test_ttl_out_of_range() {
        Jail::expect_with(|jail| {
            jail.create_file("dockerdns.toml", "ttl = 3601")?;
            let err = Config::extract(Config::figment()).unwrap_err();
            assert!(matches!(err, DiscoveryError::Config(_)));
            Ok(())
        });
    }

    #[test]
    fn test_invalid_network_name() {
        Jail::expect_with(|jail| {
            jail.create_file("dockerdns.toml", r#"networks = ["-bad"]"#)?;
            assert!(Config::extract(Config::figment()).is_err());
            Ok(())
        });
    }

    #[test]
    fn test_reverse_only_zones() {
        Jail::expect_with(|jail| {
            jail.create_file("dockerdns.toml", r#"zones = ["28.172.in-addr.arpa"]"#)?;
            assert!(Config::extract(Config::figment()).is_err());
            Ok(())
        });
    }

    #[test]
    fn test_valid_network_name() {
        assert!(valid_network_name("dnsproxynet"));
        assert!(valid_network_name("my_stack.net-1"));
        assert!(!valid_network_name("a"));
        assert!(!valid_network_name("_net"));
        assert!(!valid_network_name("net work"));
        assert!(!valid_network_name(""));
    }
}
