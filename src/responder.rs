//! Maps DNS questions to registry lookups.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use hickory_server::proto::rr::{LowerName, RecordType};
use log::{debug, warn};

use crate::registry::Registry;
use crate::zones::{self, Zones};

/// Zones for which a negative answer is handed on instead of returned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Fallthrough {
    #[default]
    Off,
    /// Every name falls through.
    All,
    Zones(Vec<LowerName>),
}

impl Fallthrough {
    /// `None` disables fallthrough, an empty list enables it for all names.
    pub fn from_zones(origins: Option<&[String]>) -> Self {
        match origins {
            None => Fallthrough::Off,
            Some([]) => Fallthrough::All,
            Some(list) => Fallthrough::Zones(
                list.iter()
                    .filter_map(|z| match zones::parse_name(z) {
                        Ok(zone) => Some(zone),
                        Err(e) => {
                            warn!("Ignoring fallthrough zone: {}", e);
                            None
                        }
                    })
                    .collect(),
            ),
        }
    }

    pub fn through(&self, qname: &LowerName) -> bool {
        match self {
            Fallthrough::Off => false,
            Fallthrough::All => true,
            Fallthrough::Zones(list) => list.iter().any(|zone| zone.zone_of(qname)),
        }
    }
}

/// The records found for a question, in stored order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    A(Vec<Ipv4Addr>),
    Aaaa(Vec<Ipv6Addr>),
    Ptr(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Answer(Answer),
    /// Nothing to answer with; the transport turns this into a failure.
    NoAnswer,
    /// Hand the question to the next handler.
    PassThrough,
}

pub struct Responder {
    zones: Zones,
    registry: Arc<Registry>,
    fallthrough: Fallthrough,
}

impl Responder {
    pub fn new(zones: Zones, registry: Arc<Registry>, fallthrough: Fallthrough) -> Self {
        Self {
            zones,
            registry,
            fallthrough,
        }
    }

    pub fn resolve(&self, qname: &LowerName, qtype: RecordType) -> Resolution {
        debug!("Requested qname: {} ({})", qname, qtype);

        let in_zone = self.zones.matches(qname).is_some();
        let reverse = qtype == RecordType::PTR && zones::is_reverse(qname);
        if !in_zone && !reverse {
            return Resolution::PassThrough;
        }

        let key = qname.to_string();
        let answer = match qtype {
            RecordType::A => self.registry.lookup_ipv4(&key).map(Answer::A),
            RecordType::AAAA => self.registry.lookup_ipv6(&key).map(Answer::Aaaa),
            RecordType::PTR => match zones::reverse_to_ip(qname) {
                Some(ip) => match self.registry.lookup_reverse(&ip) {
                    Some(names) => Some(Answer::Ptr(names)),
                    None => return Resolution::PassThrough,
                },
                None => None,
            },
            _ => None,
        };

        match answer {
            Some(answer) => {
                debug!("Found records for qname: {}", qname);
                Resolution::Answer(answer)
            }
            None if self.fallthrough.through(qname) => Resolution::PassThrough,
            None => Resolution::NoAnswer,
        }
    }
}
