//! Concurrent host name registry.
//!
//! Four sharded maps: host → IPv4 list, host → IPv6 list, literal address →
//! host list (reverse index) and id → record. The id index is the source of
//! truth; the other three are only ever touched through [`Registry::put`] and
//! [`Registry::remove`].
//!
//! Writers hold the id's entry in the id index for the whole operation, so
//! puts and removes of one id never interleave. Readers do not take that
//! lock: between two maps a lookup may see a record half-swapped (new A
//! entries, old AAAA entries) for the duration of one `put`.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::debug;

use crate::types::{short_id, ContainerData};

const SHARD_AMOUNT: usize = 32;
const INITIAL_CAPACITY: usize = 100;

fn sharded<K, V>() -> DashMap<K, V>
where
    K: Eq + std::hash::Hash,
{
    DashMap::with_capacity_and_shard_amount(INITIAL_CAPACITY, SHARD_AMOUNT)
}

pub struct Registry {
    name4: DashMap<String, Vec<Ipv4Addr>>,
    name6: DashMap<String, Vec<Ipv6Addr>>,
    /// Keyed by the canonical literal address, without zone id.
    addr: DashMap<String, Vec<String>>,
    ids: DashMap<String, Arc<ContainerData>>,
    auto_reverse: bool,
}

impl Registry {
    pub fn new(auto_reverse: bool) -> Self {
        Self {
            name4: sharded(),
            name6: sharded(),
            addr: sharded(),
            ids: sharded(),
            auto_reverse,
        }
    }

    /// Insert or replace the record for `record.id`.
    ///
    /// A record without addresses is never published; putting one removes
    /// whatever the id had before.
    pub fn put(&self, record: ContainerData) {
        if record.has_no_addresses() {
            self.remove(&record.id);
            return;
        }
        let record = Arc::new(record);
        match self.ids.entry(record.id.clone()) {
            Entry::Occupied(mut slot) => {
                let previous = slot.insert(Arc::clone(&record));
                self.drop_stale(&previous, &record);
                self.index(&record, Some(&previous));
            }
            Entry::Vacant(slot) => {
                let _slot = slot.insert(Arc::clone(&record));
                self.index(&record, None);
            }
        }
        debug!(
            "Registry put {} with {} hosts",
            short_id(&record.id),
            record.hosts.len()
        );
    }

    fn index(&self, record: &ContainerData, previous: Option<&ContainerData>) {
        for host in &record.hosts {
            if !record.ipv4.is_empty() {
                self.name4.insert(host.clone(), record.ipv4.clone());
            }
            if !record.ipv6.is_empty() {
                self.name6.insert(host.clone(), record.ipv6.clone());
            }
        }
        if self.auto_reverse {
            self.add_addrs(record, previous);
        }
    }

    /// Remove entries of `previous` that `next` no longer covers. Entries
    /// another record has since overwritten are left alone.
    fn drop_stale(&self, previous: &ContainerData, next: &ContainerData) {
        for host in &previous.hosts {
            let kept = next.hosts.contains(host);
            if !kept || next.ipv4.is_empty() {
                self.name4.remove_if(host, |_, ips| *ips == previous.ipv4);
            }
            if !kept || next.ipv6.is_empty() {
                self.name6.remove_if(host, |_, ips| *ips == previous.ipv6);
            }
        }
        if !self.auto_reverse {
            return;
        }
        let next_addrs: Vec<IpAddr> = next.addresses().collect();
        for ip in previous.addresses() {
            if !next_addrs.contains(&ip) {
                self.unlink_addr(&ip, &previous.hosts);
            }
        }
    }

    /// Take `hosts` off the reverse list of `ip`, dropping the list once
    /// it is empty.
    fn unlink_addr(&self, ip: &IpAddr, hosts: &[String]) {
        let key = ip.to_string();
        if let Some(mut names) = self.addr.get_mut(&key) {
            names.retain(|n| !hosts.contains(n));
        }
        self.addr.remove_if(&key, |_, names| names.is_empty());
    }

    /// Append the record's hosts to the reverse list of each of its
    /// addresses, first dropping names a previous version of it left there.
    fn add_addrs(&self, record: &ContainerData, previous: Option<&ContainerData>) {
        for ip in record.addresses() {
            let mut names = self.addr.entry(ip.to_string()).or_default();
            if let Some(previous) = previous {
                names.retain(|n| !previous.hosts.contains(n));
            }
            for host in &record.hosts {
                if !names.contains(host) {
                    names.push(host.clone());
                }
            }
        }
    }

    /// Remove everything `id` owns. Unknown ids are ignored.
    pub fn remove(&self, id: &str) -> Option<Arc<ContainerData>> {
        let Entry::Occupied(slot) = self.ids.entry(id.to_string()) else {
            return None;
        };
        let info = Arc::clone(slot.get());
        for host in &info.hosts {
            self.name4.remove_if(host, |_, ips| *ips == info.ipv4);
            self.name6.remove_if(host, |_, ips| *ips == info.ipv6);
        }
        if self.auto_reverse {
            for ip in info.addresses() {
                self.unlink_addr(&ip, &info.hosts);
            }
        }
        slot.remove();
        debug!("Registry removed {}", short_id(id));
        Some(info)
    }

    #[cfg(test)]
    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<Arc<ContainerData>> {
        self.ids.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn lookup_ipv4(&self, name: &str) -> Option<Vec<Ipv4Addr>> {
        self.name4.get(name).map(|entry| entry.value().clone())
    }

    pub fn lookup_ipv6(&self, name: &str) -> Option<Vec<Ipv6Addr>> {
        self.name6.get(name).map(|entry| entry.value().clone())
    }

    pub fn lookup_reverse(&self, ip: &IpAddr) -> Option<Vec<String>> {
        self.addr.get(&ip.to_string()).map(|entry| entry.value().clone())
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
