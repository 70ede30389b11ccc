//! Fake-IP address pool
//!
//! Addresses are handed out from `network + 2` up to `broadcast - 1` (the
//! first host is reserved as the gateway) and recycled in order once the
//! range is exhausted, evicting the host that held the recycled address.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};

use ipnet::Ipv4Net;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Serializable allocation state, persisted across restarts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FakeIpState {
    pub range: Ipv4Net,
    pub cursor: u32,
    pub entries: Vec<FakeIpEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FakeIpEntry {
    pub host: String,
    pub ip: Ipv4Addr,
}

#[derive(Debug, Default)]
struct Allocations {
    cursor: u32,
    by_host: HashMap<String, Ipv4Addr>,
    by_ip: HashMap<Ipv4Addr, String>,
}

impl Allocations {
    fn insert(&mut self, host: String, ip: Ipv4Addr) {
        if let Some(evicted) = self.by_ip.insert(ip, host.clone()) {
            self.by_host.remove(&evicted);
        }
        self.by_host.insert(host, ip);
    }
}

#[derive(Debug)]
pub struct FakeIpPool {
    network: Ipv4Net,
    first: u32,
    size: u32,
    allocations: Mutex<Allocations>,
}

impl FakeIpPool {
    pub fn new(network: Ipv4Net) -> Result<Self> {
        let first = u32::from(network.network()).saturating_add(2);
        let last = u32::from(network.broadcast()).saturating_sub(1);
        if last < first {
            return Err(Error::ConfigParse(format!(
                "fake-ip range {} is too small",
                network
            )));
        }

        Ok(Self {
            network,
            first,
            size: last - first + 1,
            allocations: Mutex::new(Allocations::default()),
        })
    }

    pub fn ip_net(&self) -> Ipv4Net {
        self.network
    }

    pub fn gateway(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.first - 1)
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        match ip {
            IpAddr::V4(v4) => self.network.contains(&v4),
            IpAddr::V6(_) => false,
        }
    }

    /// Fake address for `host`, allocating one if needed.
    pub fn lookup(&self, host: &str) -> Ipv4Addr {
        let mut allocations = self.allocations.lock();
        if let Some(ip) = allocations.by_host.get(host) {
            return *ip;
        }

        let ip = Ipv4Addr::from(self.first + allocations.cursor);
        allocations.cursor = (allocations.cursor + 1) % self.size;
        allocations.insert(host.to_string(), ip);
        ip
    }

    pub fn lookup_back(&self, ip: IpAddr) -> Option<String> {
        match ip {
            IpAddr::V4(v4) => self.allocations.lock().by_ip.get(&v4).cloned(),
            IpAddr::V6(_) => None,
        }
    }

    /// Whether `ip` is currently allocated.
    pub fn exist(&self, ip: IpAddr) -> bool {
        self.lookup_back(ip).is_some()
    }

    pub fn len(&self) -> usize {
        self.allocations.lock().by_ip.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy allocations of `other` that fall inside this pool's range.
    ///
    /// `other` is only read. The cursor carries over when both pools cover
    /// the same range.
    pub fn copy_from(&self, other: &FakeIpPool) {
        let state = other.state();
        self.apply(&state);
    }

    pub fn state(&self) -> FakeIpState {
        let allocations = self.allocations.lock();
        let mut entries: Vec<FakeIpEntry> = allocations
            .by_ip
            .iter()
            .map(|(ip, host)| FakeIpEntry {
                host: host.clone(),
                ip: *ip,
            })
            .collect();
        entries.sort_by_key(|e| e.ip);

        FakeIpState {
            range: self.network,
            cursor: allocations.cursor,
            entries,
        }
    }

    /// Restore persisted state; returns the number of entries taken over.
    pub fn restore(&self, state: &FakeIpState) -> usize {
        self.apply(state)
    }

    fn apply(&self, state: &FakeIpState) -> usize {
        let mut allocations = self.allocations.lock();
        let mut restored = 0;
        for entry in &state.entries {
            let offset = u32::from(entry.ip).wrapping_sub(self.first);
            if offset < self.size {
                allocations.insert(entry.host.clone(), entry.ip);
                restored += 1;
            }
        }
        if state.range == self.network && state.cursor < self.size {
            allocations.cursor = state.cursor;
        }
        restored
    }
}
