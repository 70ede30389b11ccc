//! Fake-IP issuing and IP-to-host mapping

use std::collections::HashMap;
use std::net::IpAddr;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::pool::{FakeIpPool, FakeIpState};
use super::{DnsConfig, EnhancedMode};

#[derive(Debug)]
pub struct Enhancer {
    mode: EnhancedMode,
    pool: Option<FakeIpPool>,
    mapping: Option<Mutex<HashMap<IpAddr, String>>>,
}

impl Enhancer {
    pub fn new(config: &DnsConfig) -> Self {
        let mut pool = None;
        let mut mapping = None;

        match config.enhanced_mode {
            EnhancedMode::FakeIp => {
                if let Some(range) = config.fake_ip_range {
                    match FakeIpPool::new(range) {
                        Ok(p) => pool = Some(p),
                        Err(e) => warn!("[DNS] fake-ip pool disabled: {}", e),
                    }
                }
                mapping = Some(Mutex::new(HashMap::new()));
            }
            EnhancedMode::Mapping => mapping = Some(Mutex::new(HashMap::new())),
            EnhancedMode::Normal => {}
        }

        Self {
            mode: config.enhanced_mode,
            pool,
            mapping,
        }
    }

    pub fn mode(&self) -> EnhancedMode {
        self.mode
    }

    pub fn fake_ip_enabled(&self) -> bool {
        self.mode == EnhancedMode::FakeIp
    }

    pub fn mapping_enabled(&self) -> bool {
        self.mapping.is_some()
    }

    pub fn pool(&self) -> Option<&FakeIpPool> {
        self.pool.as_ref()
    }

    pub fn is_fake_ip(&self, ip: IpAddr) -> bool {
        self.pool.as_ref().map(|p| p.exist(ip)).unwrap_or(false)
    }

    pub fn is_fake_broadcast_ip(&self, ip: IpAddr) -> bool {
        match (ip, &self.pool) {
            (IpAddr::V4(v4), Some(pool)) => pool.ip_net().broadcast() == v4,
            _ => false,
        }
    }

    /// Record a real answer for redir-host style reverse lookups.
    pub fn insert_mapping(&self, ip: IpAddr, host: impl Into<String>) {
        if let Some(mapping) = &self.mapping {
            mapping.lock().insert(ip, host.into());
        }
    }

    pub fn find_host_by_ip(&self, ip: IpAddr) -> Option<String> {
        if let Some(host) = self.pool.as_ref().and_then(|p| p.lookup_back(ip)) {
            return Some(host);
        }
        self.mapping
            .as_ref()
            .and_then(|m| m.lock().get(&ip).cloned())
    }

    /// Take over what `old` learned: host mappings and fake-IP allocations.
    ///
    /// `old` is read, never modified; it may still be serving lookups.
    pub fn patch_from(&self, old: &Enhancer) {
        if let (Some(mapping), Some(old_mapping)) = (&self.mapping, &old.mapping) {
            let learned = old_mapping.lock().clone();
            debug!("[DNS] carried over {} host mappings", learned.len());
            mapping.lock().extend(learned);
        }

        if let (Some(pool), Some(old_pool)) = (&self.pool, &old.pool) {
            pool.copy_from(old_pool);
        }
    }

    pub fn fake_pool_state(&self) -> Option<FakeIpState> {
        self.pool.as_ref().map(FakeIpPool::state)
    }

    pub fn restore_fake_pool_state(&self, state: &FakeIpState) -> usize {
        self.pool.as_ref().map(|p| p.restore(state)).unwrap_or(0)
    }
}
