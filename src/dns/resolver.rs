use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use tracing::trace;

use crate::error::{Error, Result};

use super::{DnsConfig, Enhancer};

/// Upstream resolution settings plus static host entries
#[derive(Debug)]
pub struct Resolver {
    main: Vec<String>,
    fallback: Vec<String>,
    ipv6: bool,
    hosts: HashMap<String, IpAddr>,
}

impl Resolver {
    pub fn new(config: &DnsConfig) -> Self {
        Self {
            main: config.nameserver.clone(),
            fallback: config.fallback.clone(),
            ipv6: config.ipv6,
            hosts: config.hosts.clone(),
        }
    }

    pub fn nameservers(&self) -> &[String] {
        &self.main
    }

    pub fn fallback(&self) -> &[String] {
        &self.fallback
    }

    pub fn ipv6(&self) -> bool {
        self.ipv6
    }

    /// Resolve `host`, consulting static entries before the system resolver.
    pub async fn resolve_ip(&self, host: &str, disable_ipv6: bool) -> Result<Vec<IpAddr>> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(vec![ip]);
        }
        if let Some(ip) = self.hosts.get(host) {
            return Ok(vec![*ip]);
        }

        let allow_v6 = self.ipv6 && !disable_ipv6;
        let ips: Vec<IpAddr> = tokio::net::lookup_host((host, 0))
            .await?
            .map(|addr| addr.ip())
            .filter(|ip| allow_v6 || ip.is_ipv4())
            .collect();
        trace!("[DNS] {} -> {:?}", host, ips);

        if ips.is_empty() {
            return Err(Error::Dns(format!("no address for {}", host)));
        }
        Ok(ips)
    }
}

/// In-process resolution entry point pairing a resolver with its enhancer
#[derive(Debug, Clone)]
pub struct LocalServer {
    resolver: Arc<Resolver>,
    enhancer: Arc<Enhancer>,
}

impl LocalServer {
    pub fn new(resolver: Arc<Resolver>, enhancer: Arc<Enhancer>) -> Self {
        Self { resolver, enhancer }
    }

    pub fn resolver(&self) -> &Arc<Resolver> {
        &self.resolver
    }

    pub fn enhancer(&self) -> &Arc<Enhancer> {
        &self.enhancer
    }

    /// Answer an A query: a fake address in fake-ip mode, a real one otherwise.
    pub async fn resolve(&self, host: &str) -> Result<IpAddr> {
        if let Some(pool) = self.enhancer.pool() {
            return Ok(IpAddr::V4(pool.lookup(host)));
        }

        let ips = self.resolver.resolve_ip(host, true).await?;
        let ip = ips
            .first()
            .copied()
            .ok_or_else(|| Error::Dns(format!("no address for {}", host)))?;
        self.enhancer.insert_mapping(ip, host);
        Ok(ip)
    }
}
