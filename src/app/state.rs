//! The live policy snapshot handle
//!
//! [`LiveState`] is owned by the reconciler and shared with connection
//! handling through an `Arc`. Fields are swapped one at a time; there is no
//! cross-field atomicity across a reconfiguration.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::{ArcSwap, ArcSwapOption};
use async_trait::async_trait;
use tracing::{info, warn};

use crate::adapter::{Conn, Connection};
use crate::auth::Authenticator;
use crate::common::{Metadata, Result};
use crate::dialer::{Dialer, HostResolver};
use crate::dns::{Enhancer, LocalServer, Resolver};
use crate::error::Error;
use crate::listener::Tun;
use crate::rules::RuleMatcher;

use super::metrics::{OUTBOUND_DIALS_TOTAL, OUTBOUND_DIAL_FAILURES};
use super::tunnel::Tunnel;

/// Published resolver objects and resolution toggles
pub struct ResolverState {
    resolver: ArcSwapOption<Resolver>,
    enhancer: ArcSwapOption<Enhancer>,
    local_server: ArcSwapOption<LocalServer>,
    hosts: ArcSwap<HashMap<String, IpAddr>>,
    disable_ipv6: AtomicBool,
    remote_dns_resolve: AtomicBool,
}

impl ResolverState {
    pub fn new() -> Self {
        Self {
            resolver: ArcSwapOption::empty(),
            enhancer: ArcSwapOption::empty(),
            local_server: ArcSwapOption::empty(),
            hosts: ArcSwap::from_pointee(HashMap::new()),
            disable_ipv6: AtomicBool::new(true),
            remote_dns_resolve: AtomicBool::new(false),
        }
    }

    pub fn resolver(&self) -> Option<Arc<Resolver>> {
        self.resolver.load_full()
    }

    pub fn enhancer(&self) -> Option<Arc<Enhancer>> {
        self.enhancer.load_full()
    }

    pub fn local_server(&self) -> Option<Arc<LocalServer>> {
        self.local_server.load_full()
    }

    pub fn publish(&self, resolver: Arc<Resolver>, enhancer: Arc<Enhancer>, local: Arc<LocalServer>) {
        self.resolver.store(Some(resolver));
        self.enhancer.store(Some(enhancer));
        self.local_server.store(Some(local));
    }

    pub fn unset(&self) {
        self.resolver.store(None);
        self.enhancer.store(None);
        self.local_server.store(None);
    }

    pub fn hosts(&self) -> Arc<HashMap<String, IpAddr>> {
        self.hosts.load_full()
    }

    pub fn set_hosts(&self, hosts: HashMap<String, IpAddr>) {
        self.hosts.store(Arc::new(hosts));
    }

    pub fn disable_ipv6(&self) -> bool {
        self.disable_ipv6.load(Ordering::Relaxed)
    }

    pub fn set_disable_ipv6(&self, disable: bool) {
        self.disable_ipv6.store(disable, Ordering::Relaxed);
    }

    pub fn remote_dns_resolve(&self) -> bool {
        self.remote_dns_resolve.load(Ordering::Relaxed)
    }

    pub fn set_remote_dns_resolve(&self, enabled: bool) {
        self.remote_dns_resolve.store(enabled, Ordering::Relaxed);
    }

    /// Resolve `host` against the live hosts table, then the published
    /// resolver. The system resolver is only consulted while the trio is unset.
    pub async fn resolve_ip(&self, host: &str) -> Result<Vec<IpAddr>> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(vec![ip]);
        }
        if let Some(ip) = self.hosts().get(host) {
            return Ok(vec![*ip]);
        }

        let disable_ipv6 = self.disable_ipv6();
        if let Some(resolver) = self.resolver() {
            return resolver.resolve_ip(host, disable_ipv6).await;
        }

        let ips: Vec<IpAddr> = tokio::net::lookup_host((host, 0))
            .await?
            .map(|addr| addr.ip())
            .filter(|ip| !disable_ipv6 || ip.is_ipv4())
            .collect();
        if ips.is_empty() {
            return Err(Error::Dns(format!("no address for {}", host)));
        }
        Ok(ips)
    }
}

#[async_trait]
impl HostResolver for ResolverState {
    async fn resolve_host(&self, host: &str) -> Result<Vec<IpAddr>> {
        self.resolve_ip(host).await
    }
}

impl Default for ResolverState {
    fn default() -> Self {
        Self::new()
    }
}

pub struct LiveState {
    tunnel: Tunnel,
    resolver: Arc<ResolverState>,
    dialer: Dialer,
    authenticator: ArcSwapOption<Authenticator>,
    tun: ArcSwap<Tun>,
    store_selected: AtomicBool,
    store_fake_ip: AtomicBool,
}

impl LiveState {
    pub fn new(dialer: Dialer) -> Self {
        let resolver = Arc::new(ResolverState::new());
        dialer.set_resolver(resolver.clone());
        Self {
            tunnel: Tunnel::new(),
            resolver,
            dialer,
            authenticator: ArcSwapOption::empty(),
            tun: ArcSwap::from_pointee(Tun::default()),
            store_selected: AtomicBool::new(false),
            store_fake_ip: AtomicBool::new(false),
        }
    }

    pub fn tunnel(&self) -> &Tunnel {
        &self.tunnel
    }

    pub fn resolver(&self) -> &ResolverState {
        &self.resolver
    }

    pub fn dialer(&self) -> &Dialer {
        &self.dialer
    }

    pub fn authenticator(&self) -> Option<Arc<Authenticator>> {
        self.authenticator.load_full()
    }

    pub fn set_authenticator(&self, authenticator: Option<Authenticator>) {
        self.authenticator.store(authenticator.map(Arc::new));
    }

    pub fn tun(&self) -> Arc<Tun> {
        self.tun.load_full()
    }

    pub fn set_tun(&self, tun: Tun) {
        self.tun.store(Arc::new(tun));
    }

    pub fn store_selected(&self) -> bool {
        self.store_selected.load(Ordering::Relaxed)
    }

    pub fn set_store_selected(&self, enabled: bool) {
        self.store_selected.store(enabled, Ordering::Relaxed);
    }

    pub fn store_fake_ip(&self) -> bool {
        self.store_fake_ip.load(Ordering::Relaxed)
    }

    pub fn set_store_fake_ip(&self, enabled: bool) {
        self.store_fake_ip.store(enabled, Ordering::Relaxed);
    }

    /// Route `metadata` and dial it through the chosen adapter.
    pub async fn dial(&self, metadata: &Metadata, matcher: &dyn RuleMatcher) -> Result<Conn> {
        let proxy = self
            .tunnel
            .pick_proxy(metadata, matcher)
            .ok_or_else(|| Error::Proxy(format!("no proxy for {}", metadata.destination)))?;

        OUTBOUND_DIALS_TOTAL.with_label_values(&[proxy.name()]).inc();
        match proxy.dial_context(&self.dialer, metadata, &[]).await {
            Ok(conn) => {
                info!(
                    "[TCP] {} --> {} using {}",
                    metadata.source,
                    metadata.destination,
                    conn.chains()
                );
                Ok(conn)
            }
            Err(e) => {
                OUTBOUND_DIAL_FAILURES.with_label_values(&[proxy.name()]).inc();
                warn!(
                    "[TCP] dial {} to {} failed: {}",
                    proxy.name(),
                    metadata.destination,
                    e
                );
                Err(e)
            }
        }
    }
}

impl Default for LiveState {
    fn default() -> Self {
        Self::new(Dialer::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{Proxy, Reject, Selector};
    use crate::common::Address;
    use crate::config::{Mode, GLOBAL};
    use crate::rules::Rule;

    struct NoMatch;

    impl RuleMatcher for NoMatch {
        fn matches(&self, _metadata: &Metadata, _rules: &[Rule]) -> Option<String> {
            None
        }
    }

    #[test]
    fn test_resolver_state_publish_unset() {
        let state = ResolverState::new();
        assert!(state.disable_ipv6());
        assert!(state.resolver().is_none());

        let config = crate::dns::DnsConfig::default();
        let resolver = Arc::new(Resolver::new(&config));
        let enhancer = Arc::new(Enhancer::new(&config));
        let local = Arc::new(LocalServer::new(resolver.clone(), enhancer.clone()));
        state.publish(resolver, enhancer, local);
        assert!(state.enhancer().is_some());
        assert!(state.local_server().is_some());

        state.unset();
        assert!(state.resolver().is_none());
        assert!(state.enhancer().is_none());
        assert!(state.local_server().is_none());
    }

    #[tokio::test]
    async fn test_resolve_prefers_hosts_over_resolver() {
        let state = ResolverState::new();
        let mut hosts = HashMap::new();
        hosts.insert("nas.lan".to_string(), "192.168.1.20".parse::<IpAddr>().unwrap());
        state.set_hosts(hosts);

        let mut config = crate::dns::DnsConfig::default();
        config
            .hosts
            .insert("nas.lan".into(), "10.0.0.20".parse().unwrap());
        config
            .hosts
            .insert("printer.lan".into(), "10.0.0.30".parse().unwrap());
        let resolver = Arc::new(Resolver::new(&config));
        let enhancer = Arc::new(Enhancer::new(&config));
        let local = Arc::new(LocalServer::new(resolver.clone(), enhancer.clone()));
        state.publish(resolver, enhancer, local);

        assert_eq!(
            state.resolve_ip("nas.lan").await.unwrap(),
            vec!["192.168.1.20".parse::<IpAddr>().unwrap()]
        );
        assert_eq!(
            state.resolve_ip("printer.lan").await.unwrap(),
            vec!["10.0.0.30".parse::<IpAddr>().unwrap()]
        );
    }

    #[tokio::test]
    async fn test_system_fallback_honors_ipv6_toggle() {
        let state = ResolverState::new();
        assert!(state.disable_ipv6());

        let ips = state.resolve_ip("localhost").await.unwrap();
        assert!(!ips.is_empty());
        assert!(ips.iter().all(|ip| ip.is_ipv4()));
    }

    #[tokio::test]
    async fn test_dial_records_chain() {
        let state = LiveState::default();
        let reject: Proxy = Arc::new(Reject::new());
        let mut proxies = HashMap::new();
        proxies.insert(GLOBAL.to_string(), Arc::new(Selector::new(GLOBAL, vec![reject.clone()])) as Proxy);
        proxies.insert("REJECT".to_string(), reject);
        state.tunnel().update_proxies(proxies, HashMap::new());
        state.tunnel().set_mode(Mode::Global);

        let metadata = Metadata::new(Address::from(("example.com", 80)));
        let conn = state.dial(&metadata, &NoMatch).await.unwrap();
        assert_eq!(conn.chains().to_string(), "GLOBAL[REJECT]");
    }

    #[tokio::test]
    async fn test_dial_without_proxy_fails() {
        let state = LiveState::default();
        let metadata = Metadata::new(Address::from(("example.com", 80)));
        assert!(matches!(
            state.dial(&metadata, &NoMatch).await,
            Err(Error::Proxy(_))
        ));
    }
}
