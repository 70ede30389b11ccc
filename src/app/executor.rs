//! Configuration reconciliation
//!
//! [`Executor::apply_config`] replaces live state in a fixed order under one
//! lock:
//!
//! ```text
//! users → proxies → rules → scripts → hosts → mitm → profile
//!       → dns → general → inbounds → experimental → tunnels → log level
//! ```
//!
//! Stages don't fail. Problems with a resource surface when it's used, and
//! a pass that stops half way is not rolled back.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};

use crate::auth::{self, AuthUser, Authenticator};
use crate::config::{Config, Experimental, General, Mode, ProfileConfig};
use crate::dns::{DnsConfig, DnsServer, Enhancer, LocalServer, Resolver};
use crate::error::{Error, Result};
use crate::listener::{Inbound, ListenerManager, Ports, Tun, TunnelSpec};
use crate::log::{LogHandle, LogLevel};
use crate::profile::SelectionStore;

use super::metrics::{ApplyMetrics, INTERFACE_CACHE_FLUSHES};
use super::state::LiveState;
use super::tunnel::{ProviderTable, ProxyTable};

/// How much of the running system a reconfiguration may rebuild
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconfigScope {
    /// Everything, including listeners, TUN and redirects
    Full,
    /// Tables and settings only; no socket is torn down
    ProxiesAndRulesOnly,
}

impl fmt::Display for ReconfigScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconfigScope::Full => write!(f, "full"),
            ReconfigScope::ProxiesAndRulesOnly => write!(f, "proxies-and-rules"),
        }
    }
}

/// General settings as currently running
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct GeneralSnapshot {
    #[serde(flatten)]
    pub ports: Ports,
    pub allow_lan: bool,
    pub bind_address: String,
    pub authentication: Vec<String>,
    pub mode: Mode,
    pub log_level: LogLevel,
    pub ipv6: bool,
    pub sniffing: bool,
    pub tun: Tun,
}

pub struct Executor {
    state: Arc<LiveState>,
    listeners: Arc<dyn ListenerManager>,
    dns_server: Arc<dyn DnsServer>,
    store: Arc<dyn SelectionStore>,
    log: Arc<LogHandle>,
    lock: Mutex<()>,
    dns_applied: AtomicBool,
}

impl Executor {
    pub fn new(
        state: Arc<LiveState>,
        listeners: Arc<dyn ListenerManager>,
        dns_server: Arc<dyn DnsServer>,
        store: Arc<dyn SelectionStore>,
        log: Arc<LogHandle>,
    ) -> Self {
        Self {
            state,
            listeners,
            dns_server,
            store,
            log,
            lock: Mutex::new(()),
            dns_applied: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> &Arc<LiveState> {
        &self.state
    }

    /// Apply `cfg` to the running system. Concurrent calls run one after another.
    pub fn apply_config(&self, mut cfg: Config, scope: ReconfigScope) {
        let _guard = self.lock.lock();
        let metrics = ApplyMetrics::start(scope);

        self.update_users(&cfg.users);
        self.update_proxies(cfg.proxies, cfg.providers);
        self.state.tunnel().update_rules(cfg.rules);
        self.state
            .tunnel()
            .update_script(cfg.rule_providers, cfg.main_matcher);
        self.state.resolver().set_hosts(cfg.hosts);
        self.state.tunnel().update_rewrites(cfg.mitm);
        self.update_profile(&cfg.profile);
        self.update_dns(&cfg.dns, &mut cfg.general.tun);
        self.update_general(&mut cfg.general, scope);
        self.update_inbounds(&cfg.inbounds, scope);
        self.update_experimental(&cfg.experimental);
        self.update_tunnels(&cfg.tunnels);

        self.log.set_level(cfg.general.log_level);

        metrics.record_completion(
            self.state.tunnel().proxies().len(),
            self.state.tunnel().rules().len(),
        );
        info!("[Config] configuration applied ({})", scope);
    }

    fn update_users(&self, users: &[AuthUser]) {
        let authenticator = Authenticator::new(users);
        let updated = authenticator.is_some();
        self.state.set_authenticator(authenticator);
        if updated {
            info!("[Inbound] authentication of local server updated");
        }
    }

    fn update_proxies(&self, proxies: ProxyTable, providers: ProviderTable) {
        let previous = self.state.tunnel().update_proxies(proxies, providers);
        let current = self.state.tunnel().proxies();

        for (name, proxy) in previous.iter() {
            let replaced = current
                .get(name)
                .map_or(true, |p| !Arc::ptr_eq(p, proxy));
            if replaced {
                proxy.cleanup();
            }
        }
    }

    fn update_profile(&self, profile: &ProfileConfig) {
        self.state.set_store_selected(profile.store_selected);
        self.state.set_store_fake_ip(profile.store_fake_ip);
        if profile.store_selected {
            self.patch_select_groups();
        }

        self.log.set_tracing(profile.tracing);
    }

    fn patch_select_groups(&self) {
        let Some(mapping) = self.store.selected_map() else {
            debug!("[Profile] no readable selection cache");
            return;
        };

        let proxies = self.state.tunnel().proxies();
        for (name, proxy) in proxies.iter() {
            let Some(group) = proxy.as_selectable() else {
                continue;
            };
            let Some(selected) = mapping.get(name) else {
                continue;
            };
            if let Err(e) = group.select(selected) {
                debug!("[Profile] can't restore {} for {}: {}", selected, name, e);
            }
        }
    }

    fn update_dns(&self, c: &DnsConfig, tun: &mut Tun) {
        let first = !self.dns_applied.swap(true, Ordering::SeqCst);
        let resolver_state = self.state.resolver();

        let resolver = Arc::new(Resolver::new(c));
        let enhancer = Arc::new(Enhancer::new(c));

        if let Some(old) = resolver_state.enhancer() {
            enhancer.patch_from(&old);
        } else if first && self.state.store_fake_ip() {
            if let Some(saved) = self.store.fake_ip_state() {
                let restored = enhancer.restore_fake_pool_state(&saved);
                info!("[DNS] restored {} fake-ip entries", restored);
            }
        }

        let local = Arc::new(LocalServer::new(resolver.clone(), enhancer.clone()));
        resolver_state.publish(resolver.clone(), enhancer.clone(), local);
        resolver_state.set_remote_dns_resolve(c.remote_dns_resolve);

        if let Some(pool) = enhancer.pool() {
            tun.tun_address_prefix = Some(pool.ip_net());
        }

        if c.enable {
            self.dns_server.recreate(&c.listen, resolver, enhancer);
        } else {
            if !tun.enable {
                resolver_state.unset();
            }
            self.dns_server.stop();
        }
    }

    fn update_general(&self, general: &mut General, scope: ReconfigScope) {
        let tunnel = self.state.tunnel();
        let dialer = self.state.dialer();

        tunnel.set_mode(general.mode);
        self.state.resolver().set_disable_ipv6(!general.ipv6);

        // an empty interface would clobber the one TUN auto-detection pinned
        if !general.interface.is_empty() || !general.tun.enable {
            dialer.defaults().set_interface(general.interface.clone());
            if !general.interface.is_empty() {
                info!("[Config] default interface {}", general.interface);
            }
        }

        // with TPROXY on, a zero mark leaves the previous one in place
        if general.routing_mark > 0 || general.ports.tproxy_port == 0 {
            dialer.defaults().set_routing_mark(general.routing_mark);
            if general.routing_mark > 0 {
                info!("[Config] routing mark {}", general.routing_mark);
            }
        }

        dialer.interfaces().flush();
        INTERFACE_CACHE_FLUSHES.inc();

        if scope != ReconfigScope::Full {
            return;
        }

        self.listeners.set_allow_lan(general.allow_lan);
        self.listeners.set_bind_address(&general.bind_address);
        tunnel.set_sniffing(general.sniffing);
        info!("[Config] tls sniffing {}", general.sniffing);

        general.tun.stop_route_listener = true;

        let handles = tunnel.inbound_handles();
        self.listeners.recreate_ports(&general.ports, &handles);
        self.listeners
            .recreate_auto_redir(&general.ebpf.auto_redir, &general.interface, &handles);
        self.listeners.recreate_tun(&general.tun, &handles);
        self.state.set_tun(general.tun.clone());
        self.listeners
            .recreate_redir_to_tun(&general.ebpf.redirect_to_tun);
    }

    fn update_inbounds(&self, inbounds: &[Inbound], scope: ReconfigScope) {
        if scope != ReconfigScope::Full {
            return;
        }
        let handles = self.state.tunnel().inbound_handles();
        self.listeners.recreate_listeners(inbounds, &handles);
    }

    fn update_experimental(&self, experimental: &Experimental) {
        let tunnel = self.state.tunnel();
        tunnel.set_udp_fallback_match(experimental.udp_fallback_match);
        tunnel.set_udp_fallback_policy(normalize_udp_fallback_policy(
            &experimental.udp_fallback_policy,
        ));
    }

    fn update_tunnels(&self, tunnels: &[TunnelSpec]) {
        let handles = self.state.tunnel().inbound_handles();
        self.listeners.patch_tunnels(tunnels, &handles);
    }

    /// Current general settings, with credentials masked.
    pub fn general(&self) -> GeneralSnapshot {
        let authentication = self
            .state
            .authenticator()
            .map(|a| a.users().iter().map(|u| auth::mask(u)).collect())
            .unwrap_or_default();

        GeneralSnapshot {
            ports: self.listeners.ports(),
            allow_lan: self.listeners.allow_lan(),
            bind_address: self.listeners.bind_address(),
            authentication,
            mode: self.state.tunnel().mode(),
            log_level: self.log.level(),
            ipv6: !self.state.resolver().disable_ipv6(),
            sniffing: self.state.tunnel().sniffing(),
            tun: self.state.tun().as_ref().clone(),
        }
    }

    /// Switch a selector group's active member, persisting the choice when
    /// selections are stored.
    pub fn select_proxy(&self, group: &str, member: &str) -> Result<()> {
        let proxies = self.state.tunnel().proxies();
        let proxy = proxies
            .get(group)
            .ok_or_else(|| Error::Proxy(format!("proxy {} not found", group)))?;
        let selectable = proxy
            .as_selectable()
            .ok_or_else(|| Error::Proxy(format!("{} is not a selector group", group)))?;

        selectable.select(member)?;
        if self.state.store_selected() {
            self.store.set_selected(group, member);
        }
        Ok(())
    }

    /// Stop listeners and persist learned state. Called once at teardown.
    pub fn shutdown(&self) {
        self.listeners.cleanup();

        if self.state.store_fake_ip() {
            if let Some(saved) = self
                .state
                .resolver()
                .enhancer()
                .and_then(|e| e.fake_pool_state())
            {
                self.store.store_fake_ip_state(saved);
            }
        }

        self.log.set_level(LogLevel::Info);
        info!("[Main] waypoint shutting down");
    }
}

/// `direct` and `reject` in any case become upper case; anything else is kept.
fn normalize_udp_fallback_policy(policy: &str) -> String {
    if policy.eq_ignore_ascii_case("direct") || policy.eq_ignore_ascii_case("reject") {
        policy.to_ascii_uppercase()
    } else {
        policy.to_string()
    }
}
