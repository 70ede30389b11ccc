//! Routing tables and the inbound queues
//!
//! Every table is swapped as a whole. A routing decision loads each table
//! once and commits to what it read, so a concurrent reload can only make
//! the next decision see newer state, never a torn table.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::{ArcSwap, ArcSwapOption};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;

use crate::adapter::{Proxy, ProxyProvider};
use crate::common::Metadata;
use crate::config::{Mitm, Mode, DIRECT, GLOBAL};
use crate::listener::{InboundHandles, TcpContext, UdpPacket};
use crate::rules::{MainMatcher, Rule, RuleMatcher, RuleProvider};

const INBOUND_QUEUE_SIZE: usize = 256;

pub type ProxyTable = HashMap<String, Proxy>;
pub type ProviderTable = HashMap<String, Arc<ProxyProvider>>;

/// Receiving ends of the inbound queues, consumed by the tunnel loop
#[derive(Debug)]
pub struct InboundQueues {
    pub tcp: mpsc::Receiver<TcpContext>,
    pub udp: mpsc::Receiver<UdpPacket>,
}

pub struct Tunnel {
    proxies: ArcSwap<ProxyTable>,
    providers: ArcSwap<ProviderTable>,
    rules: ArcSwap<Vec<Rule>>,
    rule_providers: ArcSwap<HashMap<String, RuleProvider>>,
    main_matcher: ArcSwapOption<MainMatcher>,
    rewrites: ArcSwap<Mitm>,
    mode: RwLock<Mode>,
    sniffing: AtomicBool,
    udp_fallback_match: AtomicBool,
    udp_fallback_policy: ArcSwap<String>,
    handles: InboundHandles,
    queues: Mutex<Option<InboundQueues>>,
}

impl Tunnel {
    pub fn new() -> Self {
        Self::with_queue_size(INBOUND_QUEUE_SIZE)
    }

    pub fn with_queue_size(size: usize) -> Self {
        let (tcp_tx, tcp_rx) = mpsc::channel(size);
        let (udp_tx, udp_rx) = mpsc::channel(size);

        Self {
            proxies: ArcSwap::from_pointee(HashMap::new()),
            providers: ArcSwap::from_pointee(HashMap::new()),
            rules: ArcSwap::from_pointee(Vec::new()),
            rule_providers: ArcSwap::from_pointee(HashMap::new()),
            main_matcher: ArcSwapOption::empty(),
            rewrites: ArcSwap::from_pointee(Mitm::default()),
            mode: RwLock::new(Mode::default()),
            sniffing: AtomicBool::new(false),
            udp_fallback_match: AtomicBool::new(false),
            udp_fallback_policy: ArcSwap::from_pointee(String::new()),
            handles: InboundHandles {
                tcp: tcp_tx,
                udp: udp_tx,
            },
            queues: Mutex::new(Some(InboundQueues {
                tcp: tcp_rx,
                udp: udp_rx,
            })),
        }
    }

    /// Publish a new proxy table, returning the one it replaced.
    pub fn update_proxies(&self, proxies: ProxyTable, providers: ProviderTable) -> Arc<ProxyTable> {
        self.providers.store(Arc::new(providers));
        self.proxies.swap(Arc::new(proxies))
    }

    pub fn proxies(&self) -> Arc<ProxyTable> {
        self.proxies.load_full()
    }

    pub fn providers(&self) -> Arc<ProviderTable> {
        self.providers.load_full()
    }

    pub fn update_rules(&self, rules: Vec<Rule>) {
        self.rules.store(Arc::new(rules));
    }

    pub fn rules(&self) -> Arc<Vec<Rule>> {
        self.rules.load_full()
    }

    pub fn update_script(&self, providers: HashMap<String, RuleProvider>, matcher: Option<MainMatcher>) {
        self.rule_providers.store(Arc::new(providers));
        self.main_matcher.store(matcher.map(Arc::new));
    }

    pub fn rule_providers(&self) -> Arc<HashMap<String, RuleProvider>> {
        self.rule_providers.load_full()
    }

    pub fn main_matcher(&self) -> Option<Arc<MainMatcher>> {
        self.main_matcher.load_full()
    }

    pub fn update_rewrites(&self, mitm: Mitm) {
        self.rewrites.store(Arc::new(mitm));
    }

    pub fn rewrites(&self) -> Arc<Mitm> {
        self.rewrites.load_full()
    }

    pub fn mode(&self) -> Mode {
        *self.mode.read()
    }

    pub fn set_mode(&self, mode: Mode) {
        *self.mode.write() = mode;
    }

    pub fn sniffing(&self) -> bool {
        self.sniffing.load(Ordering::Relaxed)
    }

    pub fn set_sniffing(&self, enabled: bool) {
        self.sniffing.store(enabled, Ordering::Relaxed);
    }

    pub fn udp_fallback_match(&self) -> bool {
        self.udp_fallback_match.load(Ordering::Relaxed)
    }

    pub fn set_udp_fallback_match(&self, enabled: bool) {
        self.udp_fallback_match.store(enabled, Ordering::Relaxed);
    }

    pub fn udp_fallback_policy(&self) -> Arc<String> {
        self.udp_fallback_policy.load_full()
    }

    pub fn set_udp_fallback_policy(&self, policy: String) {
        self.udp_fallback_policy.store(Arc::new(policy));
    }

    /// Senders listeners deliver accepted traffic into.
    pub fn inbound_handles(&self) -> InboundHandles {
        self.handles.clone()
    }

    /// Hand the receiving ends to the tunnel loop; `None` once taken.
    pub fn take_inbound_queues(&self) -> Option<InboundQueues> {
        self.queues.lock().take()
    }

    /// Choose the adapter for `metadata` under the current mode.
    ///
    /// A declarative tunnel's forced proxy wins over the mode. Rule and
    /// script modes fall back to DIRECT when the matcher has no answer.
    pub fn pick_proxy(&self, metadata: &Metadata, matcher: &dyn RuleMatcher) -> Option<Proxy> {
        let proxies = self.proxies.load_full();
        if let Some(name) = &metadata.special_proxy {
            return proxies.get(name).cloned();
        }

        let name = match self.mode() {
            Mode::Direct => DIRECT.to_string(),
            Mode::Global => GLOBAL.to_string(),
            Mode::Rule | Mode::Script => {
                let rules = self.rules.load();
                matcher
                    .matches(metadata, &rules)
                    .unwrap_or_else(|| DIRECT.to_string())
            }
        };
        proxies.get(&name).cloned()
    }
}

impl Default for Tunnel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{Direct, Reject, Selector};
    use crate::common::Address;

    /// Sends everything to the target of the first rule.
    struct FirstRule;

    impl RuleMatcher for FirstRule {
        fn matches(&self, _metadata: &Metadata, rules: &[Rule]) -> Option<String> {
            rules.first().map(|r| r.target.clone())
        }
    }

    fn tunnel() -> Tunnel {
        let direct: Proxy = Arc::new(Direct::new());
        let reject: Proxy = Arc::new(Reject::new());
        let global: Proxy = Arc::new(Selector::new(GLOBAL, vec![reject.clone(), direct.clone()]));

        let mut proxies = HashMap::new();
        proxies.insert(DIRECT.to_string(), direct);
        proxies.insert("REJECT".to_string(), reject);
        proxies.insert(GLOBAL.to_string(), global);

        let tunnel = Tunnel::new();
        tunnel.update_proxies(proxies, HashMap::new());
        tunnel
    }

    fn metadata() -> Metadata {
        Metadata::new(Address::from(("example.com", 443)))
    }

    #[test]
    fn test_pick_by_mode() {
        let tunnel = tunnel();
        tunnel.update_rules(vec![Rule::parse("MATCH,REJECT").unwrap()]);

        assert_eq!(tunnel.pick_proxy(&metadata(), &FirstRule).unwrap().name(), "REJECT");

        tunnel.set_mode(Mode::Direct);
        assert_eq!(tunnel.pick_proxy(&metadata(), &FirstRule).unwrap().name(), "DIRECT");

        tunnel.set_mode(Mode::Global);
        assert_eq!(tunnel.pick_proxy(&metadata(), &FirstRule).unwrap().name(), GLOBAL);
    }

    #[test]
    fn test_pick_falls_back_to_direct() {
        let tunnel = tunnel();
        assert_eq!(tunnel.pick_proxy(&metadata(), &FirstRule).unwrap().name(), "DIRECT");
    }

    #[test]
    fn test_special_proxy_wins() {
        let tunnel = tunnel();
        tunnel.set_mode(Mode::Direct);
        let metadata = metadata().with_special_proxy("REJECT");
        assert_eq!(tunnel.pick_proxy(&metadata, &FirstRule).unwrap().name(), "REJECT");
    }

    #[test]
    fn test_update_returns_previous_table() {
        let tunnel = tunnel();
        let old = tunnel.update_proxies(HashMap::new(), HashMap::new());
        assert_eq!(old.len(), 3);
        assert!(tunnel.proxies().is_empty());
    }

    #[tokio::test]
    async fn test_inbound_queues_taken_once() {
        let tunnel = Tunnel::with_queue_size(4);
        let handles = tunnel.inbound_handles();
        let mut queues = tunnel.take_inbound_queues().unwrap();
        assert!(tunnel.take_inbound_queues().is_none());

        handles
            .udp
            .send(UdpPacket {
                metadata: metadata(),
                payload: b"q".to_vec(),
            })
            .await
            .unwrap();
        assert_eq!(queues.udp.recv().await.unwrap().payload, b"q");
    }
}
