//! Configuration loading
//!
//! The file is JSON with kebab-case keys. [`parse_with_bytes`] decodes it
//! into [`raw::RawConfig`] and then builds a [`Config`]: adapters are
//! constructed, groups are resolved in dependency order and every rule
//! target is checked against the resulting proxy table. Any failure here
//! happens before the reconciler touches live state.

pub mod raw;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::adapter::{Direct, Proxy, ProxyProvider, Reject, Selector, VehicleType};
use crate::auth::AuthUser;
use crate::dns::{DnsConfig, EnhancedMode, FakeIpPool};
use crate::error::{Error, Result};
use crate::listener::{EBpf, Inbound, Ports, Tun, TunnelSpec};
use crate::log::LogLevel;
use crate::rules::{MainMatcher, RewriteRule, Rule, RuleProvider, RuleType};

use raw::{RawConfig, RawProxy, RawProxyGroup};

pub const DIRECT: &str = "DIRECT";
pub const REJECT: &str = "REJECT";
pub const GLOBAL: &str = "GLOBAL";
pub const DEFAULT_PROVIDER: &str = "default";

/// Environment variable naming the home directory holding `config.json`
pub const HOME_ENV: &str = "WAYPOINT_HOME";

/// Routing mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Global,
    #[default]
    Rule,
    Direct,
    Script,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Global => write!(f, "global"),
            Mode::Rule => write!(f, "rule"),
            Mode::Direct => write!(f, "direct"),
            Mode::Script => write!(f, "script"),
        }
    }
}

/// Process-wide settings
#[derive(Debug, Clone, Default)]
pub struct General {
    pub ports: Ports,
    pub allow_lan: bool,
    pub bind_address: String,
    pub mode: Mode,
    pub log_level: LogLevel,
    pub ipv6: bool,
    pub sniffing: bool,
    /// Default outbound interface, empty for none
    pub interface: String,
    /// Default routing mark, 0 for none
    pub routing_mark: u32,
    pub external_controller: String,
    pub tun: Tun,
    pub ebpf: EBpf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Mitm {
    pub hosts: Vec<String>,
    pub rules: Vec<RewriteRule>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Experimental {
    pub udp_fallback_match: bool,
    pub udp_fallback_policy: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ProfileConfig {
    pub store_selected: bool,
    pub store_fake_ip: bool,
    pub tracing: bool,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            store_selected: true,
            store_fake_ip: false,
            tracing: false,
        }
    }
}

/// A fully built configuration, ready to apply
pub struct Config {
    pub general: General,
    pub dns: DnsConfig,
    pub hosts: HashMap<String, IpAddr>,
    pub users: Vec<AuthUser>,
    pub proxies: HashMap<String, Proxy>,
    pub providers: HashMap<String, Arc<ProxyProvider>>,
    pub rules: Vec<Rule>,
    pub rule_providers: HashMap<String, RuleProvider>,
    pub main_matcher: Option<MainMatcher>,
    pub mitm: Mitm,
    pub inbounds: Vec<Inbound>,
    pub tunnels: Vec<TunnelSpec>,
    pub experimental: Experimental,
    pub profile: ProfileConfig,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut proxies: Vec<&String> = self.proxies.keys().collect();
        proxies.sort();
        f.debug_struct("Config")
            .field("general", &self.general)
            .field("dns", &self.dns)
            .field("proxies", &proxies)
            .field("rules", &self.rules.len())
            .finish()
    }
}

/// `$WAYPOINT_HOME/config.json`, or `./config.json` when unset.
pub fn default_path() -> PathBuf {
    std::env::var_os(HOME_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("config.json")
}

/// Parse the configuration at the default path.
pub fn parse() -> Result<Config> {
    parse_with_path(default_path())
}

pub fn parse_with_path(path: impl AsRef<Path>) -> Result<Config> {
    let buf = read_config(path.as_ref())?;
    parse_with_bytes(&buf)
}

pub fn parse_with_bytes(buf: &[u8]) -> Result<Config> {
    let raw: RawConfig = serde_json::from_slice(buf)
        .map_err(|e| Error::ConfigParse(format!("Failed to parse config: {}", e)))?;
    build(raw)
}

fn read_config(path: &Path) -> Result<Vec<u8>> {
    let data = std::fs::read(path)
        .map_err(|e| Error::ConfigRead(format!("{}: {}", path.display(), e)))?;
    if data.is_empty() {
        return Err(Error::ConfigRead(format!(
            "configuration file {} is empty",
            path.display()
        )));
    }
    Ok(data)
}

fn build(raw: RawConfig) -> Result<Config> {
    let users = raw
        .authentication
        .iter()
        .map(|s| s.parse())
        .collect::<Result<Vec<AuthUser>>>()?;

    let hosts = parse_hosts(&raw.hosts)?;
    let dns = build_dns(&raw, &hosts)?;
    let (proxies, providers) = build_proxies(&raw.proxies, &raw.proxy_groups)?;

    for (name, provider) in &raw.rule_providers {
        if !provider.name.is_empty() && &provider.name != name {
            return Err(Error::ConfigParse(format!(
                "rule provider {} declares a different name {}",
                name, provider.name
            )));
        }
    }
    let rule_providers = raw
        .rule_providers
        .into_iter()
        .map(|(name, mut provider)| {
            provider.name = name.clone();
            (name, provider)
        })
        .collect::<HashMap<_, _>>();

    let rules = build_rules(&raw.rules, &proxies, &rule_providers)?;

    for tunnel in &raw.tunnels {
        if !proxies.contains_key(&tunnel.proxy) {
            return Err(Error::ConfigParse(format!(
                "tunnel {}: proxy {} not found",
                tunnel.address, tunnel.proxy
            )));
        }
        if let Some(network) = tunnel.network.iter().find(|n| *n != "tcp" && *n != "udp") {
            return Err(Error::ConfigParse(format!(
                "tunnel {}: unknown network {}",
                tunnel.address, network
            )));
        }
    }

    let general = General {
        ports: Ports {
            port: raw.port,
            socks_port: raw.socks_port,
            redir_port: raw.redir_port,
            tproxy_port: raw.tproxy_port,
            mixed_port: raw.mixed_port,
            mitm_port: raw.mitm_port,
        },
        allow_lan: raw.allow_lan,
        bind_address: raw.bind_address.unwrap_or_else(|| "*".to_string()),
        mode: raw.mode,
        log_level: raw.log_level,
        ipv6: raw.ipv6,
        sniffing: raw.sniffing,
        interface: raw.interface_name,
        routing_mark: raw.routing_mark,
        external_controller: raw.external_controller,
        tun: raw.tun,
        ebpf: raw.ebpf,
    };

    debug!(
        "[Config] {} proxies, {} rules, mode {}",
        proxies.len(),
        rules.len(),
        general.mode
    );

    Ok(Config {
        general,
        dns,
        hosts,
        users,
        proxies,
        providers,
        rules,
        rule_providers,
        main_matcher: raw.script,
        mitm: raw.mitm,
        inbounds: raw.inbounds,
        tunnels: raw.tunnels,
        experimental: raw.experimental,
        profile: raw.profile,
    })
}

fn parse_hosts(raw: &HashMap<String, String>) -> Result<HashMap<String, IpAddr>> {
    raw.iter()
        .map(|(host, ip)| {
            ip.parse::<IpAddr>()
                .map(|ip| (host.clone(), ip))
                .map_err(|_| Error::ConfigParse(format!("host {}: invalid address {}", host, ip)))
        })
        .collect()
}

fn build_dns(raw: &RawConfig, hosts: &HashMap<String, IpAddr>) -> Result<DnsConfig> {
    let dns = &raw.dns;
    if dns.enable && dns.nameserver.is_empty() {
        return Err(Error::ConfigParse(
            "dns: nameserver is required when dns is enabled".into(),
        ));
    }

    let fake_ip_range = if dns.enhanced_mode == EnhancedMode::FakeIp {
        let range: Ipv4Net = dns.fake_ip_range.parse().map_err(|_| {
            Error::ConfigParse(format!("dns: invalid fake-ip-range {}", dns.fake_ip_range))
        })?;
        FakeIpPool::new(range)?;
        Some(range)
    } else {
        None
    };

    Ok(DnsConfig {
        enable: dns.enable,
        ipv6: dns.ipv6,
        listen: dns.listen.clone(),
        enhanced_mode: dns.enhanced_mode,
        nameserver: dns.nameserver.clone(),
        fallback: dns.fallback.clone(),
        default_nameserver: dns.default_nameserver.clone(),
        fake_ip_range,
        fake_ip_filter: dns.fake_ip_filter.clone(),
        hosts: hosts.clone(),
        remote_dns_resolve: dns.remote_dns_resolve,
    })
}

type ProxyTable = (HashMap<String, Proxy>, HashMap<String, Arc<ProxyProvider>>);

fn build_proxies(raw_proxies: &[RawProxy], raw_groups: &[RawProxyGroup]) -> Result<ProxyTable> {
    let mut proxies: HashMap<String, Proxy> = HashMap::new();
    // declaration order, used for the default provider and GLOBAL
    let mut order: Vec<String> = Vec::new();

    let mut insert = |proxies: &mut HashMap<String, Proxy>, proxy: Proxy| -> Result<()> {
        let name = proxy.name().to_string();
        if proxies.contains_key(&name) {
            return Err(Error::ConfigParse(format!("duplicate proxy name {}", name)));
        }
        order.push(name.clone());
        proxies.insert(name, proxy);
        Ok(())
    };

    insert(&mut proxies, Arc::new(Direct::new()))?;
    insert(&mut proxies, Arc::new(Reject::new()))?;

    for raw in raw_proxies {
        let proxy: Proxy = match raw.proxy_type.as_str() {
            "direct" => Arc::new(Direct::with_name(&raw.name, &raw.basic)),
            "reject" => Arc::new(Reject::with_name(&raw.name)),
            other => {
                return Err(Error::ConfigParse(format!(
                    "proxy {}: unsupported type {}",
                    raw.name, other
                )))
            }
        };
        insert(&mut proxies, proxy)?;
    }

    let group_names: HashSet<&str> = raw_groups.iter().map(|g| g.name.as_str()).collect();
    for group in raw_groups {
        if group.group_type != "select" {
            return Err(Error::ConfigParse(format!(
                "proxy group {}: unsupported type {}",
                group.name, group.group_type
            )));
        }
        if group.proxies.is_empty() {
            return Err(Error::ConfigParse(format!(
                "proxy group {}: no members",
                group.name
            )));
        }
        if group.name == GLOBAL {
            return Err(Error::ConfigParse(format!("{} is reserved", GLOBAL)));
        }
        for member in &group.proxies {
            if !proxies.contains_key(member) && !group_names.contains(member.as_str()) {
                return Err(Error::ConfigParse(format!(
                    "proxy group {}: member {} not found",
                    group.name, member
                )));
            }
        }
    }

    // groups may reference groups; build whichever is ready until none remain
    let mut pending: Vec<&RawProxyGroup> = raw_groups.iter().collect();
    while !pending.is_empty() {
        let before = pending.len();
        let mut waiting = Vec::new();
        for group in pending {
            if group.proxies.iter().all(|m| proxies.contains_key(m)) {
                let members = group
                    .proxies
                    .iter()
                    .filter_map(|m| proxies.get(m).cloned())
                    .collect();
                insert(
                    &mut proxies,
                    Arc::new(Selector::with_options(&group.name, &group.basic, members)),
                )?;
            } else {
                waiting.push(group);
            }
        }
        if waiting.len() == before {
            let names: Vec<&str> = waiting.iter().map(|g| g.name.as_str()).collect();
            return Err(Error::ConfigParse(format!(
                "loop detected in proxy groups: {}",
                names.join(", ")
            )));
        }
        pending = waiting;
    }

    let all: Vec<Proxy> = order
        .iter()
        .filter_map(|name| proxies.get(name).cloned())
        .collect();

    let mut providers = HashMap::new();
    providers.insert(
        DEFAULT_PROVIDER.to_string(),
        Arc::new(ProxyProvider::new(
            DEFAULT_PROVIDER,
            VehicleType::Compatible,
            all.clone(),
        )),
    );
    proxies.insert(GLOBAL.to_string(), Arc::new(Selector::new(GLOBAL, all)));

    Ok((proxies, providers))
}

fn build_rules(
    lines: &[String],
    proxies: &HashMap<String, Proxy>,
    rule_providers: &HashMap<String, RuleProvider>,
) -> Result<Vec<Rule>> {
    lines
        .iter()
        .enumerate()
        .map(|(idx, line)| {
            let rule = Rule::parse(line)
                .map_err(|e| Error::ConfigParse(format!("rules[{}]: {}", idx, e)))?;
            if !proxies.contains_key(&rule.target) {
                return Err(Error::ConfigParse(format!(
                    "rules[{}] [{}]: proxy {} not found",
                    idx, line, rule.target
                )));
            }
            if rule.rule_type == RuleType::RuleSet && !rule_providers.contains_key(&rule.payload) {
                return Err(Error::ConfigParse(format!(
                    "rules[{}] [{}]: rule set {} not found",
                    idx, line, rule.payload
                )));
            }
            Ok(rule)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::AdapterType;

    const SAMPLE: &str = r#"{
        "mixed-port": 7890,
        "allow-lan": true,
        "mode": "rule",
        "log-level": "debug",
        "authentication": ["alice:secret"],
        "interface-name": "eth0",
        "routing-mark": 6666,
        "hosts": { "router.lan": "192.168.1.1" },
        "dns": {
            "enable": true,
            "listen": "127.0.0.1:5353",
            "enhanced-mode": "fake-ip",
            "nameserver": ["1.1.1.1"]
        },
        "proxies": [
            { "name": "home", "type": "direct", "interface-name": "wg0" }
        ],
        "proxy-groups": [
            { "name": "Outer", "type": "select", "proxies": ["Proxy", "REJECT"] },
            { "name": "Proxy", "type": "select", "proxies": ["home", "DIRECT"] }
        ],
        "rules": [
            "DOMAIN-SUFFIX,lan,home",
            "MATCH,Outer"
        ],
        "inbounds": [ { "type": "socks", "bind-address": "127.0.0.1:1080" } ],
        "experimental": { "udp-fallback-policy": "direct" }
    }"#;

    #[test]
    fn test_parse_sample() {
        let cfg = parse_with_bytes(SAMPLE.as_bytes()).unwrap();

        assert_eq!(cfg.general.ports.mixed_port, 7890);
        assert!(cfg.general.allow_lan);
        assert_eq!(cfg.general.bind_address, "*");
        assert_eq!(cfg.general.log_level, LogLevel::Debug);
        assert_eq!(cfg.general.interface, "eth0");
        assert_eq!(cfg.general.routing_mark, 6666);
        assert_eq!(cfg.users[0].user, "alice");
        assert_eq!(cfg.hosts["router.lan"], "192.168.1.1".parse::<IpAddr>().unwrap());

        assert_eq!(
            cfg.dns.fake_ip_range,
            Some("198.18.0.1/16".parse().unwrap())
        );
        assert_eq!(cfg.dns.hosts.len(), 1);

        for name in ["DIRECT", "REJECT", "GLOBAL", "home", "Proxy", "Outer"] {
            assert!(cfg.proxies.contains_key(name), "missing {}", name);
        }
        assert_eq!(cfg.proxies["Outer"].adapter_type(), AdapterType::Selector);
        assert_eq!(cfg.rules.len(), 2);
        assert_eq!(cfg.providers[DEFAULT_PROVIDER].proxies().len(), 5);
        assert_eq!(cfg.inbounds.len(), 1);
        assert!(cfg.profile.store_selected);
    }

    #[test]
    fn test_global_lists_everything() {
        let cfg = parse_with_bytes(SAMPLE.as_bytes()).unwrap();
        let global = cfg.proxies[GLOBAL].as_selectable().unwrap();
        assert_eq!(
            global.members(),
            vec!["DIRECT", "REJECT", "home", "Proxy", "Outer"]
        );
    }

    #[test]
    fn test_defaults() {
        let cfg = parse_with_bytes(b"{}").unwrap();
        assert_eq!(cfg.general.mode, Mode::Rule);
        assert_eq!(cfg.general.log_level, LogLevel::Info);
        assert!(!cfg.general.ipv6);
        assert_eq!(cfg.dns.enhanced_mode, EnhancedMode::Normal);
        assert!(cfg.dns.fake_ip_range.is_none());
        assert!(cfg.profile.store_selected);
        assert!(!cfg.profile.store_fake_ip);
        assert_eq!(cfg.proxies.len(), 3);
    }

    #[test]
    fn test_parse_errors() {
        let cases = [
            "{not json",
            r#"{"proxies":[{"name":"x","type":"vmess"}]}"#,
            r#"{"proxy-groups":[{"name":"G","type":"select","proxies":["nope"]}]}"#,
            r#"{"proxy-groups":[{"name":"A","type":"select","proxies":["B"]},{"name":"B","type":"select","proxies":["A"]}]}"#,
            r#"{"rules":["MATCH,Nowhere"]}"#,
            r#"{"rules":["RULE-SET,ads,REJECT"]}"#,
            r#"{"authentication":["nocolon"]}"#,
            r#"{"hosts":{"a":"not-an-ip"}}"#,
            r#"{"dns":{"enhanced-mode":"fake-ip","fake-ip-range":"10.0.0.0/31"}}"#,
            r#"{"proxies":[{"name":"DIRECT","type":"direct"}]}"#,
            r#"{"tunnels":[{"network":["tcp"],"address":"127.0.0.1:6553","target":"1.1.1.1:53","proxy":"nope"}]}"#,
        ];
        for case in cases {
            match parse_with_bytes(case.as_bytes()) {
                Err(Error::ConfigParse(_)) => {}
                other => panic!("{} -> {:?}", case, other),
            }
        }
    }

    #[test]
    fn test_read_errors() {
        let dir = tempfile::tempdir().unwrap();

        let missing = dir.path().join("missing.json");
        assert!(matches!(parse_with_path(&missing), Err(Error::ConfigRead(_))));

        let empty = dir.path().join("empty.json");
        std::fs::write(&empty, b"").unwrap();
        assert!(matches!(parse_with_path(&empty), Err(Error::ConfigRead(_))));

        let good = dir.path().join("config.json");
        std::fs::write(&good, SAMPLE).unwrap();
        assert!(parse_with_path(&good).is_ok());
    }
}
