//! On-disk schema, decoded as-is before validation

use std::collections::HashMap;

use serde::Deserialize;

use crate::adapter::BasicOption;
use crate::dns::EnhancedMode;
use crate::listener::{EBpf, Inbound, Tun, TunnelSpec};
use crate::log::LogLevel;
use crate::rules::{MainMatcher, RuleProvider};

use super::{Experimental, Mitm, Mode, ProfileConfig};

pub const DEFAULT_FAKE_IP_RANGE: &str = "198.18.0.1/16";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RawConfig {
    pub port: u16,
    pub socks_port: u16,
    pub redir_port: u16,
    pub tproxy_port: u16,
    pub mixed_port: u16,
    pub mitm_port: u16,
    pub authentication: Vec<String>,
    pub allow_lan: bool,
    pub bind_address: Option<String>,
    pub mode: Mode,
    pub log_level: LogLevel,
    pub ipv6: bool,
    pub sniffing: bool,
    pub interface_name: String,
    pub routing_mark: u32,
    pub external_controller: String,

    pub tun: Tun,
    pub ebpf: EBpf,
    pub inbounds: Vec<Inbound>,
    pub tunnels: Vec<TunnelSpec>,

    pub dns: RawDns,
    pub hosts: HashMap<String, String>,

    pub proxies: Vec<RawProxy>,
    pub proxy_groups: Vec<RawProxyGroup>,
    pub rules: Vec<String>,
    pub rule_providers: HashMap<String, RuleProvider>,
    pub script: Option<MainMatcher>,
    pub mitm: Mitm,

    pub experimental: Experimental,
    pub profile: ProfileConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RawDns {
    pub enable: bool,
    pub ipv6: bool,
    pub listen: String,
    pub enhanced_mode: EnhancedMode,
    pub nameserver: Vec<String>,
    pub fallback: Vec<String>,
    pub default_nameserver: Vec<String>,
    pub fake_ip_range: String,
    pub fake_ip_filter: Vec<String>,
    pub remote_dns_resolve: bool,
}

impl Default for RawDns {
    fn default() -> Self {
        Self {
            enable: false,
            ipv6: false,
            listen: String::new(),
            enhanced_mode: EnhancedMode::Normal,
            nameserver: Vec::new(),
            fallback: Vec::new(),
            default_nameserver: Vec::new(),
            fake_ip_range: DEFAULT_FAKE_IP_RANGE.to_string(),
            fake_ip_filter: Vec::new(),
            remote_dns_resolve: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RawProxy {
    pub name: String,
    #[serde(rename = "type")]
    pub proxy_type: String,
    #[serde(flatten)]
    pub basic: BasicOption,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RawProxyGroup {
    pub name: String,
    #[serde(rename = "type")]
    pub group_type: String,
    #[serde(default)]
    pub proxies: Vec<String>,
    #[serde(flatten)]
    pub basic: BasicOption,
}
