//! Inbound listener seam
//!
//! Accept loops live outside this crate. The reconciler drives them through
//! [`ListenerManager`], handing over the tunnel's [`InboundHandles`] so
//! accepted connections reach the routing core.

mod registry;

pub use registry::ListenerRegistry;

use std::fmt;

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::common::{Metadata, Stream};

/// Fixed-port listeners; 0 disables a port
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Ports {
    pub port: u16,
    pub socks_port: u16,
    pub redir_port: u16,
    pub tproxy_port: u16,
    pub mixed_port: u16,
    pub mitm_port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InboundType {
    Http,
    Socks,
    Socks4,
    Socks5,
    Redir,
    Tproxy,
    Mixed,
    Mitm,
}

impl fmt::Display for InboundType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InboundType::Http => "http",
            InboundType::Socks => "socks",
            InboundType::Socks4 => "socks4",
            InboundType::Socks5 => "socks5",
            InboundType::Redir => "redir",
            InboundType::Tproxy => "tproxy",
            InboundType::Mixed => "mixed",
            InboundType::Mitm => "mitm",
        };
        f.write_str(name)
    }
}

/// A declared inbound listener
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Inbound {
    #[serde(rename = "type")]
    pub inbound_type: InboundType,
    pub bind_address: String,
}

impl fmt::Display for Inbound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.inbound_type, self.bind_address)
    }
}

/// TUN device settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Tun {
    pub enable: bool,
    pub device: String,
    pub stack: String,
    pub dns_hijack: Vec<String>,
    pub auto_route: bool,
    pub auto_detect_interface: bool,
    /// Fake-IP range routed into the device, filled in by the DNS stage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tun_address_prefix: Option<Ipv4Net>,
    /// Set when listeners are rebuilt so the old route watcher exits
    #[serde(skip)]
    pub stop_route_listener: bool,
}

/// eBPF redirect settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct EBpf {
    pub auto_redir: Vec<String>,
    pub redirect_to_tun: Vec<String>,
}

/// Fixed port forward: traffic to `address` goes to `target` through `proxy`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TunnelSpec {
    pub network: Vec<String>,
    pub address: String,
    pub target: String,
    pub proxy: String,
}

/// An accepted stream waiting for routing
pub struct TcpContext {
    pub metadata: Metadata,
    pub stream: Stream,
}

impl fmt::Debug for TcpContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpContext")
            .field("metadata", &self.metadata)
            .finish()
    }
}

/// One inbound datagram waiting for routing
#[derive(Debug)]
pub struct UdpPacket {
    pub metadata: Metadata,
    pub payload: Vec<u8>,
}

/// Where listeners deliver accepted traffic
#[derive(Debug, Clone)]
pub struct InboundHandles {
    pub tcp: mpsc::Sender<TcpContext>,
    pub udp: mpsc::Sender<UdpPacket>,
}

/// The inbound listener subsystem as driven by the reconciler
pub trait ListenerManager: Send + Sync {
    fn allow_lan(&self) -> bool;

    fn set_allow_lan(&self, allow: bool);

    fn bind_address(&self) -> String;

    fn set_bind_address(&self, address: &str);

    fn ports(&self) -> Ports;

    fn recreate_listeners(&self, inbounds: &[Inbound], handles: &InboundHandles);

    fn recreate_ports(&self, ports: &Ports, handles: &InboundHandles);

    fn recreate_auto_redir(&self, interfaces: &[String], default_interface: &str, handles: &InboundHandles);

    fn recreate_tun(&self, tun: &Tun, handles: &InboundHandles);

    fn recreate_redir_to_tun(&self, interfaces: &[String]);

    fn patch_tunnels(&self, tunnels: &[TunnelSpec], handles: &InboundHandles);

    /// Stop every listener.
    fn cleanup(&self);
}
