//! Metadata - per-connection context handed to the router and adapters

use super::Address;

/// Network type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Network {
    #[default]
    Tcp,
    Udp,
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Network::Tcp => write!(f, "tcp"),
            Network::Udp => write!(f, "udp"),
        }
    }
}

/// Connection context produced by an inbound and consumed at dial time
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    /// Source address of the connection
    pub source: Address,
    /// Destination address the client wants to reach
    pub destination: Address,
    /// Network type (TCP/UDP)
    pub network: Network,
    /// Name of the inbound that accepted the connection
    pub inbound_tag: String,
    /// Proxy forced by a declarative tunnel, bypassing rule matching
    pub special_proxy: Option<String>,
}

impl Metadata {
    pub fn new(destination: Address) -> Self {
        Self {
            destination,
            ..Default::default()
        }
    }

    pub fn with_source(mut self, source: Address) -> Self {
        self.source = source;
        self
    }

    pub fn with_network(mut self, network: Network) -> Self {
        self.network = network;
        self
    }

    pub fn with_inbound_tag(mut self, tag: impl Into<String>) -> Self {
        self.inbound_tag = tag.into();
        self
    }

    pub fn with_special_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.special_proxy = Some(proxy.into());
        self
    }
}
