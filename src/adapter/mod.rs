//! Outbound adapters
//!
//! Every outbound transport implements [`ProxyAdapter`]. Identity, the
//! "unsupported" capability stubs and dial-option composition come from the
//! shared [`AdapterBase`]; concrete adapters override the capabilities they
//! actually provide and advertise them through the `supports_*` queries so
//! callers can check before invoking.
//!
//! ```text
//! Metadata ──► Selector ──► Direct ──► Dialer ──► TcpStream
//!                 │            │
//!                 │            └─ Conn { chain: ["DIRECT"] }
//!                 └─ append_to_chains ─► ["DIRECT", "Proxy"]
//! ```

mod base;
pub mod chain;
mod direct;
pub mod packet;
mod provider;
mod reject;
mod selector;

pub use base::{AdapterBase, BaseOption, BasicOption};
pub use chain::{Chain, ChainedPacketConn, Conn, Connection};
pub use direct::Direct;
pub use packet::{is_packet_conn, wrap_conn, LocalAddr, NetConn, PacketConn, PacketStreamShim, UnixKind};
pub use provider::{ProxyProvider, VehicleType};
pub use reject::Reject;
pub use selector::Selector;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::common::{Metadata, Result, Stream};
use crate::dialer::{DialOption, Dialer};

/// Shared handle to a configured adapter
pub type Proxy = Arc<dyn ProxyAdapter>;

/// Adapter type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AdapterType {
    Direct,
    Reject,
    Shadowsocks,
    Socks5,
    Http,
    Vmess,
    Trojan,
    Relay,
    Selector,
    Fallback,
    #[serde(rename = "URLTest")]
    UrlTest,
    LoadBalance,
}

impl fmt::Display for AdapterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AdapterType::Direct => "Direct",
            AdapterType::Reject => "Reject",
            AdapterType::Shadowsocks => "Shadowsocks",
            AdapterType::Socks5 => "Socks5",
            AdapterType::Http => "Http",
            AdapterType::Vmess => "Vmess",
            AdapterType::Trojan => "Trojan",
            AdapterType::Relay => "Relay",
            AdapterType::Selector => "Selector",
            AdapterType::Fallback => "Fallback",
            AdapterType::UrlTest => "URLTest",
            AdapterType::LoadBalance => "LoadBalance",
        };
        f.write_str(name)
    }
}

/// Capability set of one outbound transport
///
/// Identity methods delegate to [`ProxyAdapter::base`]. The capability stubs
/// fail with `CapabilityUnsupported`; adapters overriding one of them also
/// override the matching `supports_*` query.
#[async_trait]
pub trait ProxyAdapter: Send + Sync {
    fn base(&self) -> &AdapterBase;

    fn name(&self) -> &str {
        self.base().name()
    }

    fn adapter_type(&self) -> AdapterType {
        self.base().adapter_type()
    }

    fn addr(&self) -> &str {
        self.base().addr()
    }

    fn support_udp(&self) -> bool {
        self.base().support_udp()
    }

    fn disable_dns_resolve(&self) -> bool {
        self.base().disable_dns_resolve()
    }

    fn supports_stream_upgrade(&self) -> bool {
        false
    }

    fn supports_packet_upgrade(&self) -> bool {
        false
    }

    fn supports_udp_association(&self) -> bool {
        false
    }

    /// Layer this adapter's protocol over an already established stream.
    async fn stream_conn(&self, _stream: Stream, _metadata: &Metadata) -> Result<Stream> {
        Err(self.base().unsupported("stream upgrade"))
    }

    /// Layer this adapter's UDP-over-stream protocol over an established stream.
    async fn stream_packet_conn(&self, _stream: Stream, _metadata: &Metadata) -> Result<Stream> {
        Err(self.base().unsupported("packet upgrade"))
    }

    async fn dial_context(
        &self,
        dialer: &Dialer,
        metadata: &Metadata,
        opts: &[DialOption],
    ) -> Result<Conn>;

    async fn listen_packet_context(
        &self,
        _dialer: &Dialer,
        _metadata: &Metadata,
        _opts: &[DialOption],
    ) -> Result<ChainedPacketConn> {
        Err(self.base().unsupported("UDP association"))
    }

    fn to_json(&self) -> serde_json::Value {
        self.base().to_json()
    }

    /// The adapter a group would currently use for `metadata`; leaves return `None`.
    fn unwrap_proxy(&self, _metadata: &Metadata) -> Option<Proxy> {
        None
    }

    /// Selection access for user-selectable groups.
    fn as_selectable(&self) -> Option<&dyn Selectable> {
        None
    }

    /// Release persistent resources when the adapter is replaced.
    fn cleanup(&self) {}
}

/// A group whose active member can be read and changed
pub trait Selectable: Send + Sync {
    /// Name of the active member
    fn now(&self) -> String;

    fn members(&self) -> Vec<String>;

    fn select(&self, name: &str) -> Result<()>;
}
