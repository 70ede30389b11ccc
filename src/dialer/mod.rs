//! Outbound socket creation
//!
//! A [`Dialer`] turns an address plus a list of [`DialOption`]s into a
//! connected TCP stream or a bound UDP socket. Process-wide defaults (the
//! default interface and routing mark) live in [`DialerDefaults`] and are
//! rewritten by the reconciler; options supplied by an adapter override them.

pub mod bind;

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use parking_lot::RwLock;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tokio::net::{TcpSocket, TcpStream, UdpSocket};
use tracing::{debug, trace};

use crate::common::Address;
use crate::error::{Error, Result};
use crate::iface::InterfaceCache;

pub use bind::{fallback_bind_iface_to_listen_config, lookup_local_addr, BoundAddr, NetworkKind};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// One per-dial setting
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialOption {
    /// Bind the socket to a named interface
    Interface(String),
    /// Tag outgoing packets with a routing mark
    RoutingMark(u32),
}

/// Effective socket settings after defaults and options are folded together
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct DialConfig {
    interface: Option<String>,
    routing_mark: Option<u32>,
}

impl DialConfig {
    fn apply(&mut self, opts: &[DialOption]) {
        for opt in opts {
            match opt {
                DialOption::Interface(name) => self.interface = Some(name.clone()),
                DialOption::RoutingMark(mark) => self.routing_mark = Some(*mark),
            }
        }
    }
}

/// Turns a domain destination into candidate addresses before a dial
#[async_trait]
pub trait HostResolver: Send + Sync {
    async fn resolve_host(&self, host: &str) -> Result<Vec<IpAddr>>;
}

/// Process-wide dial defaults, written by the general-settings stage
#[derive(Debug)]
pub struct DialerDefaults {
    interface: ArcSwap<String>,
    routing_mark: AtomicU32,
}

impl DialerDefaults {
    pub fn interface(&self) -> Arc<String> {
        self.interface.load_full()
    }

    pub fn set_interface(&self, name: impl Into<String>) {
        self.interface.store(Arc::new(name.into()));
    }

    pub fn routing_mark(&self) -> u32 {
        self.routing_mark.load(Ordering::Relaxed)
    }

    pub fn set_routing_mark(&self, mark: u32) {
        self.routing_mark.store(mark, Ordering::Relaxed);
    }
}

impl Default for DialerDefaults {
    fn default() -> Self {
        Self {
            interface: ArcSwap::from_pointee(String::new()),
            routing_mark: AtomicU32::new(0),
        }
    }
}

pub struct Dialer {
    defaults: DialerDefaults,
    interfaces: Arc<InterfaceCache>,
    resolver: RwLock<Option<Arc<dyn HostResolver>>>,
    connect_timeout: Duration,
}

impl Dialer {
    pub fn new(interfaces: Arc<InterfaceCache>) -> Self {
        Self {
            defaults: DialerDefaults::default(),
            interfaces,
            resolver: RwLock::new(None),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn defaults(&self) -> &DialerDefaults {
        &self.defaults
    }

    pub fn interfaces(&self) -> &Arc<InterfaceCache> {
        &self.interfaces
    }

    /// Route domain lookups through `resolver` instead of the system resolver.
    pub fn set_resolver(&self, resolver: Arc<dyn HostResolver>) {
        *self.resolver.write() = Some(resolver);
    }

    async fn resolve(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>> {
        let resolver = self.resolver.read().clone();
        match resolver {
            Some(resolver) => Ok(resolver
                .resolve_host(host)
                .await?
                .into_iter()
                .map(|ip| SocketAddr::new(ip, port))
                .collect()),
            None => Ok(tokio::net::lookup_host((host, port)).await?.collect()),
        }
    }

    fn config(&self, opts: &[DialOption]) -> DialConfig {
        let mut config = DialConfig::default();

        let interface = self.defaults.interface();
        if !interface.is_empty() {
            config.interface = Some(interface.as_ref().clone());
        }
        let mark = self.defaults.routing_mark();
        if mark != 0 {
            config.routing_mark = Some(mark);
        }

        config.apply(opts);
        config
    }

    /// Connect to `destination`, trying each resolved address in turn.
    ///
    /// Each attempt is bounded by the connect timeout; dropping the future
    /// abandons the dial.
    pub async fn dial_tcp(&self, destination: &Address, opts: &[DialOption]) -> Result<TcpStream> {
        let config = self.config(opts);
        let targets: Vec<SocketAddr> = match destination {
            Address::Socket(addr) => vec![*addr],
            Address::Domain(host, port) => self.resolve(host, *port).await?,
        };

        let mut last_err = None;
        for target in targets {
            match self.connect_one(target, &config).await {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    trace!("[Dialer] {} failed: {}", target, e);
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            Error::Proxy(format!("no address resolved for {}", destination))
        }))
    }

    async fn connect_one(&self, target: SocketAddr, config: &DialConfig) -> Result<TcpStream> {
        let socket = Socket::new(Domain::for_address(target), Type::STREAM, Some(Protocol::TCP))?;
        self.prepare(&socket, config, "tcp", Some(target.ip()))?;
        socket.set_nonblocking(true)?;

        let socket = TcpSocket::from_std_stream(socket.into());
        let stream = tokio::time::timeout(self.connect_timeout, socket.connect(target))
            .await
            .map_err(|_| Error::Timeout)??;
        stream.set_nodelay(true)?;

        debug!(
            "[Dialer] connected {} (interface={:?}, mark={:?})",
            target, config.interface, config.routing_mark
        );
        Ok(stream)
    }

    /// Bind a UDP socket for `network` at `address` ("" for any).
    pub async fn listen_packet(
        &self,
        network: &str,
        address: &str,
        opts: &[DialOption],
    ) -> Result<UdpSocket> {
        let kind: NetworkKind = network.parse()?;
        if kind.is_stream() {
            return Err(Error::UnsupportedNetworkKind(network.to_string()));
        }
        let config = self.config(opts);

        let mut address = address.to_string();
        if cfg!(not(any(target_os = "linux", target_os = "android"))) {
            if let Some(iface) = &config.interface {
                address = fallback_bind_iface_to_listen_config(&self.interfaces, iface, network, &address)?;
            }
        }

        let (socket, local) = udp_socket(parse_listen_addr(&address, kind))?;
        if cfg!(any(target_os = "linux", target_os = "android")) {
            self.prepare(&socket, &config, network, None)?;
        } else {
            apply_routing_mark(&socket, config.routing_mark)?;
        }
        socket.bind(&SockAddr::from(local))?;
        socket.set_nonblocking(true)?;

        Ok(UdpSocket::from_std(socket.into())?)
    }

    fn prepare(
        &self,
        socket: &Socket,
        config: &DialConfig,
        network: &str,
        destination: Option<IpAddr>,
    ) -> Result<()> {
        if let Some(iface) = &config.interface {
            bind::bind_iface_to_socket(&self.interfaces, socket, iface, network, destination)?;
        }
        apply_routing_mark(socket, config.routing_mark)
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn apply_routing_mark(socket: &Socket, mark: Option<u32>) -> Result<()> {
    if let Some(mark) = mark {
        socket.set_mark(mark)?;
    }
    Ok(())
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn apply_routing_mark(_socket: &Socket, mark: Option<u32>) -> Result<()> {
    if let Some(mark) = mark {
        debug!("[Dialer] routing mark {} ignored on this platform", mark);
    }
    Ok(())
}

/// Where to bind a packet socket, and whether it should accept both families
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ListenAddr {
    addr: SocketAddr,
    dual_stack: bool,
}

fn parse_listen_addr(address: &str, kind: NetworkKind) -> ListenAddr {
    if let Ok(addr) = address.parse() {
        return ListenAddr {
            addr,
            dual_stack: false,
        };
    }
    let port = address
        .rsplit_once(':')
        .and_then(|(_, port)| port.parse().ok())
        .unwrap_or(0);
    let (ip, dual_stack) = match kind {
        NetworkKind::Tcp6 | NetworkKind::Udp6 => (IpAddr::V6(Ipv6Addr::UNSPECIFIED), false),
        NetworkKind::Tcp | NetworkKind::Udp => (IpAddr::V6(Ipv6Addr::UNSPECIFIED), true),
        NetworkKind::Tcp4 | NetworkKind::Udp4 => (IpAddr::V4(Ipv4Addr::UNSPECIFIED), false),
    };
    ListenAddr {
        addr: SocketAddr::new(ip, port),
        dual_stack,
    }
}

/// Open a UDP socket for `local`. A family-agnostic wildcard gets a dual-stack
/// `[::]` socket, or `0.0.0.0` when the host has no IPv6.
fn udp_socket(local: ListenAddr) -> Result<(Socket, SocketAddr)> {
    if local.dual_stack {
        let dual = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP))
            .and_then(|socket| socket.set_only_v6(false).map(|_| socket));
        match dual {
            Ok(socket) => return Ok((socket, local.addr)),
            Err(e) => {
                debug!("[Dialer] dual-stack udp unavailable, using ipv4: {}", e);
                let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), local.addr.port());
                let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
                return Ok((socket, addr));
            }
        }
    }
    let socket = Socket::new(Domain::for_address(local.addr), Type::DGRAM, Some(Protocol::UDP))?;
    Ok((socket, local.addr))
}

impl Default for Dialer {
    fn default() -> Self {
        Self::new(Arc::new(InterfaceCache::system()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iface::StaticInterfaces;

    fn dialer() -> Dialer {
        Dialer::new(Arc::new(InterfaceCache::new(Arc::new(StaticInterfaces::default()))))
    }

    #[test]
    fn test_options_override_defaults() {
        let dialer = dialer();
        dialer.defaults().set_interface("eth0");
        dialer.defaults().set_routing_mark(7);

        assert_eq!(
            dialer.config(&[]),
            DialConfig {
                interface: Some("eth0".into()),
                routing_mark: Some(7)
            }
        );

        let config = dialer.config(&[
            DialOption::Interface("wlan0".into()),
            DialOption::RoutingMark(100),
        ]);
        assert_eq!(config.interface.as_deref(), Some("wlan0"));
        assert_eq!(config.routing_mark, Some(100));
    }

    #[test]
    fn test_empty_defaults_are_unset() {
        assert_eq!(dialer().config(&[]), DialConfig::default());
    }

    #[test]
    fn test_parse_listen_addr() {
        let any = parse_listen_addr("", NetworkKind::Udp);
        assert_eq!(any.addr, "[::]:0".parse::<SocketAddr>().unwrap());
        assert!(any.dual_stack);

        let v4 = parse_listen_addr("", NetworkKind::Udp4);
        assert_eq!(v4.addr, "0.0.0.0:0".parse::<SocketAddr>().unwrap());
        assert!(!v4.dual_stack);

        let v6 = parse_listen_addr(":5353", NetworkKind::Udp6);
        assert_eq!(v6.addr, "[::]:5353".parse::<SocketAddr>().unwrap());
        assert!(!v6.dual_stack);

        let explicit = parse_listen_addr("127.0.0.1:53", NetworkKind::Udp);
        assert_eq!(explicit.addr, "127.0.0.1:53".parse::<SocketAddr>().unwrap());
        assert!(!explicit.dual_stack);
    }

    #[tokio::test]
    async fn test_wildcard_udp_reaches_both_families() {
        let socket = dialer().listen_packet("udp", "", &[]).await.unwrap();

        let v4 = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket.send_to(b"v4", v4.local_addr().unwrap()).await.unwrap();
        let mut buf = [0u8; 2];
        let (n, _) = v4.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"v4");

        // hosts without an ipv6 loopback cannot exercise the other family
        let v6 = match UdpSocket::bind("[::1]:0").await {
            Ok(v6) => v6,
            Err(_) => return,
        };
        socket.send_to(b"v6", v6.local_addr().unwrap()).await.unwrap();
        let (n, _) = v6.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"v6");
    }

    struct StaticHosts;

    #[async_trait]
    impl HostResolver for StaticHosts {
        async fn resolve_host(&self, host: &str) -> Result<Vec<IpAddr>> {
            match host {
                "gateway.test" => Ok(vec![IpAddr::V4(Ipv4Addr::LOCALHOST)]),
                other => Err(Error::Dns(format!("no address for {}", other))),
            }
        }
    }

    #[tokio::test]
    async fn test_domain_dial_uses_installed_resolver() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let dialer = dialer();
        dialer.set_resolver(Arc::new(StaticHosts));
        let stream = dialer
            .dial_tcp(&Address::Domain("gateway.test".into(), port), &[])
            .await
            .unwrap();
        assert_eq!(stream.peer_addr().unwrap().port(), port);

        let err = dialer
            .dial_tcp(&Address::Domain("missing.test".into(), port), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Dns(_)));
    }

    #[tokio::test]
    async fn test_dial_and_listen_loopback() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let dialer = dialer();
        let stream = dialer.dial_tcp(&Address::Socket(addr), &[]).await.unwrap();
        assert_eq!(stream.peer_addr().unwrap(), addr);

        let socket = dialer.listen_packet("udp", "127.0.0.1:0", &[]).await.unwrap();
        assert!(socket.local_addr().unwrap().ip().is_loopback());
    }

    #[tokio::test]
    async fn test_listen_packet_rejects_stream_network() {
        let err = dialer().listen_packet("tcp", "", &[]).await.unwrap_err();
        assert!(matches!(err, Error::UnsupportedNetworkKind(_)));
    }
}
