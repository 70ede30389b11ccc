//! Interface-bound local address resolution
//!
//! Used wherever the platform cannot pin a socket to a device directly: the
//! interface is resolved through the cache and one of its addresses becomes
//! the socket's local address.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use socket2::Socket;

use crate::error::{Error, Result};
use crate::iface::InterfaceCache;

/// Network kinds the binder understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkKind {
    Tcp,
    Tcp4,
    Tcp6,
    Udp,
    Udp4,
    Udp6,
}

impl NetworkKind {
    pub fn is_stream(self) -> bool {
        matches!(self, NetworkKind::Tcp | NetworkKind::Tcp4 | NetworkKind::Tcp6)
    }
}

impl FromStr for NetworkKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "tcp" => Ok(NetworkKind::Tcp),
            "tcp4" => Ok(NetworkKind::Tcp4),
            "tcp6" => Ok(NetworkKind::Tcp6),
            "udp" => Ok(NetworkKind::Udp),
            "udp4" => Ok(NetworkKind::Udp4),
            "udp6" => Ok(NetworkKind::Udp6),
            other => Err(Error::UnsupportedNetworkKind(other.to_string())),
        }
    }
}

/// A concrete local address for a stream or datagram socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundAddr {
    Tcp(SocketAddr),
    Udp(SocketAddr),
}

impl BoundAddr {
    pub fn socket_addr(&self) -> SocketAddr {
        match self {
            BoundAddr::Tcp(addr) | BoundAddr::Udp(addr) => *addr,
        }
    }
}

impl fmt::Display for BoundAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.socket_addr())
    }
}

/// Resolve a local address on `iface_name` suitable for `network`.
///
/// Family-agnostic networks follow the destination's family and fall back
/// to IPv4 when there is no destination.
pub fn lookup_local_addr(
    cache: &InterfaceCache,
    iface_name: &str,
    network: &str,
    destination: Option<IpAddr>,
    port: u16,
) -> Result<BoundAddr> {
    let kind: NetworkKind = network.parse()?;
    let iface = cache.resolve(iface_name)?;

    let addr = match kind {
        NetworkKind::Tcp4 | NetworkKind::Udp4 => iface.pick_ipv4_addr(destination)?,
        NetworkKind::Tcp6 | NetworkKind::Udp6 => iface.pick_ipv6_addr(destination)?,
        NetworkKind::Tcp | NetworkKind::Udp => match destination {
            Some(IpAddr::V6(_)) => iface.pick_ipv6_addr(destination)?,
            _ => iface.pick_ipv4_addr(destination)?,
        },
    };

    let local = SocketAddr::new(addr.addr(), port);
    Ok(if kind.is_stream() {
        BoundAddr::Tcp(local)
    } else {
        BoundAddr::Udp(local)
    })
}

/// Rewrite a listen address so that it lands on `iface_name`.
///
/// Only the port of `address` survives; an unparsable port becomes 0. The
/// destination is unknown when listening, so family selection falls back to
/// the network kind alone.
pub fn fallback_bind_iface_to_listen_config(
    cache: &InterfaceCache,
    iface_name: &str,
    network: &str,
    address: &str,
) -> Result<String> {
    let port = port_of(address);
    let local = lookup_local_addr(cache, iface_name, network, None, port)?;
    Ok(local.to_string())
}

fn port_of(address: &str) -> u16 {
    let port = match address.strip_prefix('[') {
        Some(rest) => rest.split_once("]:").map(|(_, port)| port),
        None => address
            .rsplit_once(':')
            .filter(|(host, _)| !host.contains(':'))
            .map(|(_, port)| port),
    };

    port.and_then(|p| p.parse().ok()).unwrap_or(0)
}

/// Pin an outbound socket to `iface_name`.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) fn bind_iface_to_socket(
    _cache: &InterfaceCache,
    socket: &Socket,
    iface_name: &str,
    _network: &str,
    _destination: Option<IpAddr>,
) -> Result<()> {
    socket.bind_device(Some(iface_name.as_bytes()))?;
    Ok(())
}

/// Pin an outbound socket to `iface_name`.
#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub(crate) fn bind_iface_to_socket(
    cache: &InterfaceCache,
    socket: &Socket,
    iface_name: &str,
    network: &str,
    destination: Option<IpAddr>,
) -> Result<()> {
    let local = lookup_local_addr(cache, iface_name, network, destination, 0)?;
    socket.bind(&local.socket_addr().into())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::iface::{Interface, StaticInterfaces};

    fn cache() -> InterfaceCache {
        InterfaceCache::new(Arc::new(StaticInterfaces(vec![Interface::new(
            2,
            "eth0",
            vec![
                "192.168.1.10/24".parse().unwrap(),
                "2001:db8::10/64".parse().unwrap(),
            ],
        )])))
    }

    #[test]
    fn test_explicit_families() {
        let cache = cache();

        let v4 = lookup_local_addr(&cache, "eth0", "tcp4", None, 0).unwrap();
        assert_eq!(v4, BoundAddr::Tcp("192.168.1.10:0".parse().unwrap()));

        let v6 = lookup_local_addr(&cache, "eth0", "tcp6", None, 0).unwrap();
        assert_eq!(v6, BoundAddr::Tcp("[2001:db8::10]:0".parse().unwrap()));

        let udp = lookup_local_addr(&cache, "eth0", "udp6", None, 53).unwrap();
        assert_eq!(udp, BoundAddr::Udp("[2001:db8::10]:53".parse().unwrap()));
    }

    #[test]
    fn test_family_follows_destination() {
        let cache = cache();

        let dest = Some("2606:4700::1111".parse().unwrap());
        let addr = lookup_local_addr(&cache, "eth0", "tcp", dest, 0).unwrap();
        assert!(addr.socket_addr().is_ipv6());

        let dest = Some("1.1.1.1".parse().unwrap());
        let addr = lookup_local_addr(&cache, "eth0", "udp", dest, 0).unwrap();
        assert_eq!(addr, BoundAddr::Udp("192.168.1.10:0".parse().unwrap()));
    }

    #[test]
    fn test_no_destination_defaults_to_ipv4() {
        let addr = lookup_local_addr(&cache(), "eth0", "tcp", None, 0).unwrap();
        assert!(addr.socket_addr().is_ipv4());
    }

    #[test]
    fn test_errors() {
        let cache = cache();

        assert!(matches!(
            lookup_local_addr(&cache, "eth9", "tcp", None, 0),
            Err(Error::InterfaceNotFound(_))
        ));
        assert!(matches!(
            lookup_local_addr(&cache, "eth0", "ip4", None, 0),
            Err(Error::UnsupportedNetworkKind(_))
        ));

        let v4_only = InterfaceCache::new(Arc::new(StaticInterfaces(vec![Interface::new(
            1,
            "eth1",
            vec!["10.0.0.2/8".parse().unwrap()],
        )])));
        assert!(matches!(
            lookup_local_addr(&v4_only, "eth1", "udp6", None, 0),
            Err(Error::AddressFamilyUnavailable { .. })
        ));
    }

    #[test]
    fn test_fallback_listen_keeps_port() {
        let cache = cache();
        assert_eq!(
            fallback_bind_iface_to_listen_config(&cache, "eth0", "tcp", "0.0.0.0:8080").unwrap(),
            "192.168.1.10:8080"
        );
        assert_eq!(
            fallback_bind_iface_to_listen_config(&cache, "eth0", "udp6", "[::]:5353").unwrap(),
            "[2001:db8::10]:5353"
        );
    }

    #[test]
    fn test_fallback_listen_unparsable_port() {
        let cache = cache();
        assert_eq!(
            fallback_bind_iface_to_listen_config(&cache, "eth0", "tcp", "0.0.0.0:http").unwrap(),
            "192.168.1.10:0"
        );
        assert_eq!(
            fallback_bind_iface_to_listen_config(&cache, "eth0", "udp", "garbage").unwrap(),
            "192.168.1.10:0"
        );
    }
}
