use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;

use crate::common::{Metadata, NopStream, Result};
use crate::dialer::{DialOption, Dialer};

use super::packet::{LocalAddr, NetConn, PacketConn};
use super::{AdapterBase, AdapterType, BaseOption, ChainedPacketConn, Conn, ProxyAdapter};

/// Accepts the connection and drops everything
pub struct Reject {
    base: AdapterBase,
}

impl Reject {
    pub fn new() -> Self {
        Self::with_name("REJECT")
    }

    pub fn with_name(name: impl Into<String>) -> Self {
        let mut opt = BaseOption::new(name, AdapterType::Reject);
        opt.udp = true;
        Self {
            base: AdapterBase::new(opt),
        }
    }
}

impl Default for Reject {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProxyAdapter for Reject {
    fn base(&self) -> &AdapterBase {
        &self.base
    }

    fn supports_udp_association(&self) -> bool {
        true
    }

    async fn dial_context(
        &self,
        _dialer: &Dialer,
        _metadata: &Metadata,
        _opts: &[DialOption],
    ) -> Result<Conn> {
        Ok(Conn::new(Box::new(NopStream), self))
    }

    async fn listen_packet_context(
        &self,
        _dialer: &Dialer,
        _metadata: &Metadata,
        _opts: &[DialOption],
    ) -> Result<ChainedPacketConn> {
        Ok(ChainedPacketConn::new(Arc::new(NopPacketConn), self))
    }
}

/// Datagram sink: sends vanish, receives end immediately
struct NopPacketConn;

impl NetConn for NopPacketConn {
    fn local_addr(&self) -> io::Result<LocalAddr> {
        Ok(LocalAddr::Inet(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))))
    }

    fn supports_datagrams(&self) -> bool {
        true
    }
}

#[async_trait]
impl PacketConn for NopPacketConn {
    async fn recv_from(&self, _buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        Err(io::ErrorKind::UnexpectedEof.into())
    }

    async fn send_to(&self, buf: &[u8], _target: SocketAddr) -> io::Result<usize> {
        Ok(buf.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::Connection;
    use crate::common::Address;
    use crate::iface::{InterfaceCache, StaticInterfaces};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn dialer() -> Dialer {
        Dialer::new(Arc::new(InterfaceCache::new(Arc::new(StaticInterfaces::default()))))
    }

    #[tokio::test]
    async fn test_reject_swallows() {
        let reject = Reject::new();
        let metadata = Metadata::new(Address::from(("example.com", 443)));
        let mut conn = reject.dial_context(&dialer(), &metadata, &[]).await.unwrap();
        assert_eq!(conn.chains().to_string(), "REJECT");

        conn.write_all(b"dropped").await.unwrap();
        let mut buf = Vec::new();
        assert_eq!(conn.read_to_end(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reject_packets() {
        let packet = Reject::new()
            .listen_packet_context(&dialer(), &Metadata::default(), &[])
            .await
            .unwrap();
        let target = SocketAddr::from(([1, 1, 1, 1], 53));
        assert_eq!(packet.send_to(b"query", target).await.unwrap(), 5);

        let mut buf = [0u8; 8];
        assert!(packet.recv_from(&mut buf).await.is_err());
    }
}
