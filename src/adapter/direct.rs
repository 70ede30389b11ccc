use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::common::{Metadata, Result};
use crate::dialer::{DialOption, Dialer};

use super::{AdapterBase, AdapterType, BaseOption, BasicOption, ChainedPacketConn, Conn, ProxyAdapter};

/// Connects straight to the destination
pub struct Direct {
    base: AdapterBase,
}

impl Direct {
    pub fn new() -> Self {
        Self::with_name("DIRECT", &BasicOption::default())
    }

    pub fn with_name(name: impl Into<String>, basic: &BasicOption) -> Self {
        let mut opt = BaseOption::new(name, AdapterType::Direct).with_basic(basic);
        opt.udp = true;
        Self {
            base: AdapterBase::new(opt),
        }
    }
}

impl Default for Direct {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProxyAdapter for Direct {
    fn base(&self) -> &AdapterBase {
        &self.base
    }

    fn supports_udp_association(&self) -> bool {
        true
    }

    async fn dial_context(
        &self,
        dialer: &Dialer,
        metadata: &Metadata,
        opts: &[DialOption],
    ) -> Result<Conn> {
        let opts = self.base.dial_options(opts.to_vec());
        let stream = dialer.dial_tcp(&metadata.destination, &opts).await?;
        debug!("[{}] dialed {}", self.name(), metadata.destination);
        Ok(Conn::new(Box::new(stream), self))
    }

    async fn listen_packet_context(
        &self,
        dialer: &Dialer,
        _metadata: &Metadata,
        opts: &[DialOption],
    ) -> Result<ChainedPacketConn> {
        let opts = self.base.dial_options(opts.to_vec());
        let socket = dialer.listen_packet("udp", "", &opts).await?;
        Ok(ChainedPacketConn::new(Arc::new(socket), self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{is_packet_conn, Connection};
    use crate::common::{Address, Network, Stream};
    use crate::error::Error;
    use crate::iface::{InterfaceCache, StaticInterfaces};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn dialer() -> Dialer {
        Dialer::new(Arc::new(InterfaceCache::new(Arc::new(StaticInterfaces::default()))))
    }

    #[tokio::test]
    async fn test_direct_dial() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"ok").await.unwrap();
        });

        let direct = Direct::new();
        let metadata = Metadata::new(Address::Socket(addr));
        let mut conn = direct.dial_context(&dialer(), &metadata, &[]).await.unwrap();
        assert_eq!(conn.chains().to_string(), "DIRECT");

        let mut buf = [0u8; 2];
        conn.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ok");
    }

    #[tokio::test]
    async fn test_direct_udp() {
        let direct = Direct::new();
        assert!(direct.supports_udp_association());

        let metadata = Metadata::new(Address::from(("127.0.0.1", 53))).with_network(Network::Udp);
        let packet = direct
            .listen_packet_context(&dialer(), &metadata, &[])
            .await
            .unwrap();
        assert!(is_packet_conn(&packet));
        assert_eq!(packet.chains().to_string(), "DIRECT");
    }

    #[tokio::test]
    async fn test_direct_stream_upgrade_unsupported() {
        let direct = Direct::new();
        assert!(!direct.supports_stream_upgrade());

        let stream: Stream = Box::new(crate::common::NopStream);
        let result = direct.stream_conn(stream, &Metadata::default()).await;
        assert!(matches!(result, Err(Error::CapabilityUnsupported { .. })));
    }

    #[test]
    fn test_direct_identity() {
        let direct = Direct::new();
        assert_eq!(direct.name(), "DIRECT");
        assert_eq!(direct.adapter_type(), AdapterType::Direct);
        assert!(direct.support_udp());
        assert!(direct.unwrap_proxy(&Metadata::default()).is_none());
        assert!(direct.as_selectable().is_none());
    }
}
