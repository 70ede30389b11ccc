//! Connection chains
//!
//! A chain lists the adapters a connection passed through, innermost first:
//! the leaf that dialled is appended first and every enclosing group appends
//! itself as the connection travels back out.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::common::Stream;

use super::packet::{LocalAddr, NetConn, PacketConn};
use super::ProxyAdapter;

/// Ordered adapter names, innermost first
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Chain(Vec<String>);

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>) {
        self.0.push(name.into());
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn first(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    pub fn last(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

impl From<Vec<String>> for Chain {
    fn from(names: Vec<String>) -> Self {
        Self(names)
    }
}

/// `""` when empty, the single name for one hop, `outermost[innermost]` otherwise
impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_slice() {
            [] => Ok(()),
            [only] => f.write_str(only),
            [first, .., last] => write!(f, "{}[{}]", last, first),
        }
    }
}

/// Anything carrying an adapter chain
pub trait Connection {
    fn chains(&self) -> &Chain;

    fn append_to_chains(&mut self, adapter: &dyn ProxyAdapter);

    /// Replace the chain wholesale, used when rebuilding a connection's history.
    fn set_chains(&mut self, chains: Vec<String>);
}

/// A stream connection produced by an adapter
pub struct Conn {
    stream: Stream,
    chain: Chain,
}

impl Conn {
    /// Wrap `stream` with a chain holding only `adapter`.
    pub fn new(stream: Stream, adapter: &dyn ProxyAdapter) -> Self {
        let mut chain = Chain::new();
        chain.push(adapter.name());
        Self { stream, chain }
    }

    pub fn into_inner(self) -> Stream {
        self.stream
    }
}

impl Connection for Conn {
    fn chains(&self) -> &Chain {
        &self.chain
    }

    fn append_to_chains(&mut self, adapter: &dyn ProxyAdapter) {
        self.chain.push(adapter.name());
    }

    fn set_chains(&mut self, chains: Vec<String>) {
        self.chain = Chain::from(chains);
    }
}

impl fmt::Debug for Conn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conn").field("chain", &self.chain).finish()
    }
}

impl AsyncRead for Conn {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for Conn {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}

/// A datagram association produced by an adapter
#[derive(Clone)]
pub struct ChainedPacketConn {
    packet: Arc<dyn PacketConn>,
    chain: Chain,
}

impl ChainedPacketConn {
    pub fn new(packet: Arc<dyn PacketConn>, adapter: &dyn ProxyAdapter) -> Self {
        let mut chain = Chain::new();
        chain.push(adapter.name());
        Self { packet, chain }
    }

    pub fn inner(&self) -> &Arc<dyn PacketConn> {
        &self.packet
    }
}

impl Connection for ChainedPacketConn {
    fn chains(&self) -> &Chain {
        &self.chain
    }

    fn append_to_chains(&mut self, adapter: &dyn ProxyAdapter) {
        self.chain.push(adapter.name());
    }

    fn set_chains(&mut self, chains: Vec<String>) {
        self.chain = Chain::from(chains);
    }
}

impl fmt::Debug for ChainedPacketConn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainedPacketConn")
            .field("chain", &self.chain)
            .finish()
    }
}

impl NetConn for ChainedPacketConn {
    fn local_addr(&self) -> io::Result<LocalAddr> {
        self.packet.local_addr()
    }

    fn supports_datagrams(&self) -> bool {
        true
    }
}

#[async_trait]
impl PacketConn for ChainedPacketConn {
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.packet.recv_from(buf).await
    }

    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        self.packet.send_to(buf, target).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{Direct, Reject, Selector};
    use crate::common::NopStream;

    fn names(chain: &Chain) -> Vec<&str> {
        chain.as_slice().iter().map(String::as_str).collect()
    }

    #[test]
    fn test_chain_display() {
        assert_eq!(Chain::new().to_string(), "");
        assert_eq!(Chain::from(vec!["DIRECT".to_string()]).to_string(), "DIRECT");
        let chain = Chain::from(vec!["a".to_string(), "b".to_string(), "c".to_string()]);
        assert_eq!(chain.to_string(), "c[a]");
    }

    #[test]
    fn test_chain_grows_by_one_per_append() {
        let direct = Direct::new();
        let group = Selector::new("Proxy", vec![Arc::new(Direct::new()) as _]);
        let outer = Selector::new("Outer", vec![Arc::new(Reject::new()) as _]);

        let mut conn = Conn::new(Box::new(NopStream), &direct);
        assert_eq!(names(conn.chains()), vec!["DIRECT"]);

        conn.append_to_chains(&group);
        conn.append_to_chains(&outer);
        assert_eq!(names(conn.chains()), vec!["DIRECT", "Proxy", "Outer"]);
        assert_eq!(conn.chains().to_string(), "Outer[DIRECT]");
    }

    #[test]
    fn test_set_chains_replaces() {
        let mut conn = Conn::new(Box::new(NopStream), &Reject::new());
        conn.set_chains(vec!["x".into(), "y".into()]);
        assert_eq!(conn.chains().len(), 2);
        assert_eq!(conn.chains().first(), Some("x"));
        assert_eq!(conn.chains().last(), Some("y"));
    }

    #[test]
    fn test_chain_serializes_as_list() {
        let chain = Chain::from(vec!["DIRECT".to_string(), "Proxy".to_string()]);
        assert_eq!(
            serde_json::to_string(&chain).unwrap(),
            r#"["DIRECT","Proxy"]"#
        );
    }

    #[tokio::test]
    async fn test_conn_passes_through() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let (client, mut server) = tokio::io::duplex(64);
        let mut conn = Conn::new(Box::new(client), &Direct::new());
        conn.write_all(b"ping").await.unwrap();

        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }
}
