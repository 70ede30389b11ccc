//! Datagram sockets and the stream-shaped shim around them
//!
//! [`NetConn`] is the classification surface every accepted connection
//! exposes: where it is bound and whether it offers datagram operations.
//! [`is_packet_conn`] combines the two, since a local (Unix) socket type may
//! offer `send_to`/`recv_from` while actually being stream-oriented.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpStream, UdpSocket};

/// Socket type of a local (Unix domain) socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnixKind {
    Stream,
    Datagram,
    SeqPacket,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalAddr {
    Inet(SocketAddr),
    Unix {
        kind: UnixKind,
        path: Option<PathBuf>,
    },
}

impl LocalAddr {
    pub fn as_socket(&self) -> Option<SocketAddr> {
        match self {
            LocalAddr::Inet(addr) => Some(*addr),
            LocalAddr::Unix { .. } => None,
        }
    }
}

pub trait NetConn: Send + Sync {
    fn local_addr(&self) -> io::Result<LocalAddr>;

    /// Whether the connection exposes `send_to`/`recv_from` style operations.
    fn supports_datagrams(&self) -> bool;
}

#[async_trait]
pub trait PacketConn: NetConn {
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;

    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize>;
}

/// True when `conn` should be handled as a datagram session.
///
/// Local sockets only qualify when their socket type is datagram; an
/// unreadable local address counts as "not a datagram session".
pub fn is_packet_conn(conn: &dyn NetConn) -> bool {
    if !conn.supports_datagrams() {
        return false;
    }

    match conn.local_addr() {
        Ok(LocalAddr::Inet(_)) => true,
        Ok(LocalAddr::Unix { kind, .. }) => kind == UnixKind::Datagram,
        Err(_) => false,
    }
}

/// Present a datagram socket where a stream connection is expected.
///
/// The shim keeps the datagram identity visible through [`NetConn`] and
/// [`PacketStreamShim::packet_conn`]; stream reads see end-of-stream and
/// stream writes fail.
pub fn wrap_conn(packet: Arc<dyn PacketConn>) -> PacketStreamShim {
    PacketStreamShim { packet }
}

pub struct PacketStreamShim {
    packet: Arc<dyn PacketConn>,
}

impl PacketStreamShim {
    pub fn packet_conn(&self) -> &Arc<dyn PacketConn> {
        &self.packet
    }

    /// Datagram sockets have no fixed peer.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        None
    }
}

impl NetConn for PacketStreamShim {
    fn local_addr(&self) -> io::Result<LocalAddr> {
        self.packet.local_addr()
    }

    fn supports_datagrams(&self) -> bool {
        self.packet.supports_datagrams()
    }
}

impl AsyncRead for PacketStreamShim {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for PacketStreamShim {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(Err(io::ErrorKind::UnexpectedEof.into()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

impl NetConn for UdpSocket {
    fn local_addr(&self) -> io::Result<LocalAddr> {
        UdpSocket::local_addr(self).map(LocalAddr::Inet)
    }

    fn supports_datagrams(&self) -> bool {
        true
    }
}

#[async_trait]
impl PacketConn for UdpSocket {
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let (n, from) = UdpSocket::recv_from(self, buf).await?;
        Ok((n, unmap_peer(from)))
    }

    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        // dual-stack sockets take IPv4 peers in mapped form
        let target = match (UdpSocket::local_addr(self)?, target) {
            (SocketAddr::V6(_), SocketAddr::V4(v4)) => {
                SocketAddr::new(IpAddr::V6(v4.ip().to_ipv6_mapped()), v4.port())
            }
            _ => target,
        };
        UdpSocket::send_to(self, buf, target).await
    }
}

fn unmap_peer(addr: SocketAddr) -> SocketAddr {
    match addr {
        SocketAddr::V6(v6) => match v6.ip().to_ipv4_mapped() {
            Some(v4) => SocketAddr::new(IpAddr::V4(v4), v6.port()),
            None => addr,
        },
        SocketAddr::V4(_) => addr,
    }
}

impl NetConn for TcpStream {
    fn local_addr(&self) -> io::Result<LocalAddr> {
        TcpStream::local_addr(self).map(LocalAddr::Inet)
    }

    fn supports_datagrams(&self) -> bool {
        false
    }
}

#[cfg(unix)]
mod unix {
    use super::*;
    use tokio::net::{UnixDatagram, UnixStream};

    impl NetConn for UnixStream {
        fn local_addr(&self) -> io::Result<LocalAddr> {
            let addr = UnixStream::local_addr(self)?;
            Ok(LocalAddr::Unix {
                kind: UnixKind::Stream,
                path: addr.as_pathname().map(Into::into),
            })
        }

        fn supports_datagrams(&self) -> bool {
            false
        }
    }

    impl NetConn for UnixDatagram {
        fn local_addr(&self) -> io::Result<LocalAddr> {
            let addr = UnixDatagram::local_addr(self)?;
            Ok(LocalAddr::Unix {
                kind: UnixKind::Datagram,
                path: addr.as_pathname().map(Into::into),
            })
        }

        fn supports_datagrams(&self) -> bool {
            true
        }
    }

    /// Raw sockets expose `send_to`/`recv_from` whatever their type, so the
    /// local address carries the real socket type for classification.
    impl NetConn for socket2::Socket {
        fn local_addr(&self) -> io::Result<LocalAddr> {
            let addr = socket2::Socket::local_addr(self)?;
            if let Some(inet) = addr.as_socket() {
                return Ok(LocalAddr::Inet(inet));
            }

            let ty = self.r#type()?;
            let kind = if ty == socket2::Type::DGRAM {
                UnixKind::Datagram
            } else if ty == socket2::Type::SEQPACKET {
                UnixKind::SeqPacket
            } else {
                UnixKind::Stream
            };
            Ok(LocalAddr::Unix {
                kind,
                path: addr.as_pathname().map(Into::into),
            })
        }

        fn supports_datagrams(&self) -> bool {
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn udp() -> Arc<UdpSocket> {
        Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap())
    }

    #[tokio::test]
    async fn test_udp_is_packet_conn() {
        let socket = udp().await;
        assert!(is_packet_conn(socket.as_ref()));
    }

    #[tokio::test]
    async fn test_tcp_is_not_packet_conn() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let stream = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        assert!(!is_packet_conn(&stream));
    }

    #[tokio::test]
    async fn test_dual_stack_peers_reported_as_ipv4() {
        let dual = match UdpSocket::bind("[::]:0").await {
            Ok(dual) => dual,
            Err(_) => return,
        };
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer_addr = peer.local_addr().unwrap();

        PacketConn::send_to(&dual, b"ping", peer_addr).await.unwrap();
        let mut buf = [0u8; 4];
        let (_, from) = peer.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        peer.send_to(b"pong", from).await.unwrap();
        let (n, from) = PacketConn::recv_from(&dual, &mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"pong");
        assert_eq!(from, peer_addr);
    }

    #[test]
    fn test_unmap_peer() {
        let mapped: SocketAddr = "[::ffff:10.0.0.1]:53".parse().unwrap();
        assert_eq!(unmap_peer(mapped), "10.0.0.1:53".parse::<SocketAddr>().unwrap());

        let native: SocketAddr = "[2001:db8::1]:53".parse().unwrap();
        assert_eq!(unmap_peer(native), native);
    }

    #[tokio::test]
    async fn test_wrap_conn_stays_packet() {
        let socket = udp().await;
        let local = socket.local_addr().unwrap();
        let shim = wrap_conn(socket);

        assert!(is_packet_conn(&shim));
        assert_eq!(shim.remote_addr(), None);
        assert_eq!(NetConn::local_addr(&shim).unwrap(), LocalAddr::Inet(local));
        assert!(shim.packet_conn().supports_datagrams());
    }

    #[tokio::test]
    async fn test_wrap_conn_stream_ops_end_of_stream() {
        let mut shim = wrap_conn(udp().await);

        let mut buf = [0u8; 16];
        assert_eq!(shim.read(&mut buf).await.unwrap(), 0);

        let err = shim.write(b"data").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_wrapped_packet_still_carries_datagrams() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let shim = wrap_conn(udp().await);

        shim.packet_conn()
            .send_to(b"hello", peer.local_addr().unwrap())
            .await
            .unwrap();
        let mut buf = [0u8; 8];
        let (n, _) = peer.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");
    }

    #[cfg(unix)]
    #[test]
    fn test_local_socket_kinds() {
        use socket2::{Domain, Socket, Type};

        let dir = tempfile::tempdir().unwrap();

        let dgram = Socket::new(Domain::UNIX, Type::DGRAM, None).unwrap();
        dgram
            .bind(&socket2::SockAddr::unix(dir.path().join("d.sock")).unwrap())
            .unwrap();
        assert!(is_packet_conn(&dgram));

        let stream = Socket::new(Domain::UNIX, Type::STREAM, None).unwrap();
        stream
            .bind(&socket2::SockAddr::unix(dir.path().join("s.sock")).unwrap())
            .unwrap();
        assert!(!is_packet_conn(&stream));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_tokio_unix_datagram() {
        let dir = tempfile::tempdir().unwrap();
        let socket = tokio::net::UnixDatagram::bind(dir.path().join("u.sock")).unwrap();
        assert!(is_packet_conn(&socket));
    }
}
