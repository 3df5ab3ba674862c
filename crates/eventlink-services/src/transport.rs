//! Transport — dials and accepts peer links and proves who is on the other end.
//!
//! The mesh itself never opens sockets. It asks a [`Transport`] for an
//! [`Authenticated`] stream and wraps whatever comes back in a
//! [`Connection`](crate::Connection). [`TcpTransport`] is the stock
//! implementation: plain TCP with a Hello exchange, checked against the
//! trust store.

use std::io;
use std::time::Duration;

use bytes::BytesMut;
use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use zerocopy::FromBytes;

use eventlink_core::wire::{decode_frame, FrameHeader, WireError, HEADER_SIZE};
use eventlink_core::{Hello, Packet, PacketKind};

use crate::connection::{Direction, PeerStream};
use crate::manager::ConnectionManager;
use crate::trust::{TrustStore, TrustedPeer};

/// A stream whose far end has proven its server name.
pub struct Authenticated {
    pub peer: String,
    pub direction: Direction,
    pub stream: PeerStream,
}

impl std::fmt::Debug for Authenticated {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticated")
            .field("peer", &self.peer)
            .field("direction", &self.direction)
            .finish()
    }
}

/// Produces authenticated streams to trusted peers.
pub trait Transport: Send + Sync {
    fn connect<'a>(
        &'a self,
        peer: &'a TrustedPeer,
    ) -> BoxFuture<'a, Result<Authenticated, TransportError>>;
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("i/o: {0}")]
    Io(#[from] io::Error),
    #[error("wire: {0}")]
    Wire(#[from] WireError),
    #[error("handshake timed out")]
    Timeout,
    #[error("peer {0} is not trusted")]
    Untrusted(String),
    #[error("expected peer {expected}, got {got}")]
    UnexpectedPeer { expected: String, got: String },
    #[error("peer claims our own name")]
    SelfConnection,
    #[error("stream closed during handshake")]
    Closed,
}

// ── TCP ───────────────────────────────────────────────────────────────────────

/// TCP links authenticated by a Hello exchange against the trust store.
#[derive(Clone)]
pub struct TcpTransport {
    local_name: String,
    trust: TrustStore,
    handshake_timeout: Duration,
}

impl TcpTransport {
    pub fn new(local_name: impl Into<String>, trust: TrustStore, handshake_timeout: Duration) -> Self {
        Self {
            local_name: local_name.into(),
            trust,
            handshake_timeout,
        }
    }

    /// Authenticate an inbound socket.
    pub async fn accept(&self, stream: TcpStream) -> Result<Authenticated, TransportError> {
        stream.set_nodelay(true)?;
        let mut stream = stream;
        let hello = tokio::time::timeout(
            self.handshake_timeout,
            exchange_hello(&mut stream, &self.local_name),
        )
        .await
        .map_err(|_| TransportError::Timeout)??;

        if hello.name == self.local_name {
            return Err(TransportError::SelfConnection);
        }
        if !self.trust.is_trusted(&hello.name) {
            return Err(TransportError::Untrusted(hello.name));
        }
        Ok(Authenticated {
            peer: hello.name,
            direction: Direction::Inbound,
            stream: Box::new(stream),
        })
    }

    async fn dial(&self, peer: &TrustedPeer) -> Result<Authenticated, TransportError> {
        let handshake = async {
            let mut stream = TcpStream::connect(&peer.addr).await?;
            stream.set_nodelay(true)?;
            let hello = exchange_hello(&mut stream, &self.local_name).await?;
            Ok::<_, TransportError>((stream, hello))
        };
        let (stream, hello) = tokio::time::timeout(self.handshake_timeout, handshake)
            .await
            .map_err(|_| TransportError::Timeout)??;

        if hello.name != peer.name {
            return Err(TransportError::UnexpectedPeer {
                expected: peer.name.clone(),
                got: hello.name,
            });
        }
        Ok(Authenticated {
            peer: hello.name,
            direction: Direction::Outbound,
            stream: Box::new(stream),
        })
    }
}

impl Transport for TcpTransport {
    fn connect<'a>(
        &'a self,
        peer: &'a TrustedPeer,
    ) -> BoxFuture<'a, Result<Authenticated, TransportError>> {
        Box::pin(self.dial(peer))
    }
}

/// Send our Hello, then read exactly one Hello frame back.
///
/// Reads are sized to the frame so bytes the peer sends after its Hello
/// stay in the socket for the connection's reader.
pub async fn exchange_hello<S>(stream: &mut S, local_name: &str) -> Result<Hello, TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut out = BytesMut::new();
    Packet::hello(&Hello::new(local_name))?.encode_into(&mut out);
    stream.write_all(&out).await?;
    stream.flush().await?;

    let mut buf = BytesMut::zeroed(HEADER_SIZE);
    read_exact_or_closed(stream, &mut buf).await?;
    let header = FrameHeader::read_from_prefix(&buf[..]).ok_or(WireError::Truncated)?;
    let kind = header.validate()?;
    if kind != PacketKind::Hello {
        return Err(WireError::UnexpectedKind(kind).into());
    }

    buf.resize(HEADER_SIZE + header.body_len(), 0);
    read_exact_or_closed(stream, &mut buf[HEADER_SIZE..]).await?;
    let packet = decode_frame(&mut buf)?.ok_or(WireError::Truncated)?;
    Ok(packet.decode_body()?)
}

async fn read_exact_or_closed<S>(stream: &mut S, buf: &mut [u8]) -> Result<(), TransportError>
where
    S: AsyncRead + Unpin,
{
    match stream.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(TransportError::Closed),
        Err(e) => Err(e.into()),
    }
}

/// Accept peer links until shutdown. Each socket is authenticated on its own
/// task and handed to the manager.
pub async fn serve(
    listener: TcpListener,
    transport: TcpTransport,
    manager: ConnectionManager,
    mut shutdown: broadcast::Receiver<()>,
) {
    match listener.local_addr() {
        Ok(addr) => tracing::info!(%addr, "peer listener started"),
        Err(e) => tracing::warn!(error = %e, "peer listener started, address unknown"),
    }

    loop {
        let (socket, remote) = tokio::select! {
            _ = shutdown.recv() => break,
            accepted = listener.accept() => match accepted {
                Ok(a) => a,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    continue;
                }
            },
        };

        let transport = transport.clone();
        let manager = manager.clone();
        tokio::spawn(async move {
            match transport.accept(socket).await {
                Ok(auth) => {
                    tracing::info!(peer = %auth.peer, %remote, "inbound peer authenticated");
                    if let Err(e) = manager.attach(auth).await {
                        tracing::info!(%remote, error = %e, "inbound connection refused");
                    }
                }
                Err(e) => tracing::warn!(%remote, error = %e, "inbound handshake failed"),
            }
        });
    }

    tracing::info!("peer listener stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hello_exchange_leaves_trailing_bytes_unread() {
        let (mut a, mut b) = tokio::io::duplex(4096);

        let far = tokio::spawn(async move {
            let hello = exchange_hello(&mut b, "survival").await.unwrap();
            // Trailing frame written straight after our Hello.
            let mut extra = BytesMut::new();
            Packet::hello(&Hello::new("trailing")).unwrap().encode_into(&mut extra);
            b.write_all(&extra).await.unwrap();
            (hello, b)
        });

        let hello = exchange_hello(&mut a, "lobby").await.unwrap();
        assert_eq!(hello, Hello::new("survival"));

        let (theirs, _b) = far.await.unwrap();
        assert_eq!(theirs.name, "lobby");

        let mut buf = BytesMut::new();
        let packet = loop {
            if let Some(p) = decode_frame(&mut buf).unwrap() {
                break p;
            }
            a.read_buf(&mut buf).await.unwrap();
        };
        assert_eq!(packet.decode_body::<Hello>().unwrap().name, "trailing");
    }

    #[tokio::test]
    async fn closed_stream_during_handshake() {
        let (mut a, b) = tokio::io::duplex(4096);
        drop(b);
        let err = exchange_hello(&mut a, "lobby").await.unwrap_err();
        assert!(matches!(err, TransportError::Io(_) | TransportError::Closed), "{err}");
    }

    #[tokio::test]
    async fn non_hello_first_frame_is_rejected() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        let far = tokio::spawn(async move {
            let mut out = BytesMut::new();
            Packet::new(PacketKind::Event, &serde_json::json!({}))
                .unwrap()
                .encode_into(&mut out);
            b.write_all(&out).await.unwrap();
            b
        });
        let err = exchange_hello(&mut a, "lobby").await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::Wire(WireError::UnexpectedKind(PacketKind::Event))
        ));
        drop(far.await.unwrap());
    }

    #[tokio::test]
    async fn tcp_accept_rejects_untrusted_and_self() {
        let trust = TrustStore::new();
        trust.trust("survival", "127.0.0.1:1");
        let server = TcpTransport::new("lobby", trust, Duration::from_secs(2));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        for (name, ok) in [("survival", true), ("creative", false), ("lobby", false)] {
            let client = tokio::spawn(async move {
                let mut s = TcpStream::connect(addr).await.unwrap();
                let _ = exchange_hello(&mut s, name).await;
            });
            let (socket, _) = listener.accept().await.unwrap();
            let result = server.accept(socket).await;
            assert_eq!(result.is_ok(), ok, "{name}: {result:?}");
            if name == "lobby" {
                assert!(matches!(result, Err(TransportError::SelfConnection)));
            }
            client.await.unwrap();
        }
    }

    #[tokio::test]
    async fn tcp_dial_checks_declared_name() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut s, _) = listener.accept().await.unwrap();
            let _ = exchange_hello(&mut s, "impostor").await;
        });

        let client = TcpTransport::new("lobby", TrustStore::new(), Duration::from_secs(2));
        let peer = TrustedPeer {
            name: "survival".into(),
            addr: addr.to_string(),
        };
        let err = client.connect(&peer).await.unwrap_err();
        assert!(matches!(err, TransportError::UnexpectedPeer { .. }), "{err}");
    }
}
