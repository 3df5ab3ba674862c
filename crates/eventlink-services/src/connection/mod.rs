//! Peer connections — one authenticated duplex stream to one named peer.
//!
//! A [`Connection`] hides blocking I/O behind two queues and two workers:
//!
//! ```text
//!   send() ──► outbound queue ──► writer ──► stream ──► peer
//!   peer ──► stream ──► reader ──┬──► inbound queue ──► receive()
//!                                └──► routing tables (route updates)
//! ```
//!
//! Whichever worker exits first runs the shared teardown, and the other runs
//! it again when it follows. Registry removal is identity-checked, route
//! invalidation happens only when that removal actually detached the
//! canonical entry, and the stream is closed behind a single-use latch, so
//! every side effect happens at most once per connection.
//!
//! Route updates from the reader pass through a per-connection gate that
//! teardown seals before it clears the peer's routes. An update is either
//! applied before the clear or not at all.

mod reader;
mod writer;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, WriteHalf};
use tokio::sync::{mpsc, Notify};

use eventlink_core::config::ConnectionConfig;
use eventlink_core::{Packet, RouteUpdate};

use crate::routing::RoutingTableManager;
use crate::worker::Worker;

/// Any byte stream a transport can hand us once the peer is authenticated.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Boxed authenticated duplex stream.
pub type PeerStream = Box<dyn AsyncStream>;

/// Timing knobs for a connection's workers.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionSettings {
    pub read_poll: Duration,
    pub write_poll: Duration,
    pub join_grace: Duration,
    pub handshake_timeout: Duration,
}

impl From<&ConnectionConfig> for ConnectionSettings {
    fn from(c: &ConnectionConfig) -> Self {
        Self {
            read_poll: c.read_poll(),
            write_poll: c.write_poll(),
            join_grace: c.join_grace(),
            handshake_timeout: c.handshake_timeout(),
        }
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self::from(&ConnectionConfig::default())
    }
}

/// Shared services a connection needs for teardown and dispatch.
///
/// The registry is held weakly: the registry owns connections, not the
/// other way round.
#[derive(Clone)]
pub struct ConnectionContext {
    pub registry: Weak<DashMap<String, Connection>>,
    pub routes: RoutingTableManager,
    /// Signalled whenever any connection queues an inbound packet.
    pub inbound_ready: Arc<Notify>,
    pub settings: ConnectionSettings,
}

/// Which side dialled the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

/// What one run of [`Connection::teardown`] actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TeardownOutcome {
    /// This run detached the canonical registry entry (and cleared routes).
    pub deregistered: bool,
    /// This run closed the stream.
    pub closed: bool,
}

/// Which workers are still running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerLiveness {
    pub reader: bool,
    pub writer: bool,
}

impl WorkerLiveness {
    pub fn any(&self) -> bool {
        self.reader || self.writer
    }
}

impl std::fmt::Display for WorkerLiveness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.reader, self.writer) {
            (true, true) => f.write_str("reader, writer"),
            (true, false) => f.write_str("reader"),
            (false, true) => f.write_str("writer"),
            (false, false) => f.write_str("none"),
        }
    }
}

struct ConnectionInner {
    peer: String,
    direction: Direction,
    established_at: Instant,
    outbound: Option<mpsc::UnboundedSender<Packet>>,
    inbound: Option<Mutex<VecDeque<Packet>>>,
    reader: Worker,
    writer: Worker,
    output: tokio::sync::Mutex<Option<WriteHalf<PeerStream>>>,
    close_latch: AtomicBool,
    /// False once teardown has started; route updates are dropped after.
    routes_open: Mutex<bool>,
    liveness: Notify,
    ctx: Option<ConnectionContext>,
}

/// Handle to a live (or dead) link with one peer. Clones share the link.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    /// Wrap an authenticated stream and start the writer, then the reader.
    pub fn spawn(
        peer: impl Into<String>,
        direction: Direction,
        stream: PeerStream,
        ctx: ConnectionContext,
    ) -> Self {
        let (conn, input, outbound_rx) = Self::parked(peer.into(), direction, stream, ctx);
        tokio::spawn(writer::run(conn.clone(), outbound_rx));
        tokio::spawn(reader::run(conn.clone(), input));
        tracing::debug!(peer = %conn.peer(), "connection workers started");
        conn
    }

    /// Build the connection without starting its workers.
    fn parked(
        peer: String,
        direction: Direction,
        stream: PeerStream,
        ctx: ConnectionContext,
    ) -> (Self, tokio::io::ReadHalf<PeerStream>, mpsc::UnboundedReceiver<Packet>) {
        let (input, output) = tokio::io::split(stream);
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Self {
            inner: Arc::new(ConnectionInner {
                reader: Worker::new(format!("reader:{peer}")),
                writer: Worker::new(format!("writer:{peer}")),
                peer,
                direction,
                established_at: Instant::now(),
                outbound: Some(tx),
                inbound: Some(Mutex::new(VecDeque::new())),
                output: tokio::sync::Mutex::new(Some(output)),
                close_latch: AtomicBool::new(false),
                routes_open: Mutex::new(true),
                liveness: Notify::new(),
                ctx: Some(ctx),
            }),
        };
        (conn, input, rx)
    }

    /// A placeholder with no queues and no workers. Never alive.
    pub fn dead(peer: impl Into<String>) -> Self {
        let peer = peer.into();
        Self {
            inner: Arc::new(ConnectionInner {
                reader: Worker::inert(format!("reader:{peer}")),
                writer: Worker::inert(format!("writer:{peer}")),
                peer,
                direction: Direction::Inbound,
                established_at: Instant::now(),
                outbound: None,
                inbound: None,
                output: tokio::sync::Mutex::new(None),
                close_latch: AtomicBool::new(true),
                routes_open: Mutex::new(false),
                liveness: Notify::new(),
                ctx: None,
            }),
        }
    }

    pub fn peer(&self) -> &str {
        &self.inner.peer
    }

    pub fn direction(&self) -> Direction {
        self.inner.direction
    }

    pub fn uptime(&self) -> Duration {
        self.inner.established_at.elapsed()
    }

    /// Same underlying link?
    pub fn same_as(&self, other: &Connection) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn settings(&self) -> ConnectionSettings {
        self.inner
            .ctx
            .as_ref()
            .map(|c| c.settings)
            .unwrap_or_default()
    }

    fn inbound(&self) -> Option<MutexGuard<'_, VecDeque<Packet>>> {
        self.inner
            .inbound
            .as_ref()
            .map(|q| q.lock().unwrap_or_else(PoisonError::into_inner))
    }

    // ── Queues ────────────────────────────────────────────────────────────────

    /// Queue a packet for the writer. Never blocks, never confirms delivery.
    pub fn send(&self, packet: Packet) {
        match &self.inner.outbound {
            Some(tx) => {
                if tx.send(packet).is_err() {
                    tracing::debug!(peer = %self.peer(), "writer gone, packet dropped");
                }
            }
            None => tracing::debug!(peer = %self.peer(), "send on dead connection, packet dropped"),
        }
    }

    /// Oldest received packet, if any.
    pub fn receive(&self) -> Option<Packet> {
        self.inbound()?.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.inbound().map_or(true, |q| q.is_empty())
    }

    fn push_inbound(&self, packet: Packet) {
        if let Some(mut q) = self.inbound() {
            q.push_back(packet);
        }
        if let Some(ctx) = &self.inner.ctx {
            ctx.inbound_ready.notify_one();
        }
    }

    /// Apply a route update sent by this peer. `None` once the link is closing.
    fn apply_route(&self, update: &RouteUpdate) -> Option<bool> {
        let ctx = self.inner.ctx.as_ref()?;
        let open = self
            .inner
            .routes_open
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !*open || self.is_closing() {
            return None;
        }
        Some(ctx.routes.apply_update(self.peer(), update))
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// True while either worker has not terminated.
    pub fn is_alive(&self) -> bool {
        self.inner.reader.is_alive() || self.inner.writer.is_alive()
    }

    /// True once shutdown has been requested or has begun.
    pub fn is_closing(&self) -> bool {
        self.inner.reader.is_cancelled()
            || self.inner.writer.is_cancelled()
            || self.inner.close_latch.load(Ordering::SeqCst)
    }

    pub fn which_alive(&self) -> WorkerLiveness {
        WorkerLiveness {
            reader: self.inner.reader.is_alive(),
            writer: self.inner.writer.is_alive(),
        }
    }

    /// Ask both workers to stop. Does not wait.
    pub fn interrupt(&self) {
        self.inner.reader.kill();
        self.inner.writer.kill();
    }

    /// Wait up to `grace` for both workers to finish; report the stragglers.
    pub async fn join(&self, grace: Duration) -> WorkerLiveness {
        let wait = async {
            loop {
                let notified = self.inner.liveness.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if !self.is_alive() {
                    return;
                }
                notified.await;
            }
        };
        let _ = tokio::time::timeout(grace, wait).await;
        self.which_alive()
    }

    /// Shared teardown, safe to run any number of times from any task.
    pub async fn teardown(&self) -> TeardownOutcome {
        self.interrupt();

        let deregistered = {
            let mut open = self
                .inner
                .routes_open
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            *open = false;

            let deregistered = self.deregister();
            if deregistered {
                tracing::info!(peer = %self.peer(), "closing connection");
                if let Some(ctx) = &self.inner.ctx {
                    let cleared = ctx.routes.clear_routes_through(self.peer());
                    tracing::info!(peer = %self.peer(), cleared, "routes through peer cleared");
                }
            } else {
                tracing::debug!(peer = %self.peer(), "closing expired connection");
            }
            deregistered
        };

        let closed = self.close_stream().await;
        self.inner.liveness.notify_waiters();

        TeardownOutcome {
            deregistered,
            closed,
        }
    }

    /// Remove this exact connection from the registry, never a newer one.
    fn deregister(&self) -> bool {
        let Some(registry) = self.inner.ctx.as_ref().and_then(|c| c.registry.upgrade()) else {
            return false;
        };
        registry
            .remove_if(self.peer(), |_, current| current.same_as(self))
            .is_some()
    }

    async fn close_stream(&self) -> bool {
        if self
            .inner
            .close_latch
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        let output = self.inner.output.lock().await.take();
        if let Some(mut output) = output {
            if let Err(e) = output.shutdown().await {
                tracing::debug!(peer = %self.peer(), error = %e, "stream shutdown failed");
            }
        }
        true
    }

    /// Called by a worker task after its loop exits.
    async fn worker_exited(&self, worker: &Worker) {
        self.teardown().await;
        worker.finish();
        self.inner.liveness.notify_waiters();
        tracing::debug!(worker = worker.name(), "worker finished");
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.inner.peer)
            .field("direction", &self.inner.direction)
            .field("alive", &self.which_alive())
            .field("closing", &self.is_closing())
            .finish()
    }
}
