//! EventLink integration test harness.
//!
//! Every test starts its nodes in-process on loopback TCP with short poll
//! intervals, so no external setup is needed:
//!
//!   cargo test --test integration
//!
//! Each test owns its nodes and stops them before returning.

mod events;
mod failures;
mod infra;
mod routes;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use eventlink_core::{EventPayload, Packet};
use eventlink_services::{
    replication, transport, ConnectionManager, ConnectionSettings, RoutingTableManager,
    TcpTransport, TrustStore,
};

// ── Harness ───────────────────────────────────────────────────────────────────

pub fn fast_settings() -> ConnectionSettings {
    ConnectionSettings {
        read_poll: Duration::from_millis(50),
        write_poll: Duration::from_millis(50),
        join_grace: Duration::from_millis(500),
        handshake_timeout: Duration::from_secs(2),
    }
}

/// One mesh server running inside the test process.
pub struct Node {
    pub name: String,
    pub addr: SocketAddr,
    pub routes: RoutingTableManager,
    pub manager: ConnectionManager,
    pub trust: TrustStore,
    shutdown: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

impl Node {
    /// Bind an ephemeral loopback port and start the listener and the route
    /// broadcaster.
    pub async fn start(name: &str) -> Result<Node> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("failed to bind loopback listener")?;
        let addr = listener.local_addr()?;
        let settings = fast_settings();

        let trust = TrustStore::new();
        let (route_tx, route_rx) = mpsc::unbounded_channel();
        let routes =
            RoutingTableManager::new(name, Duration::from_secs(30)).publishing_to(route_tx);
        let tcp = TcpTransport::new(name, trust.clone(), settings.handshake_timeout);
        let manager = ConnectionManager::new(routes.clone(), Arc::new(tcp.clone()), settings);

        let (shutdown, _) = broadcast::channel(1);
        let tasks = vec![
            tokio::spawn(transport::serve(
                listener,
                tcp,
                manager.clone(),
                shutdown.subscribe(),
            )),
            tokio::spawn(replication::route_broadcast_loop(
                manager.clone(),
                route_rx,
                shutdown.subscribe(),
            )),
        ];

        routes.add_entry("servers", name);

        Ok(Node {
            name: name.to_string(),
            addr,
            routes,
            manager,
            trust,
            shutdown,
            tasks,
        })
    }

    /// Trust `other` at its current address.
    pub fn trusts(&self, other: &Node) {
        self.trust.trust(&other.name, &other.addr.to_string());
    }

    /// Drain inbound events until `count` have arrived from any peer.
    pub async fn events(&self, count: usize) -> Result<Vec<(String, EventPayload)>> {
        let mut got = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(5);
        while got.len() < count {
            for (peer, packet) in self.manager.drain_inbound() {
                got.push((peer, decode_event(&packet)?));
            }
            if Instant::now() > deadline {
                bail!("{}: expected {count} events, got {}", self.name, got.len());
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Ok(got)
    }

    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        self.manager.stop(Duration::from_secs(1)).await;
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

fn decode_event(packet: &Packet) -> Result<EventPayload> {
    packet.decode_body().context("event body did not decode")
}

/// Mutual trust, then `a` dials `b`. Returns once both ends see the link.
pub async fn link(a: &Node, b: &Node) -> Result<()> {
    a.trusts(b);
    b.trusts(a);
    a.manager.check_trusted(&a.trust);
    wait_until(&format!("{} <-> {}", a.name, b.name), || {
        a.manager.is_connected(&b.name) && b.manager.is_connected(&a.name)
    })
    .await
}

/// Poll `check` every 10ms for up to 5s.
pub async fn wait_until(what: &str, mut check: impl FnMut() -> bool) -> Result<()> {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !check() {
        if Instant::now() > deadline {
            bail!("timed out waiting for: {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}
