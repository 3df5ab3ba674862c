//! Inbound event pump.
//!
//! Connections queue application events as they arrive and poke the
//! manager's notifier. This task drains every queue and hands each event to
//! the host application, which for the bare daemon means the log.

use tokio::sync::broadcast;

use eventlink_core::{EventPayload, Packet};
use eventlink_services::ConnectionManager;

pub async fn event_pump(manager: ConnectionManager, mut shutdown: broadcast::Receiver<()>) {
    let ready = manager.inbound_ready();
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = ready.notified() => {
                for (peer, packet) in manager.drain_inbound() {
                    deliver(&peer, &packet);
                }
            }
        }
    }
    // Whatever arrived during shutdown still gets logged.
    for (peer, packet) in manager.drain_inbound() {
        deliver(&peer, &packet);
    }
}

fn deliver(peer: &str, packet: &Packet) {
    match packet.decode_body::<EventPayload>() {
        Ok(event) => tracing::info!(
            peer,
            source = %event.source,
            event = %event.name,
            data = %event.data,
            "event received"
        ),
        Err(e) => tracing::warn!(peer, error = %e, "undecodable event body"),
    }
}
