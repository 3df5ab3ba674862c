//! Reader worker. Decodes frames off the stream and dispatches them.
//!
//! Route updates are applied to the routing tables directly; events are
//! queued for [`Connection::receive`]. Anything the reader cannot make
//! sense of ends the connection.

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, ReadHalf};

use eventlink_core::wire::{decode_frame, WireError};
use eventlink_core::{EventPayload, Packet, PacketKind, RouteUpdate};

use super::{Connection, PeerStream};

const READ_CHUNK: usize = 8 * 1024;

pub(super) async fn run(conn: Connection, mut input: ReadHalf<PeerStream>) {
    let worker = &conn.inner.reader;
    let poll = conn.settings().read_poll;
    let mut buf = BytesMut::with_capacity(READ_CHUNK);

    'outer: while !worker.is_cancelled() {
        // Drain whatever is already buffered before blocking again.
        loop {
            if worker.is_cancelled() {
                break 'outer;
            }
            match decode_frame(&mut buf) {
                Ok(Some(packet)) => {
                    if let Err(e) = accept(&conn, packet) {
                        tracing::warn!(peer = %conn.peer(), error = %e, "bad packet from peer");
                        worker.kill();
                        break 'outer;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(peer = %conn.peer(), error = %e, "undecodable frame from peer");
                    worker.kill();
                    break 'outer;
                }
            }
        }

        buf.reserve(READ_CHUNK);
        let read = tokio::select! {
            _ = worker.cancelled() => break,
            r = tokio::time::timeout(poll, input.read_buf(&mut buf)) => r,
        };

        match read {
            // Poll window elapsed; re-check cancellation.
            Err(_) => continue,
            Ok(Ok(0)) => {
                tracing::debug!(peer = %conn.peer(), "peer closed the stream");
                worker.kill();
                break;
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                tracing::debug!(peer = %conn.peer(), error = %e, "read failed");
                worker.kill();
                break;
            }
        }
    }

    conn.worker_exited(worker).await;
}

/// Route one decoded packet.
fn accept(conn: &Connection, packet: Packet) -> Result<(), WireError> {
    match packet.kind {
        PacketKind::RouteUpdate => {
            let update: RouteUpdate = packet.decode_body()?;
            match conn.apply_route(&update) {
                Some(changed) => tracing::trace!(
                    peer = %conn.peer(),
                    table = %update.table,
                    key = %update.key,
                    op = ?update.op,
                    changed,
                    "route update"
                ),
                None => tracing::trace!(peer = %conn.peer(), "route update after close, dropped"),
            }
            Ok(())
        }
        PacketKind::Event => {
            // Validate now so consumers never see a body they cannot parse.
            let _: EventPayload = packet.decode_body()?;
            conn.push_inbound(packet);
            Ok(())
        }
        PacketKind::Hello => Err(WireError::UnexpectedKind(PacketKind::Hello)),
    }
}
