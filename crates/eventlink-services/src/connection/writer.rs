//! Writer worker. Drains the outbound queue onto the stream in FIFO order.

use std::io;

use bytes::BytesMut;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use eventlink_core::Packet;

use super::Connection;

/// Scratch buffers above this are released after the write.
const SCRATCH_KEEP: usize = 64 * 1024;

pub(super) async fn run(conn: Connection, mut rx: mpsc::UnboundedReceiver<Packet>) {
    let worker = &conn.inner.writer;
    let poll = conn.settings().write_poll;
    let mut scratch = BytesMut::new();

    while !worker.is_cancelled() {
        let packet = tokio::select! {
            _ = worker.cancelled() => break,
            next = tokio::time::timeout(poll, rx.recv()) => match next {
                Ok(Some(packet)) => packet,
                // Every sender is gone; nothing more can be queued.
                Ok(None) => break,
                Err(_) => continue,
            },
        };

        // Each frame is encoded from a clean buffer so nothing from an
        // earlier write can leak into the next one.
        scratch.clear();
        packet.encode_into(&mut scratch);

        let written = tokio::select! {
            _ = worker.cancelled() => break,
            r = write_frame(&conn, &scratch) => r,
        };

        if let Err(e) = written {
            if is_disconnect(&e) {
                tracing::debug!(peer = %conn.peer(), error = %e, "peer went away during write");
            } else {
                tracing::warn!(peer = %conn.peer(), error = %e, "write failed");
            }
            worker.kill();
            break;
        }

        if scratch.capacity() > SCRATCH_KEEP {
            scratch = BytesMut::new();
        }
    }

    conn.worker_exited(worker).await;
}

async fn write_frame(conn: &Connection, frame: &[u8]) -> io::Result<()> {
    let mut guard = conn.inner.output.lock().await;
    let Some(output) = guard.as_mut() else {
        return Err(io::ErrorKind::NotConnected.into());
    };
    output.write_all(frame).await?;
    output.flush().await
}

fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    )
}
