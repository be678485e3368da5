//! Control transport tasks

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;

use super::channel::NetworkEvent;
use super::control::{ControlMessage, LineBuffer};

const READ_CHUNK: usize = 4096;

/// Read newline-delimited control messages until the socket closes
pub(crate) async fn run_control_reader(
    mut reader: OwnedReadHalf,
    events: mpsc::UnboundedSender<NetworkEvent>,
    running: Arc<AtomicBool>,
) {
    let mut lines = LineBuffer::default();
    let mut chunk = [0u8; READ_CHUNK];

    let reason = loop {
        if !running.load(Ordering::SeqCst) {
            return;
        }

        let n = match reader.read(&mut chunk).await {
            Ok(0) => break None,
            Ok(n) => n,
            Err(e) => break Some(e.to_string()),
        };
        tracing::trace!("Control transport received {} bytes", n);

        lines.extend(&chunk[..n]);
        while let Some(line) = lines.next_line() {
            if line.is_empty() {
                continue;
            }
            match ControlMessage::parse(&line) {
                Ok(message) => {
                    let _ = events.send(NetworkEvent::Control(message));
                }
                Err(e) => tracing::error!("Failed to parse control message: {}", e),
            }
        }
    };

    // A close we initiated is not an event
    if running.load(Ordering::SeqCst) {
        match &reason {
            Some(e) => tracing::error!("Control transport receive error: {}", e),
            None => tracing::info!("Control transport closed by server"),
        }
        let _ = events.send(NetworkEvent::Closed { reason });
    }
}

/// Write queued lines in order; ends when every sender is dropped
pub(crate) async fn run_control_writer(
    mut writer: OwnedWriteHalf,
    mut lines: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<NetworkEvent>,
    running: Arc<AtomicBool>,
) {
    while let Some(line) = lines.recv().await {
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            tracing::error!("Failed to send control message: {}", e);
            if running.load(Ordering::SeqCst) {
                let _ = events.send(NetworkEvent::Closed {
                    reason: Some(e.to_string()),
                });
            }
            return;
        }
    }
    let _ = writer.shutdown().await;
}
