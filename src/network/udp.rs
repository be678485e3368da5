//! Voice transport socket and tasks

use bytes::Bytes;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use crate::constants::MAX_DATAGRAM_SIZE;
use crate::error::NetworkError;

use super::channel::{NetworkEvent, VoicePacketHandler};
use super::packet::VoicePacket;

/// Kernel buffer size for voice traffic
const SOCKET_BUFFER_SIZE: usize = 256 * 1024;

/// Bind an ephemeral UDP socket connected to the server's voice port
pub fn create_voice_socket(server: SocketAddr) -> Result<UdpSocket, NetworkError> {
    let domain = if server.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

    socket
        .set_recv_buffer_size(SOCKET_BUFFER_SIZE)
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
    socket
        .set_send_buffer_size(SOCKET_BUFFER_SIZE)
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
    socket
        .set_nonblocking(true)
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

    let bind_addr: SocketAddr = if server.is_ipv4() {
        "0.0.0.0:0".parse().map_err(|_| NetworkError::BindFailed("bad bind address".into()))?
    } else {
        "[::]:0".parse().map_err(|_| NetworkError::BindFailed("bad bind address".into()))?
    };
    socket
        .bind(&bind_addr.into())
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
    socket
        .connect(&server.into())
        .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))?;

    UdpSocket::from_std(socket.into()).map_err(|e| NetworkError::BindFailed(e.to_string()))
}

/// Parse and dispatch datagrams until the socket fails
pub(crate) async fn run_voice_reader(
    socket: Arc<UdpSocket>,
    handler: Arc<dyn VoicePacketHandler>,
    events: mpsc::UnboundedSender<NetworkEvent>,
    running: Arc<AtomicBool>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    while running.load(Ordering::SeqCst) {
        let n = match socket.recv(&mut buf).await {
            Ok(n) => n,
            Err(e) => {
                // ICMP port unreachable surfaces here on some platforms
                if e.kind() == std::io::ErrorKind::ConnectionRefused {
                    tracing::debug!("Voice transport: server port unreachable");
                    continue;
                }
                if running.load(Ordering::SeqCst) {
                    tracing::error!("Voice transport receive error: {}", e);
                    let _ = events.send(NetworkEvent::Closed {
                        reason: Some(e.to_string()),
                    });
                }
                return;
            }
        };

        match VoicePacket::parse(&buf[..n]) {
            Ok(packet) => {
                tracing::trace!(
                    "Voice packet from {} (cid {}, freq {}), {} bytes",
                    packet.callsign,
                    packet.sender_id,
                    packet.frequency,
                    packet.payload.len()
                );
                handler.handle_voice_packet(packet);
            }
            Err(e) => tracing::trace!("Dropped datagram of {} bytes: {}", n, e),
        }
    }
}

/// Send queued datagrams; ends when every sender is dropped
pub(crate) async fn run_voice_writer(socket: Arc<UdpSocket>, mut datagrams: mpsc::Receiver<Bytes>) {
    while let Some(datagram) = datagrams.recv().await {
        if let Err(e) = socket.send(&datagram).await {
            tracing::warn!("Failed to send voice packet: {}", e);
        }
    }
}
