//! Voice channel: control transport, voice transport and heartbeat
//!
//! Network tasks never call into the controller. Control traffic and
//! transport failures arrive as [`NetworkEvent`]s on a channel the controller
//! drains; voice datagrams go straight to a [`VoicePacketHandler`].

use bytes::Bytes;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{lookup_host, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::constants::ENCODED_QUEUE_CAPACITY;
use crate::error::NetworkError;

use super::control::ControlMessage;
use super::packet;
use super::tcp::{run_control_reader, run_control_writer};
use super::udp::{create_voice_socket, run_voice_reader, run_voice_writer};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Session connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    /// Sockets open, identity not yet confirmed
    Connected,
    /// Welcome received, callsign assigned
    Ready,
}

/// Events from the network tasks to the controller
#[derive(Debug, Clone, PartialEq)]
pub enum NetworkEvent {
    Control(ControlMessage),
    /// A transport failed or the server closed the connection
    Closed { reason: Option<String> },
}

/// Receives parsed voice datagrams on the voice receive task
pub trait VoicePacketHandler: Send + Sync {
    fn handle_voice_packet(&self, packet: packet::VoicePacket);
}

/// Server endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub tcp_port: u16,
    pub udp_port: u16,
}

/// Non-blocking handle for queueing voice datagrams
#[derive(Debug, Clone)]
pub struct VoiceSender {
    tx: mpsc::Sender<Bytes>,
}

impl VoiceSender {
    pub(crate) fn from_sender(tx: mpsc::Sender<Bytes>) -> Self {
        Self { tx }
    }

    /// Queue a datagram, dropping it when the queue is full
    pub fn send(&self, datagram: Bytes) -> Result<(), NetworkError> {
        self.tx.try_send(datagram).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                tracing::debug!("Voice send queue full, dropping datagram");
                NetworkError::SendFailed("queue full".into())
            }
            mpsc::error::TrySendError::Closed(_) => NetworkError::Closed,
        })
    }
}

pub struct VoiceChannel {
    running: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<NetworkEvent>,
    control_tx: Option<mpsc::UnboundedSender<String>>,
    voice: Option<VoiceSender>,
    readers: Vec<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
}

impl VoiceChannel {
    pub fn new(events: mpsc::UnboundedSender<NetworkEvent>) -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            events,
            control_tx: None,
            voice: None,
            readers: Vec::new(),
            heartbeat: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Open both transports and send the bearer token
    pub async fn connect(
        &mut self,
        endpoint: &Endpoint,
        token: &str,
        handler: Arc<dyn VoicePacketHandler>,
    ) -> Result<(), NetworkError> {
        self.close();

        let tcp_addr = resolve(&endpoint.host, endpoint.tcp_port).await?;
        let udp_addr = resolve(&endpoint.host, endpoint.udp_port).await?;

        tracing::debug!("Connecting control transport to {}", tcp_addr);
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(tcp_addr))
            .await
            .map_err(|_| NetworkError::ConnectionFailed(format!("{} timed out", tcp_addr)))?
            .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))?;
        stream
            .set_nodelay(true)
            .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))?;

        tracing::debug!("Opening voice transport to {}", udp_addr);
        let socket = Arc::new(create_voice_socket(udp_addr)?);

        self.running.store(true, Ordering::SeqCst);
        let (reader, writer) = stream.into_split();

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_control_writer(
            writer,
            control_rx,
            self.events.clone(),
            self.running.clone(),
        ));
        self.readers.push(tokio::spawn(run_control_reader(
            reader,
            self.events.clone(),
            self.running.clone(),
        )));

        let (voice_tx, voice_rx) = mpsc::channel(ENCODED_QUEUE_CAPACITY);
        tokio::spawn(run_voice_writer(socket.clone(), voice_rx));
        self.readers.push(tokio::spawn(run_voice_reader(
            socket,
            handler,
            self.events.clone(),
            self.running.clone(),
        )));

        // Token goes first, unframed
        control_tx
            .send(format!("{}\n", token))
            .map_err(|_| NetworkError::Closed)?;
        self.control_tx = Some(control_tx);
        self.voice = Some(VoiceSender::from_sender(voice_tx));

        tracing::info!("Connected to voice server {}", endpoint.host);
        Ok(())
    }

    pub fn send_control(&self, message: &ControlMessage) -> Result<(), NetworkError> {
        let tx = self.control_tx.as_ref().ok_or(NetworkError::NotConnected)?;
        let line = message
            .to_line()
            .map_err(|e| NetworkError::SendFailed(e.to_string()))?;
        tx.send(line).map_err(|_| NetworkError::Closed)
    }

    pub fn send_voice(&self, datagram: Bytes) -> Result<(), NetworkError> {
        self.voice.as_ref().ok_or(NetworkError::NotConnected)?.send(datagram)
    }

    /// Cloneable sender for the capture path
    pub fn voice_sender(&self) -> Option<VoiceSender> {
        self.voice.clone()
    }

    /// Ping plus an empty voice datagram every `interval`; no pong timeout is enforced
    pub fn start_heartbeat(&mut self, cid: i32, callsign: &str, interval: Duration) {
        self.stop_heartbeat();
        let (Some(control), Some(voice)) = (self.control_tx.clone(), self.voice.clone()) else {
            return;
        };

        let keepalive = match packet::keepalive(cid, 0, 0, callsign) {
            Ok(datagram) => datagram,
            Err(e) => {
                tracing::error!("Cannot build heartbeat datagram: {}", e);
                return;
            }
        };
        let callsign = callsign.to_string();
        let running = self.running.clone();

        self.heartbeat = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                match ControlMessage::ping(cid, &callsign).to_line() {
                    Ok(line) => {
                        if control.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::error!("Failed to encode ping: {}", e),
                }
                let _ = voice.send(keepalive.clone());
                tracing::trace!("Heartbeat sent");
            }
        }));
        tracing::debug!("Heartbeat started");
    }

    pub fn stop_heartbeat(&mut self) {
        if let Some(handle) = self.heartbeat.take() {
            handle.abort();
            tracing::debug!("Heartbeat stopped");
        }
    }

    /// Stop loops and release both transports; idempotent
    ///
    /// Queued control lines are still flushed by the writer before the
    /// control socket closes.
    pub fn close(&mut self) {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        self.stop_heartbeat();
        for reader in self.readers.drain(..) {
            reader.abort();
        }
        self.control_tx = None;
        self.voice = None;
        if was_running {
            tracing::info!("Voice channel closed");
        }
    }
}

impl Drop for VoiceChannel {
    fn drop(&mut self) {
        self.close();
    }
}

async fn resolve(host: &str, port: u16) -> Result<SocketAddr, NetworkError> {
    lookup_host((host, port))
        .await
        .map_err(|e| NetworkError::ConnectionFailed(format!("{}:{}: {}", host, port, e)))?
        .next()
        .ok_or_else(|| NetworkError::ConnectionFailed(format!("{}:{} did not resolve", host, port)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::control::MessageType;
    use crate::network::packet::VoicePacket;
    use parking_lot::Mutex;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::{TcpListener, UdpSocket};

    #[derive(Default)]
    struct Collect(Mutex<Vec<VoicePacket>>);

    impl VoicePacketHandler for Collect {
        fn handle_voice_packet(&self, packet: VoicePacket) {
            self.0.lock().push(packet);
        }
    }

    async fn server() -> (TcpListener, UdpSocket, Endpoint) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let udp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let endpoint = Endpoint {
            host: "127.0.0.1".into(),
            tcp_port: listener.local_addr().unwrap().port(),
            udp_port: udp.local_addr().unwrap().port(),
        };
        (listener, udp, endpoint)
    }

    #[tokio::test]
    async fn test_token_then_messages_then_voice() {
        let (listener, udp, endpoint) = server().await;
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let handler = Arc::new(Collect::default());
        let mut channel = VoiceChannel::new(events_tx);

        channel.connect(&endpoint, "secret-token", handler.clone()).await.unwrap();
        assert!(channel.is_connected());

        let (stream, _) = listener.accept().await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "secret-token");

        channel
            .send_control(&ControlMessage::switch(1, "CES123", 0, "122800:1".into()))
            .unwrap();
        let line = lines.next_line().await.unwrap().unwrap();
        assert_eq!(ControlMessage::parse(line.as_bytes()).unwrap().kind, MessageType::Switch);

        // Server to client control
        write
            .write_all(b"{\"type\":\"message\",\"data\":\"SERVER:Welcome\"}\n")
            .await
            .unwrap();
        match events_rx.recv().await.unwrap() {
            NetworkEvent::Control(message) => assert_eq!(message.data, "SERVER:Welcome"),
            other => panic!("unexpected event {:?}", other),
        }

        // Client to server voice, then server back to client
        channel.send_voice(packet::keepalive(1, 0, 0, "CES123").unwrap()).unwrap();
        let mut buf = [0u8; 1500];
        let (n, client_addr) = udp.recv_from(&mut buf).await.unwrap();
        assert_eq!(VoicePacket::parse(&buf[..n]).unwrap().callsign, "CES123");

        let datagram = packet::build(2, 1, 122800, "UAL123", &[9, 9]).unwrap();
        udp.send_to(&datagram, client_addr).await.unwrap();
        udp.send_to(&[1, 2, 3], client_addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let received = handler.0.lock().clone();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].callsign, "UAL123");

        channel.close();
        channel.close();
        assert!(!channel.is_connected());
        assert!(matches!(channel.send_voice(Bytes::new()), Err(NetworkError::NotConnected)));
    }

    #[tokio::test]
    async fn test_heartbeat_sends_ping_and_keepalive_until_closed() {
        let (listener, udp, endpoint) = server().await;
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let mut channel = VoiceChannel::new(events_tx);
        channel.connect(&endpoint, "t", Arc::new(Collect::default())).await.unwrap();

        let (stream, _) = listener.accept().await.unwrap();
        let mut lines = BufReader::new(stream).lines();
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "t");

        channel.start_heartbeat(7, "CES123", Duration::from_millis(50));

        let line = tokio::time::timeout(Duration::from_secs(2), lines.next_line())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let ping = ControlMessage::parse(line.as_bytes()).unwrap();
        assert_eq!(ping.kind, MessageType::Ping);
        assert_eq!(ping.callsign, "CES123");

        let mut buf = [0u8; 1500];
        let n = tokio::time::timeout(Duration::from_secs(2), udp.recv(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 11 + "CES123".len());
        let keepalive = VoicePacket::parse(&buf[..n]).unwrap();
        assert_eq!((keepalive.sender_id, keepalive.frequency), (7, 0));
        assert!(keepalive.payload.is_empty());

        channel.close();
        tokio::time::sleep(Duration::from_millis(100)).await;
        while udp.try_recv(&mut buf).is_ok() {}

        let late = tokio::time::timeout(Duration::from_millis(250), udp.recv(&mut buf)).await;
        assert!(late.is_err(), "heartbeat kept running after close");
    }

    #[tokio::test]
    async fn test_server_close_emits_closed() {
        let (listener, _udp, endpoint) = server().await;
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let mut channel = VoiceChannel::new(events_tx);
        channel.connect(&endpoint, "t", Arc::new(Collect::default())).await.unwrap();

        let (stream, _) = listener.accept().await.unwrap();
        drop(stream);

        let event = tokio::time::timeout(Duration::from_secs(2), events_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, NetworkEvent::Closed { .. }));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let mut channel = VoiceChannel::new(events_tx);
        let endpoint = Endpoint {
            host: "127.0.0.1".into(),
            tcp_port: port,
            udp_port: port,
        };
        let result = channel.connect(&endpoint, "t", Arc::new(Collect::default())).await;
        assert!(matches!(result, Err(NetworkError::ConnectionFailed(_))));
        assert!(!channel.is_connected());
    }
}
