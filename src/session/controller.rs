//! Voice session controller
//!
//! The one place network events meet audio. Owned and driven by a single
//! task: commands are method calls, and [`VoiceSession::poll`] drains network
//! events and runs the periodic sweeps.

use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

use crate::audio::{AudioEngine, DeviceProfile, EncodedFrameConsumer};
use crate::broadcast::{BroadcastMessage, PresenceSink};
use crate::config::AppConfig;
use crate::constants::{ACTIVITY_STALENESS, CONFLICT_WINDOW, FRAME_DURATION, HEARTBEAT_INTERVAL};
use crate::error::{Error, NetworkError};
use crate::network::{
    packet, ConnectionState, ControlMessage, Endpoint, MessageType, NetworkEvent, VoiceChannel,
    VoicePacketHandler,
};
use crate::transmitters::{OutputTarget, Transmitter, TransmitterRegistry};

use super::activity::ActivityTracker;
use super::conflict::ConflictDetector;
use super::events::{emit, SessionEvent, EVENT_QUEUE_CAPACITY};
use super::identity::{parse_welcome, ClientIdentity, Welcome};
use super::outbound::{Outbound, Route};
use super::router::VoiceRouter;

pub struct VoiceSession {
    config: AppConfig,
    identity: ClientIdentity,
    state: ConnectionState,
    registry: Arc<TransmitterRegistry>,
    engine: AudioEngine,
    channel: VoiceChannel,
    network_rx: mpsc::UnboundedReceiver<NetworkEvent>,
    conflict: Arc<ConflictDetector>,
    activity: Arc<ActivityTracker>,
    outbound: Arc<Outbound>,
    router: Arc<VoiceRouter>,
    events_tx: Sender<SessionEvent>,
    events_rx: Receiver<SessionEvent>,
    last_sweep: Instant,
    shut_down: bool,
}

impl VoiceSession {
    /// Build a session with an audio engine on the configured devices
    pub fn new(config: &AppConfig, identity: ClientIdentity) -> Result<Self, Error> {
        let engine = AudioEngine::new(&config.audio)?;
        Ok(Self::with_engine(config, identity, engine))
    }

    pub fn with_engine(config: &AppConfig, identity: ClientIdentity, engine: AudioEngine) -> Self {
        let (events_tx, events_rx) = crossbeam_channel::bounded(EVENT_QUEUE_CAPACITY);
        let (network_tx, network_rx) = mpsc::unbounded_channel();

        let registry = Arc::new(TransmitterRegistry::new());
        let conflict = Arc::new(ConflictDetector::new(CONFLICT_WINDOW));
        let activity = Arc::new(ActivityTracker::new(ACTIVITY_STALENESS));
        let outbound = Arc::new(Outbound::new(events_tx.clone()));

        let router = Arc::new(VoiceRouter::new(
            registry.clone(),
            engine.buses(),
            conflict.clone(),
            activity.clone(),
            engine.input_active_flag(),
            events_tx.clone(),
        ));

        let sink = outbound.clone();
        let consumer: EncodedFrameConsumer = Arc::new(move |frame: Bytes| sink.send_encoded(frame));
        engine.set_encoded_consumer(Some(consumer));

        Self {
            config: config.clone(),
            identity,
            state: ConnectionState::Disconnected,
            registry,
            engine,
            channel: VoiceChannel::new(network_tx),
            network_rx,
            conflict,
            activity,
            outbound,
            router,
            events_tx,
            events_rx,
            last_sweep: Instant::now(),
            shut_down: false,
        }
    }

    pub fn set_presence_sink(&self, sink: Option<Arc<dyn PresenceSink>>) {
        self.router.set_presence_sink(sink);
    }

    /// Session events for the owner to drain
    pub fn events(&self) -> Receiver<SessionEvent> {
        self.events_rx.clone()
    }

    /// Sender for collaborators such as the simulator poller
    pub fn event_sender(&self) -> Sender<SessionEvent> {
        self.events_tx.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    pub fn registry(&self) -> &Arc<TransmitterRegistry> {
        &self.registry
    }

    pub fn engine(&self) -> &AudioEngine {
        &self.engine
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            tracing::info!("Session state {:?} -> {:?}", self.state, state);
            self.state = state;
            emit(&self.events_tx, SessionEvent::StateChanged(state));
        }
    }

    /// Open both transports and send the token; Ready follows the welcome
    pub async fn connect(&mut self) -> Result<(), NetworkError> {
        if self.state != ConnectionState::Disconnected {
            tracing::debug!("Connect ignored in state {:?}", self.state);
            return Ok(());
        }
        self.shut_down = false;
        self.set_state(ConnectionState::Connecting);

        let endpoint = Endpoint {
            host: self.config.server.voice_endpoint.clone(),
            tcp_port: self.config.server.tcp_port,
            udp_port: self.config.server.udp_port,
        };
        let handler: Arc<dyn VoicePacketHandler> = self.router.clone();
        if let Err(e) = self.channel.connect(&endpoint, &self.identity.token, handler).await {
            tracing::error!("Connection to {} failed: {}", endpoint.host, e);
            self.set_state(ConnectionState::Disconnected);
            emit(&self.events_tx, SessionEvent::Error(e.to_string()));
            return Err(e);
        }
        self.set_state(ConnectionState::Connected);

        match packet::keepalive(self.identity.cid, 0, 0, &self.identity.callsign) {
            Ok(datagram) => {
                if let Err(e) = self.channel.send_voice(datagram) {
                    tracing::warn!("Initial keep-alive not sent: {}", e);
                }
            }
            Err(e) => tracing::warn!("Cannot build keep-alive: {}", e),
        }
        Ok(())
    }

    /// Tell the server and tear down
    pub fn disconnect(&mut self) {
        if self.channel.is_connected() {
            if let Err(e) = self.channel.send_control(&ControlMessage::disconnect(self.identity.cid)) {
                tracing::debug!("Disconnect message not sent: {}", e);
            }
        }
        self.teardown();
    }

    /// Back to Disconnected: network first, then audio, then the radios
    fn teardown(&mut self) {
        self.outbound.set_route(None);
        self.channel.close();
        while self.network_rx.try_recv().is_ok() {}
        self.engine.cleanup();
        self.registry.clear();

        for (callsign, frequency) in self.activity.clear() {
            emit(&self.events_tx, SessionEvent::ReceptionEnd { callsign, frequency });
        }
        self.conflict.clear();

        let was_online = self.state != ConnectionState::Disconnected;
        if self.state == ConnectionState::Ready {
            self.router
                .publish(BroadcastMessage::VoiceConnectedState { connected: false });
        }
        self.identity.clear();
        self.set_state(ConnectionState::Disconnected);
        if was_online {
            tracing::info!("Session torn down");
        }
    }

    /// Deterministic teardown; safe to call repeatedly
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.teardown();
        self.engine.shutdown();
        self.shut_down = true;
    }

    /// Announce a transmitter's frequency and receive flag
    fn announce(&self, transmitter: &Transmitter) {
        let message = ControlMessage::switch(
            self.identity.cid,
            &self.identity.callsign,
            transmitter.id,
            transmitter.switch_data(),
        );
        if let Err(e) = self.channel.send_control(&message) {
            tracing::warn!("Switch for transmitter {} not sent: {}", transmitter.id, e);
        }
    }

    /// Zero-length datagram so the server learns this radio's address
    fn register_voice(&self, transmitter: &Transmitter) {
        let datagram = packet::keepalive(
            self.identity.cid,
            transmitter.id,
            transmitter.frequency,
            &self.identity.callsign,
        );
        match datagram {
            Ok(datagram) => {
                if let Err(e) = self.channel.send_voice(datagram) {
                    tracing::debug!("Registration for transmitter {} not sent: {}", transmitter.id, e);
                }
            }
            Err(e) => tracing::warn!("Cannot register transmitter {}: {}", transmitter.id, e),
        }
    }

    /// Point outbound voice at the current sender, or nowhere
    fn refresh_outbound(&self) {
        let route = if self.state == ConnectionState::Ready {
            self.registry
                .sender()
                .filter(Transmitter::is_tuned)
                .and_then(|sender| {
                    self.channel.voice_sender().map(|voice| Route {
                        cid: self.identity.cid,
                        callsign: self.identity.callsign.clone(),
                        transmitter_id: sender.id,
                        frequency: sender.frequency,
                        sender: voice,
                    })
                })
        } else {
            None
        };
        self.outbound.set_route(route);
    }

    /// Register a radio; a device that fails to open leaves its output inactive
    pub fn add_transmitter(&mut self, transmitter: Transmitter) {
        if let Some(previous) = self.registry.insert(transmitter.clone()) {
            self.engine.remove_transmitter(&previous);
        }
        tracing::info!("Transmitter {} added on {}", transmitter.id, transmitter.frequency);
        if let Err(e) = self.engine.add_transmitter(&transmitter) {
            tracing::warn!("Output for transmitter {} not started: {}", transmitter.id, e);
        }

        // Before the welcome there is no callsign; the welcome announces these
        if transmitter.is_tuned() && self.state == ConnectionState::Ready {
            self.register_voice(&transmitter);
            self.announce(&transmitter);
        }
        if transmitter.send_flag {
            emit(
                &self.events_tx,
                SessionEvent::CurrentFrequencyChanged {
                    transmitter_id: transmitter.id,
                    frequency: transmitter.frequency,
                },
            );
        }
        self.refresh_outbound();
    }

    /// Apply a changed transmitter; ignored unless Ready
    pub fn update_transmitter(&mut self, transmitter: Transmitter) {
        if self.state != ConnectionState::Ready {
            tracing::debug!("Update of transmitter {} ignored in state {:?}", transmitter.id, self.state);
            return;
        }
        let Some(previous) = self.registry.update(transmitter.clone()) else {
            tracing::debug!("Update of unknown transmitter {} ignored", transmitter.id);
            return;
        };
        if let Err(e) = self.engine.update_transmitter(&previous, &transmitter) {
            tracing::warn!("Output for transmitter {} not started: {}", transmitter.id, e);
        }

        if transmitter.send_flag && (!previous.send_flag || previous.frequency != transmitter.frequency) {
            emit(
                &self.events_tx,
                SessionEvent::CurrentFrequencyChanged {
                    transmitter_id: transmitter.id,
                    frequency: transmitter.frequency,
                },
            );
        }
        if transmitter.frequency != previous.frequency && transmitter.is_tuned() {
            self.register_voice(&transmitter);
        }
        self.announce(&transmitter);
        self.refresh_outbound();
    }

    pub fn remove_transmitter(&mut self, id: u8) -> Option<Transmitter> {
        let removed = self.registry.remove(id)?;
        self.engine.remove_transmitter(&removed);
        self.refresh_outbound();
        tracing::info!("Transmitter {} removed", id);
        Some(removed)
    }

    pub fn set_ptt(&mut self, pressed: bool) {
        self.engine.set_ptt(pressed);
    }

    /// Send `text` to `target`; ignored unless Ready
    pub fn send_text_message(&self, target: &str, text: &str) -> Result<(), NetworkError> {
        if self.state != ConnectionState::Ready {
            tracing::debug!("Text message ignored in state {:?}", self.state);
            return Ok(());
        }
        self.channel.send_control(&ControlMessage::text(
            self.identity.cid,
            &self.identity.callsign,
            target,
            text,
        ))
    }

    pub fn set_microphone_gain(&self, gain_db: f32) {
        self.engine.set_microphone_gain(gain_db);
    }

    pub fn set_ptt_tones(&mut self, press_freq: f32, release_freq: f32, volume: f32) {
        self.engine.set_ptt_tones(press_freq, release_freq, volume);
    }

    pub fn input_device_changed(&mut self, profile: Option<DeviceProfile>) -> Result<(), Error> {
        Ok(self.engine.input_device_changed(profile)?)
    }

    pub fn output_device_changed(
        &mut self,
        target: OutputTarget,
        profile: Option<DeviceProfile>,
    ) -> Result<(), Error> {
        Ok(self.engine.output_device_changed(target, profile)?)
    }

    pub fn start_device_test(&mut self) -> Result<(), Error> {
        Ok(self.engine.start_device_test()?)
    }

    pub fn stop_device_test(&mut self) {
        self.engine.stop_device_test();
    }

    /// Drain network events and run due sweeps; call at least once per frame
    pub fn poll(&mut self) {
        while let Ok(event) = self.network_rx.try_recv() {
            self.handle_network_event(event);
        }

        let now = Instant::now();
        if now.saturating_duration_since(self.last_sweep) >= FRAME_DURATION {
            self.last_sweep = now;
            self.sweep(now);
        }
    }

    fn sweep(&self, now: Instant) {
        self.conflict.sweep(now);
        let ended = self.activity.sweep(now);
        if ended.is_empty() {
            return;
        }
        let active = self.activity.active_callsigns();
        for (callsign, frequency) in ended {
            tracing::debug!("Reception from {} on {} ended", callsign, frequency);
            self.router
                .publish(BroadcastMessage::rx_end(active.clone(), &callsign, frequency));
            emit(&self.events_tx, SessionEvent::ReceptionEnd { callsign, frequency });
        }
    }

    fn handle_network_event(&mut self, event: NetworkEvent) {
        match event {
            NetworkEvent::Control(message) => self.handle_control(message),
            NetworkEvent::Closed { reason } => {
                if self.state == ConnectionState::Disconnected {
                    return;
                }
                let reason = reason.unwrap_or_else(|| "connection closed".to_string());
                tracing::warn!("Voice connection lost: {}", reason);
                emit(&self.events_tx, SessionEvent::Error(reason));
                self.teardown();
            }
        }
    }

    fn handle_control(&mut self, message: ControlMessage) {
        match message.kind {
            MessageType::Error => {
                tracing::warn!("Server error: {}", message.data);
                emit(&self.events_tx, SessionEvent::Error(message.data));
            }
            MessageType::Pong => tracing::debug!("Pong {}", message.data),
            MessageType::Ping => tracing::trace!("Server ping {}", message.data),
            MessageType::Message => match parse_welcome(&message.data) {
                Some(welcome) => self.handle_welcome(welcome),
                None => emit(
                    &self.events_tx,
                    SessionEvent::MessageReceived {
                        callsign: message.callsign,
                        text: message.data,
                    },
                ),
            },
            MessageType::Disconnect => {
                tracing::info!("Server requested disconnect");
                self.teardown();
            }
            MessageType::Switch | MessageType::TextReceive | MessageType::VoiceReceive => {
                tracing::debug!("{:?} from {}: {}", message.kind, message.callsign, message.data);
            }
        }
    }

    fn handle_welcome(&mut self, welcome: Welcome) {
        if self.state != ConnectionState::Connected {
            tracing::debug!("Welcome ignored in state {:?}", self.state);
            return;
        }

        self.identity.apply_welcome(&welcome);
        if !self.identity.is_valid() {
            tracing::error!("Welcome left an invalid identity: {:?}", self.identity);
            emit(&self.events_tx, SessionEvent::Error("invalid identity".to_string()));
            return;
        }
        tracing::info!(
            "Welcome as {} (controller: {}, main frequency {})",
            self.identity.callsign,
            self.identity.is_controller,
            self.identity.main_frequency
        );

        if let Err(e) = self.engine.start() {
            tracing::warn!("Microphone not started: {}", e);
            emit(&self.events_tx, SessionEvent::Error(e.to_string()));
        }
        self.set_state(ConnectionState::Ready);
        self.channel
            .start_heartbeat(self.identity.cid, &self.identity.callsign, HEARTBEAT_INTERVAL);
        self.router
            .publish(BroadcastMessage::VoiceConnectedState { connected: true });

        for transmitter in self.registry.all().iter().filter(|t| t.is_tuned()) {
            self.register_voice(transmitter);
            self.announce(transmitter);
        }
        self.refresh_outbound();
    }
}

impl Drop for VoiceSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::StreamArgs;
    use crate::network::LineBuffer;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream, UdpSocket};

    fn session(config: &AppConfig) -> VoiceSession {
        let args = StreamArgs::default();
        let engine =
            AudioEngine::with_args(&config.audio, args.clone(), args.clone(), args).unwrap();
        VoiceSession::with_engine(config, ClientIdentity::new(1001, "secret"), engine)
    }

    fn drain(session: &VoiceSession) -> Vec<SessionEvent> {
        session.events().try_iter().collect()
    }

    async fn read_line(stream: &mut TcpStream, lines: &mut LineBuffer) -> String {
        loop {
            if let Some(line) = lines.next_line() {
                return String::from_utf8(line.to_vec()).unwrap();
            }
            let mut buf = [0u8; 1024];
            let n = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf))
                .await
                .unwrap()
                .unwrap();
            assert!(n > 0, "server side closed");
            lines.extend(&buf[..n]);
        }
    }

    async fn poll_until(session: &mut VoiceSession, state: ConnectionState) {
        for _ in 0..200 {
            session.poll();
            if session.state() == state {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("session stuck in {:?}", session.state());
    }

    /// Loopback server end of one session
    struct Server {
        listener: TcpListener,
        voice: UdpSocket,
        stream: Option<TcpStream>,
        lines: LineBuffer,
    }

    impl Server {
        async fn bind() -> (Self, AppConfig) {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let voice = UdpSocket::bind("127.0.0.1:0").await.unwrap();
            let mut config = AppConfig::default();
            config.server.voice_endpoint = "127.0.0.1".into();
            config.server.tcp_port = listener.local_addr().unwrap().port();
            config.server.udp_port = voice.local_addr().unwrap().port();
            let server = Self {
                listener,
                voice,
                stream: None,
                lines: LineBuffer::default(),
            };
            (server, config)
        }

        /// Accept the client and consume its token line
        async fn accept(&mut self) {
            let (stream, _) = self.listener.accept().await.unwrap();
            self.stream = Some(stream);
            self.lines = LineBuffer::default();
            assert_eq!(self.read_line().await, "secret");
        }

        async fn read_line(&mut self) -> String {
            let stream = self.stream.as_mut().unwrap();
            read_line(stream, &mut self.lines).await
        }

        async fn read_message(&mut self) -> ControlMessage {
            ControlMessage::parse(self.read_line().await.as_bytes()).unwrap()
        }

        async fn write(&mut self, line: &str) {
            let stream = self.stream.as_mut().unwrap();
            stream.write_all(line.as_bytes()).await.unwrap();
        }

        async fn welcome(&mut self) {
            let welcome = ControlMessage::new(MessageType::Message, 0, "SERVER")
                .with_data("SERVER:N123AB:Welcome to the network:122800")
                .to_line()
                .unwrap();
            self.write(&welcome).await;
        }
    }

    async fn ready(server: &mut Server, config: &AppConfig) -> VoiceSession {
        let mut session = session(config);
        session.connect().await.unwrap();
        server.accept().await;
        server.welcome().await;
        poll_until(&mut session, ConnectionState::Ready).await;
        session
    }

    #[test]
    fn test_shutdown_twice() {
        let mut session = session(&AppConfig::default());
        session.shutdown();
        session.shutdown();
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(!session.engine().is_input_running());
    }

    #[test]
    fn test_not_ready_commands_are_noops() {
        let mut session = session(&AppConfig::default());
        session.add_transmitter(Transmitter::new(0, 122800));

        session.update_transmitter(Transmitter::new(0, 121500).with_send(true));
        assert_eq!(session.registry().get(0).unwrap().frequency, 122800);
        session.send_text_message("DAL456", "hello").unwrap();
        assert!(!drain(&session)
            .iter()
            .any(|e| matches!(e, SessionEvent::CurrentFrequencyChanged { .. })));
    }

    #[test]
    fn test_remove_transmitter() {
        let mut session = session(&AppConfig::default());
        session.add_transmitter(Transmitter::new(3, 122800));
        assert!(session.registry().by_frequency(122800).is_some());
        assert_eq!(session.remove_transmitter(3).map(|t| t.id), Some(3));
        assert!(session.registry().by_frequency(122800).is_none());
        assert!(session.remove_transmitter(3).is_none());
    }

    #[test]
    fn test_unopenable_output_keeps_transmitter() {
        let config = AppConfig::default();
        let missing = StreamArgs {
            device: Some("no such output device".into()),
            ..StreamArgs::default()
        };
        let engine =
            AudioEngine::with_args(&config.audio, StreamArgs::default(), missing.clone(), missing)
                .unwrap();
        let mut session =
            VoiceSession::with_engine(&config, ClientIdentity::new(1001, "secret"), engine);

        session.add_transmitter(Transmitter::new(0, 122800).with_receive(true));

        assert_eq!(session.registry().by_frequency(122800).map(|t| t.id), Some(0));
        assert!(session.engine().buses().get(OutputTarget::Headphone).contains(0));
        assert!(!session.engine().is_mixer_running(OutputTarget::Headphone));
    }

    #[tokio::test]
    async fn test_connect_refused_stays_disconnected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut config = AppConfig::default();
        config.server.tcp_port = port;
        config.server.udp_port = port;
        let mut session = session(&config);

        assert!(session.connect().await.is_err());
        assert_eq!(session.state(), ConnectionState::Disconnected);
        let events = drain(&session);
        assert!(events.contains(&SessionEvent::StateChanged(ConnectionState::Connecting)));
        assert!(events.iter().any(|e| matches!(e, SessionEvent::Error(_))));
    }

    #[tokio::test]
    async fn test_welcome_makes_ready_and_announces() {
        let (mut server, config) = Server::bind().await;
        let mut session = session(&config);
        session.add_transmitter(Transmitter::new(0, 122800).with_receive(true).with_send(true));

        session.connect().await.unwrap();
        assert_eq!(session.state(), ConnectionState::Connected);
        server.accept().await;

        // Connect keep-alive: transmitter 0, frequency 0, empty payload
        let mut buf = [0u8; 512];
        let n = tokio::time::timeout(Duration::from_secs(2), server.voice.recv(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let keepalive = packet::VoicePacket::parse(&buf[..n]).unwrap();
        assert_eq!((keepalive.sender_id, keepalive.frequency), (1001, 0));
        assert!(keepalive.payload.is_empty());

        server.welcome().await;
        poll_until(&mut session, ConnectionState::Ready).await;

        assert_eq!(session.identity().callsign, "N123AB");
        assert!(session.identity().is_controller);
        assert_eq!(session.identity().main_frequency, 122800);

        let switch = server.read_message().await;
        assert_eq!(switch.kind, MessageType::Switch);
        assert_eq!(switch.callsign, "N123AB");
        assert_eq!(switch.data, "122800:1");

        let events = drain(&session);
        assert!(events.contains(&SessionEvent::StateChanged(ConnectionState::Ready)));

        // Ready now: updates go out
        session.update_transmitter(Transmitter::new(0, 121500).with_receive(false).with_send(true));
        assert_eq!(server.read_message().await.data, "121500:0");
        assert!(drain(&session).contains(&SessionEvent::CurrentFrequencyChanged {
            transmitter_id: 0,
            frequency: 121500
        }));

        session.send_text_message("DAL456", "hello").unwrap();
        let text = server.read_message().await;
        assert_eq!(text.kind, MessageType::Message);
        assert_eq!(text.data, "DAL456:hello");

        session.disconnect();
        assert_eq!(server.read_message().await.kind, MessageType::Disconnect);
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(session.identity().callsign.is_empty());
        assert_eq!(session.identity().cid, 1001);
        assert!(session.registry().is_empty());
        assert!(session.registry().by_frequency(121500).is_none());

        session.shutdown();
        session.shutdown();
    }

    #[tokio::test]
    async fn test_transmitter_added_when_ready_is_announced() {
        let (mut server, config) = Server::bind().await;
        let mut session = ready(&mut server, &config).await;

        session.add_transmitter(Transmitter::new(2, 121500).with_receive(true));
        let switch = server.read_message().await;
        assert_eq!(switch.kind, MessageType::Switch);
        assert_eq!(switch.transmitter, 2);
        assert_eq!(switch.data, "121500:1");
    }

    #[tokio::test]
    async fn test_server_error_message_surfaces() {
        let (mut server, config) = Server::bind().await;
        let mut session = ready(&mut server, &config).await;
        drain(&session);

        server.write("{\"type\":\"error\",\"data\":\"x\"}\n").await;
        let mut surfaced = false;
        for _ in 0..200 {
            session.poll();
            if drain(&session).contains(&SessionEvent::Error("x".into())) {
                surfaced = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(surfaced);
        assert_eq!(session.state(), ConnectionState::Ready);
    }

    #[tokio::test]
    async fn test_server_disconnect_message_tears_down() {
        let (mut server, config) = Server::bind().await;
        let mut session = ready(&mut server, &config).await;
        session.add_transmitter(Transmitter::new(0, 122800).with_receive(true).with_send(true));
        assert_eq!(server.read_message().await.kind, MessageType::Switch);

        server.write("{\"type\":\"disconnect\"}\n").await;
        poll_until(&mut session, ConnectionState::Disconnected).await;

        assert!(session.registry().is_empty());
        assert!(session.registry().by_frequency(122800).is_none());
        assert!(session.identity().callsign.is_empty());
        assert!(!session.engine().is_input_running());
    }

    #[tokio::test]
    async fn test_disconnect_discards_pending_network_events() {
        let (mut server, config) = Server::bind().await;
        let mut session = session(&config);
        session.connect().await.unwrap();
        server.accept().await;

        // Delivered but never polled
        server.welcome().await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        session.disconnect();

        session.connect().await.unwrap();
        server.accept().await;
        for _ in 0..20 {
            session.poll();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(session.state(), ConnectionState::Connected);
        assert!(session.identity().callsign.is_empty());
    }

    #[tokio::test]
    async fn test_server_close_tears_down() {
        let (mut server, config) = Server::bind().await;
        let mut session = session(&config);

        session.connect().await.unwrap();
        server.accept().await;
        server.stream = None;

        poll_until(&mut session, ConnectionState::Disconnected).await;
        assert!(drain(&session).iter().any(|e| matches!(e, SessionEvent::Error(_))));
    }
}
