//! Inbound voice routing
//!
//! Runs on the voice receive task: frequency lookup, receive activity,
//! conflict check, then decode into the transmitter's mixer channel.

use crossbeam_channel::Sender;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::audio::MixerBuses;
use crate::broadcast::{BroadcastMessage, PresenceSink};
use crate::network::{VoicePacket, VoicePacketHandler};
use crate::transmitters::TransmitterRegistry;

use super::activity::ActivityTracker;
use super::conflict::ConflictDetector;
use super::events::{emit, SessionEvent};

pub struct VoiceRouter {
    registry: Arc<TransmitterRegistry>,
    buses: MixerBuses,
    conflict: Arc<ConflictDetector>,
    activity: Arc<ActivityTracker>,
    /// Push-to-talk pressed
    ptt: Arc<AtomicBool>,
    events: Sender<SessionEvent>,
    presence: RwLock<Option<Arc<dyn PresenceSink>>>,
}

impl VoiceRouter {
    pub fn new(
        registry: Arc<TransmitterRegistry>,
        buses: MixerBuses,
        conflict: Arc<ConflictDetector>,
        activity: Arc<ActivityTracker>,
        ptt: Arc<AtomicBool>,
        events: Sender<SessionEvent>,
    ) -> Self {
        Self {
            registry,
            buses,
            conflict,
            activity,
            ptt,
            events,
            presence: RwLock::new(None),
        }
    }

    pub fn set_presence_sink(&self, sink: Option<Arc<dyn PresenceSink>>) {
        *self.presence.write() = sink;
    }

    pub(crate) fn publish(&self, message: BroadcastMessage) {
        if let Some(sink) = self.presence.read().as_ref() {
            sink.publish(message);
        }
    }

    /// Local user is keyed on `frequency`
    fn sending_on(&self, frequency: u32) -> bool {
        self.ptt.load(Ordering::SeqCst)
            && self
                .registry
                .sender()
                .map_or(false, |sender| sender.frequency == frequency)
    }

    fn route(&self, packet: VoicePacket, now: Instant) {
        if packet.payload.is_empty() {
            return;
        }

        let Some(transmitter) = self.registry.by_frequency(packet.frequency) else {
            tracing::trace!("No transmitter on {}, dropping packet from {}", packet.frequency, packet.callsign);
            return;
        };

        if self.activity.record(&packet.callsign, packet.frequency, now) {
            tracing::debug!("Receiving {} on {}", packet.callsign, packet.frequency);
            emit(
                &self.events,
                SessionEvent::ReceptionBegin {
                    callsign: packet.callsign.clone(),
                    frequency: packet.frequency,
                },
            );
            self.publish(BroadcastMessage::rx_begin(
                self.activity.active_callsigns(),
                &packet.callsign,
                packet.frequency,
            ));
        }

        if !transmitter.receive_flag || transmitter.volume <= 0.0 {
            return;
        }

        let conflict = self.conflict.check(
            packet.frequency,
            &packet.callsign,
            self.sending_on(packet.frequency),
            now,
        );
        self.buses
            .get(transmitter.output_target)
            .play_encoded_audio(transmitter.id, &packet.payload, conflict);
    }
}

impl VoicePacketHandler for VoiceRouter {
    fn handle_voice_packet(&self, packet: VoicePacket) {
        self.route(packet, Instant::now());
    }
}
