//! Outbound voice: encoded microphone frames to voice datagrams
//!
//! Called on the capture thread. The route is only set while the session is
//! Ready and a transmitter is sending, so an unset route drops the frame.

use bytes::Bytes;
use crossbeam_channel::Sender;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::network::{packet, VoiceSender};

use super::events::{emit, SessionEvent};

/// Where outgoing frames go
#[derive(Debug, Clone)]
pub struct Route {
    pub cid: i32,
    pub callsign: String,
    pub transmitter_id: u8,
    pub frequency: u32,
    pub sender: VoiceSender,
}

pub struct Outbound {
    route: RwLock<Option<Route>>,
    frames_sent: AtomicU64,
    events: Sender<SessionEvent>,
}

impl Outbound {
    pub fn new(events: Sender<SessionEvent>) -> Self {
        Self {
            route: RwLock::new(None),
            frames_sent: AtomicU64::new(0),
            events,
        }
    }

    pub fn set_route(&self, route: Option<Route>) {
        match &route {
            Some(r) => tracing::debug!("Outbound voice on transmitter {} ({})", r.transmitter_id, r.frequency),
            None => tracing::debug!("Outbound voice disabled"),
        }
        *self.route.write() = route;
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    /// Wrap one encoded frame in a datagram and queue it
    pub fn send_encoded(&self, frame: Bytes) {
        let route = self.route.read();
        let Some(route) = route.as_ref() else {
            return;
        };

        let datagram = match packet::build(
            route.cid,
            route.transmitter_id,
            route.frequency,
            &route.callsign,
            &frame,
        ) {
            Ok(datagram) => datagram,
            Err(e) => {
                tracing::warn!("Cannot build voice datagram: {}", e);
                return;
            }
        };

        if route.sender.send(datagram).is_ok() {
            self.frames_sent.fetch_add(1, Ordering::Relaxed);
            emit(
                &self.events,
                SessionEvent::VoiceSent {
                    transmitter_id: route.transmitter_id,
                    frequency: route.frequency,
                    bytes: frame.len(),
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::VoicePacket;
    use tokio::sync::mpsc;

    #[test]
    fn test_unrouted_frames_are_dropped() {
        let (events_tx, events_rx) = crossbeam_channel::bounded(8);
        let outbound = Outbound::new(events_tx);
        outbound.send_encoded(Bytes::from_static(&[1, 2, 3]));
        assert_eq!(outbound.frames_sent(), 0);
        assert!(events_rx.try_recv().is_err());
    }

    #[test]
    fn test_routed_frame_becomes_datagram() {
        let (events_tx, events_rx) = crossbeam_channel::bounded(8);
        let (voice_tx, mut voice_rx) = mpsc::channel(4);
        let outbound = Outbound::new(events_tx);
        outbound.set_route(Some(Route {
            cid: 1001,
            callsign: "N123AB".into(),
            transmitter_id: 1,
            frequency: 122800,
            sender: VoiceSender::from_sender(voice_tx),
        }));

        outbound.send_encoded(Bytes::from_static(&[9, 8, 7]));

        let datagram = voice_rx.try_recv().unwrap();
        let packet = VoicePacket::parse(&datagram).unwrap();
        assert_eq!(packet.sender_id, 1001);
        assert_eq!(packet.transmitter_id, 1);
        assert_eq!(packet.frequency, 122800);
        assert_eq!(packet.callsign, "N123AB");
        assert_eq!(&packet.payload[..], &[9, 8, 7]);

        assert_eq!(outbound.frames_sent(), 1);
        assert_eq!(
            events_rx.try_recv().unwrap(),
            SessionEvent::VoiceSent {
                transmitter_id: 1,
                frequency: 122800,
                bytes: 3
            }
        );

        outbound.set_route(None);
        outbound.send_encoded(Bytes::from_static(&[1]));
        assert!(voice_rx.try_recv().is_err());
    }
}
