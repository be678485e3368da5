//! Events from the session to its owner

use crossbeam_channel::{Sender, TrySendError};

use crate::network::ConnectionState;
use crate::simulator::ComFrequencies;

/// Pending events before new ones are dropped
pub const EVENT_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(ConnectionState),
    /// Connection failure or a server `error` message
    Error(String),
    /// The sending transmitter changed
    CurrentFrequencyChanged { transmitter_id: u8, frequency: u32 },
    ReceptionBegin { callsign: String, frequency: u32 },
    ReceptionEnd { callsign: String, frequency: u32 },
    /// Chat or server notice that is not a welcome
    MessageReceived { callsign: String, text: String },
    SimulatorLinkLost,
    SimulatorFrequencies(ComFrequencies),
    VoiceSent { transmitter_id: u8, frequency: u32, bytes: usize },
}

/// Queue an event without blocking; a full queue drops it
pub(crate) fn emit(events: &Sender<SessionEvent>, event: SessionEvent) {
    match events.try_send(event) {
        Ok(()) => {}
        Err(TrySendError::Full(event)) => tracing::debug!("Event queue full, dropping {:?}", event),
        Err(TrySendError::Disconnected(_)) => {}
    }
}
