//! Messages pushed to observers

use serde::Serialize;

/// Presence events, serialized as `{"type": ..., "value": {...}}`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value")]
pub enum BroadcastMessage {
    #[serde(rename = "kVoiceConnectedState")]
    VoiceConnectedState { connected: bool },

    #[serde(rename = "kRxBegin", rename_all = "camelCase")]
    RxBegin {
        active_transmitters: Vec<String>,
        callsign: String,
        p_frequency_hz: u64,
    },

    #[serde(rename = "kRxEnd", rename_all = "camelCase")]
    RxEnd {
        active_transmitters: Vec<String>,
        callsign: String,
        p_frequency_hz: u64,
    },
}

impl BroadcastMessage {
    /// Reception started; `frequency` is in kHz
    pub fn rx_begin(active: Vec<String>, callsign: &str, frequency: u32) -> Self {
        Self::RxBegin {
            active_transmitters: active,
            callsign: callsign.to_string(),
            p_frequency_hz: frequency as u64 * 1000,
        }
    }

    pub fn rx_end(active: Vec<String>, callsign: &str, frequency: u32) -> Self {
        Self::RxEnd {
            active_transmitters: active,
            callsign: callsign.to_string(),
            p_frequency_hz: frequency as u64 * 1000,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
