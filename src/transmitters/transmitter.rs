//! Logical radio owned by the local client

use serde::{Deserialize, Serialize};

/// Physical output a transmitter's audio is mixed into
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutputTarget {
    #[default]
    Headphone,
    Speaker,
}

/// A logical radio: frequency, send/receive flags, mix gain and output device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transmitter {
    /// Stable small identifier, assigned once
    pub id: u8,
    /// Frequency in kHz, 0 when unset
    pub frequency: u32,
    pub send_flag: bool,
    pub receive_flag: bool,
    /// Gain applied at mix time
    pub volume: f32,
    pub output_target: OutputTarget,
}

impl Transmitter {
    pub fn new(id: u8, frequency: u32) -> Self {
        Self {
            id,
            frequency,
            send_flag: false,
            receive_flag: false,
            volume: 1.0,
            output_target: OutputTarget::default(),
        }
    }

    pub fn with_send(mut self, send: bool) -> Self {
        self.send_flag = send;
        self
    }

    pub fn with_receive(mut self, receive: bool) -> Self {
        self.receive_flag = receive;
        self
    }

    pub fn with_volume(mut self, volume: f32) -> Self {
        self.volume = volume;
        self
    }

    pub fn with_output_target(mut self, target: OutputTarget) -> Self {
        self.output_target = target;
        self
    }

    /// True when a frequency is set
    pub fn is_tuned(&self) -> bool {
        self.frequency != 0
    }

    /// Payload of a channel switch: `"<frequency>:<0|1>"`
    pub fn switch_data(&self) -> String {
        format!("{}:{}", self.frequency, if self.receive_flag { '1' } else { '0' })
    }
}
