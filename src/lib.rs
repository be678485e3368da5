//! # ATC Voice
//!
//! Real-time voice core for a flight-simulation air-traffic-control client.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                           VOICE SESSION                                  │
//! │                                                                          │
//! │  ┌────────────┐   ┌──────────────┐   ┌──────────────────────────────┐    │
//! │  │ Microphone │──▶│ Input Stream │──▶│ Opus Encoder (48 kHz, 20 ms) │    │
//! │  └────────────┘   └──────────────┘   └──────────────┬───────────────┘    │
//! │                                                     │                    │
//! │                                                     ▼                    │
//! │  ┌───────────────────────────────────────────────────────────────────┐   │
//! │  │                Voice Channel (network::channel)                   │   │
//! │  │   TCP: newline-delimited JSON control   UDP: voice datagrams      │   │
//! │  │   [cid|tx|freq|len|callsign|opus|\n]                              │   │
//! │  └───────────────────────────────────┬───────────────────────────────┘   │
//! │                                      │                                   │
//! │                                      ▼                                   │
//! │  ┌───────────────────────────────────────────────────────────────────┐   │
//! │  │  Voice Router (session::router)                                   │   │
//! │  │    frequency index lookup ─▶ conflict check ─▶ decode+resample    │   │
//! │  └───────────────┬───────────────────────────────────┬───────────────┘   │
//! │                  ▼                                   ▼                   │
//! │  ┌───────────────────────────────┐   ┌───────────────────────────────┐   │
//! │  │ Mixing Output (Headphone)     │   │ Mixing Output (Speaker)       │   │
//! │  │  tx0 queue  tx1 queue  cue    │   │  tx2 queue  cue               │   │
//! │  │        Σ ─▶ tanh ─▶ device    │   │        Σ ─▶ tanh ─▶ device    │   │
//! │  └───────────────────────────────┘   └───────────────────────────────┘   │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod broadcast;
pub mod codec;
pub mod config;
pub mod error;
pub mod network;
pub mod session;
pub mod simulator;
pub mod transmitters;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    use std::time::Duration;

    /// Application name reported to broadcast clients
    pub const APP_NAME: &str = "AudioClient";

    /// Application version
    pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

    /// Native sample rate of the speech codec
    pub const CODEC_SAMPLE_RATE: u32 = 48000;

    /// Codec bitrate, half the native sample rate
    pub const CODEC_BITRATE: u32 = CODEC_SAMPLE_RATE / 2;

    /// Duration of one codec frame in milliseconds
    pub const FRAME_DURATION_MS: u64 = 20;

    /// Duration of one codec frame
    pub const FRAME_DURATION: Duration = Duration::from_millis(FRAME_DURATION_MS);

    /// Samples per channel in one codec frame
    pub const BASE_FRAME_SIZE: usize =
        (CODEC_SAMPLE_RATE as u64 * FRAME_DURATION_MS / 1000) as usize;

    /// Device sample rate assumed before a device is selected
    pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

    /// Channel count assumed before a device is selected
    pub const DEFAULT_CHANNELS: u16 = 1;

    /// Interval between heartbeat pings
    pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

    /// Control line buffer cap before the buffer is considered corrupt
    pub const CONTROL_BUFFER_CAP: usize = 4096;

    /// Largest datagram the voice transport accepts
    pub const MAX_DATAGRAM_SIZE: usize = 65507;

    /// Two senders on one frequency within this window are a conflict
    pub const CONFLICT_WINDOW: Duration = Duration::from_millis(FRAME_DURATION_MS * 5);

    /// Receive-activity entries older than this are swept
    pub const ACTIVITY_STALENESS: Duration = Duration::from_millis(FRAME_DURATION_MS * 5);

    /// Per-transmitter decoded frame queue capacity
    pub const TRANSMITTER_QUEUE_CAPACITY: usize = 32;

    /// Cue tone queue capacity
    pub const CUE_QUEUE_CAPACITY: usize = 8;

    /// Encoded frame queue capacity of the single-target output
    pub const ENCODED_QUEUE_CAPACITY: usize = 32;

    /// Bounded wait for broadcast delivery
    pub const NOTIFY_TIMEOUT: Duration = Duration::from_secs(5);

    /// Voice datagram frequencies must stay below this value
    pub const MAX_FREQUENCY: u32 = 200_000;
}
