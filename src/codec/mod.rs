//! Speech codec adapter
//!
//! The codec is treated as an opaque fixed-frame capability: every call must
//! carry exactly one frame of `BASE_FRAME_SIZE` samples per channel at the
//! codec's native rate. Callers resample before `encode` and after `decode`.

pub mod decoder;
pub mod encoder;

use bytes::Bytes;

use crate::error::CodecError;

pub use decoder::OpusDecoder;
pub use encoder::OpusEncoder;

/// Encodes one frame of interleaved PCM into a compressed packet
pub trait Encoder: Send {
    fn encode(&mut self, pcm: &[i16]) -> Result<Bytes, CodecError>;

    /// Interleaved samples expected per call
    fn frame_size(&self) -> usize;

    fn channels(&self) -> u16;

    /// Replace the codec instance for a new channel count
    fn reconfigure(&mut self, channels: u16) -> Result<(), CodecError>;
}

/// Decodes one compressed packet into interleaved PCM
pub trait Decoder: Send {
    fn decode(&mut self, data: &[u8]) -> Result<Vec<i16>, CodecError>;

    /// Interleaved samples produced per call
    fn frame_size(&self) -> usize;

    fn channels(&self) -> u16;

    fn reconfigure(&mut self, channels: u16) -> Result<(), CodecError>;

    /// Decode, substituting one frame of silence on failure
    fn decode_or_silence(&mut self, data: &[u8]) -> Vec<i16> {
        match self.decode(data) {
            Ok(pcm) => pcm,
            Err(e) => {
                tracing::error!("Decode failed, substituting silence: {}", e);
                vec![0; self.frame_size()]
            }
        }
    }
}

/// Interleaved frame length for `channels` at the codec's native rate
pub fn codec_frame_size(channels: u16) -> usize {
    crate::constants::BASE_FRAME_SIZE * channels.max(1) as usize
}

/// Convert normalized float samples to 16-bit PCM
pub fn f32_to_i16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
        .collect()
}

/// Convert 16-bit PCM to normalized float samples
pub fn i16_to_f32(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / 32768.0).collect()
}
