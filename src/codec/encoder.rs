//! Opus encoder wrapper
//!
//! VoIP-tuned Opus encoding at the codec's native rate with a fixed bitrate.

use bytes::Bytes;
use opus::{Application, Channels};

use super::{codec_frame_size, Encoder};
use crate::constants::{CODEC_BITRATE, CODEC_SAMPLE_RATE};
use crate::error::CodecError;

/// Largest packet Opus can produce for one frame
const MAX_PACKET_SIZE: usize = 4000;

pub(crate) fn opus_channels(channels: u16) -> Result<Channels, CodecError> {
    match channels {
        1 => Ok(Channels::Mono),
        2 => Ok(Channels::Stereo),
        _ => Err(CodecError::EncoderInit(format!(
            "Unsupported channel count: {}",
            channels
        ))),
    }
}

/// Opus encoder wrapper with fixed-frame contract
pub struct OpusEncoder {
    encoder: opus::Encoder,
    channels: u16,
    frame_size: usize,
    /// Encoding buffer (reused to avoid allocations)
    encode_buffer: Vec<u8>,
    frames_encoded: u64,
}

impl OpusEncoder {
    pub fn new(channels: u16) -> Result<Self, CodecError> {
        let encoder = Self::build(channels)?;

        tracing::info!(
            "Opus encoder created: {} Hz, {} channels, frame size {}",
            CODEC_SAMPLE_RATE,
            channels,
            codec_frame_size(channels)
        );

        Ok(Self {
            encoder,
            channels,
            frame_size: codec_frame_size(channels),
            encode_buffer: vec![0u8; MAX_PACKET_SIZE],
            frames_encoded: 0,
        })
    }

    fn build(channels: u16) -> Result<opus::Encoder, CodecError> {
        let mut encoder =
            opus::Encoder::new(CODEC_SAMPLE_RATE, opus_channels(channels)?, Application::Voip)
                .map_err(|e| CodecError::EncoderInit(e.to_string()))?;

        encoder
            .set_bitrate(opus::Bitrate::Bits(CODEC_BITRATE as i32))
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set bitrate: {}", e)))?;

        Ok(encoder)
    }

    pub fn frames_encoded(&self) -> u64 {
        self.frames_encoded
    }
}

impl Encoder for OpusEncoder {
    fn encode(&mut self, pcm: &[i16]) -> Result<Bytes, CodecError> {
        if pcm.len() != self.frame_size {
            return Err(CodecError::InvalidFrameSize {
                expected: self.frame_size,
                actual: pcm.len(),
            });
        }

        let size = self
            .encoder
            .encode(pcm, &mut self.encode_buffer)
            .map_err(|e| CodecError::EncodingFailed(e.to_string()))?;

        self.frames_encoded += 1;

        Ok(Bytes::copy_from_slice(&self.encode_buffer[..size]))
    }

    fn frame_size(&self) -> usize {
        self.frame_size
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn reconfigure(&mut self, channels: u16) -> Result<(), CodecError> {
        self.encoder = Self::build(channels)?;
        self.channels = channels;
        self.frame_size = codec_frame_size(channels);
        tracing::debug!("Opus encoder reconfigured for {} channels", channels);
        Ok(())
    }
}
