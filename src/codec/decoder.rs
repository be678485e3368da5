//! Opus decoder wrapper

use super::encoder::opus_channels;
use super::{codec_frame_size, Decoder};
use crate::constants::CODEC_SAMPLE_RATE;
use crate::error::CodecError;

/// Opus decoder wrapper
pub struct OpusDecoder {
    decoder: opus::Decoder,
    channels: u16,
    frame_size: usize,
    /// Decoding buffer (reused to avoid allocations)
    decode_buffer: Vec<i16>,
    frames_decoded: u64,
    frames_failed: u64,
}

impl OpusDecoder {
    pub fn new(channels: u16) -> Result<Self, CodecError> {
        let decoder = Self::build(channels)?;
        let frame_size = codec_frame_size(channels);

        Ok(Self {
            decoder,
            channels,
            frame_size,
            decode_buffer: vec![0i16; frame_size],
            frames_decoded: 0,
            frames_failed: 0,
        })
    }

    fn build(channels: u16) -> Result<opus::Decoder, CodecError> {
        let channels = opus_channels(channels)
            .map_err(|e| CodecError::DecoderInit(e.to_string()))?;
        opus::Decoder::new(CODEC_SAMPLE_RATE, channels)
            .map_err(|e| CodecError::DecoderInit(e.to_string()))
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    pub fn frames_failed(&self) -> u64 {
        self.frames_failed
    }
}

impl Decoder for OpusDecoder {
    fn decode(&mut self, data: &[u8]) -> Result<Vec<i16>, CodecError> {
        let samples = self
            .decoder
            .decode(data, &mut self.decode_buffer, false)
            .map_err(|e| {
                self.frames_failed += 1;
                CodecError::DecodingFailed(e.to_string())
            })?;

        let total = (samples * self.channels as usize).min(self.decode_buffer.len());
        self.frames_decoded += 1;

        Ok(self.decode_buffer[..total].to_vec())
    }

    fn frame_size(&self) -> usize {
        self.frame_size
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn reconfigure(&mut self, channels: u16) -> Result<(), CodecError> {
        self.decoder = Self::build(channels)?;
        self.channels = channels;
        self.frame_size = codec_frame_size(channels);
        self.decode_buffer = vec![0i16; self.frame_size];
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Encoder, OpusEncoder};

    #[test]
    fn test_encode_decode_frame_length() {
        let mut encoder = OpusEncoder::new(1).unwrap();
        let mut decoder = OpusDecoder::new(1).unwrap();

        let samples: Vec<i16> = (0..encoder.frame_size())
            .map(|i| {
                let t = i as f32 / CODEC_SAMPLE_RATE as f32;
                ((t * 440.0 * 2.0 * std::f32::consts::PI).sin() * 8000.0) as i16
            })
            .collect();

        let encoded = encoder.encode(&samples).unwrap();
        let decoded = decoder.decode(&encoded).unwrap();
        assert_eq!(decoded.len(), encoder.frame_size());
        assert_eq!(decoder.frames_decoded(), 1);
    }

    #[test]
    fn test_garbage_substitutes_silence() {
        let mut decoder = OpusDecoder::new(1).unwrap();
        // TOC byte announcing a code-3 packet with an impossible frame count
        let pcm = decoder.decode_or_silence(&[0xFF, 0xFF]);
        assert_eq!(pcm.len(), decoder.frame_size());
        assert!(pcm.iter().all(|&s| s == 0));
        assert_eq!(decoder.frames_failed(), 1);
    }
}
