//! Sample-rate conversion between device rates and the codec rate
//!
//! Uses rubato's synchronous FFT resamplers. The capture side produces whole
//! codec frames; the playback side converts one decoded frame at a time.

use rubato::{FftFixedIn, FftFixedOut, Resampler};

use crate::constants::{BASE_FRAME_SIZE, CODEC_SAMPLE_RATE};
use crate::error::AudioError;

/// Number of sub-chunks for the FFT resamplers
const SUB_CHUNKS: usize = 2;

fn deinterleave(samples: &[f32], channels: usize, frames: usize) -> Vec<Vec<f32>> {
    let mut planar = vec![Vec::with_capacity(frames); channels];
    for frame in samples.chunks_exact(channels).take(frames) {
        for (ch, sample) in frame.iter().enumerate() {
            planar[ch].push(*sample);
        }
    }
    planar
}

fn interleave(planar: &[Vec<f32>], out: &mut Vec<f32>) {
    let frames = planar.first().map(Vec::len).unwrap_or(0);
    out.reserve(frames * planar.len());
    for i in 0..frames {
        for channel in planar {
            out.push(channel[i]);
        }
    }
}

/// Device rate to codec rate, emitting complete codec frames
pub struct CaptureResampler {
    resampler: Option<FftFixedOut<f32>>,
    channels: usize,
    pending: Vec<f32>,
}

impl CaptureResampler {
    pub fn new(device_rate: u32, channels: u16) -> Result<Self, AudioError> {
        let channels = channels.max(1) as usize;
        let resampler = if device_rate == CODEC_SAMPLE_RATE {
            None
        } else {
            Some(
                FftFixedOut::<f32>::new(
                    device_rate as usize,
                    CODEC_SAMPLE_RATE as usize,
                    BASE_FRAME_SIZE,
                    SUB_CHUNKS,
                    channels,
                )
                .map_err(|e| AudioError::Resampler(e.to_string()))?,
            )
        };

        Ok(Self {
            resampler,
            channels,
            pending: Vec::new(),
        })
    }

    /// Feed interleaved device samples; returns every codec frame now complete
    pub fn process(&mut self, samples: &[f32]) -> Result<Vec<Vec<f32>>, AudioError> {
        self.pending.extend_from_slice(samples);
        let mut frames = Vec::new();

        match self.resampler.as_mut() {
            None => {
                let frame_len = BASE_FRAME_SIZE * self.channels;
                while self.pending.len() >= frame_len {
                    frames.push(self.pending.drain(..frame_len).collect());
                }
            }
            Some(resampler) => loop {
                let needed = resampler.input_frames_next();
                if self.pending.len() < needed * self.channels {
                    break;
                }
                let planar = deinterleave(&self.pending, self.channels, needed);
                self.pending.drain(..needed * self.channels);

                let output = resampler
                    .process(&planar, None)
                    .map_err(|e| AudioError::Resampler(e.to_string()))?;
                let mut frame = Vec::with_capacity(BASE_FRAME_SIZE * self.channels);
                interleave(&output, &mut frame);
                frames.push(frame);
            },
        }

        Ok(frames)
    }

}

/// Codec rate to device rate, one decoded frame at a time
pub struct PlaybackResampler {
    resampler: Option<FftFixedIn<f32>>,
    channels: usize,
}

impl PlaybackResampler {
    pub fn new(device_rate: u32, channels: u16) -> Result<Self, AudioError> {
        let channels = channels.max(1) as usize;
        let resampler = if device_rate == CODEC_SAMPLE_RATE {
            None
        } else {
            Some(
                FftFixedIn::<f32>::new(
                    CODEC_SAMPLE_RATE as usize,
                    device_rate as usize,
                    BASE_FRAME_SIZE,
                    SUB_CHUNKS,
                    channels,
                )
                .map_err(|e| AudioError::Resampler(e.to_string()))?,
            )
        };

        Ok(Self { resampler, channels })
    }

    /// Convert one interleaved codec frame; short input is zero-padded
    pub fn process(&mut self, frame: &[f32]) -> Result<Vec<f32>, AudioError> {
        let frame_len = BASE_FRAME_SIZE * self.channels;
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(frame.to_vec());
        };

        let mut padded = frame[..frame.len().min(frame_len)].to_vec();
        padded.resize(frame_len, 0.0);

        let planar = deinterleave(&padded, self.channels, BASE_FRAME_SIZE);
        let output = resampler
            .process(&planar, None)
            .map_err(|e| AudioError::Resampler(e.to_string()))?;

        let mut out = Vec::new();
        interleave(&output, &mut out);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_passthrough_chunks_frames() {
        let mut resampler = CaptureResampler::new(CODEC_SAMPLE_RATE, 1).unwrap();

        let frames = resampler.process(&vec![0.5; 1500]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), BASE_FRAME_SIZE);

        let frames = resampler.process(&vec![0.5; 500]).unwrap();
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_capture_resampled_frames_are_exact() {
        let mut resampler = CaptureResampler::new(44100, 1).unwrap();

        let mut produced = Vec::new();
        for _ in 0..10 {
            produced.extend(resampler.process(&vec![0.1; 882]).unwrap());
        }
        assert!(!produced.is_empty());
        assert!(produced.iter().all(|f| f.len() == BASE_FRAME_SIZE));
    }

    #[test]
    fn test_capture_stereo_frames() {
        let mut resampler = CaptureResampler::new(44100, 2).unwrap();

        let mut produced = Vec::new();
        for _ in 0..10 {
            produced.extend(resampler.process(&vec![0.1; 882 * 2]).unwrap());
        }
        assert!(produced.iter().all(|f| f.len() == BASE_FRAME_SIZE * 2));
    }

    #[test]
    fn test_playback_length_tracks_ratio() {
        let mut resampler = PlaybackResampler::new(44100, 1).unwrap();

        let mut total = 0;
        for _ in 0..10 {
            total += resampler.process(&vec![0.0; BASE_FRAME_SIZE]).unwrap().len();
        }
        // 10 frames of 20 ms at 44.1 kHz, allowing for resampler latency
        assert!(total <= 8820);
        assert!(total > 8000);
    }

    #[test]
    fn test_playback_passthrough() {
        let mut resampler = PlaybackResampler::new(CODEC_SAMPLE_RATE, 1).unwrap();
        let out = resampler.process(&[0.25; 10]).unwrap();
        assert_eq!(out, vec![0.25; 10]);
    }
}
