//! Single-target playback
//!
//! Plays one source of encoded frames on one device. Used for device tests
//! and cue previews; live reception goes through the mixing output.

use bytes::Bytes;
use cpal::traits::DeviceTrait;
use cpal::{FromSample, Sample, SizedSample};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::codec::{i16_to_f32, Decoder, OpusDecoder};
use crate::constants::{CUE_QUEUE_CAPACITY, ENCODED_QUEUE_CAPACITY};
use crate::error::{AudioError, CodecError};

use super::buffer::{fit_frame, Frame, RingBuffer};
use super::device::{find_device, DeviceDirection};
use super::resample::PlaybackResampler;
use super::stream::{build_with_fallback, spawn_device_thread, AudioStream, StreamArgs};
use super::tone::ToneGenerator;

/// State shared between the control side and the device callback
pub(crate) struct PlaybackState {
    encoded: RingBuffer<Bytes>,
    cues: RingBuffer<Frame>,
    decoder: Mutex<Box<dyn Decoder>>,
    resampler: Mutex<Option<PlaybackResampler>>,
    volume: AtomicU32,
}

impl PlaybackState {
    fn new(decoder: Box<dyn Decoder>) -> Self {
        Self {
            encoded: RingBuffer::new(ENCODED_QUEUE_CAPACITY),
            cues: RingBuffer::new(CUE_QUEUE_CAPACITY),
            decoder: Mutex::new(decoder),
            resampler: Mutex::new(None),
            volume: AtomicU32::new(1.0f32.to_bits()),
        }
    }

    fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }

    pub(crate) fn push_encoded(&self, data: Bytes) {
        self.encoded.push(data);
    }

    /// Fill one device buffer: a queued cue first, then a decoded frame, else silence
    pub(crate) fn render(&self, out: &mut [f32]) {
        if let Some(cue) = self.cues.try_pop() {
            fit_frame(&cue, out);
            scale_and_clip(out, self.volume());
            return;
        }

        let Some(packet) = self.encoded.try_pop() else {
            out.fill(0.0);
            return;
        };

        let (Some(mut decoder), Some(mut resampler)) =
            (self.decoder.try_lock(), self.resampler.try_lock())
        else {
            out.fill(0.0);
            return;
        };

        let pcm = i16_to_f32(&decoder.decode_or_silence(&packet));
        let frame = match resampler.as_mut() {
            Some(resampler) => match resampler.process(&pcm) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!("Playback resampling failed: {}", e);
                    out.fill(0.0);
                    return;
                }
            },
            None => pcm,
        };

        if !fit_frame(&frame, out) {
            tracing::trace!("Decoded frame of {} samples fitted to {}", frame.len(), out.len());
        }
        scale_and_clip(out, self.volume());
    }
}

fn scale_and_clip(out: &mut [f32], volume: f32) {
    for sample in out.iter_mut() {
        *sample = (*sample * volume).clamp(-1.0, 1.0);
    }
}

/// Output stream that plays a single encoded source
pub struct OutputStream {
    state: Arc<PlaybackState>,
    conflict_tone: Mutex<ToneGenerator>,
    args: StreamArgs,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl OutputStream {
    pub fn new(conflict_tone_freq: f32, conflict_volume: f32) -> Result<Self, CodecError> {
        let args = StreamArgs::default();
        Ok(Self {
            state: Arc::new(PlaybackState::new(Box::new(OpusDecoder::new(args.channels)?))),
            conflict_tone: Mutex::new(ToneGenerator::new(
                args.sample_rate,
                conflict_tone_freq,
                conflict_volume,
            )),
            args,
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
        })
    }

    pub fn set_volume(&self, volume: f32) {
        self.state.volume.store(volume.to_bits(), Ordering::Relaxed);
    }

    /// Queue one encoded frame, or a conflict tone frame in its place
    pub fn play_encoded_audio(&self, data: Bytes, conflict: bool) {
        if conflict {
            let cue = self
                .conflict_tone
                .lock()
                .generate_interleaved(self.args.frame_size, self.args.channels);
            self.state.cues.push(cue);
            return;
        }
        self.state.push_encoded(data);
    }

    /// Queue a cue waveform ahead of decoded audio
    pub fn enqueue_cue(&self, wave: Frame) {
        self.state.cues.push(wave);
    }

    pub fn args(&self) -> &StreamArgs {
        &self.args
    }

    pub(crate) fn state(&self) -> &PlaybackState {
        &self.state
    }

    /// Handle for feeding encoded frames from another thread
    pub(crate) fn sink(&self) -> Arc<PlaybackState> {
        self.state.clone()
    }

    fn configure(&mut self, args: &StreamArgs) -> Result<(), AudioError> {
        *self.state.resampler.lock() = Some(PlaybackResampler::new(args.sample_rate, args.channels)?);
        self.state
            .decoder
            .lock()
            .reconfigure(args.channels)
            .map_err(|e| AudioError::StreamError(e.to_string()))?;
        self.conflict_tone.lock().set_sample_rate(args.sample_rate);
        self.state.encoded.clear();
        self.state.cues.clear();
        self.args = args.clone();
        Ok(())
    }
}

impl AudioStream for OutputStream {
    fn start(&mut self, args: &StreamArgs) -> Result<(), AudioError> {
        if self.is_active() {
            return Ok(());
        }

        self.configure(args)?;
        let state = self.state.clone();
        let args = args.clone();

        let handle = spawn_device_thread("voice-playback", self.running.clone(), move || {
            open_output(&args, move |out| state.render(out))
        })?;
        self.thread_handle = Some(handle);
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            tracing::debug!("Output stream stopped");
        }
    }

    fn is_active(&self) -> bool {
        self.running.load(Ordering::SeqCst) && self.thread_handle.is_some()
    }
}

impl Drop for OutputStream {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Open an output device that pulls float frames from `render`
pub(crate) fn open_output<R>(args: &StreamArgs, render: R) -> Result<cpal::Stream, AudioError>
where
    R: FnMut(&mut [f32]) + Send + 'static,
{
    let device = find_device(args.device.as_deref(), DeviceDirection::Output)?;
    let format = device
        .default_output_config()
        .map_err(|e| AudioError::StreamError(e.to_string()))?
        .sample_format();

    let render = Arc::new(Mutex::new(render));

    match format {
        cpal::SampleFormat::F32 => build_output::<f32, R>(&device, args, render),
        cpal::SampleFormat::I16 => build_output::<i16, R>(&device, args, render),
        cpal::SampleFormat::U16 => build_output::<u16, R>(&device, args, render),
        other => Err(AudioError::UnsupportedFormat(format!("{:?}", other))),
    }
}

fn build_output<T, R>(
    device: &cpal::Device,
    args: &StreamArgs,
    render: Arc<Mutex<R>>,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample + FromSample<f32>,
    R: FnMut(&mut [f32]) + Send + 'static,
{
    build_with_fallback(args, |config| {
        let render = render.clone();
        let mut scratch: Vec<f32> = Vec::new();
        device.build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                scratch.resize(data.len(), 0.0);
                (&mut *render.lock())(&mut scratch);
                for (out, &sample) in data.iter_mut().zip(scratch.iter()) {
                    *out = T::from_sample(sample);
                }
            },
            |err| tracing::error!("Output stream error: {}", err),
            None,
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Encoder, OpusEncoder};

    fn encoded_tone() -> Bytes {
        let mut encoder = OpusEncoder::new(1).unwrap();
        let pcm: Vec<i16> = (0..960)
            .map(|i| ((i as f32 * 0.05).sin() * 8000.0) as i16)
            .collect();
        encoder.encode(&pcm).unwrap()
    }

    #[test]
    fn test_empty_queue_renders_silence() {
        let stream = OutputStream::new(293.66, 1.0).unwrap();
        let mut out = vec![0.5f32; 882];
        stream.state().render(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_conflict_queues_cue_instead_of_audio() {
        let stream = OutputStream::new(293.66, 1.0).unwrap();
        stream.play_encoded_audio(encoded_tone(), true);
        assert!(stream.state().encoded.is_empty());
        assert_eq!(stream.state().cues.len(), 1);

        let mut out = vec![0.0f32; 882];
        stream.state().render(&mut out);
        assert!(out.iter().any(|&s| s != 0.0));
        assert!(out.iter().all(|s| s.abs() <= 1.0));
    }

    #[test]
    fn test_cue_is_scaled_and_clipped() {
        let stream = OutputStream::new(293.66, 1.0).unwrap();
        stream.set_volume(4.0);
        stream.enqueue_cue(vec![0.5, -0.5, 0.1]);

        let mut out = vec![0.0f32; 4];
        stream.state().render(&mut out);
        assert_eq!(out[0], 1.0);
        assert_eq!(out[1], -1.0);
        assert!((out[2] - 0.4).abs() < 1e-6);
        assert_eq!(out[3], 0.0);
    }

    #[test]
    fn test_decoded_frame_fills_buffer() {
        let stream = OutputStream::new(293.66, 1.0).unwrap();
        stream.play_encoded_audio(encoded_tone(), false);

        // No resampler configured, so the 960-sample frame is truncated
        let mut out = vec![0.0f32; 480];
        stream.state().render(&mut out);
        assert!(out.iter().all(|s| s.is_finite() && s.abs() <= 1.0));
        assert!(stream.state().encoded.is_empty());
    }
}
