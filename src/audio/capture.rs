//! Microphone capture
//!
//! The device callback converts native PCM, applies microphone gain, resamples
//! to the codec rate and encodes whole frames. Encoded packets are handed to a
//! consumer that must not block; nothing here touches the network.

use bytes::Bytes;
use cpal::traits::DeviceTrait;
use cpal::{FromSample, Sample, SizedSample};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::codec::{f32_to_i16, i16_to_f32, Encoder};
use crate::error::AudioError;

use super::device::{find_device, DeviceDirection};
use super::resample::CaptureResampler;
use super::stream::{build_with_fallback, spawn_device_thread, AudioStream, StreamArgs};

/// Encoder shared between the capture callback and device reconfiguration
pub type SharedEncoder = Arc<Mutex<Box<dyn Encoder>>>;

/// Receives every encoded frame; called on the device callback thread
pub type EncodedFrameConsumer = Arc<dyn Fn(Bytes) + Send + Sync>;

/// Linear factor for a gain in decibels
pub fn gain_factor(gain_db: f32) -> f32 {
    10f32.powf(gain_db / 20.0)
}

/// Apply a linear gain to 16-bit PCM, clipping to the sample range
pub fn apply_gain(samples: &mut [i16], factor: f32) {
    if factor == 1.0 {
        return;
    }
    for sample in samples.iter_mut() {
        *sample = (*sample as f32 * factor).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
    }
}

/// Per-callback processing state, owned by the device callback
pub(crate) struct CapturePipeline {
    resampler: CaptureResampler,
    encoder: SharedEncoder,
    gain: Arc<AtomicU32>,
    active: Arc<AtomicBool>,
    consumer: Arc<RwLock<Option<EncodedFrameConsumer>>>,
    frames_encoded: Arc<AtomicU64>,
}

impl CapturePipeline {
    /// Handle one buffer of interleaved device PCM
    pub(crate) fn process(&mut self, pcm: &mut [i16]) {
        if !self.active.load(Ordering::Relaxed) {
            return;
        }

        apply_gain(pcm, f32::from_bits(self.gain.load(Ordering::Relaxed)));

        let frames = match self.resampler.process(&i16_to_f32(pcm)) {
            Ok(frames) => frames,
            Err(e) => {
                tracing::warn!("Capture resampling failed: {}", e);
                return;
            }
        };

        for frame in frames {
            if frame.is_empty() {
                continue;
            }

            // Reconfiguration holds the lock briefly; skip rather than wait
            let Some(mut encoder) = self.encoder.try_lock() else {
                tracing::trace!("Encoder busy, dropping capture frame");
                continue;
            };
            let encoded = match encoder.encode(&f32_to_i16(&frame)) {
                Ok(encoded) => encoded,
                Err(e) => {
                    tracing::warn!("Encoding failed: {}", e);
                    continue;
                }
            };
            drop(encoder);

            self.frames_encoded.fetch_add(1, Ordering::Relaxed);
            if let Some(consumer) = self.consumer.read().as_ref() {
                consumer(encoded);
            }
        }
    }
}

/// Microphone input stream
pub struct InputStream {
    encoder: SharedEncoder,
    /// Push-to-talk gate; frames are dropped while clear
    active: Arc<AtomicBool>,
    /// Gain factor stored as f32 bits
    gain: Arc<AtomicU32>,
    consumer: Arc<RwLock<Option<EncodedFrameConsumer>>>,
    frames_encoded: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl InputStream {
    pub fn new(encoder: SharedEncoder) -> Self {
        Self {
            encoder,
            active: Arc::new(AtomicBool::new(false)),
            gain: Arc::new(AtomicU32::new(1.0f32.to_bits())),
            consumer: Arc::new(RwLock::new(None)),
            frames_encoded: Arc::new(AtomicU64::new(0)),
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
        }
    }

    pub fn set_consumer(&self, consumer: Option<EncodedFrameConsumer>) {
        *self.consumer.write() = consumer;
    }

    /// Gate capture on push-to-talk
    pub fn set_input_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    pub fn input_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Shared push-to-talk flag, read by inbound conflict detection
    pub fn input_active_flag(&self) -> Arc<AtomicBool> {
        self.active.clone()
    }

    pub fn set_gain_db(&self, gain_db: f32) {
        self.gain.store(gain_factor(gain_db).to_bits(), Ordering::SeqCst);
        tracing::debug!("Microphone gain set to {:.1} dB", gain_db);
    }

    pub fn frames_encoded(&self) -> u64 {
        self.frames_encoded.load(Ordering::Relaxed)
    }

    pub(crate) fn pipeline(&self, args: &StreamArgs) -> Result<CapturePipeline, AudioError> {
        Ok(CapturePipeline {
            resampler: CaptureResampler::new(args.sample_rate, args.channels)?,
            encoder: self.encoder.clone(),
            gain: self.gain.clone(),
            active: self.active.clone(),
            consumer: self.consumer.clone(),
            frames_encoded: self.frames_encoded.clone(),
        })
    }
}

impl AudioStream for InputStream {
    fn start(&mut self, args: &StreamArgs) -> Result<(), AudioError> {
        if self.is_active() {
            return Ok(());
        }

        let pipeline = self.pipeline(args)?;
        let args = args.clone();
        tracing::info!(
            "Starting input stream on {} at {} Hz, {} ch",
            args.device.as_deref().unwrap_or("default device"),
            args.sample_rate,
            args.channels
        );

        let handle = spawn_device_thread("voice-capture", self.running.clone(), move || {
            open_input(&args, pipeline)
        })?;
        self.thread_handle = Some(handle);
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            tracing::info!("Input stream stopped");
        }
    }

    fn is_active(&self) -> bool {
        self.running.load(Ordering::SeqCst) && self.thread_handle.is_some()
    }
}

impl Drop for InputStream {
    fn drop(&mut self) {
        self.stop();
    }
}

fn open_input(args: &StreamArgs, pipeline: CapturePipeline) -> Result<cpal::Stream, AudioError> {
    let device = find_device(args.device.as_deref(), DeviceDirection::Input)?;
    let format = device
        .default_input_config()
        .map_err(|e| AudioError::StreamError(e.to_string()))?
        .sample_format();

    // The pipeline moves into whichever callback is finally built
    let pipeline = Arc::new(Mutex::new(pipeline));

    match format {
        cpal::SampleFormat::F32 => build_input::<f32>(&device, args, pipeline),
        cpal::SampleFormat::I16 => build_input::<i16>(&device, args, pipeline),
        cpal::SampleFormat::U16 => build_input::<u16>(&device, args, pipeline),
        other => Err(AudioError::UnsupportedFormat(format!("{:?}", other))),
    }
}

fn build_input<T>(
    device: &cpal::Device,
    args: &StreamArgs,
    pipeline: Arc<Mutex<CapturePipeline>>,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample,
    i16: FromSample<T>,
{
    build_with_fallback(args, |config| {
        let pipeline = pipeline.clone();
        let mut scratch: Vec<i16> = Vec::new();
        device.build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                scratch.clear();
                scratch.extend(data.iter().map(|&s| i16::from_sample(s)));
                // Uncontended: only this callback takes the lock
                pipeline.lock().process(&mut scratch);
            },
            |err| tracing::error!("Input stream error: {}", err),
            None,
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::OpusEncoder;

    fn stream_with_sink() -> (InputStream, Arc<Mutex<Vec<Bytes>>>) {
        let encoder: SharedEncoder = Arc::new(Mutex::new(Box::new(OpusEncoder::new(1).unwrap())));
        let stream = InputStream::new(encoder);
        let sink = Arc::new(Mutex::new(Vec::new()));
        let sink_for_consumer = sink.clone();
        stream.set_consumer(Some(Arc::new(move |frame: Bytes| {
            sink_for_consumer.lock().push(frame)
        })));
        (stream, sink)
    }

    fn codec_rate_args() -> StreamArgs {
        StreamArgs {
            sample_rate: 48000,
            channels: 1,
            device: None,
            frame_size: 960,
        }
    }

    #[test]
    fn test_gain_factor() {
        assert_eq!(gain_factor(0.0), 1.0);
        assert!((gain_factor(6.0) - 1.995).abs() < 0.01);
        assert!((gain_factor(-20.0) - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_gain_clips_to_sample_range() {
        let mut samples = [20000i16, -20000, 100];
        apply_gain(&mut samples, 4.0);
        assert_eq!(samples, [i16::MAX, i16::MIN, 400]);
    }

    #[test]
    fn test_inactive_pipeline_emits_nothing() {
        let (stream, sink) = stream_with_sink();
        let mut pipeline = stream.pipeline(&codec_rate_args()).unwrap();

        pipeline.process(&mut vec![1000i16; 960]);
        assert!(sink.lock().is_empty());
        assert_eq!(stream.frames_encoded(), 0);
    }

    #[test]
    fn test_active_pipeline_encodes_whole_frames() {
        let (stream, sink) = stream_with_sink();
        stream.set_input_active(true);
        let mut pipeline = stream.pipeline(&codec_rate_args()).unwrap();

        // A frame and a half yields one packet, the remainder stays pending
        pipeline.process(&mut vec![1000i16; 1440]);
        assert_eq!(sink.lock().len(), 1);

        pipeline.process(&mut vec![1000i16; 480]);
        assert_eq!(sink.lock().len(), 2);
        assert_eq!(stream.frames_encoded(), 2);
        assert!(sink.lock().iter().all(|frame| !frame.is_empty()));
    }

    #[test]
    fn test_stop_without_start_is_noop() {
        let (mut stream, _) = stream_with_sink();
        stream.stop();
        stream.stop();
        assert!(!stream.is_active());
    }
}
