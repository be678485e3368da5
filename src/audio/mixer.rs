//! Multi-transmitter mixing output
//!
//! Each transmitter routed to a device gets its own bounded queue of frames
//! already decoded and resampled to the device rate. Decoding happens when a
//! packet arrives, so the device callback only sums queued frames:
//!
//! ```text
//!   packet ─▶ decoder[tx] ─▶ resampler[tx] ─▶ queue[tx] ─┐
//!   packet ─▶ decoder[tx] ─▶ resampler[tx] ─▶ queue[tx] ─┼─▶ Σ·gain ─▶ tanh ─▶ device
//!                                   conflict tone ─▶ cue ─┘ (exclusive)
//! ```

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::codec::{i16_to_f32, Decoder, OpusDecoder};
use crate::constants::{CUE_QUEUE_CAPACITY, TRANSMITTER_QUEUE_CAPACITY};
use crate::error::AudioError;

use super::buffer::{fit_frame, Frame, RingBuffer};
use super::playback::open_output;
use super::resample::PlaybackResampler;
use super::stream::{spawn_device_thread, AudioStream, StreamArgs};
use super::tone::ToneGenerator;

/// Per-transmitter decode path and frame queue
struct TransmitterChannel {
    frames: RingBuffer<Frame>,
    volume: AtomicU32,
    decoder: Mutex<Box<dyn Decoder>>,
    resampler: Mutex<PlaybackResampler>,
}

impl TransmitterChannel {
    fn new(args: &StreamArgs, volume: f32) -> Result<Self, AudioError> {
        let decoder =
            OpusDecoder::new(args.channels).map_err(|e| AudioError::StreamError(e.to_string()))?;
        Ok(Self {
            frames: RingBuffer::new(TRANSMITTER_QUEUE_CAPACITY),
            volume: AtomicU32::new(volume.to_bits()),
            decoder: Mutex::new(Box::new(decoder)),
            resampler: Mutex::new(PlaybackResampler::new(args.sample_rate, args.channels)?),
        })
    }

    fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }
}

/// Mixer state shared by the router and the device callback
pub struct MixerBus {
    channels: RwLock<HashMap<u8, Arc<TransmitterChannel>>>,
    cues: RingBuffer<Frame>,
    conflict_tone: Mutex<ToneGenerator>,
    args: RwLock<StreamArgs>,
}

impl MixerBus {
    pub fn new(args: StreamArgs, conflict_tone_freq: f32, conflict_volume: f32) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            cues: RingBuffer::new(CUE_QUEUE_CAPACITY),
            conflict_tone: Mutex::new(ToneGenerator::new(
                args.sample_rate,
                conflict_tone_freq,
                conflict_volume,
            )),
            args: RwLock::new(args),
        }
    }

    pub fn args(&self) -> StreamArgs {
        self.args.read().clone()
    }

    /// Create or refresh the queue, decoder and resampler for a transmitter
    pub fn add_transmitter(&self, transmitter_id: u8, volume: f32) -> Result<(), AudioError> {
        let mut channels = self.channels.write();
        if let Some(existing) = channels.get(&transmitter_id) {
            existing.volume.store(volume.to_bits(), Ordering::Relaxed);
            return Ok(());
        }

        let channel = TransmitterChannel::new(&self.args.read(), volume)?;
        channels.insert(transmitter_id, Arc::new(channel));
        tracing::debug!("Mixer channel added for transmitter {}", transmitter_id);
        Ok(())
    }

    pub fn remove_transmitter(&self, transmitter_id: u8) -> bool {
        let removed = self.channels.write().remove(&transmitter_id).is_some();
        if removed {
            tracing::debug!("Mixer channel removed for transmitter {}", transmitter_id);
        }
        removed
    }

    pub fn clear_transmitters(&self) {
        self.channels.write().clear();
        self.cues.clear();
    }

    pub fn has_transmitters(&self) -> bool {
        !self.channels.read().is_empty()
    }

    pub fn contains(&self, transmitter_id: u8) -> bool {
        self.channels.read().contains_key(&transmitter_id)
    }

    pub fn set_volume(&self, transmitter_id: u8, volume: f32) {
        if let Some(channel) = self.channels.read().get(&transmitter_id) {
            channel.volume.store(volume.to_bits(), Ordering::Relaxed);
        }
    }

    /// Decode and queue one packet for a transmitter, or queue the conflict tone
    pub fn play_encoded_audio(&self, transmitter_id: u8, data: &Bytes, conflict: bool) {
        if conflict {
            let args = self.args.read();
            let cue = self
                .conflict_tone
                .lock()
                .generate_interleaved(args.frame_size, args.channels);
            self.cues.push(cue);
            return;
        }

        let Some(channel) = self.channels.read().get(&transmitter_id).cloned() else {
            tracing::trace!("No mixer channel for transmitter {}", transmitter_id);
            return;
        };

        let pcm = i16_to_f32(&channel.decoder.lock().decode_or_silence(data));
        match channel.resampler.lock().process(&pcm) {
            Ok(frame) => {
                channel.frames.push(frame);
            }
            Err(e) => tracing::warn!("Resampling for transmitter {} failed: {}", transmitter_id, e),
        };
    }

    /// Queue a cue waveform; it plays alone on the next callback
    pub fn enqueue_cue(&self, wave: Frame) {
        self.cues.push(wave);
    }

    /// Rebuild every channel for new device arguments, dropping queued audio
    pub fn reconfigure(&self, args: &StreamArgs) -> Result<(), AudioError> {
        let mut channels = self.channels.write();
        let rebuilt = channels
            .iter()
            .map(|(&id, channel)| Ok((id, Arc::new(TransmitterChannel::new(args, channel.volume())?))))
            .collect::<Result<HashMap<_, _>, AudioError>>()?;
        *channels = rebuilt;
        self.cues.clear();
        self.conflict_tone.lock().set_sample_rate(args.sample_rate);
        *self.args.write() = args.clone();
        Ok(())
    }

    /// Fill one device buffer
    ///
    /// A queued cue is emitted alone, clipped. Otherwise one frame from every
    /// non-empty queue is summed with its gain and soft-clipped with tanh.
    /// Never blocks: a contended channel map renders silence for this buffer.
    pub fn mix_into(&self, out: &mut [f32]) {
        if let Some(cue) = self.cues.try_pop() {
            if !fit_frame(&cue, out) {
                tracing::trace!("Cue of {} samples fitted to {}", cue.len(), out.len());
            }
            for sample in out.iter_mut() {
                *sample = sample.clamp(-1.0, 1.0);
            }
            return;
        }

        out.fill(0.0);
        let Some(channels) = self.channels.try_read() else {
            return;
        };

        for (id, channel) in channels.iter() {
            let Some(frame) = channel.frames.try_pop() else {
                continue;
            };
            if frame.len() != out.len() {
                tracing::trace!(
                    "Transmitter {} frame of {} samples fitted to {}",
                    id,
                    frame.len(),
                    out.len()
                );
            }
            let volume = channel.volume();
            for (acc, &sample) in out.iter_mut().zip(frame.iter()) {
                *acc += sample * volume;
            }
        }

        for sample in out.iter_mut() {
            *sample = if sample.is_finite() { sample.tanh() } else { 0.0 };
        }
    }

    pub fn queued_cues(&self) -> usize {
        self.cues.len()
    }

    /// Decoded frames waiting on one transmitter
    pub fn queued_frames(&self, transmitter_id: u8) -> usize {
        self.channels
            .read()
            .get(&transmitter_id)
            .map(|c| c.frames.len())
            .unwrap_or(0)
    }

    #[cfg(test)]
    fn push_frame(&self, transmitter_id: u8, frame: Frame) {
        if let Some(channel) = self.channels.read().get(&transmitter_id) {
            channel.frames.push(frame);
        }
    }
}

/// Device stream that plays a mixer bus
pub struct MixingOutputStream {
    bus: Arc<MixerBus>,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    name: &'static str,
}

impl MixingOutputStream {
    pub fn new(name: &'static str, args: StreamArgs, conflict_tone_freq: f32, conflict_volume: f32) -> Self {
        Self {
            bus: Arc::new(MixerBus::new(args, conflict_tone_freq, conflict_volume)),
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
            name,
        }
    }

    /// Shared handle for routing inbound audio
    pub fn bus(&self) -> Arc<MixerBus> {
        self.bus.clone()
    }

    pub fn args(&self) -> StreamArgs {
        self.bus.args()
    }
}

impl AudioStream for MixingOutputStream {
    fn start(&mut self, args: &StreamArgs) -> Result<(), AudioError> {
        if self.is_active() {
            return Ok(());
        }

        if self.bus.args() != *args {
            self.bus.reconfigure(args)?;
        }

        let bus = self.bus.clone();
        let args = args.clone();
        tracing::info!(
            "Starting {} mixer on {} at {} Hz, {} ch",
            self.name,
            args.device.as_deref().unwrap_or("default device"),
            args.sample_rate,
            args.channels
        );

        let handle = spawn_device_thread(self.name, self.running.clone(), move || {
            open_output(&args, move |out| bus.mix_into(out))
        })?;
        self.thread_handle = Some(handle);
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            tracing::info!("{} mixer stopped", self.name);
        }
    }

    fn is_active(&self) -> bool {
        self.running.load(Ordering::SeqCst) && self.thread_handle.is_some()
    }

    /// Reopen on new arguments; queued audio from the old device is dropped
    fn restart(&mut self, args: &StreamArgs) -> Result<(), AudioError> {
        self.stop();
        self.bus.reconfigure(args)?;
        self.start(args)
    }
}

impl Drop for MixingOutputStream {
    fn drop(&mut self) {
        self.stop();
    }
}
