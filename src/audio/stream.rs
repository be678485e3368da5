//! Stream arguments and the common stream interface

use crossbeam_channel::bounded;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::constants::{BASE_FRAME_SIZE, CODEC_SAMPLE_RATE, DEFAULT_CHANNELS, DEFAULT_SAMPLE_RATE};
use crate::error::AudioError;

use super::device::DeviceProfile;

/// Largest channel count the speech codec handles
const MAX_CODEC_CHANNELS: u16 = 2;

/// Device binding of one stream
#[derive(Debug, Clone, PartialEq)]
pub struct StreamArgs {
    pub sample_rate: u32,
    pub channels: u16,
    /// Device name, `None` for the host default
    pub device: Option<String>,
    /// Samples per device buffer, channel-multiplied
    pub frame_size: usize,
}

impl Default for StreamArgs {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            device: None,
            frame_size: device_frame_size(DEFAULT_SAMPLE_RATE, DEFAULT_CHANNELS),
        }
    }
}

impl StreamArgs {
    /// Derive stream arguments from a device's capabilities
    ///
    /// Uses half the device's channels (stereo inputs report doubled counts on
    /// common hardware), never less than one and never more than the codec takes.
    pub fn from_profile(profile: &DeviceProfile) -> Self {
        let channels = (profile.max_channels / 2).clamp(1, MAX_CODEC_CHANNELS);
        let sample_rate = profile.default_sample_rate;
        Self {
            sample_rate,
            channels,
            device: profile.name.clone(),
            frame_size: device_frame_size(sample_rate, channels),
        }
    }

    /// Samples per channel in one device buffer
    pub fn frames_per_buffer(&self) -> usize {
        self.frame_size / self.channels.max(1) as usize
    }
}

/// One codec frame's duration expressed at the device rate, channel-multiplied
pub fn device_frame_size(sample_rate: u32, channels: u16) -> usize {
    (BASE_FRAME_SIZE as u64 * sample_rate as u64 / CODEC_SAMPLE_RATE as u64) as usize
        * channels.max(1) as usize
}

/// Lifecycle shared by every device stream
pub trait AudioStream {
    fn start(&mut self, args: &StreamArgs) -> Result<(), AudioError>;

    /// Stop the device callback, then release the device; idempotent
    fn stop(&mut self);

    fn is_active(&self) -> bool;

    fn restart(&mut self, args: &StreamArgs) -> Result<(), AudioError> {
        self.stop();
        self.start(args)
    }
}

/// How long `start` waits for the device thread to report the stream state
const OPEN_TIMEOUT: Duration = Duration::from_secs(3);

/// cpal stream configuration for `args`, with a fixed or host-chosen buffer
pub(crate) fn stream_config(args: &StreamArgs, fixed_buffer: bool) -> cpal::StreamConfig {
    cpal::StreamConfig {
        channels: args.channels,
        sample_rate: cpal::SampleRate(args.sample_rate),
        buffer_size: if fixed_buffer {
            cpal::BufferSize::Fixed(args.frames_per_buffer() as u32)
        } else {
            cpal::BufferSize::Default
        },
    }
}

/// Open a device stream on a dedicated thread that owns it until `running` clears
///
/// The stream is dropped on that thread, so the device callback has stopped
/// before the caller's join returns and shared buffers are released.
pub(crate) fn spawn_device_thread<F>(
    name: &str,
    running: Arc<AtomicBool>,
    open: F,
) -> Result<JoinHandle<()>, AudioError>
where
    F: FnOnce() -> Result<cpal::Stream, AudioError> + Send + 'static,
{
    use cpal::traits::StreamTrait;

    let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);
    running.store(true, Ordering::SeqCst);
    let running_for_loop = running.clone();

    let handle = thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let stream = match open() {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                return;
            }
            let _ = ready_tx.send(Ok(()));

            // Keep thread alive while running
            while running_for_loop.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_millis(10));
            }

            // Stream is dropped here, stopping the callback
            drop(stream);
        })
        .map_err(|e| {
            running.store(false, Ordering::SeqCst);
            AudioError::StreamError(e.to_string())
        })?;

    let outcome = ready_rx
        .recv_timeout(OPEN_TIMEOUT)
        .unwrap_or_else(|_| Err(AudioError::StreamError("Device open timed out".into())));

    match outcome {
        Ok(()) => Ok(handle),
        Err(e) => {
            running.store(false, Ordering::SeqCst);
            let _ = handle.join();
            Err(e)
        }
    }
}

/// Build with a fixed buffer first, falling back to the host's default size
pub(crate) fn build_with_fallback<B>(args: &StreamArgs, mut build: B) -> Result<cpal::Stream, AudioError>
where
    B: FnMut(&cpal::StreamConfig) -> Result<cpal::Stream, cpal::BuildStreamError>,
{
    match build(&stream_config(args, true)) {
        Ok(stream) => Ok(stream),
        Err(e) => {
            tracing::warn!("Fixed buffer of {} frames rejected ({}), using default", args.frames_per_buffer(), e);
            build(&stream_config(args, false)).map_err(|e| AudioError::StreamError(e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_frame_size() {
        assert_eq!(device_frame_size(48000, 1), 960);
        assert_eq!(device_frame_size(44100, 1), 882);
        assert_eq!(device_frame_size(44100, 2), 1764);
    }

    #[test]
    fn test_args_from_stereo_profile() {
        let profile = DeviceProfile {
            name: Some("Headset".into()),
            max_channels: 2,
            default_sample_rate: 48000,
        };
        let args = StreamArgs::from_profile(&profile);
        assert_eq!(args.channels, 1);
        assert_eq!(args.frame_size, 960);
        assert_eq!(args.device.as_deref(), Some("Headset"));
    }

    #[test]
    fn test_args_channel_floor_and_cap() {
        let mono = DeviceProfile {
            name: None,
            max_channels: 1,
            default_sample_rate: 44100,
        };
        assert_eq!(StreamArgs::from_profile(&mono).channels, 1);

        let surround = DeviceProfile {
            name: None,
            max_channels: 8,
            default_sample_rate: 44100,
        };
        let args = StreamArgs::from_profile(&surround);
        assert_eq!(args.channels, 2);
        assert_eq!(args.frame_size, 1764);
        assert_eq!(args.frames_per_buffer(), 882);
    }
}
