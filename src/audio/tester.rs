//! Microphone-to-headphone loopback for checking device selection

use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::codec::OpusEncoder;
use crate::error::{AudioError, CodecError};

use super::buffer::Frame;
use super::capture::{InputStream, SharedEncoder};
use super::playback::OutputStream;
use super::stream::{AudioStream, StreamArgs};

/// Plays the local microphone back through the selected output device
///
/// Has its own encoder so a test never shares codec state with live capture.
pub struct AudioDeviceTester {
    encoder: SharedEncoder,
    input: InputStream,
    output: OutputStream,
}

impl AudioDeviceTester {
    pub fn new(
        channels: u16,
        conflict_tone_freq: f32,
        conflict_volume: f32,
    ) -> Result<Self, CodecError> {
        let encoder: SharedEncoder = Arc::new(Mutex::new(Box::new(OpusEncoder::new(channels)?)));
        let input = InputStream::new(encoder.clone());
        let output = OutputStream::new(conflict_tone_freq, conflict_volume)?;
        Ok(Self {
            encoder,
            input,
            output,
        })
    }

    pub fn start_test(&mut self, input: &StreamArgs, output: &StreamArgs) -> Result<(), AudioError> {
        self.output.start(output)?;
        let sink = self.output.sink();
        self.input
            .set_consumer(Some(Arc::new(move |frame: Bytes| sink.push_encoded(frame))));
        if let Err(e) = self.input.start(input) {
            self.output.stop();
            return Err(e);
        }
        tracing::info!("Audio device test started");
        Ok(())
    }

    pub fn stop_test(&mut self) {
        let was_running = self.is_running();
        self.input.stop();
        self.output.stop();
        self.input.set_consumer(None);
        if was_running {
            tracing::info!("Audio device test stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.input.is_active() || self.output.is_active()
    }

    pub fn set_input_active(&self, active: bool) {
        self.input.set_input_active(active);
    }

    pub fn set_gain_db(&self, gain_db: f32) {
        self.input.set_gain_db(gain_db);
    }

    /// Cue frames go to the loopback output while a test is running
    pub fn enqueue_cue(&self, wave: Frame) {
        if self.output.is_active() {
            self.output.enqueue_cue(wave);
        }
    }

    pub fn output_args(&self) -> &StreamArgs {
        self.output.args()
    }

    pub fn update_input_device(&mut self, args: &StreamArgs) -> Result<(), AudioError> {
        self.encoder
            .lock()
            .reconfigure(args.channels)
            .map_err(|e| AudioError::StreamError(e.to_string()))?;
        if self.input.is_active() {
            self.input.restart(args)?;
        }
        Ok(())
    }

    pub fn update_output_device(&mut self, args: &StreamArgs) -> Result<(), AudioError> {
        if self.output.is_active() {
            self.output.restart(args)?;
        }
        Ok(())
    }
}
