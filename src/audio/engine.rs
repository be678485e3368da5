//! Audio engine: capture, per-target mixers, cue tones and device changes
//!
//! Owned by the session controller. Inbound audio does not pass through the
//! engine; the router writes straight into the mixer buses.

use parking_lot::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::codec::OpusEncoder;
use crate::config::AudioConfig;
use crate::constants::DEFAULT_CHANNELS;
use crate::error::{AudioError, CodecError};
use crate::transmitters::{OutputTarget, Transmitter};

use super::capture::{EncodedFrameConsumer, InputStream, SharedEncoder};
use super::device::{device_profile, DeviceDirection, DeviceProfile};
use super::mixer::{MixerBus, MixingOutputStream};
use super::stream::{AudioStream, StreamArgs};
use super::tester::AudioDeviceTester;
use super::tone::ToneGenerator;

/// Amplitude of the push-to-talk cue tones before volume
const PTT_TONE_AMPLITUDE: f32 = 0.3;

/// Mixer buses by output target, shared with the inbound router
#[derive(Clone)]
pub struct MixerBuses {
    headphone: Arc<MixerBus>,
    speaker: Arc<MixerBus>,
}

impl MixerBuses {
    pub fn new(headphone: Arc<MixerBus>, speaker: Arc<MixerBus>) -> Self {
        Self { headphone, speaker }
    }

    pub fn get(&self, target: OutputTarget) -> &Arc<MixerBus> {
        match target {
            OutputTarget::Headphone => &self.headphone,
            OutputTarget::Speaker => &self.speaker,
        }
    }
}

/// Resolve stream arguments for a device, falling back to defaults
fn resolve_args(name: Option<&str>, direction: DeviceDirection) -> StreamArgs {
    match device_profile(name, direction) {
        Ok(profile) => StreamArgs::from_profile(&profile),
        Err(e) => {
            tracing::warn!("Cannot probe {:?} device ({}), using defaults", direction, e);
            StreamArgs {
                device: name.map(str::to_string),
                ..StreamArgs::default()
            }
        }
    }
}

pub struct AudioEngine {
    encoder: SharedEncoder,
    input: InputStream,
    input_args: StreamArgs,
    headphone: MixingOutputStream,
    speaker: MixingOutputStream,
    tester: AudioDeviceTester,
    ptt_press: ToneGenerator,
    ptt_release: ToneGenerator,
    ptt_volume: f32,
}

impl AudioEngine {
    pub fn new(config: &AudioConfig) -> Result<Self, CodecError> {
        let input_args = resolve_args(config.input_device.as_deref(), DeviceDirection::Input);
        let headphone_args = resolve_args(config.output_device.as_deref(), DeviceDirection::Output);
        let speaker_args = resolve_args(config.speaker_device.as_deref(), DeviceDirection::Output);

        Self::with_args(config, input_args, headphone_args, speaker_args)
    }

    /// Build without probing devices
    pub fn with_args(
        config: &AudioConfig,
        input_args: StreamArgs,
        headphone_args: StreamArgs,
        speaker_args: StreamArgs,
    ) -> Result<Self, CodecError> {
        let channels = if input_args.channels == 0 { DEFAULT_CHANNELS } else { input_args.channels };
        let encoder: SharedEncoder = Arc::new(Mutex::new(Box::new(OpusEncoder::new(channels)?)));

        let input = InputStream::new(encoder.clone());
        input.set_gain_db(config.microphone_gain_db);

        let tester = AudioDeviceTester::new(
            channels,
            config.conflict_tone_freq,
            config.conflict_volume,
        )?;
        tester.set_gain_db(config.microphone_gain_db);

        let output_rate = headphone_args.sample_rate;
        Ok(Self {
            encoder,
            input,
            input_args,
            headphone: MixingOutputStream::new(
                "headphone-mixer",
                headphone_args,
                config.conflict_tone_freq,
                config.conflict_volume,
            ),
            speaker: MixingOutputStream::new(
                "speaker-mixer",
                speaker_args,
                config.conflict_tone_freq,
                config.conflict_volume,
            ),
            tester,
            ptt_press: ToneGenerator::new(output_rate, config.ptt_press_freq, PTT_TONE_AMPLITUDE),
            ptt_release: ToneGenerator::new(output_rate, config.ptt_release_freq, PTT_TONE_AMPLITUDE),
            ptt_volume: config.ptt_volume,
        })
    }

    pub fn buses(&self) -> MixerBuses {
        MixerBuses::new(self.headphone.bus(), self.speaker.bus())
    }

    fn mixer_mut(&mut self, target: OutputTarget) -> &mut MixingOutputStream {
        match target {
            OutputTarget::Headphone => &mut self.headphone,
            OutputTarget::Speaker => &mut self.speaker,
        }
    }

    pub fn set_encoded_consumer(&self, consumer: Option<EncodedFrameConsumer>) {
        self.input.set_consumer(consumer);
    }

    /// Push-to-talk flag shared with inbound conflict detection
    pub fn input_active_flag(&self) -> Arc<AtomicBool> {
        self.input.input_active_flag()
    }

    pub fn input_args(&self) -> &StreamArgs {
        &self.input_args
    }

    pub fn output_args(&self, target: OutputTarget) -> StreamArgs {
        match target {
            OutputTarget::Headphone => self.headphone.args(),
            OutputTarget::Speaker => self.speaker.args(),
        }
    }

    /// Open the microphone
    pub fn start(&mut self) -> Result<(), AudioError> {
        let args = self.input_args.clone();
        self.input.start(&args)
    }

    pub fn is_input_running(&self) -> bool {
        self.input.is_active()
    }

    pub fn is_mixer_running(&self, target: OutputTarget) -> bool {
        match target {
            OutputTarget::Headphone => self.headphone.is_active(),
            OutputTarget::Speaker => self.speaker.is_active(),
        }
    }

    /// Give a transmitter a mixer channel and make sure its device is open
    pub fn add_transmitter(&mut self, transmitter: &Transmitter) -> Result<(), AudioError> {
        let mixer = self.mixer_mut(transmitter.output_target);
        mixer.bus().add_transmitter(transmitter.id, transmitter.volume)?;
        if !mixer.is_active() {
            let args = mixer.args();
            mixer.start(&args)?;
        }
        Ok(())
    }

    /// Drop a transmitter's mixer channel, closing the device when it was the last
    pub fn remove_transmitter(&mut self, transmitter: &Transmitter) {
        let mixer = self.mixer_mut(transmitter.output_target);
        mixer.bus().remove_transmitter(transmitter.id);
        if !mixer.bus().has_transmitters() {
            mixer.stop();
        }
    }

    /// Apply volume or output-target changes
    pub fn update_transmitter(
        &mut self,
        previous: &Transmitter,
        current: &Transmitter,
    ) -> Result<(), AudioError> {
        if previous.output_target != current.output_target {
            self.remove_transmitter(previous);
            return self.add_transmitter(current);
        }
        self.mixer_mut(current.output_target)
            .bus()
            .set_volume(current.id, current.volume);
        Ok(())
    }

    /// Gate capture and play the press or release cue on every open output
    pub fn set_ptt(&mut self, pressed: bool) {
        self.input.set_input_active(pressed);
        self.tester.set_input_active(pressed);
        self.play_ptt_cue(pressed);
    }

    pub fn ptt_active(&self) -> bool {
        self.input.input_active()
    }

    fn play_ptt_cue(&mut self, pressed: bool) {
        let volume = self.ptt_volume;
        let tone = if pressed { &mut self.ptt_press } else { &mut self.ptt_release };

        for mixer in [&self.headphone, &self.speaker] {
            if !mixer.is_active() {
                continue;
            }
            let args = mixer.args();
            if args.frame_size == 0 {
                continue;
            }
            tone.set_sample_rate(args.sample_rate);
            let wave: Vec<f32> = tone
                .generate_interleaved(args.frame_size, args.channels)
                .into_iter()
                .map(|s| s * volume)
                .collect();
            mixer.bus().enqueue_cue(wave);
        }

        let args = self.tester.output_args().clone();
        tone.set_sample_rate(args.sample_rate);
        let wave: Vec<f32> = tone
            .generate_interleaved(args.frame_size, args.channels)
            .into_iter()
            .map(|s| s * 0.5 * volume)
            .collect();
        self.tester.enqueue_cue(wave);
    }

    pub fn set_ptt_tones(&mut self, press_freq: f32, release_freq: f32, volume: f32) {
        self.ptt_press.set_frequency(press_freq);
        self.ptt_release.set_frequency(release_freq);
        self.ptt_volume = volume;
    }

    pub fn set_microphone_gain(&self, gain_db: f32) {
        self.input.set_gain_db(gain_db);
        self.tester.set_gain_db(gain_db);
    }

    /// Rebind capture to a new device, or the default when `profile` is `None`
    pub fn input_device_changed(&mut self, profile: Option<DeviceProfile>) -> Result<(), AudioError> {
        let profile = match profile {
            Some(profile) => profile,
            None => device_profile(None, DeviceDirection::Input)?,
        };
        let args = StreamArgs::from_profile(&profile);
        tracing::info!("Input device changed: {:?}", profile);

        self.encoder
            .lock()
            .reconfigure(args.channels)
            .map_err(|e| AudioError::StreamError(e.to_string()))?;
        self.input_args = args.clone();
        self.tester.update_input_device(&args)?;

        if self.input.is_active() {
            self.input.restart(&args)?;
        }
        Ok(())
    }

    /// Rebind one output target to a new device, or the default when `profile` is `None`
    pub fn output_device_changed(
        &mut self,
        target: OutputTarget,
        profile: Option<DeviceProfile>,
    ) -> Result<(), AudioError> {
        let profile = match profile {
            Some(profile) => profile,
            None => device_profile(None, DeviceDirection::Output)?,
        };
        let args = StreamArgs::from_profile(&profile);
        tracing::info!("{:?} output device changed: {:?}", target, profile);

        if target == OutputTarget::Headphone {
            self.tester.update_output_device(&args)?;
        }

        let mixer = self.mixer_mut(target);
        if mixer.is_active() {
            mixer.restart(&args)
        } else {
            mixer.bus().reconfigure(&args)
        }
    }

    pub fn start_device_test(&mut self) -> Result<(), AudioError> {
        let output = self.headphone.args();
        self.tester.start_test(&self.input_args, &output)
    }

    pub fn stop_device_test(&mut self) {
        self.tester.stop_test();
    }

    /// Close every stream and drop all mixer channels
    pub fn cleanup(&mut self) {
        self.input.stop();
        self.input.set_input_active(false);
        for mixer in [&mut self.headphone, &mut self.speaker] {
            mixer.stop();
            mixer.bus().clear_transmitters();
        }
    }

    pub fn shutdown(&mut self) {
        self.tester.stop_test();
        self.cleanup();
        tracing::info!("Audio engine shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> AudioEngine {
        let args = StreamArgs::default();
        AudioEngine::with_args(&AudioConfig::default(), args.clone(), args.clone(), args).unwrap()
    }

    #[test]
    fn test_buses_follow_target() {
        let engine = engine();
        let buses = engine.buses();
        buses.get(OutputTarget::Speaker).add_transmitter(2, 1.0).unwrap();
        assert!(buses.get(OutputTarget::Speaker).contains(2));
        assert!(!buses.get(OutputTarget::Headphone).contains(2));
    }

    #[test]
    fn test_ptt_gates_input() {
        let mut engine = engine();
        let flag = engine.input_active_flag();
        engine.set_ptt(true);
        assert!(engine.ptt_active());
        assert!(flag.load(std::sync::atomic::Ordering::SeqCst));
        engine.set_ptt(false);
        assert!(!engine.ptt_active());
    }

    #[test]
    fn test_cleanup_clears_mixer_channels() {
        let mut engine = engine();
        let buses = engine.buses();
        buses.get(OutputTarget::Headphone).add_transmitter(0, 1.0).unwrap();
        engine.cleanup();
        engine.cleanup();
        assert!(!buses.get(OutputTarget::Headphone).has_transmitters());
        assert!(!engine.is_input_running());
    }
}
