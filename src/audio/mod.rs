//! Audio subsystem module

pub mod buffer;
pub mod capture;
pub mod device;
pub mod engine;
pub mod mixer;
pub mod playback;
pub mod resample;
pub mod stream;
pub mod tester;
pub mod tone;

pub use buffer::{Frame, RingBuffer};
pub use capture::{EncodedFrameConsumer, InputStream, SharedEncoder};
pub use device::{device_profile, find_device, list_devices, AudioDeviceInfo, DeviceDirection, DeviceProfile};
pub use engine::{AudioEngine, MixerBuses};
pub use mixer::{MixerBus, MixingOutputStream};
pub use playback::OutputStream;
pub use stream::{AudioStream, StreamArgs};
pub use tester::AudioDeviceTester;
pub use tone::ToneGenerator;
