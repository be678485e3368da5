//! Audio device enumeration and lookup

use cpal::traits::{DeviceTrait, HostTrait};
use serde::Serialize;

use crate::error::AudioError;

/// Direction of an audio device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeviceDirection {
    Input,
    Output,
}

/// Capabilities that drive stream configuration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceProfile {
    /// Device name, `None` for the host default
    pub name: Option<String>,
    pub max_channels: u16,
    pub default_sample_rate: u32,
}

/// Description of an available device
#[derive(Debug, Clone, Serialize)]
pub struct AudioDeviceInfo {
    pub name: String,
    pub direction: DeviceDirection,
    pub is_default: bool,
    pub max_channels: u16,
    pub default_sample_rate: u32,
}

/// List devices for one direction on the default host
pub fn list_devices(direction: DeviceDirection) -> Vec<AudioDeviceInfo> {
    let host = cpal::default_host();
    let default_name = match direction {
        DeviceDirection::Input => host.default_input_device(),
        DeviceDirection::Output => host.default_output_device(),
    }
    .and_then(|d| d.name().ok());

    let Ok(devices) = host_devices(&host, direction) else {
        return Vec::new();
    };

    devices
        .into_iter()
        .filter_map(|device| {
            let name = device.name().ok()?;
            let profile = probe(&device, direction).ok()?;
            Some(AudioDeviceInfo {
                is_default: default_name.as_deref() == Some(name.as_str()),
                name,
                direction,
                max_channels: profile.max_channels,
                default_sample_rate: profile.default_sample_rate,
            })
        })
        .collect()
}

/// Find a device by name, or the host default when `name` is `None`
pub fn find_device(
    name: Option<&str>,
    direction: DeviceDirection,
) -> Result<cpal::Device, AudioError> {
    let host = cpal::default_host();

    let Some(name) = name else {
        let device = match direction {
            DeviceDirection::Input => host.default_input_device(),
            DeviceDirection::Output => host.default_output_device(),
        };
        return device.ok_or_else(|| {
            AudioError::DeviceNotFound(format!("No default {:?} device", direction))
        });
    };

    let devices = host_devices(&host, direction)?;

    for device in devices {
        if device.name().ok().as_deref() == Some(name) {
            return Ok(device);
        }
    }

    Err(AudioError::DeviceNotFound(name.to_string()))
}

fn host_devices(
    host: &cpal::Host,
    direction: DeviceDirection,
) -> Result<Vec<cpal::Device>, AudioError> {
    let devices = match direction {
        DeviceDirection::Input => host.input_devices().map(|d| d.collect()),
        DeviceDirection::Output => host.output_devices().map(|d| d.collect()),
    };
    devices.map_err(|e| AudioError::DeviceNotFound(e.to_string()))
}

/// Channel and rate capabilities of a named (or default) device
pub fn device_profile(
    name: Option<&str>,
    direction: DeviceDirection,
) -> Result<DeviceProfile, AudioError> {
    let device = find_device(name, direction)?;
    let mut profile = probe(&device, direction)?;
    profile.name = name.map(str::to_string);
    Ok(profile)
}

fn probe(device: &cpal::Device, direction: DeviceDirection) -> Result<DeviceProfile, AudioError> {
    let (default_config, ranges) = match direction {
        DeviceDirection::Input => (
            device.default_input_config(),
            device.supported_input_configs().map(|r| r.collect::<Vec<_>>()),
        ),
        DeviceDirection::Output => (
            device.default_output_config(),
            device.supported_output_configs().map(|r| r.collect::<Vec<_>>()),
        ),
    };

    let default_config = default_config.map_err(|e| AudioError::DeviceNotFound(e.to_string()))?;
    let max_channels = ranges
        .ok()
        .and_then(|ranges| ranges.iter().map(|r| r.channels()).max())
        .unwrap_or_else(|| default_config.channels());

    Ok(DeviceProfile {
        name: device.name().ok(),
        max_channels,
        default_sample_rate: default_config.sample_rate().0,
    })
}
