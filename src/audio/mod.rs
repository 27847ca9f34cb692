//! Audio devices via cpal.
//!
//! Both directions run mono PCM16 at the session sample rate. Devices
//! that only offer multi-channel or float formats are adapted in the
//! stream callbacks; no resampling is done.

pub mod capture;
pub mod playback;

pub use capture::MicCapture;
pub use playback::{SpeakerBuffer, SpeakerOutput};

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{SampleFormat, SampleRate, SupportedStreamConfig, SupportedStreamConfigRange};

/// Failures opening or driving an audio device.
#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("No default {0} device available")]
    NoDevice(&'static str),

    #[error("{kind} device not found: {name}")]
    DeviceNotFound { kind: &'static str, name: String },

    #[error("{kind} device does not support {sample_rate} Hz in a usable sample format")]
    UnsupportedConfig { kind: &'static str, sample_rate: u32 },

    #[error("Failed to query audio devices: {0}")]
    Query(String),

    #[error("Failed to build {kind} stream: {source}")]
    Build {
        kind: &'static str,
        #[source]
        source: cpal::BuildStreamError,
    },

    #[error("Failed to start {kind} stream: {source}")]
    Play {
        kind: &'static str,
        #[source]
        source: cpal::PlayStreamError,
    },
}

/// Names of the available devices.
#[derive(Debug, Clone, Default)]
pub struct DeviceList {
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub default_input: Option<String>,
    pub default_output: Option<String>,
}

/// Enumerate input and output devices on the default host.
pub fn list_devices() -> Result<DeviceList, AudioError> {
    let host = cpal::default_host();
    let inputs = host
        .input_devices()
        .map_err(|e| AudioError::Query(e.to_string()))?
        .filter_map(|d| d.name().ok())
        .collect();
    let outputs = host
        .output_devices()
        .map_err(|e| AudioError::Query(e.to_string()))?
        .filter_map(|d| d.name().ok())
        .collect();

    Ok(DeviceList {
        inputs,
        outputs,
        default_input: host.default_input_device().and_then(|d| d.name().ok()),
        default_output: host.default_output_device().and_then(|d| d.name().ok()),
    })
}

pub(crate) fn find_input_device(name: Option<&str>) -> Result<cpal::Device, AudioError> {
    let host = cpal::default_host();
    match name {
        None => host.default_input_device().ok_or(AudioError::NoDevice("input")),
        Some(name) => host
            .input_devices()
            .map_err(|e| AudioError::Query(e.to_string()))?
            .find(|d| d.name().is_ok_and(|n| n == name))
            .ok_or_else(|| AudioError::DeviceNotFound {
                kind: "input",
                name: name.to_string(),
            }),
    }
}

pub(crate) fn find_output_device(name: Option<&str>) -> Result<cpal::Device, AudioError> {
    let host = cpal::default_host();
    match name {
        None => host
            .default_output_device()
            .ok_or(AudioError::NoDevice("output")),
        Some(name) => host
            .output_devices()
            .map_err(|e| AudioError::Query(e.to_string()))?
            .find(|d| d.name().is_ok_and(|n| n == name))
            .ok_or_else(|| AudioError::DeviceNotFound {
                kind: "output",
                name: name.to_string(),
            }),
    }
}

/// Pick a stream config at `sample_rate`, preferring fewer channels and
/// native 16-bit samples.
pub(crate) fn pick_config(
    ranges: impl IntoIterator<Item = SupportedStreamConfigRange>,
    sample_rate: u32,
) -> Option<SupportedStreamConfig> {
    ranges
        .into_iter()
        .filter(|r| r.min_sample_rate().0 <= sample_rate && sample_rate <= r.max_sample_rate().0)
        .filter_map(|r| format_rank(r.sample_format()).map(|rank| (r, rank)))
        .min_by_key(|(r, rank)| (r.channels(), *rank))
        .map(|(r, _)| r.with_sample_rate(SampleRate(sample_rate)))
}

fn format_rank(format: SampleFormat) -> Option<u8> {
    match format {
        SampleFormat::I16 => Some(0),
        SampleFormat::F32 => Some(1),
        SampleFormat::U16 => Some(2),
        _ => None,
    }
}

fn device_label(device: &cpal::Device) -> String {
    device.name().unwrap_or_else(|_| "Unknown".to_string())
}
