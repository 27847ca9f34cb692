//! Microphone capture.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use std::sync::Arc;

use super::{device_label, find_input_device, pick_config, AudioError};
use crate::config::AudioConfig;
use crate::voice::pipeline::FrameAssembler;
use crate::voice::queue::FrameQueue;

/// Running input stream. Capture stops when this is dropped.
pub struct MicCapture {
    _stream: cpal::Stream,
    device_name: String,
}

impl MicCapture {
    /// Open the input device and start pushing fixed-size frames into `queue`.
    ///
    /// The callback only converts samples and pushes; a full queue drops
    /// the new frame.
    pub fn start(config: &AudioConfig, queue: Arc<FrameQueue>) -> Result<Self, AudioError> {
        let device = find_input_device(config.input_device.as_deref())?;
        let device_name = device_label(&device);

        let ranges = device
            .supported_input_configs()
            .map_err(|e| AudioError::Query(e.to_string()))?;
        let supported =
            pick_config(ranges, config.sample_rate).ok_or(AudioError::UnsupportedConfig {
                kind: "input",
                sample_rate: config.sample_rate,
            })?;

        let format = supported.sample_format();
        let stream_config: cpal::StreamConfig = supported.into();
        tracing::debug!(
            device = %device_name,
            channels = stream_config.channels,
            format = ?format,
            "Opening input stream"
        );

        let frame_samples = config.samples_per_frame();
        let stream = match format {
            cpal::SampleFormat::I16 => {
                build_input::<i16>(&device, &stream_config, frame_samples, queue)
            }
            cpal::SampleFormat::F32 => {
                build_input::<f32>(&device, &stream_config, frame_samples, queue)
            }
            cpal::SampleFormat::U16 => {
                build_input::<u16>(&device, &stream_config, frame_samples, queue)
            }
            _ => {
                return Err(AudioError::UnsupportedConfig {
                    kind: "input",
                    sample_rate: config.sample_rate,
                })
            }
        }?;

        stream.play().map_err(|source| AudioError::Play {
            kind: "input",
            source,
        })?;

        Ok(Self {
            _stream: stream,
            device_name,
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }
}

fn build_input<T>(
    device: &cpal::Device,
    stream_config: &cpal::StreamConfig,
    frame_samples: usize,
    queue: Arc<FrameQueue>,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample,
    i16: FromSample<T>,
{
    let channels = usize::from(stream_config.channels.max(1));
    let mut assembler = FrameAssembler::new(frame_samples);
    let mut mono: Vec<i16> = Vec::with_capacity(frame_samples);

    device
        .build_input_stream(
            stream_config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                // First channel only.
                mono.clear();
                mono.extend(data.iter().step_by(channels).map(|&s| s.to_sample::<i16>()));
                assembler.push(&mono, |frame| {
                    queue.push(frame);
                });
            },
            |err| tracing::warn!(error = %err, "Input stream error"),
            None,
        )
        .map_err(|source| AudioError::Build {
            kind: "input",
            source,
        })
}
