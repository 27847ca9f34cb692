//! Speaker output.
//!
//! The playback loop writes frames into a [`SpeakerBuffer`]; the cpal
//! output callback drains it and pads with silence when it runs dry.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use super::{device_label, find_output_device, pick_config, AudioError};
use crate::config::AudioConfig;
use crate::voice::pipeline::{PlaybackSink, PLAYBACK_POLL};
use crate::voice::queue::AudioFrame;

/// Device-side sample buffer with a high-water mark.
///
/// Writers wait (bounded by [`PLAYBACK_POLL`]) while the buffer is above
/// the mark, so latency stays in the playback queue where barge-in can
/// flush it.
pub struct SpeakerBuffer {
    samples: Mutex<VecDeque<i16>>,
    drained: Condvar,
    high_water: usize,
}

impl SpeakerBuffer {
    pub fn new(high_water: usize) -> Self {
        let high_water = high_water.max(1);
        Self {
            samples: Mutex::new(VecDeque::with_capacity(high_water * 2)),
            drained: Condvar::new(),
            high_water,
        }
    }

    /// Size the mark to `frames` frames of `config`.
    pub fn for_config(config: &AudioConfig, frames: usize) -> Self {
        Self::new(config.samples_per_frame() * frames)
    }

    /// Fill `out` from the buffer, padding with silence. Returns samples taken.
    pub fn fill(&self, out: &mut [i16]) -> usize {
        let taken = {
            let mut samples = self.samples.lock();
            let n = out.len().min(samples.len());
            for (slot, sample) in out.iter_mut().zip(samples.drain(..n)) {
                *slot = sample;
            }
            n
        };
        out[taken..].fill(0);
        if taken > 0 {
            self.drained.notify_all();
        }
        taken
    }

    pub fn buffered(&self) -> usize {
        self.samples.lock().len()
    }
}

impl PlaybackSink for SpeakerBuffer {
    fn write(&self, frame: &AudioFrame) -> anyhow::Result<()> {
        let deadline = Instant::now() + PLAYBACK_POLL;
        let mut samples = self.samples.lock();
        while samples.len() >= self.high_water {
            if self.drained.wait_until(&mut samples, deadline).timed_out() {
                anyhow::bail!("Output device is not draining");
            }
        }
        samples.extend(frame.samples());
        Ok(())
    }

    fn clear(&self) {
        self.samples.lock().clear();
        self.drained.notify_all();
    }
}

/// Running output stream. Playback stops when this is dropped.
pub struct SpeakerOutput {
    _stream: cpal::Stream,
    buffer: Arc<SpeakerBuffer>,
    device_name: String,
}

/// Frames the device buffer may hold before writers wait.
const DEVICE_BUFFER_FRAMES: usize = 4;

impl SpeakerOutput {
    pub fn open(config: &AudioConfig) -> Result<Self, AudioError> {
        let device = find_output_device(config.output_device.as_deref())?;
        let device_name = device_label(&device);

        let ranges = device
            .supported_output_configs()
            .map_err(|e| AudioError::Query(e.to_string()))?;
        let supported =
            pick_config(ranges, config.sample_rate).ok_or(AudioError::UnsupportedConfig {
                kind: "output",
                sample_rate: config.sample_rate,
            })?;

        let format = supported.sample_format();
        let stream_config: cpal::StreamConfig = supported.into();
        tracing::debug!(
            device = %device_name,
            channels = stream_config.channels,
            format = ?format,
            "Opening output stream"
        );

        let buffer = Arc::new(SpeakerBuffer::for_config(config, DEVICE_BUFFER_FRAMES));
        let stream = match format {
            cpal::SampleFormat::I16 => build_output::<i16>(&device, &stream_config, &buffer),
            cpal::SampleFormat::F32 => build_output::<f32>(&device, &stream_config, &buffer),
            cpal::SampleFormat::U16 => build_output::<u16>(&device, &stream_config, &buffer),
            _ => {
                return Err(AudioError::UnsupportedConfig {
                    kind: "output",
                    sample_rate: config.sample_rate,
                })
            }
        }?;

        stream.play().map_err(|source| AudioError::Play {
            kind: "output",
            source,
        })?;

        Ok(Self {
            _stream: stream,
            buffer,
            device_name,
        })
    }

    /// Sink feeding this stream.
    pub fn sink(&self) -> Arc<dyn PlaybackSink> {
        Arc::clone(&self.buffer) as Arc<dyn PlaybackSink>
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }
}

fn build_output<T>(
    device: &cpal::Device,
    stream_config: &cpal::StreamConfig,
    buffer: &Arc<SpeakerBuffer>,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample + FromSample<i16>,
{
    let channels = usize::from(stream_config.channels.max(1));
    let buffer = Arc::clone(buffer);
    let mut mono: Vec<i16> = Vec::new();

    device
        .build_output_stream(
            stream_config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                mono.resize(data.len().div_ceil(channels), 0);
                buffer.fill(&mut mono);
                // Same mono sample on every channel.
                for (frame, &sample) in data.chunks_mut(channels).zip(mono.iter()) {
                    frame.fill(T::from_sample(sample));
                }
            },
            |err| tracing::warn!(error = %err, "Output stream error"),
            None,
        )
        .map_err(|source| AudioError::Build {
            kind: "output",
            source,
        })
}
