//! Audio device enumeration and stream handles.
//!
//! Streams are opened through [`open_input`] and [`open_output`] and stay
//! alive for exactly as long as the returned handle. `cpal` streams are not
//! `Send`, so handles must stay on the thread that opened them; captured
//! frames and playback samples cross threads through the channel and ring
//! passed in at open time instead.

use std::{
    collections::VecDeque,
    sync::{mpsc::SyncSender, Arc, Mutex},
};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SampleRate, SizedSample, StreamConfig};

use crate::{AudioConfig, Result, VisualiserError};

/// One fixed-size block of mono samples captured from an input device.
///
/// Samples keep their raw signed 16-bit values. The render modes scale bar
/// heights against that range, so nothing here normalises to [-1, 1].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    samples: Vec<i16>,
    sample_rate: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// Widens the samples to floats without rescaling.
    pub fn to_f32(&self) -> Vec<f32> {
        self.samples.iter().map(|&value| value as f32).collect()
    }
}

/// Listing entry for one audio endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub is_default: bool,
}

/// Enumerates capture devices on the default host.
pub fn list_input_devices() -> Result<Vec<DeviceInfo>> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|device| device.name().ok());
    collect_devices(host.input_devices()?, default_name)
}

/// Enumerates playback devices on the default host.
pub fn list_output_devices() -> Result<Vec<DeviceInfo>> {
    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|device| device.name().ok());
    collect_devices(host.output_devices()?, default_name)
}

fn collect_devices(
    devices: impl Iterator<Item = Device>,
    default_name: Option<String>,
) -> Result<Vec<DeviceInfo>> {
    let mut infos = Vec::new();
    for device in devices {
        let name = device.name()?;
        let is_default = default_name.as_deref() == Some(name.as_str());
        infos.push(DeviceInfo { name, is_default });
    }
    Ok(infos)
}

fn match_device(devices: impl Iterator<Item = Device>, selector: &str) -> Option<Device> {
    let filter = selector.to_lowercase();
    let mut devices = devices;
    devices.find(|device| {
        device
            .name()
            .map(|name| name.to_lowercase().contains(&filter))
            .unwrap_or(false)
    })
}

fn find_input_device(host: &cpal::Host, selector: Option<&str>) -> Result<Device> {
    match selector {
        Some(selector) => match_device(host.input_devices()?, selector)
            .ok_or_else(|| VisualiserError::msg(format!("no input device matches {selector:?}"))),
        None => host
            .default_input_device()
            .ok_or_else(|| VisualiserError::msg("no default input device")),
    }
}

fn find_output_device(host: &cpal::Host, selector: Option<&str>) -> Result<Device> {
    match selector {
        Some(selector) => match_device(host.output_devices()?, selector)
            .ok_or_else(|| VisualiserError::msg(format!("no output device matches {selector:?}"))),
        None => host
            .default_output_device()
            .ok_or_else(|| VisualiserError::msg("no default output device")),
    }
}

// Keep the device's channel layout, request the configured rate. A device
// that cannot run at the requested rate fails the open instead of silently
// resampling.
fn shape_config(supported: &cpal::SupportedStreamConfig, sample_rate: u32) -> StreamConfig {
    let mut config = supported.config();
    config.sample_rate = SampleRate(sample_rate);
    config
}

/// Keeps a capture stream alive. Dropping the handle closes the device.
pub struct InputHandle {
    name: String,
    _stream: cpal::Stream,
}

impl InputHandle {
    pub fn device_name(&self) -> &str {
        &self.name
    }
}

/// Keeps a playback stream alive. Dropping the handle closes the device.
pub struct OutputHandle {
    name: String,
    _stream: cpal::Stream,
}

impl OutputHandle {
    pub fn device_name(&self) -> &str {
        &self.name
    }
}

/// Opens a capture stream and starts delivering whole frames to `frames`.
///
/// `selector` is a case-insensitive substring of the device name; `None`
/// picks the host default. The callback assembles exactly
/// `config.chunk_size` mono samples per frame, downmixing multi-channel
/// devices by averaging.
pub fn open_input(
    selector: Option<&str>,
    config: &AudioConfig,
    frames: SyncSender<AudioFrame>,
) -> Result<InputHandle> {
    let host = cpal::default_host();
    let device = find_input_device(&host, selector)?;
    let name = device.name()?;
    let supported = device.default_input_config()?;
    let stream_config = shape_config(&supported, config.sample_rate);

    let stream = match supported.sample_format() {
        SampleFormat::F32 => build_input_stream::<f32>(&device, &stream_config, config, frames)?,
        SampleFormat::I16 => build_input_stream::<i16>(&device, &stream_config, config, frames)?,
        SampleFormat::U16 => build_input_stream::<u16>(&device, &stream_config, config, frames)?,
        format => {
            return Err(VisualiserError::msg(format!(
                "unsupported input sample format {format:?}"
            )))
        }
    };
    stream.play()?;
    tracing::info!(device = %name, "input stream started");

    Ok(InputHandle {
        name,
        _stream: stream,
    })
}

/// Opens a playback stream fed from `ring`.
///
/// The callback drains queued samples, duplicating the mono value across the
/// device's channels, and pads with silence when capture falls behind.
pub fn open_output(
    selector: Option<&str>,
    config: &AudioConfig,
    ring: OutputRing,
) -> Result<OutputHandle> {
    let host = cpal::default_host();
    let device = find_output_device(&host, selector)?;
    let name = device.name()?;
    let supported = device.default_output_config()?;
    let stream_config = shape_config(&supported, config.sample_rate);

    let stream = match supported.sample_format() {
        SampleFormat::F32 => build_output_stream::<f32>(&device, &stream_config, ring)?,
        SampleFormat::I16 => build_output_stream::<i16>(&device, &stream_config, ring)?,
        SampleFormat::U16 => build_output_stream::<u16>(&device, &stream_config, ring)?,
        format => {
            return Err(VisualiserError::msg(format!(
                "unsupported output sample format {format:?}"
            )))
        }
    };
    stream.play()?;
    tracing::info!(device = %name, "output stream started");

    Ok(OutputHandle {
        name,
        _stream: stream,
    })
}

fn build_input_stream<T>(
    device: &Device,
    stream_config: &StreamConfig,
    config: &AudioConfig,
    frames: SyncSender<AudioFrame>,
) -> Result<cpal::Stream>
where
    T: SizedSample,
    i16: FromSample<T>,
{
    let channels = stream_config.channels as usize;
    let chunk_size = config.chunk_size;
    let sample_rate = config.sample_rate;
    let mut carry: Vec<i16> = Vec::with_capacity(chunk_size * 2);

    let stream = device.build_input_stream(
        stream_config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            downmix_into(&mut carry, data, channels);
            while carry.len() >= chunk_size {
                let samples: Vec<i16> = carry.drain(..chunk_size).collect();
                let frame = AudioFrame::new(samples, sample_rate);
                // Never block inside the device callback.
                if frames.try_send(frame).is_err() {
                    tracing::debug!("frame queue full, captured frame dropped");
                }
            }
        },
        |err| tracing::error!(%err, "input stream error"),
        None,
    )?;
    Ok(stream)
}

fn build_output_stream<T>(
    device: &Device,
    stream_config: &StreamConfig,
    ring: OutputRing,
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<i16>,
{
    let channels = stream_config.channels as usize;
    let stream = device.build_output_stream(
        stream_config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            ring.fill(data, channels);
        },
        |err| tracing::error!(%err, "output stream error"),
        None,
    )?;
    Ok(stream)
}

// Mixes interleaved frames down to mono and appends them to `carry`.
fn downmix_into<T>(carry: &mut Vec<i16>, data: &[T], channels: usize)
where
    T: SizedSample,
    i16: FromSample<T>,
{
    if channels == 0 {
        return;
    }
    for frame in data.chunks_exact(channels) {
        let mut acc = 0i32;
        for &sample in frame {
            acc += i16::from_sample(sample) as i32;
        }
        carry.push((acc / channels as i32) as i16);
    }
}

/// Bounded pass-through buffer between the capture worker and the playback
/// callback.
///
/// Writers append whole frames; once the queue exceeds its capacity the
/// oldest samples go first. The playback side never blocks: shortfalls are
/// padded with silence.
#[derive(Debug, Clone)]
pub struct OutputRing {
    samples: Arc<Mutex<VecDeque<i16>>>,
    capacity: usize,
}

impl OutputRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    /// Appends samples, discarding the oldest queued audio on overflow.
    pub fn write(&self, samples: &[i16]) {
        if let Ok(mut queue) = self.samples.lock() {
            queue.extend(samples.iter().copied());
            while queue.len() > self.capacity {
                queue.pop_front();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.samples.lock().map(|queue| queue.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Drains queued mono samples into an interleaved output buffer.
    fn fill<T>(&self, data: &mut [T], channels: usize)
    where
        T: SizedSample + FromSample<i16>,
    {
        let mut queue = match self.samples.lock() {
            Ok(queue) => queue,
            Err(_) => {
                for slot in data.iter_mut() {
                    *slot = T::from_sample(0i16);
                }
                return;
            }
        };

        if channels == 0 {
            return;
        }
        for frame in data.chunks_mut(channels) {
            let value = queue.pop_front().unwrap_or(0);
            for slot in frame {
                *slot = T::from_sample(value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_frame_keeps_raw_sample_values() {
        let frame = AudioFrame::new(vec![0, -32768, 32767], 44_100);
        assert_eq!(frame.len(), 3);
        assert_eq!(frame.sample_rate(), 44_100);
        assert_eq!(frame.to_f32(), vec![0.0, -32768.0, 32767.0]);
    }

    #[test]
    fn downmix_averages_interleaved_channels() {
        let mut carry = Vec::new();
        downmix_into::<i16>(&mut carry, &[100, 200, -50, 50, 7], 2);
        // The trailing odd sample waits for its partner.
        assert_eq!(carry, vec![150, 0]);
    }

    #[test]
    fn downmix_converts_float_samples_to_the_raw_range() {
        let mut carry = Vec::new();
        downmix_into::<f32>(&mut carry, &[0.5, -0.5], 1);
        assert_eq!(carry.len(), 2);
        assert!((carry[0] as i32 - 16384).abs() <= 2);
        assert!((carry[1] as i32 + 16384).abs() <= 2);
    }

    #[test]
    fn output_ring_discards_oldest_on_overflow() {
        let ring = OutputRing::new(4);
        ring.write(&[1, 2, 3]);
        ring.write(&[4, 5, 6]);
        assert_eq!(ring.len(), 4);

        let mut data = [0i16; 4];
        ring.fill(&mut data, 1);
        assert_eq!(data, [3, 4, 5, 6]);
    }

    #[test]
    fn output_ring_pads_underruns_with_silence() {
        let ring = OutputRing::new(16);
        ring.write(&[7, 8]);

        let mut data = [99i16; 8];
        ring.fill(&mut data, 2);
        assert_eq!(data, [7, 7, 8, 8, 0, 0, 0, 0]);
        assert!(ring.is_empty());
    }
}
