//! Audio capture from microphone

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, SampleRate, Stream};
use ringbuf::traits::Producer;

use crate::{Error, Result};

/// Sample rate the rest of the pipeline runs at (16kHz for speech)
pub const PIPELINE_SAMPLE_RATE: u32 = 16_000;

/// Enumerate the names of all capture devices
///
/// Logged once at service startup so operators can see what the
/// device-name configuration can refer to.
#[must_use]
pub fn list_capture_devices() -> Vec<String> {
    let host = cpal::default_host();
    match host.input_devices() {
        Ok(devices) => devices.filter_map(|d| d.name().ok()).collect(),
        Err(e) => {
            tracing::warn!(error = %e, "failed to enumerate capture devices");
            Vec::new()
        }
    }
}

/// Captures audio from a microphone into a lossy SPSC ring
///
/// The cpal callback downmixes to mono and pushes into the ring; when
/// the consumer falls behind, excess input frames are dropped rather
/// than blocking the audio thread.
pub struct AudioCapture {
    _stream: Stream,
    sample_rate: u32,
}

impl AudioCapture {
    /// Open the named capture device, or the first available one
    ///
    /// Prefers a mono 16kHz stream; otherwise opens the device's
    /// default configuration and leaves resampling to the segmenter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceUnavailable`] when no usable capture
    /// device exists, [`Error::Audio`] when the stream cannot be built.
    pub fn open<P>(device_name: Option<&str>, mut producer: P) -> Result<Self>
    where
        P: Producer<Item = f32> + Send + 'static,
    {
        let device = find_device(device_name)?;
        let name = device.name().unwrap_or_default();

        let supported = device
            .supported_input_configs()
            .ok()
            .and_then(|mut configs| {
                configs.find(|c| {
                    c.channels() == 1
                        && c.min_sample_rate() <= SampleRate(PIPELINE_SAMPLE_RATE)
                        && c.max_sample_rate() >= SampleRate(PIPELINE_SAMPLE_RATE)
                })
            })
            .map_or_else(
                || {
                    device
                        .default_input_config()
                        .map_err(|e| Error::Audio(e.to_string()))
                },
                |c| Ok(c.with_sample_rate(SampleRate(PIPELINE_SAMPLE_RATE))),
            )?;

        let sample_format = supported.sample_format();
        let config = supported.config();
        let sample_rate = config.sample_rate.0;
        let channels = usize::from(config.channels);

        tracing::info!(
            device = %name,
            sample_rate,
            channels,
            "capture device opened"
        );

        let err_fn = |err| tracing::error!(error = %err, "audio capture error");

        let stream = match sample_format {
            SampleFormat::F32 => device
                .build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        push_frames(data, channels, &mut producer);
                    },
                    err_fn,
                    None,
                )
                .map_err(|e| Error::Audio(e.to_string()))?,
            SampleFormat::I16 => device
                .build_input_stream(
                    &config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        push_frames_i16(data, channels, &mut producer);
                    },
                    err_fn,
                    None,
                )
                .map_err(|e| Error::Audio(e.to_string()))?,
            other => {
                return Err(Error::Audio(format!("unsupported sample format: {other}")));
            }
        };

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            sample_rate,
        })
    }

    /// Rate the device is actually producing at
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Pick the capture device by name, or fall back to the default input
fn find_device(device_name: Option<&str>) -> Result<Device> {
    let host = cpal::default_host();

    if let Some(wanted) = device_name {
        let device = host
            .input_devices()
            .map_err(|e| Error::DeviceUnavailable(e.to_string()))?
            .find(|d| d.name().is_ok_and(|n| n == wanted));
        return device.ok_or_else(|| {
            Error::DeviceUnavailable(format!("capture device not found: {wanted}"))
        });
    }

    host.default_input_device()
        .ok_or_else(|| Error::DeviceUnavailable("no capture device available".to_string()))
}

/// Downmix interleaved f32 frames to mono and push into the ring
fn push_frames<P: Producer<Item = f32>>(data: &[f32], channels: usize, producer: &mut P) {
    if channels <= 1 {
        // push_slice drops whatever doesn't fit; losing input under
        // backpressure beats stalling the audio callback
        producer.push_slice(data);
        return;
    }

    #[allow(clippy::cast_precision_loss)]
    for frame in data.chunks(channels) {
        let sum: f32 = frame.iter().sum();
        let _ = producer.try_push(sum / channels as f32);
    }
}

/// Convert interleaved i16 frames to mono f32 and push into the ring
fn push_frames_i16<P: Producer<Item = f32>>(data: &[i16], channels: usize, producer: &mut P) {
    #[allow(clippy::cast_precision_loss)]
    for frame in data.chunks(channels.max(1)) {
        let sum: f32 = frame.iter().map(|&s| f32::from(s) / 32768.0).sum();
        let _ = producer.try_push(sum / frame.len() as f32);
    }
}

/// Convert f32 samples to WAV bytes for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            // Convert f32 [-1.0, 1.0] to i16
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use ringbuf::HeapRb;
    use ringbuf::traits::{Consumer, Split};

    use super::*;

    #[test]
    fn stereo_frames_are_downmixed() {
        let rb = HeapRb::<f32>::new(16);
        let (mut prod, mut cons) = rb.split();

        push_frames(&[0.2, 0.4, -0.5, 0.5], 2, &mut prod);

        let mut out = [0.0f32; 2];
        assert_eq!(cons.pop_slice(&mut out), 2);
        assert!((out[0] - 0.3).abs() < 1e-6);
        assert!(out[1].abs() < 1e-6);
    }

    #[test]
    fn i16_frames_are_scaled() {
        let rb = HeapRb::<f32>::new(16);
        let (mut prod, mut cons) = rb.split();

        push_frames_i16(&[i16::MAX, 0, i16::MIN], 1, &mut prod);

        let mut out = [0.0f32; 3];
        assert_eq!(cons.pop_slice(&mut out), 3);
        assert!(out[0] > 0.99);
        assert!(out[1].abs() < 1e-6);
        assert!(out[2] < -0.99);
    }

    #[test]
    fn wav_header_is_valid() {
        let samples = vec![0.0f32, 0.5, -0.5, 0.25];
        let wav = samples_to_wav(&samples, PIPELINE_SAMPLE_RATE).unwrap();

        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert!(wav.len() > 44);
    }
}
