use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat};
use crossbeam_channel::{Receiver, Sender, TryRecvError};

use crate::source::{CaptureDevice, FrameSource};
use crate::SAMPLE_RATE;

/// Microphone-backed [`CaptureDevice`].
///
/// Each `open()` builds a fresh cpal input stream on a dedicated thread
/// (cpal streams are not `Send`) and hands the consumer a [`MicSource`]
/// over a crossbeam channel. Dropping the source tears the stream down.
pub struct MicDevice {
    device_name: Option<String>,
}

impl MicDevice {
    pub fn default_input() -> Self {
        Self { device_name: None }
    }

    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            device_name: Some(name.into()),
        }
    }
}

impl CaptureDevice for MicDevice {
    fn open(&self) -> crate::Result<Box<dyn FrameSource>> {
        let (chunk_tx, chunk_rx) = crossbeam_channel::unbounded::<Vec<f32>>();
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<crate::Result<()>>(1);
        let (exit_tx, exit_rx) = crossbeam_channel::bounded::<()>(0);

        let device_name = self.device_name.clone();
        std::thread::spawn(move || {
            let stream = match build_input_stream(device_name.as_deref(), chunk_tx) {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            // Park until the MicSource drops its end of the exit channel.
            let _ = exit_rx.recv();
            drop(stream);
            tracing::debug!("microphone stream closed");
        });

        ready_rx
            .recv()
            .map_err(|_| crate::AudioError::StreamError("capture thread died".into()))??;

        Ok(Box::new(MicSource::from_receiver_with_exit(
            chunk_rx,
            Some(exit_tx),
        )))
    }
}

/// [`FrameSource`] over a channel of sample chunks.
///
/// Normally produced by [`MicDevice::open`], but any producer of 16kHz mono
/// chunks can feed one via [`MicSource::from_receiver`].
pub struct MicSource {
    rx: Receiver<Vec<f32>>,
    pending: Vec<f32>,
    ended: bool,
    _exit: Option<Sender<()>>,
}

impl MicSource {
    pub fn from_receiver(rx: Receiver<Vec<f32>>) -> Self {
        Self::from_receiver_with_exit(rx, None)
    }

    fn from_receiver_with_exit(rx: Receiver<Vec<f32>>, exit: Option<Sender<()>>) -> Self {
        Self {
            rx,
            pending: Vec::new(),
            ended: false,
            _exit: exit,
        }
    }

    fn take(&mut self, max: usize) -> Vec<f32> {
        let n = self.pending.len().min(max);
        self.pending.drain(..n).collect()
    }
}

impl FrameSource for MicSource {
    fn read(&mut self, max: usize) -> crate::Result<Vec<f32>> {
        while !self.ended && self.pending.len() < max {
            match self.rx.recv() {
                Ok(chunk) => self.pending.extend(chunk),
                Err(_) => self.ended = true,
            }
        }
        Ok(self.take(max))
    }

    fn try_read(&mut self, max: usize) -> crate::Result<Vec<f32>> {
        while !self.ended && self.pending.len() < max {
            match self.rx.try_recv() {
                Ok(chunk) => self.pending.extend(chunk),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => self.ended = true,
            }
        }
        Ok(self.take(max))
    }
}

fn find_device(host: &cpal::Host, name: Option<&str>) -> crate::Result<Device> {
    match name {
        Some(name) => host
            .input_devices()?
            .find(|d| d.name().ok().as_deref() == Some(name))
            .ok_or_else(|| crate::AudioError::DeviceNotFound(name.to_string())),
        None => host
            .default_input_device()
            .ok_or_else(|| crate::AudioError::DeviceNotFound("default".to_string())),
    }
}

fn build_input_stream(
    device_name: Option<&str>,
    tx: Sender<Vec<f32>>,
) -> crate::Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = find_device(&host, device_name)?;
    let config = device.default_input_config().map_err(|e| {
        crate::AudioError::StreamError(format!("failed to get default config: {e}"))
    })?;

    let sample_rate = config.sample_rate().0;
    let channels = config.channels() as usize;
    let mut resampler = if sample_rate != SAMPLE_RATE {
        SincResampler::new(sample_rate, SAMPLE_RATE)
    } else {
        None
    };

    tracing::info!(
        device = %device.name().unwrap_or_else(|_| "unknown".into()),
        sample_rate,
        channels,
        "opening capture stream"
    );

    let stream = match config.sample_format() {
        SampleFormat::F32 => device.build_input_stream(
            &config.into(),
            move |data: &[f32], _| {
                let samples = process_input(data, channels, resampler.as_mut());
                if !samples.is_empty() {
                    let _ = tx.send(samples);
                }
            },
            |err| tracing::error!("audio stream error: {}", err),
            None,
        )?,
        SampleFormat::I16 => device.build_input_stream(
            &config.into(),
            move |data: &[i16], _| {
                let float: Vec<f32> = data.iter().map(|&s| s as f32 / 32768.0).collect();
                let samples = process_input(&float, channels, resampler.as_mut());
                if !samples.is_empty() {
                    let _ = tx.send(samples);
                }
            },
            |err| tracing::error!("audio stream error: {}", err),
            None,
        )?,
        format => {
            return Err(crate::AudioError::StreamError(format!(
                "unsupported sample format: {format:?}"
            )));
        }
    };

    stream
        .play()
        .map_err(|e| crate::AudioError::StreamError(format!("failed to start stream: {e}")))?;

    Ok(stream)
}

/// Downmix to mono and resample to the working rate.
fn process_input(samples: &[f32], channels: usize, resampler: Option<&mut SincResampler>) -> Vec<f32> {
    let mono = if channels > 1 {
        to_mono(samples, channels)
    } else {
        samples.to_vec()
    };

    match resampler {
        Some(r) => r.process(&mono),
        None => mono,
    }
}

#[inline]
fn to_mono(samples: &[f32], channels: usize) -> Vec<f32> {
    let mut output = Vec::with_capacity(samples.len() / channels);
    let inv_channels = 1.0 / channels as f32;
    for frame in samples.chunks_exact(channels) {
        output.push(frame.iter().sum::<f32>() * inv_channels);
    }
    output
}

use rubato::{FftFixedIn, Resampler as RubatoResampler};

/// Sinc resampler with buffering for variable callback sizes.
struct SincResampler {
    resampler: FftFixedIn<f32>,
    input_buffer: Vec<f32>,
    chunk_size: usize,
}

impl SincResampler {
    fn new(from_rate: u32, to_rate: u32) -> Option<Self> {
        let chunk_size = 256;
        let resampler =
            FftFixedIn::<f32>::new(from_rate as usize, to_rate as usize, chunk_size, 2, 1).ok()?;
        Some(Self {
            resampler,
            input_buffer: Vec::with_capacity(chunk_size * 2),
            chunk_size,
        })
    }

    fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        self.input_buffer.extend_from_slice(samples);

        let mut output = Vec::new();
        while self.input_buffer.len() >= self.chunk_size {
            let chunk: Vec<f32> = self.input_buffer.drain(..self.chunk_size).collect();
            if let Ok(resampled) = self.resampler.process(&[chunk], None) {
                if !resampled.is_empty() {
                    output.extend_from_slice(&resampled[0]);
                }
            }
        }
        output
    }
}
