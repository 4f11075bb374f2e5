use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    Sample,
};
use crossbeam_channel::bounded;

use super::BlockProcessor;
use crate::{AudioConfig, OculizerError, Result};

const PARK_INTERVAL: Duration = Duration::from_millis(100);

/// Spawns the thread that owns the cpal stream. Returns once the stream is
/// playing, or with the error that prevented it from opening.
pub(super) fn spawn(
    config: AudioConfig,
    processor: BlockProcessor,
    running: Arc<AtomicBool>,
) -> Result<JoinHandle<()>> {
    let (ready_tx, ready_rx) = bounded::<Result<()>>(1);

    let worker = thread::Builder::new()
        .name("oculizer-audio".into())
        .spawn(move || {
            let stream = match open_stream(&config, processor) {
                Ok(stream) => stream,
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                    return;
                }
            };
            if let Err(err) = stream.play() {
                let _ = ready_tx.send(Err(OculizerError::Stream(err.to_string())));
                return;
            }
            let _ = ready_tx.send(Ok(()));

            while running.load(Ordering::Acquire) {
                thread::park_timeout(PARK_INTERVAL);
            }
            drop(stream);
        })?;

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(worker),
        Ok(Err(err)) => {
            let _ = worker.join();
            Err(err)
        }
        Err(_) => {
            let _ = worker.join();
            Err(OculizerError::Stream(
                "capture thread exited before the stream opened".into(),
            ))
        }
    }
}

pub(super) fn input_device_names() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|err| OculizerError::DeviceUnavailable(err.to_string()))?;
    Ok(devices.filter_map(|device| device.name().ok()).collect())
}

fn select_device(config: &AudioConfig) -> Result<cpal::Device> {
    let host = cpal::default_host();
    match &config.device {
        Some(wanted) => host
            .input_devices()
            .map_err(|err| OculizerError::DeviceUnavailable(err.to_string()))?
            .find(|device| device.name().map(|name| &name == wanted).unwrap_or(false))
            .ok_or_else(|| {
                OculizerError::DeviceUnavailable(format!("no input device named `{wanted}`"))
            }),
        None => host
            .default_input_device()
            .ok_or_else(|| OculizerError::DeviceUnavailable("no default input device".into())),
    }
}

fn open_stream(config: &AudioConfig, processor: BlockProcessor) -> Result<cpal::Stream> {
    let device = select_device(config)?;
    let sample_format = device
        .default_input_config()
        .map_err(|err| OculizerError::DeviceUnavailable(err.to_string()))?
        .sample_format();

    // Block size is enforced by the assembler, so the host may pick its own
    // buffer length.
    let stream_config = cpal::StreamConfig {
        channels: config.channels,
        sample_rate: cpal::SampleRate(config.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, processor),
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, processor),
        cpal::SampleFormat::U16 => build_stream::<u16>(&device, &stream_config, processor),
        other => Err(OculizerError::Stream(format!(
            "unsupported sample format {other}"
        ))),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut processor: BlockProcessor,
) -> Result<cpal::Stream>
where
    T: cpal::SizedSample,
    f32: cpal::FromSample<T>,
{
    let errors = processor.errors.clone();
    let mut scratch: Vec<f32> = Vec::new();

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                scratch.clear();
                scratch.extend(data.iter().map(|sample| sample.to_sample::<f32>()));
                processor.push_interleaved(&scratch);
            },
            move |err| errors.push("audio", OculizerError::Stream(err.to_string())),
            None,
        )
        .map_err(|err| OculizerError::Stream(err.to_string()))
}
