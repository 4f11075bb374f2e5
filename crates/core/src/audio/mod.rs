use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::JoinHandle,
    time::Instant,
};

use arc_swap::ArcSwapOption;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::{info, warn};

use crate::{AudioConfig, BlockAssembler, OculizerError, Result, SpectrumAnalyzer, SpectrumFrame};

#[cfg(feature = "audio")]
mod capture;

/// Single-slot holder for the most recent [`SpectrumFrame`].
///
/// Publishing overwrites whatever was there; readers get the previous or the
/// new frame whole and never block the publisher.
#[derive(Clone)]
pub struct FrameSlot {
    latest: Arc<ArcSwapOption<SpectrumFrame>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self {
            latest: Arc::new(ArcSwapOption::empty()),
        }
    }

    pub fn publish(&self, frame: SpectrumFrame) {
        self.latest.store(Some(Arc::new(frame)));
    }

    /// Returns the freshest frame, or `None` if nothing has been published.
    pub fn latest(&self) -> Option<Arc<SpectrumFrame>> {
        self.latest.load_full()
    }

    pub fn clear(&self) {
        self.latest.store(None);
    }
}

impl Default for FrameSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FrameSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSlot")
            .field("filled", &self.latest.load().is_some())
            .finish()
    }
}

/// A non-fatal error recorded by one of the worker threads.
#[derive(Debug)]
pub struct ErrorRecord {
    pub origin: &'static str,
    pub at: Instant,
    pub error: OculizerError,
}

/// Bounded, inspectable error channel shared by the audio and light threads.
///
/// Pushing never blocks: once the log is full the oldest record is dropped.
#[derive(Clone)]
pub struct ErrorLog {
    tx: Sender<ErrorRecord>,
    rx: Receiver<ErrorRecord>,
}

impl ErrorLog {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        Self { tx, rx }
    }

    pub fn push(&self, origin: &'static str, error: OculizerError) {
        warn!(origin, %error, "recorded error");
        let mut record = ErrorRecord {
            origin,
            at: Instant::now(),
            error,
        };
        loop {
            match self.tx.try_send(record) {
                Ok(()) => return,
                Err(TrySendError::Full(rejected)) => {
                    let _ = self.rx.try_recv();
                    record = rejected;
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }

    /// Removes and returns every record accumulated so far, oldest first.
    pub fn drain(&self) -> Vec<ErrorRecord> {
        self.rx.try_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl Default for ErrorLog {
    fn default() -> Self {
        Self::new(256)
    }
}

impl std::fmt::Debug for ErrorLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorLog").field("len", &self.len()).finish()
    }
}

/// Turns interleaved capture buffers into published spectrum frames.
///
/// This is the body of the capture callback. It is exposed so that other
/// sample sources (files, tests) can drive the same pipeline.
#[derive(Debug)]
pub struct BlockProcessor {
    assembler: BlockAssembler,
    analyzer: SpectrumAnalyzer,
    frames: FrameSlot,
    errors: ErrorLog,
    running: Arc<AtomicBool>,
}

impl BlockProcessor {
    pub fn push_interleaved(&mut self, data: &[f32]) {
        if !self.running.load(Ordering::Acquire) {
            return;
        }

        let Self {
            assembler,
            analyzer,
            frames,
            errors,
            ..
        } = self;
        assembler.push_interleaved(data, |block| match analyzer.analyse(block) {
            Ok(frame) => frames.publish(frame),
            Err(err) => errors.push("audio", err),
        });
    }

    /// Records a status flag raised by the capture backend for one block.
    pub fn report_status(&self, status: impl Into<String>) {
        self.errors
            .push("audio", OculizerError::Stream(status.into()));
    }
}

/// Owns the capture stream and publishes one [`SpectrumFrame`] per block.
#[derive(Debug)]
pub struct AudioListener {
    config: AudioConfig,
    frames: FrameSlot,
    errors: ErrorLog,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl AudioListener {
    pub fn new(config: AudioConfig, frames: FrameSlot, errors: ErrorLog) -> Self {
        Self {
            config,
            frames,
            errors,
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    pub fn config(&self) -> &AudioConfig {
        &self.config
    }

    pub fn frames(&self) -> FrameSlot {
        self.frames.clone()
    }

    pub fn errors(&self) -> ErrorLog {
        self.errors.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Builds a processor bound to this listener's slot, error log and
    /// running flag.
    pub fn block_processor(&self) -> BlockProcessor {
        BlockProcessor {
            assembler: BlockAssembler::new(self.config.channels, self.config.block_size()),
            analyzer: SpectrumAnalyzer::new(self.config.sample_rate),
            frames: self.frames.clone(),
            errors: self.errors.clone(),
            running: self.running.clone(),
        }
    }

    /// Opens the capture stream and starts publishing frames.
    pub fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Err(OculizerError::msg("audio listener already started"));
        }
        self.config.validate()?;

        self.running.store(true, Ordering::Release);
        match self.spawn_capture() {
            Ok(worker) => {
                info!(
                    sample_rate = self.config.sample_rate,
                    block_size = self.config.block_size(),
                    "audio listener started"
                );
                self.worker = Some(worker);
                Ok(())
            }
            Err(err) => {
                self.running.store(false, Ordering::Release);
                Err(err)
            }
        }
    }

    /// Closes the stream. Safe to call when never started. No frame is
    /// published after this returns.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            worker.thread().unpark();
            if worker.join().is_err() {
                self.errors
                    .push("audio", OculizerError::Stream("capture thread panicked".into()));
            }
            info!("audio listener stopped");
        }
    }

    #[cfg(feature = "audio")]
    fn spawn_capture(&self) -> Result<JoinHandle<()>> {
        capture::spawn(self.config.clone(), self.block_processor(), self.running.clone())
    }

    #[cfg(not(feature = "audio"))]
    fn spawn_capture(&self) -> Result<JoinHandle<()>> {
        Err(OculizerError::DeviceUnavailable(
            "built without the `audio` feature".into(),
        ))
    }

    /// Names of the capture devices offered by the default host.
    #[cfg(feature = "audio")]
    pub fn list_input_devices() -> Result<Vec<String>> {
        capture::input_device_names()
    }

    #[cfg(not(feature = "audio"))]
    pub fn list_input_devices() -> Result<Vec<String>> {
        Err(OculizerError::DeviceUnavailable(
            "built without the `audio` feature".into(),
        ))
    }
}

impl Drop for AudioListener {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listener(channels: u16) -> AudioListener {
        let config = AudioConfig {
            sample_rate: 1_000,
            min_frequency_hz: 125.0,
            channels,
            device: None,
        };
        AudioListener::new(config, FrameSlot::new(), ErrorLog::new(8))
    }

    #[test]
    fn latest_publish_wins() {
        let slot = FrameSlot::new();
        assert!(slot.latest().is_none());

        slot.publish(SpectrumFrame::uniform(1_000, 8, 1.0));
        slot.publish(SpectrumFrame::uniform(1_000, 8, 2.0));

        let first = slot.latest().unwrap();
        assert_eq!(first.magnitudes[0], 2.0);
        let second = slot.latest().unwrap();
        assert_eq!(second.magnitudes[0], 2.0);
    }

    #[test]
    fn error_log_drops_oldest_when_full() {
        let log = ErrorLog::new(2);
        log.push("test", OculizerError::msg("one"));
        log.push("test", OculizerError::msg("two"));
        log.push("test", OculizerError::msg("three"));

        let drained: Vec<String> = log.drain().into_iter().map(|r| r.error.to_string()).collect();
        assert_eq!(drained, vec!["two", "three"]);
        assert!(log.is_empty());
    }

    #[test]
    fn processor_publishes_once_per_block() {
        let listener = listener(2);
        listener.running.store(true, Ordering::Release);
        let mut processor = listener.block_processor();

        processor.push_interleaved(&[0.5; 10]);
        assert!(listener.frames().latest().is_none());

        processor.push_interleaved(&[0.5; 6]);
        let frame = listener.frames().latest().unwrap();
        assert_eq!(frame.block_size, 8);
        assert_eq!(frame.magnitudes.len(), 5);
        assert!((frame.magnitudes[0] - 4.0).abs() < 1e-5);
    }

    #[test]
    fn processor_is_inert_when_not_running() {
        let listener = listener(1);
        let mut processor = listener.block_processor();
        processor.push_interleaved(&[1.0; 32]);
        assert!(listener.frames().latest().is_none());
    }

    #[test]
    fn status_flags_land_in_error_log() {
        let listener = listener(1);
        listener.block_processor().report_status("input overflow");
        let records = listener.errors().drain();
        assert_eq!(records.len(), 1);
        assert!(matches!(records[0].error, OculizerError::Stream(_)));
    }

    #[test]
    fn stop_without_start_is_harmless() {
        let mut listener = listener(1);
        listener.stop();
        listener.stop();
        assert!(!listener.is_running());
    }

    #[cfg(not(feature = "audio"))]
    #[test]
    fn start_without_backend_reports_missing_device() {
        let mut listener = listener(1);
        let err = listener.start().unwrap_err();
        assert!(matches!(err, OculizerError::DeviceUnavailable(_)));
        assert!(!listener.is_running());
    }
}
