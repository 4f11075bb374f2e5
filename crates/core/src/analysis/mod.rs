use std::{fmt, sync::Arc, time::Instant};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};

use crate::{OculizerError, Result};

/// Magnitude spectrum of one audio block.
///
/// Bin `i` corresponds to the frequency `i * sample_rate / block_size`. Frames
/// are immutable once produced and are superseded by the next block.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectrumFrame {
    pub captured_at: Instant,
    pub sample_rate: u32,
    pub block_size: usize,
    pub magnitudes: Vec<f32>,
}

impl SpectrumFrame {
    pub fn new(sample_rate: u32, block_size: usize, magnitudes: Vec<f32>) -> Self {
        Self {
            captured_at: Instant::now(),
            sample_rate,
            block_size,
            magnitudes,
        }
    }

    /// Builds a frame whose every bin holds `value`. Handy for synthetic input.
    pub fn uniform(sample_rate: u32, block_size: usize, value: f32) -> Self {
        Self::new(sample_rate, block_size, vec![value; block_size / 2 + 1])
    }

    pub fn nyquist_hz(&self) -> f32 {
        self.sample_rate as f32 / 2.0
    }

    /// Index of the bin closest to `frequency_hz`.
    pub fn bin_index(&self, frequency_hz: f32) -> usize {
        if self.sample_rate == 0 {
            return 0;
        }
        let index = (frequency_hz * self.block_size as f32 / self.sample_rate as f32).round();
        index.max(0.0) as usize
    }

    pub fn bin_frequency(&self, index: usize) -> f32 {
        if self.block_size == 0 {
            return 0.0;
        }
        index as f32 * self.sample_rate as f32 / self.block_size as f32
    }
}

/// Real FFT wrapper that turns fixed-size mono blocks into [`SpectrumFrame`]s.
pub struct SpectrumAnalyzer {
    sample_rate: u32,
    fft_planner: RealFftPlanner<f32>,
    fft: Option<FftResources>,
}

impl SpectrumAnalyzer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            fft_planner: RealFftPlanner::new(),
            fft: None,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Computes the magnitude spectrum of a mono block. The block length is
    /// the FFT length; plans are cached and rebuilt only when it changes.
    pub fn analyse(&mut self, samples: &[f32]) -> Result<SpectrumFrame> {
        if samples.len() < 2 {
            return Err(OculizerError::msg(
                "spectrum analysis requires blocks with at least two samples",
            ));
        }

        let len = samples.len();
        let fft = self.prepare_fft(len);
        fft.input.copy_from_slice(samples);
        fft.plan
            .process_with_scratch(&mut fft.input, &mut fft.spectrum, &mut fft.scratch)
            .map_err(|err| OculizerError::msg(format!("fft failed: {err}")))?;

        let magnitudes = fft.spectrum.iter().map(|bin| bin.norm()).collect();
        Ok(SpectrumFrame::new(self.sample_rate, len, magnitudes))
    }

    fn prepare_fft(&mut self, size: usize) -> &mut FftResources {
        let planner = &mut self.fft_planner;
        let fft = self.fft.get_or_insert_with(|| FftResources::plan(planner, size));
        if fft.size != size {
            *fft = FftResources::plan(planner, size);
        }
        fft
    }
}

struct FftResources {
    size: usize,
    plan: Arc<dyn RealToComplex<f32>>,
    scratch: Vec<Complex32>,
    spectrum: Vec<Complex32>,
    input: Vec<f32>,
}

impl FftResources {
    fn plan(planner: &mut RealFftPlanner<f32>, size: usize) -> Self {
        let plan = planner.plan_fft_forward(size);
        Self {
            size,
            scratch: plan.make_scratch_vec(),
            spectrum: plan.make_output_vec(),
            input: plan.make_input_vec(),
            plan,
        }
    }
}

impl fmt::Debug for SpectrumAnalyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectrumAnalyzer")
            .field("sample_rate", &self.sample_rate)
            .field("fft_size", &self.fft.as_ref().map(|fft| fft.size))
            .finish()
    }
}

/// Collects interleaved capture buffers of any length into fixed-size mono
/// blocks. Channels are averaged.
#[derive(Debug)]
pub struct BlockAssembler {
    channels: usize,
    block_size: usize,
    pending: Vec<f32>,
}

impl BlockAssembler {
    pub fn new(channels: u16, block_size: usize) -> Self {
        Self {
            channels: channels.max(1) as usize,
            block_size,
            pending: Vec::with_capacity(block_size),
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Appends interleaved samples and calls `on_block` for every block that
    /// fills up. A trailing partial frame (fewer samples than channels) is
    /// ignored.
    pub fn push_interleaved<F>(&mut self, data: &[f32], mut on_block: F)
    where
        F: FnMut(&[f32]),
    {
        for frame in data.chunks_exact(self.channels) {
            let mono = frame.iter().sum::<f32>() / self.channels as f32;
            self.pending.push(mono);
            if self.pending.len() == self.block_size {
                on_block(&self.pending);
                self.pending.clear();
            }
        }
    }

    pub fn reset(&mut self) {
        self.pending.clear();
    }
}
