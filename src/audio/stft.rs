use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

/// Hann windowed short-time transform with overlap-add resynthesis.
///
/// Samples go in one at a time through `feed`. Every `hop_size` samples a new
/// frame is analysed and its bins become available through `bin`. Callers may
/// rewrite the bins and call `resynthesize`, after which `next_output` yields
/// the resynthesised signal one sample per input sample.
pub struct Stft {
    window_size: usize,
    hop_size: usize,
    window: Vec<f32>,

    // Analysis ring, oldest sample at `input_pos`
    input: Vec<f32>,
    input_pos: usize,
    hop_counter: usize,

    bins: Vec<Complex<f32>>,
    spectrum: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,

    // Overlap-add ring, next sample to emit at `output_pos`
    output: Vec<f32>,
    output_pos: usize,
    synthesis_scale: f32,
}

impl Stft {
    /// Standard configuration: hop is a quarter of the window.
    pub fn new(window_size: usize) -> Self {
        Self::with_hop(window_size, window_size / 4)
    }

    pub fn with_hop(window_size: usize, hop_size: usize) -> Self {
        assert!(window_size >= 2, "window must hold at least two samples");
        assert!(
            hop_size > 0 && hop_size <= window_size,
            "hop must be within (0, window]"
        );

        let mut planner = FftPlanner::<f32>::new();
        let forward = planner.plan_fft_forward(window_size);
        let inverse = planner.plan_fft_inverse(window_size);
        let scratch_len = forward
            .get_inplace_scratch_len()
            .max(inverse.get_inplace_scratch_len());

        let window = hann_window(window_size);

        // Sum of the squared window over every frame touching one output sample.
        // Hann² at 75% overlap gives 1.5, the general case is computed.
        let overlap_gain: f32 = (0..hop_size)
            .map(|offset| {
                (offset..window_size)
                    .step_by(hop_size)
                    .map(|i| window[i] * window[i])
                    .sum::<f32>()
            })
            .sum::<f32>()
            / hop_size as f32;

        Self {
            window_size,
            hop_size,
            window,
            input: vec![0.0; window_size],
            input_pos: 0,
            hop_counter: 0,
            bins: vec![Complex::new(0.0, 0.0); window_size / 2 + 1],
            spectrum: vec![Complex::new(0.0, 0.0); window_size],
            scratch: vec![Complex::new(0.0, 0.0); scratch_len],
            forward,
            inverse,
            output: vec![0.0; window_size],
            output_pos: 0,
            synthesis_scale: 1.0 / (window_size as f32 * overlap_gain.max(f32::EPSILON)),
        }
    }

    /// Push one sample. Returns true when a new frame has been analysed.
    ///
    /// Non-finite samples are treated as silence so a single bad sample
    /// cannot poison downstream averages.
    pub fn feed(&mut self, sample: f32) -> bool {
        self.input[self.input_pos] = if sample.is_finite() { sample } else { 0.0 };
        self.input_pos = (self.input_pos + 1) % self.window_size;
        self.hop_counter += 1;

        if self.hop_counter < self.hop_size {
            return false;
        }
        self.hop_counter = 0;
        self.analyze();
        true
    }

    fn analyze(&mut self) {
        for i in 0..self.window_size {
            let s = self.input[(self.input_pos + i) % self.window_size];
            self.spectrum[i] = Complex::new(s * self.window[i], 0.0);
        }
        self.forward
            .process_with_scratch(&mut self.spectrum, &mut self.scratch);
        let num_bins = self.bins.len();
        self.bins.copy_from_slice(&self.spectrum[..num_bins]);
    }

    pub fn num_bins(&self) -> usize {
        self.bins.len()
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn bin(&self, k: usize) -> Complex<f32> {
        self.bins[k]
    }

    pub fn bins_mut(&mut self) -> &mut [Complex<f32>] {
        &mut self.bins
    }

    /// Inverse-transform the current bins and overlap-add them into the output.
    pub fn resynthesize(&mut self) {
        let n = self.window_size;
        let num_bins = self.bins.len();

        // Rebuild a Hermitian spectrum so the inverse is real
        self.spectrum[..num_bins].copy_from_slice(&self.bins);
        self.spectrum[0].im = 0.0;
        if n % 2 == 0 {
            self.spectrum[n / 2].im = 0.0;
        }
        for k in num_bins..n {
            self.spectrum[k] = self.spectrum[n - k].conj();
        }

        self.inverse
            .process_with_scratch(&mut self.spectrum, &mut self.scratch);

        for i in 0..n {
            let pos = (self.output_pos + i) % n;
            self.output[pos] += self.spectrum[i].re * self.window[i] * self.synthesis_scale;
        }
    }

    /// Pop the next resynthesised sample.
    pub fn next_output(&mut self) -> f32 {
        let out = self.output[self.output_pos];
        self.output[self.output_pos] = 0.0;
        self.output_pos = (self.output_pos + 1) % self.window_size;
        out
    }
}

/// Periodic Hann window (sums to a constant under 75% overlap)
pub fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / size as f32).cos()))
        .collect()
}
