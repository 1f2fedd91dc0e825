use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rustfft::num_complex::Complex;
use serde::Deserialize;
use std::f32::consts::TAU;

use super::stft::Stft;

/// Exponential (single-pole) smoothing of bin magnitudes with random phase.
#[derive(Clone, Debug)]
pub struct LeakySpectralAverager {
    averages: Vec<f32>,
    leak: f32,
}

impl LeakySpectralAverager {
    pub fn new(num_bins: usize, leak: f32) -> Self {
        let mut averager = Self {
            averages: vec![0.0; num_bins],
            leak: 0.0,
        };
        averager.set_leak(leak);
        averager
    }

    #[cfg(test)]
    pub fn leak(&self) -> f32 {
        self.leak
    }

    /// Clamped to [0, 1); non-finite values become 0.
    pub fn set_leak(&mut self, leak: f32) {
        self.leak = clamp_leak(leak);
    }

    pub fn averages(&self) -> &[f32] {
        &self.averages
    }

    pub fn apply(&mut self, bins: &mut [Complex<f32>], rng: &mut SmallRng) {
        debug_assert_eq!(bins.len(), self.averages.len());
        for (bin, avg) in bins.iter_mut().zip(self.averages.iter_mut()) {
            // nudge the average toward the current magnitude
            *avg = self.leak * *avg + (1.0 - self.leak) * bin.norm();
            *bin = Complex::from_polar(*avg, rng.gen::<f32>() * TAU);
        }
    }
}

fn clamp_leak(leak: f32) -> f32 {
    if leak.is_finite() {
        leak.clamp(0.0, 1.0 - f32::EPSILON)
    } else {
        0.0
    }
}

/// Compander settings for the time-neutral policy.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CompanderParams {
    /// Bins below this share of the frame maximum get expanded
    pub threshold: f32,
    /// Exponent applied at or above the threshold
    pub compression: f32,
    /// Exponent reached by a bin at zero relative magnitude
    pub max_expansion: f32,
    pub gain: f32,
}

impl Default for CompanderParams {
    fn default() -> Self {
        Self {
            threshold: 0.3,
            compression: 0.4,
            max_expansion: 3.0,
            gain: 0.4,
        }
    }
}

impl CompanderParams {
    /// Exponent for a bin at `relative` share of the frame maximum.
    pub fn exponent(&self, relative: f32) -> f32 {
        if relative < self.threshold && self.threshold > 0.0 {
            let depth = (self.threshold - relative) / self.threshold;
            self.compression + depth * (self.max_expansion - self.compression)
        } else {
            self.compression
        }
    }

    /// Compand one magnitude against the frame maximum.
    ///
    /// A silent frame (`max_mag == 0`) counts every bin as fully below the
    /// threshold; a zero magnitude always compands to zero.
    pub fn compand(&self, mag: f32, max_mag: f32) -> f32 {
        if mag <= 0.0 {
            return 0.0;
        }
        let relative = if max_mag > 0.0 { mag / max_mag } else { 0.0 };
        mag.powf(self.exponent(relative)) * self.gain
    }
}

/// Compansion relative to the frame maximum folded into an unweighted
/// running mean, so every frame counts equally regardless of when it arrived.
#[derive(Clone, Debug)]
pub struct TimeNeutralCompander {
    averages: Vec<f32>,
    frames_averaged: u64,
    params: CompanderParams,
}

impl TimeNeutralCompander {
    pub fn new(num_bins: usize, params: CompanderParams) -> Self {
        Self {
            averages: vec![0.0; num_bins],
            frames_averaged: 0,
            params,
        }
    }

    #[cfg(test)]
    pub fn frames_averaged(&self) -> u64 {
        self.frames_averaged
    }

    pub fn averages(&self) -> &[f32] {
        &self.averages
    }

    pub fn apply(&mut self, bins: &mut [Complex<f32>], rng: &mut SmallRng) {
        debug_assert_eq!(bins.len(), self.averages.len());
        let max_mag = bins.iter().map(|c| c.norm()).fold(0.0f32, f32::max);
        let n = self.frames_averaged as f64;

        for (bin, avg) in bins.iter_mut().zip(self.averages.iter_mut()) {
            let companded = self.params.compand(bin.norm(), max_mag);
            // running mean in f64
            *avg = ((n * *avg as f64 + companded as f64) / (n + 1.0)) as f32;
            *bin = Complex::from_polar(*avg, rng.gen::<f32>() * TAU);
        }
        self.frames_averaged += 1;
    }
}

/// The smoothing applied to each completed frame.
#[derive(Clone, Debug)]
pub enum SmoothingPolicy {
    Leaky(LeakySpectralAverager),
    TimeNeutral(TimeNeutralCompander),
}

impl SmoothingPolicy {
    pub fn apply(&mut self, bins: &mut [Complex<f32>], rng: &mut SmallRng) {
        match self {
            Self::Leaky(averager) => averager.apply(bins, rng),
            Self::TimeNeutral(compander) => compander.apply(bins, rng),
        }
    }

    pub fn averages(&self) -> &[f32] {
        match self {
            Self::Leaky(averager) => averager.averages(),
            Self::TimeNeutral(compander) => compander.averages(),
        }
    }
}

/// Analysis, smoothing and resynthesis of one sample stream.
pub struct Stretcher {
    stft: Stft,
    policy: SmoothingPolicy,
    gain: f32,
    rng: SmallRng,
}

impl Stretcher {
    pub fn leaky(window_size: usize, leak: f32, gain: f32, seed: u64) -> Self {
        let stft = Stft::new(window_size);
        let policy = SmoothingPolicy::Leaky(LeakySpectralAverager::new(stft.num_bins(), leak));
        Self::with_policy(stft, policy, gain, seed)
    }

    pub fn time_neutral(window_size: usize, params: CompanderParams, seed: u64) -> Self {
        let stft = Stft::new(window_size);
        let policy =
            SmoothingPolicy::TimeNeutral(TimeNeutralCompander::new(stft.num_bins(), params));
        // compander applies its own gain before averaging
        Self::with_policy(stft, policy, 1.0, seed)
    }

    pub fn with_policy(stft: Stft, policy: SmoothingPolicy, gain: f32, seed: u64) -> Self {
        assert_eq!(stft.num_bins(), policy.averages().len());
        Self {
            stft,
            policy,
            gain,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    /// Consume one input sample and return one resynthesised sample.
    pub fn process(&mut self, sample: f32) -> f32 {
        if self.stft.feed(sample) {
            self.policy.apply(self.stft.bins_mut(), &mut self.rng);
            self.stft.resynthesize();
        }
        self.stft.next_output() * self.gain
    }
}

/// How the summed output of a bank is scaled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BankNormalization {
    /// Divide by sqrt(N): keeps energy roughly constant for uncorrelated outputs
    #[default]
    Sqrt,
    /// Divide by N
    Linear,
    None,
}

impl BankNormalization {
    pub fn scale(self, count: usize) -> f32 {
        if count == 0 {
            return 0.0;
        }
        match self {
            Self::Sqrt => 1.0 / (count as f32).sqrt(),
            Self::Linear => 1.0 / count as f32,
            Self::None => 1.0,
        }
    }
}

/// Several stretchers over the same input, summed.
pub struct StretcherBank {
    stretchers: Vec<Stretcher>,
    scale: f32,
}

impl StretcherBank {
    pub fn new(stretchers: Vec<Stretcher>, normalization: BankNormalization) -> Self {
        let scale = normalization.scale(stretchers.len());
        Self { stretchers, scale }
    }

    /// One leaky stretcher per coefficient. Missing gains default to 1.
    pub fn leaky(
        window_size: usize,
        leaks: &[f32],
        gains: &[f32],
        normalization: BankNormalization,
        seed: u64,
    ) -> Self {
        let stretchers = leaks
            .iter()
            .enumerate()
            .map(|(i, &leak)| {
                let gain = gains.get(i).copied().unwrap_or(1.0);
                Stretcher::leaky(window_size, leak, gain, seed.wrapping_add(i as u64))
            })
            .collect();
        Self::new(stretchers, normalization)
    }

    pub fn len(&self) -> usize {
        self.stretchers.len()
    }

    pub fn process(&mut self, sample: f32) -> f32 {
        let sum: f32 = self.stretchers.iter_mut().map(|s| s.process(sample)).sum();
        sum * self.scale
    }
}
