use bytemuck::Zeroable;
use rand::Rng;

use super::oscillator::LeafOscillator;
use crate::net::schema::{StripFrame, TrailFrame, Vertex, FFT_SIZE, STRIP_BINS};

/// Lowest frequency that gets a non-zero radius.
const MIN_FREQUENCY_HZ: f32 = 20.0;

/// Frames whose colours fade as they age.
pub trait Fade {
    fn fade(&mut self, factor: f32);
}

impl Fade for StripFrame {
    fn fade(&mut self, factor: f32) {
        for v in self.vertices.iter_mut() {
            v.color[3] *= factor;
        }
    }
}

impl Fade for TrailFrame {
    fn fade(&mut self, factor: f32) {
        for v in self.points.iter_mut() {
            v.color[3] *= factor;
        }
    }
}

/// Logarithmic bin-to-radius mapping anchored so `center_frequency` lands on
/// `center_radius`. Bins at or below 20 Hz (including DC) map to 0.
pub fn bin_radii(sample_rate: f32, center_radius: f32, center_frequency: f32) -> Vec<f32> {
    let log_min = MIN_FREQUENCY_HZ.ln();
    let span = center_frequency.ln() - log_min;
    (0..STRIP_BINS)
        .map(|i| {
            let freq = i as f32 / FFT_SIZE as f32 * sample_rate;
            if freq <= MIN_FREQUENCY_HZ || span <= 0.0 {
                0.0
            } else {
                (freq.ln() - log_min) / span * center_radius
            }
        })
        .collect()
}

/// Turns per-bin magnitudes into rows of vertices swept around a leaf shape.
///
/// Each call to `generate` produces one row. Consecutive rows are stitched
/// into a strip segment; the older row's alpha is scaled by `row_decay`.
pub struct RadialStripGenerator {
    radii: Vec<f32>,
    previous: Vec<Vertex>,
    current: Vec<Vertex>,
    has_previous: bool,
    pub color: [f32; 3],
    pub amplitude_expansion: f32,
    pub row_decay: f32,
}

impl RadialStripGenerator {
    pub fn new(radii: Vec<f32>, color: [f32; 3]) -> Self {
        assert_eq!(radii.len(), STRIP_BINS);
        Self {
            radii,
            previous: vec![Vertex::default(); STRIP_BINS],
            current: vec![Vertex::default(); STRIP_BINS],
            has_previous: false,
            color,
            amplitude_expansion: 0.5,
            row_decay: 0.8,
        }
    }

    pub fn set_radii(&mut self, radii: Vec<f32>) {
        assert_eq!(radii.len(), STRIP_BINS);
        self.radii = radii;
    }

    /// The row produced by the latest `generate` call.
    pub fn current_row(&self) -> &[Vertex] {
        &self.current
    }

    /// Generate the next row and, when a previous row exists, the strip
    /// segment joining the two.
    ///
    /// Louder bins get more random angular scatter and a higher alpha.
    /// Missing magnitudes count as silence.
    pub fn generate<R: Rng>(
        &mut self,
        oscillator: &LeafOscillator,
        phase: f32,
        phase2: f32,
        magnitudes: &[f32],
        rng: &mut R,
    ) -> Option<StripFrame> {
        let base_radius = oscillator.radius(phase);
        let base_angle = oscillator.angle(phase);
        let base_angle2 = oscillator.angle(phase2);
        let [r, g, b] = self.color;

        std::mem::swap(&mut self.previous, &mut self.current);
        for (i, v) in self.current.iter_mut().enumerate() {
            let mag = magnitudes.get(i).copied().unwrap_or(0.0);
            let radius = self.radii[i] * base_radius;
            let scatter = self.amplitude_expansion * mag;
            let angle = base_angle + rng.gen_range(-1.0f32..=1.0) * scatter;
            let angle2 = base_angle2 + rng.gen_range(-1.0f32..=1.0) * scatter;
            v.position = [
                angle2.cos() * radius,
                angle.cos() * angle2.sin() * radius,
                -angle.sin() * radius,
            ];
            v.color = [r, g, b, mag];
        }

        if !self.has_previous {
            self.has_previous = true;
            return None;
        }

        let mut strip = StripFrame::zeroed();
        for (i, (old, new)) in self.previous.iter().zip(&self.current).enumerate() {
            let mut faded = *old;
            faded.color[3] *= self.row_decay;
            strip.vertices[2 * i] = faded;
            strip.vertices[2 * i + 1] = *new;
        }
        Some(strip)
    }
}
