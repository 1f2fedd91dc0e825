use bytemuck::Zeroable;
use glam::Vec3;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use triple_buffer::TripleBuffer;

use super::geometry::{bin_radii, RadialStripGenerator};
use super::history::BoundedHistoryBuffer;
use super::oscillator::LeafOscillator;
use super::pose::Pose;
use crate::audio::stft::Stft;
use crate::error::OscillatorError;
use crate::net::schema::{
    LooperData, StripFrame, TrailFrame, FFT_SIZE, STRIP_BINS, TRAIL_POINTS_PER_FRAME,
};

/// Trail points are dimmer than the strip vertex they are taken from.
const TRAIL_ALPHA: f32 = 0.2;

pub type Magnitudes = [f32; STRIP_BINS];

#[derive(Clone, Debug)]
pub struct LooperSettings {
    pub sample_rate: f32,
    pub frame_rate: f32,
    pub color: [f32; 3],
    pub center_radius: f32,
    pub center_frequency: f32,
    pub amplitude_expansion: f32,
    pub strip_decay: f32,
    pub max_strips: usize,
    pub trail_seconds: f32,
    pub magnitude_exponent: f32,
    pub magnitude_scale: f32,
}

impl Default for LooperSettings {
    fn default() -> Self {
        Self {
            sample_rate: 48000.0,
            frame_rate: 40.0,
            color: [1.0, 1.0, 1.0],
            center_radius: 1.0,
            center_frequency: 4000.0,
            amplitude_expansion: 0.5,
            strip_decay: 0.8,
            max_strips: 60,
            trail_seconds: 15.0,
            magnitude_exponent: 1.3,
            magnitude_scale: 1000.0,
        }
    }
}

/// Squash a raw bin magnitude into [0, 1) for display.
pub fn visual_magnitude(mag: f32, exponent: f32, scale: f32) -> f32 {
    (mag.powf(exponent) * scale).tanh()
}

/// Audio-thread half of a looper: runs the analysis and hands the latest
/// visual magnitudes to the animation tick without locking.
pub struct LooperAnalyzer {
    stft: Stft,
    magnitudes: Magnitudes,
    publish: triple_buffer::Input<Magnitudes>,
    exponent: f32,
    scale: f32,
    hops: u64,
}

impl LooperAnalyzer {
    pub fn feed(&mut self, sample: f32) {
        if !self.stft.feed(sample) {
            return;
        }
        let norm = 1.0 / self.stft.window_size() as f32;
        for (k, m) in self.magnitudes.iter_mut().enumerate() {
            *m = visual_magnitude(self.stft.bin(k).norm() * norm, self.exponent, self.scale);
        }
        self.publish.write(self.magnitudes);
        self.hops += 1;
        log::trace!("looper analysis hop {}", self.hops);
    }

    pub fn hops(&self) -> u64 {
        self.hops
    }
}

/// Producer-side looper: turns the analysed spectrum into strips and trail
/// points around its pose and keeps the ring of recent frames to replicate.
pub struct LeafLooper {
    pub pose: Pose,
    oscillator: LeafOscillator,
    generator: RadialStripGenerator,
    magnitudes: triple_buffer::Output<Magnitudes>,
    strips: BoundedHistoryBuffer<StripFrame>,
    trail: BoundedHistoryBuffer<TrailFrame>,
    data: Box<LooperData>,
    do_trail: bool,
    settings: LooperSettings,
    rng: SmallRng,
}

impl LeafLooper {
    /// Create a looper and the analyzer that feeds it. The analyzer belongs
    /// on the audio thread.
    pub fn new(oscillator: LeafOscillator, settings: LooperSettings, seed: u64) -> (Self, LooperAnalyzer) {
        let (input, output) = TripleBuffer::new(&[0.0; STRIP_BINS]).split();
        let analyzer = LooperAnalyzer {
            stft: Stft::new(FFT_SIZE),
            magnitudes: [0.0; STRIP_BINS],
            publish: input,
            exponent: settings.magnitude_exponent,
            scale: settings.magnitude_scale,
            hops: 0,
        };

        let radii = bin_radii(settings.sample_rate, settings.center_radius, settings.center_frequency);
        let mut generator = RadialStripGenerator::new(radii, settings.color);
        generator.amplitude_expansion = settings.amplitude_expansion;
        generator.row_decay = settings.strip_decay;

        let mut looper = Self {
            pose: Pose::default(),
            oscillator,
            generator,
            magnitudes: output,
            strips: BoundedHistoryBuffer::new(settings.max_strips, settings.strip_decay),
            trail: BoundedHistoryBuffer::with_length_in_seconds(settings.trail_seconds, settings.frame_rate),
            data: bytemuck::zeroed_box(),
            do_trail: true,
            settings,
            rng: SmallRng::seed_from_u64(seed),
        };
        looper.sync_data();
        (looper, analyzer)
    }

    /// Advance one animation tick.
    ///
    /// Always pushes exactly one strip and one trail frame into the
    /// replication ring (zeroed on the very first tick, which has no previous
    /// row to stitch to) so ring slots line up with the frame counter.
    pub fn push_new_strip(&mut self, phase: f32, phase2: f32) {
        let magnitudes = self.magnitudes.read();
        let strip = self
            .generator
            .generate(&self.oscillator, phase, phase2, magnitudes, &mut self.rng);

        let row = self.generator.current_row();
        let mut loudest: Vec<usize> = (0..STRIP_BINS).collect();
        loudest.select_nth_unstable_by(TRAIL_POINTS_PER_FRAME - 1, |&a, &b| {
            magnitudes[b].total_cmp(&magnitudes[a])
        });

        let mut trail = TrailFrame::default();
        for (point, &bin) in trail.points.iter_mut().zip(&loudest[..TRAIL_POINTS_PER_FRAME]) {
            let vertex = row[bin];
            let world = self.pose.transform_point(Vec3::from_array(vertex.position));
            point.position = world.to_array();
            point.color = vertex.color;
            point.color[3] *= TRAIL_ALPHA;
        }

        if self.do_trail {
            self.trail.push(trail);
        }
        match strip {
            Some(strip) => {
                self.strips.push(strip);
                self.data.push_frames(&strip, &trail);
            }
            None => self.data.push_frames(&StripFrame::zeroed(), &trail),
        }
        self.data.pose = self.pose.to_wire();
    }

    pub fn set_bin_radii(&mut self, center_radius: f32, center_frequency: f32) {
        self.settings.center_radius = center_radius;
        self.settings.center_frequency = center_frequency;
        self.generator
            .set_radii(bin_radii(self.settings.sample_rate, center_radius, center_frequency));
    }

    pub fn set_trail_length_in_seconds(&mut self, seconds: f32) {
        self.settings.trail_seconds = seconds;
        self.trail.set_length_in_seconds(seconds, self.settings.frame_rate);
        self.sync_data();
    }

    pub fn set_weighting(&mut self, weighting: f32) -> Result<(), OscillatorError> {
        self.oscillator.set_weighting(weighting)
    }

    pub fn set_color(&mut self, color: [f32; 3]) {
        self.generator.color = color;
    }

    pub fn set_amplitude_expansion(&mut self, amount: f32) {
        self.generator.amplitude_expansion = amount;
    }

    pub fn set_do_trail(&mut self, do_trail: bool) {
        self.do_trail = do_trail;
        if !do_trail {
            self.trail.clear();
        }
        self.sync_data();
    }

    fn sync_data(&mut self) {
        self.data.trail_capacity = self.trail.capacity() as u32;
        self.data.trail_decay = self.trail.decay();
        self.data.do_trail = self.do_trail as u32;
        self.data.pose = self.pose.to_wire();
    }

    pub fn data(&self) -> &LooperData {
        &self.data
    }

    pub fn strips(&self) -> &BoundedHistoryBuffer<StripFrame> {
        &self.strips
    }

    pub fn trail(&self) -> &BoundedHistoryBuffer<TrailFrame> {
        &self.trail
    }

    pub fn oscillator(&self) -> &LeafOscillator {
        &self.oscillator
    }
}

/// Consumer-side looper rebuilt from replicated frames.
pub struct RemoteLooper {
    pub pose: Pose,
    strips: BoundedHistoryBuffer<StripFrame>,
    trail: BoundedHistoryBuffer<TrailFrame>,
    do_trail: bool,
}

impl RemoteLooper {
    pub fn new(max_strips: usize, strip_decay: f32) -> Self {
        Self {
            pose: Pose::default(),
            strips: BoundedHistoryBuffer::new(max_strips, strip_decay),
            trail: BoundedHistoryBuffer::new(1, 1.0),
            do_trail: true,
        }
    }

    /// Take pose and trail settings from `data` and replay the ring slots in
    /// `slots`, oldest first.
    pub fn apply(&mut self, data: &LooperData, slots: std::ops::Range<usize>) {
        self.pose = Pose::from_wire(&data.pose);
        self.trail.set_capacity(data.trail_capacity as usize);
        self.trail.set_decay(data.trail_decay);
        self.do_trail = data.do_trail != 0;
        if !self.do_trail {
            self.trail.clear();
        }

        for slot in slots {
            let strip = &data.strips[slot];
            // the producer's first tick has no strip to send
            if strip.vertices.iter().any(|v| v.alpha() != 0.0 || v.position != [0.0; 3]) {
                self.strips.push(*strip);
            }
            if self.do_trail {
                self.trail.push(data.trails[slot]);
            }
        }
    }

    pub fn strips(&self) -> &BoundedHistoryBuffer<StripFrame> {
        &self.strips
    }

    pub fn trail(&self) -> &BoundedHistoryBuffer<TrailFrame> {
        &self.trail
    }

    pub fn do_trail(&self) -> bool {
        self.do_trail
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::schema::REDUNDANCY;
    use crate::visual::oscillator::LeafCurve;
    use std::f32::consts::TAU;
    use std::sync::Arc;

    fn oscillator() -> LeafOscillator {
        let pts: Vec<(f32, f32)> = (0..360)
            .map(|i| {
                let a = TAU * i as f32 / 360.0;
                (a.cos(), a.sin())
            })
            .collect();
        LeafOscillator::Single(Arc::new(LeafCurve::from_displacements(&pts)))
    }

    fn sine(freq: f32, sample_rate: f32, len: usize) -> impl Iterator<Item = f32> {
        (0..len).map(move |i| 0.5 * (TAU * freq * i as f32 / sample_rate).sin())
    }

    #[test]
    fn visual_magnitude_is_bounded() {
        assert_eq!(visual_magnitude(0.0, 1.3, 1000.0), 0.0);
        assert!(visual_magnitude(1.0, 1.3, 1000.0) <= 1.0);
        let quiet = visual_magnitude(1e-4, 1.3, 1000.0);
        let loud = visual_magnitude(1e-3, 1.3, 1000.0);
        assert!(quiet > 0.0 && quiet < loud);
    }

    #[test]
    fn first_tick_fills_ring_with_empty_strip() {
        let (mut looper, _analyzer) = LeafLooper::new(oscillator(), LooperSettings::default(), 1);
        looper.push_new_strip(0.0, 0.25);
        assert_eq!(looper.strips().len(), 0);
        let newest = &looper.data().strips[REDUNDANCY - 1];
        assert!(newest.vertices.iter().all(|v| v.alpha() == 0.0));

        looper.push_new_strip(0.01, 0.25);
        assert_eq!(looper.strips().len(), 1);
        assert_eq!(looper.trail().len(), 2);
    }

    #[test]
    fn tone_lights_up_its_bins_and_trail() {
        let settings = LooperSettings::default();
        let sample_rate = settings.sample_rate;
        let (mut looper, mut analyzer) = LeafLooper::new(oscillator(), settings, 2);
        // bin 40 of a 1024-point transform
        let freq = 40.0 * sample_rate / FFT_SIZE as f32;
        for s in sine(freq, sample_rate, 4096) {
            analyzer.feed(s);
        }
        assert_eq!(analyzer.hops(), 16);

        looper.pose = Pose::at(Vec3::new(0.0, 0.0, -4.0));
        looper.push_new_strip(0.0, 0.25);
        looper.push_new_strip(0.0, 0.25);

        let strip = looper.data().strips[REDUNDANCY - 1];
        let tone = strip.vertices[2 * 40 + 1].alpha();
        let far = strip.vertices[2 * 300 + 1].alpha();
        assert!(tone > 0.9, "tone alpha {tone}");
        assert!(far < 0.1, "far alpha {far}");

        // trail points are the loudest bins, dimmed and placed in world space
        let trail = looper.data().trails[REDUNDANCY - 1];
        for p in trail.points.iter() {
            assert!(p.alpha() <= TRAIL_ALPHA + 1e-6);
            assert!(p.position[2] < -2.0);
        }
        // the tone's main lobe spans three bins
        let lit = trail.points.iter().filter(|p| p.alpha() > 0.15).count();
        assert!(lit >= 3, "only {lit} bright trail points");
    }

    #[test]
    fn setters_reach_wire_data() {
        let (mut looper, _analyzer) = LeafLooper::new(oscillator(), LooperSettings::default(), 3);
        assert_eq!(looper.data().trail_capacity, 600);
        looper.set_trail_length_in_seconds(2.0);
        assert_eq!(looper.data().trail_capacity, 80);
        assert!((looper.data().trail_decay.powi(80) - 0.05).abs() < 1e-3);

        looper.set_do_trail(false);
        assert_eq!(looper.data().do_trail, 0);
        looper.push_new_strip(0.0, 0.0);
        assert!(looper.trail().is_empty());

        assert!(looper.set_weighting(2.0).is_err());
        looper.set_bin_radii(2.0, 1000.0);
        looper.set_color([0.0, 1.0, 0.0]);
        looper.set_amplitude_expansion(0.0);
        looper.push_new_strip(0.5, 0.0);
        let strip = looper.data().strips[REDUNDANCY - 1];
        assert_eq!(&strip.vertices[1].color[..3], &[0.0, 1.0, 0.0]);
    }

    #[test]
    fn remote_looper_replays_slots() {
        let (mut looper, _analyzer) = LeafLooper::new(oscillator(), LooperSettings::default(), 4);
        looper.pose = Pose::at(Vec3::new(1.0, 2.0, 3.0));
        for i in 0..4 {
            looper.push_new_strip(i as f32 * 0.1, 0.0);
        }

        let mut remote = RemoteLooper::new(60, 0.8);
        remote.apply(looper.data(), 0..REDUNDANCY);
        // slot 0 was never written and slot 1 is the empty first tick
        assert_eq!(remote.strips().len(), 3);
        assert_eq!(remote.trail().len(), REDUNDANCY);
        assert_eq!(remote.trail().capacity(), 600);
        assert_eq!(remote.pose.position, Vec3::new(1.0, 2.0, 3.0));

        remote.apply(looper.data(), REDUNDANCY - 1..REDUNDANCY);
        assert_eq!(remote.strips().len(), 4);
    }
}
