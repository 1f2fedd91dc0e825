use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::audio::smoothing::{BankNormalization, CompanderParams};
use crate::visual::looper::LooperSettings;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub stretch: StretchConfig,
    #[serde(default)]
    pub visual: VisualConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub files: FilesConfig,
}

#[derive(Debug, Deserialize)]
pub struct AudioConfig {
    /// Used when the decoded file does not report a rate
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_block_size")]
    pub block_size: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    #[default]
    Leaky,
    TimeNeutral,
}

#[derive(Debug, Deserialize)]
pub struct StretchConfig {
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    #[serde(default)]
    pub policy: PolicyKind,
    #[serde(default = "default_leak_coefficients")]
    pub leak_coefficients: Vec<f32>,
    #[serde(default = "default_gains")]
    pub gains: Vec<f32>,
    #[serde(default)]
    pub normalization: BankNormalization,
    #[serde(default = "default_comprander_threshold")]
    pub comprander_threshold: f32,
    #[serde(default = "default_compression_amount")]
    pub compression_amount: f32,
    #[serde(default = "default_max_expansion_amount")]
    pub max_expansion_amount: f32,
    #[serde(default = "default_compander_gain")]
    pub compander_gain: f32,
    #[serde(default)]
    pub seed: u64,
}

#[derive(Debug, Deserialize)]
pub struct VisualConfig {
    #[serde(default = "default_frame_rate")]
    pub frame_rate: f32,
    #[serde(default = "default_center_frequency")]
    pub center_frequency: f32,
    #[serde(default = "default_center_radius")]
    pub center_radius: f32,
    #[serde(default = "default_amplitude_expansion")]
    pub amplitude_expansion: f32,
    #[serde(default = "default_strip_decay")]
    pub strip_decay: f32,
    #[serde(default = "default_max_strips")]
    pub max_strips: usize,
    #[serde(default = "default_trail_seconds")]
    pub trail_seconds: f32,
    #[serde(default = "default_magnitude_exponent")]
    pub magnitude_exponent: f32,
    #[serde(default = "default_magnitude_scale")]
    pub magnitude_scale: f32,
    /// Blend between the two leaf curves, 0 is all of the first
    #[serde(default)]
    pub weighting: f32,
    #[serde(default = "default_do_trail")]
    pub do_trail: bool,
    /// One RGB color per looper; missing entries repeat the last one
    #[serde(default = "default_colors")]
    pub colors: Vec<[f32; 3]>,
    #[serde(default = "default_background")]
    pub background: [f32; 4],
}

#[derive(Debug, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_destination")]
    pub destination: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_packet_payload")]
    pub packet_payload: usize,
}

#[derive(Debug, Default, Deserialize)]
pub struct FilesConfig {
    pub analysis_sound: Option<PathBuf>,
    pub leaf_curve_a: Option<PathBuf>,
    pub leaf_curve_b: Option<PathBuf>,
    pub downbeats: Option<PathBuf>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            block_size: default_block_size(),
        }
    }
}

impl Default for StretchConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            policy: PolicyKind::default(),
            leak_coefficients: default_leak_coefficients(),
            gains: default_gains(),
            normalization: BankNormalization::default(),
            comprander_threshold: default_comprander_threshold(),
            compression_amount: default_compression_amount(),
            max_expansion_amount: default_max_expansion_amount(),
            compander_gain: default_compander_gain(),
            seed: 0,
        }
    }
}

impl Default for VisualConfig {
    fn default() -> Self {
        Self {
            frame_rate: default_frame_rate(),
            center_frequency: default_center_frequency(),
            center_radius: default_center_radius(),
            amplitude_expansion: default_amplitude_expansion(),
            strip_decay: default_strip_decay(),
            max_strips: default_max_strips(),
            trail_seconds: default_trail_seconds(),
            magnitude_exponent: default_magnitude_exponent(),
            magnitude_scale: default_magnitude_scale(),
            weighting: 0.0,
            do_trail: default_do_trail(),
            colors: default_colors(),
            background: default_background(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            destination: default_destination(),
            port: default_port(),
            packet_payload: default_packet_payload(),
        }
    }
}

impl StretchConfig {
    pub fn compander(&self) -> CompanderParams {
        CompanderParams {
            threshold: self.comprander_threshold,
            compression: self.compression_amount,
            max_expansion: self.max_expansion_amount,
            gain: self.compander_gain,
        }
    }

    /// Gain for the i-th leak coefficient. Missing gains repeat the last one.
    pub fn gain(&self, i: usize) -> f32 {
        self.gains
            .get(i)
            .or(self.gains.last())
            .copied()
            .unwrap_or(1.0)
    }
}

impl VisualConfig {
    pub fn color(&self, i: usize) -> [f32; 3] {
        self.colors
            .get(i)
            .or(self.colors.last())
            .copied()
            .unwrap_or([1.0, 1.0, 1.0])
    }

    pub fn looper_settings(&self, sample_rate: f32, color: [f32; 3]) -> LooperSettings {
        LooperSettings {
            sample_rate,
            frame_rate: self.frame_rate,
            color,
            center_radius: self.center_radius,
            center_frequency: self.center_frequency,
            amplitude_expansion: self.amplitude_expansion,
            strip_decay: self.strip_decay,
            max_strips: self.max_strips,
            trail_seconds: self.trail_seconds,
            magnitude_exponent: self.magnitude_exponent,
            magnitude_scale: self.magnitude_scale,
        }
    }
}

fn default_sample_rate() -> u32 { 48000 }
fn default_block_size() -> usize { 512 }
fn default_window_size() -> usize { 2048 }
fn default_leak_coefficients() -> Vec<f32> { vec![0.99, 0.999, 0.9999] }
fn default_gains() -> Vec<f32> { vec![1.0, 2.0, 30.0] }
fn default_comprander_threshold() -> f32 { 0.3 }
fn default_compression_amount() -> f32 { 0.4 }
fn default_max_expansion_amount() -> f32 { 3.0 }
fn default_compander_gain() -> f32 { 0.4 }
fn default_frame_rate() -> f32 { 40.0 }
fn default_center_frequency() -> f32 { 4000.0 }
fn default_center_radius() -> f32 { 1.0 }
fn default_amplitude_expansion() -> f32 { 0.5 }
fn default_strip_decay() -> f32 { 0.8 }
fn default_max_strips() -> usize { 60 }
fn default_trail_seconds() -> f32 { 15.0 }
fn default_magnitude_exponent() -> f32 { 1.3 }
fn default_magnitude_scale() -> f32 { 1000.0 }
fn default_do_trail() -> bool { true }
fn default_colors() -> Vec<[f32; 3]> { vec![[0.45, 0.85, 0.35], [0.95, 0.65, 0.25]] }
fn default_background() -> [f32; 4] { [0.0, 0.0, 0.0, 1.0] }
fn default_bind() -> String { "0.0.0.0".into() }
fn default_destination() -> String { "127.0.0.1:13000".into() }
fn default_port() -> u16 { 13000 }
fn default_packet_payload() -> usize { 8192 }

pub fn load_config(path: &Path) -> Option<Config> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str(&content) {
        Ok(config) => Some(config),
        Err(e) => {
            log::warn!("{}: {}", path.display(), e);
            None
        }
    }
}

/// Explicit path first, then `./leafloops.toml`, then the per-user config.
pub fn find_config(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    let local = PathBuf::from("leafloops.toml");
    if local.exists() {
        return Some(local);
    }
    if let Some(home) = dirs::home_dir() {
        let xdg = home.join(".config").join("leafloops").join("config.toml");
        if xdg.exists() {
            return Some(xdg);
        }
    }
    if let Some(config_dir) = dirs::config_dir() {
        let platform = config_dir.join("leafloops").join("config.toml");
        if platform.exists() {
            return Some(platform);
        }
    }
    None
}
