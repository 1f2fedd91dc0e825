pub mod decode;
pub mod smoothing;
pub mod stft;
