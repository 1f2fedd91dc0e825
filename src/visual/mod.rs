pub mod geometry;
pub mod history;
pub mod looper;
pub mod meter;
pub mod oscillator;
pub mod pose;
