use std::path::PathBuf;
use thiserror::Error;

/// Failures while loading the plain-text data files (leaf curves, downbeats).
#[derive(Debug, Error)]
pub enum DataFileError {
    #[error("failed to read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}:{line}: '{text}' is not a number")]
    Parse {
        path: PathBuf,
        line: usize,
        text: String,
    },
    #[error("{path}: expected (x, y) pairs but found {count} values")]
    OddValueCount { path: PathBuf, count: usize },
    #[error("{path}: file contains no values")]
    Empty { path: PathBuf },
    #[error("{path}:{line}: timestamp {value} is not after the previous one")]
    NotIncreasing {
        path: PathBuf,
        line: usize,
        value: f32,
    },
}

/// A snapshot or datagram that does not match the agreed wire schema.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("expected {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },
    #[error("bad magic {0:#010x}")]
    Magic(u32),
    #[error("schema mismatch: {field} is {actual}, expected {expected}")]
    Schema {
        field: &'static str,
        expected: u32,
        actual: u32,
    },
    #[error("chunk {index}/{count} with {len} bytes does not fit a {total_len} byte frame")]
    Chunk {
        index: u32,
        count: u32,
        len: usize,
        total_len: u32,
    },
}

#[derive(Debug, Error, PartialEq)]
pub enum OscillatorError {
    #[error("oscillator weighting {0} is outside [0, 1]")]
    WeightingOutOfRange(f32),
}
