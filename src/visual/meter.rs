use std::path::Path;

use super::oscillator::read_values;
use crate::error::DataFileError;

/// Position within a metrical cycle (bar, hyperbar, section) driven by a list
/// of boundary timestamps.
#[derive(Clone, Debug)]
pub struct MeterMaid {
    boundaries: Vec<f32>,
}

impl MeterMaid {
    /// Boundaries must be strictly increasing and non-empty.
    #[cfg(test)]
    pub fn new(boundaries: Vec<f32>) -> Result<Self, DataFileError> {
        Self::validated(boundaries, Path::new("<memory>"), None)
    }

    /// Load one timestamp (seconds) per line.
    pub fn load(path: &Path) -> Result<Self, DataFileError> {
        let values = read_values(path)?;
        let lines: Vec<usize> = values.iter().map(|(line, _)| *line).collect();
        let boundaries: Vec<f32> = values.into_iter().map(|(_, v)| v).collect();
        let meter = Self::validated(boundaries, path, Some(&lines))?;
        log::info!("Loaded {} downbeats from {}", meter.boundaries().len(), path.display());
        Ok(meter)
    }

    fn validated(
        boundaries: Vec<f32>,
        path: &Path,
        lines: Option<&[usize]>,
    ) -> Result<Self, DataFileError> {
        if boundaries.is_empty() {
            return Err(DataFileError::Empty {
                path: path.to_path_buf(),
            });
        }
        for (i, pair) in boundaries.windows(2).enumerate() {
            if pair[1] <= pair[0] {
                return Err(DataFileError::NotIncreasing {
                    path: path.to_path_buf(),
                    line: lines.map_or(i + 2, |l| l[i + 1]),
                    value: pair[1],
                });
            }
        }
        Ok(Self { boundaries })
    }

    pub fn boundaries(&self) -> &[f32] {
        &self.boundaries
    }

    /// Phase in [0, 1) within the current cycle, and the cycle index.
    ///
    /// Before the first boundary, and for a non-finite `t`, the phase is 0 in
    /// cycle 0; at or after the last one the phase is 0 in cycle `len`. Otherwise the cycle index is the
    /// number of boundaries at or before `t`.
    pub fn phase_position(&self, t: f32) -> (f32, usize) {
        let b = &self.boundaries;
        if !t.is_finite() || t < b[0] {
            return (0.0, 0);
        }
        if t >= b[b.len() - 1] {
            return (0.0, b.len());
        }

        let cycle = b.partition_point(|&boundary| boundary <= t);
        let prev = b[cycle - 1];
        let next = b[cycle];
        ((t - prev) / (next - prev), cycle)
    }
}
