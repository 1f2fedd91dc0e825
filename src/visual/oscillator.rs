use std::f32::consts::{PI, TAU};
use std::path::Path;
use std::sync::Arc;

use crate::error::{DataFileError, OscillatorError};

/// A recorded closed curve, stored as `(angle, radius)` per sample point.
///
/// Loaded once and shared read-only between oscillators.
#[derive(Clone, Debug)]
pub struct LeafCurve {
    angles: Vec<f32>,
    radii: Vec<f32>,
}

impl LeafCurve {
    /// Build from raw `(x, y)` displacement vectors.
    pub fn from_displacements(points: &[(f32, f32)]) -> Self {
        let angles = points.iter().map(|&(x, y)| y.atan2(x)).collect();
        let radii = points.iter().map(|&(x, y)| x.hypot(y)).collect();
        Self { angles, radii }
    }

    /// Parse a file holding one number per line, consecutive lines forming
    /// `(x, y)` pairs. Blank lines are skipped.
    pub fn load(path: &Path) -> Result<Self, DataFileError> {
        let values = read_values(path)?;
        if values.is_empty() {
            return Err(DataFileError::Empty {
                path: path.to_path_buf(),
            });
        }
        if values.len() % 2 != 0 {
            return Err(DataFileError::OddValueCount {
                path: path.to_path_buf(),
                count: values.len(),
            });
        }
        let points: Vec<(f32, f32)> = values
            .chunks_exact(2)
            .map(|pair| (pair[0].1, pair[1].1))
            .collect();
        log::info!("Loaded leaf curve {} ({} points)", path.display(), points.len());
        Ok(Self::from_displacements(&points))
    }

    pub fn len(&self) -> usize {
        self.angles.len()
    }

    fn index(&self, phase: f32) -> usize {
        let frac = phase - phase.floor();
        // frac can round up to exactly 1.0 for tiny negative phases
        ((frac * self.len() as f32) as usize).min(self.len() - 1)
    }

    /// Angle in (-π, π] at a cyclic phase.
    pub fn angle(&self, phase: f32) -> f32 {
        self.angles[self.index(phase)]
    }

    pub fn radius(&self, phase: f32) -> f32 {
        self.radii[self.index(phase)]
    }
}

/// Read every non-blank line of `path` as an f32, keeping 1-based line numbers.
pub(crate) fn read_values(path: &Path) -> Result<Vec<(usize, f32)>, DataFileError> {
    let content = std::fs::read_to_string(path).map_err(|source| DataFileError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut values = Vec::new();
    for (i, line) in content.lines().enumerate() {
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        let value: f32 = text.parse().map_err(|_| DataFileError::Parse {
            path: path.to_path_buf(),
            line: i + 1,
            text: text.to_string(),
        })?;
        values.push((i + 1, value));
    }
    Ok(values)
}

/// Phase-to-shape lookup: one curve, or a weighted blend of two.
#[derive(Clone, Debug)]
pub enum LeafOscillator {
    Single(Arc<LeafCurve>),
    Blend {
        a: Arc<LeafCurve>,
        b: Arc<LeafCurve>,
        /// 0 is all `a`, 1 is all `b`
        weighting: f32,
    },
}

impl LeafOscillator {
    pub fn blend(a: Arc<LeafCurve>, b: Arc<LeafCurve>, weighting: f32) -> Result<Self, OscillatorError> {
        let mut osc = Self::Blend { a, b, weighting: 0.0 };
        osc.set_weighting(weighting)?;
        Ok(osc)
    }

    /// Set the blend weighting. Single-curve oscillators ignore it.
    pub fn set_weighting(&mut self, w: f32) -> Result<(), OscillatorError> {
        if !(0.0..=1.0).contains(&w) {
            return Err(OscillatorError::WeightingOutOfRange(w));
        }
        if let Self::Blend { weighting, .. } = self {
            *weighting = w;
        }
        Ok(())
    }

    pub fn weighting(&self) -> f32 {
        match self {
            Self::Single(_) => 0.0,
            Self::Blend { weighting, .. } => *weighting,
        }
    }

    pub fn radius(&self, phase: f32) -> f32 {
        match self {
            Self::Single(curve) => curve.radius(phase),
            Self::Blend { a, b, weighting } => {
                (1.0 - weighting) * a.radius(phase) + weighting * b.radius(phase)
            }
        }
    }

    pub fn angle(&self, phase: f32) -> f32 {
        match self {
            Self::Single(curve) => curve.angle(phase),
            Self::Blend { a, b, weighting } => {
                blend_angles(a.angle(phase), b.angle(phase), *weighting)
            }
        }
    }
}

/// Weighted blend of two angles along the shorter arc, result in [0, 2π).
pub fn blend_angles(a: f32, b: f32, weighting: f32) -> f32 {
    let (mut a, mut b) = (a.rem_euclid(TAU), b.rem_euclid(TAU));
    if a - b > PI {
        b += TAU;
    } else if b - a > PI {
        a += TAU;
    }
    let blended = (1.0 - weighting) * a + weighting * b;
    blended.rem_euclid(TAU)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn circle(points: usize, radius: f32) -> LeafCurve {
        let pts: Vec<(f32, f32)> = (0..points)
            .map(|i| {
                let a = TAU * i as f32 / points as f32;
                (radius * a.cos(), radius * a.sin())
            })
            .collect();
        LeafCurve::from_displacements(&pts)
    }

    fn angular_distance(a: f32, b: f32) -> f32 {
        let d = (a - b).rem_euclid(TAU);
        d.min(TAU - d)
    }

    fn temp_file(name: &str, body: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("leafloops-{}-{}", std::process::id(), name));
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn lookup_wraps_phase() {
        let curve = circle(360, 2.0);
        assert_eq!(curve.len(), 360);
        assert!((curve.radius(0.3) - 2.0).abs() < 1e-5);
        assert_eq!(curve.angle(0.25), curve.angle(1.25));
        assert_eq!(curve.angle(-0.75), curve.angle(0.25));
        // phase just below zero must not index past the end
        let _ = curve.angle(-1e-9);
        assert!((curve.angle(0.25) - PI / 2.0).abs() < 1e-4);
    }

    #[test]
    fn blend_takes_short_way_round() {
        let blended = blend_angles(0.1, 6.2, 0.5);
        assert!(angular_distance(blended, 0.1) < PI);
        assert!(angular_distance(blended, 6.2) < PI);
        // midpoint of the short arc sits near 0, not near π
        assert!(angular_distance(blended, 0.0) < 0.15);

        for w in [0.0, 0.25, 0.75, 1.0] {
            let b = blend_angles(6.2, 0.1, w);
            assert!((0.0..TAU).contains(&b));
            assert!(angular_distance(b, 0.1) < PI && angular_distance(b, 6.2) < PI);
        }
        assert!(angular_distance(blend_angles(6.2, 0.1, 0.0), 6.2) < 1e-5);
        assert!(angular_distance(blend_angles(6.2, 0.1, 1.0), 0.1) < 1e-5);
    }

    #[test]
    fn blend_weights_radius() {
        let a = Arc::new(circle(360, 1.0));
        let b = Arc::new(circle(360, 3.0));
        let osc = LeafOscillator::blend(a.clone(), b, 0.25).unwrap();
        assert!((osc.radius(0.5) - 1.5).abs() < 1e-5);
        let single = LeafOscillator::Single(a);
        assert!((single.radius(0.5) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn weighting_outside_unit_range_is_rejected() {
        let a = Arc::new(circle(4, 1.0));
        let b = Arc::new(circle(4, 2.0));
        assert_eq!(
            LeafOscillator::blend(a.clone(), b.clone(), 1.5).unwrap_err(),
            OscillatorError::WeightingOutOfRange(1.5)
        );
        let mut osc = LeafOscillator::blend(a, b, 0.3).unwrap();
        assert!(osc.set_weighting(-0.1).is_err());
        assert!(osc.set_weighting(f32::NAN).is_err());
        assert_eq!(osc.weighting(), 0.3);
    }

    #[test]
    fn loads_pairs_from_file() {
        let path = temp_file("curve.txt", "1.0\n0.0\n\n0.0\n2.0\n");
        let curve = LeafCurve::load(&path).unwrap();
        assert_eq!(curve.len(), 2);
        assert!((curve.radius(0.6) - 2.0).abs() < 1e-6);
        assert!((curve.angle(0.6) - PI / 2.0).abs() < 1e-6);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn load_reports_bad_files() {
        let odd = temp_file("odd.txt", "1.0\n2.0\n3.0\n");
        assert!(matches!(
            LeafCurve::load(&odd),
            Err(DataFileError::OddValueCount { count: 3, .. })
        ));
        let bad = temp_file("bad.txt", "1.0\nleaf\n");
        assert!(matches!(
            LeafCurve::load(&bad),
            Err(DataFileError::Parse { line: 2, .. })
        ));
        let empty = temp_file("empty.txt", "\n\n");
        assert!(matches!(LeafCurve::load(&empty), Err(DataFileError::Empty { .. })));
        let missing = std::env::temp_dir().join("leafloops-does-not-exist.txt");
        assert!(matches!(LeafCurve::load(&missing), Err(DataFileError::Io { .. })));
        for p in [odd, bad, empty] {
            std::fs::remove_file(p).ok();
        }
    }
}
