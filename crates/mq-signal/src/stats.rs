//! Sample-level statistics of a render

use serde::{Deserialize, Serialize};

/// |x| above this counts as a clipped sample
pub const CLIP_LEVEL: f64 = 0.99;

/// |x| below this counts as a silent sample
pub const SILENCE_LEVEL: f64 = 0.001;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioStats {
    pub rms: f64,
    pub peak: f64,
    pub dc_offset: f64,
    pub has_nan: bool,
    pub has_inf: bool,

    /// Fraction of samples above `CLIP_LEVEL`
    pub clipping_ratio: f64,

    /// Fraction of samples below `SILENCE_LEVEL`
    pub silence_ratio: f64,
}

impl AudioStats {
    /// NaN and Inf are flagged and otherwise ignored
    pub fn calculate(samples: &[f64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }

        let n = samples.len() as f64;
        let mut stats = Self::default();
        let mut sum = 0.0;
        let mut sum_sq = 0.0;
        let mut clipped = 0usize;
        let mut silent = 0usize;

        for &s in samples {
            if s.is_nan() {
                stats.has_nan = true;
                continue;
            }
            if s.is_infinite() {
                stats.has_inf = true;
                continue;
            }
            let abs = s.abs();
            sum += s;
            sum_sq += s * s;
            stats.peak = stats.peak.max(abs);
            if abs > CLIP_LEVEL {
                clipped += 1;
            }
            if abs < SILENCE_LEVEL {
                silent += 1;
            }
        }

        stats.rms = (sum_sq / n).sqrt();
        stats.dc_offset = sum / n;
        stats.clipping_ratio = clipped as f64 / n;
        stats.silence_ratio = silent as f64 / n;
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_flags_and_ratios() {
        let stats = AudioStats::calculate(&[1.0, -1.0, 0.0, 0.5, f64::NAN, f64::INFINITY, 0.0, 0.5]);
        assert!(stats.has_nan);
        assert!(stats.has_inf);
        assert_eq!(stats.peak, 1.0);
        assert_eq!(stats.clipping_ratio, 2.0 / 8.0);
        assert_eq!(stats.silence_ratio, 2.0 / 8.0);
        assert!((stats.dc_offset - 1.0 / 8.0).abs() < 1e-12);
    }
}
