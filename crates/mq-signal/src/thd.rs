//! Total harmonic distortion

use crate::spectral::{linear_to_db, median, sanitize, stable_window, Spectrum, FLOOR_DB};
use serde::{Deserialize, Serialize};

/// Harmonics considered, including the fundamental
pub const NUM_HARMONICS: usize = 10;

/// Fallback fundamental when the search band is empty
const DEFAULT_FUNDAMENTAL_HZ: f64 = 440.0;

/// One measured harmonic partial
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Harmonic {
    /// Harmonic number (2 = first overtone)
    pub number: usize,

    /// Expected frequency (Hz)
    pub frequency: f64,

    /// Normalized magnitude
    pub magnitude: f64,
}

/// THD measurement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThdResult {
    /// THD as a percentage of the fundamental
    pub thd_percent: f64,

    /// Fundamental frequency used (Hz)
    pub fundamental_freq: f64,

    /// Normalized fundamental magnitude
    pub fundamental_magnitude: f64,

    /// Harmonics 2..N below Nyquist
    pub harmonics: Vec<Harmonic>,

    /// Median magnitude of non-harmonic bins (dB)
    pub noise_floor_db: f64,
}

impl ThdResult {
    fn silent(fundamental_freq: f64) -> Self {
        Self {
            thd_percent: 0.0,
            fundamental_freq,
            fundamental_magnitude: 0.0,
            harmonics: Vec::new(),
            noise_floor_db: FLOOR_DB,
        }
    }
}

/// Measure THD over the steady-state part of a render.
///
/// Without a `fundamental_hint`, the strongest bin in 50-2000 Hz is taken
/// as the fundamental.
pub fn measure_thd(samples: &[f64], sample_rate: u32, fundamental_hint: Option<f64>) -> ThdResult {
    let clean = sanitize(samples);
    let segment = stable_window(&clean, sample_rate, 0.2);
    if segment.is_empty() || sample_rate == 0 {
        return ThdResult::silent(fundamental_hint.unwrap_or(0.0));
    }

    let spectrum = Spectrum::of(segment, sample_rate).normalized(segment.len());

    let fundamental_freq = fundamental_hint.unwrap_or_else(|| {
        spectrum
            .strongest_in_band(50.0, 2000.0)
            .map(|bin| spectrum.freq(bin))
            .unwrap_or(DEFAULT_FUNDAMENTAL_HZ)
    });

    let window_bins = spectrum.window_bins(10.0);
    let fund_bin = spectrum.nearest_bin(fundamental_freq);
    let fundamental_magnitude = spectrum.peak_near(fund_bin, window_bins);

    if fundamental_magnitude < 1e-10 {
        return ThdResult::silent(fundamental_freq);
    }

    let nyquist_limit = sample_rate as f64 / 2.0 - 100.0;
    let mut harmonics = Vec::new();
    for number in 2..=NUM_HARMONICS {
        let frequency = fundamental_freq * number as f64;
        if frequency > nyquist_limit {
            break;
        }
        let bin = spectrum.nearest_bin(frequency);
        harmonics.push(Harmonic {
            number,
            frequency,
            magnitude: spectrum.peak_near(bin, window_bins),
        });
    }

    let harmonic_power: f64 = harmonics.iter().map(|h| h.magnitude * h.magnitude).sum();
    let thd_percent = harmonic_power.sqrt() / fundamental_magnitude * 100.0;

    // Every bin outside ±window_bins of an expected harmonic counts as noise
    let mut is_harmonic = vec![false; spectrum.len()];
    for number in 1..=NUM_HARMONICS {
        let center = spectrum.nearest_bin(fundamental_freq * number as f64);
        let lo = center.saturating_sub(window_bins);
        let hi = (center + window_bins + 1).min(spectrum.len());
        is_harmonic[lo..hi].iter_mut().for_each(|flag| *flag = true);
    }
    let noise_bins: Vec<f64> = spectrum
        .magnitudes
        .iter()
        .zip(&is_harmonic)
        .filter_map(|(m, harmonic)| (!harmonic).then_some(*m))
        .collect();

    ThdResult {
        thd_percent,
        fundamental_freq,
        fundamental_magnitude,
        harmonics,
        noise_floor_db: linear_to_db(median(&noise_bins)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(partials: &[(f64, f64)], sr: u32, secs: f64) -> Vec<f64> {
        let len = (secs * sr as f64) as usize;
        (0..len)
            .map(|i| {
                let t = i as f64 / sr as f64;
                partials
                    .iter()
                    .map(|(f, a)| a * (2.0 * std::f64::consts::PI * f * t).sin())
                    .sum()
            })
            .collect()
    }

    #[test]
    fn test_hint_overrides_search() {
        let samples = tone(&[(220.0, 0.5), (880.0, 0.8)], 48000, 2.0);
        let result = measure_thd(&samples, 48000, Some(220.0));
        assert_eq!(result.fundamental_freq, 220.0);
        // 880 Hz is the 4th harmonic of 220 Hz and dominates the distortion
        assert!(result.thd_percent > 100.0);
    }

    #[test]
    fn test_harmonics_stop_below_nyquist() {
        let samples = tone(&[(3000.0, 0.5)], 16000, 2.0);
        let result = measure_thd(&samples, 16000, Some(3000.0));
        assert!(result.harmonics.iter().all(|h| h.frequency <= 7900.0));
        assert_eq!(result.harmonics.len(), 1);
    }

    #[test]
    fn test_empty_input() {
        let result = measure_thd(&[], 48000, None);
        assert_eq!(result.thd_percent, 0.0);
        assert_eq!(result.noise_floor_db, FLOOR_DB);
    }
}
