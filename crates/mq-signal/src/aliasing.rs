//! Aliasing detection
//!
//! Partials above Nyquist fold back to `|k·sr ± f|` mirrored into
//! `[0, sr/2]`. We predict where they would land for the detected
//! fundamental and look for energy there that is not a true harmonic.

use crate::spectral::{median, sanitize, stable_window, Spectrum, FLOOR_DB};
use serde::{Deserialize, Serialize};

/// Alias ratio above which the detector reports significant aliasing
pub const SIGNIFICANT_ALIASING_DB: f64 = -60.0;

/// Candidates closer than this to a real harmonic are ignored
const HARMONIC_GUARD_HZ: f64 = 50.0;

/// Aliasing measurement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AliasingResult {
    /// sqrt(alias energy) / sqrt(total energy)
    pub alias_ratio: f64,

    /// `alias_ratio` in dB (-120 when nothing was found)
    pub alias_ratio_db: f64,

    /// Detected alias components as (frequency Hz, magnitude)
    pub detected_aliases: Vec<(f64, f64)>,

    /// Fundamental the prediction was based on (Hz)
    pub input_frequency: f64,

    /// `alias_ratio_db > -60`
    pub has_significant_aliasing: bool,
}

impl AliasingResult {
    fn none(input_frequency: f64) -> Self {
        Self {
            alias_ratio: 0.0,
            alias_ratio_db: FLOOR_DB,
            detected_aliases: Vec::new(),
            input_frequency,
            has_significant_aliasing: false,
        }
    }

    /// Significant by the detector and louder than `threshold_db`
    pub fn exceeds(&self, threshold_db: f64) -> bool {
        self.has_significant_aliasing && self.alias_ratio_db > threshold_db
    }
}

/// Mirror any frequency into `[0, sr/2]`
pub fn fold_frequency(freq: f64, sample_rate: f64) -> f64 {
    let wrapped = freq.abs() % sample_rate;
    if wrapped > sample_rate / 2.0 {
        sample_rate - wrapped
    } else {
        wrapped
    }
}

/// Predicted alias frequencies for a fundamental, before harmonic filtering
fn alias_candidates(fundamental: f64, sample_rate: f64) -> Vec<f64> {
    let nyquist = sample_rate / 2.0;
    let mut candidates = Vec::new();

    for k in 1..=3 {
        let k = k as f64;
        for image in [k * sample_rate - fundamental, k * sample_rate + fundamental] {
            let folded = fold_frequency(image, sample_rate);
            if folded > 20.0 && folded < nyquist - 100.0 {
                candidates.push(folded);
            }
        }
    }

    for n in 2..=7 {
        let harmonic = fundamental * n as f64;
        if harmonic > nyquist {
            candidates.push(fold_frequency(harmonic, sample_rate));
        }
    }

    candidates.retain(|&c| {
        (1..10).all(|h| (c - fundamental * h as f64).abs() >= HARMONIC_GUARD_HZ)
    });
    candidates
}

/// Look for folded-back energy at predicted alias frequencies
pub fn detect_aliasing(samples: &[f64], sample_rate: u32, input_freq: Option<f64>) -> AliasingResult {
    let clean = sanitize(samples);
    let segment = stable_window(&clean, sample_rate, 0.2);
    if segment.is_empty() || sample_rate == 0 {
        return AliasingResult::none(input_freq.unwrap_or(0.0));
    }

    let spectrum = Spectrum::of(segment, sample_rate);

    let fundamental = match input_freq {
        Some(f) => f,
        None => match spectrum.strongest_in_band(50.0, 5000.0) {
            Some(bin) => spectrum.freq(bin),
            None => return AliasingResult::none(0.0),
        },
    };

    let total_energy: f64 = spectrum.magnitudes.iter().map(|m| m * m).sum();
    if total_energy <= 0.0 {
        return AliasingResult::none(fundamental);
    }

    let noise_threshold = median(&spectrum.magnitudes) * 3.0;
    let window_bins = spectrum.window_bins(20.0);

    let mut alias_energy = 0.0;
    let mut detected_aliases = Vec::new();
    for candidate in alias_candidates(fundamental, sample_rate as f64) {
        let bin = spectrum.nearest_bin(candidate);
        let magnitude = spectrum.peak_near(bin, window_bins);
        if magnitude > noise_threshold {
            alias_energy += magnitude * magnitude;
            detected_aliases.push((candidate, magnitude));
        }
    }

    let alias_ratio = alias_energy.sqrt() / total_energy.sqrt();
    let alias_ratio_db = if alias_ratio > 0.0 {
        20.0 * alias_ratio.log10()
    } else {
        FLOOR_DB
    };

    AliasingResult {
        alias_ratio,
        alias_ratio_db,
        detected_aliases,
        input_frequency: fundamental,
        has_significant_aliasing: alias_ratio_db > SIGNIFICANT_ALIASING_DB,
    }
}
