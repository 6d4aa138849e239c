//! Spectral richness: how complex, noisy or dynamic a render is

use crate::spectral::{
    analytic_envelope, autocorrelation, moving_average, peak, percentile, rms, sanitize,
    stable_window, Spectrum, SILENCE_RMS,
};
use serde::{Deserialize, Serialize};

const STFT_SIZE: usize = 2048;
const STFT_HOP: usize = 512;
const EPS: f64 = 1e-10;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpectralRichness {
    /// Shannon entropy of the average spectrum, normalized to [0, 1]
    pub spectral_entropy: f64,

    /// Geometric / arithmetic mean of magnitudes (1.0 = white noise)
    pub spectral_flatness: f64,

    /// Magnitude-weighted standard deviation around the centroid (Hz)
    pub spectral_spread: f64,

    /// Autocorrelation-based harmonic-to-noise ratio (dB)
    pub harmonic_to_noise_ratio: f64,

    /// Peak / RMS of the analysed segment
    pub crest_factor: f64,

    /// Loud (p95) vs quiet (p5) envelope level (dB)
    pub dynamic_range_db: f64,
}

pub fn compute_spectral_richness(samples: &[f64], sample_rate: u32) -> SpectralRichness {
    let clean = sanitize(samples);
    if sample_rate == 0 || rms(&clean) < SILENCE_RMS {
        return SpectralRichness::default();
    }

    let sr = sample_rate as usize;
    let segment = stable_window(&clean, sample_rate, 0.1);
    let spectrum = Spectrum::averaged(segment, sample_rate, STFT_SIZE, STFT_HOP);
    let mags = &spectrum.magnitudes;
    let total: f64 = mags.iter().sum();

    let entropy: f64 = mags
        .iter()
        .map(|m| {
            let p = m / (total + EPS);
            -p * (p + EPS).log2()
        })
        .sum();
    let max_entropy = (mags.len() as f64).log2();
    let spectral_entropy = if max_entropy > 0.0 {
        entropy / max_entropy
    } else {
        0.0
    };

    let mean = total / mags.len() as f64;
    let log_mean = mags.iter().map(|m| (m + EPS).ln()).sum::<f64>() / mags.len() as f64;
    let spectral_flatness = log_mean.exp() / (mean + EPS);

    let centroid = (0..mags.len())
        .map(|i| spectrum.freq(i) * mags[i])
        .sum::<f64>()
        / (total + EPS);
    let spread_sq = (0..mags.len())
        .map(|i| (spectrum.freq(i) - centroid).powi(2) * mags[i])
        .sum::<f64>()
        / (total + EPS);

    let hnr_window = &segment[..segment.len().min(sr)];
    let harmonic_to_noise_ratio = estimate_hnr(hnr_window, sr);

    let segment_rms = rms(segment);
    let crest_factor = if segment_rms > 0.0 {
        peak(segment) / segment_rms
    } else {
        0.0
    };

    SpectralRichness {
        spectral_entropy,
        spectral_flatness,
        spectral_spread: spread_sq.sqrt(),
        harmonic_to_noise_ratio,
        crest_factor,
        dynamic_range_db: dynamic_range(segment, sr),
    }
}

/// Periodicity from the normalized autocorrelation peak in the 50 Hz-2 kHz lag range
fn estimate_hnr(window: &[f64], sr: usize) -> f64 {
    let raw = autocorrelation(window);
    if raw.is_empty() {
        return 0.0;
    }
    let norm = raw[0] + EPS;

    let min_lag = sr / 2000;
    let max_lag = sr / 50;
    if max_lag >= raw.len() || min_lag >= max_lag {
        return 0.0;
    }

    let peak_val = raw[min_lag..max_lag]
        .iter()
        .map(|r| r / norm)
        .fold(f64::NEG_INFINITY, f64::max);

    let hnr_linear = if peak_val < 1.0 {
        peak_val / (1.0 - peak_val + EPS)
    } else {
        100.0
    };
    10.0 * hnr_linear.max(EPS).log10()
}

/// p95 over p5 (of audible values) of a 50 ms smoothed Hilbert envelope
fn dynamic_range(segment: &[f64], sr: usize) -> f64 {
    let envelope = moving_average(&analytic_envelope(segment), sr / 20);
    if envelope.is_empty() {
        return 0.0;
    }

    let loud = percentile(&envelope, 95.0);
    let audible: Vec<f64> = envelope.iter().copied().filter(|&v| v > 0.001).collect();
    let quiet = if audible.is_empty() {
        0.001
    } else {
        percentile(&audible, 5.0)
    };

    if loud <= 0.0 || quiet <= 0.0 {
        return 0.0;
    }
    20.0 * (loud / quiet).log10()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sine_is_tonal_and_periodic() {
        let sr = 48000;
        let samples: Vec<f64> = (0..sr as usize * 2)
            .map(|i| 0.5 * (2.0 * std::f64::consts::PI * 440.0 * i as f64 / sr as f64).sin())
            .collect();

        let result = compute_spectral_richness(&samples, sr);
        assert!(result.spectral_flatness < 0.1);
        assert!(result.harmonic_to_noise_ratio > 10.0);
        assert!((result.crest_factor - std::f64::consts::SQRT_2).abs() < 0.05);
        assert!(result.dynamic_range_db < 1.0);
    }

    #[test]
    fn test_short_buffer_zero_pads_one_frame() {
        let samples: Vec<f64> = (0..500).map(|i| ((i % 7) as f64 - 3.0) / 10.0).collect();
        let result = compute_spectral_richness(&samples, 48000);
        assert!(result.spectral_entropy > 0.0 && result.spectral_entropy <= 1.0);
        // 500 samples is shorter than the 20 ms minimum pitch period
        assert_eq!(result.harmonic_to_noise_ratio, 0.0);
    }

    #[test]
    fn test_silence_is_zeroed() {
        assert_eq!(
            compute_spectral_richness(&vec![0.0; 48000], 48000),
            SpectralRichness::default()
        );
    }
}
