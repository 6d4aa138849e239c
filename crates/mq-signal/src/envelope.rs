//! Amplitude envelope segmentation (attack / decay / sustain / release)

use crate::spectral::{analytic_envelope, moving_average, rms, sanitize, SILENCE_RMS};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeAnalysis {
    /// 10% -> 90% of peak (ms)
    pub attack_time_ms: Option<f64>,

    /// Peak -> halfway to sustain (ms)
    pub decay_time_ms: Option<f64>,

    /// 90% -> 10% of sustain in the back half (ms)
    pub release_time_ms: Option<f64>,

    /// Smoothed envelope maximum
    pub peak_amplitude: f64,

    /// Mean envelope over 30-70% of the post-peak region
    pub sustain_level: Option<f64>,

    /// Largest per-sample envelope rise relative to peak
    pub onset_strength: f64,

    pub has_clear_envelope: bool,
}

fn to_ms(samples: usize, sr: u32) -> f64 {
    samples as f64 / sr as f64 * 1000.0
}

pub fn analyze_envelope(samples: &[f64], sample_rate: u32) -> EnvelopeAnalysis {
    let clean = sanitize(samples);
    if sample_rate == 0 || rms(&clean) < SILENCE_RMS {
        return EnvelopeAnalysis::default();
    }

    let smooth_len = (sample_rate as f64 * 0.01) as usize;
    let env = moving_average(&analytic_envelope(&clean), smooth_len);

    let (peak_idx, peak_amplitude) = env
        .iter()
        .copied()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |best, (i, v)| if v > best.1 { (i, v) } else { best });

    if peak_amplitude < 1e-6 {
        return EnvelopeAnalysis::default();
    }

    let thresh_10 = 0.1 * peak_amplitude;
    let thresh_90 = 0.9 * peak_amplitude;

    let attack_region = &env[..=peak_idx];
    let attack_time_ms = match (
        attack_region.iter().position(|&v| v > thresh_10),
        attack_region.iter().position(|&v| v > thresh_90),
    ) {
        (Some(start), Some(end)) if end > start => Some(to_ms(end - start, sample_rate)),
        _ => None,
    };

    let decay_region = &env[peak_idx..];
    let sustain_start = (decay_region.len() as f64 * 0.3) as usize;
    let sustain_end = (decay_region.len() as f64 * 0.7) as usize;
    let sustain_level = (sustain_end > sustain_start).then(|| {
        let window = &decay_region[sustain_start..sustain_end];
        window.iter().sum::<f64>() / window.len() as f64
    });

    let decay_time_ms = sustain_level
        .filter(|&sustain| sustain < peak_amplitude * 0.9)
        .and_then(|sustain| {
            let target = sustain + (peak_amplitude - sustain) * 0.5;
            decay_region.iter().position(|&v| v < target)
        })
        .map(|idx| to_ms(idx, sample_rate));

    let release_time_ms = sustain_level
        .filter(|&sustain| sustain > thresh_10)
        .and_then(|sustain| {
            let release_region = &env[env.len() / 2..];
            let start = release_region.iter().position(|&v| v < 0.9 * sustain)?;
            let end = release_region.iter().position(|&v| v < 0.1 * sustain)?;
            (end > start).then(|| to_ms(end - start, sample_rate))
        });

    let max_rise = env
        .windows(2)
        .map(|w| w[1] - w[0])
        .fold(f64::NEG_INFINITY, f64::max);
    let onset_strength = if max_rise.is_finite() {
        max_rise / peak_amplitude
    } else {
        0.0
    };

    EnvelopeAnalysis {
        attack_time_ms,
        decay_time_ms,
        release_time_ms,
        peak_amplitude,
        sustain_level,
        onset_strength,
        has_clear_envelope: attack_time_ms.is_some()
            && peak_amplitude > 0.01
            && onset_strength > 0.001,
    }
}
