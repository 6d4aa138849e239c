//! Harmonic character (even/odd balance)

use crate::spectral::{rms, sanitize, stable_window, Spectrum, SILENCE_RMS};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Highest harmonic number inspected
const MAX_HARMONIC: usize = 15;

/// Tonal character derived from the even/odd harmonic balance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HarmonicClass {
    #[serde(rename = "warm")]
    Warm,
    #[serde(rename = "neutral")]
    Neutral,
    #[serde(rename = "bright/edgy")]
    BrightEdgy,
}

impl HarmonicClass {
    /// >1.5 is warm, <0.5 is bright/edgy
    pub fn from_warmth(warmth_ratio: f64) -> Self {
        if warmth_ratio > 1.5 {
            Self::Warm
        } else if warmth_ratio < 0.5 {
            Self::BrightEdgy
        } else {
            Self::Neutral
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Warm => "warm",
            Self::Neutral => "neutral",
            Self::BrightEdgy => "bright/edgy",
        }
    }
}

impl fmt::Display for HarmonicClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Harmonic character analysis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarmonicCharacter {
    /// RMS of even harmonic magnitudes
    pub even_harmonic_energy: f64,

    /// RMS of odd harmonic magnitudes
    pub odd_harmonic_energy: f64,

    /// even / odd
    pub warmth_ratio: f64,

    pub character: HarmonicClass,

    /// Up to five (harmonic number, magnitude relative to fundamental)
    pub dominant_harmonics: Vec<(usize, f64)>,
}

impl HarmonicCharacter {
    fn neutral() -> Self {
        Self {
            even_harmonic_energy: 0.0,
            odd_harmonic_energy: 0.0,
            warmth_ratio: 1.0,
            character: HarmonicClass::Neutral,
            dominant_harmonics: Vec::new(),
        }
    }
}

pub fn analyze_harmonics(
    samples: &[f64],
    sample_rate: u32,
    fundamental_hint: Option<f64>,
) -> HarmonicCharacter {
    let clean = sanitize(samples);
    let segment = stable_window(&clean, sample_rate, 0.2);
    if sample_rate == 0 || rms(segment) < SILENCE_RMS {
        return HarmonicCharacter::neutral();
    }

    let spectrum = Spectrum::of(segment, sample_rate);
    let fundamental = fundamental_hint.unwrap_or_else(|| {
        spectrum
            .strongest_in_band(50.0, 2000.0)
            .map(|bin| spectrum.freq(bin))
            .unwrap_or(440.0)
    });

    let window_bins = spectrum.window_bins(10.0);
    let fund_mag = spectrum.peak_near(spectrum.nearest_bin(fundamental), window_bins);

    let mut even_energy = 0.0;
    let mut odd_energy = 0.0;
    let mut dominant = Vec::new();

    for n in 2..=MAX_HARMONIC {
        let freq = fundamental * n as f64;
        if freq > sample_rate as f64 / 2.0 - 100.0 {
            break;
        }

        let mag = spectrum.peak_near(spectrum.nearest_bin(freq), window_bins);
        if n % 2 == 0 {
            even_energy += mag * mag;
        } else {
            odd_energy += mag * mag;
        }

        let relative = if fund_mag > 0.0 { mag / fund_mag } else { 0.0 };
        if relative > 0.01 {
            dominant.push((n, relative));
        }
    }

    dominant.sort_by(|a, b| b.1.total_cmp(&a.1));
    dominant.truncate(5);

    let even_rms = even_energy.sqrt();
    let odd_rms = if odd_energy > 0.0 { odd_energy.sqrt() } else { 1e-10 };
    let warmth_ratio = even_rms / odd_rms;

    HarmonicCharacter {
        even_harmonic_energy: even_rms,
        odd_harmonic_energy: odd_rms,
        warmth_ratio,
        character: HarmonicClass::from_warmth(warmth_ratio),
        dominant_harmonics: dominant,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_thresholds() {
        assert_eq!(HarmonicClass::from_warmth(2.0), HarmonicClass::Warm);
        assert_eq!(HarmonicClass::from_warmth(1.0), HarmonicClass::Neutral);
        assert_eq!(HarmonicClass::from_warmth(0.2), HarmonicClass::BrightEdgy);
        assert_eq!(
            serde_json::to_string(&HarmonicClass::BrightEdgy).unwrap(),
            "\"bright/edgy\""
        );
    }

    #[test]
    fn test_even_heavy_tone_is_warm() {
        let sr = 48000;
        let samples: Vec<f64> = (0..sr as usize * 2)
            .map(|i| {
                let t = i as f64 / sr as f64;
                let w = 2.0 * std::f64::consts::PI * 200.0 * t;
                0.5 * w.sin() + 0.2 * (2.0 * w).sin() + 0.1 * (4.0 * w).sin() + 0.02 * (3.0 * w).sin()
            })
            .collect();

        let result = analyze_harmonics(&samples, sr, None);
        assert_eq!(result.character, HarmonicClass::Warm);
        assert_eq!(result.dominant_harmonics[0].0, 2);
    }

    #[test]
    fn test_silence_is_neutral() {
        let result = analyze_harmonics(&vec![0.0; 4800], 48000, None);
        assert_eq!(result.character, HarmonicClass::Neutral);
        assert_eq!(result.warmth_ratio, 1.0);
    }
}
