//! Quality scoring
//!
//! Runs every analyzer over a render and turns the measurements into a
//! 0-100 score plus plain-text issues. A panicking analyzer is recorded as
//! an issue and its metric is left empty; it never takes the report down.

use crate::aliasing::{detect_aliasing, AliasingResult};
use crate::config::QualityThresholds;
use crate::envelope::{analyze_envelope, EnvelopeAnalysis};
use crate::harmonics::{analyze_harmonics, HarmonicCharacter};
use crate::loader::AudioBuffer;
use crate::richness::{compute_spectral_richness, SpectralRichness};
use crate::spectral::{rms, SILENCE_RMS};
use crate::thd::{measure_thd, ThdResult};
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};

const THD_PENALTY: f64 = 20.0;
const MODERATE_THD_PENALTY: f64 = 5.0;
const ALIASING_PENALTY: f64 = 15.0;
const LOW_HNR_PENALTY: f64 = 5.0;

/// Crest factor above this is reported, without a penalty
const CREST_FACTOR_WARNING: f64 = 20.0;

/// Complete quality report for one render
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityReport {
    pub module_name: String,

    pub thd: Option<ThdResult>,

    pub aliasing: Option<AliasingResult>,

    pub harmonics: Option<HarmonicCharacter>,

    pub spectral: Option<SpectralRichness>,

    pub envelope: Option<EnvelopeAnalysis>,

    /// 0-100
    pub overall_quality_score: f64,

    pub issues: Vec<String>,
}

impl QualityReport {
    pub fn empty(module_name: &str) -> Self {
        Self {
            module_name: module_name.to_string(),
            thd: None,
            aliasing: None,
            harmonics: None,
            spectral: None,
            envelope: None,
            overall_quality_score: 0.0,
            issues: Vec::new(),
        }
    }

    pub fn is_silent(&self) -> bool {
        self.issues.iter().any(|i| i == "Audio is silent")
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".into())
    }
}

/// Scores renders against one set of thresholds
#[derive(Debug, Clone, Default)]
pub struct QualityScorer {
    thresholds: QualityThresholds,
}

impl QualityScorer {
    pub fn new(thresholds: QualityThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &QualityThresholds {
        &self.thresholds
    }

    pub fn score(&self, audio: &AudioBuffer, module_name: &str) -> QualityReport {
        self.score_samples(audio.samples(), audio.sample_rate(), module_name)
    }

    pub fn score_samples(&self, samples: &[f64], sample_rate: u32, module_name: &str) -> QualityReport {
        let mut report = QualityReport::empty(module_name);

        if rms(samples) < SILENCE_RMS {
            report.issues.push("Audio is silent".into());
            return report;
        }

        let mut failures = Vec::new();
        report.thd = guarded("THD analysis", &mut failures, || {
            measure_thd(samples, sample_rate, None)
        });
        report.aliasing = guarded("Aliasing detection", &mut failures, || {
            detect_aliasing(samples, sample_rate, None)
        });
        report.harmonics = guarded("Harmonic analysis", &mut failures, || {
            analyze_harmonics(samples, sample_rate, None)
        });
        report.spectral = guarded("Spectral analysis", &mut failures, || {
            compute_spectral_richness(samples, sample_rate)
        });
        report.envelope = guarded("Envelope analysis", &mut failures, || {
            analyze_envelope(samples, sample_rate)
        });

        let (score, mut issues) = self.assess(
            report.thd.as_ref(),
            report.aliasing.as_ref(),
            report.spectral.as_ref(),
        );
        issues.extend(failures);

        log::debug!("{}: quality score {:.0} ({} issues)", module_name, score, issues.len());

        report.overall_quality_score = score;
        report.issues = issues;
        report
    }

    /// Score and issue list from individual measurements; missing ones are skipped
    pub fn assess(
        &self,
        thd: Option<&ThdResult>,
        aliasing: Option<&AliasingResult>,
        spectral: Option<&SpectralRichness>,
    ) -> (f64, Vec<String>) {
        let thd_max = self.thresholds.thd_max_percent;
        let hnr_min = self.thresholds.hnr_min_db;
        let mut score = 100.0;
        let mut issues = Vec::new();

        if let Some(thd) = thd {
            if thd.thd_percent > thd_max {
                issues.push(format!(
                    "High THD: {:.1}% (threshold: {}%)",
                    thd.thd_percent, thd_max
                ));
                score -= THD_PENALTY;
            } else if thd.thd_percent > thd_max * 0.5 {
                issues.push(format!("Moderate THD: {:.1}%", thd.thd_percent));
                score -= MODERATE_THD_PENALTY;
            }
        }

        if let Some(aliasing) = aliasing {
            if aliasing.has_significant_aliasing {
                issues.push(format!("Aliasing detected: {:.1} dB", aliasing.alias_ratio_db));
                score -= ALIASING_PENALTY;
            }
        }

        if let Some(spectral) = spectral {
            if spectral.crest_factor > CREST_FACTOR_WARNING {
                issues.push(format!("Very high crest factor: {:.1}", spectral.crest_factor));
            }

            // Non-tonal material has no meaningful HNR at or below 0 dB
            let hnr = spectral.harmonic_to_noise_ratio;
            if hnr > 0.0 && hnr < hnr_min {
                issues.push(format!("Low HNR: {:.1} dB (threshold: {} dB)", hnr, hnr_min));
                score -= LOW_HNR_PENALTY;
            }
        }

        (f64::max(score, 0.0), issues)
    }
}

fn guarded<T>(label: &str, failures: &mut Vec<String>, analysis: impl FnOnce() -> T) -> Option<T> {
    match panic::catch_unwind(AssertUnwindSafe(analysis)) {
        Ok(result) => Some(result),
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown error".into());
            log::warn!("{} failed: {}", label, message);
            failures.push(format!("{} failed: {}", label, message));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thd(percent: f64) -> ThdResult {
        ThdResult {
            thd_percent: percent,
            fundamental_freq: 440.0,
            fundamental_magnitude: 0.5,
            harmonics: Vec::new(),
            noise_floor_db: -100.0,
        }
    }

    fn aliasing(db: f64) -> AliasingResult {
        AliasingResult {
            alias_ratio: 10f64.powf(db / 20.0),
            alias_ratio_db: db,
            detected_aliases: vec![(13000.0, 0.01)],
            input_frequency: 5000.0,
            has_significant_aliasing: db > -60.0,
        }
    }

    fn spectral(hnr: f64, crest: f64) -> SpectralRichness {
        SpectralRichness {
            harmonic_to_noise_ratio: hnr,
            crest_factor: crest,
            ..Default::default()
        }
    }

    #[test]
    fn test_thd_bands() {
        let scorer = QualityScorer::default();
        let (score, issues) = scorer.assess(Some(&thd(20.0)), None, None);
        assert_eq!(score, 80.0);
        assert_eq!(issues, vec!["High THD: 20.0% (threshold: 15%)".to_string()]);

        let (score, issues) = scorer.assess(Some(&thd(10.0)), None, None);
        assert_eq!(score, 95.0);
        assert_eq!(issues, vec!["Moderate THD: 10.0%".to_string()]);

        let (score, _) = scorer.assess(Some(&thd(2.0)), None, None);
        assert_eq!(score, 100.0);
    }

    #[test]
    fn test_hnr_only_checked_when_positive() {
        let scorer = QualityScorer::new(QualityThresholds::default().with_hnr_min(10.0));
        let (score, _) = scorer.assess(None, None, Some(&spectral(-3.0, 2.0)));
        assert_eq!(score, 100.0);

        let (score, issues) = scorer.assess(None, None, Some(&spectral(4.0, 2.0)));
        assert_eq!(score, 95.0);
        assert!(issues[0].starts_with("Low HNR"));
    }

    #[test]
    fn test_crest_factor_is_informational() {
        let (score, issues) = QualityScorer::default().assess(None, None, Some(&spectral(0.0, 25.0)));
        assert_eq!(score, 100.0);
        assert_eq!(issues.len(), 1);
    }

    #[test]
    fn test_score_never_negative() {
        let scorer = QualityScorer::new(QualityThresholds::default().with_thd_max(1.0).with_hnr_min(50.0));
        for db in [-80.0, -40.0, -10.0] {
            for t in [0.0, 0.7, 5.0, 500.0] {
                let (score, _) = scorer.assess(Some(&thd(t)), Some(&aliasing(db)), Some(&spectral(3.0, 30.0)));
                assert!((0.0..=100.0).contains(&score));
            }
        }
    }

    #[test]
    fn test_silent_render_short_circuits() {
        let report = QualityScorer::default().score_samples(&vec![0.0; 48000], 48000, "Silent");
        assert_eq!(report.overall_quality_score, 0.0);
        assert_eq!(report.issues, vec!["Audio is silent".to_string()]);
        assert!(report.is_silent());
        assert!(report.thd.is_none());
    }

    #[test]
    fn test_guarded_records_panics() {
        let mut failures = Vec::new();
        let value: Option<u32> = guarded("THD analysis", &mut failures, || panic!("bad input"));
        assert!(value.is_none());
        assert_eq!(failures, vec!["THD analysis failed: bad input".to_string()]);
    }
}
