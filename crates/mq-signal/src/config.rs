//! Per-module quality thresholds

use serde::{Deserialize, Serialize};

/// Clipping tolerance granted to hot-signal modules (wavefolders, saturators)
pub const HOT_SIGNAL_CLIPPING_PERCENT: f64 = 15.0;

/// Quality thresholds, as stored under `quality_thresholds` in a module's test config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityThresholds {
    /// Maximum acceptable THD (%)
    pub thd_max_percent: f64,

    /// Maximum acceptable share of clipped samples (%)
    pub clipping_max_percent: f64,

    /// Minimum harmonic-to-noise ratio (dB)
    pub hnr_min_db: f64,

    /// Module is expected to run hot and may clip more than usual
    pub allow_hot_signal: bool,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            thd_max_percent: 15.0,
            clipping_max_percent: 1.0,
            hnr_min_db: 0.0,
            allow_hot_signal: false,
        }
    }
}

impl QualityThresholds {
    /// Thresholds for distortion-by-design modules
    pub fn hot_signal() -> Self {
        Self {
            thd_max_percent: 50.0,
            allow_hot_signal: true,
            ..Default::default()
        }
    }

    pub fn with_thd_max(mut self, percent: f64) -> Self {
        self.thd_max_percent = percent;
        self
    }

    pub fn with_clipping_max(mut self, percent: f64) -> Self {
        self.clipping_max_percent = percent;
        self
    }

    pub fn with_hnr_min(mut self, db: f64) -> Self {
        self.hnr_min_db = db;
        self
    }

    pub fn with_hot_signal(mut self, allow: bool) -> Self {
        self.allow_hot_signal = allow;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_thresholds() {
        let t = QualityThresholds::default();
        assert_eq!(t.thd_max_percent, 15.0);
        assert_eq!(t.clipping_max_percent, 1.0);
        assert_eq!(t.hnr_min_db, 0.0);
        assert!(!t.allow_hot_signal);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let t: QualityThresholds = serde_json::from_str(r#"{"thd_max_percent": 40}"#).unwrap();
        assert_eq!(t.thd_max_percent, 40.0);
        assert_eq!(t.clipping_max_percent, 1.0);
    }

    #[test]
    fn test_builder_pattern() {
        let t = QualityThresholds::default()
            .with_thd_max(25.0)
            .with_hot_signal(true);
        assert_eq!(t.thd_max_percent, 25.0);
        assert!(t.allow_hot_signal);
    }
}
