//! Parameter range sweep
//!
//! Renders each swept parameter at evenly spaced values across its declared
//! range and looks for values that clip or go silent. Points of one parameter
//! render in parallel; each writes its own scratch file.

use crate::judge::Severity;
use crate::module_config::ModuleConfig;
use crate::renderer::{ParamInfo, RenderRequest, Renderer, GATE_ON};
use crate::Result;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Trigger-style controls that have no meaningful range
pub const CONTROL_PARAMS: [&str; 4] = ["gate", "velocity", "trig", "trigger"];

/// One rendered sweep point
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SweepPoint {
    pub value: f64,

    pub peak_amplitude: f64,

    pub rms_level: f64,

    pub clipping_percent: f64,

    pub is_silent: bool,

    /// Render failed; excluded from every range
    pub has_error: bool,
}

impl SweepPoint {
    fn errored(value: f64) -> Self {
        Self {
            value,
            has_error: true,
            ..Default::default()
        }
    }

    fn is_safe(&self) -> bool {
        self.clipping_percent == 0.0 && !self.is_silent && !self.has_error
    }
}

/// Contiguous run of problem values sharing one issue type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblemRange {
    pub start: f64,

    pub end: f64,

    /// `clipping X.X%` or `silent`
    pub issue: String,
}

impl ProblemRange {
    fn kind(&self) -> &str {
        self.issue.split_whitespace().next().unwrap_or("")
    }
}

/// Sweep summary for one parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamRangeAnalysis {
    pub param_name: String,

    pub original_min: f64,

    pub original_max: f64,

    pub original_init: f64,

    pub points: Vec<SweepPoint>,

    /// Values that neither clip, fall silent nor error
    pub safe_range: Option<(f64, f64)>,

    /// Safe values at or above half the mean audible RMS
    pub interesting_range: Option<(f64, f64)>,

    pub problem_areas: Vec<ProblemRange>,

    pub recommended_min: Option<f64>,

    pub recommended_max: Option<f64>,

    pub recommended_init: Option<f64>,

    pub notes: Vec<String>,
}

impl ParamRangeAnalysis {
    /// Summarize rendered points for `param`
    pub fn from_points(param: &ParamInfo, points: Vec<SweepPoint>) -> Self {
        let mut analysis = Self {
            param_name: param.name.clone(),
            original_min: param.min,
            original_max: param.max,
            original_init: param.init,
            points,
            safe_range: None,
            interesting_range: None,
            problem_areas: Vec::new(),
            recommended_min: None,
            recommended_max: None,
            recommended_init: None,
            notes: Vec::new(),
        };
        if analysis.points.is_empty() {
            return analysis;
        }

        let safe: Vec<&SweepPoint> = analysis.points.iter().filter(|p| p.is_safe()).collect();
        analysis.safe_range = value_span(&safe);

        let audible: Vec<f64> = analysis
            .points
            .iter()
            .filter(|p| !p.is_silent && !p.has_error)
            .map(|p| p.rms_level)
            .collect();
        if !audible.is_empty() {
            let mean_rms = audible.iter().sum::<f64>() / audible.len() as f64;
            let interesting: Vec<&SweepPoint> =
                safe.iter().copied().filter(|p| p.rms_level >= mean_rms * 0.5).collect();
            analysis.interesting_range = value_span(&interesting);
        }

        let problems = analysis
            .points
            .iter()
            .filter_map(|p| {
                let issue = if p.clipping_percent > 0.0 {
                    format!("clipping {:.1}%", p.clipping_percent)
                } else if p.is_silent && !p.has_error {
                    "silent".to_string()
                } else {
                    return None;
                };
                Some(ProblemRange {
                    start: p.value,
                    end: p.value,
                    issue,
                })
            })
            .collect();
        analysis.problem_areas = merge_adjacent(problems);

        if let Some((lo, hi)) = analysis.safe_range {
            if !analysis.problem_areas.is_empty() {
                analysis.recommended_min = Some(lo);
                analysis.recommended_max = Some(hi);
                analysis.notes.push(format!(
                    "Constrained from [{}, {}] to safe range",
                    analysis.original_min, analysis.original_max
                ));
            }

            if (lo..=hi).contains(&analysis.original_init) {
                analysis.recommended_init = Some(analysis.original_init);
                analysis.notes.push("Original init value is within safe range, keeping it".into());
            } else {
                let (a, b) = analysis.interesting_range.unwrap_or((lo, hi));
                analysis.recommended_init = Some((a + b) / 2.0);
            }
        }

        analysis
    }

    pub fn has_problems(&self) -> bool {
        !self.problem_areas.is_empty()
    }
}

fn value_span(points: &[&SweepPoint]) -> Option<(f64, f64)> {
    let mut values = points.iter().map(|p| p.value);
    let first = values.next()?;
    Some(values.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v))))
}

/// Sort by start and merge neighbours whose issue type (first word) matches.
/// The merged range keeps the later issue text.
pub fn merge_adjacent(mut problems: Vec<ProblemRange>) -> Vec<ProblemRange> {
    problems.sort_by(|a, b| a.start.total_cmp(&b.start));

    let mut merged: Vec<ProblemRange> = Vec::with_capacity(problems.len());
    for problem in problems {
        match merged.last_mut() {
            Some(last) if last.kind() == problem.kind() => {
                last.end = problem.end;
                last.issue = problem.issue;
            }
            _ => merged.push(problem),
        }
    }
    merged
}

/// Problem value reported to the judge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterIssue {
    pub param: String,

    pub issue: String,

    /// Start of the problem range
    pub value: f64,

    pub severity: Severity,
}

/// Everything one sweep found
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SweepReport {
    pub issues: Vec<ParameterIssue>,

    /// Parameters with no problem values
    pub safe_params: Vec<String>,

    pub analyses: Vec<ParamRangeAnalysis>,
}

impl SweepReport {
    pub fn from_analyses(analyses: Vec<ParamRangeAnalysis>) -> Self {
        let mut report = Self::default();
        for analysis in &analyses {
            if !analysis.has_problems() {
                report.safe_params.push(analysis.param_name.clone());
                continue;
            }
            for problem in &analysis.problem_areas {
                let severity = if problem.issue.contains("clipping") {
                    Severity::High
                } else {
                    Severity::Medium
                };
                report.issues.push(ParameterIssue {
                    param: analysis.param_name.clone(),
                    issue: problem.issue.clone(),
                    value: problem.start,
                    severity,
                });
            }
        }
        report.analyses = analyses;
        report
    }
}

/// Parameter sweep over one renderer
pub struct ParameterSweep<'a> {
    renderer: &'a dyn Renderer,

    /// Per-point render length (seconds)
    duration: f64,

    steps: usize,

    sample_rate: u32,

    timeout: Duration,

    parallel: bool,
}

impl<'a> ParameterSweep<'a> {
    pub fn new(renderer: &'a dyn Renderer) -> Self {
        Self {
            renderer,
            duration: 1.5,
            steps: 10,
            sample_rate: 48000,
            timeout: Duration::from_secs(30),
            parallel: true,
        }
    }

    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.duration = seconds;
        self
    }

    pub fn with_steps(mut self, steps: usize) -> Self {
        self.steps = steps;
        self
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Parameters of `module` worth sweeping
    pub fn sweepable(params: Vec<ParamInfo>, config: &ModuleConfig) -> Vec<ParamInfo> {
        params
            .into_iter()
            .filter(|p| {
                let name = p.name.to_lowercase();
                !CONTROL_PARAMS.contains(&name.as_str())
                    && !config
                        .parameter_sweep
                        .exclude
                        .iter()
                        .any(|ex| ex.eq_ignore_ascii_case(&p.name))
            })
            .collect()
    }

    /// Sweep every sweepable parameter. Fails only if the parameter list
    /// cannot be read; individual render failures become errored points.
    pub fn run(&self, module: &str, config: &ModuleConfig) -> Result<SweepReport> {
        let params = Self::sweepable(self.renderer.list_params(module)?, config);
        let steps = config.parameter_sweep.steps.unwrap_or(self.steps);
        log::info!("Sweeping {} parameters of {} ({} steps)", params.len(), module, steps);

        let scratch = tempfile::Builder::new().prefix("modqa-sweep-").tempdir()?;
        let analyses = params
            .iter()
            .map(|param| self.sweep_param(module, param, steps, scratch.path()))
            .collect();

        Ok(SweepReport::from_analyses(analyses))
    }

    pub fn sweep_param(&self, module: &str, param: &ParamInfo, steps: usize, scratch: &Path) -> ParamRangeAnalysis {
        let values = param.sweep_values(steps);
        let render_point = |(i, value): (usize, f64)| -> SweepPoint {
            let output = scratch.join(format!("{}_{}_{}.wav", module, param.name, i));
            let request = RenderRequest::new(module, output)
                .with_duration(self.duration)
                .with_sample_rate(self.sample_rate)
                .with_param(&param.name, value)
                .with_param("gate", GATE_ON)
                .with_timeout(self.timeout);

            match self.renderer.measure(&request) {
                Ok(m) => SweepPoint {
                    value,
                    peak_amplitude: m.peak_amplitude,
                    rms_level: m.rms_level,
                    clipping_percent: m.clipping_percent,
                    is_silent: m.is_silent,
                    has_error: false,
                },
                Err(e) => {
                    log::debug!("{}={} failed: {}", param.name, value, e);
                    SweepPoint::errored(value)
                }
            }
        };

        let points: Vec<SweepPoint> = if self.parallel {
            values.into_par_iter().enumerate().map(render_point).collect()
        } else {
            values.into_iter().enumerate().map(render_point).collect()
        };

        let analysis = ParamRangeAnalysis::from_points(param, points);
        log::debug!(
            "{}: safe {:?}, {} problem ranges",
            param.name,
            analysis.safe_range,
            analysis.problem_areas.len()
        );
        analysis
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn param(name: &str, min: f64, max: f64, init: f64) -> ParamInfo {
        ParamInfo {
            index: 0,
            name: name.to_string(),
            path: format!("/m/{}", name),
            min,
            max,
            init,
        }
    }

    fn point(value: f64, rms: f64, clipping: f64) -> SweepPoint {
        SweepPoint {
            value,
            peak_amplitude: rms * 1.4,
            rms_level: rms,
            clipping_percent: clipping,
            is_silent: rms < 0.001,
            has_error: false,
        }
    }

    #[test]
    fn test_merge_adjacent_same_kind() {
        let problems = vec![
            ProblemRange { start: 0.9, end: 0.9, issue: "clipping 4.0%".into() },
            ProblemRange { start: 0.0, end: 0.0, issue: "silent".into() },
            ProblemRange { start: 0.8, end: 0.8, issue: "clipping 1.0%".into() },
        ];
        let merged = merge_adjacent(problems);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].issue, "silent");
        assert_eq!((merged[1].start, merged[1].end), (0.8, 0.9));
        assert_eq!(merged[1].issue, "clipping 4.0%");
    }

    #[test]
    fn test_ranges_and_recommendations() {
        let p = param("drive", 0.0, 1.0, 0.9);
        let points = vec![
            point(0.0, 0.0, 0.0),
            point(0.25, 0.05, 0.0),
            point(0.5, 0.2, 0.0),
            point(0.75, 0.3, 0.0),
            point(1.0, 0.5, 2.5),
        ];
        let analysis = ParamRangeAnalysis::from_points(&p, points);

        assert_eq!(analysis.safe_range, Some((0.25, 0.75)));
        // mean audible rms = 0.2625; half = 0.13125
        assert_eq!(analysis.interesting_range, Some((0.5, 0.75)));
        assert_eq!(analysis.problem_areas.len(), 2);
        assert_eq!(analysis.recommended_min, Some(0.25));
        assert_eq!(analysis.recommended_max, Some(0.75));
        // init 0.9 is outside the safe range -> centre of interesting range
        assert_eq!(analysis.recommended_init, Some(0.625));
    }

    #[test]
    fn test_errored_points_are_not_problems() {
        let p = param("tone", 0.0, 1.0, 0.5);
        let points = vec![point(0.0, 0.2, 0.0), SweepPoint::errored(0.5), point(1.0, 0.2, 0.0)];
        let analysis = ParamRangeAnalysis::from_points(&p, points);

        assert!(!analysis.has_problems());
        assert_eq!(analysis.safe_range, Some((0.0, 1.0)));
        assert_eq!(analysis.recommended_init, Some(0.5));
        assert!(analysis.recommended_min.is_none());
    }

    #[test]
    fn test_report_issue_severity() {
        let clip = ParamRangeAnalysis::from_points(
            &param("drive", 0.0, 1.0, 0.0),
            vec![point(0.0, 0.2, 0.0), point(1.0, 0.6, 3.0)],
        );
        let quiet = ParamRangeAnalysis::from_points(
            &param("pressure", 0.0, 1.0, 0.5),
            vec![point(0.0, 0.0, 0.0), point(1.0, 0.3, 0.0)],
        );
        let fine = ParamRangeAnalysis::from_points(&param("tone", 0.0, 1.0, 0.5), vec![point(0.5, 0.3, 0.0)]);

        let report = SweepReport::from_analyses(vec![clip, quiet, fine]);
        assert_eq!(report.safe_params, vec!["tone".to_string()]);
        assert_eq!(report.issues.len(), 2);
        assert_eq!(report.issues[0].issue, "clipping 3.0%");
        assert_eq!(report.issues[0].severity, Severity::High);
        assert_eq!(report.issues[1].issue, "silent");
        assert_eq!(report.issues[1].value, 0.0);
        assert_eq!(report.issues[1].severity, Severity::Medium);
    }

    #[test]
    fn test_control_params_skipped() {
        let config: ModuleConfig =
            serde_json::from_str(r#"{ "parameter_sweep": { "exclude": ["Seed"] } }"#).unwrap();
        let params = vec![
            param("Gate", 0.0, 10.0, 0.0),
            param("velocity", 0.0, 1.0, 1.0),
            param("seed", 0.0, 100.0, 1.0),
            param("cutoff", 20.0, 20000.0, 1000.0),
        ];
        let kept = ParameterSweep::sweepable(params, &config);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].name, "cutoff");
    }
}
