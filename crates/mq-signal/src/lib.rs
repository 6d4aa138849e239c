//! # mq-signal
//!
//! Objective signal measurements for rendered synthesizer module output.
//!
//! ## Features
//!
//! - **THD**: Hann-windowed FFT harmonic distortion with noise floor estimate
//! - **Aliasing**: fold-back detection of inharmonic partials
//! - **Harmonic Character**: even/odd balance and dominant partials
//! - **Spectral Richness**: entropy, flatness, spread, HNR, dynamic range
//! - **Envelope**: Hilbert envelope attack/decay/sustain/release
//! - **Quality Scoring**: 0-100 score against per-module thresholds
//!
//! Every analysis function is pure and tolerates silence, very short
//! buffers and non-finite samples by returning a neutral result.
//!
//! ## Example
//!
//! ```rust,ignore
//! use mq_signal::{AudioBuffer, QualityScorer, QualityThresholds};
//!
//! let audio = AudioBuffer::load("render.wav", &Default::default())?;
//! let report = QualityScorer::new(QualityThresholds::default()).score(&audio, "Oscillator");
//!
//! println!("{}: {}/100", report.module_name, report.overall_quality_score);
//! ```

pub mod aliasing;
pub mod config;
pub mod envelope;
pub mod harmonics;
pub mod loader;
pub mod richness;
pub mod scorer;
pub mod spectral;
pub mod stats;
pub mod thd;

pub use aliasing::{detect_aliasing, AliasingResult};
pub use config::QualityThresholds;
pub use envelope::{analyze_envelope, EnvelopeAnalysis};
pub use harmonics::{analyze_harmonics, HarmonicCharacter, HarmonicClass};
pub use loader::{AudioBuffer, DecodeSupport};
pub use richness::{compute_spectral_richness, SpectralRichness};
pub use scorer::{QualityReport, QualityScorer};
pub use stats::AudioStats;
pub use thd::{measure_thd, Harmonic, ThdResult};

use thiserror::Error;

/// Errors that can occur while loading or preparing audio for analysis
#[derive(Error, Debug)]
pub enum SignalError {
    #[error("Failed to load audio file: {0}")]
    LoadError(String),

    #[error("Unsupported audio format: {0}")]
    Unsupported(String),

    #[error("Audio file contains no samples: {0}")]
    Empty(String),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SignalError>;

/// Load a rendered file and score it with default thresholds
pub fn quick_score(path: &str, module_name: &str) -> Result<QualityReport> {
    let audio = AudioBuffer::load(path, &DecodeSupport::default())?;
    Ok(QualityScorer::new(QualityThresholds::default()).score(&audio, module_name))
}
