//! Optional capabilities injected into the verifier and fixer

use mq_signal::DecodeSupport;

/// What this pipeline instance may use.
///
/// Passed explicitly so tests can simulate a missing decoder, scorer or
/// thread pool without touching global state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Audio decoders available to the quality render loader
    pub decode: DecodeSupport,

    /// In-process signal analysis (otherwise quality metrics stay empty)
    pub signal_analysis: bool,

    /// An embedding scorer may be consulted
    pub embedding_scorer: bool,

    /// Sweep points may run on the rayon pool
    pub parallel: bool,

    /// DSP sources may be patched (otherwise only config fixes apply)
    pub dsp_sources: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            decode: DecodeSupport::default(),
            signal_analysis: true,
            embedding_scorer: true,
            parallel: true,
            dsp_sources: true,
        }
    }
}

impl Capabilities {
    /// Bare minimum: WAV only, sequential, no external scorer
    pub fn minimal() -> Self {
        Self {
            decode: DecodeSupport::wav_only(),
            signal_analysis: true,
            embedding_scorer: false,
            parallel: false,
            dsp_sources: true,
        }
    }

    pub fn without_embedding_scorer(mut self) -> Self {
        self.embedding_scorer = false;
        self
    }

    pub fn without_signal_analysis(mut self) -> Self {
        self.signal_analysis = false;
        self
    }

    pub fn sequential(mut self) -> Self {
        self.parallel = false;
        self
    }

    pub fn config_fixes_only(mut self) -> Self {
        self.dsp_sources = false;
        self
    }
}
