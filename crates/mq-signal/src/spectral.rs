//! FFT and envelope primitives shared by the analyzers

use num_complex::Complex64;
use realfft::RealFftPlanner;
use rustfft::FftPlanner;

/// RMS below this is treated as silence by every analyzer
pub const SILENCE_RMS: f64 = 1e-6;

/// dB value reported for zero or negative linear magnitudes
pub const FLOOR_DB: f64 = -120.0;

/// Copy of `samples` with NaN/Inf replaced by zero
pub fn sanitize(samples: &[f64]) -> Vec<f64> {
    samples
        .iter()
        .map(|&s| if s.is_finite() { s } else { 0.0 })
        .collect()
}

pub fn rms(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().filter(|s| s.is_finite()).map(|s| s * s).sum();
    (sum / samples.len() as f64).sqrt()
}

pub fn peak(samples: &[f64]) -> f64 {
    samples
        .iter()
        .filter(|s| s.is_finite())
        .map(|s| s.abs())
        .fold(0.0, f64::max)
}

/// Linear magnitude to dB, floored at -120 dB
pub fn linear_to_db(value: f64) -> f64 {
    if value > 0.0 {
        20.0 * value.log10()
    } else {
        FLOOR_DB
    }
}

/// Symmetric Hann window (`0.5 - 0.5 cos(2πn/(N-1))`)
pub fn hann_window(len: usize) -> Vec<f64> {
    match len {
        0 => Vec::new(),
        1 => vec![1.0],
        _ => {
            let denom = (len - 1) as f64;
            (0..len)
                .map(|i| 0.5 - 0.5 * (2.0 * std::f64::consts::PI * i as f64 / denom).cos())
                .collect()
        }
    }
}

/// Steady-state portion of a render, skipping the onset transient.
///
/// Covers `[start_secs, 1.5 s)`; falls back to the whole buffer when that
/// leaves less than a quarter second.
pub fn stable_window(samples: &[f64], sample_rate: u32, start_secs: f64) -> &[f64] {
    let sr = sample_rate as usize;
    let start = (start_secs * sample_rate as f64) as usize;
    let end = samples.len().min((1.5 * sample_rate as f64) as usize);

    if end <= start || end - start < sr / 4 {
        samples
    } else {
        &samples[start..end]
    }
}

/// One-sided magnitude spectrum
#[derive(Debug, Clone)]
pub struct Spectrum {
    /// Linear magnitude per bin
    pub magnitudes: Vec<f64>,

    /// Frequency resolution (Hz per bin)
    pub bin_hz: f64,
}

impl Spectrum {
    /// Hann-windowed real FFT of the full segment (unnormalized magnitudes)
    pub fn of(segment: &[f64], sample_rate: u32) -> Self {
        let n = segment.len();
        if n < 2 {
            return Self {
                magnitudes: Vec::new(),
                bin_hz: 0.0,
            };
        }

        let window = hann_window(n);
        let mut planner = RealFftPlanner::<f64>::new();
        let fft = planner.plan_fft_forward(n);

        let mut input: Vec<f64> = segment.iter().zip(&window).map(|(s, w)| s * w).collect();
        let mut output = fft.make_output_vec();
        fft.process(&mut input, &mut output).ok();

        Self {
            magnitudes: output.iter().map(|c| c.norm()).collect(),
            bin_hz: sample_rate as f64 / n as f64,
        }
    }

    /// Mean magnitude spectrum over Hann-windowed frames.
    ///
    /// Always produces at least one frame; a short segment is zero-padded.
    pub fn averaged(segment: &[f64], sample_rate: u32, frame_len: usize, hop: usize) -> Self {
        let num_frames = if segment.len() >= frame_len {
            (segment.len() - frame_len) / hop + 1
        } else {
            1
        };

        let window = hann_window(frame_len);
        let mut planner = RealFftPlanner::<f64>::new();
        let fft = planner.plan_fft_forward(frame_len);

        let mut input = fft.make_input_vec();
        let mut output = fft.make_output_vec();
        let mut sum = vec![0.0; output.len()];

        for frame_idx in 0..num_frames {
            let start = frame_idx * hop;
            for (i, slot) in input.iter_mut().enumerate() {
                let sample = segment.get(start + i).copied().unwrap_or(0.0);
                *slot = sample * window[i];
            }

            fft.process(&mut input, &mut output).ok();
            for (acc, bin) in sum.iter_mut().zip(&output) {
                *acc += bin.norm();
            }
        }

        let scale = 1.0 / num_frames as f64;
        Self {
            magnitudes: sum.into_iter().map(|m| m * scale).collect(),
            bin_hz: sample_rate as f64 / frame_len as f64,
        }
    }

    /// Scale magnitudes by `2/N` so a full-scale sine reads ~1.0
    pub fn normalized(mut self, fft_len: usize) -> Self {
        if fft_len > 0 {
            let scale = 2.0 / fft_len as f64;
            self.magnitudes.iter_mut().for_each(|m| *m *= scale);
        }
        self
    }

    pub fn len(&self) -> usize {
        self.magnitudes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.magnitudes.is_empty()
    }

    pub fn freq(&self, bin: usize) -> f64 {
        bin as f64 * self.bin_hz
    }

    /// Bin closest to `freq`, clamped to the last bin
    pub fn nearest_bin(&self, freq: f64) -> usize {
        if self.magnitudes.is_empty() || self.bin_hz <= 0.0 {
            return 0;
        }
        let bin = (freq / self.bin_hz).round().max(0.0) as usize;
        bin.min(self.magnitudes.len() - 1)
    }

    /// First bin whose frequency is >= `freq`
    pub fn first_bin_at_or_above(&self, freq: f64) -> usize {
        if self.bin_hz <= 0.0 {
            return 0;
        }
        ((freq / self.bin_hz).ceil().max(0.0) as usize).min(self.magnitudes.len())
    }

    /// Half-width in bins of a `hz` search window, never narrower than 3 bins
    pub fn window_bins(&self, hz: f64) -> usize {
        if self.bin_hz <= 0.0 {
            return 3;
        }
        ((hz / self.bin_hz) as usize).max(3)
    }

    /// Largest magnitude within `±half_width` bins of `center`
    pub fn peak_near(&self, center: usize, half_width: usize) -> f64 {
        if self.magnitudes.is_empty() {
            return 0.0;
        }
        let lo = center.saturating_sub(half_width);
        let hi = (center + half_width + 1).min(self.magnitudes.len());
        if lo >= hi {
            return 0.0;
        }
        self.magnitudes[lo..hi].iter().copied().fold(0.0, f64::max)
    }

    /// Index of the strongest bin in `[lo_hz, hi_hz)`
    pub fn strongest_in_band(&self, lo_hz: f64, hi_hz: f64) -> Option<usize> {
        let lo = self.first_bin_at_or_above(lo_hz);
        let hi = self.first_bin_at_or_above(hi_hz);
        if lo >= hi {
            return None;
        }
        let mut best = lo;
        for i in lo..hi {
            if self.magnitudes[i] > self.magnitudes[best] {
                best = i;
            }
        }
        Some(best)
    }
}

/// Magnitude of the analytic signal (Hilbert envelope)
pub fn analytic_envelope(samples: &[f64]) -> Vec<f64> {
    let n = samples.len();
    if n == 0 {
        return Vec::new();
    }

    let mut planner = FftPlanner::<f64>::new();
    let forward = planner.plan_fft_forward(n);
    let inverse = planner.plan_fft_inverse(n);

    let mut buffer: Vec<Complex64> = samples.iter().map(|&s| Complex64::new(s, 0.0)).collect();
    forward.process(&mut buffer);

    // Keep DC (and Nyquist for even n), double positive bins, drop negative bins
    let positive_end = if n % 2 == 0 { n / 2 } else { (n + 1) / 2 };
    for (k, bin) in buffer.iter_mut().enumerate() {
        if k == 0 || (n % 2 == 0 && k == n / 2) {
            continue;
        }
        if k < positive_end {
            *bin *= 2.0;
        } else {
            *bin = Complex64::new(0.0, 0.0);
        }
    }

    inverse.process(&mut buffer);
    let scale = 1.0 / n as f64;
    buffer.iter().map(|c| c.norm() * scale).collect()
}

/// Centered moving average with mirrored edges (`d c b a | a b c d | d c b a`)
pub fn moving_average(values: &[f64], size: usize) -> Vec<f64> {
    let n = values.len();
    if n == 0 || size <= 1 {
        return values.to_vec();
    }

    let half = (size / 2) as isize;
    let period = 2 * n as isize;
    let reflect = |j: isize| -> usize {
        let m = j.rem_euclid(period);
        if m < n as isize {
            m as usize
        } else {
            (period - 1 - m) as usize
        }
    };

    let mut prefix = Vec::with_capacity(n + size);
    prefix.push(0.0);
    let mut acc = 0.0;
    for k in 0..(n + size - 1) {
        acc += values[reflect(k as isize - half)];
        prefix.push(acc);
    }

    let scale = 1.0 / size as f64;
    (0..n).map(|i| (prefix[i + size] - prefix[i]) * scale).collect()
}

/// Autocorrelation for non-negative lags `0..len`, unnormalized
pub fn autocorrelation(samples: &[f64]) -> Vec<f64> {
    let n = samples.len();
    if n == 0 {
        return Vec::new();
    }

    let fft_len = (2 * n - 1).next_power_of_two().max(2);
    let mut planner = RealFftPlanner::<f64>::new();
    let forward = planner.plan_fft_forward(fft_len);
    let inverse = planner.plan_fft_inverse(fft_len);

    let mut input = forward.make_input_vec();
    input[..n].copy_from_slice(samples);
    let mut spectrum = forward.make_output_vec();
    forward.process(&mut input, &mut spectrum).ok();

    for bin in spectrum.iter_mut() {
        *bin = Complex64::new(bin.norm_sqr(), 0.0);
    }

    let mut output = inverse.make_output_vec();
    inverse.process(&mut spectrum, &mut output).ok();

    let scale = 1.0 / fft_len as f64;
    output[..n].iter().map(|v| v * scale).collect()
}

/// Median with midpoint averaging for even counts; 0 for empty input
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Percentile with linear interpolation between closest ranks
pub fn percentile(values: &[f64], pct: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let rank = (pct / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}
