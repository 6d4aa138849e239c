//! Rendered audio loading
//!
//! Everything is mixed down to a single mono `f64` channel; the analyzers
//! never look at stereo image.

use crate::{Result, SignalError};
use std::path::Path;
use symphonia::core::audio::{AudioBufferRef, Signal};
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Which decoders may be used when loading audio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeSupport {
    /// Decode non-WAV containers (FLAC, OGG, MP3, ...) through symphonia
    pub compressed: bool,
}

impl Default for DecodeSupport {
    fn default() -> Self {
        Self { compressed: true }
    }
}

impl DecodeSupport {
    /// Only plain WAV through hound
    pub fn wav_only() -> Self {
        Self { compressed: false }
    }
}

/// Mono audio buffer. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    samples: Vec<f64>,
    sample_rate: u32,
    source_path: Option<String>,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f64>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
            source_path: None,
        }
    }

    /// Load audio from file and mix it to mono
    pub fn load<P: AsRef<Path>>(path: P, support: &DecodeSupport) -> Result<Self> {
        let path = path.as_ref();
        let path_str = path.display().to_string();

        let is_wav = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("wav"))
            .unwrap_or(false);

        let (channels, sample_rate) = if is_wav {
            Self::read_wav(path, &path_str)?
        } else if support.compressed {
            Self::read_symphonia(path, &path_str)?
        } else {
            return Err(SignalError::Unsupported(path_str));
        };

        let samples = mix_to_mono(&channels);
        if samples.is_empty() {
            return Err(SignalError::Empty(path_str));
        }

        log::debug!(
            "Loaded {} ({} samples @ {} Hz, {} ch)",
            path_str,
            samples.len(),
            sample_rate,
            channels.len()
        );

        Ok(Self {
            samples,
            sample_rate,
            source_path: Some(path_str),
        })
    }

    fn read_wav(path: &Path, path_str: &str) -> Result<(Vec<Vec<f64>>, u32)> {
        let reader = hound::WavReader::open(path)
            .map_err(|e| SignalError::LoadError(format!("{}: {}", path_str, e)))?;

        let spec = reader.spec();
        let num_channels = spec.channels.max(1) as usize;

        let interleaved: Vec<f64> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .into_samples::<f32>()
                .map(|s| s.map(|v| v as f64))
                .collect::<std::result::Result<Vec<_>, _>>()?,
            hound::SampleFormat::Int => {
                let max_val = (1i64 << (spec.bits_per_sample - 1)) as f64;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f64 / max_val))
                    .collect::<std::result::Result<Vec<_>, _>>()?
            }
        };

        let frames = interleaved.len() / num_channels;
        let mut channels = vec![Vec::with_capacity(frames); num_channels];
        for (i, sample) in interleaved.into_iter().enumerate() {
            channels[i % num_channels].push(sample);
        }

        Ok((channels, spec.sample_rate))
    }

    fn read_symphonia(path: &Path, path_str: &str) -> Result<(Vec<Vec<f64>>, u32)> {
        let file = std::fs::File::open(path)?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let load_err = |e: &dyn std::fmt::Display| SignalError::LoadError(format!("{}: {}", path_str, e));

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| load_err(&e))?;

        let mut format = probed.format;
        let track = format
            .default_track()
            .ok_or_else(|| load_err(&"no audio track"))?;

        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| load_err(&"unknown sample rate"))?;
        let num_channels = track
            .codec_params
            .channels
            .map(|c| c.count())
            .unwrap_or(1);

        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| load_err(&e))?;

        let track_id = track.id;
        let mut channels = vec![Vec::new(); num_channels];

        loop {
            let packet = match format.next_packet() {
                Ok(p) => p,
                Err(symphonia::core::errors::Error::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break
                }
                Err(e) => return Err(load_err(&e)),
            };

            if packet.track_id() != track_id {
                continue;
            }

            let decoded = decoder.decode(&packet).map_err(|e| load_err(&e))?;
            append_planes(&decoded, &mut channels);
        }

        Ok((channels, sample_rate))
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn source_path(&self) -> Option<&str> {
        self.source_path.as_deref()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn peak(&self) -> f64 {
        self.samples
            .iter()
            .filter(|s| s.is_finite())
            .map(|s| s.abs())
            .fold(0.0, f64::max)
    }

    pub fn rms(&self) -> f64 {
        crate::spectral::rms(&self.samples)
    }
}

fn mix_to_mono(channels: &[Vec<f64>]) -> Vec<f64> {
    match channels.len() {
        0 => Vec::new(),
        1 => channels[0].clone(),
        n => {
            let frames = channels.iter().map(Vec::len).min().unwrap_or(0);
            let scale = 1.0 / n as f64;
            (0..frames)
                .map(|i| channels.iter().map(|ch| ch[i]).sum::<f64>() * scale)
                .collect()
        }
    }
}

/// Append decoded planes, converting every sample format to [-1, 1]
fn append_planes(buffer: &AudioBufferRef, channels: &mut [Vec<f64>]) {
    macro_rules! copy_planes {
        ($buf:expr, $convert:expr) => {{
            let available = $buf.spec().channels.count();
            for (ch_idx, channel) in channels.iter_mut().enumerate().take(available) {
                channel.extend($buf.chan(ch_idx).iter().map($convert));
            }
        }};
    }

    match buffer {
        AudioBufferRef::F32(buf) => copy_planes!(buf, |&s| s as f64),
        AudioBufferRef::F64(buf) => copy_planes!(buf, |&s| s),
        AudioBufferRef::S8(buf) => copy_planes!(buf, |&s| s as f64 / 128.0),
        AudioBufferRef::S16(buf) => copy_planes!(buf, |&s| s as f64 / 32768.0),
        AudioBufferRef::S24(buf) => copy_planes!(buf, |s| s.inner() as f64 / 8388608.0),
        AudioBufferRef::S32(buf) => copy_planes!(buf, |&s| s as f64 / 2147483648.0),
        AudioBufferRef::U8(buf) => copy_planes!(buf, |&s| (s as f64 - 128.0) / 128.0),
        AudioBufferRef::U16(buf) => copy_planes!(buf, |&s| (s as f64 - 32768.0) / 32768.0),
        AudioBufferRef::U24(buf) => {
            copy_planes!(buf, |s| (s.inner() as f64 - 8388608.0) / 8388608.0)
        }
        AudioBufferRef::U32(buf) => {
            copy_planes!(buf, |&s| (s as f64 - 2147483648.0) / 2147483648.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(path: &Path, channels: u16, frames: &[Vec<i16>]) {
        let spec = hound::WavSpec {
            channels,
            sample_rate: 48000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for frame in frames {
            for &s in frame {
                writer.write_sample(s).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_load_stereo_mixes_to_mono() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        write_wav(&path, 2, &[vec![16384, 0], vec![-16384, -16384]]);

        let audio = AudioBuffer::load(&path, &DecodeSupport::default()).unwrap();
        assert_eq!(audio.sample_rate(), 48000);
        assert_eq!(audio.len(), 2);
        assert!((audio.samples()[0] - 0.25).abs() < 1e-9);
        assert!((audio.samples()[1] + 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_empty_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.wav");
        write_wav(&path, 1, &[]);

        let result = AudioBuffer::load(&path, &DecodeSupport::default());
        assert!(matches!(result, Err(SignalError::Empty(_))));
    }

    #[test]
    fn test_compressed_formats_need_support() {
        let result = AudioBuffer::load("render.flac", &DecodeSupport::wav_only());
        assert!(matches!(result, Err(SignalError::Unsupported(_))));
    }

    #[test]
    fn test_peak_and_rms() {
        let audio = AudioBuffer::new(vec![1.0, 0.5, -0.5, -1.0], 44100);
        assert_eq!(audio.peak(), 1.0);
        assert!((audio.rms() - 0.7906).abs() < 0.001);
        assert!((audio.duration() - 4.0 / 44100.0).abs() < 1e-12);
    }
}
