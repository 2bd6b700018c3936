//! Audio at the edges of the simulation: PCM input for forcing, probe
//! sampling, and the PCM output container.

use crate::error::{Result, WaveError};
use crate::forcing::{ForcingSignal, SAMPLE_RATE};
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Size of the canonical PCM header written before the sample data.
pub const WAV_HEADER_LEN: usize = 44;

/// Decode a WAV stream, accepting only mono 16-bit integer PCM at 44100 Hz.
pub fn read_pcm16<R: Read>(reader: R) -> Result<ForcingSignal> {
    let reader = hound::WavReader::new(reader)?;
    let spec = reader.spec();

    if spec.sample_format != hound::SampleFormat::Int {
        return Err(WaveError::UnsupportedAudio("must be integer PCM".into()));
    }
    if spec.sample_rate != SAMPLE_RATE {
        return Err(WaveError::UnsupportedAudio(format!(
            "sample rate must be {} not {}",
            SAMPLE_RATE, spec.sample_rate
        )));
    }
    if spec.channels != 1 {
        return Err(WaveError::UnsupportedAudio(format!(
            "must be mono, found {} channels",
            spec.channels
        )));
    }
    if spec.bits_per_sample != 16 {
        return Err(WaveError::UnsupportedAudio(format!(
            "must be 16-bit, found {}-bit",
            spec.bits_per_sample
        )));
    }

    let samples = reader
        .into_samples::<i16>()
        .collect::<std::result::Result<Vec<i16>, hound::Error>>()?;
    Ok(ForcingSignal::new(samples, spec.sample_rate))
}

/// Load a forcing signal from disk.
pub fn load_pcm16(path: impl AsRef<Path>) -> Result<ForcingSignal> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let signal = read_pcm16(std::io::BufReader::new(file))?;
    info!(path = %path.display(), samples = signal.samples().len(), "loaded forcing signal");
    Ok(signal)
}

/// Probe displacement as a PCM sample.
///
/// Truncates toward zero with no rounding or clipping: values past the i16
/// range wrap modulo 2^16. NaN becomes 0.
#[inline]
pub fn probe_sample(value: f64) -> i16 {
    value as i32 as i16
}

/// Samples collected from the probe, one per sub-step, kept for the whole run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputAudioBuffer {
    samples: Vec<i16>,
}

impl OutputAudioBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve room for `expected` samples up front, failing cleanly if that is not possible.
    pub fn with_capacity(expected: usize) -> Result<Self> {
        let mut samples = Vec::new();
        samples
            .try_reserve_exact(expected)
            .map_err(|_| WaveError::Allocation {
                what: "output audio buffer",
                cells: expected,
            })?;
        Ok(Self { samples })
    }

    pub fn push(&mut self, value: f64) {
        self.samples.push(probe_sample(value));
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// RIFF and data size fields for `sample_count` samples, `None` when they
/// do not fit the 32-bit header.
pub fn wav_length_fields(sample_count: usize) -> Option<(u32, u32)> {
    let data_len = u32::try_from(sample_count).ok()?.checked_mul(2)?;
    let riff_len = data_len.checked_add(32)?;
    Some((riff_len, data_len))
}

/// Write mono 16-bit PCM with a 44-byte header.
///
/// The RIFF size field holds `32 + 2·N` and the data size field `2·N`.
/// Fails with `InvalidInput` before writing anything if those overflow.
pub fn write_pcm16_wav<W: Write>(mut out: W, samples: &[i16], sample_rate: u32) -> std::io::Result<()> {
    let (riff_len, data_len) = wav_length_fields(samples.len()).ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("{} samples exceed the WAV size limit", samples.len()),
        )
    })?;

    out.write_all(b"RIFF")?;
    out.write_all(&riff_len.to_le_bytes())?;
    out.write_all(b"WAVE")?;
    out.write_all(b"fmt ")?;
    out.write_all(&16u32.to_le_bytes())?; // fmt chunk size
    out.write_all(&1u16.to_le_bytes())?; // PCM
    out.write_all(&1u16.to_le_bytes())?; // mono
    out.write_all(&sample_rate.to_le_bytes())?;
    out.write_all(&(sample_rate * 2).to_le_bytes())?; // byte rate
    out.write_all(&2u16.to_le_bytes())?; // block align
    out.write_all(&16u16.to_le_bytes())?; // bits per sample
    out.write_all(b"data")?;
    out.write_all(&data_len.to_le_bytes())?;
    for sample in samples {
        out.write_all(&sample.to_le_bytes())?;
    }
    out.flush()
}

/// Receives the full output buffer whenever the run wants it persisted.
pub trait AudioSink: Send {
    /// Persist `samples`, replacing whatever was written before.
    fn write_audio(&mut self, samples: &[i16]) -> Result<()>;
}

/// Keeps the most recent snapshot in memory.
impl AudioSink for Vec<i16> {
    fn write_audio(&mut self, samples: &[i16]) -> Result<()> {
        self.clear();
        self.extend_from_slice(samples);
        Ok(())
    }
}

/// Rewrites a WAV file with the full buffer on every call, so the header
/// lengths always match what has been produced so far.
pub struct WavFileWriter {
    path: PathBuf,
    sample_rate: u32,
}

impl WavFileWriter {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            sample_rate: SAMPLE_RATE,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AudioSink for WavFileWriter {
    fn write_audio(&mut self, samples: &[i16]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(&self.path)?;
        write_pcm16_wav(BufWriter::new(file), samples, self.sample_rate)?;
        debug!(path = %self.path.display(), samples = samples.len(), "wrote audio");
        Ok(())
    }
}
