//! Audio normalization
//!
//! Converts any input container to canonical 16 kHz mono PCM WAV and
//! collapses long silences. Long silence is a primary trigger of hallucinated
//! repetition in the transcription engine, so silence removal always runs on
//! transcriber inputs. The input file is never mutated.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use rubato::{FftFixedIn, Resampler};
use sha2::{Digest, Sha256};
use tokio::process::Command;
use tracing::{debug, info};

use crate::AudioError;

/// Canonical sample rate for transcriber input.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

#[derive(Debug, Clone)]
pub struct NormalizerConfig {
    /// Silence floor in dBFS; samples below count as silent.
    pub silence_threshold_db: f64,
    /// Silent runs longer than this are collapsed down to this length.
    pub max_silence_secs: f64,
    /// Disable to keep silences (not used for transcriber inputs).
    pub remove_silence: bool,
    pub ffmpeg_path: PathBuf,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            silence_threshold_db: -50.0,
            max_silence_secs: 2.0,
            remove_silence: true,
            ffmpeg_path: PathBuf::from("ffmpeg"),
        }
    }
}

/// Result of normalization.
#[derive(Debug, Clone)]
pub struct NormalizedAudio {
    pub path: PathBuf,
    /// Hex sha256 of the output file.
    pub checksum: String,
    pub duration_seconds: f64,
    pub removed_silence_seconds: f64,
}

pub struct Normalizer {
    config: NormalizerConfig,
}

impl Normalizer {
    pub fn new(config: NormalizerConfig) -> Self {
        Self { config }
    }

    /// Normalize `input` into `out_dir`. WAV inputs are decoded natively and
    /// resampled in-process; other containers go through ffmpeg.
    pub async fn normalize(&self, input: &Path, out_dir: &Path) -> Result<NormalizedAudio, AudioError> {
        tokio::fs::create_dir_all(out_dir).await?;
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "audio".to_string());
        let output = out_dir.join(format!("{stem}_16k.wav"));

        let is_wav = input
            .extension()
            .map(|e| e.eq_ignore_ascii_case("wav"))
            .unwrap_or(false);

        let samples = if is_wav {
            let input = input.to_path_buf();
            tokio::task::spawn_blocking(move || read_wav_as_mono_16k(&input))
                .await
                .map_err(|e| AudioError::Subprocess(format!("decode task: {e}")))??
        } else {
            self.decode_with_ffmpeg(input, out_dir).await?
        };

        let config = self.config.clone();
        let output_clone = output.clone();
        let result = tokio::task::spawn_blocking(move || {
            let (processed, removed) = if config.remove_silence {
                collapse_silence(
                    &samples,
                    TARGET_SAMPLE_RATE,
                    config.silence_threshold_db,
                    config.max_silence_secs,
                )
            } else {
                (samples, 0.0)
            };
            let duration = processed.len() as f64 / TARGET_SAMPLE_RATE as f64;
            write_wav(&output_clone, &processed)?;
            let checksum = file_checksum(&output_clone)?;
            Ok::<_, AudioError>(NormalizedAudio {
                path: output_clone,
                checksum,
                duration_seconds: duration,
                removed_silence_seconds: removed,
            })
        })
        .await
        .map_err(|e| AudioError::Subprocess(format!("normalize task: {e}")))??;

        info!(
            input = %input.display(),
            output = %result.path.display(),
            duration_s = format!("{:.1}", result.duration_seconds),
            removed_silence_s = format!("{:.1}", result.removed_silence_seconds),
            "audio normalized"
        );
        Ok(result)
    }

    /// Decode an arbitrary container to 16 kHz mono samples via ffmpeg.
    async fn decode_with_ffmpeg(&self, input: &Path, out_dir: &Path) -> Result<Vec<i16>, AudioError> {
        let tmp = tempfile::Builder::new()
            .suffix(".wav")
            .tempfile_in(out_dir)
            .map_err(AudioError::Io)?;
        let tmp_path = tmp.path().to_path_buf();

        let status = Command::new(&self.config.ffmpeg_path)
            .arg("-y")
            .arg("-i")
            .arg(input)
            .args(["-ac", "1", "-ar", &TARGET_SAMPLE_RATE.to_string()])
            .args(["-c:a", "pcm_s16le", "-f", "wav"])
            .arg(&tmp_path)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| AudioError::Subprocess(format!("ffmpeg spawn: {e}")))?;

        if !status.success() {
            return Err(AudioError::Decode(format!(
                "ffmpeg exited with {status} for {}",
                input.display()
            )));
        }

        debug!(input = %input.display(), "ffmpeg decode complete");
        tokio::task::spawn_blocking(move || {
            let samples = read_wav_as_mono_16k(&tmp_path);
            drop(tmp);
            samples
        })
        .await
        .map_err(|e| AudioError::Subprocess(format!("decode task: {e}")))?
    }
}

/// Read any WAV as mono 16 kHz i16, downmixing and resampling as needed.
fn read_wav_as_mono_16k(path: &Path) -> Result<Vec<i16>, AudioError> {
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();

    let raw: Vec<f32> = match spec.sample_format {
        SampleFormat::Int => {
            let max = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max))
                .collect::<Result<_, _>>()?
        }
        SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
    };

    // Downmix interleaved channels
    let channels = spec.channels.max(1) as usize;
    let mono: Vec<f32> = if channels == 1 {
        raw
    } else {
        raw.chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    };

    let resampled = if spec.sample_rate == TARGET_SAMPLE_RATE {
        mono
    } else {
        resample(&mono, spec.sample_rate, TARGET_SAMPLE_RATE)?
    };

    Ok(resampled
        .into_iter()
        .map(|s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
        .collect())
}

fn resample(samples: &[f32], from: u32, to: u32) -> Result<Vec<f32>, AudioError> {
    const CHUNK: usize = 1024;
    let mut resampler = FftFixedIn::<f32>::new(from as usize, to as usize, CHUNK, 2, 1)
        .map_err(|e| AudioError::Decode(format!("resampler: {e}")))?;

    let mut out = Vec::with_capacity(samples.len() * to as usize / from as usize + CHUNK);
    let mut offset = 0;
    while offset < samples.len() {
        let end = (offset + CHUNK).min(samples.len());
        let mut chunk = samples[offset..end].to_vec();
        chunk.resize(CHUNK, 0.0);
        let frames = resampler
            .process(&[chunk], None)
            .map_err(|e| AudioError::Decode(format!("resample: {e}")))?;
        out.extend_from_slice(&frames[0]);
        offset = end;
    }
    Ok(out)
}

/// Collapse silent runs longer than `max_silence_secs` down to that length.
/// Returns the processed samples and seconds removed.
fn collapse_silence(
    samples: &[i16],
    sample_rate: u32,
    threshold_db: f64,
    max_silence_secs: f64,
) -> (Vec<i16>, f64) {
    let threshold = (10f64.powf(threshold_db / 20.0) * i16::MAX as f64) as i16;
    let keep_len = (max_silence_secs * sample_rate as f64) as usize;

    let mut out = Vec::with_capacity(samples.len());
    let mut run_start: Option<usize> = None;
    let mut removed_samples = 0usize;

    let mut flush_run = |out: &mut Vec<i16>, start: usize, end: usize, removed: &mut usize| {
        let len = end - start;
        if len > keep_len {
            out.extend_from_slice(&samples[start..start + keep_len]);
            *removed += len - keep_len;
        } else {
            out.extend_from_slice(&samples[start..end]);
        }
    };

    let threshold = (threshold as i32).max(0);
    for (i, &sample) in samples.iter().enumerate() {
        if (sample as i32).abs() <= threshold {
            if run_start.is_none() {
                run_start = Some(i);
            }
        } else {
            if let Some(start) = run_start.take() {
                flush_run(&mut out, start, i, &mut removed_samples);
            }
            out.push(sample);
        }
    }
    if let Some(start) = run_start {
        flush_run(&mut out, start, samples.len(), &mut removed_samples);
    }

    (out, removed_samples as f64 / sample_rate as f64)
}

fn write_wav(path: &Path, samples: &[i16]) -> Result<(), AudioError> {
    let spec = WavSpec {
        channels: 1,
        sample_rate: TARGET_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(())
}

fn file_checksum(path: &Path) -> Result<String, AudioError> {
    let bytes = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}
