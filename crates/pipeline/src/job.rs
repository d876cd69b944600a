//! Job payload and report types.
//!
//! A job payload names the input files, an output directory, one operation
//! and its parameter block. Payloads arrive as JSON (see the CLI crate) and
//! are validated and expanded into per-file tasks by the `expand` module.

use crate::task::Task;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// The processing operation a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Re-encode each file into a target audio format.
    Convert,
    /// Apply a loudness mastering chain (normalize, compress, limit, gain).
    Master,
    /// Remove leading and trailing silence.
    Trim,
    /// Change playback speed and/or pitch, optionally cutting a subrange.
    Modify,
    /// Probe each file and report audio facts plus a preset suggestion.
    Analyze,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Convert => write!(f, "convert"),
            Operation::Master => write!(f, "master"),
            Operation::Trim => write!(f, "trim"),
            Operation::Modify => write!(f, "modify"),
            Operation::Analyze => write!(f, "analyze"),
        }
    }
}

/// Audio formats supported as conversion targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Mp3,
    Wav,
    Ogg,
    Flac,
    Aac,
    Wma,
}

impl AudioFormat {
    /// File extension used for output naming (without the dot).
    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Wav => "wav",
            AudioFormat::Ogg => "ogg",
            AudioFormat::Flac => "flac",
            AudioFormat::Aac => "aac",
            AudioFormat::Wma => "wma",
        }
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.extension())
    }
}

/// Parameters for the mastering chain.
///
/// Stages are applied in a fixed order: loudness normalization, then
/// compression, then limiting, then the output gain. The gain is a user
/// override on top of the normalized level, so it is applied last.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MasteringParameters {
    /// Integrated loudness target in LUFS.
    #[serde(default = "default_target_lufs")]
    pub target_lufs: f64,
    /// Whether to apply dynamic range compression.
    #[serde(default = "default_true")]
    pub apply_compression: bool,
    /// Whether to apply the true-peak limiter.
    #[serde(default = "default_true")]
    pub apply_limiter: bool,
    /// Additional output gain in dB, applied after normalization.
    #[serde(default)]
    pub output_gain: f64,
}

fn default_target_lufs() -> f64 {
    -14.0
}

fn default_true() -> bool {
    true
}

impl Default for MasteringParameters {
    fn default() -> Self {
        Self {
            target_lufs: default_target_lufs(),
            apply_compression: true,
            apply_limiter: true,
            output_gain: 0.0,
        }
    }
}

/// A job payload as submitted by a client.
///
/// Operation-specific fields are flattened into the payload; the `expand`
/// module checks that the fields required by `operation` are present and
/// within range.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobRequest {
    /// Input audio files, processed in order.
    pub files: Vec<PathBuf>,
    /// Directory that receives the output files (created if absent).
    pub output: PathBuf,
    /// The operation to perform on every file.
    pub operation: Operation,
    /// How many files to process at once (default 2, clamped to 1..=16).
    #[serde(default)]
    pub concurrent_files: Option<u32>,

    /// Target format (convert).
    #[serde(default)]
    pub format: Option<AudioFormat>,

    /// Mastering preset name (master).
    #[serde(default)]
    pub preset: Option<String>,
    /// Explicit mastering parameters (master, alternative to `preset`).
    #[serde(default)]
    pub parameters: Option<MasteringParameters>,
    /// Filename suffix for mastered outputs (default "_mastered").
    #[serde(default)]
    pub suffix: Option<String>,

    /// Whether existing output files may be overwritten (default true).
    /// When false, colliding names get a " (1)", " (2)", ... counter.
    #[serde(default = "default_true")]
    pub overwrite_existing: bool,

    /// Silence threshold in dB below which samples count as silent (trim).
    #[serde(default)]
    pub silence_threshold: Option<f64>,
    /// Minimum silence run length in milliseconds before trimming (trim).
    #[serde(default)]
    pub minimum_silence_ms: Option<u64>,
    /// Silence in milliseconds to keep at each trimmed boundary (trim).
    #[serde(default)]
    pub padding_ms: Option<u64>,

    /// Playback speed multiplier, 0.5 to 2.0 (modify).
    #[serde(default)]
    pub speed: Option<f64>,
    /// Pitch shift in semitones, -12 to +12 (modify).
    #[serde(default)]
    pub pitch_semitones: Option<f64>,
    /// Cut start as a percentage of total duration (modify).
    #[serde(default)]
    pub cut_start: Option<f64>,
    /// Cut end as a percentage of total duration (modify).
    #[serde(default)]
    pub cut_end: Option<f64>,
}

/// Terminal status of a whole job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Every task succeeded.
    Success,
    /// At least one task failed.
    Error,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Success => write!(f, "success"),
            JobStatus::Error => write!(f, "error"),
        }
    }
}

/// Terminal summary of a finished job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobReport {
    /// Unique job identifier (UUID).
    pub job_id: String,
    /// Success iff every task succeeded.
    pub status: JobStatus,
    /// Short human-readable summary.
    pub message: String,
    /// One entry per input file, in payload order; None marks a failure.
    pub outputs: Vec<Option<PathBuf>>,
    /// The terminal task list, in payload order.
    pub tasks: Vec<Task>,
}

impl JobReport {
    /// Number of tasks that succeeded.
    pub fn succeeded_count(&self) -> usize {
        self.outputs.iter().filter(|o| o.is_some()).count()
    }

    /// Number of tasks that failed.
    pub fn failed_count(&self) -> usize {
        self.outputs.iter().filter(|o| o.is_none()).count()
    }
}
