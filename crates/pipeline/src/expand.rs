//! Job validation and expansion.
//!
//! Turns a raw job payload into an executable plan: checks the file list,
//! prepares the output directory, resolves the operation's parameter block
//! against its declared ranges, derives one output name per input and
//! clamps the concurrency limit. Expansion is atomic; any failure yields
//! an error and no tasks.

use crate::config::Config;
use crate::events::TaskPhase;
use crate::job::{AudioFormat, JobRequest, MasteringParameters, Operation};
use crate::presets::{resolve_preset, PresetError};
use crate::task::Task;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

/// Concurrency used when neither the payload nor the config set one.
pub const DEFAULT_CONCURRENT_FILES: u32 = 2;
/// Lowest admissible concurrency.
pub const MIN_CONCURRENT_FILES: u32 = 1;
/// Highest admissible concurrency.
pub const MAX_CONCURRENT_FILES: u32 = 16;

/// Accepted loudness target range in LUFS.
const TARGET_LUFS_RANGE: (f64, f64) = (-30.0, -6.0);
/// Accepted output gain range in dB.
const OUTPUT_GAIN_RANGE: (f64, f64) = (-6.0, 6.0);
/// Accepted playback speed range.
const SPEED_RANGE: (f64, f64) = (0.5, 2.0);
/// Accepted pitch shift range in semitones.
const PITCH_RANGE: (f64, f64) = (-12.0, 12.0);
/// Accepted silence threshold range in dB.
const SILENCE_THRESHOLD_RANGE: (f64, f64) = (-90.0, 0.0);
/// Accepted cut boundary range in percent.
const CUT_RANGE: (f64, f64) = (0.0, 100.0);

/// Default trim settings when the payload leaves them out.
const DEFAULT_SILENCE_THRESHOLD_DB: f64 = -50.0;
const DEFAULT_MINIMUM_SILENCE_MS: u64 = 500;
const DEFAULT_PADDING_MS: u64 = 0;

/// Filename suffix for mastered outputs unless the payload overrides it.
const DEFAULT_MASTER_SUFFIX: &str = "_mastered";
/// Filename suffix for modified outputs.
const MODIFY_SUFFIX: &str = "_modified";
/// Extension used when an input file has none.
const FALLBACK_EXTENSION: &str = "wav";

/// Error type for payload validation.
#[derive(Debug, Error, PartialEq)]
pub enum ValidateError {
    /// The payload contained no input files.
    #[error("No audio files were selected.")]
    NoFiles,

    /// The same input file appears twice.
    #[error("Duplicate input file: '{}'", .0.display())]
    DuplicateFile(PathBuf),

    /// An input path has no file name.
    #[error("Invalid input path: '{}'", .0.display())]
    InvalidPath(PathBuf),

    /// The output directory could not be created.
    #[error("The output directory could not be created: {0}")]
    OutputDirUnavailable(String),

    /// The output directory exists but is read-only.
    #[error("The output directory is not writable: '{}'", .0.display())]
    OutputDirReadOnly(PathBuf),

    /// Convert was requested without a target format.
    #[error("No output format selected.")]
    NoFormat,

    /// Master was requested without a preset or explicit parameters.
    #[error("No mastering preset or parameters provided.")]
    NoMasteringSettings,

    /// The requested mastering preset does not exist.
    #[error(transparent)]
    Preset(#[from] PresetError),

    /// A numeric parameter lies outside its declared range.
    #[error("Parameter '{name}' is out of range: {value} (allowed {min} to {max})")]
    ParameterOutOfRange {
        name: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    /// Only one of the two cut boundaries was provided.
    #[error("Cut start and cut end must be provided together.")]
    CutRangeIncomplete,

    /// The cut boundaries are reversed or equal.
    #[error("Cut start ({start}%) must be less than cut end ({end}%).")]
    CutRangeInvalid { start: f64, end: f64 },
}

/// Silence-trim settings after defaults are filled in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrimParameters {
    /// Level in dB below which samples count as silent.
    pub silence_threshold_db: f64,
    /// Minimum silence run length in milliseconds before trimming.
    pub minimum_silence_ms: u64,
    /// Silence kept at each trimmed boundary in milliseconds.
    pub padding_ms: u64,
}

/// A subrange cut expressed as percentages of total duration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CutRange {
    pub start_pct: f64,
    pub end_pct: f64,
}

/// Speed/pitch settings after defaults are filled in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModifyParameters {
    /// Playback speed multiplier.
    pub speed: f64,
    /// Pitch shift in semitones.
    pub pitch_semitones: f64,
    /// Optional subrange to keep.
    pub cut: Option<CutRange>,
}

/// The operation with its resolved parameter block.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationPlan {
    Convert {
        format: AudioFormat,
    },
    Master {
        parameters: MasteringParameters,
        /// Present when the parameters came from a named preset.
        preset_name: Option<String>,
    },
    Trim {
        parameters: TrimParameters,
    },
    Modify {
        parameters: ModifyParameters,
    },
    Analyze,
}

impl OperationPlan {
    /// The operation this plan resolves.
    pub fn operation(&self) -> Operation {
        match self {
            OperationPlan::Convert { .. } => Operation::Convert,
            OperationPlan::Master { .. } => Operation::Master,
            OperationPlan::Trim { .. } => Operation::Trim,
            OperationPlan::Modify { .. } => Operation::Modify,
            OperationPlan::Analyze => Operation::Analyze,
        }
    }

    /// The phase reported in progress events for this operation.
    pub fn phase(&self) -> TaskPhase {
        match self {
            OperationPlan::Analyze => TaskPhase::Analyzing,
            _ => TaskPhase::Processing,
        }
    }
}

/// An executable plan expanded from a validated payload.
#[derive(Debug, Clone, PartialEq)]
pub struct JobPlan {
    /// Unique job identifier (UUID).
    pub job_id: String,
    /// The operation with its resolved parameters.
    pub operation: OperationPlan,
    /// One pending task per input file, in payload order.
    pub tasks: Vec<Task>,
    /// Clamped number of files to process at once.
    pub concurrency: usize,
    /// The prepared output directory.
    pub output_dir: PathBuf,
}

/// Resolve the effective concurrency limit for a job.
///
/// The payload value wins when present, then the configured default,
/// then the built-in default; the result is clamped to 1..=16.
pub fn resolve_concurrency(requested: Option<u32>, configured_default: u32) -> usize {
    let raw = match requested {
        Some(n) => n,
        None if configured_default > 0 => configured_default,
        None => DEFAULT_CONCURRENT_FILES,
    };
    raw.clamp(MIN_CONCURRENT_FILES, MAX_CONCURRENT_FILES) as usize
}

/// Validate a payload and expand it into an executable plan.
///
/// Checks, in order: the file list (non-empty, unique, well-formed), the
/// output directory (created if absent, must be writable), the operation's
/// parameter block, and finally derives collision-free output names.
pub fn expand_job(request: &JobRequest, config: &Config) -> Result<JobPlan, ValidateError> {
    validate_files(&request.files)?;
    prepare_output_dir(&request.output)?;
    let operation = resolve_operation(request)?;
    let tasks = derive_tasks(request, &operation);

    Ok(JobPlan {
        job_id: Uuid::new_v4().to_string(),
        operation,
        tasks,
        concurrency: resolve_concurrency(
            request.concurrent_files,
            config.jobs.max_concurrent_files,
        ),
        output_dir: request.output.clone(),
    })
}

/// Check the input list is non-empty, unique and well-formed.
fn validate_files(files: &[PathBuf]) -> Result<(), ValidateError> {
    if files.is_empty() {
        return Err(ValidateError::NoFiles);
    }

    let mut seen = HashSet::new();
    for file in files {
        if file.file_name().is_none() {
            return Err(ValidateError::InvalidPath(file.clone()));
        }
        if !seen.insert(file.as_path()) {
            return Err(ValidateError::DuplicateFile(file.clone()));
        }
    }

    Ok(())
}

/// Create the output directory if needed and check it is writable.
fn prepare_output_dir(dir: &Path) -> Result<(), ValidateError> {
    fs::create_dir_all(dir).map_err(|e| ValidateError::OutputDirUnavailable(e.to_string()))?;

    let metadata =
        fs::metadata(dir).map_err(|e| ValidateError::OutputDirUnavailable(e.to_string()))?;
    if metadata.permissions().readonly() {
        return Err(ValidateError::OutputDirReadOnly(dir.to_path_buf()));
    }

    Ok(())
}

/// Resolve the operation's parameter block and check declared ranges.
fn resolve_operation(request: &JobRequest) -> Result<OperationPlan, ValidateError> {
    match request.operation {
        Operation::Convert => {
            let format = request.format.ok_or(ValidateError::NoFormat)?;
            Ok(OperationPlan::Convert { format })
        }
        Operation::Master => {
            let (parameters, preset_name) = match (&request.preset, &request.parameters) {
                (Some(name), _) => (resolve_preset(name)?, Some(name.clone())),
                (None, Some(params)) => (*params, None),
                (None, None) => return Err(ValidateError::NoMasteringSettings),
            };
            check_range("target_lufs", parameters.target_lufs, TARGET_LUFS_RANGE)?;
            check_range("output_gain", parameters.output_gain, OUTPUT_GAIN_RANGE)?;
            Ok(OperationPlan::Master {
                parameters,
                preset_name,
            })
        }
        Operation::Trim => {
            let parameters = TrimParameters {
                silence_threshold_db: request
                    .silence_threshold
                    .unwrap_or(DEFAULT_SILENCE_THRESHOLD_DB),
                minimum_silence_ms: request
                    .minimum_silence_ms
                    .unwrap_or(DEFAULT_MINIMUM_SILENCE_MS),
                padding_ms: request.padding_ms.unwrap_or(DEFAULT_PADDING_MS),
            };
            check_range(
                "silence_threshold",
                parameters.silence_threshold_db,
                SILENCE_THRESHOLD_RANGE,
            )?;
            Ok(OperationPlan::Trim { parameters })
        }
        Operation::Modify => {
            let speed = request.speed.unwrap_or(1.0);
            let pitch = request.pitch_semitones.unwrap_or(0.0);
            check_range("speed", speed, SPEED_RANGE)?;
            check_range("pitch_semitones", pitch, PITCH_RANGE)?;

            let cut = match (request.cut_start, request.cut_end) {
                (None, None) => None,
                (Some(start), Some(end)) => {
                    check_range("cut_start", start, CUT_RANGE)?;
                    check_range("cut_end", end, CUT_RANGE)?;
                    if start >= end {
                        return Err(ValidateError::CutRangeInvalid { start, end });
                    }
                    Some(CutRange {
                        start_pct: start,
                        end_pct: end,
                    })
                }
                _ => return Err(ValidateError::CutRangeIncomplete),
            };

            Ok(OperationPlan::Modify {
                parameters: ModifyParameters {
                    speed,
                    pitch_semitones: pitch,
                    cut,
                },
            })
        }
        Operation::Analyze => Ok(OperationPlan::Analyze),
    }
}

/// Check a numeric parameter against its declared inclusive range.
fn check_range(
    name: &'static str,
    value: f64,
    (min, max): (f64, f64),
) -> Result<(), ValidateError> {
    if !value.is_finite() || value < min || value > max {
        return Err(ValidateError::ParameterOutOfRange {
            name,
            value,
            min,
            max,
        });
    }
    Ok(())
}

/// Derive one pending task per input, with collision-free output names.
fn derive_tasks(request: &JobRequest, operation: &OperationPlan) -> Vec<Task> {
    let mut taken: HashSet<PathBuf> = HashSet::new();
    let mut tasks = Vec::with_capacity(request.files.len());

    for (index, input) in request.files.iter().enumerate() {
        let output = match operation {
            OperationPlan::Analyze => None,
            _ => Some(allocate_output(
                &request.output,
                input,
                operation,
                request,
                &mut taken,
            )),
        };
        tasks.push(Task::new(index, input.clone(), output));
    }

    tasks
}

/// Split an input path into (stem, extension), falling back to "wav"
/// for extensionless files.
fn split_name(input: &Path) -> (String, String) {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = input
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| FALLBACK_EXTENSION.to_string());
    (stem, ext)
}

/// The base name (without extension) and extension for an output file.
fn output_name_parts(
    input: &Path,
    operation: &OperationPlan,
    request: &JobRequest,
) -> (String, String) {
    let (stem, ext) = split_name(input);
    match operation {
        OperationPlan::Convert { format } => (stem, format.extension().to_string()),
        OperationPlan::Master { .. } => {
            let suffix = request.suffix.as_deref().unwrap_or(DEFAULT_MASTER_SUFFIX);
            (format!("{}{}", stem, suffix), ext)
        }
        OperationPlan::Trim { .. } => (stem, ext),
        OperationPlan::Modify { .. } => (format!("{}{}", stem, MODIFY_SUFFIX), ext),
        OperationPlan::Analyze => (stem, ext),
    }
}

/// Pick an output path that collides with nothing: never the source file,
/// never another output of this job, and never an existing file when
/// overwriting is disabled. Colliding names get a " (1)", " (2)", ...
/// counter, first free slot wins.
fn allocate_output(
    dir: &Path,
    input: &Path,
    operation: &OperationPlan,
    request: &JobRequest,
    taken: &mut HashSet<PathBuf>,
) -> PathBuf {
    let (base, ext) = output_name_parts(input, operation, request);

    let mut candidate = dir.join(format!("{}.{}", base, ext));
    let mut counter = 1u32;
    while collides(&candidate, input, request.overwrite_existing, taken) {
        candidate = dir.join(format!("{} ({}).{}", base, counter, ext));
        counter += 1;
    }

    taken.insert(candidate.clone());
    candidate
}

fn collides(
    candidate: &Path,
    input: &Path,
    overwrite_existing: bool,
    taken: &HashSet<PathBuf>,
) -> bool {
    candidate == input
        || taken.contains(candidate)
        || (!overwrite_existing && candidate.exists())
}
