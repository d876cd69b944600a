//! External audio tool invocation.
//!
//! The scheduler talks to the processing tool through [`ToolBackend`], a
//! narrow blocking interface with one entry point per concern: a preflight
//! availability check, per-file processing and stream probing. The stock
//! implementation shells out to ffmpeg/ffprobe; tests substitute their own.

mod ffmpeg;

pub use ffmpeg::FfmpegTool;

use crate::expand::OperationPlan;
use crate::probe::{AudioFacts, ProbeError};
use std::path::Path;
use thiserror::Error;

/// Error type for tool invocation.
#[derive(Debug, Error)]
pub enum InvokeError {
    /// The tool binary could not be started.
    #[error("Required tool not found: {0}")]
    ToolMissing(String),

    /// The tool rejected the requested codec or container.
    #[error("Unsupported output format: {0}")]
    UnsupportedFormat(String),

    /// The tool rejected the constructed arguments.
    #[error("Invalid processing parameters: {0}")]
    InvalidParameters(String),

    /// The tool exited with a non-zero status.
    #[error("Processing failed with exit code {code}: {detail}")]
    ExitStatus { code: i32, detail: String },

    /// The tool was terminated by a signal.
    #[error("Processing tool was terminated by a signal")]
    Terminated,

    /// The tool exceeded the per-file time limit and was killed.
    #[error("Processing timed out after {limit_secs} seconds")]
    TimedOut { limit_secs: u64 },

    /// Spawning or talking to the tool failed at the OS level.
    #[error("Tool I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Blocking interface to the audio processing tool.
///
/// One call processes one file; implementations must be safe to call from
/// several worker threads at once.
pub trait ToolBackend: Send + Sync {
    /// Verify the tool binaries are runnable before any task is dispatched.
    fn preflight(&self) -> Result<(), InvokeError>;

    /// Process `input` into `output` according to the operation plan.
    fn process(&self, input: &Path, output: &Path, op: &OperationPlan) -> Result<(), InvokeError>;

    /// Read the audio stream facts of a file.
    fn probe(&self, path: &Path) -> Result<AudioFacts, ProbeError>;
}
