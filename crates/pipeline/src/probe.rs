//! Audio probing via ffprobe.
//!
//! Runs ffprobe against a file and reduces its JSON output to the audio
//! facts the pipeline cares about: codec, channel count, sample rate,
//! bitrate and duration. Files without an audio stream are an error.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Command;
use thiserror::Error;

/// Error type for probe operations.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// ffprobe command failed to execute or exited non-zero.
    #[error("ffprobe failed: {0}")]
    FfprobeFailed(String),

    /// Failed to parse ffprobe JSON output.
    #[error("Failed to parse ffprobe output: {0}")]
    ParseError(String),

    /// The file has no audio stream to analyze.
    #[error("No audio stream found in '{0}'")]
    NoAudioStream(String),

    /// IO error during probe.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio facts extracted from a probed file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AudioFacts {
    /// Codec name of the first audio stream (e.g. "mp3", "flac", "aac").
    pub codec_name: String,
    /// Number of audio channels.
    pub channels: u32,
    /// Sample rate in Hz (0 if not reported).
    pub sample_rate_hz: u32,
    /// Bitrate in bits per second, from the stream or the container
    /// (0 if neither reports one).
    pub bitrate_bps: u64,
    /// Duration in seconds (0.0 if not reported).
    pub duration_secs: f64,
}

/// Raw ffprobe JSON structures for parsing.
mod ffprobe_json {
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    pub struct FfprobeOutput {
        pub streams: Option<Vec<Stream>>,
        pub format: Option<Format>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Stream {
        pub codec_type: Option<String>,
        pub codec_name: Option<String>,
        pub channels: Option<u32>,
        pub sample_rate: Option<String>,
        pub bit_rate: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Format {
        pub duration: Option<String>,
        pub bit_rate: Option<String>,
    }
}

/// Probes an audio file using ffprobe to collect stream and format metadata.
///
/// Runs `ffprobe -v quiet -print_format json -show_streams -show_format <path>`
/// and parses the JSON output.
pub fn probe_file(ffprobe: &Path, path: &Path) -> Result<AudioFacts, ProbeError> {
    let output = Command::new(ffprobe)
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_streams",
            "-show_format",
        ])
        .arg(path)
        .output()?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ProbeError::FfprobeFailed(format!(
            "ffprobe exited with status {}: {}",
            output.status,
            stderr.trim()
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_ffprobe_output(&stdout, &path.to_string_lossy())
}

/// Parses ffprobe JSON output into audio facts for the named file.
pub fn parse_ffprobe_output(json_str: &str, file_name: &str) -> Result<AudioFacts, ProbeError> {
    let ffprobe: ffprobe_json::FfprobeOutput =
        serde_json::from_str(json_str).map_err(|e| ProbeError::ParseError(e.to_string()))?;

    let streams = ffprobe.streams.unwrap_or_default();
    let format = ffprobe.format.ok_or_else(|| {
        ProbeError::ParseError("Missing format information in ffprobe output".to_string())
    })?;

    let audio = streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("audio"))
        .ok_or_else(|| ProbeError::NoAudioStream(file_name.to_string()))?;

    let sample_rate_hz = audio
        .sample_rate
        .as_ref()
        .and_then(|sr| sr.parse::<u32>().ok())
        .unwrap_or(0);

    // Stream bitrate when reported, container bitrate otherwise
    let bitrate_bps = audio
        .bit_rate
        .as_ref()
        .and_then(|br| br.parse::<u64>().ok())
        .or_else(|| {
            format
                .bit_rate
                .as_ref()
                .and_then(|br| br.parse::<u64>().ok())
        })
        .unwrap_or(0);

    let duration_secs = format
        .duration
        .as_ref()
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);

    Ok(AudioFacts {
        codec_name: audio.codec_name.clone().unwrap_or_default(),
        channels: audio.channels.unwrap_or(0),
        sample_rate_hz,
        bitrate_bps,
        duration_secs,
    })
}
