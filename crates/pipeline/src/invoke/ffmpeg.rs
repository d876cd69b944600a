//! FFmpeg-backed audio processing
//!
//! Builds and executes ffmpeg commands for each operation. Command
//! construction is pure and deterministic; execution captures the stderr
//! tail for failure reporting and enforces the per-file time limit by
//! polling the child and killing it past the deadline. Silence trimming
//! runs a detection pass first and cuts the measured edges, so sound
//! inside the silence is never swallowed by the trim.

use crate::config::Config;
use crate::expand::{ModifyParameters, OperationPlan, TrimParameters};
use crate::invoke::{InvokeError, ToolBackend};
use crate::job::{AudioFormat, MasteringParameters};
use crate::probe::{probe_file, AudioFacts, ProbeError};
use std::collections::VecDeque;
use std::io::{BufRead, BufReader, ErrorKind};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tracing::debug;

/// Fixed compressor settings applied during mastering.
/// Threshold in dBFS; attack and release in milliseconds.
const COMPRESSOR_THRESHOLD_DB: f64 = -20.0;
const COMPRESSOR_RATIO: f64 = 4.0;
const COMPRESSOR_ATTACK_MS: f64 = 5.0;
const COMPRESSOR_RELEASE_MS: f64 = 100.0;

/// Hard ceiling applied by the mastering limiter, in dBFS.
const LIMITER_CEILING_DB: f64 = -1.0;

/// True-peak and loudness-range settings for the normalization pass.
const LOUDNORM_TRUE_PEAK_DB: f64 = -1.0;
const LOUDNORM_RANGE_LU: f64 = 11.0;

/// Sample rate assumed when the probe could not report one.
const DEFAULT_SAMPLE_RATE_HZ: u32 = 44_100;

/// How often the runner polls a child for completion.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Number of trailing stderr lines kept for failure reports.
const STDERR_TAIL_LINES: usize = 20;

/// Reported silence starting this close to zero counts as the leading
/// edge of the file.
const LEADING_EDGE_SECS: f64 = 0.01;

/// Reported silence reaching this close to the probed duration counts as
/// the trailing edge; probed durations can overshoot the decoded stream
/// slightly.
const TRAILING_EDGE_SECS: f64 = 0.1;

/// Slack when comparing a reported span length against the minimum; the
/// detection pass prints rounded endpoints.
const ENDPOINT_SLACK_SECS: f64 = 0.001;

/// FFmpeg/ffprobe backend for audio processing.
#[derive(Debug, Clone)]
pub struct FfmpegTool {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    task_timeout: Duration,
    debug_tool_output: bool,
}

impl FfmpegTool {
    /// Build a backend from the loaded configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            ffmpeg: config.tools.ffmpeg.clone(),
            ffprobe: config.tools.ffprobe.clone(),
            task_timeout: Duration::from_secs(config.jobs.task_timeout_secs),
            debug_tool_output: config.logging.debug_tool_output,
        }
    }

    /// Run a prepared ffmpeg command to completion.
    ///
    /// # Errors
    /// Returns an error if the tool cannot be started, exits non-zero,
    /// is terminated by a signal, or exceeds the time limit.
    fn run_tool(&self, cmd: Command) -> Result<(), InvokeError> {
        self.run_tool_with_output(cmd, Some(STDERR_TAIL_LINES))
            .map(drop)
    }

    /// Run a prepared command and return its captured stderr.
    ///
    /// stdin/stdout are discarded, stderr is drained on a reader thread so
    /// the child never blocks on a full pipe. `keep_lines` caps how much of
    /// it is kept; the silence scan needs the whole report, everything else
    /// only the tail for failure classification. The child is killed once
    /// the per-file deadline passes.
    fn run_tool_with_output(
        &self,
        mut cmd: Command,
        keep_lines: Option<usize>,
    ) -> Result<String, InvokeError> {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| match e.kind() {
            ErrorKind::NotFound => InvokeError::ToolMissing(self.ffmpeg.display().to_string()),
            _ => InvokeError::Io(e),
        })?;

        let debug_tool_output = self.debug_tool_output;
        let stderr_handle = child.stderr.take().map(|stderr| {
            std::thread::spawn(move || {
                let reader = BufReader::new(stderr);
                let mut lines: VecDeque<String> = VecDeque::new();
                for line in reader.lines() {
                    let Ok(text) = line else { break };
                    if debug_tool_output {
                        debug!(target: "tool", "{}", text);
                    }
                    if keep_lines == Some(lines.len()) {
                        lines.pop_front();
                    }
                    lines.push_back(text);
                }
                lines.into_iter().collect::<Vec<_>>().join("\n")
            })
        });

        let deadline = Instant::now() + self.task_timeout;
        let mut timed_out = false;
        let status = loop {
            match child.try_wait()? {
                Some(status) => break status,
                None => {
                    if Instant::now() >= deadline {
                        let _ = child.kill();
                        timed_out = true;
                        break child.wait()?;
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
            }
        };

        let captured = stderr_handle
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        if timed_out {
            return Err(InvokeError::TimedOut {
                limit_secs: self.task_timeout.as_secs(),
            });
        }

        if status.success() {
            Ok(captured)
        } else {
            match status.code() {
                Some(code) => Err(classify_failure(code, &captured)),
                None => Err(InvokeError::Terminated),
            }
        }
    }

    /// Check that one tool binary answers `-version`.
    fn check_tool(&self, tool: &Path) -> Result<(), InvokeError> {
        let output = Command::new(tool)
            .arg("-version")
            .stdin(Stdio::null())
            .output()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => InvokeError::ToolMissing(tool.display().to_string()),
                _ => InvokeError::Io(e),
            })?;

        if !output.status.success() {
            return Err(InvokeError::ToolMissing(tool.display().to_string()));
        }

        if let Some(major) = parse_tool_version(&String::from_utf8_lossy(&output.stdout)) {
            debug!(tool = %tool.display(), major, "tool available");
        }

        Ok(())
    }
}

impl ToolBackend for FfmpegTool {
    fn preflight(&self) -> Result<(), InvokeError> {
        self.check_tool(&self.ffmpeg)?;
        self.check_tool(&self.ffprobe)?;
        Ok(())
    }

    fn process(&self, input: &Path, output: &Path, op: &OperationPlan) -> Result<(), InvokeError> {
        let cmd = match op {
            OperationPlan::Convert { format } => {
                build_convert_command(&self.ffmpeg, input, output, *format)
            }
            OperationPlan::Master { parameters, .. } => {
                build_master_command(&self.ffmpeg, input, output, parameters)
            }
            OperationPlan::Trim { parameters } => {
                // Detection pass first: a quiet stretch only counts as
                // silence past the configured minimum, and only edge
                // silence is cut.
                let scan = build_silence_scan_command(&self.ffmpeg, input, parameters);
                let report = self.run_tool_with_output(scan, None)?;
                let spans = parse_silence_report(&report);
                let bounds = if spans.is_empty() {
                    None
                } else {
                    let facts = self
                        .probe(input)
                        .map_err(|e| InvokeError::InvalidParameters(e.to_string()))?;
                    if facts.duration_secs <= 0.0 {
                        return Err(InvokeError::InvalidParameters(
                            "silence trim needs a known source duration".to_string(),
                        ));
                    }
                    trim_bounds(&spans, facts.duration_secs, parameters)
                };
                build_trim_command(&self.ffmpeg, input, output, bounds)
            }
            OperationPlan::Modify { parameters } => {
                // Pitch needs the source sample rate and a cut needs the
                // source duration; a plain speed change needs neither, so
                // the probe (and its failures) only applies when they do.
                let facts = if parameters.pitch_semitones != 0.0 || parameters.cut.is_some() {
                    let facts = self
                        .probe(input)
                        .map_err(|e| InvokeError::InvalidParameters(e.to_string()))?;
                    if parameters.cut.is_some() && facts.duration_secs <= 0.0 {
                        return Err(InvokeError::InvalidParameters(
                            "cut requested but the source duration is unknown".to_string(),
                        ));
                    }
                    facts
                } else {
                    AudioFacts::default()
                };
                build_modify_command(&self.ffmpeg, input, output, parameters, &facts)
            }
            OperationPlan::Analyze => {
                return Err(InvokeError::InvalidParameters(
                    "analyze does not produce an output file".to_string(),
                ));
            }
        };

        self.run_tool(cmd)
    }

    fn probe(&self, path: &Path) -> Result<AudioFacts, ProbeError> {
        probe_file(&self.ffprobe, path)
    }
}

/// Map a non-zero tool exit to a specific error using the stderr tail.
fn classify_failure(code: i32, stderr_tail: &str) -> InvokeError {
    let lowered = stderr_tail.to_lowercase();
    let detail = stderr_tail
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("no tool output captured")
        .to_string();

    if lowered.contains("unknown encoder")
        || lowered.contains("encoder not found")
        || lowered.contains("muxer not found")
    {
        InvokeError::UnsupportedFormat(detail)
    } else if lowered.contains("invalid argument")
        || lowered.contains("error parsing")
        || lowered.contains("option not found")
        || lowered.contains("no such filter")
    {
        InvokeError::InvalidParameters(detail)
    } else {
        InvokeError::ExitStatus { code, detail }
    }
}

/// Parse a `-version` banner and extract the major version number.
///
/// Handles both plain ("ffmpeg version 6.1 ...") and n-prefixed
/// ("ffmpeg version n6.1-...") version strings.
pub fn parse_tool_version(version_output: &str) -> Option<u32> {
    let version_line = version_output
        .lines()
        .find(|line| line.to_lowercase().contains(" version "))?;

    let version_part = version_line
        .to_lowercase()
        .split(" version ")
        .nth(1)?
        .trim()
        .split_whitespace()
        .next()?
        .to_string();

    let version_str = version_part.trim_start_matches('n');

    let major_str = version_str.split(|c| c == '.' || c == '-').next()?;

    major_str.parse().ok()
}

/// The ffmpeg encoder used for each output format.
fn codec_for_format(format: AudioFormat) -> &'static str {
    match format {
        AudioFormat::Mp3 => "libmp3lame",
        AudioFormat::Wav => "pcm_s16le",
        AudioFormat::Ogg => "libvorbis",
        AudioFormat::Flac => "flac",
        AudioFormat::Aac => "aac",
        AudioFormat::Wma => "wmav2",
    }
}

/// Common command prefix shared by every operation: quiet banner, no
/// interactive prompts, overwrite the (already collision-checked) target,
/// keep source metadata and drop any video streams such as cover art.
fn base_command(ffmpeg: &Path, input: &Path) -> Command {
    let mut cmd = Command::new(ffmpeg);
    cmd.arg("-hide_banner");
    cmd.arg("-nostdin");
    cmd.arg("-y");
    cmd.arg("-i").arg(input);
    cmd.arg("-map_metadata").arg("0");
    cmd.arg("-vn");
    cmd
}

/// Build the command for a format conversion.
fn build_convert_command(
    ffmpeg: &Path,
    input: &Path,
    output: &Path,
    format: AudioFormat,
) -> Command {
    let mut cmd = base_command(ffmpeg, input);
    cmd.arg("-c:a").arg(codec_for_format(format));
    cmd.arg(output);
    cmd
}

/// Build the command for a mastering pass.
fn build_master_command(
    ffmpeg: &Path,
    input: &Path,
    output: &Path,
    parameters: &MasteringParameters,
) -> Command {
    let mut cmd = base_command(ffmpeg, input);
    cmd.arg("-filter:a").arg(master_filter(parameters));
    cmd.arg(output);
    cmd
}

/// Build the detection pass for a silence trim.
///
/// Decodes the file into the null muxer with silencedetect attached; the
/// filter reports every stretch quieter than the threshold that lasts at
/// least the configured minimum on stderr.
fn build_silence_scan_command(ffmpeg: &Path, input: &Path, parameters: &TrimParameters) -> Command {
    let mut cmd = Command::new(ffmpeg);
    cmd.arg("-hide_banner");
    cmd.arg("-nostdin");
    cmd.arg("-nostats");
    cmd.arg("-i").arg(input);
    cmd.arg("-vn");
    cmd.arg("-filter:a").arg(format!(
        "silencedetect=n={}dB:d={}",
        parameters.silence_threshold_db,
        parameters.minimum_silence_ms as f64 / 1000.0
    ));
    cmd.arg("-f").arg("null");
    cmd.arg("-");
    cmd
}

/// Build the command for a silence trim.
///
/// `bounds` is the keep range in seconds derived from the detection pass;
/// without one there is nothing to cut and the file is written through
/// unchanged in length.
fn build_trim_command(
    ffmpeg: &Path,
    input: &Path,
    output: &Path,
    bounds: Option<(f64, f64)>,
) -> Command {
    let mut cmd = base_command(ffmpeg, input);
    if let Some((start, end)) = bounds {
        cmd.arg("-ss").arg(format!("{:.3}", start));
        cmd.arg("-to").arg(format!("{:.3}", end));
    }
    cmd.arg(output);
    cmd
}

/// Build the command for a speed/pitch/cut modification.
///
/// Pitch shifting needs the source sample rate and cutting needs the
/// source duration, both taken from the probe result.
fn build_modify_command(
    ffmpeg: &Path,
    input: &Path,
    output: &Path,
    parameters: &ModifyParameters,
    facts: &AudioFacts,
) -> Command {
    let mut cmd = base_command(ffmpeg, input);

    let sample_rate = if facts.sample_rate_hz > 0 {
        facts.sample_rate_hz
    } else {
        DEFAULT_SAMPLE_RATE_HZ
    };
    let filter = modify_filter(parameters, sample_rate);
    if !filter.is_empty() {
        cmd.arg("-filter:a").arg(filter);
    }

    if let Some(cut) = &parameters.cut {
        let start = facts.duration_secs * cut.start_pct / 100.0;
        let end = facts.duration_secs * cut.end_pct / 100.0;
        cmd.arg("-ss").arg(format!("{:.3}", start));
        cmd.arg("-to").arg(format!("{:.3}", end));
    }

    cmd.arg(output);
    cmd
}

/// Convert a dBFS level to a linear amplitude factor.
fn db_to_linear(db: f64) -> f64 {
    10f64.powf(db / 20.0)
}

/// The mastering filter chain: normalize, then compress, then limit,
/// then apply the output gain so a manual adjustment is never undone
/// by the stages before it.
fn master_filter(parameters: &MasteringParameters) -> String {
    let mut stages = Vec::new();

    stages.push(format!(
        "loudnorm=I={}:TP={}:LRA={}",
        parameters.target_lufs, LOUDNORM_TRUE_PEAK_DB, LOUDNORM_RANGE_LU
    ));

    if parameters.apply_compression {
        stages.push(format!(
            "acompressor=threshold={:.6}:ratio={}:attack={}:release={}",
            db_to_linear(COMPRESSOR_THRESHOLD_DB),
            COMPRESSOR_RATIO,
            COMPRESSOR_ATTACK_MS,
            COMPRESSOR_RELEASE_MS
        ));
    }

    if parameters.apply_limiter {
        stages.push(format!(
            "alimiter=limit={:.6}:level=false",
            db_to_linear(LIMITER_CEILING_DB)
        ));
    }

    if parameters.output_gain != 0.0 {
        stages.push(format!("volume={}dB", parameters.output_gain));
    }

    stages.join(",")
}

/// One silence stretch reported by the detection pass, in seconds.
/// Silence still running at end of stream has no reported end.
#[derive(Debug, Clone, Copy, PartialEq)]
struct SilenceSpan {
    start: f64,
    end: Option<f64>,
}

/// Parse silencedetect stderr output into silence spans.
///
/// The filter logs `silence_start: 1.23` when the level drops below the
/// threshold and `silence_end: 4.56 | silence_duration: 3.33` once it
/// comes back; the last span stays open when the file ends silent.
fn parse_silence_report(report: &str) -> Vec<SilenceSpan> {
    let mut spans = Vec::new();
    for line in report.lines() {
        if let Some(start) = field_after(line, "silence_start:") {
            spans.push(SilenceSpan { start, end: None });
        } else if let Some(end) = field_after(line, "silence_end:") {
            if let Some(open) = spans.last_mut().filter(|span| span.end.is_none()) {
                open.end = Some(end);
            }
        }
    }
    spans
}

/// The first number following `marker` on the line, if any.
fn field_after(line: &str, marker: &str) -> Option<f64> {
    line.split(marker)
        .nth(1)?
        .split_whitespace()
        .next()?
        .parse()
        .ok()
}

/// Derive the keep range from the detected silence spans.
///
/// Only edge silence is cut: the range starts where leading silence ends
/// and ends where trailing silence starts, widened by the padding and
/// clamped to the file. Interior silence is left alone. Returns None when
/// neither edge has a qualifying silence, and when the whole file is one
/// silence span, so both cases come out unchanged in length.
fn trim_bounds(
    spans: &[SilenceSpan],
    duration_secs: f64,
    parameters: &TrimParameters,
) -> Option<(f64, f64)> {
    let minimum_secs = parameters.minimum_silence_ms as f64 / 1000.0;
    let padding_secs = parameters.padding_ms as f64 / 1000.0;

    let qualifying: Vec<(f64, f64)> = spans
        .iter()
        .map(|span| (span.start, span.end.unwrap_or(duration_secs)))
        .filter(|(start, end)| end - start + ENDPOINT_SLACK_SECS >= minimum_secs)
        .collect();

    let leading = qualifying
        .first()
        .copied()
        .filter(|(start, _)| *start <= LEADING_EDGE_SECS);
    let trailing = qualifying
        .last()
        .copied()
        .filter(|(_, end)| *end >= duration_secs - TRAILING_EDGE_SECS);

    if leading.is_none() && trailing.is_none() {
        return None;
    }

    let start = leading.map_or(0.0, |(_, end)| (end - padding_secs).max(0.0));
    let end = trailing.map_or(duration_secs, |(start, _)| {
        (start + padding_secs).min(duration_secs)
    });

    if end <= start {
        return None;
    }

    Some((start, end))
}

/// The speed/pitch filter.
///
/// Pitch is shifted by resampling the stream at `rate * 2^(semitones/12)`
/// and the resulting tempo change is folded into the atempo chain, so
/// speed and pitch stay independent. Returns an empty string when both
/// are neutral.
fn modify_filter(parameters: &ModifyParameters, sample_rate_hz: u32) -> String {
    let pitch_factor = 2f64.powf(parameters.pitch_semitones / 12.0);
    let tempo_ratio = parameters.speed / pitch_factor;

    let mut stages = Vec::new();

    if parameters.pitch_semitones != 0.0 {
        let shifted = (sample_rate_hz as f64 * pitch_factor).round() as u32;
        stages.push(format!("asetrate={}", shifted));
    }

    if (tempo_ratio - 1.0).abs() > f64::EPSILON {
        for link in atempo_chain(tempo_ratio) {
            stages.push(format!("atempo={}", link));
        }
    }

    if parameters.pitch_semitones != 0.0 {
        stages.push(format!("aresample={}", sample_rate_hz));
    }

    stages.join(",")
}

/// Split a tempo ratio into factors the atempo filter accepts.
///
/// Each atempo instance only takes ratios in [0.5, 2.0]; out-of-range
/// ratios are reached by chaining instances whose product is the ratio.
fn atempo_chain(ratio: f64) -> Vec<f64> {
    let mut links = Vec::new();
    let mut rest = ratio;
    while rest > 2.0 {
        links.push(2.0);
        rest /= 2.0;
    }
    while rest < 0.5 {
        links.push(0.5);
        rest /= 0.5;
    }
    links.push(rest);
    links
}
