//! Mastering preset table.
//!
//! Pure lookup from preset name to mastering parameters. Unknown names
//! are a configuration error; there is no silent fallback.

use crate::job::MasteringParameters;
use thiserror::Error;

/// Error type for preset resolution.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PresetError {
    /// The requested preset name is not in the table.
    #[error("Unknown mastering preset: '{0}'")]
    UnknownPreset(String),
}

/// Names of the built-in mastering presets, in display order.
pub const PRESET_NAMES: &[&str] = &["Music", "Podcast", "Voice-over"];

/// Resolve a preset name to its mastering parameters.
///
/// Names are matched exactly; every preset enables both the compressor
/// and the limiter and differs in loudness target and output gain.
pub fn resolve_preset(name: &str) -> Result<MasteringParameters, PresetError> {
    match name {
        "Music" => Ok(MasteringParameters {
            target_lufs: -12.0,
            apply_compression: true,
            apply_limiter: true,
            output_gain: 0.0,
        }),
        "Podcast" => Ok(MasteringParameters {
            target_lufs: -16.0,
            apply_compression: true,
            apply_limiter: true,
            output_gain: 1.5,
        }),
        "Voice-over" => Ok(MasteringParameters {
            target_lufs: -18.0,
            apply_compression: true,
            apply_limiter: true,
            output_gain: 0.5,
        }),
        other => Err(PresetError::UnknownPreset(other.to_string())),
    }
}
