//! Content classification for mastering preset suggestions.
//!
//! Inspects probed audio facts (channel count, sample rate, bitrate) and
//! deterministically suggests one of the built-in mastering presets.
//! Anything that does not look like voice or compressed speech is treated
//! as music, so ambiguous files resolve to the Music preset.

use crate::presets;
use crate::probe::AudioFacts;
use serde::{Deserialize, Serialize};

/// Kind of audio content, named after the preset it maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentKind {
    /// Full-range music; stereo with a healthy bitrate.
    #[serde(rename = "Music")]
    Music,
    /// Compressed stereo speech, typical of published episodes.
    #[serde(rename = "Podcast")]
    Podcast,
    /// Narrow-band or mono voice takes.
    #[serde(rename = "Voice-over")]
    VoiceOver,
}

impl ContentKind {
    /// The mastering preset name this content kind maps to.
    pub fn preset_name(&self) -> &'static str {
        match self {
            ContentKind::Music => "Music",
            ContentKind::Podcast => "Podcast",
            ContentKind::VoiceOver => "Voice-over",
        }
    }
}

impl Default for ContentKind {
    fn default() -> Self {
        Self::Music
    }
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.preset_name())
    }
}

/// Sample rates at or below this are treated as voice recordings.
/// Voice workflows commonly record at 16 or 22.05 kHz; music and
/// podcast masters sit at 44.1 kHz or above.
const VOICE_SAMPLE_RATE_CEILING_HZ: u32 = 24_000;

/// Bitrate floor for full-range music in bits per second.
/// Stereo speech is usually published well below this (64-128 kbps),
/// while stereo music encodes at 160 kbps and up.
const MUSIC_BITRATE_FLOOR_BPS: u64 = 160_000;

/// Suggests a mastering preset for the probed audio facts.
///
/// Decision rules, first match wins:
/// 1. Narrow-band sample rate -> Voice-over
/// 2. Mono -> Voice-over
/// 3. Bitrate below the music floor -> Podcast
/// 4. Otherwise (including unknown bitrate) -> Music
pub fn suggest_preset(facts: &AudioFacts) -> ContentKind {
    if facts.sample_rate_hz > 0 && facts.sample_rate_hz <= VOICE_SAMPLE_RATE_CEILING_HZ {
        return ContentKind::VoiceOver;
    }

    if facts.channels == 1 {
        return ContentKind::VoiceOver;
    }

    if facts.bitrate_bps > 0 && facts.bitrate_bps < MUSIC_BITRATE_FLOOR_BPS {
        return ContentKind::Podcast;
    }

    ContentKind::Music
}

/// Result of analyzing a single audio file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisResult {
    /// Bitrate in bits per second.
    pub bitrate: u64,
    /// Number of audio channels.
    pub channels: u32,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Codec name reported by the prober.
    pub codec: String,
    /// Suggested mastering preset for this content.
    pub suggestion: ContentKind,
}

/// Builds an analysis result from probed facts, attaching a preset suggestion.
pub fn analyze(facts: &AudioFacts) -> AnalysisResult {
    AnalysisResult {
        bitrate: facts.bitrate_bps,
        channels: facts.channels,
        sample_rate: facts.sample_rate_hz,
        codec: facts.codec_name.clone(),
        suggestion: suggest_preset(facts),
    }
}
