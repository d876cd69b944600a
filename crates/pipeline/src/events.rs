//! Progress events and the channel they travel over.
//!
//! The pipeline reports progress through an explicit channel rather than
//! callbacks: the runner owns an [`EventEmitter`], listeners drain the
//! matching receiver. Each event serializes to a single JSON object with
//! an `event` tag, so a consumer can stream them as NDJSON.

use crate::job::JobStatus;
use crate::suggest::AnalysisResult;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::mpsc;

/// What a dispatched task is doing, from a listener's point of view.
///
/// Analysis work is tagged distinctly so conversion-progress handling
/// can filter it out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPhase {
    /// The file is being processed by the encoder.
    Processing,
    /// The file is being probed for analysis.
    Analyzing,
}

impl std::fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskPhase::Processing => write!(f, "processing"),
            TaskPhase::Analyzing => write!(f, "analyzing"),
        }
    }
}

/// An event emitted while a job runs.
///
/// `Progress` is emitted once per task at dispatch, in strictly increasing
/// index order; `index` is 1-based for display, `total` is the task count.
/// Exactly one `Complete` ends every job; its `outputs` align with the
/// payload's `files`, with `null` marking a failed file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// A task was dispatched.
    Progress {
        status: TaskPhase,
        index: usize,
        total: usize,
        file: PathBuf,
    },
    /// A file finished analysis; carries the analysis payload inline.
    Analysis {
        index: usize,
        total: usize,
        file: PathBuf,
        #[serde(flatten)]
        report: AnalysisResult,
    },
    /// The job reached a terminal state.
    Complete {
        status: JobStatus,
        message: String,
        outputs: Vec<Option<PathBuf>>,
    },
}

/// Sending half of the event channel.
pub type EventSender = mpsc::UnboundedSender<PipelineEvent>;
/// Receiving half of the event channel.
pub type EventReceiver = mpsc::UnboundedReceiver<PipelineEvent>;

/// Creates the channel a job's events travel over.
pub fn create_event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Handle the runner emits events through.
///
/// Cloneable; a single underlying channel keeps emissions in order. A
/// dropped receiver silently discards further events so an unobserved
/// job still runs to completion.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    tx: Option<EventSender>,
}

impl EventEmitter {
    /// Emitter that sends events into the given channel.
    pub fn new(tx: EventSender) -> Self {
        Self { tx: Some(tx) }
    }

    /// Emitter that discards every event.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Emit one event. Never fails; events to a closed channel are dropped.
    pub fn emit(&self, event: PipelineEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suggest::ContentKind;
    use serde_json::json;

    #[test]
    fn test_progress_event_wire_shape() {
        let event = PipelineEvent::Progress {
            status: TaskPhase::Processing,
            index: 1,
            total: 2,
            file: PathBuf::from("/in/a.mp3"),
        };

        let value = serde_json::to_value(&event).expect("serializes");
        assert_eq!(
            value,
            json!({
                "event": "progress",
                "status": "processing",
                "index": 1,
                "total": 2,
                "file": "/in/a.mp3"
            })
        );
    }

    #[test]
    fn test_analysis_event_wire_shape() {
        let event = PipelineEvent::Analysis {
            index: 1,
            total: 1,
            file: PathBuf::from("/in/episode.mp3"),
            report: AnalysisResult {
                bitrate: 96_000,
                channels: 2,
                sample_rate: 44_100,
                codec: "mp3".to_string(),
                suggestion: ContentKind::Podcast,
            },
        };

        let value = serde_json::to_value(&event).expect("serializes");
        assert_eq!(
            value,
            json!({
                "event": "analysis",
                "index": 1,
                "total": 1,
                "file": "/in/episode.mp3",
                "bitrate": 96_000,
                "channels": 2,
                "sample_rate": 44_100,
                "codec": "mp3",
                "suggestion": "Podcast"
            })
        );
    }

    #[test]
    fn test_complete_event_marks_failures_null() {
        let event = PipelineEvent::Complete {
            status: JobStatus::Error,
            message: "1 of 2 files failed".to_string(),
            outputs: vec![None, Some(PathBuf::from("/out/b.flac"))],
        };

        let value = serde_json::to_value(&event).expect("serializes");
        assert_eq!(
            value,
            json!({
                "event": "complete",
                "status": "error",
                "message": "1 of 2 files failed",
                "outputs": [null, "/out/b.flac"]
            })
        );
    }

    #[test]
    fn test_progress_event_round_trip() {
        let event = PipelineEvent::Progress {
            status: TaskPhase::Analyzing,
            index: 3,
            total: 7,
            file: PathBuf::from("/in/take.wav"),
        };

        let json = serde_json::to_string(&event).expect("serializes");
        let back: PipelineEvent = serde_json::from_str(&json).expect("deserializes");
        assert_eq!(event, back);
    }

    #[test]
    fn test_task_phase_display() {
        assert_eq!(format!("{}", TaskPhase::Processing), "processing");
        assert_eq!(format!("{}", TaskPhase::Analyzing), "analyzing");
    }

    #[tokio::test]
    async fn test_emitter_delivers_in_order() {
        let (tx, mut rx) = create_event_channel();
        let emitter = EventEmitter::new(tx);

        for index in 1..=3 {
            emitter.emit(PipelineEvent::Progress {
                status: TaskPhase::Processing,
                index,
                total: 3,
                file: PathBuf::from(format!("/in/{}.mp3", index)),
            });
        }
        drop(emitter);

        let mut seen = Vec::new();
        while let Some(event) = rx.recv().await {
            if let PipelineEvent::Progress { index, .. } = event {
                seen.push(index);
            }
        }
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_emitter_survives_dropped_receiver() {
        let (tx, rx) = create_event_channel();
        let emitter = EventEmitter::new(tx);
        drop(rx);

        // Must not panic or error
        emitter.emit(PipelineEvent::Complete {
            status: JobStatus::Success,
            message: "done".to_string(),
            outputs: vec![],
        });
    }

    #[test]
    fn test_disabled_emitter_discards() {
        let emitter = EventEmitter::disabled();
        emitter.emit(PipelineEvent::Complete {
            status: JobStatus::Success,
            message: "done".to_string(),
            outputs: vec![],
        });
    }
}
