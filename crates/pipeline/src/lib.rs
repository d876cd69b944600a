//! Soundbatch
//!
//! Batch audio processing pipeline: validates job payloads, fans the files
//! out to ffmpeg under a concurrency cap, and streams progress events.

pub mod events;
pub mod expand;
pub mod invoke;
pub mod job;
pub mod presets;
pub mod probe;
pub mod scheduler;
pub mod suggest;
pub mod task;

pub use soundbatch_config as config;
pub use soundbatch_config::Config;

pub use events::{
    create_event_channel, EventEmitter, EventReceiver, EventSender, PipelineEvent, TaskPhase,
};
pub use expand::{
    expand_job, resolve_concurrency, CutRange, JobPlan, ModifyParameters, OperationPlan,
    TrimParameters, ValidateError,
};
pub use invoke::{FfmpegTool, InvokeError, ToolBackend};
pub use job::{AudioFormat, JobReport, JobRequest, JobStatus, MasteringParameters, Operation};
pub use presets::{resolve_preset, PresetError, PRESET_NAMES};
pub use probe::{probe_file, AudioFacts, ProbeError};
pub use scheduler::{JobRunner, SubmitError};
pub use suggest::{analyze, suggest_preset, AnalysisResult, ContentKind};
pub use task::{Task, TaskStatus};
