//! Job scheduling and execution.
//!
//! Drives a validated job to completion: a semaphore caps how many files
//! are processed at once, tasks are dispatched strictly in payload order,
//! each one runs the blocking tool call on a worker thread, and progress
//! flows through the event channel. One task's failure never touches the
//! others; the job completes with a per-file account either way.

use crate::config::Config;
use crate::events::{EventEmitter, PipelineEvent};
use crate::expand::{expand_job, OperationPlan, ValidateError};
use crate::invoke::{FfmpegTool, InvokeError, ToolBackend};
use crate::job::{JobReport, JobRequest, JobStatus};
use crate::suggest::analyze;
use crate::task::{Task, TaskStatus};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{info, warn};

/// Error type for job submission.
///
/// Either variant means the job was rejected before any file was touched
/// and no events were emitted.
#[derive(Debug, Error)]
pub enum SubmitError {
    /// The payload failed validation.
    #[error(transparent)]
    Invalid(#[from] ValidateError),

    /// A required external tool is unavailable.
    #[error("{0}")]
    ToolUnavailable(InvokeError),
}

/// Executes jobs against a processing tool backend.
pub struct JobRunner {
    backend: Arc<dyn ToolBackend>,
    config: Config,
}

impl JobRunner {
    /// Create a runner backed by ffmpeg/ffprobe from the configuration.
    pub fn new(config: Config) -> Self {
        let backend = Arc::new(FfmpegTool::from_config(&config));
        Self { backend, config }
    }

    /// Create a runner with a custom backend.
    pub fn with_backend(config: Config, backend: Arc<dyn ToolBackend>) -> Self {
        Self { backend, config }
    }

    /// Validate, expand and execute one job.
    ///
    /// Validation and the tool preflight happen before anything is
    /// dispatched; a failure there rejects the whole job with no events.
    /// Once dispatch starts, the job always runs to a terminal report and
    /// exactly one `Complete` event.
    ///
    /// # Errors
    /// Returns an error if the payload is invalid or a required tool is
    /// missing. Per-file processing failures are not errors; they are
    /// reported in the returned [`JobReport`].
    pub async fn run(
        &self,
        request: &JobRequest,
        emitter: &EventEmitter,
    ) -> Result<JobReport, SubmitError> {
        let plan = expand_job(request, &self.config)?;

        let preflight = {
            let backend = Arc::clone(&self.backend);
            tokio::task::spawn_blocking(move || backend.preflight()).await
        };
        match preflight {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(SubmitError::ToolUnavailable(e)),
            Err(e) => {
                return Err(SubmitError::ToolUnavailable(InvokeError::Io(
                    std::io::Error::new(
                        std::io::ErrorKind::Other,
                        format!("preflight task failed: {}", e),
                    ),
                )))
            }
        }

        let total = plan.tasks.len();
        let phase = plan.operation.phase();
        let semaphore = Arc::new(Semaphore::new(plan.concurrency));

        info!(
            job_id = %plan.job_id,
            operation = %plan.operation.operation(),
            files = total,
            concurrency = plan.concurrency,
            "job started"
        );

        let mut handles = Vec::with_capacity(total);
        for task in plan.tasks {
            // Wait for capacity before announcing the task so dispatch
            // order and progress order both follow the payload order.
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("semaphore should not be closed");

            emitter.emit(PipelineEvent::Progress {
                status: phase,
                index: task.index + 1,
                total,
                file: task.input.clone(),
            });

            let backend = Arc::clone(&self.backend);
            let operation = plan.operation.clone();
            let task_emitter = emitter.clone();
            let fallback = task.clone();
            let handle = tokio::spawn(async move {
                let _permit = permit;
                let mut task = task;
                run_task(backend, &operation, &task_emitter, total, &mut task).await;
                task
            });
            handles.push((handle, fallback));
        }

        let mut completed: Vec<Task> = Vec::with_capacity(total);
        for (handle, fallback) in handles {
            match handle.await {
                Ok(task) => completed.push(task),
                Err(e) => {
                    let mut task = fallback;
                    task.start();
                    task.fail(&format!("task panicked: {}", e));
                    completed.push(task);
                }
            }
        }
        completed.sort_by_key(|task| task.index);

        let outputs: Vec<_> = completed.iter().map(|task| task.reported_output()).collect();
        let failed = completed
            .iter()
            .filter(|task| task.status == TaskStatus::Failed)
            .count();
        let status = if failed == 0 {
            JobStatus::Success
        } else {
            JobStatus::Error
        };
        let message = build_message(&plan.operation, &completed, &plan.output_dir, failed);

        if failed == 0 {
            info!(job_id = %plan.job_id, files = total, "job finished");
        } else {
            warn!(job_id = %plan.job_id, failed, total, "job finished with failures");
        }

        emitter.emit(PipelineEvent::Complete {
            status,
            message: message.clone(),
            outputs: outputs.clone(),
        });

        Ok(JobReport {
            job_id: plan.job_id,
            status,
            message,
            outputs,
            tasks: completed,
        })
    }
}

/// Run one task to its terminal state, emitting any per-file events.
async fn run_task(
    backend: Arc<dyn ToolBackend>,
    operation: &OperationPlan,
    emitter: &EventEmitter,
    total: usize,
    task: &mut Task,
) {
    task.start();

    match operation {
        OperationPlan::Analyze => {
            let probe_backend = Arc::clone(&backend);
            let input = task.input.clone();
            let outcome = tokio::task::spawn_blocking(move || probe_backend.probe(&input)).await;
            match outcome {
                Ok(Ok(facts)) => {
                    let report = analyze(&facts);
                    emitter.emit(PipelineEvent::Analysis {
                        index: task.index + 1,
                        total,
                        file: task.input.clone(),
                        report,
                    });
                    // Analysis leaves the file untouched; the input path
                    // doubles as the reported output.
                    task.output = Some(task.input.clone());
                    task.succeed();
                }
                Ok(Err(e)) => {
                    warn!(file = %task.input.display(), error = %e, "analysis failed");
                    task.fail(&e.to_string());
                }
                Err(e) => {
                    task.fail(&format!("analysis task panicked: {}", e));
                }
            }
        }
        _ => {
            let Some(output) = task.output.clone() else {
                task.fail("no output path was planned for this file");
                return;
            };
            let process_backend = Arc::clone(&backend);
            let input = task.input.clone();
            let op = operation.clone();
            let outcome =
                tokio::task::spawn_blocking(move || process_backend.process(&input, &output, &op))
                    .await;
            match outcome {
                Ok(Ok(())) => {
                    info!(file = %task.input.display(), "file processed");
                    task.succeed();
                }
                Ok(Err(e)) => {
                    warn!(file = %task.input.display(), error = %e, "processing failed");
                    task.fail(&e.to_string());
                }
                Err(e) => {
                    task.fail(&format!("processing task panicked: {}", e));
                }
            }
        }
    }
}

/// Summary line for the terminal report and `Complete` event.
fn build_message(
    operation: &OperationPlan,
    tasks: &[Task],
    output_dir: &Path,
    failed: usize,
) -> String {
    let total = tasks.len();
    if failed > 0 {
        return format!("{} of {} files failed", failed, total);
    }

    let single_output = || {
        tasks
            .first()
            .and_then(|task| task.output.clone())
            .map(|path| path.display().to_string())
            .unwrap_or_default()
    };
    // Mastering and analysis messages name the bare file, not its path
    let single_output_name = || {
        tasks
            .first()
            .and_then(|task| task.output.as_deref())
            .and_then(|path| path.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    };
    let single_input_name = || {
        tasks
            .first()
            .and_then(|task| task.input.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    };

    match operation {
        OperationPlan::Convert { .. } => {
            if total == 1 {
                format!("Saved file to {}", single_output())
            } else {
                format!("Converted {} files into {}", total, output_dir.display())
            }
        }
        OperationPlan::Master { preset_name, .. } => match (total, preset_name) {
            (1, Some(preset)) => format!(
                "'{}' mastered successfully using the '{}' preset.",
                single_output_name(),
                preset
            ),
            (1, None) => format!("'{}' mastered successfully.", single_output_name()),
            (n, Some(preset)) => {
                format!("{} files mastered successfully using the '{}' preset.", n, preset)
            }
            (n, None) => format!("{} files mastered successfully.", n),
        },
        OperationPlan::Trim { .. } => {
            if total == 1 {
                format!("Saved trimmed file to {}", single_output())
            } else {
                format!("Trimmed silence from {} files into {}", total, output_dir.display())
            }
        }
        OperationPlan::Modify { .. } => {
            if total == 1 {
                format!("Saved modified file to {}", single_output())
            } else {
                format!("Modified {} files into {}", total, output_dir.display())
            }
        }
        OperationPlan::Analyze => {
            if total == 1 {
                format!("Analyzed '{}'", single_input_name())
            } else {
                format!("Analyzed {} files", total)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{create_event_channel, EventReceiver, TaskPhase};
    use crate::job::{AudioFormat, Operation};
    use crate::probe::{AudioFacts, ProbeError};
    use crate::suggest::ContentKind;
    use std::collections::HashSet;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    /// Backend double that records concurrency and fails chosen inputs.
    struct MockBackend {
        delay: Duration,
        fail: HashSet<PathBuf>,
        tool_missing: bool,
        active: AtomicUsize,
        max_active: AtomicUsize,
        processed: AtomicUsize,
    }

    impl MockBackend {
        fn new() -> Self {
            Self {
                delay: Duration::from_millis(0),
                fail: HashSet::new(),
                tool_missing: false,
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
                processed: AtomicUsize::new(0),
            }
        }

        fn with_delay(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::new()
            }
        }

        fn failing_on(inputs: &[&str]) -> Self {
            Self {
                fail: inputs.iter().map(PathBuf::from).collect(),
                ..Self::new()
            }
        }

        fn enter(&self) {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
        }

        fn leave(&self) {
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.processed.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl ToolBackend for MockBackend {
        fn preflight(&self) -> Result<(), InvokeError> {
            if self.tool_missing {
                Err(InvokeError::ToolMissing("ffmpeg".to_string()))
            } else {
                Ok(())
            }
        }

        fn process(
            &self,
            input: &Path,
            _output: &Path,
            _op: &OperationPlan,
        ) -> Result<(), InvokeError> {
            self.enter();
            std::thread::sleep(self.delay);
            let result = if self.fail.contains(input) {
                Err(InvokeError::ExitStatus {
                    code: 1,
                    detail: "conversion failed!".to_string(),
                })
            } else {
                Ok(())
            };
            self.leave();
            result
        }

        fn probe(&self, path: &Path) -> Result<AudioFacts, ProbeError> {
            self.enter();
            std::thread::sleep(self.delay);
            let result = if self.fail.contains(path) {
                Err(ProbeError::NoAudioStream(path.display().to_string()))
            } else {
                Ok(AudioFacts {
                    codec_name: "mp3".to_string(),
                    channels: 2,
                    sample_rate_hz: 44_100,
                    bitrate_bps: 192_000,
                    duration_secs: 180.0,
                })
            };
            self.leave();
            result
        }
    }

    fn make_request(files: &[&str], output: &Path, operation: Operation) -> JobRequest {
        JobRequest {
            files: files.iter().map(PathBuf::from).collect(),
            output: output.to_path_buf(),
            operation,
            concurrent_files: None,
            format: Some(AudioFormat::Flac),
            preset: None,
            parameters: None,
            suffix: None,
            overwrite_existing: true,
            silence_threshold: None,
            minimum_silence_ms: None,
            padding_ms: None,
            speed: None,
            pitch_semitones: None,
            cut_start: None,
            cut_end: None,
        }
    }

    fn make_runner(backend: MockBackend) -> (Arc<MockBackend>, JobRunner) {
        let backend = Arc::new(backend);
        let runner = JobRunner::with_backend(Config::default(), backend.clone());
        (backend, runner)
    }

    fn drain(mut rx: EventReceiver) -> Vec<PipelineEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_convert_job_event_sequence() {
        let temp = TempDir::new().unwrap();
        let (_backend, runner) = make_runner(MockBackend::new());
        let (tx, rx) = create_event_channel();
        let emitter = EventEmitter::new(tx);

        let request = make_request(&["/in/a.mp3", "/in/b.mp3"], temp.path(), Operation::Convert);
        let report = runner.run(&request, &emitter).await.expect("job accepted");

        assert_eq!(report.status, JobStatus::Success);
        assert_eq!(report.outputs.len(), 2);
        assert!(report.outputs.iter().all(|o| o.is_some()));

        let events = drain(rx);
        assert_eq!(events.len(), 3);
        match &events[0] {
            PipelineEvent::Progress {
                status,
                index,
                total,
                file,
            } => {
                assert_eq!(*status, TaskPhase::Processing);
                assert_eq!(*index, 1);
                assert_eq!(*total, 2);
                assert_eq!(file, &PathBuf::from("/in/a.mp3"));
            }
            other => panic!("Expected first progress event, got {:?}", other),
        }
        match &events[1] {
            PipelineEvent::Progress { index, .. } => assert_eq!(*index, 2),
            other => panic!("Expected second progress event, got {:?}", other),
        }
        match &events[2] {
            PipelineEvent::Complete {
                status, outputs, ..
            } => {
                assert_eq!(*status, JobStatus::Success);
                assert_eq!(outputs, &report.outputs);
            }
            other => panic!("Expected complete event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failed_file_does_not_stop_the_rest() {
        let temp = TempDir::new().unwrap();
        let (backend, runner) = make_runner(MockBackend::failing_on(&["/in/b.mp3"]));
        let (tx, rx) = create_event_channel();
        let emitter = EventEmitter::new(tx);

        let request = make_request(
            &["/in/a.mp3", "/in/b.mp3", "/in/c.mp3"],
            temp.path(),
            Operation::Convert,
        );
        let report = runner.run(&request, &emitter).await.expect("job accepted");

        assert_eq!(report.status, JobStatus::Error);
        assert_eq!(report.message, "1 of 3 files failed");
        assert!(report.outputs[0].is_some());
        assert!(report.outputs[1].is_none());
        assert!(report.outputs[2].is_some());
        assert_eq!(report.failed_count(), 1);
        assert_eq!(backend.processed.load(Ordering::SeqCst), 3);

        let failed_task = &report.tasks[1];
        assert_eq!(failed_task.status, TaskStatus::Failed);
        assert!(failed_task
            .error
            .as_deref()
            .unwrap_or_default()
            .contains("conversion failed!"));

        // Exactly one complete event, still emitted on partial failure
        let completes = drain(rx)
            .into_iter()
            .filter(|e| matches!(e, PipelineEvent::Complete { .. }))
            .count();
        assert_eq!(completes, 1);
    }

    #[tokio::test]
    async fn test_concurrency_stays_within_limit() {
        let temp = TempDir::new().unwrap();
        let (backend, runner) = make_runner(MockBackend::with_delay(Duration::from_millis(50)));
        let emitter = EventEmitter::disabled();

        let files: Vec<String> = (0..8).map(|i| format!("/in/file{}.mp3", i)).collect();
        let refs: Vec<&str> = files.iter().map(|s| s.as_str()).collect();
        let mut request = make_request(&refs, temp.path(), Operation::Convert);
        request.concurrent_files = Some(3);

        let report = runner.run(&request, &emitter).await.expect("job accepted");

        assert_eq!(report.status, JobStatus::Success);
        assert_eq!(backend.processed.load(Ordering::SeqCst), 8);
        let peak = backend.max_active.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak concurrency {} exceeded the limit", peak);
    }

    #[tokio::test]
    async fn test_progress_follows_payload_order() {
        let temp = TempDir::new().unwrap();
        let (_backend, runner) = make_runner(MockBackend::with_delay(Duration::from_millis(10)));
        let (tx, rx) = create_event_channel();
        let emitter = EventEmitter::new(tx);

        let files: Vec<String> = (0..8).map(|i| format!("/in/file{}.mp3", i)).collect();
        let refs: Vec<&str> = files.iter().map(|s| s.as_str()).collect();
        let mut request = make_request(&refs, temp.path(), Operation::Convert);
        request.concurrent_files = Some(3);

        runner.run(&request, &emitter).await.expect("job accepted");

        let indices: Vec<usize> = drain(rx)
            .into_iter()
            .filter_map(|event| match event {
                PipelineEvent::Progress { index, .. } => Some(index),
                _ => None,
            })
            .collect();
        assert_eq!(indices, (1..=8).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_missing_tool_rejects_without_events() {
        let temp = TempDir::new().unwrap();
        let backend = MockBackend {
            tool_missing: true,
            ..MockBackend::new()
        };
        let (backend, runner) = make_runner(backend);
        let (tx, rx) = create_event_channel();
        let emitter = EventEmitter::new(tx);

        let request = make_request(&["/in/a.mp3"], temp.path(), Operation::Convert);
        let err = runner.run(&request, &emitter).await.expect_err("tool missing");

        assert!(matches!(err, SubmitError::ToolUnavailable(_)));
        assert_eq!(backend.processed.load(Ordering::SeqCst), 0);
        assert!(drain(rx).is_empty());
    }

    #[tokio::test]
    async fn test_invalid_payload_rejects_without_events() {
        let temp = TempDir::new().unwrap();
        let (backend, runner) = make_runner(MockBackend::new());
        let (tx, rx) = create_event_channel();
        let emitter = EventEmitter::new(tx);

        let request = make_request(&[], temp.path(), Operation::Convert);
        let err = runner.run(&request, &emitter).await.expect_err("no files");

        assert!(matches!(
            err,
            SubmitError::Invalid(ValidateError::NoFiles)
        ));
        assert_eq!(backend.processed.load(Ordering::SeqCst), 0);
        assert!(drain(rx).is_empty());
    }

    #[tokio::test]
    async fn test_analyze_reports_and_reuses_inputs() {
        let temp = TempDir::new().unwrap();
        let (_backend, runner) = make_runner(MockBackend::new());
        let (tx, rx) = create_event_channel();
        let emitter = EventEmitter::new(tx);

        let request = make_request(&["/in/a.mp3", "/in/b.mp3"], temp.path(), Operation::Analyze);
        let report = runner.run(&request, &emitter).await.expect("job accepted");

        assert_eq!(report.status, JobStatus::Success);
        assert_eq!(report.message, "Analyzed 2 files");
        assert_eq!(report.outputs[0], Some(PathBuf::from("/in/a.mp3")));
        assert_eq!(report.outputs[1], Some(PathBuf::from("/in/b.mp3")));

        // Analysis events come from concurrent tasks, so only their set is
        // deterministic, not their position between progress events.
        let events = drain(rx);
        let mut analyses: Vec<_> = events
            .iter()
            .filter_map(|event| match event {
                PipelineEvent::Analysis { index, report, .. } => {
                    Some((*index, report.suggestion, report.sample_rate))
                }
                _ => None,
            })
            .collect();
        analyses.sort_by_key(|(index, _, _)| *index);
        assert_eq!(
            analyses,
            vec![
                (1, ContentKind::Music, 44_100),
                (2, ContentKind::Music, 44_100)
            ]
        );

        let phases: Vec<_> = events
            .iter()
            .filter_map(|event| match event {
                PipelineEvent::Progress { status, .. } => Some(*status),
                _ => None,
            })
            .collect();
        assert_eq!(phases, vec![TaskPhase::Analyzing, TaskPhase::Analyzing]);
    }

    #[tokio::test]
    async fn test_analyze_failure_marks_task() {
        let temp = TempDir::new().unwrap();
        let (_backend, runner) = make_runner(MockBackend::failing_on(&["/in/broken.mp3"]));
        let emitter = EventEmitter::disabled();

        let request = make_request(
            &["/in/a.mp3", "/in/broken.mp3"],
            temp.path(),
            Operation::Analyze,
        );
        let report = runner.run(&request, &emitter).await.expect("job accepted");

        assert_eq!(report.status, JobStatus::Error);
        assert_eq!(report.message, "1 of 2 files failed");
        assert!(report.outputs[0].is_some());
        assert!(report.outputs[1].is_none());
    }

    #[tokio::test]
    async fn test_single_file_messages() {
        let temp = TempDir::new().unwrap();
        let (_backend, runner) = make_runner(MockBackend::new());
        let emitter = EventEmitter::disabled();

        let request = make_request(&["/in/a.mp3"], temp.path(), Operation::Convert);
        let report = runner.run(&request, &emitter).await.expect("job accepted");
        let expected = format!("Saved file to {}", temp.path().join("a.flac").display());
        assert_eq!(report.message, expected);

        let mut request = make_request(&["/in/a.mp3"], temp.path(), Operation::Master);
        request.format = None;
        request.preset = Some("Music".to_string());
        let report = runner.run(&request, &emitter).await.expect("job accepted");
        assert_eq!(
            report.message,
            "'a_mastered.mp3' mastered successfully using the 'Music' preset."
        );
    }

    #[tokio::test]
    async fn test_multi_file_master_message() {
        let temp = TempDir::new().unwrap();
        let (_backend, runner) = make_runner(MockBackend::new());
        let emitter = EventEmitter::disabled();

        let mut request =
            make_request(&["/in/a.mp3", "/in/b.mp3"], temp.path(), Operation::Master);
        request.format = None;
        request.preset = Some("Podcast".to_string());

        let report = runner.run(&request, &emitter).await.expect("job accepted");
        assert_eq!(
            report.message,
            "2 files mastered successfully using the 'Podcast' preset."
        );
    }

    #[tokio::test]
    async fn test_report_tasks_match_payload_order() {
        let temp = TempDir::new().unwrap();
        let (_backend, runner) = make_runner(MockBackend::with_delay(Duration::from_millis(5)));
        let emitter = EventEmitter::disabled();

        let files: Vec<String> = (0..6).map(|i| format!("/in/file{}.mp3", i)).collect();
        let refs: Vec<&str> = files.iter().map(|s| s.as_str()).collect();
        let mut request = make_request(&refs, temp.path(), Operation::Convert);
        request.concurrent_files = Some(4);

        let report = runner.run(&request, &emitter).await.expect("job accepted");

        for (i, task) in report.tasks.iter().enumerate() {
            assert_eq!(task.index, i);
            assert_eq!(task.input, PathBuf::from(format!("/in/file{}.mp3", i)));
        }
    }
}
