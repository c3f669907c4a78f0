// ==============================================================================
// batch/mod.rs - Concurrent Batch Processor
// ==============================================================================
// Description: Priority-queued batch scheduler with bounded worker slots,
//              retries, timeouts, pause/resume, and cooperative cancellation
// Author: Matt Barham
// Created: 2026-02-20
// Modified: 2026-07-21
// Version: 1.2.0
// ==============================================================================

pub mod events;
pub mod stats;

pub use events::{BatchEvent, EventBus, EventListener};
pub use stats::{summarize_batch, BatchSummary};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Job priority; dequeue order is configurable, insertion-order stable
/// within a level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    Urgent,
    High,
    Normal,
    Low,
}

/// Per-job state machine:
/// pending -> queued -> parsing -> analyzing -> {complete|failed|cancelled}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Queued,
    Parsing,
    Analyzing,
    Complete,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Complete | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// Batch lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Running,
    Paused,
    Complete,
    Failed,
    Cancelled,
}

impl BatchStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchStatus::Complete | BatchStatus::Failed | BatchStatus::Cancelled
        )
    }
}

/// Statistics a job handler reports on success
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchJobResult {
    pub variant_count: usize,
    pub clinical_findings: usize,
    pub drug_responses: usize,
    pub trait_associations: usize,
}

/// One scheduled file-processing job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchJob {
    pub id: Uuid,
    pub batch_id: Uuid,
    /// File reference handed to the job handler
    pub file: String,
    pub status: JobStatus,
    pub priority: JobPriority,
    /// 0-100
    pub progress: f32,
    pub retry_count: u32,
    pub max_retries: u32,
    pub result: Option<BatchJobResult>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Scheduler configuration
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Maximum concurrently running jobs
    pub concurrency: usize,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub job_timeout: Duration,
    pub poll_interval: Duration,
    /// When false, the first terminally failed job cancels the whole batch
    pub continue_on_error: bool,
    pub priority_order: Vec<JobPriority>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_retries: 2,
            retry_delay: Duration::from_millis(500),
            job_timeout: Duration::from_secs(300),
            poll_interval: Duration::from_millis(50),
            continue_on_error: true,
            priority_order: vec![
                JobPriority::Urgent,
                JobPriority::High,
                JobPriority::Normal,
                JobPriority::Low,
            ],
        }
    }
}

/// Scheduler errors for explicit control operations
#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Unknown batch {0}")]
    UnknownBatch(Uuid),

    #[error("Unknown job {0}")]
    UnknownJob(Uuid),
}

pub type JobResultFuture =
    Pin<Box<dyn Future<Output = Result<BatchJobResult, anyhow::Error>> + Send>>;

/// The caller-supplied processing function. The scheduler is agnostic to
/// what it does internally (parse + match in the reference pipeline).
pub type JobHandler = Arc<dyn Fn(JobContext) -> JobResultFuture + Send + Sync>;

/// Wrap an async closure as a JobHandler
pub fn job_handler<F, Fut>(f: F) -> JobHandler
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<BatchJobResult, anyhow::Error>> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

/// Handle the job handler uses to report progress back to the scheduler
#[derive(Clone)]
pub struct ProgressHandle {
    state: Arc<Mutex<SchedulerState>>,
    events: Arc<EventBus>,
    job_id: Uuid,
    batch_id: Uuid,
}

impl ProgressHandle {
    /// Report progress (clamped to 0-100). Reaching 50% moves the job from
    /// parsing to analyzing; that transition is caller-driven.
    pub fn report(&self, progress: f32) {
        let progress = progress.clamp(0.0, 100.0);
        {
            let mut state = lock_poisoned(&self.state);
            if let Some(job) = state.jobs.get_mut(&self.job_id) {
                job.progress = progress;
                if progress >= 50.0 && job.status == JobStatus::Parsing {
                    job.status = JobStatus::Analyzing;
                }
            }
        }
        self.events.emit(&BatchEvent::JobProgress {
            batch_id: self.batch_id,
            job_id: self.job_id,
            progress,
        });
    }
}

/// Everything a job handler gets: a job snapshot, a progress handle, and the
/// cooperative cancellation signal
pub struct JobContext {
    pub job: BatchJob,
    progress: ProgressHandle,
    cancel: watch::Receiver<bool>,
}

impl JobContext {
    pub fn report_progress(&self, progress: f32) {
        self.progress.report(progress);
    }

    /// A cloneable handle for reporting progress from worker threads
    pub fn progress_handle(&self) -> ProgressHandle {
        self.progress.clone()
    }

    /// Whether cancellation has been requested for this job
    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// A receiver handlers can select on for prompt cancellation
    pub fn cancel_signal(&self) -> watch::Receiver<bool> {
        self.cancel.clone()
    }
}

struct RunningJob {
    cancel_tx: watch::Sender<bool>,
}

struct BatchMeta {
    status: BatchStatus,
    paused: bool,
    handler: JobHandler,
    durations: Vec<Duration>,
}

#[derive(Default)]
struct SchedulerState {
    jobs: HashMap<Uuid, BatchJob>,
    /// Pending job ids in insertion order
    queue: Vec<Uuid>,
    running: HashMap<Uuid, RunningJob>,
    batches: HashMap<Uuid, BatchMeta>,
}

fn lock_poisoned(state: &Arc<Mutex<SchedulerState>>) -> MutexGuard<'_, SchedulerState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

enum JobOutcome {
    Success(BatchJobResult),
    Error(String),
    Cancelled,
}

/// Await the cancellation flag flipping to true; pends forever if the sender
/// disappears without cancelling.
async fn wait_cancelled(mut rx: watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Bounded worker-slot batch scheduler. Construct explicitly and pass the
/// instance to collaborators; there is no process-wide default.
pub struct BatchProcessor {
    config: BatchConfig,
    state: Arc<Mutex<SchedulerState>>,
    events: Arc<EventBus>,
}

impl BatchProcessor {
    pub fn new(config: BatchConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(SchedulerState::default())),
            events: Arc::new(EventBus::new()),
        }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Register a lifecycle event listener
    pub fn subscribe(&self, listener: EventListener) {
        self.events.subscribe(listener);
    }

    /// Create a batch with one job per file and enqueue all of them
    pub fn submit_batch(
        &self,
        files: Vec<String>,
        priority: JobPriority,
        handler: JobHandler,
    ) -> Uuid {
        let batch_id = Uuid::new_v4();
        let job_count = files.len();

        {
            let mut state = lock_poisoned(&self.state);
            for file in files {
                let job = BatchJob {
                    id: Uuid::new_v4(),
                    batch_id,
                    file,
                    status: JobStatus::Pending,
                    priority,
                    progress: 0.0,
                    retry_count: 0,
                    max_retries: self.config.max_retries,
                    result: None,
                    error: None,
                    created_at: Utc::now(),
                    started_at: None,
                    completed_at: None,
                };
                state.queue.push(job.id);
                state.jobs.insert(job.id, job);
            }
            state.batches.insert(
                batch_id,
                BatchMeta {
                    status: BatchStatus::Running,
                    paused: false,
                    handler,
                    durations: Vec::new(),
                },
            );
        }

        info!("Submitted batch {} with {} job(s)", batch_id, job_count);
        self.events.emit(&BatchEvent::BatchStarted {
            batch_id,
            job_count,
        });
        batch_id
    }

    /// Drive the admission loop until every batch is terminal and no jobs
    /// remain queued or running
    pub async fn run_until_idle(&self) {
        let mut interval = tokio::time::interval(self.config.poll_interval);
        loop {
            interval.tick().await;
            self.admit_jobs();
            if self.detect_completed_batches() {
                break;
            }
        }
        info!("Scheduler idle, all batches terminal");
    }

    /// Suspend admission of new jobs; in-flight jobs keep running
    pub fn pause_batch(&self, batch_id: Uuid) -> Result<(), BatchError> {
        {
            let mut state = lock_poisoned(&self.state);
            let meta = state
                .batches
                .get_mut(&batch_id)
                .ok_or(BatchError::UnknownBatch(batch_id))?;
            meta.paused = true;
        }
        self.events.emit(&BatchEvent::BatchPaused { batch_id });
        Ok(())
    }

    /// Restart admission for a paused batch
    pub fn resume_batch(&self, batch_id: Uuid) -> Result<(), BatchError> {
        {
            let mut state = lock_poisoned(&self.state);
            let meta = state
                .batches
                .get_mut(&batch_id)
                .ok_or(BatchError::UnknownBatch(batch_id))?;
            meta.paused = false;
        }
        self.events.emit(&BatchEvent::BatchResumed { batch_id });
        Ok(())
    }

    /// Cancel a batch: pending and queued jobs are marked cancelled,
    /// in-flight jobs receive the cooperative cancellation signal
    pub fn cancel_batch(&self, batch_id: Uuid) -> Result<(), BatchError> {
        {
            let mut state = lock_poisoned(&self.state);
            if !state.batches.contains_key(&batch_id) {
                return Err(BatchError::UnknownBatch(batch_id));
            }
            cancel_batch_jobs(&mut state, batch_id);
            if let Some(meta) = state.batches.get_mut(&batch_id) {
                meta.status = BatchStatus::Cancelled;
            }
        }
        self.events.emit(&BatchEvent::BatchCancelled { batch_id });
        Ok(())
    }

    /// Cancel a single pending or in-flight job
    pub fn cancel_job(&self, job_id: Uuid) -> Result<(), BatchError> {
        let mut state = lock_poisoned(&self.state);
        if !state.jobs.contains_key(&job_id) {
            return Err(BatchError::UnknownJob(job_id));
        }
        cancel_single_job(&mut state, job_id);
        Ok(())
    }

    /// Snapshot of one job
    pub fn job(&self, job_id: Uuid) -> Option<BatchJob> {
        lock_poisoned(&self.state).jobs.get(&job_id).cloned()
    }

    /// Snapshots of all jobs in a batch, in creation order
    pub fn batch_jobs(&self, batch_id: Uuid) -> Vec<BatchJob> {
        let state = lock_poisoned(&self.state);
        let mut jobs: Vec<BatchJob> = state
            .jobs
            .values()
            .filter(|job| job.batch_id == batch_id)
            .cloned()
            .collect();
        jobs.sort_by_key(|job| job.created_at);
        jobs
    }

    pub fn batch_status(&self, batch_id: Uuid) -> Option<BatchStatus> {
        lock_poisoned(&self.state)
            .batches
            .get(&batch_id)
            .map(|meta| meta.status)
    }

    /// Aggregate statistics for a batch
    pub fn batch_summary(&self, batch_id: Uuid) -> Option<BatchSummary> {
        let state = lock_poisoned(&self.state);
        let meta = state.batches.get(&batch_id)?;
        let jobs: Vec<&BatchJob> = state
            .jobs
            .values()
            .filter(|job| job.batch_id == batch_id)
            .collect();
        Some(summarize_batch(
            batch_id,
            meta.status,
            &jobs,
            &meta.durations,
            self.config.concurrency,
        ))
    }

    /// One admission pass: fill available worker slots from the front of the
    /// priority queue
    fn admit_jobs(&self) {
        let mut to_start: Vec<(Uuid, Uuid, JobHandler, watch::Receiver<bool>, BatchJob)> =
            Vec::new();

        {
            let mut state = lock_poisoned(&self.state);
            let available = self.config.concurrency.saturating_sub(state.running.len());

            for _ in 0..available {
                let position = match next_admissible(&state, &self.config.priority_order) {
                    Some(position) => position,
                    None => break,
                };
                let job_id = state.queue.remove(position);

                let (batch_id, snapshot) = match state.jobs.get_mut(&job_id) {
                    Some(job) => {
                        job.status = JobStatus::Queued;
                        (job.batch_id, job.clone())
                    }
                    None => continue,
                };
                let handler = match state.batches.get(&batch_id) {
                    Some(meta) => Arc::clone(&meta.handler),
                    None => continue,
                };

                let (cancel_tx, cancel_rx) = watch::channel(false);
                state.running.insert(job_id, RunningJob { cancel_tx });
                to_start.push((job_id, batch_id, handler, cancel_rx, snapshot));
            }
        }

        for (job_id, batch_id, handler, cancel_rx, snapshot) in to_start {
            self.spawn_job(job_id, batch_id, handler, cancel_rx, snapshot);
        }
    }

    fn spawn_job(
        &self,
        job_id: Uuid,
        batch_id: Uuid,
        handler: JobHandler,
        cancel_rx: watch::Receiver<bool>,
        snapshot: BatchJob,
    ) {
        let state = Arc::clone(&self.state);
        let events = Arc::clone(&self.events);
        let config = self.config.clone();

        tokio::spawn(async move {
            // Admit the job into a worker slot
            {
                let mut guard = lock_poisoned(&state);
                match guard.jobs.get_mut(&job_id) {
                    Some(job) if job.status == JobStatus::Queued => {
                        job.status = JobStatus::Parsing;
                        job.started_at = Some(Utc::now());
                    }
                    _ => {
                        // Cancelled between admission and start
                        guard.running.remove(&job_id);
                        return;
                    }
                }
            }
            events.emit(&BatchEvent::JobStarted {
                batch_id,
                job_id,
                file: snapshot.file.clone(),
            });

            let context = JobContext {
                job: snapshot,
                progress: ProgressHandle {
                    state: Arc::clone(&state),
                    events: Arc::clone(&events),
                    job_id,
                    batch_id,
                },
                cancel: cancel_rx.clone(),
            };

            let started = Instant::now();
            let outcome = tokio::select! {
                result = handler(context) => match result {
                    Ok(job_result) => JobOutcome::Success(job_result),
                    Err(error) => JobOutcome::Error(format!("{:#}", error)),
                },
                _ = tokio::time::sleep(config.job_timeout) => JobOutcome::Error(format!(
                    "Job timed out after {:?}",
                    config.job_timeout
                )),
                _ = wait_cancelled(cancel_rx.clone()) => JobOutcome::Cancelled,
            };
            let elapsed = started.elapsed();

            let mut emits: Vec<BatchEvent> = Vec::new();
            {
                let mut guard = lock_poisoned(&state);
                guard.running.remove(&job_id);

                match outcome {
                    JobOutcome::Success(result) => {
                        if let Some(job) = guard.jobs.get_mut(&job_id) {
                            job.status = JobStatus::Complete;
                            job.progress = 100.0;
                            job.result = Some(result);
                            job.completed_at = Some(Utc::now());
                        }
                        if let Some(meta) = guard.batches.get_mut(&batch_id) {
                            meta.durations.push(elapsed);
                        }
                        emits.push(BatchEvent::JobCompleted { batch_id, job_id });
                    }
                    JobOutcome::Cancelled => {
                        if let Some(job) = guard.jobs.get_mut(&job_id) {
                            job.status = JobStatus::Cancelled;
                            job.completed_at = Some(Utc::now());
                        }
                        debug!("Job {} cancelled while in flight", job_id);
                    }
                    JobOutcome::Error(message) => {
                        // A cancellation racing the handler branch (or a
                        // handler erroring out after observing the signal)
                        // must not enter the retry path.
                        let cancel_requested = *cancel_rx.borrow();
                        let batch_running = guard
                            .batches
                            .get(&batch_id)
                            .map(|meta| meta.status == BatchStatus::Running)
                            .unwrap_or(false);
                        if cancel_requested || !batch_running {
                            if let Some(job) = guard.jobs.get_mut(&job_id) {
                                job.status = JobStatus::Cancelled;
                                job.completed_at = Some(Utc::now());
                            }
                            debug!("Job {} cancelled during execution", job_id);
                        } else {
                            let retry = match guard.jobs.get_mut(&job_id) {
                                Some(job) => {
                                    if config.continue_on_error
                                        && job.retry_count < job.max_retries
                                    {
                                        job.retry_count += 1;
                                        job.status = JobStatus::Pending;
                                        job.progress = 0.0;
                                        job.error = Some(message.clone());
                                        Some(job.retry_count)
                                    } else {
                                        job.status = JobStatus::Failed;
                                        job.error = Some(message.clone());
                                        job.completed_at = Some(Utc::now());
                                        None
                                    }
                                }
                                None => None,
                            };

                            match retry {
                                Some(retry_count) => {
                                    warn!(
                                        "Job {} failed ({}), retry {} of {} after {:?}",
                                        job_id,
                                        message,
                                        retry_count,
                                        config.max_retries,
                                        config.retry_delay
                                    );
                                    emits.push(BatchEvent::JobRetrying {
                                        batch_id,
                                        job_id,
                                        retry_count,
                                    });
                                    let state_for_retry = Arc::clone(&state);
                                    let delay = config.retry_delay;
                                    tokio::spawn(async move {
                                        tokio::time::sleep(delay).await;
                                        let mut guard = lock_poisoned(&state_for_retry);
                                        let still_pending = guard
                                            .jobs
                                            .get(&job_id)
                                            .map(|job| job.status == JobStatus::Pending)
                                            .unwrap_or(false);
                                        if still_pending && !guard.queue.contains(&job_id) {
                                            guard.queue.push(job_id);
                                        }
                                    });
                                }
                                None => {
                                    warn!("Job {} terminally failed: {}", job_id, message);
                                    emits.push(BatchEvent::JobFailed {
                                        batch_id,
                                        job_id,
                                        error: message,
                                    });
                                    if !config.continue_on_error {
                                        cancel_batch_jobs(&mut guard, batch_id);
                                        emits.push(BatchEvent::BatchCancelled { batch_id });
                                    }
                                }
                            }
                        }
                    }
                }
            }

            for event in emits {
                events.emit(&event);
            }
        });
    }

    /// Move finished batches to their terminal status. Returns true when
    /// every batch is terminal and nothing remains queued or running.
    fn detect_completed_batches(&self) -> bool {
        let mut transitions: Vec<(Uuid, bool)> = Vec::new();
        let mut all_done = true;

        {
            let state = lock_poisoned(&self.state);
            for (batch_id, meta) in &state.batches {
                if meta.status.is_terminal() {
                    continue;
                }
                let mut active = false;
                let mut failed = false;
                for job in state.jobs.values().filter(|j| j.batch_id == *batch_id) {
                    if !job.status.is_terminal() {
                        active = true;
                    }
                    if job.status == JobStatus::Failed {
                        failed = true;
                    }
                }
                if active {
                    all_done = false;
                } else {
                    transitions.push((*batch_id, failed));
                }
            }
            if !state.running.is_empty() || !state.queue.is_empty() {
                all_done = false;
            }
        }

        let mut emits: Vec<BatchEvent> = Vec::new();
        if !transitions.is_empty() {
            let mut state = lock_poisoned(&self.state);
            for (batch_id, failed) in transitions {
                if let Some(meta) = state.batches.get_mut(&batch_id) {
                    if meta.status.is_terminal() {
                        continue;
                    }
                    meta.status = if failed {
                        BatchStatus::Failed
                    } else {
                        BatchStatus::Complete
                    };
                    emits.push(if failed {
                        BatchEvent::BatchFailed { batch_id }
                    } else {
                        BatchEvent::BatchCompleted { batch_id }
                    });
                }
            }
        }
        for event in emits {
            self.events.emit(&event);
        }

        all_done
    }
}

/// Find the queue position of the next admissible job, honoring the
/// configured priority order and insertion order within a level
fn next_admissible(state: &SchedulerState, priority_order: &[JobPriority]) -> Option<usize> {
    for priority in priority_order {
        let position = state.queue.iter().position(|job_id| {
            let job = match state.jobs.get(job_id) {
                Some(job) => job,
                None => return false,
            };
            if job.priority != *priority {
                return false;
            }
            state
                .batches
                .get(&job.batch_id)
                .map(|meta| !meta.paused && meta.status == BatchStatus::Running)
                .unwrap_or(false)
        });
        if position.is_some() {
            return position;
        }
    }
    None
}

fn cancel_batch_jobs(state: &mut SchedulerState, batch_id: Uuid) {
    let job_ids: Vec<Uuid> = state
        .jobs
        .values()
        .filter(|job| job.batch_id == batch_id && !job.status.is_terminal())
        .map(|job| job.id)
        .collect();
    for job_id in job_ids {
        cancel_single_job(state, job_id);
    }
}

fn cancel_single_job(state: &mut SchedulerState, job_id: Uuid) {
    if let Some(running) = state.running.get(&job_id) {
        // In-flight: deliver the cooperative signal, the worker reports back
        let _ = running.cancel_tx.send(true);
        return;
    }

    state.queue.retain(|queued| *queued != job_id);
    if let Some(job) = state.jobs.get_mut(&job_id) {
        if !job.status.is_terminal() {
            job.status = JobStatus::Cancelled;
            job.completed_at = Some(Utc::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_config() -> BatchConfig {
        BatchConfig {
            concurrency: 2,
            max_retries: 1,
            retry_delay: Duration::from_millis(10),
            job_timeout: Duration::from_millis(100),
            poll_interval: Duration::from_millis(10),
            continue_on_error: true,
            ..Default::default()
        }
    }

    fn ok_result() -> BatchJobResult {
        BatchJobResult {
            variant_count: 10,
            clinical_findings: 1,
            drug_responses: 0,
            trait_associations: 2,
        }
    }

    #[tokio::test]
    async fn test_five_jobs_one_timing_out() {
        // Scenario: 5 jobs, concurrency 2, job 3 always times out,
        // max_retries = 1, continue_on_error = true
        let processor = BatchProcessor::new(test_config());
        let handler = job_handler(|ctx: JobContext| async move {
            if ctx.job.file == "file3" {
                tokio::time::sleep(Duration::from_secs(10)).await;
            }
            ctx.report_progress(60.0);
            Ok(ok_result())
        });

        let files: Vec<String> = (1..=5).map(|i| format!("file{}", i)).collect();
        let batch_id = processor.submit_batch(files, JobPriority::Normal, handler);
        processor.run_until_idle().await;

        assert_eq!(processor.batch_status(batch_id), Some(BatchStatus::Failed));
        for job in processor.batch_jobs(batch_id) {
            if job.file == "file3" {
                assert_eq!(job.status, JobStatus::Failed);
                assert_eq!(job.retry_count, 1);
                assert!(job.error.unwrap().contains("timed out"));
            } else {
                assert_eq!(job.status, JobStatus::Complete);
            }
        }
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeded() {
        let processor = BatchProcessor::new(BatchConfig {
            concurrency: 2,
            ..test_config()
        });

        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let running_clone = Arc::clone(&running);
        let peak_clone = Arc::clone(&peak);

        let handler = job_handler(move |_ctx: JobContext| {
            let running = Arc::clone(&running_clone);
            let peak = Arc::clone(&peak_clone);
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(ok_result())
            }
        });

        let files: Vec<String> = (0..8).map(|i| format!("f{}", i)).collect();
        processor.submit_batch(files, JobPriority::Normal, handler);
        processor.run_until_idle().await;

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_always_failing_job_retries_exactly_max_retries() {
        let processor = BatchProcessor::new(BatchConfig {
            max_retries: 3,
            ..test_config()
        });

        let retries_seen = Arc::new(Mutex::new(Vec::new()));
        let retries_clone = Arc::clone(&retries_seen);
        processor.subscribe(Box::new(move |event| {
            if let BatchEvent::JobRetrying { retry_count, .. } = event {
                retries_clone.lock().unwrap().push(*retry_count);
            }
        }));

        let handler =
            job_handler(|_ctx: JobContext| async move { Err(anyhow!("always broken")) });
        let batch_id = processor.submit_batch(
            vec!["bad.txt".to_string()],
            JobPriority::Normal,
            handler,
        );
        processor.run_until_idle().await;

        let jobs = processor.batch_jobs(batch_id);
        assert_eq!(jobs[0].status, JobStatus::Failed);
        assert_eq!(jobs[0].retry_count, 3);
        // Strictly increasing by one per attempt
        assert_eq!(*retries_seen.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(processor.batch_status(batch_id), Some(BatchStatus::Failed));
    }

    #[tokio::test]
    async fn test_continue_on_error_false_cancels_batch() {
        let processor = BatchProcessor::new(BatchConfig {
            concurrency: 1,
            continue_on_error: false,
            max_retries: 3,
            ..test_config()
        });

        let handler = job_handler(|ctx: JobContext| async move {
            if ctx.job.file == "first" {
                Err(anyhow!("broken"))
            } else {
                Ok(ok_result())
            }
        });

        let batch_id = processor.submit_batch(
            vec!["first".to_string(), "second".to_string()],
            JobPriority::Normal,
            handler,
        );
        processor.run_until_idle().await;

        let jobs = processor.batch_jobs(batch_id);
        let first = jobs.iter().find(|j| j.file == "first").unwrap();
        let second = jobs.iter().find(|j| j.file == "second").unwrap();
        // No retries when continue_on_error is false
        assert_eq!(first.status, JobStatus::Failed);
        assert_eq!(first.retry_count, 0);
        assert_eq!(second.status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_priority_order_with_stable_ties() {
        let processor = BatchProcessor::new(BatchConfig {
            concurrency: 1,
            ..test_config()
        });

        let order = Arc::new(Mutex::new(Vec::new()));
        let order_clone = Arc::clone(&order);
        let handler = job_handler(move |ctx: JobContext| {
            let order = Arc::clone(&order_clone);
            async move {
                order.lock().unwrap().push(ctx.job.file.clone());
                Ok(ok_result())
            }
        });

        processor.submit_batch(vec!["low".to_string()], JobPriority::Low, handler.clone());
        processor.submit_batch(
            vec!["urgent1".to_string(), "urgent2".to_string()],
            JobPriority::Urgent,
            handler.clone(),
        );
        processor.submit_batch(vec!["normal".to_string()], JobPriority::Normal, handler);
        processor.run_until_idle().await;

        assert_eq!(
            *order.lock().unwrap(),
            vec!["urgent1", "urgent2", "normal", "low"]
        );
    }

    #[tokio::test]
    async fn test_pause_suspends_admission_and_resume_restarts() {
        let processor = Arc::new(BatchProcessor::new(test_config()));
        let handler = job_handler(|_ctx: JobContext| async move { Ok(ok_result()) });

        let batch_id =
            processor.submit_batch(vec!["a".to_string()], JobPriority::Normal, handler);
        processor.pause_batch(batch_id).unwrap();

        let runner = Arc::clone(&processor);
        let scheduler = tokio::spawn(async move { runner.run_until_idle().await });

        tokio::time::sleep(Duration::from_millis(60)).await;
        let jobs = processor.batch_jobs(batch_id);
        assert_eq!(jobs[0].status, JobStatus::Pending);

        processor.resume_batch(batch_id).unwrap();
        scheduler.await.unwrap();
        assert_eq!(processor.batch_status(batch_id), Some(BatchStatus::Complete));
    }

    #[tokio::test]
    async fn test_cooperative_cancellation_of_in_flight_job() {
        let processor = Arc::new(BatchProcessor::new(BatchConfig {
            job_timeout: Duration::from_secs(30),
            ..test_config()
        }));
        let handler = job_handler(|ctx: JobContext| async move {
            let mut cancel = ctx.cancel_signal();
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(10)) => {}
                    _ = cancel.changed() => {
                        if ctx.is_cancelled() {
                            return Err(anyhow!("observed cancellation"));
                        }
                    }
                }
            }
        });

        let batch_id =
            processor.submit_batch(vec!["slow".to_string()], JobPriority::Normal, handler);
        let runner = Arc::clone(&processor);
        let scheduler = tokio::spawn(async move { runner.run_until_idle().await });

        // Let the job get in flight, then cancel the batch
        tokio::time::sleep(Duration::from_millis(50)).await;
        processor.cancel_batch(batch_id).unwrap();
        scheduler.await.unwrap();

        let jobs = processor.batch_jobs(batch_id);
        assert_eq!(jobs[0].status, JobStatus::Cancelled);
        assert_eq!(
            processor.batch_status(batch_id),
            Some(BatchStatus::Cancelled)
        );
    }

    #[tokio::test]
    async fn test_progress_transitions_parsing_to_analyzing() {
        let processor = Arc::new(BatchProcessor::new(test_config()));
        let handler = job_handler(|ctx: JobContext| async move {
            ctx.report_progress(20.0);
            tokio::time::sleep(Duration::from_millis(30)).await;
            ctx.report_progress(75.0);
            tokio::time::sleep(Duration::from_millis(30)).await;
            Ok(ok_result())
        });

        let batch_id =
            processor.submit_batch(vec!["g.txt".to_string()], JobPriority::Normal, handler);
        let runner = Arc::clone(&processor);
        let scheduler = tokio::spawn(async move { runner.run_until_idle().await });

        // Poll for the caller-driven analyzing transition
        let mut saw_parsing = false;
        let mut saw_analyzing = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(5)).await;
            if let Some(job) = processor.batch_jobs(batch_id).first() {
                match job.status {
                    JobStatus::Parsing => saw_parsing = true,
                    JobStatus::Analyzing => saw_analyzing = true,
                    _ => {}
                }
            }
        }
        scheduler.await.unwrap();

        assert!(saw_parsing);
        assert!(saw_analyzing);
        let job = &processor.batch_jobs(batch_id)[0];
        assert_eq!(job.status, JobStatus::Complete);
        assert!((job.progress - 100.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_batch_summary_and_events() {
        let processor = BatchProcessor::new(test_config());
        let events_seen = Arc::new(Mutex::new(Vec::new()));
        let events_clone = Arc::clone(&events_seen);
        processor.subscribe(Box::new(move |event| {
            let label = match event {
                BatchEvent::BatchStarted { .. } => "batch_started",
                BatchEvent::BatchCompleted { .. } => "batch_completed",
                BatchEvent::JobStarted { .. } => "job_started",
                BatchEvent::JobCompleted { .. } => "job_completed",
                _ => return,
            };
            events_clone.lock().unwrap().push(label);
        }));

        let handler = job_handler(|_ctx: JobContext| async move { Ok(ok_result()) });
        let batch_id = processor.submit_batch(
            vec!["a".to_string(), "b".to_string()],
            JobPriority::Normal,
            handler,
        );
        processor.run_until_idle().await;

        let summary = processor.batch_summary(batch_id).unwrap();
        assert_eq!(summary.total_jobs, 2);
        assert_eq!(summary.completed, 2);
        assert!((summary.progress - 100.0).abs() < 1e-6);
        assert_eq!(summary.total_variants, 20);
        assert!(summary.average_job_duration.is_some());

        let seen = events_seen.lock().unwrap();
        assert_eq!(seen.first(), Some(&"batch_started"));
        assert_eq!(seen.last(), Some(&"batch_completed"));
        assert_eq!(seen.iter().filter(|l| **l == "job_completed").count(), 2);
    }
}
