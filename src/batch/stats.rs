// ==============================================================================
// batch/stats.rs - Batch Aggregate Statistics
// ==============================================================================
// Description: Per-batch progress, counts, and estimated time remaining
// Author: Matt Barham
// Created: 2026-02-20
// Modified: 2026-04-28
// Version: 1.0.0
// ==============================================================================

use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::batch::{BatchJob, BatchStatus, JobStatus};

/// Aggregate of all jobs in a batch, recomputed after every state change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
    pub batch_id: Uuid,
    pub status: BatchStatus,
    pub total_jobs: usize,
    pub pending: usize,
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Mean of all job progress values (0-100)
    pub progress: f32,
    /// Absent until at least one job has completed
    pub estimated_remaining: Option<Duration>,
    pub average_job_duration: Option<Duration>,
    pub total_variants: usize,
    pub total_findings: usize,
}

/// Compute the batch summary from its jobs and observed job durations
pub fn summarize_batch(
    batch_id: Uuid,
    status: BatchStatus,
    jobs: &[&BatchJob],
    durations: &[Duration],
    concurrency: usize,
) -> BatchSummary {
    let mut summary = BatchSummary {
        batch_id,
        status,
        total_jobs: jobs.len(),
        pending: 0,
        queued: 0,
        running: 0,
        completed: 0,
        failed: 0,
        cancelled: 0,
        progress: 0.0,
        estimated_remaining: None,
        average_job_duration: None,
        total_variants: 0,
        total_findings: 0,
    };

    let mut progress_sum = 0.0f32;
    let mut remaining = 0usize;

    for job in jobs {
        progress_sum += job.progress;
        match job.status {
            JobStatus::Pending => summary.pending += 1,
            JobStatus::Queued => summary.queued += 1,
            JobStatus::Parsing | JobStatus::Analyzing => summary.running += 1,
            JobStatus::Complete => summary.completed += 1,
            JobStatus::Failed => summary.failed += 1,
            JobStatus::Cancelled => summary.cancelled += 1,
        }
        if !job.status.is_terminal() {
            remaining += 1;
        }
        if let Some(result) = &job.result {
            summary.total_variants += result.variant_count;
            summary.total_findings +=
                result.clinical_findings + result.drug_responses + result.trait_associations;
        }
    }

    if !jobs.is_empty() {
        summary.progress = progress_sum / jobs.len() as f32;
    }

    if !durations.is_empty() {
        let total: Duration = durations.iter().sum();
        let average = total / durations.len() as u32;
        summary.average_job_duration = Some(average);

        if remaining > 0 && concurrency > 0 {
            let waves = remaining.div_ceil(concurrency) as u32;
            summary.estimated_remaining = Some(average * waves);
        } else if remaining == 0 {
            summary.estimated_remaining = Some(Duration::ZERO);
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{BatchJobResult, JobPriority};
    use chrono::Utc;

    fn job(status: JobStatus, progress: f32) -> BatchJob {
        BatchJob {
            id: Uuid::new_v4(),
            batch_id: Uuid::new_v4(),
            file: "genome.txt".to_string(),
            status,
            priority: JobPriority::Normal,
            progress,
            retry_count: 0,
            max_retries: 2,
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    #[test]
    fn test_progress_is_mean_of_job_progress() {
        let jobs = vec![
            job(JobStatus::Complete, 100.0),
            job(JobStatus::Parsing, 50.0),
            job(JobStatus::Pending, 0.0),
        ];
        let refs: Vec<&BatchJob> = jobs.iter().collect();
        let summary = summarize_batch(Uuid::new_v4(), BatchStatus::Running, &refs, &[], 2);

        assert!((summary.progress - 50.0).abs() < 1e-6);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.running, 1);
        assert_eq!(summary.pending, 1);
        // No completed durations yet
        assert!(summary.estimated_remaining.is_none());
    }

    #[test]
    fn test_eta_uses_wave_count() {
        let jobs = vec![
            job(JobStatus::Complete, 100.0),
            job(JobStatus::Pending, 0.0),
            job(JobStatus::Pending, 0.0),
            job(JobStatus::Pending, 0.0),
        ];
        let refs: Vec<&BatchJob> = jobs.iter().collect();
        let durations = vec![Duration::from_secs(10)];
        let summary = summarize_batch(Uuid::new_v4(), BatchStatus::Running, &refs, &durations, 2);

        // ceil(3 / 2) = 2 waves of 10s each
        assert_eq!(summary.estimated_remaining, Some(Duration::from_secs(20)));
        assert_eq!(summary.average_job_duration, Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_result_statistics_accumulate() {
        let mut done = job(JobStatus::Complete, 100.0);
        done.result = Some(BatchJobResult {
            variant_count: 600000,
            clinical_findings: 12,
            drug_responses: 5,
            trait_associations: 40,
        });
        let jobs = vec![done, job(JobStatus::Complete, 100.0)];
        let refs: Vec<&BatchJob> = jobs.iter().collect();
        let summary = summarize_batch(Uuid::new_v4(), BatchStatus::Complete, &refs, &[], 2);

        assert_eq!(summary.total_variants, 600000);
        assert_eq!(summary.total_findings, 57);
    }
}
