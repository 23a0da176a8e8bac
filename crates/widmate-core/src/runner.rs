//! Job runner: one tokio task per job, extraction on the blocking pool.
//!
//! A semaphore bounds concurrent extractions. The task claims the job, runs the
//! extractor with a [`ProgressReporter`], then makes sure the job ended in a
//! terminal state whatever the extractor did.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio::task::JoinHandle;

use crate::control::JobControl;
use crate::error::{ServiceError, ServiceResult};
use crate::extractor::{ExtractRequest, Extractor};
use crate::jobs::{DownloadOptions, JobId, JobRecord, JobStore, INTERRUPTED_ERROR};
use crate::progress::ProgressReporter;

/// Error recorded when the extractor returns without a terminal event.
pub const NO_RESULT_ERROR: &str = "extractor exited without reporting a result";

#[derive(Clone)]
pub struct JobRunner {
    store: Arc<JobStore>,
    extractor: Arc<dyn Extractor>,
    control: Arc<JobControl>,
    download_dir: PathBuf,
    slots: Arc<Semaphore>,
    stopping: Arc<AtomicBool>,
}

impl JobRunner {
    pub fn new(
        store: Arc<JobStore>,
        extractor: Arc<dyn Extractor>,
        download_dir: PathBuf,
        max_concurrent_jobs: usize,
    ) -> Self {
        Self {
            store,
            extractor,
            control: Arc::new(JobControl::new()),
            download_dir,
            slots: Arc::new(Semaphore::new(max_concurrent_jobs.max(1))),
            stopping: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    pub fn download_dir(&self) -> &PathBuf {
        &self.download_dir
    }

    /// Start the job's task. The job must already exist in the store.
    pub fn submit(&self, id: JobId, source_url: String, options: DownloadOptions) -> JoinHandle<()> {
        let runner = self.clone();
        tokio::spawn(async move { runner.run_job(id, source_url, options).await })
    }

    /// Cancel a pending or running job. The store flips to `cancelled`
    /// immediately; a live extraction is told to stop.
    pub fn cancel(&self, id: JobId) -> ServiceResult<JobRecord> {
        let job = self.store.cancel(id)?;
        if self.control.request_abort(id) {
            tracing::info!(job_id = %id, "abort requested for running extraction");
        } else {
            tracing::info!(job_id = %id, "job cancelled before it started");
        }
        Ok(job)
    }

    /// Stop taking work: queued jobs never start and live extractions are
    /// told to abort. Waits up to `grace` for them to wind down and returns
    /// how many were still running afterwards.
    pub async fn shutdown(&self, grace: Duration) -> usize {
        self.stopping.store(true, Ordering::Relaxed);
        self.slots.close();
        let aborted = self.control.abort_all();
        tracing::info!(aborted, "job runner shutting down");

        let deadline = Instant::now() + grace;
        while self.control.active() > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let remaining = self.control.active();
        if remaining > 0 {
            tracing::warn!(remaining, "extractions still running at shutdown");
        }
        remaining
    }

    async fn run_job(self, id: JobId, source_url: String, options: DownloadOptions) {
        let Ok(_permit) = self.slots.clone().acquire_owned().await else {
            return;
        };
        // Token first, so a cancel racing the claim always finds it.
        let abort = self.control.register(id);
        if let Err(e) = self.store.mark_running(id) {
            self.control.unregister(id);
            tracing::debug!(job_id = %id, error = %e, "job not claimable; skipping");
            return;
        }
        tracing::info!(job_id = %id, url = %source_url, "download started");

        let request = ExtractRequest::for_job(id, &source_url, &self.download_dir, &options);
        let reporter = ProgressReporter::new(self.store.clone(), id);
        let extractor = self.extractor.clone();

        if let Err(e) = prepare_dir(&request).await {
            self.reconcile(id, Err(e));
            self.control.unregister(id);
            return;
        }

        let joined = tokio::task::spawn_blocking(move || {
            extractor.download(&request, &reporter, &abort)
        })
        .await;
        self.control.unregister(id);

        match joined {
            Ok(result) => self.reconcile(id, result),
            Err(e) => {
                tracing::error!(job_id = %id, error = %e, "extraction task panicked");
                self.reconcile(id, Err(ServiceError::Internal(format!("extraction task failed: {e}"))));
            }
        }
    }

    /// Force a terminal state if the extractor did not leave one. No-op for
    /// jobs that already finished or were cancelled.
    fn reconcile(&self, id: JobId, result: ServiceResult<()>) {
        let message = match result {
            _ if self.stopping.load(Ordering::Relaxed) => INTERRUPTED_ERROR.to_string(),
            Ok(()) => NO_RESULT_ERROR.to_string(),
            Err(e) => match e {
                ServiceError::UpstreamFailure(msg) => msg,
                other => other.to_string(),
            },
        };
        match self.store.get(id) {
            Ok(job) if !job.is_terminal() => {
                if let Err(e) = self.store.fail(id, message.clone()) {
                    tracing::debug!(job_id = %id, error = %e, "reconcile skipped");
                } else {
                    tracing::error!(job_id = %id, error = %message, "download failed");
                }
            }
            _ => {}
        }
    }
}

async fn prepare_dir(request: &ExtractRequest) -> ServiceResult<()> {
    if let Some(dir) = PathBuf::from(&request.output_template).parent() {
        tokio::fs::create_dir_all(dir).await.map_err(|e| {
            ServiceError::Internal(format!("create download directory {}: {e}", dir.display()))
        })?;
    }
    Ok(())
}
