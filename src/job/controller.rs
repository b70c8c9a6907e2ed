//! Job controller: worker pool, rate limiting, retries, cancellation, drain.
//!
//! A fixed-size pool of workers pulls jobs from the shared queue. Each
//! job's pipeline runs to completion on one worker; only the admission
//! point (free slot + rate-limiter token) suspends. Transient failures
//! return the job to the queue with exponential backoff until the attempt
//! ceiling; terminal failures settle immediately. Shutdown stops admission
//! at once and drains active jobs.

use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use super::queue::{JobQueue, QueuedJob};
use super::{CancelFlag, JobPayload, JobState, RenderJob};
use crate::error::TarjetaError;
use crate::pipeline::{RenderOptions, RenderPipeline};
use crate::store::{MetadataStore, ObjectStore};
use crate::template::{Template, TemplateStore, validate};

/// Configuration surface consumed by the controller.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Worker pool size.
    pub concurrency: usize,
    /// Attempt ceiling for transient failures.
    pub max_attempts: u32,
    /// Per-job wall-clock budget.
    pub job_timeout: Duration,
    /// Admissions per second across the pool.
    pub rate_limit: f64,
    /// Base retry backoff; doubles per attempt with jitter.
    pub retry_backoff: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_attempts: 3,
            job_timeout: Duration::from_secs(30),
            rate_limit: 8.0,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

/// Token bucket admitting a bounded number of job starts per second.
struct RateLimiter {
    rate: f64,
    burst: f64,
    state: Mutex<(f64, Instant)>,
}

impl RateLimiter {
    fn new(rate: f64) -> Self {
        let rate = rate.max(0.001);
        let burst = rate.max(1.0);
        Self {
            rate,
            burst,
            state: Mutex::new((burst, Instant::now())),
        }
    }

    async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let (ref mut tokens, ref mut last) = *state;
                let now = Instant::now();
                *tokens = (*tokens + now.duration_since(*last).as_secs_f64() * self.rate)
                    .min(self.burst);
                *last = now;
                if *tokens >= 1.0 {
                    *tokens -= 1.0;
                    return;
                }
                (1.0 - *tokens) / self.rate
            };
            tokio::time::sleep(Duration::from_secs_f64(wait)).await;
        }
    }
}

struct Inner {
    config: ControllerConfig,
    queue: Arc<dyn JobQueue>,
    meta: Arc<dyn MetadataStore>,
    output: Arc<dyn ObjectStore>,
    pipeline: RenderPipeline,
    templates: TemplateStore,
    statuses: RwLock<HashMap<Uuid, RenderJob>>,
    cancels: RwLock<HashMap<Uuid, CancelFlag>>,
    limiter: RateLimiter,
    shutdown: watch::Sender<bool>,
}

/// The render job controller. Owns the status board and the worker pool.
pub struct JobController {
    inner: Arc<Inner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl JobController {
    pub fn new(
        config: ControllerConfig,
        queue: Arc<dyn JobQueue>,
        meta: Arc<dyn MetadataStore>,
        output: Arc<dyn ObjectStore>,
        pipeline: RenderPipeline,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        let limiter = RateLimiter::new(config.rate_limit);
        Self {
            inner: Arc::new(Inner {
                config,
                queue,
                meta,
                output,
                pipeline,
                templates: TemplateStore::new(),
                statuses: RwLock::new(HashMap::new()),
                cancels: RwLock::new(HashMap::new()),
                limiter,
                shutdown,
            }),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the worker pool.
    pub async fn start(&self) {
        let mut workers = self.workers.lock().await;
        for index in 0..self.inner.config.concurrency.max(1) {
            let inner = self.inner.clone();
            workers.push(tokio::spawn(worker_loop(inner, index)));
        }
        tracing::info!(workers = workers.len(), "controller started");
    }

    /// Create and enqueue a job, returning its id.
    pub async fn submit(&self, payload: JobPayload) -> Result<Uuid, TarjetaError> {
        if *self.inner.shutdown.borrow() {
            return Err(TarjetaError::Queue("controller is shutting down".to_string()));
        }
        let id = Uuid::new_v4();
        let job = RenderJob::new(id, &payload);
        self.inner.statuses.write().await.insert(id, job.clone());
        self.inner
            .cancels
            .write()
            .await
            .insert(id, CancelFlag::new());
        self.inner.write_status(&job).await;
        self.inner.queue.enqueue(QueuedJob { id, payload }).await?;
        tracing::info!(job = %id, "job enqueued");
        Ok(id)
    }

    /// Observe one job.
    pub async fn status(&self, job_id: Uuid) -> Option<RenderJob> {
        self.inner.statuses.read().await.get(&job_id).cloned()
    }

    /// Observe every known job, oldest first.
    pub async fn list(&self) -> Vec<RenderJob> {
        let mut jobs: Vec<RenderJob> = self.inner.statuses.read().await.values().cloned().collect();
        jobs.sort_by_key(|j| j.created_at);
        jobs
    }

    /// Number of jobs currently in the `active` state.
    pub async fn active_count(&self) -> usize {
        self.inner
            .statuses
            .read()
            .await
            .values()
            .filter(|j| j.state == JobState::Active)
            .count()
    }

    /// Request cancellation. Returns false for unknown or already-terminal
    /// jobs. In-flight work is abandoned at the next stage boundary; no
    /// partial output is persisted.
    pub async fn cancel(&self, job_id: Uuid) -> bool {
        let terminal = self
            .inner
            .statuses
            .read()
            .await
            .get(&job_id)
            .is_none_or(|j| j.state.is_terminal());
        if terminal {
            return false;
        }
        if let Some(flag) = self.inner.cancels.read().await.get(&job_id) {
            flag.cancel();
            tracing::info!(job = %job_id, "cancellation requested");
            true
        } else {
            false
        }
    }

    /// Invalidate the cached template (called when a template is updated).
    pub async fn invalidate_template(&self, template_id: &str) {
        self.inner.templates.invalidate(template_id).await;
    }

    /// Stop admitting new jobs immediately and drain active ones.
    pub async fn shutdown(&self) {
        let _ = self.inner.shutdown.send(true);
        self.inner.queue.close();
        let handles = std::mem::take(&mut *self.workers.lock().await);
        for handle in handles {
            let _ = handle.await;
        }
        tracing::info!("controller drained");
    }
}

async fn worker_loop(inner: Arc<Inner>, index: usize) {
    let mut shutdown = inner.shutdown.subscribe();
    loop {
        if *shutdown.borrow() {
            break;
        }

        let job = tokio::select! {
            job = inner.queue.receive() => match job {
                Some(job) => job,
                None => break,
            },
            _ = shutdown.changed() => break,
        };

        // A claimed job passes the rate limiter before going active. On
        // shutdown while waiting, hand the lease back untouched.
        tokio::select! {
            _ = inner.limiter.acquire() => {}
            _ = shutdown.changed() => {
                let _ = inner.queue.nack(job.id, Duration::ZERO).await;
                break;
            }
        }

        inner.process(job).await;
    }
    tracing::debug!(worker = index, "worker stopped");
}

impl Inner {
    async fn write_status(&self, job: &RenderJob) {
        if let Err(e) = self.meta.write_status(job).await {
            tracing::warn!(job = %job.id, error = %e, "status write failed");
        }
    }

    async fn transition(
        &self,
        job_id: Uuid,
        update: impl FnOnce(&mut RenderJob),
    ) -> Option<RenderJob> {
        let mut statuses = self.statuses.write().await;
        let job = statuses.get_mut(&job_id)?;
        update(job);
        job.updated_at = chrono::Utc::now();
        Some(job.clone())
    }

    async fn cancel_flag(&self, job_id: Uuid) -> CancelFlag {
        if let Some(flag) = self.cancels.read().await.get(&job_id) {
            return flag.clone();
        }
        // Redelivered job from a previous process lifetime: recreate.
        let flag = CancelFlag::new();
        self.cancels.write().await.insert(job_id, flag.clone());
        flag
    }

    async fn process(&self, job: QueuedJob) {
        let cancel = self.cancel_flag(job.id).await;

        let Some(active) = self
            .transition(job.id, |j| {
                j.state = JobState::Active;
                j.attempts += 1;
            })
            .await
        else {
            // Unknown job (status board lost): settle the lease and move on.
            let _ = self.queue.ack(job.id).await;
            return;
        };
        self.write_status(&active).await;
        let attempt = active.attempts;
        tracing::info!(job = %job.id, attempt, "job active");

        let outcome = if cancel.is_cancelled() {
            Err(TarjetaError::Cancelled)
        } else {
            self.execute(&job, &cancel).await
        };

        match outcome {
            Ok((url, warnings)) => {
                let done = self
                    .transition(job.id, |j| {
                        j.state = JobState::Succeeded;
                        j.output_url = Some(url.clone());
                        j.warnings = warnings;
                        j.last_error = None;
                    })
                    .await;
                if let Some(done) = done {
                    self.write_status(&done).await;
                }
                self.settle(job.id).await;
                tracing::info!(job = %job.id, url = %url, "job succeeded");
            }
            Err(TarjetaError::Cancelled) => {
                let done = self
                    .transition(job.id, |j| {
                        j.state = JobState::Cancelled;
                        j.last_error = Some(TarjetaError::Cancelled.to_string());
                    })
                    .await;
                if let Some(done) = done {
                    self.write_status(&done).await;
                }
                self.settle(job.id).await;
                tracing::info!(job = %job.id, "job cancelled");
            }
            Err(error) if error.is_transient() && attempt < self.config.max_attempts => {
                let backoff = self.backoff(attempt);
                let requeued = self
                    .transition(job.id, |j| {
                        j.state = JobState::Queued;
                        j.last_error = Some(error.to_string());
                    })
                    .await;
                if let Some(requeued) = requeued {
                    self.write_status(&requeued).await;
                }
                tracing::warn!(
                    job = %job.id, attempt, error = %error,
                    backoff_ms = backoff.as_millis() as u64,
                    "transient failure, retrying"
                );
                if let Err(e) = self.queue.nack(job.id, backoff).await {
                    tracing::warn!(job = %job.id, error = %e, "nack failed");
                }
            }
            Err(error) => {
                let done = self
                    .transition(job.id, |j| {
                        j.state = JobState::Failed;
                        j.last_error = Some(error.to_string());
                    })
                    .await;
                if let Some(done) = done {
                    self.write_status(&done).await;
                }
                self.settle(job.id).await;
                tracing::error!(job = %job.id, kind = error.kind(), error = %error, "job failed");
            }
        }
    }

    /// Ack the queue lease and drop the cancellation flag.
    async fn settle(&self, job_id: Uuid) {
        if let Err(e) = self.queue.ack(job_id).await {
            tracing::warn!(job = %job_id, error = %e, "ack failed");
        }
        self.cancels.write().await.remove(&job_id);
    }

    /// Exponential backoff with up to 25% jitter.
    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.config.retry_backoff.as_secs_f64();
        let exp = base * 2f64.powi(attempt.saturating_sub(1) as i32);
        let jitter = 1.0 + rand::rng().random_range(0.0..0.25);
        Duration::from_secs_f64(exp * jitter)
    }

    async fn execute(
        &self,
        job: &QueuedJob,
        cancel: &CancelFlag,
    ) -> Result<(String, Vec<crate::resolve::ResolveWarning>), TarjetaError> {
        let template = self.load_template(&job.payload).await?;
        let options = RenderOptions {
            output_format: job.payload.output_format,
            fail_when_empty: false,
        };

        let rendered = tokio::time::timeout(
            self.config.job_timeout,
            self.pipeline
                .render(&template, &job.payload.record, &options, cancel),
        )
        .await
        .map_err(|_| TarjetaError::Timeout(self.config.job_timeout.as_secs()))??;

        // Late cancellation: abandon the buffer rather than persist it.
        cancel.check()?;

        let output_ref = format!(
            "renders/{}/{}.{}",
            job.payload.template_id,
            job.id,
            rendered.file_extension()
        );
        let url = self.output.put(&output_ref, rendered.bytes).await?;
        Ok((url, rendered.warnings))
    }

    /// Template lookup: cache first, metadata store on miss. The loaded
    /// model is validated once and shared read-only across jobs.
    async fn load_template(&self, payload: &JobPayload) -> Result<Arc<Template>, TarjetaError> {
        if let Some(cached) = self
            .templates
            .get(&payload.template_id, payload.template_version)
            .await
        {
            return Ok(cached);
        }
        let template = self
            .meta
            .template(&payload.template_id, payload.template_version)
            .await?
            .ok_or_else(|| TarjetaError::TemplateInvalid {
                element: None,
                rule: format!(
                    "template '{}' version {} not found",
                    payload.template_id, payload.template_version
                ),
            })?;
        validate(&template)?;
        Ok(self.templates.insert(template).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rate_limiter_spends_burst_then_throttles() {
        tokio::time::pause();
        let limiter = RateLimiter::new(2.0);

        // Burst capacity: two immediate admissions.
        let before = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        assert_eq!(Instant::now(), before);

        // Third admission waits for a refill (~0.5s at 2/s).
        limiter.acquire().await;
        let waited = Instant::now().duration_since(before);
        assert!(
            waited >= Duration::from_millis(400),
            "expected a refill wait, got {waited:?}"
        );
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let (shutdown, _) = watch::channel(false);
        let inner = Inner {
            config: ControllerConfig {
                retry_backoff: Duration::from_millis(100),
                ..Default::default()
            },
            queue: Arc::new(crate::job::InMemoryQueue::new(Duration::from_secs(1))),
            meta: Arc::new(crate::store::MemoryMetadataStore::new()),
            output: Arc::new(crate::store::MemoryObjectStore::new()),
            pipeline: RenderPipeline::new(
                Arc::new(crate::render::FontCatalog::empty()),
                Arc::new(crate::store::AssetFetcher::new(Arc::new(
                    crate::store::MemoryObjectStore::new(),
                ))),
            ),
            templates: TemplateStore::new(),
            statuses: RwLock::new(HashMap::new()),
            cancels: RwLock::new(HashMap::new()),
            limiter: RateLimiter::new(1.0),
            shutdown,
        };

        // Jitter adds up to 25% on top of the exponential base.
        let first = inner.backoff(1);
        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(125));
        let third = inner.backoff(3);
        assert!(third >= Duration::from_millis(400) && third <= Duration::from_millis(500));
    }
}
