//! # Render Jobs
//!
//! Job payloads, the per-job state machine, and cooperative cancellation.
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`queue`] | Abstract job queue with lease/ack/nack semantics |
//! | [`controller`] | Worker pool: concurrency, rate limiting, retries, drain |
//!
//! State machine per job:
//! `queued → active → {succeeded, failed, cancelled}`, with transient
//! failures looping `active → queued` until the attempt ceiling.

pub mod controller;
pub mod queue;

pub use controller::{ControllerConfig, JobController};
pub use queue::{InMemoryQueue, JobQueue, QueuedJob};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

use crate::error::TarjetaError;
use crate::resolve::{Record, ResolveWarning};
use crate::template::ExportFormat;

/// Job payload enqueued by the CRUD layer and consumed by the controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPayload {
    pub template_id: String,
    pub template_version: u32,
    pub record: Record,
    #[serde(default)]
    pub output_format: Option<ExportFormat>,
    /// Higher runs earlier. Jobs with equal priority run in enqueue order.
    #[serde(default)]
    pub priority: Option<i32>,
}

/// Observable job states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Active,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Cancelled
        )
    }
}

/// One unit of queued work: a (template, record) pair on its way to an
/// output asset. Created on enqueue, mutated only by the job controller.
#[derive(Debug, Clone, Serialize)]
pub struct RenderJob {
    pub id: Uuid,
    pub template_id: String,
    pub template_version: u32,
    pub state: JobState,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub output_url: Option<String>,
    /// Recoverable per-element warnings from the last attempt.
    pub warnings: Vec<ResolveWarning>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RenderJob {
    pub fn new(id: Uuid, payload: &JobPayload) -> Self {
        let now = Utc::now();
        Self {
            id,
            template_id: payload.template_id.clone(),
            template_version: payload.template_version,
            state: JobState::Queued,
            attempts: 0,
            last_error: None,
            output_url: None,
            warnings: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Cooperative cancellation flag.
///
/// Checked between pipeline stages (resolve, layout, composite), never
/// preemptively mid-instruction. Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Stage-boundary check: errors with [`TarjetaError::Cancelled`] once
    /// the flag is set.
    pub fn check(&self) -> Result<(), TarjetaError> {
        if self.is_cancelled() {
            Err(TarjetaError::Cancelled)
        } else {
            Ok(())
        }
    }
}
