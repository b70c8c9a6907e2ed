//! Abstract job queue with lease semantics.
//!
//! The durable queue is an external collaborator; this module defines the
//! contract the controller consumes (`enqueue`, leased `receive`, `ack`,
//! `nack`) and an in-memory implementation with visibility-timeout
//! redelivery for tests and single-node deployments.

use async_trait::async_trait;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use uuid::Uuid;

use super::JobPayload;
use crate::error::TarjetaError;

/// A job as it travels through the queue.
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub id: Uuid,
    pub payload: JobPayload,
}

/// Queue contract consumed by the job controller.
///
/// `receive` hands out a *lease*: the job stays invisible until `ack`
/// (done), `nack` (redeliver after a delay), or the visibility timeout
/// elapses (crash redelivery).
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Add a job. Fails once the queue is closed.
    async fn enqueue(&self, job: QueuedJob) -> Result<(), TarjetaError>;

    /// Await the next available job. Returns `None` once the queue is
    /// closed; consumers use this as their stop signal.
    async fn receive(&self) -> Option<QueuedJob>;

    /// Settle a leased job as done.
    async fn ack(&self, job_id: Uuid) -> Result<(), TarjetaError>;

    /// Return a leased job for redelivery after `delay`.
    async fn nack(&self, job_id: Uuid, delay: Duration) -> Result<(), TarjetaError>;

    /// Stop admitting and wake all blocked receivers.
    fn close(&self);
}

struct ReadyEntry {
    priority: i32,
    seq: u64,
    job: QueuedJob,
}

impl PartialEq for ReadyEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}
impl Eq for ReadyEntry {}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ReadyEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Max-heap: higher priority first, then FIFO by sequence.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct QueueState {
    seq: u64,
    ready: BinaryHeap<ReadyEntry>,
    delayed: Vec<(Instant, ReadyEntry)>,
    leased: HashMap<Uuid, (Instant, ReadyEntry)>,
}

/// In-memory queue with priority ordering and visibility-timeout redelivery.
pub struct InMemoryQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    visibility_timeout: Duration,
    closed: AtomicBool,
}

impl InMemoryQueue {
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(QueueState {
                seq: 0,
                ready: BinaryHeap::new(),
                delayed: Vec::new(),
                leased: HashMap::new(),
            }),
            notify: Notify::new(),
            visibility_timeout,
            closed: AtomicBool::new(false),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Move due delayed entries and expired leases back to ready.
    /// Returns the next instant anything becomes due.
    fn promote(state: &mut QueueState, now: Instant) -> Option<Instant> {
        let mut next_due: Option<Instant> = None;

        let mut still_delayed = Vec::new();
        for (due, entry) in state.delayed.drain(..) {
            if due <= now {
                state.ready.push(entry);
            } else {
                next_due = Some(next_due.map_or(due, |d| d.min(due)));
                still_delayed.push((due, entry));
            }
        }
        state.delayed = still_delayed;

        let expired: Vec<Uuid> = state
            .leased
            .iter()
            .filter(|(_, (deadline, _))| *deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            if let Some((_, entry)) = state.leased.remove(&id) {
                tracing::warn!(job = %id, "lease expired, redelivering");
                state.ready.push(entry);
            }
        }
        for (deadline, _) in state.leased.values() {
            next_due = Some(next_due.map_or(*deadline, |d| d.min(*deadline)));
        }

        next_due
    }
}

#[async_trait]
impl JobQueue for InMemoryQueue {
    async fn enqueue(&self, job: QueuedJob) -> Result<(), TarjetaError> {
        if self.is_closed() {
            return Err(TarjetaError::Queue("queue is closed".to_string()));
        }
        let mut state = self.state.lock().await;
        let seq = state.seq;
        state.seq += 1;
        let priority = job.payload.priority.unwrap_or(0);
        state.ready.push(ReadyEntry { priority, seq, job });
        drop(state);
        self.notify.notify_waiters();
        Ok(())
    }

    async fn receive(&self) -> Option<QueuedJob> {
        loop {
            // Register for wakeups before inspecting state, so an enqueue
            // or close between the check and the await cannot be missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_closed() {
                return None;
            }

            let next_due = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                let next_due = Self::promote(&mut state, now);
                if let Some(entry) = state.ready.pop() {
                    let job = entry.job.clone();
                    state
                        .leased
                        .insert(job.id, (now + self.visibility_timeout, entry));
                    return Some(job);
                }
                next_due
            };

            match next_due {
                Some(due) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(due) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    async fn ack(&self, job_id: Uuid) -> Result<(), TarjetaError> {
        self.state.lock().await.leased.remove(&job_id);
        Ok(())
    }

    async fn nack(&self, job_id: Uuid, delay: Duration) -> Result<(), TarjetaError> {
        let mut state = self.state.lock().await;
        let Some((_, entry)) = state.leased.remove(&job_id) else {
            return Err(TarjetaError::Queue(format!("job {job_id} holds no lease")));
        };
        if delay.is_zero() {
            state.ready.push(entry);
        } else {
            state.delayed.push((Instant::now() + delay, entry));
        }
        drop(state);
        self.notify.notify_waiters();
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}
