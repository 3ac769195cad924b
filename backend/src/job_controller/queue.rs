//! Single-slot admission for generation jobs.
//!
//! At most one job renders at a time; everything else waits in FIFO order.
//! Between two jobs the slot is held in a cooling state for the configured
//! cooldown, so a fresh submission cannot start while the previous run's
//! memory is still being returned.
//!
//! The queue only decides who runs; the run loop in `pipeline::job` drives it
//! by calling [`GenerationQueue::finish`] and [`GenerationQueue::admit_next`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::warn;
use tokio::sync::Mutex;

use common::model::field::FieldPlacement;
use common::model::row::Row;

/// Shared cancellation flag for one job. Raised by the stop endpoint, checked
/// by the run loop at chunk boundaries.
pub type CancelFlag = Arc<AtomicBool>;

/// Everything a job needs to run, parked here while it waits for the slot.
#[derive(Debug)]
pub struct QueuedJob {
    pub job_id: String,
    pub rows: Vec<Row>,
    pub template_ref: Option<String>,
    pub fields: Vec<FieldPlacement>,
}

/// Outcome of a submission.
pub enum Admission {
    /// The slot was free. The caller owns the run now and must see it through
    /// `finish` and `admit_next`.
    Started { job: QueuedJob, cancel: CancelFlag },
    /// The slot is taken; the job waits at this 1-based queue position.
    Queued { position: usize },
}

/// What a stop request touched.
#[derive(Debug)]
pub struct StopReport {
    /// Id of the running job whose cancel flag was raised, if any.
    pub cancelled_active: Option<String>,
    /// Jobs pulled out of the pending queue before they ever started.
    pub rejected: Vec<QueuedJob>,
}

enum Slot {
    Idle,
    Busy { job_id: String, cancel: CancelFlag },
    /// A job just finished; held until the cooldown elapses.
    Cooling,
}

struct Inner {
    slot: Slot,
    pending: VecDeque<QueuedJob>,
}

pub struct GenerationQueue {
    inner: Mutex<Inner>,
    cooldown: Duration,
}

impl GenerationQueue {
    pub fn new(cooldown: Duration) -> Self {
        GenerationQueue {
            inner: Mutex::new(Inner {
                slot: Slot::Idle,
                pending: VecDeque::new(),
            }),
            cooldown,
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Admits `job` into the slot or parks it behind the current holder.
    pub async fn submit(&self, job: QueuedJob) -> Admission {
        let mut inner = self.inner.lock().await;
        match inner.slot {
            Slot::Idle => {
                let cancel: CancelFlag = Arc::new(AtomicBool::new(false));
                inner.slot = Slot::Busy {
                    job_id: job.job_id.clone(),
                    cancel: cancel.clone(),
                };
                Admission::Started { job, cancel }
            }
            Slot::Busy { .. } | Slot::Cooling => {
                inner.pending.push_back(job);
                Admission::Queued {
                    position: inner.pending.len(),
                }
            }
        }
    }

    /// Marks the running job done. The slot moves to cooling and stays
    /// reserved until [`admit_next`] is called.
    pub async fn finish(&self, job_id: &str) {
        let mut inner = self.inner.lock().await;
        match &inner.slot {
            Slot::Busy { job_id: active, .. } if active == job_id => {
                inner.slot = Slot::Cooling;
            }
            _ => warn!("[QUEUE] finish from job {job_id}, which does not hold the slot"),
        }
    }

    /// Ends the cooling period: hands the slot to the oldest pending job, or
    /// frees it when nothing waits.
    pub async fn admit_next(&self) -> Option<(QueuedJob, CancelFlag)> {
        let mut inner = self.inner.lock().await;
        if !matches!(inner.slot, Slot::Cooling) {
            return None;
        }
        match inner.pending.pop_front() {
            Some(job) => {
                let cancel: CancelFlag = Arc::new(AtomicBool::new(false));
                inner.slot = Slot::Busy {
                    job_id: job.job_id.clone(),
                    cancel: cancel.clone(),
                };
                Some((job, cancel))
            }
            None => {
                inner.slot = Slot::Idle;
                None
            }
        }
    }

    /// Raises the active job's cancel flag and drains the pending queue.
    /// The drained jobs never ran; the caller reports them as cancelled.
    pub async fn cancel_all(&self) -> StopReport {
        let mut inner = self.inner.lock().await;
        let cancelled_active = match &inner.slot {
            Slot::Busy { job_id, cancel } => {
                cancel.store(true, Ordering::Relaxed);
                Some(job_id.clone())
            }
            _ => None,
        };
        StopReport {
            cancelled_active,
            rejected: inner.pending.drain(..).collect(),
        }
    }

    /// Id of the job currently holding the slot.
    pub async fn active_job(&self) -> Option<String> {
        match &self.inner.lock().await.slot {
            Slot::Busy { job_id, .. } => Some(job_id.clone()),
            _ => None,
        }
    }

    /// Number of jobs parked behind the slot.
    pub async fn pending_len(&self) -> usize {
        self.inner.lock().await.pending.len()
    }
}
