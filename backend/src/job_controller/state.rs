//! Shared job state and the tasks that maintain it.
//!
//! The main components are:
//! - `JobRegistry`: a clonable, thread-safe map of job snapshots. It is the
//!   single source of truth served by the status endpoint and the first frame
//!   of every progress stream.
//! - `JobUpdate`: a patch message sent by running jobs (and by the stop and
//!   cleanup paths) instead of writing the map directly.
//! - `start_job_updater`: the long-running task that applies updates and
//!   enforces that terminal states are final.
//! - `start_artifact_sweeper`: the task that deletes archives and forgets
//!   jobs once their retention window lapses.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{info, warn};
use tokio::sync::{mpsc, RwLock};
use tokio::time::MissedTickBehavior;

use common::jobs::{ArtifactInfo, JobSnapshot, JobState};

use crate::config::Config;
use crate::job_controller::progress::ProgressBus;

const UPDATE_CHANNEL_CAPACITY: usize = 100;
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// A thread-safe, shareable container for the state of all generation jobs.
///
/// Reads (status endpoint, progress snapshot, download checks) go straight to
/// the map; writes flow through the `tx` channel so a single task orders
/// them.
#[derive(Clone)]
pub struct JobRegistry {
    pub jobs: Arc<RwLock<HashMap<String, JobSnapshot>>>,
    pub tx: mpsc::Sender<JobUpdate>,
}

impl JobRegistry {
    pub fn new() -> (Self, mpsc::Receiver<JobUpdate>) {
        let (tx, rx) = mpsc::channel(UPDATE_CHANNEL_CAPACITY);
        let registry = JobRegistry {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            tx,
        };
        (registry, rx)
    }

    /// Inserts a freshly accepted job. Done synchronously in the submit
    /// handler so the status endpoint knows the id before the handler
    /// responds.
    pub async fn register(&self, snapshot: JobSnapshot) {
        self.jobs
            .write()
            .await
            .insert(snapshot.job_id.clone(), snapshot);
    }

    pub async fn get(&self, job_id: &str) -> Option<JobSnapshot> {
        self.jobs.read().await.get(job_id).cloned()
    }

    /// Queues a patch for the updater task. Losing one because the process is
    /// shutting down is fine; nobody is reading the map then either.
    pub async fn send(&self, update: JobUpdate) {
        if self.tx.send(update).await.is_err() {
            warn!("job updater is gone; dropping a state update");
        }
    }
}

/// A partial update for one job. Unset fields leave the snapshot untouched.
#[derive(Debug)]
pub struct JobUpdate {
    pub(crate) job_id: String,
    pub(crate) state: Option<JobState>,
    pub(crate) processed: Option<usize>,
    pub(crate) failed: Option<usize>,
    pub(crate) message: Option<String>,
    pub(crate) artifact: Option<ArtifactInfo>,
}

impl JobUpdate {
    pub fn state(job_id: &str, state: JobState) -> Self {
        JobUpdate {
            job_id: job_id.to_string(),
            state: Some(state),
            processed: None,
            failed: None,
            message: None,
            artifact: None,
        }
    }

    pub fn progress(job_id: &str, processed: usize, failed: usize) -> Self {
        JobUpdate {
            job_id: job_id.to_string(),
            state: None,
            processed: Some(processed),
            failed: Some(failed),
            message: None,
            artifact: None,
        }
    }

    pub fn terminal(job_id: &str, state: JobState, message: impl Into<String>) -> Self {
        JobUpdate {
            job_id: job_id.to_string(),
            state: Some(state),
            processed: None,
            failed: None,
            message: Some(message.into()),
            artifact: None,
        }
    }

    pub fn with_counts(mut self, processed: usize, failed: usize) -> Self {
        self.processed = Some(processed);
        self.failed = Some(failed);
        self
    }

    pub fn with_artifact(mut self, artifact: Option<ArtifactInfo>) -> Self {
        self.artifact = artifact;
        self
    }
}

/// Applies queued updates to the registry until every sender is gone.
///
/// Terminal snapshots are never patched again: a job that was cancelled while
/// its run loop was still flushing progress stays cancelled.
pub async fn start_job_updater(registry: JobRegistry, mut rx: mpsc::Receiver<JobUpdate>) {
    while let Some(update) = rx.recv().await {
        let mut jobs = registry.jobs.write().await;
        let Some(snapshot) = jobs.get_mut(&update.job_id) else {
            warn!("update for unknown job {}", update.job_id);
            continue;
        };
        if snapshot.state.is_terminal() {
            continue;
        }
        if let Some(state) = update.state {
            snapshot.state = state;
            if state.is_terminal() {
                snapshot.finished_at = Some(Utc::now());
            }
        }
        if let Some(processed) = update.processed {
            snapshot.processed = processed;
        }
        if let Some(failed) = update.failed {
            snapshot.failed = failed;
        }
        if update.message.is_some() {
            snapshot.message = update.message;
        }
        if update.artifact.is_some() {
            snapshot.artifact = update.artifact;
        }
    }
}

/// Periodically deletes expired archives and drops their job snapshots.
pub async fn start_artifact_sweeper(
    registry: JobRegistry,
    bus: Arc<ProgressBus>,
    config: Arc<Config>,
) {
    let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        sweep_expired(&registry, &bus, &config).await;
    }
}

/// One sweep: removes jobs whose archive expired, and terminal jobs without
/// an archive once the same retention has passed since they finished.
pub(crate) async fn sweep_expired(registry: &JobRegistry, bus: &ProgressBus, config: &Config) {
    let now = Utc::now();
    let retention = config.retention_chrono();
    let expired: Vec<String> = {
        let jobs = registry.jobs.read().await;
        jobs.values()
            .filter(|snapshot| match (&snapshot.artifact, snapshot.finished_at) {
                (Some(artifact), _) => artifact.expires_at <= now,
                (None, Some(finished)) => {
                    snapshot.state.is_terminal() && finished + retention <= now
                }
                (None, None) => false,
            })
            .map(|snapshot| snapshot.job_id.clone())
            .collect()
    };

    let mut removed = 0usize;
    for job_id in &expired {
        let path = config.artifact_path(job_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                // Keep the snapshot; the next sweep retries the delete.
                warn!("[SWEEPER] could not delete {}: {e}", path.display());
                continue;
            }
        }
        registry.jobs.write().await.remove(job_id);
        bus.forget(job_id).await;
        removed += 1;
    }
    if removed > 0 {
        info!("[SWEEPER] removed {removed} expired job(s)");
    }
}
