//! Fan-out of progress events to stream subscribers.
//!
//! The run loop publishes without knowing who listens; each SSE connection
//! holds one bounded receiver. A subscriber that hung up or stopped draining
//! is dropped on the next publish, so a stalled browser can never block a
//! job. Publishing a terminal event closes the job's whole subscription list.

use std::collections::HashMap;

use tokio::sync::{mpsc, Mutex};

use common::model::progress::ProgressEvent;

/// Events buffered per subscriber before it counts as stalled.
const SUBSCRIBER_BUFFER: usize = 64;

#[derive(Default)]
pub struct ProgressBus {
    subscribers: Mutex<HashMap<String, Vec<mpsc::Sender<ProgressEvent>>>>,
}

impl ProgressBus {
    pub fn new() -> Self {
        ProgressBus::default()
    }

    /// Opens a subscription for one job's events. The stream ends when the
    /// job publishes a terminal event or the job is forgotten.
    pub async fn subscribe(&self, job_id: &str) -> mpsc::Receiver<ProgressEvent> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.subscribers
            .lock()
            .await
            .entry(job_id.to_string())
            .or_default()
            .push(tx);
        rx
    }

    /// Delivers `event` to every live subscriber of its job, in publish
    /// order. With no subscribers this is a no-op.
    pub async fn publish(&self, event: ProgressEvent) {
        let mut subscribers = self.subscribers.lock().await;
        let Some(list) = subscribers.get_mut(&event.job_id) else {
            return;
        };
        list.retain(|tx| tx.try_send(event.clone()).is_ok());
        if event.stage.is_terminal() || list.is_empty() {
            subscribers.remove(&event.job_id);
        }
    }

    /// Drops every subscription of `job_id` without a final event.
    pub async fn forget(&self, job_id: &str) {
        self.subscribers.lock().await.remove(job_id);
    }

    /// Live subscriber count for a job.
    pub async fn subscriber_count(&self, job_id: &str) -> usize {
        self.subscribers
            .lock()
            .await
            .get(job_id)
            .map_or(0, |list| list.len())
    }
}
