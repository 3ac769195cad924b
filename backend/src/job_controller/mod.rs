//! Coordination layer for generation jobs: the snapshot registry, the
//! single-slot admission queue and the progress fan-out, bundled into the
//! [`AppState`] every request handler receives.

pub mod progress;
pub mod queue;
pub mod state;

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::Config;
use crate::pipeline::memory::MemoryMonitor;
use crate::pipeline::worker_pool::RenderWorkerPool;
use crate::render::pdf::PdfRenderer;
use crate::render::DocumentRenderer;
use progress::ProgressBus;
use queue::GenerationQueue;
use state::{JobRegistry, JobUpdate};

/// Everything a handler or a running job needs, cloneable because every part
/// is shared behind an `Arc`. Built once in `main` and injected as
/// `web::Data`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: JobRegistry,
    pub queue: Arc<GenerationQueue>,
    pub bus: Arc<ProgressBus>,
    pub pool: Arc<RenderWorkerPool>,
    pub renderer: Arc<dyn DocumentRenderer>,
    pub monitor: Arc<MemoryMonitor>,
}

impl AppState {
    /// State wired with the production PDF renderer. Returns the update
    /// receiver that must be handed to [`state::start_job_updater`].
    pub fn new(config: Config) -> std::io::Result<(Self, mpsc::Receiver<JobUpdate>)> {
        Self::with_renderer(config, Arc::new(PdfRenderer::new()))
    }

    /// Same wiring with a caller-supplied renderer.
    pub fn with_renderer(
        config: Config,
        renderer: Arc<dyn DocumentRenderer>,
    ) -> std::io::Result<(Self, mpsc::Receiver<JobUpdate>)> {
        let config = Arc::new(config);
        let (registry, update_rx) = JobRegistry::new();
        let pool = RenderWorkerPool::new(config.render_threads, renderer.clone())
            .map_err(std::io::Error::other)?;
        let state = AppState {
            queue: Arc::new(GenerationQueue::new(config.queue_cooldown)),
            bus: Arc::new(ProgressBus::new()),
            pool: Arc::new(pool),
            monitor: Arc::new(MemoryMonitor::from_config(&config)),
            registry,
            renderer,
            config,
        };
        Ok((state, update_rx))
    }
}
