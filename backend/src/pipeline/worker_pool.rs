//! The render worker pool.
//!
//! A dedicated rayon pool sized from the configuration, so certificate
//! rendering cannot starve the runtime's own blocking pool and its width can
//! be tuned independently of the CPU count.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use common::model::row::Row;
use log::warn;
use rayon::prelude::*;

use crate::render::{DocumentRenderer, RenderContext, RenderResult};

pub struct RenderWorkerPool {
    pool: rayon::ThreadPool,
    renderer: Arc<dyn DocumentRenderer>,
}

impl RenderWorkerPool {
    pub fn new(
        threads: usize,
        renderer: Arc<dyn DocumentRenderer>,
    ) -> Result<Self, rayon::ThreadPoolBuildError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|n| format!("render-{n}"))
            .build()?;
        Ok(RenderWorkerPool { pool, renderer })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Renders one chunk of rows in parallel.
    ///
    /// Results come back in batch order no matter which worker finished
    /// first, and a row that fails or panics poisons only its own slot; the
    /// rest of the batch still renders.
    pub fn render_batch(&self, batch: &[(usize, Row)], ctx: &RenderContext) -> Vec<RenderResult> {
        self.pool.install(|| {
            batch
                .par_iter()
                .map(|(index, row)| self.render_one(*index, row, ctx))
                .collect()
        })
    }

    fn render_one(&self, index: usize, row: &Row, ctx: &RenderContext) -> RenderResult {
        let request = ctx.request(row);
        let outcome = match catch_unwind(AssertUnwindSafe(|| self.renderer.render(&request))) {
            Ok(Ok(bytes)) => Ok(bytes),
            Ok(Err(e)) => Err(e.to_string()),
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                warn!("[POOL] renderer panicked on row {index}: {reason}");
                Err(format!("renderer panicked: {reason}"))
            }
        };
        RenderResult { index, outcome }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::fonts::FontAssets;
    use crate::render::test_support::StubRenderer;

    fn batch_of(values: &[&str]) -> Vec<(usize, Row)> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let mut row = Row::new();
                row.insert("name".to_string(), v.to_string());
                (i, row)
            })
            .collect()
    }

    fn ctx() -> RenderContext {
        RenderContext {
            fields: Arc::new(Vec::new()),
            template: None,
            fonts: Arc::new(FontAssets::builtin()),
        }
    }

    #[test]
    fn results_come_back_in_batch_order() {
        let pool = RenderWorkerPool::new(4, Arc::new(StubRenderer::new())).unwrap();
        let batch = batch_of(&["a", "b", "c", "d", "e", "f", "g", "h"]);

        let results = pool.render_batch(&batch, &ctx());

        let indices: Vec<usize> = results.iter().map(|r| r.index).collect();
        assert_eq!(indices, (0..8).collect::<Vec<_>>());
        assert_eq!(results[2].outcome.as_ref().unwrap().as_slice(), b"%stub c");
    }

    #[test]
    fn a_failing_row_poisons_only_its_slot() {
        let pool = RenderWorkerPool::new(2, Arc::new(StubRenderer::new())).unwrap();
        let batch = batch_of(&["a", "fail", "c"]);

        let results = pool.render_batch(&batch, &ctx());

        assert!(results[0].outcome.is_ok());
        assert!(results[1].outcome.as_ref().unwrap_err().contains("scripted failure"));
        assert!(results[2].outcome.is_ok());
    }

    #[test]
    fn a_panicking_row_poisons_only_its_slot() {
        let pool = RenderWorkerPool::new(2, Arc::new(StubRenderer::new())).unwrap();
        let batch = batch_of(&["panic", "b"]);

        let results = pool.render_batch(&batch, &ctx());

        assert!(results[0].outcome.as_ref().unwrap_err().contains("panicked"));
        assert_eq!(results[1].outcome.as_ref().unwrap().as_slice(), b"%stub b");
    }

    #[test]
    fn zero_threads_is_clamped_to_one() {
        let stub = Arc::new(StubRenderer::new());
        let pool = RenderWorkerPool::new(0, stub.clone()).unwrap();
        assert_eq!(pool.threads(), 1);

        let results = pool.render_batch(&batch_of(&["a", "b", "c"]), &ctx());
        assert_eq!(results.len(), 3);
        assert_eq!(stub.calls(), 3);
    }
}
