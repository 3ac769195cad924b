//! The generation run loop.
//!
//! One spawned task owns a job from `Running` to its terminal state: it loads
//! the shared resources, renders rows chunk by chunk on the worker pool,
//! appends finished documents to the archive in submission order, and reports
//! through the registry and the progress bus. Between chunks it honors the
//! cancel flag and the memory monitor; both stop the run early and finalize
//! whatever was already rendered as a partial archive.
//!
//! The same task then drives the queue: finish, cool down, admit the next
//! waiting job and run it too, until the queue is empty.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use log::{error, info, warn};

use common::jobs::{ArtifactInfo, JobState};
use common::model::progress::{ProgressEvent, ProgressStage};
use common::model::row::Row;

use crate::job_controller::queue::{CancelFlag, QueuedJob};
use crate::job_controller::state::JobUpdate;
use crate::job_controller::AppState;
use crate::pipeline::archive::ArchiveBuilder;
use crate::pipeline::resources;
use crate::render::sanitize::entry_stem;
use crate::render::{RenderContext, RenderResult};

/// Why a run loop stopped before attempting every row.
enum StopCause {
    Cancelled,
    Memory,
}

/// Runs `job` on a fresh task, then keeps the task alive as the queue driver:
/// when a run ends the slot cools down and the oldest waiting job (if any)
/// runs next, so at most one job renders at a time process-wide.
pub fn spawn_job(state: AppState, job: QueuedJob, cancel: CancelFlag) {
    tokio::spawn(async move {
        let mut slot = Some((job, cancel));
        while let Some((job, cancel)) = slot.take() {
            let job_id = job.job_id.clone();
            run(&state, job, cancel).await;
            state.queue.finish(&job_id).await;
            tokio::time::sleep(state.queue.cooldown()).await;
            slot = state.queue.admit_next().await;
        }
    });
}

/// Marks a job that a stop request pulled out of the queue. It never ran, so
/// this is the only place its terminal state comes from.
pub async fn report_rejected(state: &AppState, job: &QueuedJob) {
    let message = "cancelled by a stop request before starting";
    state
        .registry
        .send(JobUpdate::terminal(&job.job_id, JobState::Cancelled, message))
        .await;
    state
        .bus
        .publish(
            ProgressEvent::new(&job.job_id, ProgressStage::Cancelled, 0, job.rows.len())
                .with_message(message),
        )
        .await;
}

async fn run(state: &AppState, job: QueuedJob, cancel: CancelFlag) {
    let QueuedJob {
        job_id,
        rows,
        template_ref,
        fields,
    } = job;
    let total = rows.len();
    let started = Instant::now();
    info!("[JOB {job_id}] starting: {total} rows");

    state
        .registry
        .send(JobUpdate::state(&job_id, JobState::Running))
        .await;
    state
        .bus
        .publish(
            ProgressEvent::new(&job_id, ProgressStage::Loading, 0, total)
                .with_message("loading template and font"),
        )
        .await;

    // A stop can arrive before the run is even scheduled.
    if cancel.load(Ordering::Relaxed) {
        info!("[JOB {job_id}] cancelled before loading resources");
        finish_cancelled(state, &job_id, total).await;
        return;
    }

    let fonts = match resources::load_fonts(&state.config).await {
        Ok(fonts) => fonts,
        Err(e) => {
            fail(state, &job_id, 0, 0, total, format!("font: {e}")).await;
            return;
        }
    };

    let template = match resources::load_template(&state.config, template_ref.as_deref()).await {
        Ok(template) => template,
        Err(e) => {
            warn!("[JOB {job_id}] template unavailable, rendering without a background: {e}");
            state
                .bus
                .publish(
                    ProgressEvent::new(&job_id, ProgressStage::Loading, 0, total)
                        .with_message(format!("template unavailable ({e}); rendering without it")),
                )
                .await;
            None
        }
    };

    let ctx = RenderContext {
        fields: Arc::new(fields),
        template: template.map(Arc::new),
        fonts: Arc::new(fonts),
    };

    let mut archive = {
        let dir = state.config.artifacts_dir.clone();
        match tokio::task::spawn_blocking(move || ArchiveBuilder::create(&dir)).await {
            Ok(Ok(archive)) => archive,
            Ok(Err(e)) => {
                fail(state, &job_id, 0, 0, total, format!("archive: {e}")).await;
                return;
            }
            Err(e) => {
                fail(state, &job_id, 0, 0, total, format!("archive task crashed: {e}")).await;
                return;
            }
        }
    };

    state
        .bus
        .publish(ProgressEvent::new(&job_id, ProgressStage::Rendering, 0, total))
        .await;

    let indexed: Vec<(usize, Row)> = rows.into_iter().enumerate().collect();
    let mut processed = 0usize;
    let mut failed = 0usize;
    let mut stop: Option<StopCause> = None;
    let mut fatal: Option<String> = None;

    'chunks: for chunk in indexed.chunks(state.config.chunk_size) {
        if cancel.load(Ordering::Relaxed) {
            stop = Some(StopCause::Cancelled);
            break;
        }
        // Above the watermark the run waits; if pressure never clears, the
        // rows done so far become the result instead of an OOM kill.
        if !state.monitor.wait_for_headroom().await {
            stop = Some(StopCause::Memory);
            break;
        }

        let pool = state.pool.clone();
        let batch_ctx = ctx.clone();
        let batch: Vec<(usize, Row)> = chunk.to_vec();
        let results: Vec<RenderResult> =
            match tokio::task::spawn_blocking(move || pool.render_batch(&batch, &batch_ctx)).await
            {
                Ok(results) => results,
                Err(e) => {
                    error!("[JOB {job_id}] render batch crashed: {e}");
                    chunk
                        .iter()
                        .map(|(index, _)| RenderResult {
                            index: *index,
                            outcome: Err("render batch crashed".to_string()),
                        })
                        .collect()
                }
            };

        for result in results {
            processed += 1;
            match result.outcome {
                Ok(bytes) => {
                    let name = unique_entry_name(&archive, &indexed[result.index].1, result.index);
                    if let Err(e) = archive.append(&name, &bytes) {
                        fatal = Some(format!("archive write: {e}"));
                        break 'chunks;
                    }
                }
                Err(reason) => {
                    failed += 1;
                    warn!("[JOB {job_id}] row {} failed: {reason}", result.index);
                }
            }
        }

        state
            .registry
            .send(JobUpdate::progress(&job_id, processed, failed))
            .await;
        state
            .bus
            .publish(ProgressEvent::new(&job_id, ProgressStage::Rendering, processed, total))
            .await;
    }

    if let Some(reason) = fatal {
        archive.discard();
        fail(state, &job_id, processed, failed, total, reason).await;
        return;
    }

    // A cancel that landed before the first chunk produced nothing worth
    // keeping; report it as cancelled rather than an empty partial.
    if processed == 0 && matches!(stop, Some(StopCause::Cancelled)) {
        archive.discard();
        info!("[JOB {job_id}] cancelled before any row was attempted");
        finish_cancelled(state, &job_id, total).await;
        return;
    }

    state
        .bus
        .publish(
            ProgressEvent::new(&job_id, ProgressStage::Archiving, processed, total)
                .with_message("finalizing archive"),
        )
        .await;

    let dest = state.config.artifact_path(&job_id);
    let summary = match tokio::task::spawn_blocking(move || archive.finalize(&dest)).await {
        Ok(Ok(summary)) => summary,
        Ok(Err(e)) => {
            fail(state, &job_id, processed, failed, total, format!("archive finalize: {e}")).await;
            return;
        }
        Err(e) => {
            fail(state, &job_id, processed, failed, total, format!("archive task crashed: {e}")).await;
            return;
        }
    };

    let artifact = ArtifactInfo {
        entries: summary.entries,
        bytes: summary.bytes,
        expires_at: Utc::now() + state.config.retention_chrono(),
    };

    let (terminal_state, terminal_stage, message) = match stop {
        None if failed == 0 => (
            JobState::Completed,
            ProgressStage::Completed,
            format!("{processed} certificates generated"),
        ),
        None => (
            JobState::Completed,
            ProgressStage::Completed,
            format!(
                "{} certificates generated, {failed} rows failed",
                processed - failed
            ),
        ),
        Some(StopCause::Cancelled) => (
            JobState::Partial,
            ProgressStage::Partial,
            format!("cancelled after {processed} of {total} rows"),
        ),
        Some(StopCause::Memory) => (
            JobState::Partial,
            ProgressStage::Partial,
            format!("stopped by memory pressure after {processed} of {total} rows"),
        ),
    };

    state
        .registry
        .send(
            JobUpdate::terminal(&job_id, terminal_state, message.clone())
                .with_counts(processed, failed)
                .with_artifact(Some(artifact)),
        )
        .await;
    state
        .bus
        .publish(
            ProgressEvent::new(&job_id, terminal_stage, processed, total).with_message(message),
        )
        .await;
    info!(
        "[JOB {job_id}] done in {:.1?}: {} entries, {} bytes, {failed} failed",
        started.elapsed(),
        summary.entries,
        summary.bytes
    );
}

async fn finish_cancelled(state: &AppState, job_id: &str, total: usize) {
    let message = "cancelled before any row was processed";
    state
        .registry
        .send(JobUpdate::terminal(job_id, JobState::Cancelled, message))
        .await;
    state
        .bus
        .publish(
            ProgressEvent::new(job_id, ProgressStage::Cancelled, 0, total).with_message(message),
        )
        .await;
}

async fn fail(
    state: &AppState,
    job_id: &str,
    processed: usize,
    failed: usize,
    total: usize,
    reason: String,
) {
    error!("[JOB {job_id}] failed: {reason}");
    state
        .registry
        .send(
            JobUpdate::terminal(job_id, JobState::Failed, reason.clone())
                .with_counts(processed, failed),
        )
        .await;
    state
        .bus
        .publish(
            ProgressEvent::new(job_id, ProgressStage::Failed, processed, total)
                .with_message(reason),
        )
        .await;
}

/// Picks a `.pdf` entry name no other entry uses: the row's stem, then the
/// stem with the 1-based row number, then a positional name, counting up
/// until free.
fn unique_entry_name(archive: &ArchiveBuilder, row: &Row, index: usize) -> String {
    let stem = entry_stem(row, index);
    let candidate = format!("{stem}.pdf");
    if !archive.contains(&candidate) {
        return candidate;
    }
    let candidate = format!("{stem}_{}.pdf", index + 1);
    if !archive.contains(&candidate) {
        return candidate;
    }
    let mut round = 1;
    let mut fallback = format!("certificate_{}.pdf", index + 1);
    while archive.contains(&fallback) {
        round += 1;
        fallback = format!("certificate_{}_{round}.pdf", index + 1);
    }
    fallback
}

#[cfg(test)]
mod tests {
    use std::io::Read;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use common::jobs::JobSnapshot;
    use common::model::field::FieldPlacement;

    use super::*;
    use crate::config::Config;
    use crate::job_controller::queue::Admission;
    use crate::job_controller::state::start_job_updater;
    use crate::pipeline::memory::MemoryMonitor;
    use crate::render::test_support::StubRenderer;
    use crate::render::DocumentRenderer;

    fn test_config(dir: &tempfile::TempDir) -> Config {
        let mut config = Config::from_env();
        config.artifacts_dir = dir.path().to_path_buf();
        config.templates_dir = dir.path().join("templates");
        config.font_regular = None;
        config.font_bold = None;
        config.font_family = None;
        config.chunk_size = 5;
        config.render_threads = 2;
        config.queue_cooldown = Duration::from_millis(5);
        config
    }

    fn test_state(config: Config, renderer: Arc<dyn DocumentRenderer>) -> AppState {
        let (state, update_rx) = AppState::with_renderer(config, renderer).unwrap();
        tokio::spawn(start_job_updater(state.registry.clone(), update_rx));
        state
    }

    fn rows_named(names: &[&str]) -> Vec<Row> {
        names
            .iter()
            .map(|name| {
                let mut row = Row::new();
                row.insert("name".to_string(), name.to_string());
                row
            })
            .collect()
    }

    fn name_field() -> FieldPlacement {
        FieldPlacement {
            field_name: "name".to_string(),
            x: 10.0,
            y: 10.0,
            font_size_px: 16.0,
            color_hex: "000000".to_string(),
            bold: false,
        }
    }

    async fn submit(state: &AppState, job_id: &str, rows: Vec<Row>) {
        submit_with_template(state, job_id, rows, None).await;
    }

    async fn submit_with_template(
        state: &AppState,
        job_id: &str,
        rows: Vec<Row>,
        template_ref: Option<String>,
    ) {
        state
            .registry
            .register(JobSnapshot::queued(job_id, rows.len()))
            .await;
        let job = QueuedJob {
            job_id: job_id.to_string(),
            rows,
            template_ref,
            fields: vec![name_field()],
        };
        if let Admission::Started { job, cancel } = state.queue.submit(job).await {
            spawn_job(state.clone(), job, cancel);
        }
    }

    async fn wait_for_state(state: &AppState, job_id: &str, target: JobState) -> JobSnapshot {
        for _ in 0..1200 {
            if let Some(snapshot) = state.registry.get(job_id).await {
                if snapshot.state == target {
                    return snapshot;
                }
                assert!(
                    !snapshot.state.is_terminal(),
                    "job {job_id} reached {:?} while waiting for {target:?}",
                    snapshot.state
                );
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for job {job_id} to reach {target:?}");
    }

    fn archive_names(state: &AppState, job_id: &str) -> Vec<String> {
        let file = std::fs::File::open(state.config.artifact_path(job_id)).unwrap();
        let mut archive = zip::ZipArchive::new(file).unwrap();
        (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect()
    }

    #[tokio::test]
    async fn all_rows_end_up_as_ordered_named_entries() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(test_config(&dir), Arc::new(StubRenderer::new()));

        submit(&state, "job-all", rows_named(&["Alice", "Bob", "Alice"])).await;
        let snapshot = wait_for_state(&state, "job-all", JobState::Completed).await;

        assert_eq!(snapshot.processed, 3);
        assert_eq!(snapshot.failed, 0);
        let artifact = snapshot.artifact.expect("completed jobs carry an artifact");
        assert_eq!(artifact.entries, 3);
        assert!(artifact.expires_at > Utc::now());

        // Submission order, duplicate stem disambiguated by row number.
        assert_eq!(
            archive_names(&state, "job-all"),
            vec!["alice.pdf", "bob.pdf", "alice_3.pdf"]
        );

        let file = std::fs::File::open(state.config.artifact_path("job-all")).unwrap();
        let mut archive = zip::ZipArchive::new(file).unwrap();
        let mut bytes = Vec::new();
        archive.by_name("bob.pdf").unwrap().read_to_end(&mut bytes).unwrap();
        assert_eq!(bytes.as_slice(), b"%stub Bob");
    }

    #[tokio::test]
    async fn failing_rows_are_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(test_config(&dir), Arc::new(StubRenderer::new()));

        submit(&state, "job-skip", rows_named(&["Ok1", "fail", "Ok2", "panic"])).await;
        let snapshot = wait_for_state(&state, "job-skip", JobState::Completed).await;

        assert_eq!(snapshot.processed, 4);
        assert_eq!(snapshot.failed, 2);
        assert_eq!(snapshot.artifact.unwrap().entries, 2);
        assert!(snapshot.message.unwrap().contains("2 rows failed"));
        assert_eq!(archive_names(&state, "job-skip"), vec!["ok1.pdf", "ok2.pdf"]);
    }

    #[tokio::test]
    async fn cancel_mid_run_keeps_the_finished_rows_as_partial() {
        let dir = tempfile::tempdir().unwrap();
        let stub = Arc::new(StubRenderer::new());
        let state = test_state(test_config(&dir), stub.clone());

        // Row 4 sits in the first chunk (size 5) and parks its worker until
        // released, so the cancel lands while that chunk is in flight.
        let mut names: Vec<String> = (0..20).map(|i| format!("row{i:02}")).collect();
        names[4] = "hold".to_string();
        let name_refs: Vec<&str> = names.iter().map(String::as_str).collect();
        submit(&state, "job-cancel", rows_named(&name_refs)).await;

        while stub.calls() == 0 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        let report = state.queue.cancel_all().await;
        assert_eq!(report.cancelled_active.as_deref(), Some("job-cancel"));
        stub.release();

        let snapshot = wait_for_state(&state, "job-cancel", JobState::Partial).await;
        assert_eq!(snapshot.processed, 5);
        assert_eq!(snapshot.artifact.unwrap().entries, 5);
        assert!(snapshot.message.unwrap().contains("cancelled after 5 of 20"));

        let names = archive_names(&state, "job-cancel");
        assert_eq!(
            names,
            vec!["row00.pdf", "row01.pdf", "row02.pdf", "row03.pdf", "hold.pdf"]
        );
    }

    #[tokio::test]
    async fn cancel_before_first_chunk_is_cancelled_without_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(test_config(&dir), Arc::new(StubRenderer::new()));

        state
            .registry
            .register(JobSnapshot::queued("job-early", 3))
            .await;
        let job = QueuedJob {
            job_id: "job-early".to_string(),
            rows: rows_named(&["a", "b", "c"]),
            template_ref: None,
            fields: vec![name_field()],
        };
        let Admission::Started { job, cancel } = state.queue.submit(job).await else {
            panic!("fresh queue should start the job");
        };
        cancel.store(true, Ordering::Relaxed);
        spawn_job(state.clone(), job, cancel);

        let snapshot = wait_for_state(&state, "job-early", JobState::Cancelled).await;
        assert_eq!(snapshot.processed, 0);
        assert!(snapshot.artifact.is_none());
        assert!(!state.config.artifact_path("job-early").exists());
    }

    #[tokio::test]
    async fn queued_job_runs_only_after_the_active_one_finishes() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(test_config(&dir), Arc::new(StubRenderer::with_delay(10)));

        submit(&state, "job-first", rows_named(&["a", "b", "c", "d", "e", "f"])).await;
        submit(&state, "job-second", rows_named(&["x", "y"])).await;

        wait_for_state(&state, "job-first", JobState::Running).await;
        let second = state.registry.get("job-second").await.unwrap();
        assert_eq!(second.state, JobState::Queued);
        assert_eq!(state.queue.pending_len().await, 1);

        let first = wait_for_state(&state, "job-first", JobState::Completed).await;
        let second = wait_for_state(&state, "job-second", JobState::Completed).await;
        assert!(second.finished_at.unwrap() >= first.finished_at.unwrap());
        assert_eq!(archive_names(&state, "job-second"), vec!["x.pdf", "y.pdf"]);
    }

    #[tokio::test]
    async fn sustained_memory_pressure_downgrades_to_partial() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(&dir);
        config.memory_ceiling_mb = 1;
        config.memory_watermark = 0.5;
        config.memory_backoff = Duration::from_millis(1);
        config.memory_backoff_checks = 2;

        let mut state = test_state(config.clone(), Arc::new(StubRenderer::new()));
        // Headroom for the first check, pressure ever after.
        let calls = Arc::new(AtomicUsize::new(0));
        let probe_calls = calls.clone();
        state.monitor = Arc::new(MemoryMonitor::with_probe(
            &config,
            Box::new(move || {
                if probe_calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Some(0)
                } else {
                    Some(10 * 1024 * 1024)
                }
            }),
        ));

        let names: Vec<String> = (0..12).map(|i| format!("r{i}")).collect();
        let name_refs: Vec<&str> = names.iter().map(String::as_str).collect();
        submit(&state, "job-mem", rows_named(&name_refs)).await;

        let snapshot = wait_for_state(&state, "job-mem", JobState::Partial).await;
        assert_eq!(snapshot.processed, 5);
        assert_eq!(snapshot.artifact.unwrap().entries, 5);
        assert!(snapshot.message.unwrap().contains("memory pressure"));
    }

    #[tokio::test]
    async fn font_failure_fails_the_job() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(&dir);
        config.font_regular = Some(dir.path().join("missing.ttf"));
        let state = test_state(config, Arc::new(StubRenderer::new()));

        submit(&state, "job-font", rows_named(&["a", "b"])).await;
        let snapshot = wait_for_state(&state, "job-font", JobState::Failed).await;

        assert!(snapshot.artifact.is_none());
        assert!(snapshot.message.unwrap().contains("font"));
        assert!(!state.config.artifact_path("job-font").exists());
    }

    #[tokio::test]
    async fn template_failure_degrades_but_the_job_completes() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(test_config(&dir), Arc::new(StubRenderer::new()));

        submit_with_template(
            &state,
            "job-degrade",
            rows_named(&["a", "b"]),
            Some("missing.png".to_string()),
        )
        .await;
        let snapshot = wait_for_state(&state, "job-degrade", JobState::Completed).await;

        assert_eq!(snapshot.processed, 2);
        assert_eq!(snapshot.failed, 0);
        assert_eq!(snapshot.artifact.unwrap().entries, 2);
    }

    #[tokio::test]
    async fn entry_names_never_collide() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(test_config(&dir), Arc::new(StubRenderer::new()));

        // Both "A B" and "A/B" sanitize to a_b; the literal a_b_2 then takes
        // the suffixed slot, and certificate_4 occupies the positional
        // fallback of the row that needs it next.
        submit(
            &state,
            "job-dup",
            rows_named(&["A B", "A/B", "a_b_3", "certificate_4", "a b"]),
        )
        .await;
        let snapshot = wait_for_state(&state, "job-dup", JobState::Completed).await;
        assert_eq!(snapshot.artifact.unwrap().entries, 5);

        let names = archive_names(&state, "job-dup");
        assert_eq!(names.len(), 5);
        let unique: std::collections::HashSet<&String> = names.iter().collect();
        assert_eq!(unique.len(), 5, "entry names must be unique: {names:?}");
    }
}
