//! HTTP surface of the certificate generation pipeline.
//!
//! All routes live under the `/api` scope and share the [`AppState`] injected
//! by Actix:
//!
//! - `POST /api/generate`: Validates a `GenerateRequest` (rows, field
//!   placements, optional template reference) and admits it to the generation
//!   queue. Responds immediately with the `job_id`; when the single slot is
//!   taken the response also carries the 1-based queue position.
//!
//! - `GET /api/progress?job=<id>`: A server-sent-events stream for one job.
//!   The first frame is always a snapshot of the job's current state, then
//!   ordered progress events follow, interleaved with heartbeats so proxies
//!   keep the connection open. The stream closes when the job reaches a
//!   terminal state.
//!
//! - `GET /api/download?job=<id>`: Serves the finalized ZIP archive as an
//!   attachment once the job is `Completed` or `Partial`. Responds `404` for
//!   unknown jobs, unfinished jobs, and archives already swept away.
//!
//! - `POST /api/stop-generate`: Raises the cancel flag of the active job and
//!   rejects everything still waiting in the queue.
//!
//! - `POST /api/preview`: Renders a single certificate synchronously from a
//!   `PreviewRequest`, bypassing the queue and the archive, and returns the
//!   PDF bytes. Meant for layout tuning before a bulk run.
//!
//! - `GET /api/status/{job_id}`: Returns the job's `JobSnapshot` as JSON, for
//!   clients that poll instead of holding an event stream open.
//!
//! - `POST /api/cleanup`: Deletes a finished job's archive and forgets the
//!   job before the retention window would have swept it.

use actix_web::web::{get, post, scope};
use actix_web::Scope;
use serde::Deserialize;

mod cleanup;
mod download;
pub(crate) mod generate;
mod preview;
mod progress;
mod status;
mod stop;

const API_PATH: &str = "/api";

/// Configures and returns the Actix scope for the generation routes.
pub fn configure_routes() -> Scope {
    scope(API_PATH)
        // Route to submit a new bulk generation job.
        .route("/generate", post().to(generate::process))
        // Route to follow a job's progress as a server-sent-events stream.
        .route("/progress", get().to(progress::process))
        // Route to download the finished archive.
        .route("/download", get().to(download::process))
        // Route to cancel the active job and reject the queue.
        .route("/stop-generate", post().to(stop::process))
        // Route to render a single certificate for layout checks.
        .route("/preview", post().to(preview::process))
        // Route to poll a job's state without an event stream.
        .route("/status/{job_id}", get().to(status::process))
        // Route to drop a finished job's archive ahead of retention.
        .route("/cleanup", post().to(cleanup::process))
}

/// Query string of the progress and download routes.
#[derive(Debug, Deserialize)]
pub(crate) struct JobQuery {
    pub job: String,
}
