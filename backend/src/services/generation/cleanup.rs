//! # Early Cleanup Service
//!
//! `POST /api/cleanup` deletes a finished job's archive and drops the job
//! from the registry before the retention sweep would have. Running or
//! queued jobs are refused with `409`; stop them first.

use actix_web::{web, HttpResponse, Responder};
use log::info;

use common::requests::CleanupRequest;

use crate::job_controller::AppState;

pub(crate) async fn process(
    state: web::Data<AppState>,
    payload: web::Json<CleanupRequest>,
) -> impl Responder {
    let job_id = payload.into_inner().job_id;
    let Some(snapshot) = state.registry.get(&job_id).await else {
        return HttpResponse::NotFound().body("Job ID not found");
    };
    if !snapshot.state.is_terminal() {
        return HttpResponse::Conflict().body("Job is still active; stop it before cleaning up");
    }

    let path = state.config.artifact_path(&job_id);
    match tokio::fs::remove_file(&path).await {
        Ok(()) => {}
        // Failed and cancelled jobs never had an archive.
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return HttpResponse::ServiceUnavailable()
                .body(format!("could not delete the archive: {e}"));
        }
    }
    state.registry.jobs.write().await.remove(&job_id);
    state.bus.forget(&job_id).await;
    info!("[SWEEPER] job {job_id} cleaned up on request");

    HttpResponse::Ok().json(serde_json::json!({ "job_id": job_id, "removed": true }))
}
