//! # Stop Generation Service
//!
//! `POST /api/stop-generate` raises the cancel flag of the active job and
//! empties the pending queue. The active job notices the flag at its next
//! chunk boundary and keeps whatever it already rendered as a partial
//! archive; the rejected jobs never ran and are marked `Cancelled` here.

use actix_web::{web, HttpResponse, Responder};
use log::info;

use crate::job_controller::AppState;
use crate::pipeline::job;

pub(crate) async fn process(state: web::Data<AppState>) -> impl Responder {
    let report = state.queue.cancel_all().await;

    if let Some(job_id) = &report.cancelled_active {
        info!("[QUEUE] stop requested; active job {job_id} will wind down");
    }
    for rejected in &report.rejected {
        job::report_rejected(state.get_ref(), rejected).await;
    }

    let rejected: Vec<&str> = report
        .rejected
        .iter()
        .map(|job| job.job_id.as_str())
        .collect();
    HttpResponse::Ok().json(serde_json::json!({
        "cancelled_active": report.cancelled_active,
        "rejected": rejected,
    }))
}
