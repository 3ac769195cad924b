//! # Bulk Generation Submit Service
//!
//! `POST /api/generate` turns a validated `GenerateRequest` into a queued
//! generation job:
//!
//! 1. The payload is checked synchronously. Any [`InputError`] is returned as
//!    a `400` with a plain-text reason and no job is created.
//! 2. A fresh `job_id` is registered in the [`JobRegistry`] as `Queued`, so
//!    the status and progress endpoints know the id before the response is
//!    on the wire.
//! 3. The job is submitted to the [`GenerationQueue`]. If the slot is free
//!    the run loop starts on its own task; otherwise the job waits in FIFO
//!    order and the response reports its queue position.
//!
//! [`JobRegistry`]: crate::job_controller::state::JobRegistry
//! [`GenerationQueue`]: crate::job_controller::queue::GenerationQueue

use actix_web::{web, HttpResponse, Responder};
use log::info;
use uuid::Uuid;

use common::jobs::JobSnapshot;
use common::model::field::FieldPlacement;
use common::model::progress::{ProgressEvent, ProgressStage};
use common::requests::GenerateRequest;

use crate::config::Config;
use crate::error::InputError;
use crate::job_controller::queue::{Admission, QueuedJob};
use crate::job_controller::AppState;
use crate::pipeline::job;

pub(crate) async fn process(
    state: web::Data<AppState>,
    payload: web::Json<GenerateRequest>,
) -> impl Responder {
    let request = payload.into_inner();
    if let Err(e) = validate(&request, &state.config) {
        return HttpResponse::BadRequest().body(e.to_string());
    }

    let job_id = Uuid::new_v4().to_string();
    let total = request.rows.len();
    state
        .registry
        .register(JobSnapshot::queued(&job_id, total))
        .await;

    let job = QueuedJob {
        job_id: job_id.clone(),
        rows: request.rows,
        template_ref: request.template_ref,
        fields: request.fields,
    };
    match state.queue.submit(job).await {
        Admission::Started { job, cancel } => {
            info!("[QUEUE] job {job_id} admitted: {total} rows");
            job::spawn_job(state.get_ref().clone(), job, cancel);
            HttpResponse::Ok().json(serde_json::json!({ "job_id": job_id }))
        }
        Admission::Queued { position } => {
            info!("[QUEUE] job {job_id} parked at position {position}");
            state
                .bus
                .publish(
                    ProgressEvent::new(&job_id, ProgressStage::Queued, 0, total)
                        .with_message(format!("waiting at queue position {position}")),
                )
                .await;
            HttpResponse::Ok().json(serde_json::json!({
                "job_id": job_id,
                "queued_position": position,
            }))
        }
    }
}

fn validate(request: &GenerateRequest, config: &Config) -> Result<(), InputError> {
    if request.rows.is_empty() {
        return Err(InputError::EmptyRows);
    }
    if request.rows.len() > config.max_rows {
        return Err(InputError::TooManyRows(request.rows.len(), config.max_rows));
    }
    validate_fields(&request.fields)?;
    validate_template_ref(request.template_ref.as_deref())
}

/// Field placement checks shared with the preview endpoint.
pub(crate) fn validate_fields(fields: &[FieldPlacement]) -> Result<(), InputError> {
    for (index, field) in fields.iter().enumerate() {
        if field.field_name.trim().is_empty() {
            return Err(InputError::EmptyFieldName(index));
        }
        if !field.font_size_px.is_finite() || field.font_size_px <= 0.0 {
            return Err(InputError::BadFontSize(
                field.field_name.clone(),
                field.font_size_px,
            ));
        }
        if !field.x.is_finite() || !field.y.is_finite() {
            return Err(InputError::BadPosition(field.field_name.clone()));
        }
        if field.color_rgb().is_none() {
            return Err(InputError::BadColor(
                field.field_name.clone(),
                field.color_hex.clone(),
            ));
        }
    }
    Ok(())
}

/// A template reference must be a `data:` URL with a base64 payload or a bare
/// file name; anything that could walk the filesystem is rejected up front.
pub(crate) fn validate_template_ref(template_ref: Option<&str>) -> Result<(), InputError> {
    let Some(reference) = template_ref else {
        return Ok(());
    };
    let trimmed = reference.trim();
    if trimmed.is_empty() {
        return Err(InputError::BadTemplateRef("empty reference".to_string()));
    }
    if let Some(rest) = trimmed.strip_prefix("data:") {
        if !rest.contains(";base64,") {
            return Err(InputError::BadTemplateRef(
                "data URL without a base64 payload".to_string(),
            ));
        }
        return Ok(());
    }
    if trimmed.contains(['/', '\\']) || trimmed.contains("..") {
        return Err(InputError::BadTemplateRef(format!(
            "'{trimmed}' must be a bare file name"
        )));
    }
    Ok(())
}
