//! # Single Certificate Preview Service
//!
//! `POST /api/preview` renders exactly one certificate and returns the PDF
//! bytes, bypassing the queue and the archive. The template and font resolve
//! the same way a job resolves them, including the degrade-to-no-background
//! behavior, so the preview shows what a bulk run would actually produce.

use std::sync::Arc;

use actix_web::{web, HttpResponse, Responder};

use common::requests::PreviewRequest;

use crate::job_controller::AppState;
use crate::pipeline::resources;
use crate::render::RenderContext;
use crate::services::generation::generate;

pub(crate) async fn process(
    state: web::Data<AppState>,
    payload: web::Json<PreviewRequest>,
) -> impl Responder {
    let request = payload.into_inner();
    if let Err(e) = generate::validate_fields(&request.fields) {
        return HttpResponse::BadRequest().body(e.to_string());
    }
    if let Err(e) = generate::validate_template_ref(request.template_ref.as_deref()) {
        return HttpResponse::BadRequest().body(e.to_string());
    }

    match render_preview(&state, request).await {
        Ok(bytes) => HttpResponse::Ok().content_type("application/pdf").body(bytes),
        Err(reason) => HttpResponse::ServiceUnavailable().body(reason),
    }
}

async fn render_preview(state: &AppState, request: PreviewRequest) -> Result<Vec<u8>, String> {
    let fonts = resources::load_fonts(&state.config)
        .await
        .map_err(|e| e.to_string())?;
    // Same policy as a run: an unusable template means a blank background,
    // not a refusal.
    let template = match resources::load_template(&state.config, request.template_ref.as_deref())
        .await
    {
        Ok(template) => template,
        Err(e) => {
            log::warn!("[PREVIEW] template unavailable, rendering without a background: {e}");
            None
        }
    };

    let ctx = RenderContext {
        fields: Arc::new(request.fields),
        template: template.map(Arc::new),
        fonts: Arc::new(fonts),
    };
    let renderer = state.renderer.clone();
    let row = request.row;
    tokio::task::spawn_blocking(move || {
        renderer.render(&ctx.request(&row)).map_err(|e| e.to_string())
    })
    .await
    .map_err(|e| format!("preview task crashed: {e}"))?
}
