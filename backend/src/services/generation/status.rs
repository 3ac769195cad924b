//! # Job Status Poll Service
//!
//! `GET /api/status/{job_id}` returns the current [`JobSnapshot`] as JSON for
//! clients that poll instead of holding a progress stream open.
//!
//! [`JobSnapshot`]: common::jobs::JobSnapshot

use actix_web::{web, HttpResponse, Responder};

use crate::job_controller::AppState;

pub(crate) async fn process(
    job_id: web::Path<String>,
    state: web::Data<AppState>,
) -> impl Responder {
    match state.registry.get(&job_id.into_inner()).await {
        Some(snapshot) => HttpResponse::Ok().json(snapshot),
        None => HttpResponse::NotFound().body("Job ID not found"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use actix_web::{test, App};

    use common::jobs::JobSnapshot;

    use super::*;
    use crate::render::test_support::StubRenderer;
    use crate::services::generation::test_support::stub_state;

    #[actix_web::test]
    async fn known_job_returns_its_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let state = stub_state(&dir, Arc::new(StubRenderer::new()));
        state
            .registry
            .register(JobSnapshot::queued("status-1", 7))
            .await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .service(crate::services::generation::configure_routes()),
        )
        .await;

        let request = test::TestRequest::get()
            .uri("/api/status/status-1")
            .to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), 200);
        let body: serde_json::Value = test::read_body_json(response).await;
        assert_eq!(body["job_id"], "status-1");
        assert_eq!(body["state"], "queued");
        assert_eq!(body["total"], 7);

        let request = test::TestRequest::get()
            .uri("/api/status/absent")
            .to_request();
        assert_eq!(test::call_service(&app, request).await.status(), 404);
    }
}
