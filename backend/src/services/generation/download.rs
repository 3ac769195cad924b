//! # Archive Download Service
//!
//! `GET /api/download?job=<id>` serves the finalized ZIP as an attachment.
//! The archive exists only for jobs that reached `Completed` or `Partial`,
//! and only until the retention sweep (or an explicit cleanup) removes it;
//! every other case is a `404` so clients can treat the link as expired.

use actix_files::NamedFile;
use actix_web::http::header::{ContentDisposition, DispositionParam, DispositionType};
use actix_web::{web, HttpRequest, HttpResponse, Responder};

use common::jobs::JobState;

use crate::job_controller::AppState;
use crate::services::generation::JobQuery;

pub(crate) async fn process(
    req: HttpRequest,
    query: web::Query<JobQuery>,
    state: web::Data<AppState>,
) -> impl Responder {
    let job_id = query.into_inner().job;
    let Some(snapshot) = state.registry.get(&job_id).await else {
        return HttpResponse::NotFound().body("Job ID not found");
    };
    let downloadable = matches!(snapshot.state, JobState::Completed | JobState::Partial)
        && snapshot.artifact.is_some();
    if !downloadable {
        return HttpResponse::NotFound().body("No archive is available for this job");
    }

    match NamedFile::open_async(state.config.artifact_path(&job_id)).await {
        Ok(file) => file
            .set_content_disposition(ContentDisposition {
                disposition: DispositionType::Attachment,
                parameters: vec![DispositionParam::Filename(format!(
                    "certificates_{job_id}.zip"
                ))],
            })
            .into_response(&req),
        // Swept between the snapshot read and the open.
        Err(_) => HttpResponse::NotFound().body("Archive expired"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use actix_web::{test, App};

    use common::jobs::JobSnapshot;
    use common::model::row::Row;
    use common::requests::GenerateRequest;

    use super::*;
    use crate::render::test_support::StubRenderer;
    use crate::services::generation::test_support::{stub_state, wait_terminal};

    #[actix_web::test]
    async fn finished_job_downloads_as_attachment() {
        let dir = tempfile::tempdir().unwrap();
        let state = stub_state(&dir, Arc::new(StubRenderer::new()));
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .service(crate::services::generation::configure_routes()),
        )
        .await;

        let mut row = Row::new();
        row.insert("name".to_string(), "Ada".to_string());
        let submit = test::TestRequest::post()
            .uri("/api/generate")
            .set_json(GenerateRequest {
                rows: vec![row],
                template_ref: None,
                fields: vec![],
            })
            .to_request();
        let body: serde_json::Value =
            test::read_body_json(test::call_service(&app, submit).await).await;
        let job_id = body["job_id"].as_str().unwrap().to_string();
        wait_terminal(&state, &job_id).await;

        let request = test::TestRequest::get()
            .uri(&format!("/api/download?job={job_id}"))
            .to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), 200);
        let disposition = response
            .headers()
            .get("content-disposition")
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(disposition.starts_with("attachment"));
        assert!(disposition.contains(&format!("certificates_{job_id}.zip")));

        let body = test::read_body(response).await;
        let on_disk = std::fs::read(state.config.artifact_path(&job_id)).unwrap();
        assert_eq!(body.to_vec(), on_disk);
    }

    #[actix_web::test]
    async fn unknown_and_unfinished_jobs_are_404() {
        let dir = tempfile::tempdir().unwrap();
        let state = stub_state(&dir, Arc::new(StubRenderer::new()));
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .service(crate::services::generation::configure_routes()),
        )
        .await;

        let request = test::TestRequest::get()
            .uri("/api/download?job=nope")
            .to_request();
        assert_eq!(test::call_service(&app, request).await.status(), 404);

        state
            .registry
            .register(JobSnapshot::queued("still-waiting", 3))
            .await;
        let request = test::TestRequest::get()
            .uri("/api/download?job=still-waiting")
            .to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), 404);
        let body = test::read_body(response).await;
        assert_eq!(body, "No archive is available for this job");
    }

    #[actix_web::test]
    async fn swept_archive_is_404_even_with_a_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let state = stub_state(&dir, Arc::new(StubRenderer::new()));
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .service(crate::services::generation::configure_routes()),
        )
        .await;

        let mut row = Row::new();
        row.insert("name".to_string(), "Ada".to_string());
        let submit = test::TestRequest::post()
            .uri("/api/generate")
            .set_json(GenerateRequest {
                rows: vec![row],
                template_ref: None,
                fields: vec![],
            })
            .to_request();
        let body: serde_json::Value =
            test::read_body_json(test::call_service(&app, submit).await).await;
        let job_id = body["job_id"].as_str().unwrap().to_string();
        wait_terminal(&state, &job_id).await;

        std::fs::remove_file(state.config.artifact_path(&job_id)).unwrap();
        let request = test::TestRequest::get()
            .uri(&format!("/api/download?job={job_id}"))
            .to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), 404);
        let body = test::read_body(response).await;
        assert_eq!(body, "Archive expired");
    }
}
