//! # Job Progress Stream Service
//!
//! `GET /api/progress?job=<id>` serves a `text/event-stream` for one job.
//! The first frame is a `snapshot` event with the job's current state, so a
//! client that connects late (or reconnects) starts from truth rather than
//! from the next delta. Progress events from the run loop follow in order,
//! and a `heartbeat` frame is emitted whenever the configured interval passes
//! without one, keeping idle connections alive through proxies.
//!
//! The stream ends after the snapshot if the job is already terminal, and
//! otherwise after forwarding its terminal progress event.

use std::convert::Infallible;

use actix_web::{web, HttpResponse, Responder};
use async_stream::stream;
use chrono::Utc;
use tokio::time::MissedTickBehavior;

use crate::job_controller::AppState;
use crate::services::generation::JobQuery;

pub(crate) async fn process(
    query: web::Query<JobQuery>,
    state: web::Data<AppState>,
) -> impl Responder {
    let job_id = query.into_inner().job;

    // Subscribe before reading the snapshot so no event can fall between.
    let mut events = state.bus.subscribe(&job_id).await;
    let Some(snapshot) = state.registry.get(&job_id).await else {
        state.bus.forget(&job_id).await;
        return HttpResponse::NotFound().body("Job ID not found");
    };

    let open_ended = !snapshot.state.is_terminal();
    let first = frame("snapshot", &serde_json::json!(snapshot));
    let heartbeat = state.config.heartbeat_interval;

    let stream = stream! {
        yield Ok::<web::Bytes, Infallible>(first);
        if !open_ended {
            return;
        }
        let mut ticker = tokio::time::interval(heartbeat);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Skip the tick interval() yields immediately.
        ticker.reset();
        loop {
            tokio::select! {
                received = events.recv() => {
                    match received {
                        Some(event) => {
                            let terminal = event.stage.is_terminal();
                            yield Ok(frame("progress", &serde_json::json!(event)));
                            if terminal {
                                break;
                            }
                            ticker.reset();
                        }
                        // Bus side closed (job swept mid-stream).
                        None => break,
                    }
                }
                _ = ticker.tick() => {
                    yield Ok(frame("heartbeat", &serde_json::json!({ "timestamp": Utc::now() })));
                }
            }
        }
    };

    HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header(("Cache-Control", "no-cache"))
        .streaming(stream)
}

/// One server-sent-events frame.
fn frame(event: &str, data: &serde_json::Value) -> web::Bytes {
    web::Bytes::from(format!("event: {event}\ndata: {data}\n\n"))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use actix_web::{test, App};

    use common::model::row::Row;
    use common::requests::GenerateRequest;

    use super::*;
    use crate::render::test_support::StubRenderer;
    use crate::services::generation::test_support::{stub_state, wait_terminal};

    #[actix_web::test]
    async fn frames_carry_event_name_and_json_data() {
        let event = frame("heartbeat", &serde_json::json!({ "n": 1 }));
        let text = String::from_utf8(event.to_vec()).unwrap();
        assert!(text.starts_with("event: heartbeat\ndata: "));
        assert!(text.ends_with("\n\n"));
        assert!(text.contains(r#"{"n":1}"#));
    }

    #[actix_web::test]
    async fn unknown_job_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let state = stub_state(&dir, Arc::new(StubRenderer::new()));
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .service(crate::services::generation::configure_routes()),
        )
        .await;

        let request = test::TestRequest::get()
            .uri("/api/progress?job=nope")
            .to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), 404);
        // The speculative subscription must not linger.
        assert_eq!(state.bus.subscriber_count("nope").await, 0);
    }

    #[actix_web::test]
    async fn terminal_job_streams_one_snapshot_and_closes() {
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
            .uri(&format!("/api/progress?job={job_id}"))
            .to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), 200);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "text/event-stream"
        );

        // A terminal job closes after the snapshot, so the body is finite.
        let body = test::read_body(response).await;
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.starts_with("event: snapshot\ndata: "));
        assert_eq!(text.matches("event: ").count(), 1);
        assert!(text.contains(r#""state":"completed""#));
    }
}
