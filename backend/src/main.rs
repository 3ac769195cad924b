mod config;
mod error;
mod job_controller;
mod pipeline;
mod render;
mod services;

use actix_web::{web, App, HttpServer};
use env_logger::Env;
use log::info;

use crate::config::Config;
use crate::job_controller::{state, AppState};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(Env::default().default_filter_or("info"));

    let config = Config::from_env();
    std::fs::create_dir_all(&config.artifacts_dir)?;
    std::fs::create_dir_all(&config.templates_dir)?;
    let bind_addr = (config.host.clone(), config.port);
    let url = format!("http://{}:{}", config.host, config.port);

    let (app_state, update_rx) = AppState::new(config)?;

    // Background tasks: one orders all job state writes, one sweeps expired
    // archives.
    tokio::spawn(state::start_job_updater(
        app_state.registry.clone(),
        update_rx,
    ));
    tokio::spawn(state::start_artifact_sweeper(
        app_state.registry.clone(),
        app_state.bus.clone(),
        app_state.config.clone(),
    ));

    info!(
        "Server running at {url} ({} render threads)",
        app_state.pool.threads()
    );

    HttpServer::new(move || {
        App::new()
            .app_data(web::JsonConfig::default().limit(10 * 1024 * 1024)) // 10 MB
            .app_data(web::Data::new(app_state.clone()))
            .service(services::generation::configure_routes())
    })
    .bind(bind_addr)?
    .run()
    .await
}
