//! HTTP API consumed by the dashboard.
//!
//! The four routes the front-end polls are `POST /api/start`,
//! `POST /api/stop`, `GET /api/devices` and `GET /api/events`. The
//! dashboard ignores error statuses, so lifecycle misuse still answers 200
//! with the condition spelled out in the body.

use crate::error::MonitorError;
use crate::models::dto::{DeviceDTO, SpoofEventDTO, SCHEMA_VERSION};
use crate::monitor::Monitor;
use actix_web::http::header;
use actix_web::{get, post, web, App, HttpResponse, HttpResponseBuilder, HttpServer, Responder};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};

const SCHEMA_HEADER: &str = "X-Schema-Version";

fn versioned(mut builder: HttpResponseBuilder) -> HttpResponseBuilder {
    builder.insert_header((SCHEMA_HEADER, SCHEMA_VERSION.to_string()));
    builder
}

fn failed(e: impl std::fmt::Display) -> HttpResponse {
    versioned(HttpResponse::InternalServerError()).json(json!({ "status": "error", "error": e.to_string() }))
}

// Opening a capture and joining the worker both block, so they run on the blocking pool.
#[post("/api/start")]
async fn api_start(monitor: web::Data<Monitor>) -> impl Responder {
    let monitor = monitor.into_inner();
    match web::block(move || monitor.start()).await {
        Ok(Ok(())) => versioned(HttpResponse::Ok()).json(json!({ "status": "started" })),
        Ok(Err(MonitorError::AlreadyRunning)) => {
            warn!("start requested while monitor is running");
            versioned(HttpResponse::Ok()).json(json!({ "status": "already_running" }))
        }
        Ok(Err(e)) => {
            error!(error = %e, "start failed");
            failed(e)
        }
        Err(e) => {
            error!(error = %e, "start task failed");
            failed(e)
        }
    }
}

#[post("/api/stop")]
async fn api_stop(monitor: web::Data<Monitor>) -> impl Responder {
    let monitor = monitor.into_inner();
    match web::block(move || monitor.stop()).await {
        Ok(Ok(())) => versioned(HttpResponse::Ok()).json(json!({ "status": "stopped" })),
        Ok(Err(MonitorError::NotRunning)) => {
            warn!("stop requested while monitor is not running");
            versioned(HttpResponse::Ok()).json(json!({ "status": "not_running" }))
        }
        Ok(Err(e)) => failed(e),
        Err(e) => {
            error!(error = %e, "stop task failed");
            failed(e)
        }
    }
}

#[get("/api/devices")]
async fn api_devices(monitor: web::Data<Monitor>) -> impl Responder {
    let devices: Vec<DeviceDTO> = monitor.devices().into_iter().map(DeviceDTO::from).collect();
    versioned(HttpResponse::Ok())
        .insert_header((header::CACHE_CONTROL, "no-store"))
        .json(devices)
}

#[get("/api/events")]
async fn api_events(monitor: web::Data<Monitor>) -> impl Responder {
    let events: Vec<SpoofEventDTO> = monitor.events(None).iter().map(SpoofEventDTO::from).collect();
    versioned(HttpResponse::Ok())
        .insert_header((header::CACHE_CONTROL, "no-store"))
        .json(events)
}

#[get("/api/events.csv")]
async fn api_events_csv(monitor: web::Data<Monitor>) -> impl Responder {
    let filename = format!("arp_events_{}.csv", chrono::Utc::now().format("%Y-%m-%d"));
    HttpResponse::Ok()
        .content_type("text/csv")
        .insert_header((
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", filename),
        ))
        .body(monitor.events_csv())
}

#[get("/api/status")]
async fn api_status(monitor: web::Data<Monitor>) -> impl Responder {
    versioned(HttpResponse::Ok())
        .insert_header((header::CACHE_CONTROL, "no-store"))
        .json(monitor.status())
}

#[post("/api/reset")]
async fn api_reset(monitor: web::Data<Monitor>) -> impl Responder {
    match monitor.reset() {
        Ok(()) => versioned(HttpResponse::Ok()).json(json!({ "status": "reset" })),
        Err(e) => versioned(HttpResponse::Conflict()).json(json!({ "status": "running", "error": e.to_string() })),
    }
}

/// Registers every route. Shared by the server and the tests.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(api_start)
        .service(api_stop)
        .service(api_devices)
        .service(api_events)
        .service(api_events_csv)
        .service(api_status)
        .service(api_reset);
}

pub async fn serve(monitor: Arc<Monitor>, bind: SocketAddr) -> std::io::Result<()> {
    let data = web::Data::from(monitor);
    info!(%bind, "HTTP API listening");
    HttpServer::new(move || App::new().app_data(data.clone()).configure(configure))
        .bind(bind)?
        .run()
        .await
}
