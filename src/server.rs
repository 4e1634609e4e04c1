//! HTTP telemetry sink.
//!
//! `POST /api/data` stores a reading if at least one field is truthy and
//! stamps it with the acceptance time. `GET /api/data` returns every stored
//! reading in arrival order.

use anyhow::{Context, Result};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Json, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::db::Database;
use crate::models::SensorReading;

pub const DATA_PATH: &str = "/api/data";

#[derive(Clone)]
struct SinkState {
    db: Arc<Mutex<Database>>,
}

#[derive(Debug, Serialize)]
struct Message {
    message: &'static str,
}

fn reply(status: StatusCode, message: &'static str) -> Response {
    (status, Json(Message { message })).into_response()
}

pub fn router(db: Database) -> Router {
    let state = SinkState {
        db: Arc::new(Mutex::new(db)),
    };
    Router::new()
        .route(DATA_PATH, post(store_reading).get(list_readings))
        .with_state(state)
}

pub async fn serve<F>(listener: TcpListener, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(Database::open_in_memory()?);
    info!("sink listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("sink server failed")
}

async fn store_reading(
    State(state): State<SinkState>,
    body: Result<Json<SensorReading>, JsonRejection>,
) -> Response {
    let reading = match body {
        Ok(Json(reading)) => reading,
        Err(rejection) => {
            debug!("unreadable reading body: {rejection}");
            return reply(StatusCode::BAD_REQUEST, "Sensor data is required");
        }
    };

    // Zero counts as missing here, exactly like an absent field. Values too
    // large for f32 arrive as infinity and could not be returned as JSON.
    if !reading.has_truthy_field() || !reading.is_finite() {
        return reply(StatusCode::BAD_REQUEST, "Sensor data is required");
    }

    let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    let stored = match state.db.lock() {
        Ok(db) => db.insert(&reading, &timestamp),
        Err(_) => Err(anyhow::anyhow!("reading store lock poisoned")),
    };
    if let Err(e) = stored {
        error!("storing reading: {e:#}");
        return reply(StatusCode::INTERNAL_SERVER_ERROR, "Failed to store data");
    }

    let reading = SensorReading {
        timestamp: Some(timestamp),
        ..reading
    };
    info!("new reading received: {reading}");
    reply(StatusCode::CREATED, "Data stored successfully")
}

async fn list_readings(State(state): State<SinkState>) -> Response {
    let readings = match state.db.lock() {
        Ok(db) => db.all(),
        Err(_) => Err(anyhow::anyhow!("reading store lock poisoned")),
    };
    match readings {
        Ok(readings) => (StatusCode::OK, Json(readings)).into_response(),
        Err(e) => {
            error!("listing readings: {e:#}");
            reply(StatusCode::INTERNAL_SERVER_ERROR, "Failed to load data")
        }
    }
}
