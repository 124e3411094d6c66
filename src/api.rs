// src/api.rs
//! HTTP/WebSocket surface.
//!
//! `POST /generate` runs a job to completion and answers with the artifact
//! URL (or a `{detail}` error payload); `GET /ws/progress` starts a job from
//! the first client frame and streams wire-format events until the single
//! terminal frame. Deck artifacts and chart images are served as static
//! files under `/outputs` and `/charts`.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, services::ServeDir};

use crate::config::Settings;
use crate::events::PipelineEvent;
use crate::orchestrator::JobOrchestrator;
use crate::theme::ThemeConfig;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<JobOrchestrator>,
}

pub fn create_router(state: AppState, settings: &Settings) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/generate", post(generate))
        .route("/ws/progress", get(ws_progress))
        .nest_service("/outputs", ServeDir::new(&settings.outputs_dir))
        .nest_service("/charts", ServeDir::new(&settings.charts_dir))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub topic: String,
    #[serde(default)]
    pub max_sources: Option<usize>,
    #[serde(default)]
    pub theme_config: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct GenerateResponse {
    topic: String,
    message: String,
    ppt_filename: String,
    ppt_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    key_points: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    detail: String,
}

fn error_response(status: StatusCode, detail: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorDetail {
            detail: detail.into(),
        }),
    )
        .into_response()
}

/// Validate the request shape; the orchestrator never sees bad input.
fn validate(topic: &str, max_sources: Option<usize>) -> Result<(), &'static str> {
    if topic.trim().is_empty() {
        return Err("topic must not be empty");
    }
    if max_sources == Some(0) {
        return Err("max_sources must be at least 1");
    }
    Ok(())
}

async fn generate(State(state): State<AppState>, Json(body): Json<GenerateRequest>) -> Response {
    if let Err(reason) = validate(&body.topic, body.max_sources) {
        return error_response(StatusCode::UNPROCESSABLE_ENTITY, reason);
    }
    let topic = body.topic.trim().to_string();
    let max_sources = body
        .max_sources
        .unwrap_or_else(|| state.orchestrator.default_max_sources());
    let theme = ThemeConfig::from_value(&body.theme_config);

    let id = state.orchestrator.start(topic.clone(), max_sources, theme);
    let Some(mut stream) = state.orchestrator.subscribe(id) else {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "job channel missing");
    };

    while let Some(event) = stream.next().await {
        match event {
            PipelineEvent::Done { .. } => {
                let outcome = state.orchestrator.job(id).and_then(|j| j.outcome);
                let Some(outcome) = outcome else {
                    return error_response(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "job finished without an outcome",
                    );
                };
                return Json(GenerateResponse {
                    topic,
                    message: "Report generated successfully.".to_string(),
                    ppt_filename: outcome.ppt_filename,
                    ppt_url: outcome.ppt_url,
                    summary: outcome.summary,
                    key_points: outcome.key_points,
                })
                .into_response();
            }
            PipelineEvent::Error { message } => {
                return error_response(StatusCode::INTERNAL_SERVER_ERROR, message);
            }
            PipelineEvent::Progress { .. } | PipelineEvent::ChartGenerated { .. } => {}
        }
    }
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        "event stream ended without a terminal event",
    )
}

#[derive(Debug, Deserialize)]
struct StartFrame {
    topic: String,
    #[serde(default)]
    max_sources: Option<usize>,
    #[serde(default)]
    theme_config: serde_json::Value,
}

async fn ws_progress(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_progress_socket(socket, state))
}

async fn handle_progress_socket(mut socket: WebSocket, state: AppState) {
    // First text frame carries the job request.
    let frame = loop {
        match socket.recv().await {
            Some(Ok(Message::Text(text))) => break text,
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
            Some(Ok(_)) => continue,
        }
    };

    let start: StartFrame = match serde_json::from_str(&frame) {
        Ok(start) => start,
        Err(e) => {
            send_error_frame(&mut socket, format!("invalid start frame: {e}")).await;
            return;
        }
    };
    if let Err(reason) = validate(&start.topic, start.max_sources) {
        send_error_frame(&mut socket, reason).await;
        return;
    }

    let max_sources = start
        .max_sources
        .unwrap_or_else(|| state.orchestrator.default_max_sources());
    let theme = ThemeConfig::from_value(&start.theme_config);
    let id = state
        .orchestrator
        .start(start.topic.trim().to_string(), max_sources, theme);
    let Some(mut stream) = state.orchestrator.subscribe(id) else {
        send_error_frame(&mut socket, "job channel missing").await;
        return;
    };
    tracing::info!(job_id = %id, "progress socket attached");

    let (mut sender, mut receiver) = socket.split();

    let forward = async {
        while let Some(event) = stream.next().await {
            let frame = event.to_wire().to_string();
            if sender.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    };

    // The job keeps running server-side if the client walks away; we only
    // stop forwarding.
    let client_gone = async {
        while let Some(Ok(msg)) = receiver.next().await {
            if matches!(msg, Message::Close(_)) {
                break;
            }
        }
    };

    tokio::select! {
        _ = forward => {}
        _ = client_gone => {}
    }
    tracing::debug!(job_id = %id, "progress socket closed");
}

async fn send_error_frame(socket: &mut WebSocket, message: impl Into<String>) {
    let frame = PipelineEvent::Error {
        message: message.into(),
    }
    .to_wire()
    .to_string();
    let _ = socket.send(Message::Text(frame.into())).await;
    let _ = socket.send(Message::Close(None)).await;
}
