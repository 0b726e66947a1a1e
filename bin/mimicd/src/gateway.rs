//! HTTP + WebSocket front door over the session registry.

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Path as AxumPath, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use mimic_core::types::{OwnerContext, SessionRole};
use mimic_core::{Config, Error, Paths};
use mimic_reasoning::{AnthropicClient, ReasoningClient};
use mimic_session::{SessionRegistry, StreamCursor, Workflow};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

#[derive(Clone)]
struct GatewayState {
    registry: Arc<SessionRegistry>,
    stream_tick: Duration,
}

pub async fn run(host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    let paths = Paths::new();
    let config = Config::load_or_default(&paths)?;
    let host = host.unwrap_or_else(|| config.gateway.host.clone());
    let port = port.unwrap_or(config.gateway.port);
    let stream_tick = Duration::from_millis(config.gateway.stream_tick_ms);

    let reasoning: Option<Arc<dyn ReasoningClient>> = if config.reasoning.api_key.is_empty() {
        warn!("no reasoning API key configured; replay and distillation are disabled");
        None
    } else {
        Some(Arc::new(AnthropicClient::from_config(&config.reasoning)?))
    };

    let registry = Arc::new(SessionRegistry::new(config, paths, reasoning));
    let state = GatewayState {
        registry,
        stream_tick,
    };

    let app = Router::new()
        .route("/v1/health", get(handle_health))
        .route("/v1/sessions", post(handle_session_start).get(handle_session_list))
        .route("/v1/sessions/:id", get(handle_session_get))
        .route("/v1/sessions/:id/stop", post(handle_session_stop))
        .route("/v1/sessions/:id/workflow", post(handle_session_workflow))
        .route("/v1/sessions/:id/stream", get(handle_stream_upgrade))
        .route("/v1/replays", post(handle_replay_start))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let bind_addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;
    Ok(())
}

fn error_response(error: Error) -> Response {
    let status = match &error {
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Config(_) => StatusCode::SERVICE_UNAVAILABLE,
        Error::Session(_) | Error::JsonExtract(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({"error": error.to_string()}))).into_response()
}

async fn handle_health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

#[derive(Deserialize)]
struct StartSessionRequest {
    role: SessionRole,
    #[serde(default)]
    owner: OwnerContext,
}

async fn handle_session_start(
    State(state): State<GatewayState>,
    Json(request): Json<StartSessionRequest>,
) -> Response {
    match state
        .registry
        .start_observe(request.role, request.owner)
        .await
    {
        Ok(session) => (StatusCode::CREATED, Json(session.summary())).into_response(),
        Err(e) => error_response(e),
    }
}

async fn handle_session_list(State(state): State<GatewayState>) -> impl IntoResponse {
    Json(json!({"sessions": state.registry.list()}))
}

async fn handle_session_get(
    State(state): State<GatewayState>,
    AxumPath(id): AxumPath<String>,
) -> Response {
    match state.registry.get(&id) {
        Some(session) => Json(session.summary()).into_response(),
        None => error_response(Error::NotFound(format!("session {}", id))),
    }
}

async fn handle_session_stop(
    State(state): State<GatewayState>,
    AxumPath(id): AxumPath<String>,
) -> Response {
    match state.registry.stop(&id).await {
        Some(summary) => Json(summary).into_response(),
        None => error_response(Error::NotFound(format!("session {}", id))),
    }
}

async fn handle_session_workflow(
    State(state): State<GatewayState>,
    AxumPath(id): AxumPath<String>,
) -> Response {
    match state.registry.distill(&id).await {
        Ok(workflow) => Json(workflow).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize)]
struct StartReplayRequest {
    workflow: Workflow,
    #[serde(default)]
    owner: OwnerContext,
}

async fn handle_replay_start(
    State(state): State<GatewayState>,
    Json(request): Json<StartReplayRequest>,
) -> Response {
    match state
        .registry
        .start_replay(request.owner, request.workflow)
        .await
    {
        Ok(session) => (StatusCode::CREATED, Json(session.summary())).into_response(),
        Err(e) => error_response(e),
    }
}

async fn handle_stream_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<GatewayState>,
    AxumPath(id): AxumPath<String>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_stream(socket, state, id))
}

/// One subscriber: a fresh cursor over the session's buffers, drained on a
/// fixed tick. Inbound `{"command": "analyze"}` triggers one out-of-band
/// capture before the next tick. Disconnects end this subscriber only.
async fn handle_stream(socket: WebSocket, state: GatewayState, id: String) {
    let Some(session) = state.registry.get(&id) else {
        let mut socket = socket;
        let _ = socket
            .send(WsMessage::Text(
                json!({"type": "error", "error": format!("session {} not found", id)}).to_string(),
            ))
            .await;
        return;
    };

    info!(session = %id, "stream subscriber connected");
    let (mut sender, mut receiver) = socket.split();
    let mut cursor = StreamCursor::new();

    let connected = cursor.connect(&session);
    if send_message(&mut sender, &connected).await.is_err() {
        return;
    }

    let mut ticker = tokio::time::interval(state.stream_tick);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for message in cursor.drain(&session) {
                    if send_message(&mut sender, &message).await.is_err() {
                        info!(session = %id, "stream subscriber disconnected");
                        return;
                    }
                }
                if cursor.is_finished() {
                    break;
                }
            }
            inbound = receiver.next() => {
                match inbound {
                    Some(Ok(WsMessage::Text(text))) => {
                        let command = serde_json::from_str::<serde_json::Value>(&text)
                            .ok()
                            .and_then(|v| v.get("command").and_then(|c| c.as_str()).map(String::from));
                        if command.as_deref() == Some("analyze") {
                            if let Err(e) = state.registry.analyze(&id).await {
                                warn!(session = %id, error = %e, "analyze command failed");
                            }
                            // Surface the result ahead of the next tick.
                            for message in cursor.drain(&session) {
                                if send_message(&mut sender, &message).await.is_err() {
                                    return;
                                }
                            }
                            if cursor.is_finished() {
                                break;
                            }
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        info!(session = %id, "stream subscriber closed");
                        return;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(session = %id, error = %e, "stream receive error");
                        return;
                    }
                }
            }
        }
    }

    let _ = sender.send(WsMessage::Close(None)).await;
    info!(session = %id, "stream finished");
}

async fn send_message(
    sender: &mut futures::stream::SplitSink<WebSocket, WsMessage>,
    message: &mimic_session::StreamMessage,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(message).unwrap_or_else(|_| "{}".to_string());
    sender.send(WsMessage::Text(text)).await
}
