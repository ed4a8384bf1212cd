use crate::chat::{BridgeTransport, ChatMessage, ChatReply};
use crate::core::DaemonEvent;
use crate::socket;
use crate::BroadcastMessage;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use party_proto::party::{ConfigPatch, PartyConfig};
use party_proto::protocol::ClientEvent;
use party_proto::state::{PartyState, StateManager};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info};

/// Handles shared by every route.
#[derive(Clone)]
pub struct AppState {
    pub state_manager: Arc<StateManager>,
    pub event_tx: mpsc::Sender<DaemonEvent>,
    pub broadcast_tx: broadcast::Sender<BroadcastMessage>,
    pub bridge: Arc<BridgeTransport>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .route("/api/state", get(get_state))
        .route("/api/config", get(get_config).post(post_config))
        .route("/api/start", post(post_start))
        .route("/api/stop", post(post_stop))
        .route("/api/next", post(post_next))
        .route("/api/chat", post(post_chat))
        .route("/api/chat/replies", get(get_chat_replies))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub fn start_server(bind_address: String, port: u16, state: AppState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server {}: {}", addr, e);
                return;
            }
        };
        info!("HTTP server listening at {}", addr);
        if let Err(e) = axum::serve(listener, router(state)).await {
            error!("HTTP server error: {}", e);
        }
    })
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(app): State<AppState>) -> Response {
    let broadcast_rx = app.broadcast_tx.subscribe();
    ws.on_upgrade(move |socket| {
        socket::handle_client(socket, app.state_manager, app.event_tx, broadcast_rx)
    })
}

async fn get_state(State(app): State<AppState>) -> Json<PartyState> {
    Json(app.state_manager.get_state().await)
}

async fn get_config(State(app): State<AppState>) -> Json<PartyConfig> {
    Json(app.state_manager.get_state().await.config)
}

async fn post_config(State(app): State<AppState>, Json(patch): Json<ConfigPatch>) -> StatusCode {
    submit(&app, ClientEvent::ConfigChange(patch)).await
}

/// Body is an optional config override.
async fn post_start(State(app): State<AppState>, body: Option<Json<ConfigPatch>>) -> StatusCode {
    let overrides = body.map(|Json(patch)| patch).filter(|p| !p.is_empty());
    submit(&app, ClientEvent::StartHostParty(overrides)).await
}

async fn post_stop(State(app): State<AppState>) -> StatusCode {
    submit(&app, ClientEvent::StopHostParty).await
}

async fn post_next(State(app): State<AppState>) -> StatusCode {
    submit(&app, ClientEvent::NextStream).await
}

/// Entry point for an external chat bridge.
async fn post_chat(State(app): State<AppState>, Json(message): Json<ChatMessage>) -> Response {
    debug!("chat bridge: line from {} in {}", message.user_id, message.channel);
    if app.bridge.deliver(message).await {
        StatusCode::ACCEPTED.into_response()
    } else if app.bridge.is_connected().await {
        (StatusCode::CONFLICT, "party is listening on another channel").into_response()
    } else {
        (StatusCode::CONFLICT, "no party is running").into_response()
    }
}

async fn get_chat_replies(State(app): State<AppState>) -> Json<Vec<ChatReply>> {
    Json(app.bridge.take_replies().await)
}

async fn submit(app: &AppState, request: ClientEvent) -> StatusCode {
    match socket::forward(&app.event_tx, request).await {
        Ok(_) => StatusCode::ACCEPTED,
        Err(()) => StatusCode::SERVICE_UNAVAILABLE,
    }
}
