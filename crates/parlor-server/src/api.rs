use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, Query, State,
    },
    http::{HeaderMap, Method},
    response::Response,
    routing::get,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use parlor_shared::constants::PROTOCOL_VERSION;
use parlor_shared::protocol::ServerEvent;
use parlor_shared::types::UserId;

use crate::auth::{Authenticator, Credentials};
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::relay::Relay;

#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<Relay>,
    pub authenticator: Arc<dyn Authenticator>,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .route("/ws", get(ws_upgrade))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    protocol: &'static str,
}

#[derive(Serialize)]
struct ServerInfoResponse {
    name: String,
    version: &'static str,
    connections: usize,
    online_users: usize,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        protocol: PROTOCOL_VERSION,
    })
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    let hub = state.relay.hub();
    Json(ServerInfoResponse {
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        connections: hub.connection_count().await,
        online_users: hub.presence_snapshot().await.online_user_ids.len(),
    })
}

/// Pull credentials from the query string and the `Authorization` header.
fn credentials(query: &HashMap<String, String>, headers: &HeaderMap) -> Credentials {
    let bearer = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);

    Credentials {
        user_id: query.get("user_id").cloned(),
        token: bearer.or_else(|| query.get("token").cloned()),
    }
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Response, ServerError> {
    let user = state
        .authenticator
        .authenticate(&credentials(&query, &headers))
        .map_err(|e| {
            warn!(%addr, error = %e, "refusing websocket upgrade");
            e
        })?;

    debug!(%addr, user = ?user, "websocket upgrade");
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state.relay, user)))
}

/// Drive one event-channel connection until either side closes it.
async fn handle_socket(socket: WebSocket, relay: Arc<Relay>, user: Option<UserId>) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();

    let conn = relay.connect(user, tx).await;

    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match event.to_json() {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "failed to encode server event");
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => relay.handle_text(conn, &text).await,
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(conn = %conn, error = %e, "websocket read failed");
                break;
            }
        }
    }

    relay.disconnect(conn).await;
    writer.abort();
    debug!(conn = %conn, "websocket closed");
}

/// Serve until the listener fails.
pub async fn serve(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
