//! MoaView 워치파티 서버 라이브러리
//!
//! 방 단위로 재생 상태와 채팅을 공유하는 WebSocket 서버.
//! 업그레이드 전에 티켓 검증을 통과한 연결만 세션을 얻는다.

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod protocol;
pub mod state;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Json},
    routing::get,
    Router,
};
use error::PartyError;
use futures::{SinkExt, StreamExt};
use protocol::{ClientMessage, ServerMessage};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub use config::Config;
pub use state::AppState;

/// 접속 쿼리 파라미터
#[derive(Debug, Deserialize)]
struct ConnectQuery {
    token: Option<String>,
}

/// 라우터 구성. CORS와 요청 추적 레이어까지 포함하므로
/// 테스트도 운영과 같은 스택을 탄다.
pub fn app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn index_handler() -> Html<&'static str> {
    Html("<h1>MoaView Party Server</h1><p>WebSocket endpoint: /ws</p>")
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "server": "moaview-party-rs",
        "rooms": state.rooms.len(),
        "connections": state.connections.len(),
        "timestamp": std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs()
    }))
}

/// WebSocket 핸드셰이크. 티켓은 `?token=` 쿼리나 Authorization Bearer
/// 헤더로 받고, 검증에 실패하면 업그레이드 없이 401로 끝낸다.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<ConnectQuery>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, StatusCode> {
    let token = query.token.or_else(|| bearer_token(&headers));
    let Some(token) = token else {
        tracing::warn!("Handshake rejected: missing token");
        return Err(StatusCode::UNAUTHORIZED);
    };

    match state.authenticator.authenticate(&token) {
        Ok(actor_id) => Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, actor_id))),
        Err(e) => {
            tracing::warn!(error = %e, "Handshake rejected");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

/// Authorization: Bearer 헤더에서 토큰 추출
fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|token| token.to_string())
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, actor_id: String) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(state.config.party.send_queue);

    // 연결 등록
    let connection_id = handlers::handle_connection(&state, &actor_id, tx.clone());

    // 송신 태스크
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Ok(json) = serde_json::to_string(&msg) {
                if ws_sender.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
        }
    });

    // 수신 처리
    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                handle_client_message(&state, &connection_id, &actor_id, &tx, &text);
            }
            Ok(Message::Close(_)) => break,
            Err(_) => break,
            _ => {}
        }
    }

    // 연결 해제
    handlers::handle_disconnect(&state, &connection_id);
    send_task.abort();
}

/// 수신 메시지 해석 및 분배. 핸들러는 모두 동기 함수라
/// 락을 잡은 구간에서 await이 일어나지 않는다.
fn handle_client_message(
    state: &Arc<AppState>,
    connection_id: &str,
    actor_id: &str,
    sender: &mpsc::Sender<ServerMessage>,
    text: &str,
) {
    let message = match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            let error = PartyError::Protocol(format!("invalid envelope: {}", e));
            let _ = sender.try_send(error.to_message());
            return;
        }
    };

    match message {
        ClientMessage::PartyCreate { display_name } => {
            handlers::handle_create(state, connection_id, actor_id, sender, &display_name);
        }
        ClientMessage::PartyJoin {
            room_id,
            display_name,
        } => {
            handlers::handle_join(state, connection_id, actor_id, sender, &room_id, &display_name);
        }
        ClientMessage::PartyLeave {} => {
            handlers::handle_leave(state, connection_id, actor_id, sender);
        }
        ClientMessage::PartyPlay { position_seconds } => {
            if check_position(position_seconds, sender) {
                handlers::handle_play(state, connection_id, actor_id, sender, position_seconds);
            }
        }
        ClientMessage::PartyPause { position_seconds } => {
            if check_position(position_seconds, sender) {
                handlers::handle_pause(state, connection_id, actor_id, sender, position_seconds);
            }
        }
        ClientMessage::PartySeek { position_seconds } => {
            if check_position(Some(position_seconds), sender) {
                handlers::handle_seek(state, connection_id, actor_id, sender, position_seconds);
            }
        }
        ClientMessage::PartyChat { text } => {
            handlers::handle_chat(state, connection_id, actor_id, sender, &text);
        }
        ClientMessage::Ping {} => {
            handlers::handle_ping(sender);
        }
    }
}

/// positionSeconds는 0 이상의 유한한 값만 허용
fn check_position(position: Option<f64>, sender: &mpsc::Sender<ServerMessage>) -> bool {
    match position {
        Some(p) if !p.is_finite() || p < 0.0 => {
            let error =
                PartyError::Protocol("positionSeconds must be a non-negative number".to_string());
            let _ = sender.try_send(error.to_message());
            false
        }
        _ => true,
    }
}
