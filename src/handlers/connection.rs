//! 연결 핸들러

use crate::protocol::ServerMessage;
use crate::state::{epoch_ms, AppState, ConnectionSession};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc::Sender;
use uuid::Uuid;

/// 새 연결 등록 및 접속 확인 응답
pub fn handle_connection(
    state: &Arc<AppState>,
    actor_id: &str,
    sender: Sender<ServerMessage>,
) -> String {
    let connection_id = Uuid::new_v4().to_string();

    let session = ConnectionSession {
        id: connection_id.clone(),
        actor_id: actor_id.to_string(),
        room_id: Mutex::new(None),
        established_at: epoch_ms(),
    };

    state.connections.insert(connection_id.clone(), session);

    let _ = sender.try_send(ServerMessage::ConnectAck {
        connection_id: connection_id.clone(),
        actor_id: actor_id.to_string(),
    });

    tracing::info!(connection_id = %connection_id, actor_id = %actor_id, "New connection established");
    connection_id
}

/// 연결 해제 처리. 방에 있었으면 나가기까지 수행한다.
/// 세션 제거가 원자적이므로 중복 호출은 조용히 끝난다.
pub fn handle_disconnect(state: &Arc<AppState>, connection_id: &str) {
    if let Some((_, session)) = state.connections.remove(connection_id) {
        let room_id = session.room_id.lock().take();
        if let Some(room_id) = room_id {
            crate::handlers::party::remove_member(
                state,
                &room_id,
                &session.actor_id,
                Some(connection_id),
            );
        }
        tracing::info!(connection_id = %connection_id, actor_id = %session.actor_id, "Connection closed");
    }
}

/// ping 응답
pub fn handle_ping(sender: &Sender<ServerMessage>) {
    let _ = sender.try_send(ServerMessage::Pong {});
}
