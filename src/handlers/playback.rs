//! 재생 동기화 핸들러
//!
//! 호스트만 재생 상태를 바꿀 수 있다. 모든 변경은 증분이 아니라
//! 갱신된 전체 재생 상태로 방 전체(요청자 포함)에 에코된다.

use crate::error::PartyError;
use crate::protocol::ServerMessage;
use crate::state::{epoch_ms, AppState};
use std::sync::Arc;
use tokio::sync::mpsc::Sender;

use super::party::broadcast_members;

enum ControlAction {
    Play,
    Pause,
    Seek,
}

/// 재생 시작 처리
pub fn handle_play(
    state: &Arc<AppState>,
    connection_id: &str,
    actor_id: &str,
    sender: &Sender<ServerMessage>,
    position_seconds: Option<f64>,
) {
    control(
        state,
        connection_id,
        actor_id,
        sender,
        ControlAction::Play,
        position_seconds,
    );
}

/// 일시정지 처리
pub fn handle_pause(
    state: &Arc<AppState>,
    connection_id: &str,
    actor_id: &str,
    sender: &Sender<ServerMessage>,
    position_seconds: Option<f64>,
) {
    control(
        state,
        connection_id,
        actor_id,
        sender,
        ControlAction::Pause,
        position_seconds,
    );
}

/// 위치 이동 처리. 재생/정지 여부는 바꾸지 않는다.
pub fn handle_seek(
    state: &Arc<AppState>,
    connection_id: &str,
    actor_id: &str,
    sender: &Sender<ServerMessage>,
    position_seconds: f64,
) {
    control(
        state,
        connection_id,
        actor_id,
        sender,
        ControlAction::Seek,
        Some(position_seconds),
    );
}

/// 호스트 권한 확인 후 재생 상태를 갱신하고 방 전체에 에코
fn control(
    state: &Arc<AppState>,
    connection_id: &str,
    actor_id: &str,
    sender: &Sender<ServerMessage>,
    action: ControlAction,
    position_seconds: Option<f64>,
) {
    let room_id = match state.connections.get(connection_id) {
        Some(session) => session.room_id.lock().clone(),
        None => None,
    };
    let Some(room_id) = room_id else {
        let _ = sender.try_send(PartyError::NotAMember.to_message());
        return;
    };

    // 방이 이미 사라진 바인딩은 멤버가 아닌 것으로 취급한다
    let Some(room) = state.rooms.get(&room_id) else {
        let _ = sender.try_send(PartyError::NotAMember.to_message());
        return;
    };
    let mut inner = room.inner.lock();

    if !inner.members.contains_key(actor_id) {
        let _ = sender.try_send(PartyError::NotAMember.to_message());
        return;
    }
    if inner.host_actor_id != actor_id {
        // 비호스트 요청은 상태도 안 바꾸고 브로드캐스트도 하지 않는다
        let _ = sender.try_send(PartyError::NotHost.to_message());
        return;
    }

    if let Some(position) = position_seconds {
        inner.playback.position_seconds = position;
    }
    match action {
        ControlAction::Play => inner.playback.is_playing = true,
        ControlAction::Pause => inner.playback.is_playing = false,
        ControlAction::Seek => {}
    }
    inner.playback.last_sync_at = epoch_ms();

    let playback_state = inner.playback.clone();
    let message = match action {
        ControlAction::Play => ServerMessage::PartyPlay { playback_state },
        ControlAction::Pause => ServerMessage::PartyPause { playback_state },
        ControlAction::Seek => ServerMessage::PartySeek { playback_state },
    };
    broadcast_members(state, &inner, &message, None);

    tracing::debug!(
        room_id = %room_id,
        actor_id = %actor_id,
        is_playing = inner.playback.is_playing,
        position = inner.playback.position_seconds,
        "Playback updated"
    );
}
