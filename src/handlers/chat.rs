//! 채팅 핸들러

use crate::error::PartyError;
use crate::protocol::{ChatMessage, ServerMessage};
use crate::state::{epoch_ms, AppState};
use std::sync::Arc;
use tokio::sync::mpsc::Sender;
use uuid::Uuid;

use super::party::broadcast_members;

/// 채팅 메시지 처리. 발신자를 포함한 모든 멤버에게 브로드캐스트하고
/// 방의 최근 기록에 남긴다.
pub fn handle_chat(
    state: &Arc<AppState>,
    connection_id: &str,
    actor_id: &str,
    sender: &Sender<ServerMessage>,
    text: &str,
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

    // 표시 이름은 보낸 시점의 멤버십에서 가져온다
    let Some(member) = inner.members.get(actor_id) else {
        let _ = sender.try_send(PartyError::NotAMember.to_message());
        return;
    };
    let display_name = member.display_name.clone();

    let message = ChatMessage {
        message_id: Uuid::new_v4().to_string(),
        actor_id: actor_id.to_string(),
        display_name,
        text: truncate_chars(text, state.config.party.chat_max_len),
        sent_at: epoch_ms(),
    };

    inner.push_chat(message.clone(), state.config.party.chat_history);
    broadcast_members(state, &inner, &ServerMessage::PartyChat(message), None);

    tracing::debug!(room_id = %room_id, actor_id = %actor_id, "Chat relayed");
}

/// 문자 수 기준으로 자른다. UTF-8 문자 경계를 지킨다.
fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => text[..index].to_string(),
        None => text.to_string(),
    }
}
