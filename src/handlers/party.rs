//! 파티(방) 관리 핸들러

use crate::error::PartyError;
use crate::protocol::{MemberAction, ServerMessage};
use crate::state::{AppState, Member, Room, RoomInner};
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use tokio::sync::mpsc::Sender;
use uuid::Uuid;

/// 방 생성 처리. 생성자가 유일한 멤버이자 호스트가 된다.
pub fn handle_create(
    state: &Arc<AppState>,
    connection_id: &str,
    actor_id: &str,
    sender: &Sender<ServerMessage>,
    display_name: &str,
) {
    // 이미 방에 있으면 먼저 나간다
    leave_current_room(state, connection_id, actor_id);

    let room_id = Uuid::new_v4().to_string();
    let host = Member {
        actor_id: actor_id.to_string(),
        connection_id: connection_id.to_string(),
        display_name: display_name.to_string(),
        joined_at: 0,
        sender: sender.clone(),
    };
    state
        .rooms
        .insert(room_id.clone(), Room::new(room_id.clone(), host));

    if !bind_session_room(state, connection_id, &room_id) {
        // 생성 도중 연결이 해제됨: 방금 만든 방을 정리
        remove_member(state, &room_id, actor_id, Some(connection_id));
        return;
    }

    let _ = sender.try_send(ServerMessage::PartyCreated {
        room_id: room_id.clone(),
        is_host: true,
    });

    tracing::info!(room_id = %room_id, actor_id = %actor_id, "Room created");
}

/// 방 참여 처리. 참여자는 전체 상태 스냅샷을 받고
/// 기존 멤버들은 입장 알림을 받는다.
pub fn handle_join(
    state: &Arc<AppState>,
    connection_id: &str,
    actor_id: &str,
    sender: &Sender<ServerMessage>,
    room_id: &str,
    display_name: &str,
) {
    let room_id = room_id.trim().to_string();

    // 대상 방부터 확인한다. 실패한 참여는 기존 멤버십을 건드리지 않는다.
    if !state.rooms.contains_key(&room_id) {
        let _ = sender.try_send(PartyError::RoomNotFound.to_message());
        return;
    }

    // 다른 방에 있었다면 먼저 나간다
    let previous = match state.connections.get(connection_id) {
        Some(session) => session.room_id.lock().clone(),
        None => None,
    };
    if let Some(previous_room) = previous {
        if previous_room != room_id {
            leave_current_room(state, connection_id, actor_id);
        }
    }

    let replaced = {
        // 확인과 참여 사이에 방이 사라질 수 있다
        let Some(room) = state.rooms.get(&room_id) else {
            let _ = sender.try_send(PartyError::RoomNotFound.to_message());
            return;
        };
        let mut inner = room.inner.lock();

        let replaced = match inner.members.get_mut(actor_id) {
            Some(member) => {
                // 재접속: 멤버십을 새 연결로 교체하고 입장 순번은 유지
                member.connection_id = connection_id.to_string();
                member.display_name = display_name.to_string();
                member.sender = sender.clone();
                true
            }
            None => false,
        };
        if !replaced {
            let joined_at = inner.next_join_seq();
            inner.members.insert(
                actor_id.to_string(),
                Member {
                    actor_id: actor_id.to_string(),
                    connection_id: connection_id.to_string(),
                    display_name: display_name.to_string(),
                    joined_at,
                    sender: sender.clone(),
                },
            );
        }

        // 참여자에게 전체 상태 스냅샷 전송
        let _ = sender.try_send(ServerMessage::PartySync {
            playback_state: inner.playback.clone(),
            members: inner.member_infos(),
            chat_history: inner.chat.iter().cloned().collect(),
        });

        if !replaced {
            // 기존 멤버들에게 입장 알림
            broadcast_members(
                state,
                &inner,
                &ServerMessage::PartyMembers {
                    action: MemberAction::Joined,
                    members: inner.member_infos(),
                },
                Some(actor_id),
            );
        }
        replaced
    };

    if !bind_session_room(state, connection_id, &room_id) {
        // 참여 도중 연결이 해제됨: 멤버십을 되돌린다
        remove_member(state, &room_id, actor_id, Some(connection_id));
        return;
    }

    tracing::info!(
        room_id = %room_id,
        actor_id = %actor_id,
        replaced = replaced,
        "User joined room"
    );
}

/// 방 나가기 처리
pub fn handle_leave(
    state: &Arc<AppState>,
    connection_id: &str,
    actor_id: &str,
    sender: &Sender<ServerMessage>,
) {
    let room_id = match state.connections.get(connection_id) {
        Some(session) => session.room_id.lock().take(),
        None => None,
    };

    match room_id {
        Some(room_id) => remove_member(state, &room_id, actor_id, Some(connection_id)),
        None => {
            let _ = sender.try_send(PartyError::NotAMember.to_message());
        }
    }
}

/// 멤버 제거. 호스트가 나가면 남은 멤버 중 입장 순번이 가장 빠른
/// 멤버를 승격하고, 마지막 멤버가 나가면 같은 임계 구역에서 방을
/// 삭제해 빈 방이 조회되는 틈을 없앤다.
///
/// `connection_id`가 주어지면 그 연결이 소유한 멤버십일 때만 제거한다.
/// 재접속으로 교체된 옛 연결이 현재 멤버를 쫓아내지 못하게 하기 위함이다.
pub fn remove_member(
    state: &Arc<AppState>,
    room_id: &str,
    actor_id: &str,
    connection_id: Option<&str>,
) {
    if let Entry::Occupied(room_entry) = state.rooms.entry(room_id.to_string()) {
        let mut delete_room = false;
        {
            let mut inner = room_entry.get().inner.lock();

            let owns_membership = match inner.members.get(actor_id) {
                Some(member) => connection_id.map_or(true, |cid| member.connection_id == cid),
                None => false,
            };
            if !owns_membership {
                return;
            }

            inner.members.remove(actor_id);

            if inner.members.is_empty() {
                delete_room = true;
            } else {
                let new_host = if inner.host_actor_id == actor_id {
                    inner.promote_next_host()
                } else {
                    None
                };

                broadcast_members(
                    state,
                    &inner,
                    &ServerMessage::PartyMembers {
                        action: MemberAction::Left,
                        members: inner.member_infos(),
                    },
                    None,
                );

                if let Some(new_host) = new_host {
                    broadcast_members(
                        state,
                        &inner,
                        &ServerMessage::PartyMembers {
                            action: MemberAction::HostChanged,
                            members: inner.member_infos(),
                        },
                        None,
                    );
                    tracing::info!(room_id = %room_id, new_host = %new_host, "Host migrated");
                }
            }

            tracing::info!(
                actor_id = %actor_id,
                room_id = %room_id,
                remaining = inner.members.len(),
                "User left room"
            );
        }
        if delete_room {
            room_entry.remove();
            tracing::info!(room_id = %room_id, "Room deleted");
        }
    }
}

/// 방 멤버들에게 메시지 브로드캐스트. `exclude_actor`는 건너뛴다.
/// 송신 큐가 가득 찼거나 닫힌 연결은 건너뛰고 해제를 예약한다.
pub fn broadcast_members(
    state: &Arc<AppState>,
    inner: &RoomInner,
    message: &ServerMessage,
    exclude_actor: Option<&str>,
) {
    for (member_actor_id, member) in inner.members.iter() {
        if exclude_actor == Some(member_actor_id.as_str()) {
            continue;
        }
        if member.sender.try_send(message.clone()).is_err() {
            tracing::warn!(
                actor_id = %member_actor_id,
                connection_id = %member.connection_id,
                "Send queue full or closed, scheduling release"
            );
            let state = Arc::clone(state);
            let connection_id = member.connection_id.clone();
            tokio::spawn(async move {
                crate::handlers::connection::handle_disconnect(&state, &connection_id);
            });
        }
    }
}

/// 세션에 현재 방을 기록. 연결이 이미 해제됐으면 false를 반환한다.
fn bind_session_room(state: &Arc<AppState>, connection_id: &str, room_id: &str) -> bool {
    match state.connections.get(connection_id) {
        Some(session) => {
            *session.room_id.lock() = Some(room_id.to_string());
            true
        }
        None => false,
    }
}

/// 세션이 방에 들어가 있으면 나가기 처리
fn leave_current_room(state: &Arc<AppState>, connection_id: &str, actor_id: &str) {
    let room_id = match state.connections.get(connection_id) {
        Some(session) => session.room_id.lock().take(),
        None => None,
    };
    if let Some(room_id) = room_id {
        remove_member(state, &room_id, actor_id, Some(connection_id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthConfig, Config, PartyConfig};
    use crate::handlers::connection::{handle_connection, handle_disconnect};
    use tokio::sync::mpsc;

    fn test_state() -> Arc<AppState> {
        Arc::new(AppState::new(Config {
            port: 0,
            host: "127.0.0.1".to_string(),
            cors_origins: vec![],
            party: PartyConfig {
                chat_history: 50,
                chat_max_len: 500,
                send_queue: 32,
            },
            auth: AuthConfig {
                ticket_secret: String::new(),
            },
            log_level: "info".to_string(),
        }))
    }

    fn connect(
        state: &Arc<AppState>,
        actor_id: &str,
    ) -> (
        String,
        mpsc::Sender<ServerMessage>,
        mpsc::Receiver<ServerMessage>,
    ) {
        let (tx, rx) = mpsc::channel(32);
        let connection_id = handle_connection(state, actor_id, tx.clone());
        (connection_id, tx, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    fn created_room_id(rx: &mut mpsc::Receiver<ServerMessage>) -> String {
        for msg in drain(rx) {
            if let ServerMessage::PartyCreated { room_id, .. } = msg {
                return room_id;
            }
        }
        panic!("no party.created message");
    }

    fn last_error_code(rx: &mut mpsc::Receiver<ServerMessage>) -> String {
        let mut code = None;
        for msg in drain(rx) {
            if let ServerMessage::Error { code: c, .. } = msg {
                code = Some(c);
            }
        }
        code.expect("no error message")
    }

    #[test]
    fn create_makes_creator_sole_host() {
        let state = test_state();
        let (conn, tx, mut rx) = connect(&state, "alice");

        handle_create(&state, &conn, "alice", &tx, "Alice");

        let messages = drain(&mut rx);
        assert!(matches!(messages[0], ServerMessage::ConnectAck { .. }));
        match &messages[1] {
            ServerMessage::PartyCreated { room_id, is_host } => {
                assert!(*is_host);
                let room = state.rooms.get(room_id).expect("room exists");
                let inner = room.inner.lock();
                assert_eq!(inner.host_actor_id, "alice");
                assert_eq!(inner.members.len(), 1);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn join_sends_full_snapshot_to_joiner() {
        let state = test_state();
        let (conn_a, tx_a, mut rx_a) = connect(&state, "alice");
        handle_create(&state, &conn_a, "alice", &tx_a, "Alice");
        let room_id = created_room_id(&mut rx_a);

        let (conn_b, tx_b, mut rx_b) = connect(&state, "bob");
        handle_join(&state, &conn_b, "bob", &tx_b, &room_id, "Bob");

        let messages = drain(&mut rx_b);
        match &messages[1] {
            ServerMessage::PartySync {
                playback_state,
                members,
                chat_history,
            } => {
                assert!(!playback_state.is_playing);
                assert_eq!(playback_state.position_seconds, 0.0);
                assert_eq!(members.len(), 2);
                assert_eq!(members[0].actor_id, "alice");
                assert!(members[0].is_host);
                assert_eq!(members[1].actor_id, "bob");
                assert!(!members[1].is_host);
                assert!(chat_history.is_empty());
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn join_notifies_existing_members_only() {
        let state = test_state();
        let (conn_a, tx_a, mut rx_a) = connect(&state, "alice");
        handle_create(&state, &conn_a, "alice", &tx_a, "Alice");
        let room_id = created_room_id(&mut rx_a);

        let (conn_b, tx_b, mut rx_b) = connect(&state, "bob");
        handle_join(&state, &conn_b, "bob", &tx_b, &room_id, "Bob");

        let messages = drain(&mut rx_a);
        match &messages[0] {
            ServerMessage::PartyMembers { action, members } => {
                assert!(matches!(action, MemberAction::Joined));
                assert_eq!(members.len(), 2);
            }
            other => panic!("unexpected message: {:?}", other),
        }

        // 참여자 본인은 입장 알림 대신 스냅샷만 받는다
        let bob_messages = drain(&mut rx_b);
        assert!(!bob_messages
            .iter()
            .any(|m| matches!(m, ServerMessage::PartyMembers { .. })));
    }

    #[test]
    fn join_unknown_room_fails() {
        let state = test_state();
        let (conn, tx, mut rx) = connect(&state, "bob");

        handle_join(&state, &conn, "bob", &tx, "no-such-room", "Bob");
        assert_eq!(last_error_code(&mut rx), "ROOM_NOT_FOUND");
        let session = state.connections.get(&conn).unwrap();
        assert!(session.room_id.lock().is_none());
    }

    #[test]
    fn failed_join_keeps_current_room_intact() {
        let state = test_state();
        let (conn, tx, mut rx) = connect(&state, "alice");
        handle_create(&state, &conn, "alice", &tx, "Alice");
        let room_id = created_room_id(&mut rx);

        handle_join(&state, &conn, "alice", &tx, "no-such-room", "Alice");
        assert_eq!(last_error_code(&mut rx), "ROOM_NOT_FOUND");

        // 실패한 참여가 기존 방과 세션 바인딩을 건드리면 안 된다
        {
            let room = state.rooms.get(&room_id).expect("room survives failed join");
            let inner = room.inner.lock();
            assert_eq!(inner.host_actor_id, "alice");
            assert!(inner.members.contains_key("alice"));
        }
        let session = state.connections.get(&conn).unwrap();
        assert_eq!(session.room_id.lock().as_deref(), Some(room_id.as_str()));
    }

    #[test]
    fn leave_promotes_earliest_joined_member() {
        let state = test_state();
        let (conn_a, tx_a, mut rx_a) = connect(&state, "alice");
        handle_create(&state, &conn_a, "alice", &tx_a, "Alice");
        let room_id = created_room_id(&mut rx_a);

        let (conn_b, tx_b, mut rx_b) = connect(&state, "bob");
        handle_join(&state, &conn_b, "bob", &tx_b, &room_id, "Bob");
        let (conn_c, tx_c, mut rx_c) = connect(&state, "carol");
        handle_join(&state, &conn_c, "carol", &tx_c, &room_id, "Carol");

        drain(&mut rx_b);
        drain(&mut rx_c);
        handle_leave(&state, &conn_a, "alice", &tx_a);

        {
            let room = state.rooms.get(&room_id).expect("room still exists");
            let inner = room.inner.lock();
            assert_eq!(inner.host_actor_id, "bob");
            assert_eq!(inner.members.len(), 2);
        }

        // 남은 멤버들은 퇴장 알림과 호스트 변경 알림을 순서대로 받는다
        let messages = drain(&mut rx_c);
        match &messages[0] {
            ServerMessage::PartyMembers { action, members } => {
                assert!(matches!(action, MemberAction::Left));
                assert_eq!(members.len(), 2);
            }
            other => panic!("unexpected message: {:?}", other),
        }
        match &messages[1] {
            ServerMessage::PartyMembers { action, members } => {
                assert!(matches!(action, MemberAction::HostChanged));
                let host: Vec<&str> = members
                    .iter()
                    .filter(|m| m.is_host)
                    .map(|m| m.actor_id.as_str())
                    .collect();
                assert_eq!(host, vec!["bob"]);
            }
            other => panic!("unexpected message: {:?}", other),
        }

        // 한 번 더 나가면 carol이 호스트가 된다
        drain(&mut rx_b);
        handle_leave(&state, &conn_b, "bob", &tx_b);
        let room = state.rooms.get(&room_id).expect("room still exists");
        let inner = room.inner.lock();
        assert_eq!(inner.host_actor_id, "carol");
    }

    #[test]
    fn last_leave_deletes_room() {
        let state = test_state();
        let (conn, tx, mut rx) = connect(&state, "alice");
        handle_create(&state, &conn, "alice", &tx, "Alice");
        let room_id = created_room_id(&mut rx);

        handle_leave(&state, &conn, "alice", &tx);
        assert!(state.rooms.get(&room_id).is_none());

        // 삭제된 방 id로는 다시 들어갈 수 없다
        let (conn_b, tx_b, mut rx_b) = connect(&state, "bob");
        handle_join(&state, &conn_b, "bob", &tx_b, &room_id, "Bob");
        assert_eq!(last_error_code(&mut rx_b), "ROOM_NOT_FOUND");
    }

    #[test]
    fn leave_without_room_fails() {
        let state = test_state();
        let (conn, tx, mut rx) = connect(&state, "alice");

        handle_leave(&state, &conn, "alice", &tx);
        assert_eq!(last_error_code(&mut rx), "NOT_A_MEMBER");
    }

    #[test]
    fn rejoin_replaces_membership_without_join_broadcast() {
        let state = test_state();
        let (conn_a, tx_a, mut rx_a) = connect(&state, "alice");
        handle_create(&state, &conn_a, "alice", &tx_a, "Alice");
        let room_id = created_room_id(&mut rx_a);

        let (conn_b, tx_b, mut rx_b) = connect(&state, "bob");
        handle_join(&state, &conn_b, "bob", &tx_b, &room_id, "Bob");
        drain(&mut rx_a);

        // alice가 새 탭(새 연결)으로 같은 방에 다시 들어온다
        let (conn_a2, tx_a2, mut rx_a2) = connect(&state, "alice");
        handle_join(&state, &conn_a2, "alice", &tx_a2, &room_id, "Alice");

        {
            let room = state.rooms.get(&room_id).unwrap();
            let inner = room.inner.lock();
            assert_eq!(inner.members.len(), 2);
            let alice = inner.members.get("alice").unwrap();
            assert_eq!(alice.connection_id, conn_a2);
            // 입장 순번이 유지되어 호스트 승계 순서가 바뀌지 않는다
            assert_eq!(alice.joined_at, 0);
            assert_eq!(inner.host_actor_id, "alice");
        }

        // 교체는 입장 알림을 만들지 않는다
        assert!(!drain(&mut rx_b)
            .iter()
            .any(|m| matches!(m, ServerMessage::PartyMembers { .. })));

        // 새 연결은 스냅샷을 받는다
        assert!(drain(&mut rx_a2)
            .iter()
            .any(|m| matches!(m, ServerMessage::PartySync { .. })));
    }

    #[test]
    fn stale_connection_release_keeps_replacement() {
        let state = test_state();
        let (conn_a, tx_a, mut rx_a) = connect(&state, "alice");
        handle_create(&state, &conn_a, "alice", &tx_a, "Alice");
        let room_id = created_room_id(&mut rx_a);

        let (conn_a2, tx_a2, _rx_a2) = connect(&state, "alice");
        handle_join(&state, &conn_a2, "alice", &tx_a2, &room_id, "Alice");

        // 교체된 옛 연결이 끊겨도 현재 멤버십은 남는다
        handle_disconnect(&state, &conn_a);
        {
            let room = state.rooms.get(&room_id).expect("room survives");
            let inner = room.inner.lock();
            assert!(inner.members.contains_key("alice"));
        }

        // 현재 연결이 끊기면 방이 사라진다
        handle_disconnect(&state, &conn_a2);
        assert!(state.rooms.get(&room_id).is_none());
    }

    #[test]
    fn disconnect_of_member_acts_as_leave() {
        let state = test_state();
        let (conn_a, tx_a, mut rx_a) = connect(&state, "alice");
        handle_create(&state, &conn_a, "alice", &tx_a, "Alice");
        let room_id = created_room_id(&mut rx_a);

        let (conn_b, tx_b, mut rx_b) = connect(&state, "bob");
        handle_join(&state, &conn_b, "bob", &tx_b, &room_id, "Bob");
        drain(&mut rx_b);

        handle_disconnect(&state, &conn_a);

        let room = state.rooms.get(&room_id).unwrap();
        assert_eq!(room.inner.lock().host_actor_id, "bob");

        let messages = drain(&mut rx_b);
        assert!(messages
            .iter()
            .any(|m| matches!(m, ServerMessage::PartyMembers { action: MemberAction::Left, .. })));
        assert!(messages.iter().any(
            |m| matches!(m, ServerMessage::PartyMembers { action: MemberAction::HostChanged, .. })
        ));
    }

    #[test]
    fn create_while_in_room_leaves_previous_room() {
        let state = test_state();
        let (conn, tx, mut rx) = connect(&state, "alice");
        handle_create(&state, &conn, "alice", &tx, "Alice");
        let first_room = created_room_id(&mut rx);

        handle_create(&state, &conn, "alice", &tx, "Alice");
        let second_room = created_room_id(&mut rx);

        assert!(state.rooms.get(&first_room).is_none());
        assert!(state.rooms.get(&second_room).is_some());
        let session = state.connections.get(&conn).unwrap();
        assert_eq!(session.room_id.lock().as_deref(), Some(second_room.as_str()));
    }

    #[test]
    fn join_other_room_leaves_previous_room() {
        let state = test_state();
        let (conn_a, tx_a, mut rx_a) = connect(&state, "alice");
        handle_create(&state, &conn_a, "alice", &tx_a, "Alice");
        let room_a = created_room_id(&mut rx_a);

        let (conn_b, tx_b, mut rx_b) = connect(&state, "bob");
        handle_create(&state, &conn_b, "bob", &tx_b, "Bob");
        let room_b = created_room_id(&mut rx_b);

        handle_join(&state, &conn_a, "alice", &tx_a, &room_b, "Alice");

        // alice 혼자였던 방은 삭제되고 bob의 방 멤버가 된다
        assert!(state.rooms.get(&room_a).is_none());
        let room = state.rooms.get(&room_b).unwrap();
        let inner = room.inner.lock();
        assert_eq!(inner.members.len(), 2);
        assert_eq!(inner.host_actor_id, "bob");
    }

    #[tokio::test]
    async fn full_send_queue_schedules_release() {
        let state = test_state();
        let (conn_a, tx_a, mut rx_a) = connect(&state, "alice");
        handle_create(&state, &conn_a, "alice", &tx_a, "Alice");
        let room_id = created_room_id(&mut rx_a);

        // 용량 2짜리 연결: 접속 확인과 스냅샷만으로 큐가 가득 찬다
        let (tx_b, _rx_b) = mpsc::channel(2);
        let conn_b = handle_connection(&state, "bob", tx_b.clone());
        handle_join(&state, &conn_b, "bob", &tx_b, &room_id, "Bob");
        drain(&mut rx_a);

        // 세 번째 멤버의 입장 알림에서 bob의 큐가 넘쳐 해제가 예약된다
        let (conn_c, tx_c, _rx_c) = connect(&state, "carol");
        handle_join(&state, &conn_c, "carol", &tx_c, &room_id, "Carol");
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert!(!state.connections.contains_key(&conn_b));
        let room = state.rooms.get(&room_id).unwrap();
        let inner = room.inner.lock();
        assert!(!inner.members.contains_key("bob"));
        assert!(inner.members.contains_key("alice"));
        assert!(inner.members.contains_key("carol"));
    }
}
