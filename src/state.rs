//! 애플리케이션 상태 관리
//!
//! 락 순서: 방 엔트리(DashMap 샤드) → 방 내부 락(`Room::inner`).
//! 맵 가드를 들고 있는 동안 다른 맵에 접근하지 않는다.
//! 락을 잡은 구간에서는 await하지 않는다.

use crate::auth::TicketAuthenticator;
use crate::config::Config;
use crate::protocol::{ChatMessage, MemberInfo, PlaybackState, ServerMessage};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc::Sender;

/// 전역 애플리케이션 상태
pub struct AppState {
    /// 방 정보 (room_id -> Room)
    pub rooms: DashMap<String, Room>,
    /// 연결 세션 (connection_id -> ConnectionSession)
    pub connections: DashMap<String, ConnectionSession>,
    /// 설정
    pub config: Arc<Config>,
    /// 핸드셰이크 티켓 검증기
    pub authenticator: TicketAuthenticator,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let authenticator = TicketAuthenticator::new(config.auth.ticket_secret.clone());
        Self {
            rooms: DashMap::new(),
            connections: DashMap::new(),
            config: Arc::new(config),
            authenticator,
        }
    }
}

/// 방 정보
pub struct Room {
    pub id: String,
    pub inner: Mutex<RoomInner>,
}

impl Room {
    /// 생성자를 첫 멤버(호스트)로 하는 방 생성
    pub fn new(id: String, host: Member) -> Self {
        let host_actor_id = host.actor_id.clone();
        let mut members = HashMap::new();
        members.insert(host_actor_id.clone(), host);
        Self {
            id,
            inner: Mutex::new(RoomInner {
                host_actor_id,
                members,
                playback: PlaybackState::initial(epoch_ms()),
                chat: VecDeque::new(),
                join_seq: 1,
            }),
        }
    }
}

/// 방 내부 상태. `Room::inner` 락 아래에서만 접근한다.
pub struct RoomInner {
    /// 현재 호스트의 actor id
    pub host_actor_id: String,
    /// 멤버십 (actor_id -> Member)
    pub members: HashMap<String, Member>,
    /// 공유 재생 상태
    pub playback: PlaybackState,
    /// 최근 채팅 기록 (오래된 것부터)
    pub chat: VecDeque<ChatMessage>,
    /// 입장 순서 카운터. 호스트 승계의 기준이 된다.
    pub join_seq: u64,
}

impl RoomInner {
    /// 다음 입장 순번 발급
    pub fn next_join_seq(&mut self) -> u64 {
        let seq = self.join_seq;
        self.join_seq += 1;
        seq
    }

    /// 전송용 멤버 목록. 입장 순서대로 정렬한다.
    pub fn member_infos(&self) -> Vec<MemberInfo> {
        let mut entries: Vec<&Member> = self.members.values().collect();
        entries.sort_by_key(|m| m.joined_at);
        entries
            .into_iter()
            .map(|m| MemberInfo {
                actor_id: m.actor_id.clone(),
                display_name: m.display_name.clone(),
                is_host: m.actor_id == self.host_actor_id,
            })
            .collect()
    }

    /// 남은 멤버 중 입장 순번이 가장 빠른 멤버를 호스트로 승격
    pub fn promote_next_host(&mut self) -> Option<String> {
        let next = self
            .members
            .values()
            .min_by_key(|m| m.joined_at)
            .map(|m| m.actor_id.clone())?;
        self.host_actor_id = next.clone();
        Some(next)
    }

    /// 채팅 기록에 추가하고 용량을 넘으면 오래된 것부터 제거
    pub fn push_chat(&mut self, message: ChatMessage, capacity: usize) {
        self.chat.push_back(message);
        while self.chat.len() > capacity {
            self.chat.pop_front();
        }
    }
}

/// 방 멤버. 실제 전송 채널을 들고 있다.
pub struct Member {
    pub actor_id: String,
    /// 이 멤버십을 소유한 연결. 재접속 시 교체된다.
    pub connection_id: String,
    pub display_name: String,
    /// 입장 순번 (작을수록 먼저 입장)
    pub joined_at: u64,
    pub sender: Sender<ServerMessage>,
}

/// 연결 세션 정보
pub struct ConnectionSession {
    pub id: String,
    /// 인증된 사용자 id
    pub actor_id: String,
    /// 현재 참여 중인 방. join/leave에서만 변경된다.
    pub room_id: Mutex<Option<String>>,
    pub established_at: u64,
}

/// 현재 시각 (epoch 밀리초)
pub fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
