//! 클라이언트-서버 메시지 프로토콜 정의
//!
//! 모든 메시지는 `{"type": "<verb>", "data": {...}}` 형태의 JSON이며
//! 페이로드 필드는 camelCase를 사용한다.

use serde::{Deserialize, Serialize};

/// 클라이언트 → 서버 메시지
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientMessage {
    // Party Management
    #[serde(rename = "party.create", rename_all = "camelCase")]
    PartyCreate { display_name: String },
    #[serde(rename = "party.join", rename_all = "camelCase")]
    PartyJoin {
        room_id: String,
        display_name: String,
    },
    #[serde(rename = "party.leave")]
    PartyLeave {},

    // Playback Control (호스트 전용)
    #[serde(rename = "party.play", rename_all = "camelCase")]
    PartyPlay { position_seconds: Option<f64> },
    #[serde(rename = "party.pause", rename_all = "camelCase")]
    PartyPause { position_seconds: Option<f64> },
    #[serde(rename = "party.seek", rename_all = "camelCase")]
    PartySeek { position_seconds: f64 },

    // Chat
    #[serde(rename = "party.chat")]
    PartyChat { text: String },

    // Connection
    #[serde(rename = "ping")]
    Ping {},
}

/// 서버 → 클라이언트 메시지
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerMessage {
    // Connection
    #[serde(rename = "connect.ack", rename_all = "camelCase")]
    ConnectAck {
        connection_id: String,
        actor_id: String,
    },
    #[serde(rename = "error")]
    Error { code: String, message: String },
    #[serde(rename = "pong")]
    Pong {},

    // Party Events
    #[serde(rename = "party.created", rename_all = "camelCase")]
    PartyCreated { room_id: String, is_host: bool },
    #[serde(rename = "party.sync", rename_all = "camelCase")]
    PartySync {
        playback_state: PlaybackState,
        members: Vec<MemberInfo>,
        chat_history: Vec<ChatMessage>,
    },
    #[serde(rename = "party.members")]
    PartyMembers {
        action: MemberAction,
        members: Vec<MemberInfo>,
    },

    // Playback Echo
    #[serde(rename = "party.play", rename_all = "camelCase")]
    PartyPlay { playback_state: PlaybackState },
    #[serde(rename = "party.pause", rename_all = "camelCase")]
    PartyPause { playback_state: PlaybackState },
    #[serde(rename = "party.seek", rename_all = "camelCase")]
    PartySeek { playback_state: PlaybackState },

    // Chat
    #[serde(rename = "party.chat")]
    PartyChat(ChatMessage),
}

/// 멤버십 변경 종류
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberAction {
    Joined,
    Left,
    HostChanged,
}

/// 재생 상태. 서버는 보간하지 않고 마지막 동기화 시점의 쌍을 그대로 전달한다.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackState {
    pub is_playing: bool,
    pub position_seconds: f64,
    /// epoch 밀리초
    pub last_sync_at: u64,
}

impl PlaybackState {
    /// 일시정지 0초 상태
    pub fn initial(now_ms: u64) -> Self {
        Self {
            is_playing: false,
            position_seconds: 0.0,
            last_sync_at: now_ms,
        }
    }
}

/// 멤버 정보 (전송용)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberInfo {
    pub actor_id: String,
    pub display_name: String,
    pub is_host: bool,
}

/// 채팅 메시지
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub message_id: String,
    pub actor_id: String,
    pub display_name: String,
    pub text: String,
    /// epoch 밀리초
    pub sent_at: u64,
}
