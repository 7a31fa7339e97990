//! 에러 타입 정의

use thiserror::Error;

use crate::protocol::ServerMessage;

/// 세션 중 발생하는 파티 에러. 에러 봉투로 요청한 연결에만 전송된다.
#[derive(Debug, Error)]
pub enum PartyError {
    /// 봉투 해석 실패 또는 잘못된 페이로드
    #[error("{0}")]
    Protocol(String),

    /// 존재하지 않는 방
    #[error("room not found")]
    RoomNotFound,

    /// 호스트 전용 동작을 비호스트가 요청
    #[error("only the host can control playback")]
    NotHost,

    /// 방에 속하지 않은 연결의 방 내부 동작 요청
    #[error("not a member of any room")]
    NotAMember,
}

impl PartyError {
    /// 클라이언트가 분기할 수 있는 안정적인 에러 코드
    pub fn code(&self) -> &'static str {
        match self {
            PartyError::Protocol(_) => "PROTOCOL_ERROR",
            PartyError::RoomNotFound => "ROOM_NOT_FOUND",
            PartyError::NotHost => "NOT_HOST",
            PartyError::NotAMember => "NOT_A_MEMBER",
        }
    }

    /// 에러 봉투 메시지로 변환
    pub fn to_message(&self) -> ServerMessage {
        ServerMessage::Error {
            code: self.code().to_string(),
            message: self.to_string(),
        }
    }
}
