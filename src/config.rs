//! 환경 변수 기반 설정 관리

use std::env;

/// 서버 설정
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub host: String,
    pub cors_origins: Vec<String>,
    pub party: PartyConfig,
    pub auth: AuthConfig,
    pub log_level: String,
}

/// 파티(방) 설정
#[derive(Debug, Clone)]
pub struct PartyConfig {
    /// 방마다 보관하는 채팅 메시지 수
    pub chat_history: usize,
    /// 채팅 메시지 최대 길이 (문자 수)
    pub chat_max_len: usize,
    /// 연결별 송신 큐 용량 (최소 1)
    pub send_queue: usize,
}

/// 인증 티켓 설정
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// HMAC 서명 비밀키. 비어 있으면 개발 모드 (토큰 = actor id)
    pub ticket_secret: String,
}

impl Config {
    /// 환경 변수에서 설정 로드
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            port: env::var("PORT")
                .unwrap_or_else(|_| "5604".to_string())
                .parse()
                .unwrap_or(5604),
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            cors_origins: env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "http://localhost:3500".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            party: PartyConfig {
                chat_history: env::var("PARTY_CHAT_HISTORY")
                    .unwrap_or_else(|_| "50".to_string())
                    .parse()
                    .unwrap_or(50),
                chat_max_len: env::var("PARTY_CHAT_MAX_LEN")
                    .unwrap_or_else(|_| "500".to_string())
                    .parse()
                    .unwrap_or(500),
                // 0이면 송신 채널 생성이 패닉하므로 최소 1로 보정
                send_queue: env::var("PARTY_SEND_QUEUE")
                    .unwrap_or_else(|_| "256".to_string())
                    .parse()
                    .unwrap_or(256)
                    .max(1),
            },
            auth: AuthConfig {
                ticket_secret: env::var("AUTH_TICKET_SECRET").unwrap_or_default(),
            },
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        }
    }
}
