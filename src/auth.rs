//! 핸드셰이크 티켓 검증
//!
//! 티켓 형식: `{actor_id}:{expiry}:{signature}`
//! signature는 `{actor_id}:{expiry}`에 대한 HMAC-SHA1을 base64로 인코딩한 값이다.
//! 발급은 외부 시스템이 담당하고 이 서버는 검증만 한다.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

type HmacSha1 = Hmac<Sha1>;

/// 티켓 검증 실패 사유. 핸드셰이크 단계에서 HTTP 401로 응답한다.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("malformed ticket")]
    Malformed,
    #[error("ticket expired")]
    Expired,
    #[error("invalid ticket signature")]
    InvalidSignature,
}

/// HMAC 티켓 검증기
pub struct TicketAuthenticator {
    secret: String,
}

impl TicketAuthenticator {
    pub fn new(secret: String) -> Self {
        Self { secret }
    }

    /// 티켓 검증 후 actor id 반환
    pub fn authenticate(&self, token: &str) -> Result<String, AuthError> {
        // 개발 모드: 비밀키가 없으면 토큰을 actor id로 그대로 사용
        if self.secret.is_empty() {
            if token.is_empty() {
                return Err(AuthError::Malformed);
            }
            return Ok(token.to_string());
        }

        // actor id에 콜론이 들어갈 수 있으므로 뒤에서부터 자른다
        let mut parts = token.rsplitn(3, ':');
        let signature = parts.next().ok_or(AuthError::Malformed)?;
        let expiry = parts.next().ok_or(AuthError::Malformed)?;
        let actor_id = parts.next().ok_or(AuthError::Malformed)?;
        if actor_id.is_empty() {
            return Err(AuthError::Malformed);
        }

        let expiry_time: u64 = expiry.parse().map_err(|_| AuthError::Malformed)?;
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();
        if expiry_time <= now {
            return Err(AuthError::Expired);
        }

        let mut mac = HmacSha1::new_from_slice(self.secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(format!("{}:{}", actor_id, expiry).as_bytes());
        let decoded = BASE64
            .decode(signature)
            .map_err(|_| AuthError::InvalidSignature)?;
        mac.verify_slice(&decoded)
            .map_err(|_| AuthError::InvalidSignature)?;

        Ok(actor_id.to_string())
    }

    /// 검증 가능한 티켓 서명 생성. 발급 시스템과 테스트가 참조하는 형식이다.
    pub fn sign(&self, actor_id: &str, expiry_time: u64) -> String {
        let mut mac = HmacSha1::new_from_slice(self.secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(format!("{}:{}", actor_id, expiry_time).as_bytes());
        let signature = BASE64.encode(mac.finalize().into_bytes());
        format!("{}:{}:{}", actor_id, expiry_time, signature)
    }
}
