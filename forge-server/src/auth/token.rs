//! Opaque session credentials: an HMAC-signed `user:expiry` pair. Stateless
//! to validate, so the WebSocket handshake never touches the store.

use base64::prelude::*;
use hmac::{Hmac, Mac};
use protocol::ids::UserId;
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Credential lifetime: 7 days.
pub const TOKEN_TTL_MS: u64 = 7 * 24 * 60 * 60 * 1000;

/// Why a credential was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("malformed credential")]
    Malformed,
    #[error("bad signature")]
    BadSignature,
    #[error("credential expired")]
    Expired,
    #[error("credential revoked")]
    Revoked,
}

impl AuthError {
    /// The matching wire error code.
    pub fn code(&self) -> protocol::ErrorCode {
        match self {
            AuthError::Expired => protocol::ErrorCode::AuthExpired,
            _ => protocol::ErrorCode::AuthInvalid,
        }
    }
}

/// Signs and validates session credentials with the configured secret.
pub struct SessionKey {
    secret: Vec<u8>,
}

impl SessionKey {
    pub fn new(secret: &str) -> Self {
        Self { secret: secret.as_bytes().to_vec() }
    }

    fn mac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(&self.secret).expect("hmac accepts any key length")
    }

    /// Issues a credential for the user, valid until `now + TOKEN_TTL_MS`.
    pub fn issue(&self, user_id: UserId, now_ms: u64) -> String {
        let payload = format!("{}:{}", user_id, now_ms + TOKEN_TTL_MS);
        let mut mac = self.mac();
        mac.update(payload.as_bytes());
        let signature = mac.finalize().into_bytes();
        format!(
            "{}.{}",
            BASE64_URL_SAFE_NO_PAD.encode(payload.as_bytes()),
            BASE64_URL_SAFE_NO_PAD.encode(signature)
        )
    }

    /// Validates a credential and resolves the user it was issued for.
    pub fn validate(&self, token: &str, now_ms: u64) -> Result<UserId, AuthError> {
        let (payload_b64, signature_b64) =
            token.split_once('.').ok_or(AuthError::Malformed)?;
        let payload = BASE64_URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| AuthError::Malformed)?;
        let signature = BASE64_URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|_| AuthError::Malformed)?;

        let mut mac = self.mac();
        mac.update(&payload);
        mac.verify_slice(&signature)
            .map_err(|_| AuthError::BadSignature)?;

        let payload = String::from_utf8(payload).map_err(|_| AuthError::Malformed)?;
        let (user_raw, expiry_raw) =
            payload.split_once(':').ok_or(AuthError::Malformed)?;
        let user_id = UserId::parse(user_raw).ok_or(AuthError::Malformed)?;
        let expiry: u64 = expiry_raw.parse().map_err(|_| AuthError::Malformed)?;
        if now_ms >= expiry {
            return Err(AuthError::Expired);
        }
        Ok(user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_credentials_validate_to_the_user() {
        let key = SessionKey::new("secret");
        let user = UserId::generate();
        let token = key.issue(user, 1000);
        assert_eq!(key.validate(&token, 2000), Ok(user));
    }

    #[test]
    fn expiry_is_enforced() {
        let key = SessionKey::new("secret");
        let token = key.issue(UserId::generate(), 0);
        assert_eq!(key.validate(&token, TOKEN_TTL_MS), Err(AuthError::Expired));
        assert!(key.validate(&token, TOKEN_TTL_MS - 1).is_ok());
    }

    #[test]
    fn tampering_is_detected() {
        let key = SessionKey::new("secret");
        let token = key.issue(UserId::generate(), 0);
        let (payload, signature) = token.split_once('.').unwrap();

        // Forged payload with the original signature.
        let other = key.issue(UserId::generate(), 0);
        let (other_payload, _) = other.split_once('.').unwrap();
        let forged = format!("{other_payload}.{signature}");
        assert_eq!(key.validate(&forged, 1), Err(AuthError::BadSignature));

        // Signature from a different secret.
        let wrong_key = SessionKey::new("other-secret");
        assert_eq!(wrong_key.validate(&token, 1), Err(AuthError::BadSignature));

        // Garbage.
        assert_eq!(key.validate("not-a-token", 1), Err(AuthError::Malformed));
        assert_eq!(key.validate(payload, 1), Err(AuthError::Malformed));
    }
}
