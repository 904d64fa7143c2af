//! The error codes a client can receive. These are part of the wire contract.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The closed set of error codes of the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// The first frame was not an `auth` message, or none arrived in time.
    AuthRequired,
    /// The presented credential did not validate.
    AuthInvalid,
    /// The presented credential was valid once but has expired.
    AuthExpired,
    /// The caller is not allowed to do this.
    Forbidden,
    /// A DM command from someone who is not the DM.
    NotDm,
    /// A game action from a player who does not own the current turn.
    NotYourTurn,
    /// No session with this id or join code.
    GameNotFound,
    /// The session has reached its configured player limit.
    GameFull,
    /// The session already left the lobby and late join is off.
    GameAlreadyStarted,
    /// The action failed validation, or the frame itself was malformed.
    InvalidAction,
    /// No such character, or it belongs to someone else.
    CharacterNotFound,
    /// The rate limit for this message class was hit; the message was dropped.
    RateLimited,
    /// Something went wrong on the server side.
    InternalError,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The wire spelling doubles as the display form.
        let s = match self {
            ErrorCode::AuthRequired => "AUTH_REQUIRED",
            ErrorCode::AuthInvalid => "AUTH_INVALID",
            ErrorCode::AuthExpired => "AUTH_EXPIRED",
            ErrorCode::Forbidden => "FORBIDDEN",
            ErrorCode::NotDm => "NOT_DM",
            ErrorCode::NotYourTurn => "NOT_YOUR_TURN",
            ErrorCode::GameNotFound => "GAME_NOT_FOUND",
            ErrorCode::GameFull => "GAME_FULL",
            ErrorCode::GameAlreadyStarted => "GAME_ALREADY_STARTED",
            ErrorCode::InvalidAction => "INVALID_ACTION",
            ErrorCode::CharacterNotFound => "CHARACTER_NOT_FOUND",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_spelling_matches_display() {
        for code in [
            ErrorCode::AuthRequired,
            ErrorCode::NotYourTurn,
            ErrorCode::GameAlreadyStarted,
            ErrorCode::InternalError,
        ] {
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json, format!("\"{code}\""));
        }
    }
}
