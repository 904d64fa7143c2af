//! The wire protocol shared between the server and its clients.
//! Contains the message envelope, the client and server message unions,
//! the delta operations for incremental state sync and the protocol limits.

pub mod client;
pub mod delta;
pub mod envelope;
pub mod error;
pub mod game;
pub mod ids;
pub mod limits;
pub mod server;

pub use client::{ClientMessage, DmCommand, GameAction};
pub use delta::{DeltaOp, StateDelta};
pub use envelope::{ClientEnvelope, ServerEnvelope};
pub use error::ErrorCode;
pub use game::*;
pub use ids::{CharacterId, SessionId, UserId};
pub use limits::MessageClass;
pub use server::ServerMessage;

/// The buffer size for the per-connection outbound queue and the session command queues.
pub const CHANNEL_BUFFER_SIZE: usize = 256;

/// Seconds a fresh connection has to present a valid `auth` message.
pub const AUTH_DEADLINE_SECS: u64 = 5;

/// Close code sent when the first frame was not an `auth` message or the deadline expired.
pub const CLOSE_AUTH_REQUIRED: u16 = 4001;

/// Close code sent when the presented credential was rejected.
pub const CLOSE_AUTH_REJECTED: u16 = 4002;

/// Interval of the server side keepalive ping.
pub const KEEPALIVE_INTERVAL_SECS: u64 = 30;

/// Seconds after a keepalive ping without any sign of life before the connection is dropped.
pub const PONG_TIMEOUT_SECS: u64 = 10;

/// Seconds a disconnected player keeps their seat and unit before consequences apply.
pub const DISCONNECT_GRACE_SECS: u64 = 30;

/// Seconds a session may have zero connected members before it is ended.
pub const SESSION_IDLE_TIMEOUT_SECS: u64 = 600;

/// The join code alphabet. Ambiguous glyphs (I, O, 0, 1) are left out.
pub const JOIN_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// The length of a join code.
pub const JOIN_CODE_LEN: usize = 6;

/// Maximum accepted chat message length in characters.
pub const CHAT_MAX_LEN: usize = 500;

/// Maximum accepted size of a single inbound frame in bytes.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;
