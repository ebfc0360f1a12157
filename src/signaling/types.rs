use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_tungstenite::tungstenite::Utf8Bytes;

/// Signaling errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignalingError {
    #[error("room {room_id} is full (max {limit} participants)")]
    RoomFull { room_id: RoomId, limit: usize },

    #[error("internal error: {0}")]
    Internal(String),
}

impl SignalingError {
    /// Error code reported to a client whose join failed
    pub fn code(&self) -> ErrorCode {
        match self {
            SignalingError::RoomFull { .. } => ErrorCode::RoomFull,
            SignalingError::Internal(_) => ErrorCode::JoinFailed,
        }
    }
}

/// Codes carried by `error` events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    RoomFull,
    JoinFailed,
    InvalidMessage,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::RoomFull => "ROOM_FULL",
            ErrorCode::JoinFailed => "JOIN_FAILED",
            ErrorCode::InvalidMessage => "INVALID_MESSAGE",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Room identifier, supplied by clients
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RoomId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// User identifier, supplied by clients
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

const SESSION_PREFIX: &[u8] = b"sess_";
const SESSION_ID_LEN: usize = 21;
const HEX_CHARS: &[u8] = b"0123456789abcdef";

/// Transport session ID: 21-byte fixed array ("sess_" + 16 hex)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId {
    bytes: [u8; SESSION_ID_LEN],
}

impl SessionId {
    pub fn generate() -> Self {
        let mut bytes = [0u8; SESSION_ID_LEN];
        bytes[..SESSION_PREFIX.len()].copy_from_slice(SESSION_PREFIX);

        let mut rng = rand::rng();
        let value: u64 = rng.random();

        for i in 0..16 {
            let nibble = ((value >> (60 - i * 4)) & 0xF) as usize;
            bytes[SESSION_PREFIX.len() + i] = HEX_CHARS[nibble];
        }
        Self { bytes }
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.bytes).unwrap_or("")
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const ROOM_TOPIC_PREFIX: &str = "/topic/room/";
const USER_QUEUE_PREFIX: &str = "/user/";
const USER_QUEUE_SUFFIX: &str = "/queue";

/// Delivery address on the transport
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Destination {
    /// Broadcast topic of a room: `/topic/room/{roomId}`
    Room(RoomId),
    /// Private channel of a user: `/user/{userId}/queue`
    User(UserId),
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Room(room_id) => write!(f, "{}{}", ROOM_TOPIC_PREFIX, room_id),
            Destination::User(user_id) => {
                write!(f, "{}{}{}", USER_QUEUE_PREFIX, user_id, USER_QUEUE_SUFFIX)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown destination: {0}")]
pub struct UnknownDestination(pub String);

impl FromStr for Destination {
    type Err = UnknownDestination;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // ids are opaque, so everything after the prefix is the id
        if let Some(room) = s.strip_prefix(ROOM_TOPIC_PREFIX) {
            if !room.is_empty() {
                return Ok(Destination::Room(RoomId::from(room)));
            }
        }
        if let Some(user) = s
            .strip_prefix(USER_QUEUE_PREFIX)
            .and_then(|rest| rest.strip_suffix(USER_QUEUE_SUFFIX))
        {
            if !user.is_empty() {
                return Ok(Destination::User(UserId::from(user)));
            }
        }
        Err(UnknownDestination(s.to_string()))
    }
}

/// Wrapper for outbound WebSocket messages using tungstenite's Utf8Bytes.
#[derive(Debug, Clone)]
pub struct OutboundMessage(Utf8Bytes);

impl OutboundMessage {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Get the inner Utf8Bytes for tungstenite Message::Text
    pub fn into_inner(self) -> Utf8Bytes {
        self.0
    }
}

impl From<String> for OutboundMessage {
    fn from(s: String) -> Self {
        Self(Utf8Bytes::from(s))
    }
}
