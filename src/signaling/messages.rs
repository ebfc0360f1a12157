use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::{ErrorCode, OutboundMessage, RoomId, UserId};

/// Request to join (or move to) a room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomRequest {
    pub user_id: UserId,
    pub room_id: RoomId,
    /// Client metadata, forwarded to the room for debugging
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveRoomRequest {
    pub user_id: UserId,
    pub room_id: RoomId,
}

/// Offer or answer. `sdp` is relayed untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDescription {
    #[serde(default)]
    pub from_user_id: UserId,
    #[serde(default)]
    pub to_user_id: UserId,
    #[serde(default)]
    pub sdp: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<RoomId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    #[serde(default)]
    pub from_user_id: UserId,
    #[serde(default)]
    pub to_user_id: UserId,
    #[serde(default)]
    pub candidate: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<RoomId>,
}

/// Frames sent from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Start receiving a room topic or a private queue
    #[serde(rename = "subscribe")]
    Subscribe { destination: String },

    #[serde(rename = "unsubscribe")]
    Unsubscribe { destination: String },

    #[serde(rename = "room.join")]
    JoinRoom(JoinRoomRequest),

    #[serde(rename = "room.leave")]
    LeaveRoom(LeaveRoomRequest),

    #[serde(rename = "signal.offer")]
    Offer(SessionDescription),

    #[serde(rename = "signal.answer")]
    Answer(SessionDescription),

    #[serde(rename = "signal.iceCandidate")]
    IceCandidate(IceCandidate),
}

/// Why a member vanished without leaving
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DisconnectReason {
    ConnectionLost,
}

/// Events sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Broadcast to the room: someone joined
    #[serde(rename = "user-joined", rename_all = "camelCase")]
    UserJoined {
        from_user_id: UserId,
        participants: Vec<UserId>,
        new_user_id: UserId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_agent: Option<String>,
    },

    /// Broadcast to the room: someone left on purpose
    #[serde(rename = "user-left", rename_all = "camelCase")]
    UserLeft {
        from_user_id: UserId,
        left_user_id: UserId,
    },

    /// Broadcast to the room: someone's connection dropped
    #[serde(rename = "user-disconnected", rename_all = "camelCase")]
    UserDisconnected {
        from_user_id: UserId,
        user_id: UserId,
        reason: DisconnectReason,
    },

    /// Private: membership snapshot for a user who just joined
    #[serde(rename = "room-state", rename_all = "camelCase")]
    RoomState {
        participants: Vec<UserId>,
        room_id: RoomId,
        your_user_id: UserId,
    },

    #[serde(rename = "offer", rename_all = "camelCase")]
    Offer {
        from_user_id: UserId,
        sdp: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room_id: Option<RoomId>,
    },

    #[serde(rename = "answer", rename_all = "camelCase")]
    Answer {
        from_user_id: UserId,
        sdp: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room_id: Option<RoomId>,
    },

    #[serde(rename = "ice-candidate", rename_all = "camelCase")]
    IceCandidate {
        from_user_id: UserId,
        candidate: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sdp_mid: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sdp_m_line_index: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room_id: Option<RoomId>,
    },

    /// Private: a request from this client failed
    #[serde(rename = "error")]
    Error { code: ErrorCode, message: String },
}

impl ServerMessage {
    pub fn encode(&self) -> Result<OutboundMessage, serde_json::Error> {
        serde_json::to_string(self).map(OutboundMessage::from)
    }

    pub fn offer(offer: SessionDescription) -> Self {
        ServerMessage::Offer {
            from_user_id: offer.from_user_id,
            sdp: offer.sdp,
            room_id: offer.room_id,
        }
    }

    pub fn answer(answer: SessionDescription) -> Self {
        ServerMessage::Answer {
            from_user_id: answer.from_user_id,
            sdp: answer.sdp,
            room_id: answer.room_id,
        }
    }

    pub fn ice_candidate(candidate: IceCandidate) -> Self {
        ServerMessage::IceCandidate {
            from_user_id: candidate.from_user_id,
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_m_line_index: candidate.sdp_m_line_index,
            room_id: candidate.room_id,
        }
    }
}
