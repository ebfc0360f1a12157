//! WebSocket signaling server: room membership and WebRTC signal relay

mod actor;
mod broker;
mod messages;
mod relay;
mod room_table;
mod server;
mod session;
mod types;

pub use actor::RoomRegistry;
pub use broker::Broker;
pub use messages::{
    ClientMessage, DisconnectReason, IceCandidate, JoinRoomRequest, LeaveRoomRequest,
    ServerMessage, SessionDescription,
};
pub use relay::{RelayRejection, Signal, SignalingRelay};
pub use room_table::{DEFAULT_MAX_PARTICIPANTS, RoomState, RoomStats, RoomTable};
pub use server::{DEFAULT_SIGNALING_PORT, SignalingServer};
pub use session::{SessionBinding, SessionEvent, SessionLifecycleController, SessionTable};
pub use types::{
    Destination, ErrorCode, OutboundMessage, RoomId, SessionId, SignalingError,
    UnknownDestination, UserId,
};
