//! Join/leave handling and point-to-point signal forwarding.
//!
//! Signals are only forwarded between two distinct users that the registry
//! currently places in the same room. Anything else is dropped without a
//! reply so that probing clients learn nothing about other rooms.

use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::actor::RoomRegistry;
use super::broker::Broker;
use super::messages::{
    IceCandidate, JoinRoomRequest, LeaveRoomRequest, ServerMessage, SessionDescription,
};
use super::session::SessionTable;
use super::types::{Destination, RoomId, SessionId, SignalingError, UserId};

/// Why a signal was dropped
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayRejection {
    #[error("sender or recipient missing")]
    MissingUser,

    #[error("{0} addressed a signal to itself")]
    SelfAddressed(UserId),

    #[error("{0} is not in a room")]
    NotInRoom(UserId),

    #[error("{from} ({from_room}) and {to} ({to_room}) are in different rooms")]
    CrossRoom {
        from: UserId,
        from_room: RoomId,
        to: UserId,
        to_room: RoomId,
    },

    #[error("room hint {hint} does not match room {actual}")]
    RoomHintMismatch { hint: RoomId, actual: RoomId },

    #[error(transparent)]
    Registry(#[from] SignalingError),
}

/// A point-to-point signaling payload
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    Offer(SessionDescription),
    Answer(SessionDescription),
    IceCandidate(IceCandidate),
}

impl Signal {
    pub fn kind(&self) -> &'static str {
        match self {
            Signal::Offer(_) => "offer",
            Signal::Answer(_) => "answer",
            Signal::IceCandidate(_) => "ice-candidate",
        }
    }

    fn parties(&self) -> (&UserId, &UserId, Option<&RoomId>) {
        match self {
            Signal::Offer(sd) | Signal::Answer(sd) => {
                (&sd.from_user_id, &sd.to_user_id, sd.room_id.as_ref())
            }
            Signal::IceCandidate(c) => (&c.from_user_id, &c.to_user_id, c.room_id.as_ref()),
        }
    }

    fn into_event(self) -> ServerMessage {
        match self {
            Signal::Offer(sd) => ServerMessage::offer(sd),
            Signal::Answer(sd) => ServerMessage::answer(sd),
            Signal::IceCandidate(c) => ServerMessage::ice_candidate(c),
        }
    }
}

#[derive(Clone)]
pub struct SignalingRelay {
    registry: RoomRegistry,
    broker: Broker,
    sessions: SessionTable,
}

impl SignalingRelay {
    pub fn new(registry: RoomRegistry, broker: Broker, sessions: SessionTable) -> Self {
        Self {
            registry,
            broker,
            sessions,
        }
    }

    pub async fn join(&self, session_id: SessionId, request: JoinRoomRequest) {
        let JoinRoomRequest {
            user_id,
            room_id,
            user_agent,
        } = request;
        info!(
            "Join request: room {} user {} session {}",
            room_id, user_id, session_id
        );

        match self.registry.can_join(&room_id).await {
            Ok(true) => {}
            Ok(false) => {
                let err = SignalingError::RoomFull {
                    room_id: room_id.clone(),
                    limit: self.registry.max_participants(),
                };
                self.send_error(&user_id, &err).await;
                return;
            }
            Err(e) => {
                error!("Join of {} to {} failed: {}", user_id, room_id, e);
                self.send_error(&user_id, &e).await;
                return;
            }
        }

        let participants = match self.registry.join(&room_id, &user_id).await {
            Ok(participants) => participants,
            Err(e) => {
                warn!("Join of {} to {} failed: {}", user_id, room_id, e);
                self.send_error(&user_id, &e).await;
                return;
            }
        };

        let joined = ServerMessage::UserJoined {
            from_user_id: user_id.clone(),
            participants: participants.clone(),
            new_user_id: user_id.clone(),
            user_agent,
        };
        self.broker
            .publish(&Destination::Room(room_id.clone()), &joined)
            .await;

        let count = participants.len();
        let state = ServerMessage::RoomState {
            participants,
            room_id: room_id.clone(),
            your_user_id: user_id.clone(),
        };
        self.broker
            .publish(&Destination::User(user_id.clone()), &state)
            .await;

        info!("Join complete: room {} user {} ({} total)", room_id, user_id, count);
        self.sessions.bind(session_id, user_id, room_id).await;
    }

    pub async fn leave(&self, session_id: SessionId, request: LeaveRoomRequest) {
        let LeaveRoomRequest { user_id, room_id } = request;
        info!(
            "Leave request: room {} user {} session {}",
            room_id, user_id, session_id
        );

        let left = self.registry.leave(&room_id, &user_id).await;
        self.sessions.unbind(&session_id).await;

        if let Err(e) = left {
            error!("Leave of {} from {} failed: {}", user_id, room_id, e);
            return;
        }

        let event = ServerMessage::UserLeft {
            from_user_id: user_id.clone(),
            left_user_id: user_id.clone(),
        };
        self.broker.publish(&Destination::Room(room_id.clone()), &event).await;
        info!("Leave complete: room {} user {}", room_id, user_id);
    }

    /// Forward an offer, answer or ICE candidate to its recipient's private channel.
    ///
    /// Rejections are logged and returned; nothing is sent to the sender.
    pub async fn forward(&self, signal: Signal) -> Result<RoomId, RelayRejection> {
        let kind = signal.kind();
        let (from, to, hint) = signal.parties();
        debug!("Relaying {} from {} to {}", kind, from, to);

        let room_id = match self.authorize(from, to, hint).await {
            Ok(room_id) => room_id,
            Err(rejection) => {
                warn!("Dropped {}: {}", kind, rejection);
                return Err(rejection);
            }
        };

        let recipient = Destination::User(to.clone());
        let delivered = self.broker.publish(&recipient, &signal.into_event()).await;
        debug!("Relayed {} in room {} ({} sessions)", kind, room_id, delivered);
        Ok(room_id)
    }

    /// Resolve the common room of `from` and `to`, or say why there is none.
    async fn authorize(
        &self,
        from: &UserId,
        to: &UserId,
        hint: Option<&RoomId>,
    ) -> Result<RoomId, RelayRejection> {
        if from.is_empty() || to.is_empty() {
            return Err(RelayRejection::MissingUser);
        }
        if from == to {
            return Err(RelayRejection::SelfAddressed(from.clone()));
        }

        let (from_room, to_room) = self.registry.rooms_of(from, to).await?;
        let from_room = from_room.ok_or_else(|| RelayRejection::NotInRoom(from.clone()))?;
        let to_room = to_room.ok_or_else(|| RelayRejection::NotInRoom(to.clone()))?;
        if from_room != to_room {
            return Err(RelayRejection::CrossRoom {
                from: from.clone(),
                from_room,
                to: to.clone(),
                to_room,
            });
        }

        if let Some(hint) = hint {
            if hint != &from_room {
                return Err(RelayRejection::RoomHintMismatch {
                    hint: hint.clone(),
                    actual: from_room,
                });
            }
        }
        Ok(from_room)
    }

    async fn send_error(&self, user_id: &UserId, err: &SignalingError) {
        let event = ServerMessage::Error {
            code: err.code(),
            message: err.to_string(),
        };
        let delivered = self
            .broker
            .publish(&Destination::User(user_id.clone()), &event)
            .await;
        info!(
            "Sent {} error to {} ({} sessions): {}",
            err.code(),
            user_id,
            delivered,
            err
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::types::OutboundMessage;
    use serde_json::{Value, json};
    use tokio::sync::mpsc;

    fn room(s: &str) -> RoomId {
        RoomId::from(s)
    }

    fn user(s: &str) -> UserId {
        UserId::from(s)
    }

    struct Fixture {
        registry: RoomRegistry,
        broker: Broker,
        sessions: SessionTable,
        relay: SignalingRelay,
    }

    fn fixture(max_participants: usize) -> Fixture {
        let registry = RoomRegistry::spawn(max_participants);
        let broker = Broker::new();
        let sessions = SessionTable::new();
        let relay = SignalingRelay::new(registry.clone(), broker.clone(), sessions.clone());
        Fixture {
            registry,
            broker,
            sessions,
            relay,
        }
    }

    async fn subscribe(broker: &Broker, dest: Destination) -> mpsc::UnboundedReceiver<OutboundMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = SessionId::generate();
        broker.register(id, tx).await;
        broker.subscribe(id, dest).await;
        rx
    }

    fn next_event(rx: &mut mpsc::UnboundedReceiver<OutboundMessage>) -> Value {
        serde_json::from_str(rx.try_recv().unwrap().as_str()).unwrap()
    }

    fn join_request(user_id: &str, room_id: &str) -> JoinRoomRequest {
        JoinRoomRequest {
            user_id: user(user_id),
            room_id: room(room_id),
            user_agent: Some("test-agent".to_string()),
        }
    }

    fn offer(from: &str, to: &str, hint: Option<&str>) -> Signal {
        Signal::Offer(SessionDescription {
            from_user_id: user(from),
            to_user_id: user(to),
            sdp: json!("v=0 o=- 1 2 IN IP4 127.0.0.1"),
            room_id: hint.map(room),
        })
    }

    #[tokio::test]
    async fn join_broadcasts_and_sends_room_state() {
        let f = fixture(6);
        f.registry.join(&room("r1"), &user("alice")).await.unwrap();
        let mut topic = subscribe(&f.broker, Destination::Room(room("r1"))).await;
        let mut bob_queue = subscribe(&f.broker, Destination::User(user("bob"))).await;
        let session_id = SessionId::generate();

        f.relay.join(session_id, join_request("bob", "r1")).await;

        let joined = next_event(&mut topic);
        assert_eq!(joined["type"], "user-joined");
        assert_eq!(joined["newUserId"], "bob");
        assert_eq!(joined["participants"], json!(["alice", "bob"]));
        assert_eq!(joined["userAgent"], "test-agent");

        let state = next_event(&mut bob_queue);
        assert_eq!(state["type"], "room-state");
        assert_eq!(state["roomId"], "r1");
        assert_eq!(state["yourUserId"], "bob");
        assert_eq!(state["participants"], json!(["alice", "bob"]));

        let binding = f.sessions.get(&session_id).await.unwrap();
        assert_eq!(binding.pair(), Some((&user("bob"), &room("r1"))));
    }

    #[tokio::test]
    async fn join_to_full_room_sends_room_full_error() {
        let f = fixture(1);
        f.registry.join(&room("r1"), &user("alice")).await.unwrap();
        let mut topic = subscribe(&f.broker, Destination::Room(room("r1"))).await;
        let mut bob_queue = subscribe(&f.broker, Destination::User(user("bob"))).await;
        let session_id = SessionId::generate();

        f.relay.join(session_id, join_request("bob", "r1")).await;

        let err = next_event(&mut bob_queue);
        assert_eq!(err["type"], "error");
        assert_eq!(err["code"], "ROOM_FULL");
        assert!(topic.try_recv().is_err());
        assert_eq!(f.registry.room_of(&user("bob")).await.unwrap(), None);
        assert!(f.sessions.get(&session_id).await.is_none());
    }

    #[tokio::test]
    async fn leave_broadcasts_user_left_and_unbinds() {
        let f = fixture(6);
        let session_id = SessionId::generate();
        f.relay.join(session_id, join_request("alice", "r1")).await;
        f.registry.join(&room("r1"), &user("bob")).await.unwrap();
        let mut topic = subscribe(&f.broker, Destination::Room(room("r1"))).await;

        f.relay
            .leave(
                session_id,
                LeaveRoomRequest {
                    user_id: user("alice"),
                    room_id: room("r1"),
                },
            )
            .await;

        let left = next_event(&mut topic);
        assert_eq!(left["type"], "user-left");
        assert_eq!(left["leftUserId"], "alice");
        assert_eq!(f.registry.room_of(&user("alice")).await.unwrap(), None);
        assert_eq!(
            f.sessions.get(&session_id).await,
            Some(Default::default())
        );
    }

    #[tokio::test]
    async fn leave_with_registry_down_still_unbinds() {
        let broker = Broker::new();
        let sessions = SessionTable::new();
        let relay = SignalingRelay::new(RoomRegistry::stopped(6), broker.clone(), sessions.clone());
        let mut topic = subscribe(&broker, Destination::Room(room("r1"))).await;
        let session_id = SessionId::generate();
        sessions.bind(session_id, user("alice"), room("r1")).await;

        relay
            .leave(
                session_id,
                LeaveRoomRequest {
                    user_id: user("alice"),
                    room_id: room("r1"),
                },
            )
            .await;

        assert_eq!(sessions.get(&session_id).await, Some(Default::default()));
        assert!(topic.try_recv().is_err());
    }

    #[tokio::test]
    async fn join_that_loses_the_last_seat_gets_room_full() {
        let f = fixture(1);
        let mut topic = subscribe(&f.broker, Destination::Room(room("r1"))).await;
        let alice_queue = subscribe(&f.broker, Destination::User(user("alice"))).await;
        let bob_queue = subscribe(&f.broker, Destination::User(user("bob"))).await;
        let alice_session = SessionId::generate();
        let bob_session = SessionId::generate();

        // both eligibility checks are answered before either join is applied
        tokio::join!(
            f.relay.join(alice_session, join_request("alice", "r1")),
            f.relay.join(bob_session, join_request("bob", "r1")),
        );

        let winner = next_event(&mut topic)["newUserId"].clone();
        assert!(topic.try_recv().is_err());
        let (mut won, mut lost, lost_session) = if winner == "alice" {
            (alice_queue, bob_queue, bob_session)
        } else {
            (bob_queue, alice_queue, alice_session)
        };
        assert_eq!(next_event(&mut won)["type"], "room-state");
        let err = next_event(&mut lost);
        assert_eq!(err["type"], "error");
        assert_eq!(err["code"], "ROOM_FULL");
        assert!(f.sessions.get(&lost_session).await.is_none());
        assert_eq!(f.registry.participants_of(&room("r1")).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_relay_joins_admit_exactly_capacity() {
        const MAX: usize = 6;
        const EXTRA: usize = 5;
        let f = fixture(MAX);
        let mut topic = subscribe(&f.broker, Destination::Room(room("party"))).await;
        let mut queues = Vec::new();
        for i in 0..MAX + EXTRA {
            let dest = Destination::User(UserId::from(format!("user{i}")));
            queues.push(subscribe(&f.broker, dest).await);
        }

        let tasks: Vec<_> = (0..MAX + EXTRA)
            .map(|i| {
                let relay = f.relay.clone();
                tokio::spawn(async move {
                    let request = JoinRoomRequest {
                        user_id: UserId::from(format!("user{i}")),
                        room_id: room("party"),
                        user_agent: None,
                    };
                    relay.join(SessionId::generate(), request).await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let mut joined = 0;
        while let Ok(msg) = topic.try_recv() {
            let event: Value = serde_json::from_str(msg.as_str()).unwrap();
            assert_eq!(event["type"], "user-joined");
            joined += 1;
        }

        let mut states = 0;
        let mut full = 0;
        for queue in &mut queues {
            let event = next_event(queue);
            match event["type"].as_str() {
                Some("room-state") => states += 1,
                Some("error") => {
                    assert_eq!(event["code"], "ROOM_FULL");
                    full += 1;
                }
                other => panic!("unexpected event: {other:?}"),
            }
            assert!(queue.try_recv().is_err());
        }

        assert_eq!(joined, MAX);
        assert_eq!(states, MAX);
        assert_eq!(full, EXTRA);
        assert_eq!(f.registry.participants_of(&room("party")).await.unwrap().len(), MAX);
    }

    #[tokio::test]
    async fn self_addressed_offer_is_dropped() {
        let f = fixture(6);
        f.registry.join(&room("r1"), &user("u1")).await.unwrap();
        let mut u1_queue = subscribe(&f.broker, Destination::User(user("u1"))).await;

        let result = f.relay.forward(offer("u1", "u1", None)).await;

        assert_eq!(result, Err(RelayRejection::SelfAddressed(user("u1"))));
        assert!(u1_queue.try_recv().is_err());
    }

    #[tokio::test]
    async fn empty_ids_are_dropped() {
        let f = fixture(6);

        assert_eq!(
            f.relay.forward(offer("", "u2", None)).await,
            Err(RelayRejection::MissingUser)
        );
        assert_eq!(
            f.relay.forward(offer("u1", "", None)).await,
            Err(RelayRejection::MissingUser)
        );
    }

    #[tokio::test]
    async fn cross_room_candidate_is_dropped() {
        let f = fixture(6);
        f.registry.join(&room("R1"), &user("u1")).await.unwrap();
        f.registry.join(&room("R2"), &user("u2")).await.unwrap();
        let mut u2_queue = subscribe(&f.broker, Destination::User(user("u2"))).await;

        let result = f
            .relay
            .forward(Signal::IceCandidate(IceCandidate {
                from_user_id: user("u1"),
                to_user_id: user("u2"),
                candidate: json!("candidate:1"),
                sdp_mid: Some("0".to_string()),
                sdp_m_line_index: Some(0),
                room_id: None,
            }))
            .await;

        assert!(matches!(result, Err(RelayRejection::CrossRoom { .. })));
        assert!(u2_queue.try_recv().is_err());
    }

    #[tokio::test]
    async fn recipient_outside_any_room_is_dropped() {
        let f = fixture(6);
        f.registry.join(&room("R1"), &user("u1")).await.unwrap();

        assert_eq!(
            f.relay.forward(offer("u1", "u2", None)).await,
            Err(RelayRejection::NotInRoom(user("u2")))
        );
    }

    #[tokio::test]
    async fn mismatched_room_hint_is_dropped() {
        let f = fixture(6);
        f.registry.join(&room("R"), &user("u1")).await.unwrap();
        f.registry.join(&room("R"), &user("u2")).await.unwrap();
        let mut u2_queue = subscribe(&f.broker, Destination::User(user("u2"))).await;

        let result = f.relay.forward(offer("u1", "u2", Some("other"))).await;

        assert_eq!(
            result,
            Err(RelayRejection::RoomHintMismatch {
                hint: room("other"),
                actual: room("R"),
            })
        );
        assert!(u2_queue.try_recv().is_err());
    }

    #[tokio::test]
    async fn same_room_answer_is_delivered_verbatim() {
        let f = fixture(6);
        f.registry.join(&room("R"), &user("u1")).await.unwrap();
        f.registry.join(&room("R"), &user("u2")).await.unwrap();
        let mut u1_queue = subscribe(&f.broker, Destination::User(user("u1"))).await;
        let mut u2_queue = subscribe(&f.broker, Destination::User(user("u2"))).await;
        let sdp = json!({"type": "answer", "sdp": "v=0\r\na=ice-ufrag:abc\r\n"});

        let result = f
            .relay
            .forward(Signal::Answer(SessionDescription {
                from_user_id: user("u1"),
                to_user_id: user("u2"),
                sdp: sdp.clone(),
                room_id: Some(room("R")),
            }))
            .await;

        assert_eq!(result, Ok(room("R")));
        let event = next_event(&mut u2_queue);
        assert_eq!(
            event,
            json!({"type": "answer", "fromUserId": "u1", "sdp": sdp, "roomId": "R"})
        );
        assert!(u1_queue.try_recv().is_err());
    }

    #[tokio::test]
    async fn registry_failure_fails_closed() {
        let broker = Broker::new();
        let relay = SignalingRelay::new(RoomRegistry::stopped(6), broker.clone(), SessionTable::new());
        let mut u2_queue = subscribe(&broker, Destination::User(user("u2"))).await;

        let result = relay.forward(offer("u1", "u2", None)).await;

        assert!(matches!(result, Err(RelayRejection::Registry(_))));
        assert!(u2_queue.try_recv().is_err());
    }
}
