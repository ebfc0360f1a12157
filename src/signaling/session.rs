//! Transport session bookkeeping.
//!
//! A session is bound to the `(user, room)` pair it most recently joined (or
//! announced in its handshake). When the session goes away the binding is
//! used to take the user out of the room and tell whoever is left.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::actor::RoomRegistry;
use super::broker::Broker;
use super::messages::{DisconnectReason, ServerMessage};
use super::types::{Destination, RoomId, SessionId, SignalingError, UserId};

/// What a session is currently bound to
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionBinding {
    pub user_id: Option<UserId>,
    pub room_id: Option<RoomId>,
}

impl SessionBinding {
    /// Both halves, if the session is fully bound
    pub fn pair(&self) -> Option<(&UserId, &RoomId)> {
        Some((self.user_id.as_ref()?, self.room_id.as_ref()?))
    }
}

/// Shared table of live sessions
#[derive(Clone, Default)]
pub struct SessionTable {
    inner: Arc<Mutex<HashMap<SessionId, SessionBinding>>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn open(&self, session_id: SessionId, binding: SessionBinding) {
        self.inner.lock().await.insert(session_id, binding);
    }

    pub async fn bind(&self, session_id: SessionId, user_id: UserId, room_id: RoomId) {
        let mut sessions = self.inner.lock().await;
        let binding = sessions.entry(session_id).or_default();
        binding.user_id = Some(user_id);
        binding.room_id = Some(room_id);
    }

    /// Clear the binding but keep the session
    pub async fn unbind(&self, session_id: &SessionId) {
        if let Some(binding) = self.inner.lock().await.get_mut(session_id) {
            *binding = SessionBinding::default();
        }
    }

    pub async fn get(&self, session_id: &SessionId) -> Option<SessionBinding> {
        self.inner.lock().await.get(session_id).cloned()
    }

    /// Remove the session, returning its last binding
    pub async fn close(&self, session_id: &SessionId) -> Option<SessionBinding> {
        self.inner.lock().await.remove(session_id)
    }

    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    #[cfg(test)]
    pub(crate) async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}

/// Lifecycle events raised by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Connected {
        session_id: SessionId,
        user_id: Option<UserId>,
        room_id: Option<RoomId>,
    },
    Disconnected {
        session_id: SessionId,
    },
    Subscribed {
        session_id: SessionId,
        destination: String,
    },
    Unsubscribed {
        session_id: SessionId,
        destination: String,
    },
}

#[derive(Clone)]
pub struct SessionLifecycleController {
    registry: RoomRegistry,
    broker: Broker,
    sessions: SessionTable,
}

impl SessionLifecycleController {
    pub fn new(registry: RoomRegistry, broker: Broker, sessions: SessionTable) -> Self {
        Self {
            registry,
            broker,
            sessions,
        }
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    pub async fn handle(&self, event: SessionEvent) {
        match event {
            SessionEvent::Connected {
                session_id,
                user_id,
                room_id,
            } => self.on_connect(session_id, user_id, room_id).await,
            SessionEvent::Disconnected { session_id } => self.on_disconnect(session_id).await,
            SessionEvent::Subscribed {
                session_id,
                destination,
            } => {
                let binding = self.sessions.get(&session_id).await.unwrap_or_default();
                match destination.parse::<Destination>() {
                    Ok(Destination::Room(room_id)) => info!(
                        "Session {} (user {:?}) subscribed to room {}",
                        session_id, binding.user_id, room_id
                    ),
                    _ => debug!(
                        "Session {} (user {:?}) subscribed to {}",
                        session_id, binding.user_id, destination
                    ),
                }
            }
            SessionEvent::Unsubscribed {
                session_id,
                destination,
            } => {
                debug!("Session {} unsubscribed from {}", session_id, destination);
            }
        }
    }

    async fn on_connect(&self, session_id: SessionId, user_id: Option<UserId>, room_id: Option<RoomId>) {
        match (&user_id, &room_id) {
            (Some(user), Some(room)) => {
                info!("Session {} connected as {} in room {}", session_id, user, room)
            }
            _ => info!("Session {} connected", session_id),
        }
        self.sessions
            .open(session_id, SessionBinding { user_id, room_id })
            .await;
    }

    async fn on_disconnect(&self, session_id: SessionId) {
        let binding = self.sessions.close(&session_id).await.unwrap_or_default();
        info!(
            "Session {} disconnected (user {:?}, room {:?})",
            session_id, binding.user_id, binding.room_id
        );

        let Some((user_id, room_id)) = binding.pair() else {
            return;
        };
        if let Err(e) = self.cleanup(user_id, room_id).await {
            error!(
                "Disconnect cleanup failed for {} in room {}: {}",
                user_id, room_id, e
            );
        }
    }

    async fn cleanup(&self, user_id: &UserId, room_id: &RoomId) -> Result<(), SignalingError> {
        match self.registry.leave(room_id, user_id).await? {
            None => {
                debug!("{} was no longer in room {}", user_id, room_id);
                return Ok(());
            }
            Some(0) => {
                debug!("Room {} is gone, nobody to notify", room_id);
                return Ok(());
            }
            Some(_) => {}
        }

        let event = ServerMessage::UserDisconnected {
            from_user_id: user_id.clone(),
            user_id: user_id.clone(),
            reason: DisconnectReason::ConnectionLost,
        };
        let delivered = self
            .broker
            .publish(&Destination::Room(room_id.clone()), &event)
            .await;
        if delivered == 0 {
            warn!("Nobody received the disconnect of {} in {}", user_id, room_id);
        }
        info!("{} removed from room {} after connection loss", user_id, room_id);
        Ok(())
    }
}
