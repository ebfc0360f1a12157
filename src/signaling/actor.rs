use std::collections::{BTreeSet, HashMap};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use super::room_table::{RoomState, RoomStats, RoomTable};
use super::types::{RoomId, SignalingError, UserId};

const COMMAND_QUEUE_SIZE: usize = 1024;

/// Commands sent to the room registry actor
pub(crate) enum RoomCommand {
    Join {
        room_id: RoomId,
        user_id: UserId,
        reply: oneshot::Sender<Result<Vec<UserId>, SignalingError>>,
    },
    Leave {
        room_id: RoomId,
        user_id: UserId,
        reply: oneshot::Sender<Option<usize>>,
    },
    ParticipantsOf {
        room_id: RoomId,
        reply: oneshot::Sender<Vec<UserId>>,
    },
    RoomOf {
        user_id: UserId,
        reply: oneshot::Sender<Option<RoomId>>,
    },
    /// Rooms of two users, read in one step
    RoomsOf {
        users: (UserId, UserId),
        reply: oneshot::Sender<(Option<RoomId>, Option<RoomId>)>,
    },
    CanJoin {
        room_id: RoomId,
        reply: oneshot::Sender<bool>,
    },
    RoomExists {
        room_id: RoomId,
        reply: oneshot::Sender<bool>,
    },
    RoomState {
        room_id: RoomId,
        reply: oneshot::Sender<RoomState>,
    },
    Snapshot {
        reply: oneshot::Sender<HashMap<RoomId, BTreeSet<UserId>>>,
    },
    Stats {
        reply: oneshot::Sender<RoomStats>,
    },
}

pub(crate) async fn room_registry_actor(mut table: RoomTable, mut rx: mpsc::Receiver<RoomCommand>) {
    info!(
        "Room registry started (max {} participants per room)",
        table.max_participants()
    );

    while let Some(cmd) = rx.recv().await {
        match cmd {
            RoomCommand::Join {
                room_id,
                user_id,
                reply,
            } => {
                let _ = reply.send(table.join(&room_id, &user_id));
            }
            RoomCommand::Leave {
                room_id,
                user_id,
                reply,
            } => {
                let _ = reply.send(table.leave(&room_id, &user_id));
            }
            RoomCommand::ParticipantsOf { room_id, reply } => {
                let _ = reply.send(table.participants_of(&room_id));
            }
            RoomCommand::RoomOf { user_id, reply } => {
                let _ = reply.send(table.room_of(&user_id));
            }
            RoomCommand::RoomsOf {
                users: (a, b),
                reply,
            } => {
                let _ = reply.send((table.room_of(&a), table.room_of(&b)));
            }
            RoomCommand::CanJoin { room_id, reply } => {
                let _ = reply.send(table.can_join(&room_id));
            }
            RoomCommand::RoomExists { room_id, reply } => {
                let _ = reply.send(table.room_exists(&room_id));
            }
            RoomCommand::RoomState { room_id, reply } => {
                let _ = reply.send(table.room_state(&room_id));
            }
            RoomCommand::Snapshot { reply } => {
                let _ = reply.send(table.snapshot());
            }
            RoomCommand::Stats { reply } => {
                let _ = reply.send(table.stats());
            }
        }
    }

    debug!("Room registry stopped");
}

/// Handle to the room registry actor.
///
/// Every operation is a message to a single task that owns the membership
/// table, so operations are applied one at a time in arrival order.
#[derive(Clone)]
pub struct RoomRegistry {
    tx: mpsc::Sender<RoomCommand>,
    max_participants: usize,
}

impl RoomRegistry {
    /// Spawn the registry actor on the current tokio runtime
    pub fn spawn(max_participants: usize) -> Self {
        let (tx, rx) = mpsc::channel::<RoomCommand>(COMMAND_QUEUE_SIZE);
        tokio::spawn(room_registry_actor(RoomTable::new(max_participants), rx));

        Self {
            tx,
            max_participants,
        }
    }

    /// Handle whose actor is already gone; every call fails with `Internal`
    #[cfg(test)]
    pub(crate) fn stopped(max_participants: usize) -> Self {
        let (tx, _) = mpsc::channel(1);
        Self {
            tx,
            max_participants,
        }
    }

    pub fn max_participants(&self) -> usize {
        self.max_participants
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> RoomCommand,
    ) -> Result<T, SignalingError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| SignalingError::Internal("room registry stopped".to_string()))?;
        reply_rx
            .await
            .map_err(|_| SignalingError::Internal("actor channel closed".to_string()))
    }

    /// Join a room, leaving any previous one. Returns the participant list.
    pub async fn join(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
    ) -> Result<Vec<UserId>, SignalingError> {
        self.request(|reply| RoomCommand::Join {
            room_id: room_id.clone(),
            user_id: user_id.clone(),
            reply,
        })
        .await?
    }

    /// Leave a room, yielding the number of members left behind.
    /// `Ok(None)` if the user was not a member.
    pub async fn leave(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
    ) -> Result<Option<usize>, SignalingError> {
        self.request(|reply| RoomCommand::Leave {
            room_id: room_id.clone(),
            user_id: user_id.clone(),
            reply,
        })
        .await
    }

    pub async fn participants_of(&self, room_id: &RoomId) -> Result<Vec<UserId>, SignalingError> {
        self.request(|reply| RoomCommand::ParticipantsOf {
            room_id: room_id.clone(),
            reply,
        })
        .await
    }

    pub async fn room_of(&self, user_id: &UserId) -> Result<Option<RoomId>, SignalingError> {
        self.request(|reply| RoomCommand::RoomOf {
            user_id: user_id.clone(),
            reply,
        })
        .await
    }

    /// Rooms of two users from the same registry state
    pub async fn rooms_of(
        &self,
        a: &UserId,
        b: &UserId,
    ) -> Result<(Option<RoomId>, Option<RoomId>), SignalingError> {
        self.request(|reply| RoomCommand::RoomsOf {
            users: (a.clone(), b.clone()),
            reply,
        })
        .await
    }

    pub async fn can_join(&self, room_id: &RoomId) -> Result<bool, SignalingError> {
        self.request(|reply| RoomCommand::CanJoin {
            room_id: room_id.clone(),
            reply,
        })
        .await
    }

    pub async fn room_exists(&self, room_id: &RoomId) -> Result<bool, SignalingError> {
        self.request(|reply| RoomCommand::RoomExists {
            room_id: room_id.clone(),
            reply,
        })
        .await
    }

    pub async fn room_state(&self, room_id: &RoomId) -> Result<RoomState, SignalingError> {
        self.request(|reply| RoomCommand::RoomState {
            room_id: room_id.clone(),
            reply,
        })
        .await
    }

    /// Copy of every room and its members
    pub async fn snapshot(&self) -> Result<HashMap<RoomId, BTreeSet<UserId>>, SignalingError> {
        self.request(|reply| RoomCommand::Snapshot { reply }).await
    }

    pub async fn stats(&self) -> Result<RoomStats, SignalingError> {
        self.request(|reply| RoomCommand::Stats { reply }).await
    }
}
