//! Room membership index.
//!
//! Two indexes are kept in lockstep: room → participants and user → room.
//! `RoomTable` is single-owner (`&mut self`); the registry actor is the only
//! thing that holds one in the server, which makes every operation atomic
//! with respect to every other.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::types::{RoomId, SignalingError, UserId};

pub const DEFAULT_MAX_PARTICIPANTS: usize = 6;

#[derive(Debug)]
struct Room {
    participants: BTreeSet<UserId>,
    created_at: DateTime<Utc>,
}

/// Aggregate registry statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomStats {
    pub total_rooms: usize,
    pub total_users: usize,
    pub max_participants: usize,
    /// room size -> number of rooms with that size
    #[serde(rename = "participantDistribution")]
    pub occupancy_histogram: BTreeMap<usize, usize>,
}

/// Point-in-time report on a single room
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomState {
    pub room_id: RoomId,
    pub participant_count: usize,
    pub participants: Vec<UserId>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct RoomTable {
    max_participants: usize,
    rooms: HashMap<RoomId, Room>,
    user_rooms: HashMap<UserId, RoomId>,
}

impl Default for RoomTable {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PARTICIPANTS)
    }
}

impl RoomTable {
    pub fn new(max_participants: usize) -> Self {
        Self {
            max_participants,
            rooms: HashMap::new(),
            user_rooms: HashMap::new(),
        }
    }

    pub fn max_participants(&self) -> usize {
        self.max_participants
    }

    /// Add `user_id` to `room_id`, moving it out of any other room first.
    ///
    /// Capacity is checked before anything is touched, so a full room leaves
    /// the user where it was. Rejoining a room the user is already in is a
    /// no-op that still returns the participant list.
    pub fn join(&mut self, room_id: &RoomId, user_id: &UserId) -> Result<Vec<UserId>, SignalingError> {
        debug!("Join attempt: room {} user {}", room_id, user_id);

        if let Some(room) = self.rooms.get(room_id) {
            if room.participants.len() >= self.max_participants
                && !room.participants.contains(user_id)
            {
                warn!(
                    "Room {} full ({}/{}), rejecting {}",
                    room_id,
                    room.participants.len(),
                    self.max_participants,
                    user_id
                );
                return Err(SignalingError::RoomFull {
                    room_id: room_id.clone(),
                    limit: self.max_participants,
                });
            }
        } else if self.max_participants == 0 {
            return Err(SignalingError::RoomFull {
                room_id: room_id.clone(),
                limit: 0,
            });
        }

        if let Some(previous) = self.user_rooms.get(user_id).cloned() {
            if &previous != room_id {
                self.leave(&previous, user_id);
                info!("User {} moved from room {} to {}", user_id, previous, room_id);
            }
        }

        let room = self.rooms.entry(room_id.clone()).or_insert_with(|| {
            info!("Room created: {}", room_id);
            Room {
                participants: BTreeSet::new(),
                created_at: Utc::now(),
            }
        });
        room.participants.insert(user_id.clone());
        self.user_rooms.insert(user_id.clone(), room_id.clone());

        info!(
            "User {} joined room {} ({}/{})",
            user_id,
            room_id,
            room.participants.len(),
            self.max_participants
        );
        Ok(room.participants.iter().cloned().collect())
    }

    /// Remove `user_id` from `room_id`, returning how many members remain.
    /// `None` if it was not a member.
    pub fn leave(&mut self, room_id: &RoomId, user_id: &UserId) -> Option<usize> {
        let Some(room) = self.rooms.get_mut(room_id) else {
            debug!("Leave ignored: room {} does not exist", room_id);
            return None;
        };
        if !room.participants.remove(user_id) {
            debug!("Leave ignored: {} is not in room {}", user_id, room_id);
            return None;
        }
        self.user_rooms.remove(user_id);

        let remaining = room.participants.len();
        if remaining == 0 {
            self.rooms.remove(room_id);
            info!("Room {} removed (empty)", room_id);
        }
        info!("User {} left room {} ({} remaining)", user_id, room_id, remaining);
        Some(remaining)
    }

    pub fn participants_of(&self, room_id: &RoomId) -> Vec<UserId> {
        self.rooms
            .get(room_id)
            .map(|room| room.participants.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn room_of(&self, user_id: &UserId) -> Option<RoomId> {
        self.user_rooms.get(user_id).cloned()
    }

    pub fn can_join(&self, room_id: &RoomId) -> bool {
        match self.rooms.get(room_id) {
            Some(room) => room.participants.len() < self.max_participants,
            None => self.max_participants > 0,
        }
    }

    pub fn room_exists(&self, room_id: &RoomId) -> bool {
        self.rooms.contains_key(room_id)
    }

    pub fn snapshot(&self) -> HashMap<RoomId, BTreeSet<UserId>> {
        self.rooms
            .iter()
            .map(|(id, room)| (id.clone(), room.participants.clone()))
            .collect()
    }

    pub fn room_state(&self, room_id: &RoomId) -> RoomState {
        let room = self.rooms.get(room_id);
        let participants: Vec<UserId> = room
            .map(|r| r.participants.iter().cloned().collect())
            .unwrap_or_default();
        RoomState {
            room_id: room_id.clone(),
            participant_count: participants.len(),
            participants,
            created_at: room.map(|r| r.created_at),
        }
    }

    pub fn stats(&self) -> RoomStats {
        let mut occupancy_histogram = BTreeMap::new();
        for room in self.rooms.values() {
            *occupancy_histogram.entry(room.participants.len()).or_insert(0) += 1;
        }
        RoomStats {
            total_rooms: self.rooms.len(),
            total_users: self.user_rooms.len(),
            max_participants: self.max_participants,
            occupancy_histogram,
        }
    }
}
