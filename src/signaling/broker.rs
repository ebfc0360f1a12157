//! In-process publish/subscribe delivery.
//!
//! Each connected session registers one outbound channel and subscribes it to
//! destinations (room topics, private user queues). Publishing fans a message
//! out to every session subscribed to the destination. Delivery never waits
//! on the receiving socket.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::{debug, error};

use super::messages::ServerMessage;
use super::types::{Destination, OutboundMessage, SessionId};

#[derive(Default)]
struct Subscriptions {
    sessions: HashMap<SessionId, mpsc::UnboundedSender<OutboundMessage>>,
    destinations: HashMap<Destination, HashSet<SessionId>>,
}

#[derive(Clone, Default)]
pub struct Broker {
    inner: Arc<RwLock<Subscriptions>>,
}

impl Broker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a session's outbound channel
    pub async fn register(&self, session_id: SessionId, tx: mpsc::UnboundedSender<OutboundMessage>) {
        self.inner.write().await.sessions.insert(session_id, tx);
    }

    /// Drop a session and all of its subscriptions
    pub async fn unregister(&self, session_id: &SessionId) {
        let mut subs = self.inner.write().await;
        subs.sessions.remove(session_id);
        subs.destinations.retain(|_, members| {
            members.remove(session_id);
            !members.is_empty()
        });
    }

    /// Returns false if the session is unknown
    pub async fn subscribe(&self, session_id: SessionId, destination: Destination) -> bool {
        let mut subs = self.inner.write().await;
        if !subs.sessions.contains_key(&session_id) {
            return false;
        }
        subs.destinations
            .entry(destination)
            .or_default()
            .insert(session_id);
        true
    }

    /// Returns false if the session was not subscribed
    pub async fn unsubscribe(&self, session_id: &SessionId, destination: &Destination) -> bool {
        let mut subs = self.inner.write().await;
        let Some(members) = subs.destinations.get_mut(destination) else {
            return false;
        };
        let removed = members.remove(session_id);
        if members.is_empty() {
            subs.destinations.remove(destination);
        }
        removed
    }

    /// Deliver to every subscriber of `destination`. Returns the number of sessions reached.
    pub async fn publish(&self, destination: &Destination, msg: &ServerMessage) -> usize {
        let outbound = match msg.encode() {
            Ok(outbound) => outbound,
            Err(e) => {
                error!("Failed to encode message for {}: {}", destination, e);
                return 0;
            }
        };

        let subs = self.inner.read().await;
        let Some(members) = subs.destinations.get(destination) else {
            debug!("No subscribers on {}", destination);
            return 0;
        };

        let mut delivered = 0;
        for session_id in members {
            if let Some(tx) = subs.sessions.get(session_id) {
                if tx.send(outbound.clone()).is_ok() {
                    delivered += 1;
                }
            }
        }
        debug!("Published to {} ({} sessions)", destination, delivered);
        delivered
    }

    /// Deliver straight to one session regardless of subscriptions
    pub async fn send_to_session(&self, session_id: &SessionId, msg: &ServerMessage) -> bool {
        let outbound = match msg.encode() {
            Ok(outbound) => outbound,
            Err(e) => {
                error!("Failed to encode message for {}: {}", session_id, e);
                return false;
            }
        };
        match self.inner.read().await.sessions.get(session_id) {
            Some(tx) => tx.send(outbound).is_ok(),
            None => false,
        }
    }

    #[cfg(test)]
    pub(crate) async fn subscriber_count(&self, destination: &Destination) -> usize {
        self.inner
            .read()
            .await
            .destinations
            .get(destination)
            .map_or(0, HashSet::len)
    }
}
