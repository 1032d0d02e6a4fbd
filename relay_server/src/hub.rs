//! Connection hub.
//!
//! The hub owns the session registry: session id -> bounded outbound queue.
//! Every registry mutation and every broadcast enumeration happens under one
//! lock, so connect/disconnect/broadcast never observe a half-updated map.
//!
//! Delivery is a non-blocking `try_send` into each recipient's queue. A queue
//! that is full or closed marks its session as broken; broken sessions are
//! removed and announced to the rest before the lock is released.
//!
//! The hub keeps no location state. Updates are serialized once, fanned out,
//! and forgotten.

use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use relay_shared::net::{encode_frame, BroadcastEnvelope, LocationUpdate, ServerEvent, SessionId};
use tokio::sync::{
    mpsc::{self, error::TrySendError},
    Mutex,
};
use tracing::{debug, info, warn};

/// A serialized frame, shared between every recipient of one broadcast.
pub type Frame = Arc<str>;

/// Registry entry for one connected session.
struct Session {
    connected_at: DateTime<Utc>,
    outbound: mpsc::Sender<Frame>,
}

/// Snapshot of a registered session, for status output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: SessionId,
    pub connected_at: DateTime<Utc>,
}

/// Handed to the transport when a session is registered.
///
/// The transport drains `outbound` onto its socket. The queue closes once the
/// hub drops the session, which is how an evicted session learns it is gone.
#[derive(Debug)]
pub struct Membership {
    pub id: SessionId,
    pub outbound: mpsc::Receiver<Frame>,
}

/// Outcome of a location broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The sender is not registered (it raced its own disconnect).
    UnknownSender,
    /// The update was queued for `recipients` sessions. `evicted` sessions
    /// were dropped because their queues were full or closed.
    Broadcast { recipients: usize, evicted: usize },
}

/// Session registry and fan-out.
pub struct Hub {
    sessions: Mutex<HashMap<SessionId, Session>>,
    outbound_capacity: usize,
}

impl Hub {
    /// Creates a hub whose sessions each buffer up to `outbound_capacity`
    /// frames, not counting their `welcome`.
    pub fn new(outbound_capacity: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            outbound_capacity: outbound_capacity.max(1),
        }
    }

    /// Registers a new session under a fresh id.
    ///
    /// The session's first queued frame is its `welcome`, so it always learns
    /// its own id before any broadcast reaches it.
    pub async fn connect(&self) -> Membership {
        // One extra slot holds the welcome.
        let (tx, rx) = mpsc::channel(self.outbound_capacity + 1);

        let mut sessions = self.sessions.lock().await;
        let mut id = SessionId::new_unique();
        while sessions.contains_key(&id) {
            id = SessionId::new_unique();
        }

        match encode_frame(&ServerEvent::Welcome { id }) {
            Ok(text) => {
                let _ = tx.try_send(Frame::from(text));
            }
            Err(e) => warn!(session_id = %id, error = %e, "Failed to encode welcome"),
        }

        sessions.insert(
            id,
            Session {
                connected_at: Utc::now(),
                outbound: tx,
            },
        );
        info!(session_id = %id, sessions = sessions.len(), "Session connected");

        Membership { id, outbound: rx }
    }

    /// Broadcasts `update` from `sender` to every other session.
    pub async fn publish(&self, sender: SessionId, update: LocationUpdate) -> Delivery {
        let mut sessions = self.sessions.lock().await;
        if !sessions.contains_key(&sender) {
            debug!(session_id = %sender, "Update from unknown session ignored");
            return Delivery::UnknownSender;
        }

        let event = ServerEvent::ReceiveLocation(BroadcastEnvelope::new(sender, update));
        let frame = match encode_frame(&event) {
            Ok(text) => Frame::from(text),
            Err(e) => {
                warn!(session_id = %sender, error = %e, "Failed to encode location");
                return Delivery::Broadcast {
                    recipients: 0,
                    evicted: 0,
                };
            }
        };

        let (recipients, broken) = fan_out(&sessions, &frame, Some(sender));
        let evicted = evict(&mut sessions, broken);
        debug!(session_id = %sender, recipients, evicted, "Location broadcast");

        Delivery::Broadcast {
            recipients,
            evicted,
        }
    }

    /// Removes `id` and tells the remaining sessions it left.
    ///
    /// Returns `false` if `id` was not registered. Only the call that actually
    /// removes the session announces it, so racing triggers (socket close,
    /// explicit disconnect, eviction, operator kick) yield one notice.
    pub async fn disconnect(&self, id: SessionId) -> bool {
        let mut sessions = self.sessions.lock().await;
        let Some(session) = sessions.remove(&id) else {
            debug!(session_id = %id, "Disconnect for unknown session ignored");
            return false;
        };

        let connected_for = Utc::now() - session.connected_at;
        info!(
            session_id = %id,
            connected_secs = connected_for.num_seconds(),
            sessions = sessions.len(),
            "Session disconnected"
        );

        let broken = announce_departure(&sessions, id);
        evict(&mut sessions, broken);
        true
    }

    /// Whether `id` is currently registered.
    pub async fn contains(&self, id: SessionId) -> bool {
        self.sessions.lock().await.contains_key(&id)
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Registered sessions, oldest first.
    pub async fn sessions(&self) -> Vec<SessionInfo> {
        let sessions = self.sessions.lock().await;
        let mut out: Vec<SessionInfo> = sessions
            .iter()
            .map(|(id, s)| SessionInfo {
                id: *id,
                connected_at: s.connected_at,
            })
            .collect();
        out.sort_by(|a, b| a.connected_at.cmp(&b.connected_at).then(a.id.cmp(&b.id)));
        out
    }
}

/// Queues `frame` for every session except `skip`.
///
/// Returns the number of sessions that accepted it and the ids whose queues
/// were full or closed.
fn fan_out(
    sessions: &HashMap<SessionId, Session>,
    frame: &Frame,
    skip: Option<SessionId>,
) -> (usize, Vec<SessionId>) {
    let mut delivered = 0;
    let mut broken = Vec::new();
    for (id, session) in sessions {
        if Some(*id) == skip {
            continue;
        }
        match session.outbound.try_send(Arc::clone(frame)) {
            Ok(()) => delivered += 1,
            Err(TrySendError::Full(_)) => {
                warn!(session_id = %id, "Outbound queue full, dropping session");
                broken.push(*id);
            }
            Err(TrySendError::Closed(_)) => {
                debug!(session_id = %id, "Outbound queue closed, dropping session");
                broken.push(*id);
            }
        }
    }
    (delivered, broken)
}

/// Queues a `user-disconnect` for `departed` to everyone left.
fn announce_departure(sessions: &HashMap<SessionId, Session>, departed: SessionId) -> Vec<SessionId> {
    match encode_frame(&ServerEvent::UserDisconnect(departed)) {
        Ok(text) => fan_out(sessions, &Frame::from(text), None).1,
        Err(e) => {
            warn!(session_id = %departed, error = %e, "Failed to encode disconnect notice");
            Vec::new()
        }
    }
}

/// Removes broken sessions, announcing each departure. Announcements can
/// expose further broken sessions; those are handled in the same pass.
fn evict(sessions: &mut HashMap<SessionId, Session>, mut pending: Vec<SessionId>) -> usize {
    let mut evicted = 0;
    while let Some(id) = pending.pop() {
        if sessions.remove(&id).is_none() {
            continue;
        }
        evicted += 1;
        info!(session_id = %id, sessions = sessions.len(), "Session evicted");
        pending.extend(announce_departure(sessions, id));
    }
    evicted
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_shared::net::decode_frame;
    use std::collections::HashSet;

    fn drain(m: &mut Membership) -> Vec<ServerEvent> {
        let mut out = Vec::new();
        while let Ok(frame) = m.outbound.try_recv() {
            out.push(decode_frame(&frame).unwrap());
        }
        out
    }

    /// Connects and discards the welcome frame.
    async fn join(hub: &Hub) -> Membership {
        let mut m = hub.connect().await;
        assert_eq!(drain(&mut m), vec![ServerEvent::Welcome { id: m.id }]);
        m
    }

    fn location(sender: SessionId, lat: f64, lon: f64) -> ServerEvent {
        ServerEvent::ReceiveLocation(BroadcastEnvelope::new(sender, LocationUpdate::new(lat, lon)))
    }

    #[tokio::test]
    async fn ids_are_unique() {
        let hub = Hub::new(4);
        let mut seen = HashSet::new();
        let mut members = Vec::new();
        for _ in 0..1000 {
            let m = hub.connect().await;
            assert!(seen.insert(m.id));
            members.push(m);
        }
        assert_eq!(hub.session_count().await, 1000);
    }

    #[tokio::test]
    async fn three_session_walkthrough() {
        let hub = Hub::new(16);
        let mut a = join(&hub).await;
        let mut b = join(&hub).await;
        let mut c = join(&hub).await;

        let delivery = hub.publish(a.id, LocationUpdate::new(10.0, 20.0)).await;
        assert_eq!(
            delivery,
            Delivery::Broadcast {
                recipients: 2,
                evicted: 0
            }
        );
        assert_eq!(drain(&mut b), vec![location(a.id, 10.0, 20.0)]);
        assert_eq!(drain(&mut c), vec![location(a.id, 10.0, 20.0)]);
        assert!(drain(&mut a).is_empty());

        assert!(hub.disconnect(b.id).await);
        assert_eq!(drain(&mut a), vec![ServerEvent::UserDisconnect(b.id)]);
        assert_eq!(drain(&mut c), vec![ServerEvent::UserDisconnect(b.id)]);

        hub.publish(c.id, LocationUpdate::new(-5.0, 99.0)).await;
        assert_eq!(drain(&mut a), vec![location(c.id, -5.0, 99.0)]);
        // B's queue was closed when it left.
        assert_eq!(drain(&mut b), Vec::new());
        assert!(b.outbound.recv().await.is_none());
    }

    #[tokio::test]
    async fn extra_fields_pass_through() {
        let hub = Hub::new(4);
        let a = join(&hub).await;
        let mut b = join(&hub).await;

        let update = LocationUpdate::new(1.0, 2.0)
            .with_field("accuracy", 4.5)
            .with_field("id", "spoofed");
        hub.publish(a.id, update).await;

        let events = drain(&mut b);
        let [ServerEvent::ReceiveLocation(env)] = events.as_slice() else {
            panic!("expected one location, got {events:?}");
        };
        assert_eq!(env.id, a.id);
        assert_eq!(env.location.extra.get("accuracy"), Some(&serde_json::json!(4.5)));
        assert!(!env.location.extra.contains_key("id"));
    }

    #[tokio::test]
    async fn same_sender_order_is_preserved() {
        let hub = Hub::new(64);
        let a = join(&hub).await;
        let mut b = join(&hub).await;

        for i in 0..50 {
            hub.publish(a.id, LocationUpdate::new(i as f64, 0.0)).await;
        }
        let lats: Vec<f64> = drain(&mut b)
            .into_iter()
            .map(|e| match e {
                ServerEvent::ReceiveLocation(env) => env.location.latitude,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(lats, (0..50).map(|i| i as f64).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn disconnect_is_announced_once() {
        let hub = Hub::new(8);
        let a = join(&hub).await;
        let mut b = join(&hub).await;

        assert!(hub.disconnect(a.id).await);
        assert!(!hub.disconnect(a.id).await);
        assert!(!hub.disconnect(a.id).await);

        assert_eq!(drain(&mut b), vec![ServerEvent::UserDisconnect(a.id)]);
        assert_eq!(hub.session_count().await, 1);
    }

    #[tokio::test]
    async fn publish_after_disconnect_is_noop() {
        let hub = Hub::new(8);
        let a = join(&hub).await;
        let mut b = join(&hub).await;

        hub.disconnect(a.id).await;
        drain(&mut b);

        assert_eq!(
            hub.publish(a.id, LocationUpdate::new(0.0, 0.0)).await,
            Delivery::UnknownSender
        );
        assert!(drain(&mut b).is_empty());
    }

    #[tokio::test]
    async fn full_queue_evicts_only_that_session() {
        let hub = Hub::new(2);
        let a = join(&hub).await;
        let slow = join(&hub).await;
        let mut c = join(&hub).await;

        // `slow` drained its welcome, freeing that slot too: three frames
        // fill it, the fourth overflows.
        for i in 0..3 {
            hub.publish(a.id, LocationUpdate::new(i as f64, 0.0)).await;
            assert_eq!(drain(&mut c), vec![location(a.id, i as f64, 0.0)]);
        }
        hub.publish(a.id, LocationUpdate::new(3.0, 0.0)).await;
        assert_eq!(
            drain(&mut c),
            vec![
                location(a.id, 3.0, 0.0),
                ServerEvent::UserDisconnect(slow.id)
            ]
        );

        assert!(!hub.contains(slow.id).await);
        assert_eq!(hub.session_count().await, 2);
        assert!(!hub.disconnect(slow.id).await);
    }

    #[tokio::test]
    async fn welcome_does_not_count_against_capacity() {
        let hub = Hub::new(1);
        let mut a = hub.connect().await;
        let mut b = hub.connect().await;

        // Neither writer has taken its welcome yet.
        let delivery = hub.publish(a.id, LocationUpdate::new(7.0, 8.0)).await;
        assert_eq!(
            delivery,
            Delivery::Broadcast {
                recipients: 1,
                evicted: 0
            }
        );
        assert_eq!(drain(&mut a), vec![ServerEvent::Welcome { id: a.id }]);
        assert_eq!(
            drain(&mut b),
            vec![ServerEvent::Welcome { id: b.id }, location(a.id, 7.0, 8.0)]
        );
        assert_eq!(hub.session_count().await, 2);
    }

    #[tokio::test]
    async fn eviction_is_announced_to_survivors() {
        let hub = Hub::new(4);
        let a = join(&hub).await;
        let gone = join(&hub).await;
        let mut c = join(&hub).await;

        let gone_id = gone.id;
        drop(gone);

        let delivery = hub.publish(a.id, LocationUpdate::new(3.0, 4.0)).await;
        assert_eq!(
            delivery,
            Delivery::Broadcast {
                recipients: 1,
                evicted: 1
            }
        );
        let events = drain(&mut c);
        assert!(events.contains(&location(a.id, 3.0, 4.0)));
        assert_eq!(
            events
                .iter()
                .filter(|e| **e == ServerEvent::UserDisconnect(gone_id))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn five_hundred_sessions_with_one_killed() {
        let hub = Hub::new(8);
        let mut members = Vec::new();
        for _ in 0..500 {
            members.push(join(&hub).await);
        }
        let sender = members.remove(0);
        let killed = members.remove(0);
        let killed_id = killed.id;
        drop(killed);

        let delivery = hub.publish(sender.id, LocationUpdate::new(12.0, 34.0)).await;
        assert_eq!(
            delivery,
            Delivery::Broadcast {
                recipients: 498,
                evicted: 1
            }
        );
        for m in &mut members {
            assert_eq!(
                drain(m),
                vec![
                    location(sender.id, 12.0, 34.0),
                    ServerEvent::UserDisconnect(killed_id)
                ]
            );
        }
    }

    #[tokio::test]
    async fn sessions_are_listed_oldest_first() {
        let hub = Hub::new(4);
        let a = hub.connect().await;
        let b = hub.connect().await;
        let listed = hub.sessions().await;
        assert_eq!(listed.len(), 2);
        assert!(listed[0].connected_at <= listed[1].connected_at);
        let ids: HashSet<SessionId> = listed.iter().map(|s| s.id).collect();
        assert!(ids.contains(&a.id) && ids.contains(&b.id));
    }
}
