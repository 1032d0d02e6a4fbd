//! Local table of peer positions.
//!
//! The relay keeps nothing; whatever a client wants to draw (map markers, a
//! globe) it has to retain itself. `PeerMap` is that table: the last position
//! each peer reported, dropped when the peer disconnects.

use std::collections::HashMap;

use relay_shared::net::{LocationUpdate, ServerEvent, SessionId};

/// Last known position of one peer.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerPosition {
    pub location: LocationUpdate,
    /// Updates received from this peer since it was first seen.
    pub updates: u64,
}

/// What an event did to the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerChange {
    Joined(SessionId),
    Moved(SessionId),
    Left(SessionId),
    /// Event carried no peer information, or named an unknown peer.
    None,
}

#[derive(Debug, Default)]
pub struct PeerMap {
    peers: HashMap<SessionId, PeerPosition>,
}

impl PeerMap {
    /// Applies one relay event.
    pub fn apply(&mut self, event: &ServerEvent) -> PeerChange {
        match event {
            ServerEvent::ReceiveLocation(env) => match self.peers.get_mut(&env.id) {
                Some(peer) => {
                    peer.location = env.location.clone();
                    peer.updates += 1;
                    PeerChange::Moved(env.id)
                }
                None => {
                    self.peers.insert(
                        env.id,
                        PeerPosition {
                            location: env.location.clone(),
                            updates: 1,
                        },
                    );
                    PeerChange::Joined(env.id)
                }
            },
            ServerEvent::UserDisconnect(id) => match self.peers.remove(id) {
                Some(_) => PeerChange::Left(*id),
                None => PeerChange::None,
            },
            ServerEvent::Welcome { .. } => PeerChange::None,
        }
    }

    pub fn get(&self, id: &SessionId) -> Option<&PeerPosition> {
        self.peers.get(id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SessionId, &PeerPosition)> {
        self.peers.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_shared::net::BroadcastEnvelope;

    fn moved(id: SessionId, lat: f64, lon: f64) -> ServerEvent {
        ServerEvent::ReceiveLocation(BroadcastEnvelope::new(id, LocationUpdate::new(lat, lon)))
    }

    #[test]
    fn tracks_latest_position() {
        let mut peers = PeerMap::default();
        let a = SessionId::new_unique();

        assert_eq!(peers.apply(&moved(a, 1.0, 2.0)), PeerChange::Joined(a));
        assert_eq!(peers.apply(&moved(a, 3.0, 4.0)), PeerChange::Moved(a));

        let pos = peers.get(&a).unwrap();
        assert_eq!(pos.location, LocationUpdate::new(3.0, 4.0));
        assert_eq!(pos.updates, 2);
    }

    #[test]
    fn disconnect_removes_marker() {
        let mut peers = PeerMap::default();
        let a = SessionId::new_unique();
        let b = SessionId::new_unique();
        peers.apply(&moved(a, 1.0, 2.0));
        peers.apply(&moved(b, 5.0, 6.0));

        assert_eq!(peers.apply(&ServerEvent::UserDisconnect(a)), PeerChange::Left(a));
        assert_eq!(peers.len(), 1);
        assert!(peers.get(&a).is_none());

        // A peer that never reported is not in the table.
        let silent = SessionId::new_unique();
        assert_eq!(peers.apply(&ServerEvent::UserDisconnect(silent)), PeerChange::None);
    }

    #[test]
    fn welcome_is_ignored() {
        let mut peers = PeerMap::default();
        let me = SessionId::new_unique();
        assert_eq!(peers.apply(&ServerEvent::Welcome { id: me }), PeerChange::None);
        assert!(peers.is_empty());
    }
}
