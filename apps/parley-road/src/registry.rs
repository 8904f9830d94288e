//! Server-side map from identity to [`SessionEntity`], joining the signaling
//! and peer-media connections of each participant.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parley_proto::{
    BrokerServerMessage, Identity, PlayerEntry, PlayerInfo, PositionEntry, ServerMessage,
};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::link::{PeerMediaLink, SignalingLink};
use crate::session::SessionEntity;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("no signaling session for identity {0}")]
    UnknownIdentity(Identity),
    #[error("identity {0} already has a peer-media connection")]
    DuplicateIdentity(Identity),
}

/// Lifecycle notifications for whatever sits on top of the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryEvent {
    /// A signaling connection opened and was given an identity.
    Opened { identity: Identity },
    /// The peer-media connection for `identity` attached.
    FullyConnected { identity: Identity },
    /// The session was torn down. Emitted once per identity.
    Left { identity: Identity, info: PlayerInfo },
}

#[derive(Clone)]
pub struct IdentityRegistry {
    sessions: Arc<DashMap<Identity, SessionEntity>>,
    events: mpsc::UnboundedSender<RegistryEvent>,
}

impl IdentityRegistry {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RegistryEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let registry = Self {
            sessions: Arc::new(DashMap::new()),
            events,
        };
        (registry, rx)
    }

    /// Mint an identity for a fresh signaling connection, register its
    /// session and tell the client who it is.
    pub fn open_signaling(&self, signaling: Arc<dyn SignalingLink>) -> Identity {
        let identity = loop {
            let candidate = Identity::mint();
            match self.sessions.entry(candidate.clone()) {
                Entry::Occupied(_) => continue,
                Entry::Vacant(slot) => {
                    slot.insert(SessionEntity::new(
                        candidate.clone(),
                        signaling.clone(),
                        PlayerInfo::default(),
                    ));
                    break candidate;
                }
            }
        };

        if signaling
            .send(ServerMessage::Id {
                id: identity.clone(),
            })
            .is_err()
        {
            warn!(%identity, "signaling link closed before identity was sent");
        }
        info!(%identity, sessions = self.sessions.len(), "signaling connection opened");
        self.emit(RegistryEvent::Opened {
            identity: identity.clone(),
        });
        identity
    }

    /// Join a peer-media connection to the session that owns `identity`.
    /// Unknown identities and second connections are refused and the link
    /// is closed; neither touches any existing session.
    pub fn attach_peer_media(
        &self,
        identity: &Identity,
        link: Arc<dyn PeerMediaLink>,
    ) -> Result<(), RegistryError> {
        let outcome = match self.sessions.get_mut(identity) {
            None => Err(RegistryError::UnknownIdentity(identity.clone())),
            Some(session) if session.is_fully_connected() => {
                Err(RegistryError::DuplicateIdentity(identity.clone()))
            }
            Some(mut session) => {
                session.attach_peer_media(link.clone());
                // Queued under the entry lock so a racing remove_client can
                // only queue its Left after this.
                self.emit(RegistryEvent::FullyConnected {
                    identity: identity.clone(),
                });
                Ok(())
            }
        };

        match outcome {
            Ok(()) => {
                info!(%identity, link = %link.link_id(), "peer-media connection attached");
                Ok(())
            }
            Err(err) => {
                warn!(%identity, link = %link.link_id(), error = %err, "rejecting peer-media connection");
                let _ = link.send(BrokerServerMessage::Rejected {
                    reason: err.to_string(),
                });
                link.close();
                Err(err)
            }
        }
    }

    /// Tear down the session for `identity`. Safe to call from either
    /// connection's close path, repeatedly, or reentrantly from a link's own
    /// close; only the first call has any effect.
    pub fn remove_client(&self, identity: &Identity) -> bool {
        let Some((_, session)) = self.sessions.remove(identity) else {
            debug!(%identity, "remove for absent session");
            return false;
        };
        let info = session.info().clone();
        if !session.destroy() {
            return false;
        }
        info!(%identity, sessions = self.sessions.len(), "session removed");
        self.emit(RegistryEvent::Left {
            identity: identity.clone(),
            info,
        });
        true
    }

    pub fn signaling_closed(&self, identity: &Identity) -> bool {
        self.remove_client(identity)
    }

    /// A peer-media connection went away. Only the link currently attached
    /// to the session can end it; a refused duplicate closing is ignored.
    pub fn peer_media_closed(&self, identity: &Identity, link_id: Uuid) -> bool {
        let attached = self
            .sessions
            .get(identity)
            .and_then(|session| session.peer_media_id());
        if attached != Some(link_id) {
            debug!(%identity, link = %link_id, "ignoring close of unattached peer-media link");
            return false;
        }
        self.remove_client(identity)
    }

    /// Forward an opaque handshake payload from one peer-media link to
    /// another.
    pub fn relay(
        &self,
        from: &Identity,
        to: &Identity,
        payload: Value,
    ) -> Result<(), RegistryError> {
        let target = self
            .sessions
            .get(to)
            .and_then(|session| session.peer_media().cloned());
        let Some(target) = target else {
            debug!(%from, %to, "relay target has no peer-media connection");
            return Err(RegistryError::UnknownIdentity(to.clone()));
        };
        if target
            .send(BrokerServerMessage::Relay {
                from: from.clone(),
                payload,
            })
            .is_err()
        {
            debug!(%from, %to, "relay target link closed");
        }
        Ok(())
    }

    pub fn contains(&self, identity: &Identity) -> bool {
        self.sessions.contains_key(identity)
    }

    pub fn is_fully_connected(&self, identity: &Identity) -> bool {
        self.sessions
            .get(identity)
            .map(|session| session.is_fully_connected())
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn info(&self, identity: &Identity) -> Option<PlayerInfo> {
        self.sessions
            .get(identity)
            .map(|session| session.info().clone())
    }

    pub fn update_info<R>(
        &self,
        identity: &Identity,
        update: impl FnOnce(&mut PlayerInfo) -> R,
    ) -> Option<R> {
        self.sessions
            .get_mut(identity)
            .map(|mut session| update(session.info_mut()))
    }

    /// Every fully connected session.
    pub fn roster(&self) -> Vec<PlayerEntry> {
        let mut players: Vec<PlayerEntry> = self
            .sessions
            .iter()
            .filter(|entry| entry.is_fully_connected())
            .map(|entry| PlayerEntry {
                id: entry.key().clone(),
                info: entry.info().clone(),
            })
            .collect();
        players.sort_by(|a, b| a.id.cmp(&b.id));
        players
    }

    pub fn positions(&self) -> Vec<PositionEntry> {
        self.roster()
            .into_iter()
            .map(|PlayerEntry { id, info }| PositionEntry {
                id,
                pos: info.pos(),
            })
            .collect()
    }

    pub fn send_to(&self, identity: &Identity, message: ServerMessage) -> bool {
        let link = self
            .sessions
            .get(identity)
            .map(|session| session.signaling().clone());
        match link {
            Some(link) => link.send(message).is_ok(),
            None => false,
        }
    }

    /// Send to every session, or only fully connected ones, skipping
    /// `except`. Returns how many links accepted the message.
    pub fn broadcast(
        &self,
        message: &ServerMessage,
        except: Option<&Identity>,
        fully_connected_only: bool,
    ) -> usize {
        let links: Vec<Arc<dyn SignalingLink>> = self
            .sessions
            .iter()
            .filter(|entry| Some(entry.key()) != except)
            .filter(|entry| !fully_connected_only || entry.is_fully_connected())
            .map(|entry| entry.signaling().clone())
            .collect();
        links
            .into_iter()
            .filter(|link| link.send(message.clone()).is_ok())
            .count()
    }

    fn emit(&self, event: RegistryEvent) {
        if self.events.send(event).is_err() {
            debug!("registry event receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::MemoryLink;
    use parley_spatial::Position;
    use serde_json::json;

    fn open(registry: &IdentityRegistry) -> (Identity, Arc<MemoryLink<ServerMessage>>) {
        let link = MemoryLink::<ServerMessage>::new();
        let identity = registry.open_signaling(link.clone());
        (identity, link)
    }

    #[test_timeout::timeout]
    fn open_sends_identity_and_emits() {
        let (registry, mut events) = IdentityRegistry::new();
        let (identity, link) = open(&registry);

        assert_eq!(
            link.sent(),
            vec![ServerMessage::Id {
                id: identity.clone()
            }]
        );
        assert_eq!(
            events.try_recv().expect("event"),
            RegistryEvent::Opened { identity }
        );
    }

    #[test_timeout::timeout]
    fn identities_are_unique() {
        let (registry, _events) = IdentityRegistry::new();
        let (a, _) = open(&registry);
        let (b, _) = open(&registry);
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
    }

    #[test_timeout::timeout]
    fn attach_to_known_identity_becomes_fully_connected() {
        let (registry, mut events) = IdentityRegistry::new();
        let (identity, _) = open(&registry);
        let _ = events.try_recv();

        let peer = MemoryLink::<BrokerServerMessage>::new();
        registry
            .attach_peer_media(&identity, peer.clone())
            .expect("attach");
        assert!(registry.is_fully_connected(&identity));
        assert!(!peer.is_closed());
        assert_eq!(
            events.try_recv().expect("event"),
            RegistryEvent::FullyConnected { identity }
        );
    }

    #[test_timeout::timeout]
    fn unknown_identity_is_closed_without_side_effects() {
        let (registry, mut events) = IdentityRegistry::new();
        let (known, _) = open(&registry);
        let _ = events.try_recv();

        let peer = MemoryLink::<BrokerServerMessage>::new();
        let err = registry
            .attach_peer_media(&Identity::from("nobody"), peer.clone())
            .unwrap_err();
        assert_eq!(err, RegistryError::UnknownIdentity(Identity::from("nobody")));
        assert_eq!(peer.close_count(), 1);
        assert!(matches!(
            peer.sent().as_slice(),
            [BrokerServerMessage::Rejected { .. }]
        ));
        assert_eq!(registry.len(), 1);
        assert!(!registry.is_fully_connected(&known));
        assert!(events.try_recv().is_err());
    }

    #[test_timeout::timeout]
    fn remove_emits_left_once() {
        let (registry, mut events) = IdentityRegistry::new();
        let (identity, link) = open(&registry);
        let _ = events.try_recv();

        assert!(registry.remove_client(&identity));
        assert!(!registry.remove_client(&identity));
        assert!(!registry.signaling_closed(&identity));
        assert_eq!(link.close_count(), 1);
        assert!(matches!(
            events.try_recv().expect("event"),
            RegistryEvent::Left { .. }
        ));
        assert!(events.try_recv().is_err());
    }

    #[test_timeout::timeout]
    fn relay_reaches_target_peer_link() {
        let (registry, _events) = IdentityRegistry::new();
        let (a, _) = open(&registry);
        let (b, _) = open(&registry);
        let a_peer = MemoryLink::<BrokerServerMessage>::new();
        let b_peer = MemoryLink::<BrokerServerMessage>::new();
        registry.attach_peer_media(&a, a_peer.clone()).expect("a");
        registry.attach_peer_media(&b, b_peer.clone()).expect("b");

        registry
            .relay(&a, &b, json!({"sdp": "offer"}))
            .expect("relay");
        assert_eq!(
            b_peer.sent(),
            vec![BrokerServerMessage::Relay {
                from: a.clone(),
                payload: json!({"sdp": "offer"})
            }]
        );
        assert!(a_peer.sent().is_empty());
        assert!(registry
            .relay(&a, &Identity::from("ghost"), json!(null))
            .is_err());
    }

    #[test_timeout::timeout]
    fn roster_lists_only_fully_connected_sessions() {
        let (registry, _events) = IdentityRegistry::new();
        let (a, _) = open(&registry);
        let (_b, _) = open(&registry);
        registry
            .attach_peer_media(&a, MemoryLink::<BrokerServerMessage>::new())
            .expect("attach");
        registry.update_info(&a, |info| info.set_pos(Position::new(3.0, 4.0)));

        let roster = registry.roster();
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].id, a);
        assert_eq!(
            registry.positions(),
            vec![PositionEntry {
                id: a,
                pos: Position::new(3.0, 4.0)
            }]
        );
    }

    #[test_timeout::timeout]
    fn broadcast_skips_excluded_and_pending() {
        let (registry, _events) = IdentityRegistry::new();
        let (a, a_link) = open(&registry);
        let (b, b_link) = open(&registry);
        let (_c, c_link) = open(&registry);
        for id in [&a, &b] {
            registry
                .attach_peer_media(id, MemoryLink::<BrokerServerMessage>::new())
                .expect("attach");
        }
        for link in [&a_link, &b_link, &c_link] {
            link.take_sent();
        }

        let message = ServerMessage::Leave {
            id: Identity::from("gone"),
        };
        assert_eq!(registry.broadcast(&message, Some(&a), true), 1);
        assert!(a_link.sent().is_empty());
        assert_eq!(b_link.sent(), vec![message.clone()]);
        assert!(c_link.sent().is_empty());

        assert_eq!(registry.broadcast(&message, None, false), 3);
    }
}
