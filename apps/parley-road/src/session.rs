use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parley_proto::{BrokerServerMessage, Identity, PlayerInfo, ServerMessage};
use tracing::debug;
use uuid::Uuid;

use crate::link::{PeerMediaLink, SignalingLink};

/// One participant from the server's side: the signaling connection that
/// created it plus, once it shows up, the matching peer-media connection.
pub struct SessionEntity {
    identity: Identity,
    signaling: Arc<dyn SignalingLink>,
    peer_media: Option<Arc<dyn PeerMediaLink>>,
    info: PlayerInfo,
    destroyed: AtomicBool,
}

impl SessionEntity {
    pub fn new(identity: Identity, signaling: Arc<dyn SignalingLink>, info: PlayerInfo) -> Self {
        Self {
            identity,
            signaling,
            peer_media: None,
            info,
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn info(&self) -> &PlayerInfo {
        &self.info
    }

    pub fn info_mut(&mut self) -> &mut PlayerInfo {
        &mut self.info
    }

    pub fn signaling(&self) -> &Arc<dyn SignalingLink> {
        &self.signaling
    }

    pub fn peer_media(&self) -> Option<&Arc<dyn PeerMediaLink>> {
        self.peer_media.as_ref()
    }

    pub fn peer_media_id(&self) -> Option<Uuid> {
        self.peer_media.as_ref().map(|link| link.link_id())
    }

    pub fn is_fully_connected(&self) -> bool {
        self.peer_media.is_some()
    }

    /// Attach the peer-media link, replacing any previous one. The registry
    /// only calls this for sessions that have none.
    pub fn attach_peer_media(
        &mut self,
        link: Arc<dyn PeerMediaLink>,
    ) -> Option<Arc<dyn PeerMediaLink>> {
        self.peer_media.replace(link)
    }

    pub fn send(&self, message: ServerMessage) -> bool {
        match self.signaling.send(message) {
            Ok(()) => true,
            Err(_) => {
                debug!(identity = %self.identity, "signaling link closed; message dropped");
                false
            }
        }
    }

    pub fn send_peer(&self, message: BrokerServerMessage) -> bool {
        match &self.peer_media {
            Some(link) => link.send(message).is_ok(),
            None => false,
        }
    }

    /// Disconnect both links. Returns true only for the call that actually
    /// tore the session down.
    pub fn destroy(&self) -> bool {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.signaling.disconnect();
        if let Some(link) = &self.peer_media {
            link.close();
        }
        true
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::MemoryLink;

    #[test_timeout::timeout]
    fn destroy_closes_both_links_once() {
        let signaling = MemoryLink::<ServerMessage>::new();
        let peer = MemoryLink::<BrokerServerMessage>::new();
        let mut session = SessionEntity::new(
            Identity::from("s1"),
            signaling.clone(),
            PlayerInfo::default(),
        );
        session.attach_peer_media(peer.clone());

        assert!(session.destroy());
        assert!(!session.destroy());
        assert_eq!(signaling.close_count(), 1);
        assert_eq!(peer.close_count(), 1);
        assert!(session.is_destroyed());
    }

    #[test_timeout::timeout]
    fn destroy_without_peer_media_only_drops_signaling() {
        let signaling = MemoryLink::<ServerMessage>::new();
        let session = SessionEntity::new(
            Identity::from("s1"),
            signaling.clone(),
            PlayerInfo::default(),
        );
        assert!(!session.is_fully_connected());
        assert!(session.destroy());
        assert_eq!(signaling.close_count(), 1);
    }

    #[test_timeout::timeout]
    fn attach_overwrites_and_returns_previous() {
        let signaling = MemoryLink::<ServerMessage>::new();
        let first = MemoryLink::<BrokerServerMessage>::new();
        let second = MemoryLink::<BrokerServerMessage>::new();
        let mut session = SessionEntity::new(
            Identity::from("s1"),
            signaling,
            PlayerInfo::default(),
        );
        assert!(session.attach_peer_media(first.clone()).is_none());
        let previous = session.attach_peer_media(second.clone()).expect("previous link");
        assert_eq!(previous.link_id(), first.link_id());
        assert_eq!(session.peer_media_id(), Some(second.link_id()));
    }

    #[test_timeout::timeout]
    fn send_after_disconnect_reports_failure() {
        let signaling = MemoryLink::<ServerMessage>::new();
        let session = SessionEntity::new(
            Identity::from("s1"),
            signaling.clone(),
            PlayerInfo::default(),
        );
        assert!(session.send(ServerMessage::Leave {
            id: Identity::from("x")
        }));
        session.destroy();
        assert!(!session.send(ServerMessage::Leave {
            id: Identity::from("y")
        }));
        assert_eq!(signaling.sent().len(), 1);
    }
}
