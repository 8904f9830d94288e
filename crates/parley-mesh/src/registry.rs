use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::RwLock;
use parley_proto::{Identity, PlayerInfo};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::PeerError;
use crate::media::{CallHandle, MediaEndpoint, MediaStream};
use crate::peer::{PendingMedia, Peer, PeerObserver, PeerPhase};

pub const MIN_AUTO_DIAL_INTERVAL: Duration = Duration::from_millis(1);

/// Lifecycle notifications for the application layer.
#[derive(Debug)]
pub enum ClientEvent {
    /// Remote audio is flowing; wire `remote` into the mixer.
    Connected { peer: Peer, remote: MediaStream },
    /// A dial or answer attempt failed before media arrived.
    CallFailed { identity: Identity, error: PeerError },
    /// A call ended. The registry keeps a fresh idle peer for the identity.
    PeerClosed { identity: Identity },
}

/// The single owner of the client's peer set. Cloning shares the same set.
#[derive(Clone)]
pub struct ClientRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    me: Weak<RegistryInner>,
    endpoint: Arc<dyn MediaEndpoint>,
    local: RwLock<Option<Identity>>,
    peers: RwLock<Vec<Peer>>,
    events: mpsc::UnboundedSender<ClientEvent>,
}

impl ClientRegistry {
    pub fn new(endpoint: Arc<dyn MediaEndpoint>) -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let inner = Arc::new_cyclic(|me| RegistryInner {
            me: me.clone(),
            endpoint,
            local: RwLock::new(None),
            peers: RwLock::new(Vec::new()),
            events,
        });
        (Self { inner }, rx)
    }

    pub fn set_local_identity(&self, identity: Identity) {
        *self.inner.local.write() = Some(identity);
    }

    pub fn local_identity(&self) -> Option<Identity> {
        self.inner.local.read().clone()
    }

    /// Register `identity`, or return the peer already registered for it.
    pub fn add_peer(&self, identity: Identity, info: PlayerInfo) -> Peer {
        let mut peers = self.inner.peers.write();
        if let Some(existing) = peers.iter().find(|p| p.identity() == &identity) {
            return existing.clone();
        }
        let peer = self.inner.spawn_peer(identity, info);
        debug!(identity = %peer.identity(), "peer registered");
        peers.push(peer.clone());
        peer
    }

    pub fn get_peer(&self, identity: &Identity) -> Option<Peer> {
        self.inner
            .peers
            .read()
            .iter()
            .find(|p| p.identity() == identity)
            .cloned()
    }

    /// Drop `identity` from the set and destroy it. `None` when absent.
    pub fn remove_peer(&self, identity: &Identity) -> Option<Peer> {
        let removed = {
            let mut peers = self.inner.peers.write();
            let index = peers.iter().position(|p| p.identity() == identity)?;
            peers.remove(index)
        };
        removed.destroy();
        debug!(identity = %identity, "peer removed");
        Some(removed)
    }

    pub fn peers(&self) -> Vec<Peer> {
        self.inner.peers.read().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.peers.read().is_empty()
    }

    /// Originate a call to every peer that has none. Returns how many dials
    /// were started.
    pub fn auto_dial(&self) -> usize {
        let idle: Vec<Peer> = self
            .peers()
            .into_iter()
            .filter(|peer| !peer.has_connection())
            .collect();
        for peer in &idle {
            self.dial(peer);
        }
        idle.len()
    }

    /// Run [`auto_dial`](Self::auto_dial) every `interval` until the returned
    /// handle is stopped or dropped, or the registry goes away. Intervals
    /// shorter than [`MIN_AUTO_DIAL_INTERVAL`] are raised to it.
    pub fn schedule_auto_dial(&self, interval: Duration) -> AutoDialHandle {
        let interval = if interval < MIN_AUTO_DIAL_INTERVAL {
            warn!(
                requested_ms = interval.as_millis() as u64,
                "auto-dial interval too short; using the minimum"
            );
            MIN_AUTO_DIAL_INTERVAL
        } else {
            interval
        };
        let registry = Arc::downgrade(&self.inner);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = registry.upgrade() else {
                    break;
                };
                let started = ClientRegistry { inner }.auto_dial();
                if started > 0 {
                    debug!(started, "auto-dial pass");
                }
            }
        });
        AutoDialHandle { task }
    }

    /// Start an outbound call to `peer` in the background. The handle completes
    /// once the call is placed or has failed locally.
    pub fn dial(&self, peer: &Peer) -> JoinHandle<()> {
        let registry = self.clone();
        let peer = peer.clone();
        tokio::spawn(async move {
            match peer.originate().await {
                Ok(pending) => registry.watch(pending),
                Err(PeerError::Busy { .. }) => {}
                Err(error) => registry.emit(ClientEvent::CallFailed {
                    identity: peer.identity().clone(),
                    error,
                }),
            }
        })
    }

    /// Route an incoming call to the matching peer and answer it.
    ///
    /// Calls from unknown identities or already connected peers are rejected.
    /// When both sides dial each other at once, the side with the higher
    /// identity drops its own attempt and answers; the other side rejects.
    pub fn on_incoming_call(&self, call: CallHandle) -> Option<JoinHandle<()>> {
        let caller = call.remote().clone();
        let Some(mut peer) = self.get_peer(&caller) else {
            debug!(caller = %caller, "rejecting call from unknown peer");
            call.reject();
            return None;
        };
        if peer.is_connected() {
            debug!(caller = %caller, "rejecting call, already connected");
            call.reject();
            return None;
        }
        if peer.phase() == PeerPhase::DialingOut && self.yields_to(&caller) {
            info!(caller = %caller, "crossed dials; answering instead");
            peer.destroy();
            match self.get_peer(&caller) {
                Some(fresh) => peer = fresh,
                None => {
                    call.reject();
                    return None;
                }
            }
        } else if peer.has_connection() {
            debug!(caller = %caller, phase = ?peer.phase(), "rejecting call, already dialing");
            call.reject();
            return None;
        }

        let registry = self.clone();
        Some(tokio::spawn(async move {
            match peer.answer(call).await {
                Ok(Some(pending)) => registry.watch(pending),
                Ok(None) => {}
                Err(error) => {
                    warn!(caller = %peer.identity(), error = %error, "answer failed");
                    registry.emit(ClientEvent::CallFailed {
                        identity: peer.identity().clone(),
                        error,
                    });
                }
            }
        }))
    }

    /// The signaling channel is gone: every peer is torn down and forgotten.
    pub fn on_signaling_lost(&self) {
        let peers = std::mem::take(&mut *self.inner.peers.write());
        info!(count = peers.len(), "signaling lost; dropping peers");
        for peer in peers {
            peer.destroy();
        }
    }

    fn yields_to(&self, caller: &Identity) -> bool {
        self.local_identity()
            .map(|local| local > *caller)
            .unwrap_or(false)
    }

    fn watch(&self, pending: PendingMedia) {
        let registry = self.clone();
        tokio::spawn(async move {
            let identity = pending.peer().identity().clone();
            match pending.established().await {
                Ok(established) => registry.emit(ClientEvent::Connected {
                    peer: established.peer,
                    remote: established.remote,
                }),
                Err(PeerError::Closed { .. }) => {
                    debug!(identity = %identity, "call closed before media arrived");
                }
                Err(error) => registry.emit(ClientEvent::CallFailed { identity, error }),
            }
        });
    }

    fn emit(&self, event: ClientEvent) {
        self.inner.emit(event);
    }
}

impl RegistryInner {
    fn spawn_peer(&self, identity: Identity, info: PlayerInfo) -> Peer {
        let owner: Weak<dyn PeerObserver> = self.me.clone();
        Peer::with_owner(identity, info, self.endpoint.clone(), owner)
    }

    fn emit(&self, event: ClientEvent) {
        if self.events.send(event).is_err() {
            debug!("client event receiver dropped");
        }
    }
}

impl PeerObserver for RegistryInner {
    /// Swap the closed instance for a fresh idle one so the identity can be
    /// dialed again. Instances no longer in the set are left alone.
    fn peer_closed(&self, closed: &Peer) {
        {
            let mut peers = self.peers.write();
            if let Some(slot) = peers.iter_mut().find(|p| p.same_instance(closed)) {
                *slot = self.spawn_peer(closed.identity().clone(), closed.info());
            }
        }
        self.emit(ClientEvent::PeerClosed {
            identity: closed.identity().clone(),
        });
    }
}

/// Stops the scheduled auto-dial when stopped or dropped.
#[derive(Debug)]
pub struct AutoDialHandle {
    task: JoinHandle<()>,
}

impl AutoDialHandle {
    pub fn stop(self) {
        self.task.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for AutoDialHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::LoopbackMedia;

    fn registry() -> (
        ClientRegistry,
        mpsc::UnboundedReceiver<ClientEvent>,
        Arc<LoopbackMedia>,
    ) {
        let media = LoopbackMedia::new();
        let (registry, events) = ClientRegistry::new(media.clone());
        (registry, events, media)
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[test_timeout::tokio_timeout_test]
    async fn add_peer_is_idempotent() {
        let (registry, _events, _media) = registry();
        let first = registry.add_peer(Identity::from("bob"), PlayerInfo::default());
        let second = registry.add_peer(Identity::from("bob"), PlayerInfo::default());
        assert!(first.same_instance(&second));
        assert_eq!(registry.len(), 1);
    }

    #[test_timeout::tokio_timeout_test]
    async fn remove_absent_peer_returns_none() {
        let (registry, _events, _media) = registry();
        assert!(registry.remove_peer(&Identity::from("ghost")).is_none());
        assert!(registry.is_empty());
    }

    #[test_timeout::tokio_timeout_test]
    async fn remove_peer_destroys_its_call() {
        let (registry, mut events, media) = registry();
        let peer = registry.add_peer(Identity::from("bob"), PlayerInfo::default());
        registry.dial(&peer).await.expect("dial task");
        assert_eq!(peer.phase(), PeerPhase::DialingOut);

        let removed = registry.remove_peer(&Identity::from("bob")).expect("present");
        assert!(removed.same_instance(&peer));
        assert_eq!(removed.phase(), PeerPhase::Closed);
        assert_eq!(media.last_outbound().expect("call").close_requests(), 1);
        assert!(registry.get_peer(&Identity::from("bob")).is_none());

        removed.destroy();
        settle().await;
        let mut closed = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, ClientEvent::PeerClosed { .. }) {
                closed += 1;
            }
        }
        assert_eq!(closed, 1);
    }

    #[test_timeout::tokio_timeout_test]
    async fn auto_dial_skips_peers_with_calls() {
        let (registry, _events, media) = registry();
        let bob = registry.add_peer(Identity::from("bob"), PlayerInfo::default());
        registry.add_peer(Identity::from("carol"), PlayerInfo::default());
        registry.dial(&bob).await.expect("dial");

        assert_eq!(registry.auto_dial(), 1);
        settle().await;
        let dialed: Vec<Identity> = media
            .outbound_calls()
            .iter()
            .map(|call| call.remote().clone())
            .collect();
        assert_eq!(dialed, vec![Identity::from("bob"), Identity::from("carol")]);
        assert_eq!(registry.auto_dial(), 0);
    }

    #[test_timeout::tokio_timeout_test]
    async fn connected_event_carries_remote_media() {
        let (registry, mut events, media) = registry();
        let peer = registry.add_peer(Identity::from("bob"), PlayerInfo::default());
        registry.dial(&peer).await.expect("dial");
        media
            .last_outbound()
            .expect("call")
            .emit_stream(MediaStream::new("bob-mic"));

        match events.recv().await.expect("event") {
            ClientEvent::Connected { peer: connected, remote } => {
                assert!(connected.same_instance(&peer));
                assert_eq!(remote, MediaStream::new("bob-mic"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test_timeout::tokio_timeout_test]
    async fn closed_peer_is_replaced_with_idle_instance() {
        let (registry, mut events, media) = registry();
        let mut info = PlayerInfo::default();
        info.set_name("bob");
        let peer = registry.add_peer(Identity::from("bob"), info);
        registry.dial(&peer).await.expect("dial");
        media.last_outbound().expect("call").emit_error("dtls");
        settle().await;

        assert_eq!(peer.phase(), PeerPhase::Closed);
        let fresh = registry.get_peer(&Identity::from("bob")).expect("respawned");
        assert!(!fresh.same_instance(&peer));
        assert_eq!(fresh.phase(), PeerPhase::Idle);
        assert_eq!(fresh.info().name(), "bob");
        assert_eq!(registry.len(), 1);

        let mut saw_failure = false;
        let mut saw_close = false;
        while let Ok(event) = events.try_recv() {
            match event {
                ClientEvent::CallFailed { .. } => saw_failure = true,
                ClientEvent::PeerClosed { .. } => saw_close = true,
                ClientEvent::Connected { .. } => panic!("never connected"),
            }
        }
        assert!(saw_failure && saw_close);
    }

    #[test_timeout::tokio_timeout_test]
    async fn capture_failure_does_not_disturb_other_peers() {
        let (registry, mut events, media) = registry();
        let bob = registry.add_peer(Identity::from("bob"), PlayerInfo::default());
        let carol = registry.add_peer(Identity::from("carol"), PlayerInfo::default());
        registry.dial(&bob).await.expect("dial");

        media.deny_audio(true);
        registry.dial(&carol).await.expect("dial");

        assert_eq!(bob.phase(), PeerPhase::DialingOut);
        assert_eq!(carol.phase(), PeerPhase::Idle);
        assert_eq!(registry.len(), 2);
        assert!(matches!(
            events.recv().await,
            Some(ClientEvent::CallFailed {
                error: PeerError::MediaAcquisition(_),
                ..
            })
        ));
    }

    #[test_timeout::tokio_timeout_test]
    async fn incoming_call_from_unknown_identity_is_rejected() {
        let (registry, _events, media) = registry();
        let (call, remote) = media.incoming(Identity::from("stranger"));
        assert!(registry.on_incoming_call(call).is_none());
        assert_eq!(remote.close_requests(), 1);
    }

    #[test_timeout::tokio_timeout_test]
    async fn incoming_call_is_answered() {
        let (registry, _events, media) = registry();
        let peer = registry.add_peer(Identity::from("bob"), PlayerInfo::default());
        let (call, remote) = media.incoming(Identity::from("bob"));
        registry
            .on_incoming_call(call)
            .expect("routed")
            .await
            .expect("answer task");
        assert!(remote.answered_with().is_some());
        assert_eq!(peer.phase(), PeerPhase::DialingIn);
    }

    #[test_timeout::tokio_timeout_test]
    async fn crossed_dials_resolve_by_identity_order() {
        let (registry, _events, media) = registry();
        registry.set_local_identity(Identity::from("zed"));
        let peer = registry.add_peer(Identity::from("amy"), PlayerInfo::default());
        registry.dial(&peer).await.expect("dial");

        let (call, remote) = media.incoming(Identity::from("amy"));
        let answering = registry.on_incoming_call(call).expect("routed");
        tokio::time::timeout(Duration::from_secs(5), answering)
            .await
            .expect("answer finished")
            .expect("answer task");

        assert_eq!(peer.phase(), PeerPhase::Closed);
        let current = registry.get_peer(&Identity::from("amy")).expect("peer");
        assert_eq!(current.phase(), PeerPhase::DialingIn);
        assert!(remote.answered_with().is_some());
    }

    #[test_timeout::tokio_timeout_test]
    async fn lower_identity_keeps_its_own_dial() {
        let (registry, _events, media) = registry();
        registry.set_local_identity(Identity::from("amy"));
        let peer = registry.add_peer(Identity::from("zed"), PlayerInfo::default());
        registry.dial(&peer).await.expect("dial");

        let (call, remote) = media.incoming(Identity::from("zed"));
        assert!(registry.on_incoming_call(call).is_none());
        assert_eq!(peer.phase(), PeerPhase::DialingOut);
        assert_eq!(remote.close_requests(), 1);
    }

    #[test_timeout::tokio_timeout_test]
    async fn signaling_loss_clears_everything() {
        let (registry, _events, media) = registry();
        let bob = registry.add_peer(Identity::from("bob"), PlayerInfo::default());
        registry.add_peer(Identity::from("carol"), PlayerInfo::default());
        registry.dial(&bob).await.expect("dial");

        registry.on_signaling_lost();
        assert!(registry.is_empty());
        assert_eq!(bob.phase(), PeerPhase::Closed);
        assert_eq!(media.last_outbound().expect("call").close_requests(), 1);
    }

    #[test_timeout::tokio_timeout_test]
    async fn scheduled_auto_dial_runs_until_dropped() {
        let (registry, _events, media) = registry();
        registry.add_peer(Identity::from("bob"), PlayerInfo::default());
        let handle = registry.schedule_auto_dial(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(media.outbound_calls().len(), 1);

        handle.stop();
        registry.add_peer(Identity::from("carol"), PlayerInfo::default());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(media.outbound_calls().len(), 1);
    }

    #[test_timeout::tokio_timeout_test]
    async fn zero_interval_still_dials() {
        let (registry, _events, media) = registry();
        registry.add_peer(Identity::from("bob"), PlayerInfo::default());
        let handle = registry.schedule_auto_dial(Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(handle.is_running());
        assert_eq!(media.outbound_calls().len(), 1);
        handle.stop();
    }
}
