//! Per-remote-participant call state machine.
//!
//! ```text
//! idle ──originate──▶ dialing-out ─┐
//!   │                              ├─stream──▶ connected
//!   └───answer─────▶ dialing-in  ──┘
//! any non-idle state ──close / error / destroy──▶ closed (terminal)
//! ```
//!
//! Every call attempt gets an attempt number. Events from the call layer carry
//! the number of the attempt that spawned them, so anything arriving after the
//! attempt ended is recognised and dropped.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use parley_proto::{Identity, PlayerInfo};
use parley_spatial::{SpatialChannel, StereoGain};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::PeerError;
use crate::media::{CallControl, CallEvent, CallHandle, MediaEndpoint, MediaStream};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerPhase {
    Idle,
    DialingOut,
    DialingIn,
    Connected,
    Closed,
}

/// Told once when a peer reaches `closed`.
pub trait PeerObserver: Send + Sync {
    fn peer_closed(&self, peer: &Peer);
}

/// A call that reached the remote media stage.
#[derive(Debug, Clone)]
pub struct Established {
    pub peer: Peer,
    pub remote: MediaStream,
}

/// Deferred outcome of `originate`/`answer`.
pub struct PendingMedia {
    peer: Peer,
    rx: oneshot::Receiver<Result<MediaStream, PeerError>>,
}

impl PendingMedia {
    pub async fn established(self) -> Result<Established, PeerError> {
        match self.rx.await {
            Ok(Ok(remote)) => Ok(Established {
                peer: self.peer,
                remote,
            }),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(PeerError::Closed {
                identity: self.peer.identity().clone(),
            }),
        }
    }

    pub fn peer(&self) -> &Peer {
        &self.peer
    }
}

impl fmt::Debug for PendingMedia {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingMedia")
            .field("peer", self.peer.identity())
            .finish_non_exhaustive()
    }
}

struct CallSlot {
    phase: PeerPhase,
    attempt: u64,
    control: Option<Arc<dyn CallControl>>,
    local: Option<MediaStream>,
    remote: Option<MediaStream>,
    waiter: Option<oneshot::Sender<Result<MediaStream, PeerError>>>,
}

impl CallSlot {
    fn idle() -> Self {
        Self {
            phase: PeerPhase::Idle,
            attempt: 0,
            control: None,
            local: None,
            remote: None,
            waiter: None,
        }
    }
}

struct PeerInner {
    identity: Identity,
    endpoint: Arc<dyn MediaEndpoint>,
    owner: Option<Weak<dyn PeerObserver>>,
    slot: Mutex<CallSlot>,
    info: RwLock<PlayerInfo>,
    output: Mutex<Option<SpatialChannel>>,
}

/// Shared handle to one remote participant. Clones refer to the same instance.
#[derive(Clone)]
pub struct Peer {
    inner: Arc<PeerInner>,
}

impl Peer {
    /// Standalone peer with nobody to notify on close.
    pub fn new(identity: Identity, info: PlayerInfo, endpoint: Arc<dyn MediaEndpoint>) -> Self {
        Self::build(identity, info, endpoint, None)
    }

    pub(crate) fn with_owner(
        identity: Identity,
        info: PlayerInfo,
        endpoint: Arc<dyn MediaEndpoint>,
        owner: Weak<dyn PeerObserver>,
    ) -> Self {
        Self::build(identity, info, endpoint, Some(owner))
    }

    fn build(
        identity: Identity,
        info: PlayerInfo,
        endpoint: Arc<dyn MediaEndpoint>,
        owner: Option<Weak<dyn PeerObserver>>,
    ) -> Self {
        Self {
            inner: Arc::new(PeerInner {
                identity,
                endpoint,
                owner,
                slot: Mutex::new(CallSlot::idle()),
                info: RwLock::new(info),
                output: Mutex::new(None),
            }),
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.inner.identity
    }

    pub fn phase(&self) -> PeerPhase {
        self.inner.slot.lock().phase
    }

    /// Dialing in either direction, or connected.
    pub fn has_connection(&self) -> bool {
        matches!(
            self.phase(),
            PeerPhase::DialingOut | PeerPhase::DialingIn | PeerPhase::Connected
        )
    }

    pub fn is_connected(&self) -> bool {
        self.inner.slot.lock().remote.is_some()
    }

    pub fn local_media(&self) -> Option<MediaStream> {
        self.inner.slot.lock().local.clone()
    }

    pub fn remote_media(&self) -> Option<MediaStream> {
        self.inner.slot.lock().remote.clone()
    }

    /// Both handles point at the same instance.
    pub fn same_instance(&self, other: &Peer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn info(&self) -> PlayerInfo {
        self.inner.info.read().clone()
    }

    pub fn update_info<R>(&self, update: impl FnOnce(&mut PlayerInfo) -> R) -> R {
        update(&mut self.inner.info.write())
    }

    /// Install the gain stage the application built around the remote stream.
    /// Replaces (and closes) any previous one.
    pub fn attach_output(&self, channel: SpatialChannel) {
        if self.phase() == PeerPhase::Closed {
            debug!(identity = %self.identity(), "dropping output for closed peer");
            return;
        }
        let previous = self.inner.output.lock().replace(channel);
        drop(previous);
    }

    /// Write gains into the attached output. Returns false when there is none.
    pub fn apply_gain(&self, gain: StereoGain) -> bool {
        match self.inner.output.lock().as_mut() {
            Some(channel) => {
                channel.apply(gain);
                true
            }
            None => false,
        }
    }

    pub fn output_gain(&self) -> Option<StereoGain> {
        self.inner.output.lock().as_ref().map(SpatialChannel::gain)
    }

    /// Place an outbound call. Valid only while idle.
    ///
    /// Capture failures are returned here and leave the peer idle. The returned
    /// [`PendingMedia`] resolves once remote audio arrives or the call ends.
    pub async fn originate(&self) -> Result<PendingMedia, PeerError> {
        let attempt = self.begin(PeerPhase::DialingOut)?;
        let local = match self.inner.endpoint.acquire_local_audio().await {
            Ok(local) => local,
            Err(err) => {
                warn!(identity = %self.identity(), error = %err, "local audio unavailable");
                self.abandon(attempt);
                return Err(err.into());
            }
        };
        self.ensure_current(attempt)?;

        let handle = match self.inner.endpoint.call(self.identity(), local.clone()) {
            Ok(handle) => handle,
            Err(err) => {
                warn!(identity = %self.identity(), error = %err, "outbound call failed");
                self.abandon(attempt);
                return Err(err.into());
            }
        };
        debug!(identity = %self.identity(), attempt, "dialing out");
        self.track(attempt, local, handle)
    }

    /// Answer an incoming call. Calls addressed to a different identity are
    /// ignored and yield `Ok(None)`.
    pub async fn answer(&self, call: CallHandle) -> Result<Option<PendingMedia>, PeerError> {
        if call.remote() != self.identity() {
            debug!(
                identity = %self.identity(),
                caller = %call.remote(),
                "ignoring call meant for another peer"
            );
            return Ok(None);
        }
        let attempt = match self.begin(PeerPhase::DialingIn) {
            Ok(attempt) => attempt,
            Err(err) => {
                call.reject();
                return Err(err);
            }
        };
        let local = match self.inner.endpoint.acquire_local_audio().await {
            Ok(local) => local,
            Err(err) => {
                warn!(identity = %self.identity(), error = %err, "local audio unavailable");
                self.abandon(attempt);
                call.reject();
                return Err(err.into());
            }
        };
        if let Err(err) = self.ensure_current(attempt) {
            call.reject();
            return Err(err);
        }
        let (remote, control, events) = call.into_parts();
        if let Err(err) = control.answer(local.clone()) {
            warn!(identity = %self.identity(), error = %err, "answer failed");
            self.abandon(attempt);
            control.close();
            return Err(err.into());
        }
        debug!(identity = %self.identity(), attempt, "dialing in");
        self.track(attempt, local, CallHandle::new(remote, control, events))
            .map(Some)
    }

    /// Tear down any call in progress. No-op while idle or already closed.
    pub fn destroy(&self) {
        self.shut_down(
            None,
            PeerError::Closed {
                identity: self.identity().clone(),
            },
        );
    }

    fn begin(&self, next: PeerPhase) -> Result<u64, PeerError> {
        let mut slot = self.inner.slot.lock();
        if slot.phase != PeerPhase::Idle {
            return Err(PeerError::Busy {
                identity: self.identity().clone(),
                phase: slot.phase,
            });
        }
        slot.phase = next;
        slot.attempt += 1;
        Ok(slot.attempt)
    }

    /// Roll a failed attempt back to idle unless something else already moved on.
    fn abandon(&self, attempt: u64) {
        let mut slot = self.inner.slot.lock();
        if slot.attempt == attempt
            && matches!(slot.phase, PeerPhase::DialingOut | PeerPhase::DialingIn)
        {
            slot.phase = PeerPhase::Idle;
            slot.local = None;
        }
    }

    fn ensure_current(&self, attempt: u64) -> Result<(), PeerError> {
        let slot = self.inner.slot.lock();
        if slot.attempt == attempt && slot.phase != PeerPhase::Closed {
            Ok(())
        } else {
            Err(PeerError::Closed {
                identity: self.identity().clone(),
            })
        }
    }

    fn track(
        &self,
        attempt: u64,
        local: MediaStream,
        handle: CallHandle,
    ) -> Result<PendingMedia, PeerError> {
        let (_, control, events) = handle.into_parts();
        let (tx, rx) = oneshot::channel();
        {
            let mut slot = self.inner.slot.lock();
            if slot.attempt != attempt || slot.phase == PeerPhase::Closed {
                drop(slot);
                control.close();
                return Err(PeerError::Closed {
                    identity: self.identity().clone(),
                });
            }
            slot.control = Some(control);
            slot.local = Some(local);
            slot.waiter = Some(tx);
        }
        tokio::spawn(pump_events(Arc::downgrade(&self.inner), attempt, events));
        Ok(PendingMedia {
            peer: self.clone(),
            rx,
        })
    }

    fn on_call_event(&self, attempt: u64, event: CallEvent) {
        match event {
            CallEvent::Stream(remote) => {
                let mut slot = self.inner.slot.lock();
                if slot.attempt != attempt || slot.phase == PeerPhase::Closed {
                    debug!(identity = %self.identity(), attempt, "stale stream event ignored");
                    return;
                }
                let phase = slot.phase;
                match phase {
                    PeerPhase::DialingOut | PeerPhase::DialingIn => {
                        slot.phase = PeerPhase::Connected;
                        slot.remote = Some(remote.clone());
                        if let Some(waiter) = slot.waiter.take() {
                            let _ = waiter.send(Ok(remote));
                        }
                        info!(identity = %self.identity(), "peer connected");
                    }
                    _ => {
                        debug!(identity = %self.identity(), ?phase, "extra stream event ignored");
                    }
                }
            }
            CallEvent::Close => {
                self.shut_down(
                    Some(attempt),
                    PeerError::Closed {
                        identity: self.identity().clone(),
                    },
                );
            }
            CallEvent::Error(reason) => {
                warn!(identity = %self.identity(), %reason, "call error");
                self.shut_down(
                    Some(attempt),
                    PeerError::CallFailed {
                        identity: self.identity().clone(),
                        reason,
                    },
                );
            }
        }
    }

    /// Single path into `closed`. Returns false when there was nothing to
    /// close or the triggering attempt is no longer current.
    fn shut_down(&self, attempt: Option<u64>, cause: PeerError) -> bool {
        let (control, waiter) = {
            let mut slot = self.inner.slot.lock();
            if matches!(slot.phase, PeerPhase::Idle | PeerPhase::Closed) {
                if attempt.is_some() {
                    debug!(identity = %self.identity(), "stale call event ignored");
                }
                return false;
            }
            if let Some(attempt) = attempt {
                if attempt != slot.attempt {
                    debug!(identity = %self.identity(), attempt, "stale call event ignored");
                    return false;
                }
            }
            slot.phase = PeerPhase::Closed;
            slot.attempt += 1;
            slot.local = None;
            slot.remote = None;
            (slot.control.take(), slot.waiter.take())
        };

        if let Some(waiter) = waiter {
            let _ = waiter.send(Err(cause));
        }
        if let Some(control) = control {
            control.close();
        }
        if let Some(mut channel) = self.inner.output.lock().take() {
            channel.close();
        }
        info!(identity = %self.identity(), "peer closed");

        if let Some(owner) = self.inner.owner.as_ref().and_then(Weak::upgrade) {
            owner.peer_closed(self);
        }
        true
    }
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("identity", self.identity())
            .field("phase", &self.phase())
            .finish()
    }
}

async fn pump_events(
    peer: Weak<PeerInner>,
    attempt: u64,
    mut events: mpsc::UnboundedReceiver<CallEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(inner) = peer.upgrade() else {
            return;
        };
        let terminal = matches!(event, CallEvent::Close | CallEvent::Error(_));
        Peer { inner }.on_call_event(attempt, event);
        if terminal {
            return;
        }
    }
    // The call layer dropped its sender without a close event.
    if let Some(inner) = peer.upgrade() {
        Peer { inner }.on_call_event(attempt, CallEvent::Close);
    }
}
