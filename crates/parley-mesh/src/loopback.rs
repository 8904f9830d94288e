//! In-process media endpoint for tests and headless wiring. Calls go nowhere;
//! the holder of a [`LoopbackCall`] plays the remote side by emitting events.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use parley_proto::Identity;
use tokio::sync::{mpsc, watch};

use crate::error::{MediaAcquisitionError, SignalingError};
use crate::media::{CallControl, CallEvent, CallHandle, LocalAudio, MediaCaller, MediaStream};

pub struct LoopbackMedia {
    deny_audio: AtomicBool,
    audio_open: watch::Sender<bool>,
    captured: AtomicU64,
    outbound: Mutex<Vec<LoopbackCall>>,
}

impl LoopbackMedia {
    pub fn new() -> Arc<Self> {
        let (audio_open, _) = watch::channel(true);
        Arc::new(Self {
            deny_audio: AtomicBool::new(false),
            audio_open,
            captured: AtomicU64::new(0),
            outbound: Mutex::new(Vec::new()),
        })
    }

    /// Make capture fail with `PermissionDenied` until switched back.
    pub fn deny_audio(&self, deny: bool) {
        self.deny_audio.store(deny, Ordering::SeqCst);
    }

    /// Park every capture request until [`release_audio`](Self::release_audio).
    pub fn hold_audio(&self) {
        self.audio_open.send_replace(false);
    }

    pub fn release_audio(&self) {
        self.audio_open.send_replace(true);
    }

    pub fn outbound_calls(&self) -> Vec<LoopbackCall> {
        self.outbound.lock().clone()
    }

    pub fn last_outbound(&self) -> Option<LoopbackCall> {
        self.outbound.lock().last().cloned()
    }

    /// Fabricate a call arriving from `from`.
    pub fn incoming(&self, from: Identity) -> (CallHandle, LoopbackCall) {
        LoopbackCall::open(from)
    }
}

#[async_trait]
impl LocalAudio for LoopbackMedia {
    async fn acquire_local_audio(&self) -> Result<MediaStream, MediaAcquisitionError> {
        let mut open = self.audio_open.subscribe();
        if open.wait_for(|open| *open).await.is_err() {
            return Err(MediaAcquisitionError::NoDevice);
        }
        if self.deny_audio.load(Ordering::SeqCst) {
            return Err(MediaAcquisitionError::PermissionDenied);
        }
        let n = self.captured.fetch_add(1, Ordering::SeqCst);
        Ok(MediaStream::new(format!("loopback-mic-{n}")))
    }
}

impl MediaCaller for LoopbackMedia {
    fn call(&self, remote: &Identity, _local: MediaStream) -> Result<CallHandle, SignalingError> {
        let (handle, call) = LoopbackCall::open(remote.clone());
        self.outbound.lock().push(call);
        Ok(handle)
    }
}

struct CallState {
    events: Mutex<Option<mpsc::UnboundedSender<CallEvent>>>,
    answered: Mutex<Option<MediaStream>>,
    close_requests: AtomicUsize,
}

impl CallState {
    fn emit(&self, event: CallEvent) {
        if let Some(tx) = self.events.lock().as_ref() {
            let _ = tx.send(event);
        }
    }
}

impl CallControl for CallState {
    fn answer(&self, local: MediaStream) -> Result<(), SignalingError> {
        if self.events.lock().is_none() {
            return Err(SignalingError::Closed);
        }
        *self.answered.lock() = Some(local);
        Ok(())
    }

    fn close(&self) {
        self.close_requests.fetch_add(1, Ordering::SeqCst);
        self.emit(CallEvent::Close);
    }
}

/// Remote side of a loopback call.
#[derive(Clone)]
pub struct LoopbackCall {
    remote: Identity,
    state: Arc<CallState>,
}

impl LoopbackCall {
    fn open(remote: Identity) -> (CallHandle, LoopbackCall) {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(CallState {
            events: Mutex::new(Some(tx)),
            answered: Mutex::new(None),
            close_requests: AtomicUsize::new(0),
        });
        let handle = CallHandle::new(remote.clone(), state.clone(), rx);
        (handle, LoopbackCall { remote, state })
    }

    pub fn remote(&self) -> &Identity {
        &self.remote
    }

    pub fn emit_stream(&self, stream: MediaStream) {
        self.state.emit(CallEvent::Stream(stream));
    }

    pub fn emit_close(&self) {
        self.state.emit(CallEvent::Close);
    }

    pub fn emit_error(&self, reason: &str) {
        self.state.emit(CallEvent::Error(reason.to_string()));
    }

    /// Drop the event sender without a close event, as a crashed transport would.
    pub fn hang_up_transport(&self) {
        self.state.events.lock().take();
    }

    pub fn close_requests(&self) -> usize {
        self.state.close_requests.load(Ordering::SeqCst)
    }

    pub fn answered_with(&self) -> Option<MediaStream> {
        self.state.answered.lock().clone()
    }
}
