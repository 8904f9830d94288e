//! Capabilities the state machine consumes: local capture and the media-call
//! layer. Negotiation and transport live behind these traits.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parley_proto::Identity;
use tokio::sync::mpsc;

use crate::error::{MediaAcquisitionError, SignalingError};

/// Opaque handle to an audio stream, local or remote.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaStream {
    id: String,
}

impl MediaStream {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    Stream(MediaStream),
    Close,
    Error(String),
}

/// Control side of one media call.
pub trait CallControl: Send + Sync {
    fn answer(&self, local: MediaStream) -> Result<(), SignalingError>;
    /// Request teardown. Must tolerate repeated calls.
    fn close(&self);
}

/// A call as handed out by the media-call layer: who is on the other end, how
/// to control it, and the stream of events it will emit.
pub struct CallHandle {
    remote: Identity,
    control: Arc<dyn CallControl>,
    events: mpsc::UnboundedReceiver<CallEvent>,
}

impl CallHandle {
    pub fn new(
        remote: Identity,
        control: Arc<dyn CallControl>,
        events: mpsc::UnboundedReceiver<CallEvent>,
    ) -> Self {
        Self {
            remote,
            control,
            events,
        }
    }

    pub fn remote(&self) -> &Identity {
        &self.remote
    }

    /// Decline without answering.
    pub fn reject(self) {
        self.control.close();
    }

    pub(crate) fn into_parts(
        self,
    ) -> (
        Identity,
        Arc<dyn CallControl>,
        mpsc::UnboundedReceiver<CallEvent>,
    ) {
        (self.remote, self.control, self.events)
    }
}

impl fmt::Debug for CallHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallHandle")
            .field("remote", &self.remote)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait LocalAudio: Send + Sync {
    async fn acquire_local_audio(&self) -> Result<MediaStream, MediaAcquisitionError>;
}

pub trait MediaCaller: Send + Sync {
    fn call(&self, remote: &Identity, local: MediaStream) -> Result<CallHandle, SignalingError>;
}

/// Everything the local endpoint offers a peer.
pub trait MediaEndpoint: LocalAudio + MediaCaller {}

impl<T: LocalAudio + MediaCaller> MediaEndpoint for T {}
