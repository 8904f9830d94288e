use parley_proto::Identity;
use thiserror::Error;

use crate::peer::PeerPhase;

/// Local capture could not be started. Scoped to the one call attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaAcquisitionError {
    #[error("microphone permission denied")]
    PermissionDenied,
    #[error("no audio input device")]
    NoDevice,
    #[error("audio capture failed: {0}")]
    Capture(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignalingError {
    #[error("signaling channel closed")]
    Closed,
    #[error("signaling transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PeerError {
    #[error(transparent)]
    MediaAcquisition(#[from] MediaAcquisitionError),
    #[error(transparent)]
    Signaling(#[from] SignalingError),
    #[error("peer {identity} already has a call ({phase:?})")]
    Busy { identity: Identity, phase: PeerPhase },
    #[error("peer {identity} closed")]
    Closed { identity: Identity },
    #[error("call with {identity} failed: {reason}")]
    CallFailed { identity: Identity, reason: String },
}
