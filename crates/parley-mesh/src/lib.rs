//! Client half of Parley: one call state machine per remote participant, the
//! registry that owns them, and the session driver that feeds roster updates
//! from the signaling channel into the registry.

pub mod error;
pub mod loopback;
pub mod media;
pub mod peer;
pub mod registry;
pub mod session;

pub use error::{MediaAcquisitionError, PeerError, SignalingError};
pub use media::{CallControl, CallEvent, CallHandle, LocalAudio, MediaCaller, MediaEndpoint, MediaStream};
pub use peer::{Established, PendingMedia, Peer, PeerObserver, PeerPhase};
pub use registry::{AutoDialHandle, ClientEvent, ClientRegistry, MIN_AUTO_DIAL_INTERVAL};
pub use session::ClientSession;
