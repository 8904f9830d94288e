pub mod identity;
pub mod info;
pub mod message;

pub use identity::Identity;
pub use info::{PlayerInfo, MAX_NAME_LEN};
pub use message::{
    decode, encode, BrokerClientMessage, BrokerServerMessage, ClientMessage, PlayerEntry,
    PositionEntry, ProtoError, ServerMessage,
};

/// Edge length of the square play area; positions are clamped to half of it.
pub const DEFAULT_GAME_SIZE: f64 = 400.0;
