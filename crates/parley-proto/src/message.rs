//! JSON messages carried on the signaling channel and the peer-media broker.

use parley_spatial::Position;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{Identity, PlayerInfo};

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerEntry {
    pub id: Identity,
    pub info: PlayerInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionEntry {
    pub id: Identity,
    pub pos: Position,
}

/// Server to client, signaling channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Identity minted for this connection; sent once, first.
    Id { id: Identity },
    /// Everyone currently fully connected, the recipient included.
    Players { players: Vec<PlayerEntry> },
    Join { id: Identity, info: PlayerInfo },
    Leave { id: Identity },
    Name { id: Identity, name: String },
    Pos { positions: Vec<PositionEntry> },
    Error { message: String },
}

/// Client to server, signaling channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Name { name: String },
    Pos { x: f64, y: f64 },
}

/// Client to server, peer-media broker. Payloads are opaque handshake blobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BrokerClientMessage {
    Relay { to: Identity, payload: Value },
}

/// Server to client, peer-media broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BrokerServerMessage {
    Relay { from: Identity, payload: Value },
    /// The broker refused this connection and is about to close it.
    Rejected { reason: String },
}

pub fn encode<T: Serialize>(message: &T) -> Result<String, ProtoError> {
    Ok(serde_json::to_string(message)?)
}

pub fn decode<T: DeserializeOwned>(text: &str) -> Result<T, ProtoError> {
    Ok(serde_json::from_str(text)?)
}
