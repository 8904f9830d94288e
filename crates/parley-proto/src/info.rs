use parley_spatial::Position;
use serde::{Deserialize, Serialize};

pub const MAX_NAME_LEN: usize = 10;

/// Application state attached to a participant.
///
/// Fields change only through the setters, each of which bumps `revision` so
/// observers can tell stale copies apart.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PlayerInfo {
    name: String,
    avatar: u8,
    pos: Position,
    #[serde(skip)]
    revision: u64,
}

impl PlayerInfo {
    pub fn new(name: impl Into<String>, avatar: u8, pos: Position) -> Self {
        Self {
            name: name.into(),
            avatar,
            pos,
            revision: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn avatar(&self) -> u8 {
        self.avatar
    }

    pub fn pos(&self) -> Position {
        self.pos
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.revision += 1;
    }

    pub fn set_avatar(&mut self, avatar: u8) {
        self.avatar = avatar;
        self.revision += 1;
    }

    pub fn set_pos(&mut self, pos: Position) {
        self.pos = pos;
        self.revision += 1;
    }

    /// Names are up to ten ASCII letters, digits, `_` or `-`. Empty is allowed.
    pub fn is_valid_name(name: &str) -> bool {
        name.len() <= MAX_NAME_LEN
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    }
}
