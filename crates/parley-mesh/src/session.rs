//! Applies signaling-channel messages to a [`ClientRegistry`] and drives the
//! per-frame volume update.

use parley_proto::{Identity, PlayerEntry, PositionEntry, ServerMessage};
use parley_spatial::{compute_stereo_gain, GainRadii, Position};
use tracing::{debug, info, warn};

use crate::registry::ClientRegistry;

pub struct ClientSession {
    registry: ClientRegistry,
    radii: GainRadii,
}

impl ClientSession {
    pub fn new(registry: ClientRegistry, radii: GainRadii) -> Self {
        Self { registry, radii }
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    /// Read from the registry, which holds the only copy.
    pub fn local_identity(&self) -> Option<Identity> {
        self.registry.local_identity()
    }

    pub fn radii(&self) -> GainRadii {
        self.radii
    }

    /// Apply one server message. Must run inside a Tokio runtime since joins
    /// start a dial.
    pub fn handle(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::Id { id } => {
                info!(identity = %id, "assigned identity");
                self.registry.set_local_identity(id);
            }
            ServerMessage::Players { players } => {
                // Everyone already here dials the newcomer, so just register them.
                for PlayerEntry { id, info } in players {
                    if self.is_self(&id) {
                        continue;
                    }
                    self.registry.add_peer(id, info);
                }
            }
            ServerMessage::Join { id, info } => {
                if self.is_self(&id) {
                    return;
                }
                let peer = self.registry.add_peer(id, info);
                if !peer.has_connection() {
                    self.registry.dial(&peer);
                }
            }
            ServerMessage::Leave { id } => {
                if self.registry.remove_peer(&id).is_none() {
                    debug!(identity = %id, "leave for unknown peer");
                }
            }
            ServerMessage::Name { id, name } => {
                if let Some(peer) = self.registry.get_peer(&id) {
                    peer.update_info(|info| info.set_name(name));
                }
            }
            ServerMessage::Pos { positions } => {
                for PositionEntry { id, pos } in positions {
                    if self.is_self(&id) {
                        continue;
                    }
                    if let Some(peer) = self.registry.get_peer(&id) {
                        peer.update_info(|info| info.set_pos(pos));
                    }
                }
            }
            ServerMessage::Error { message } => {
                warn!(%message, "server reported an error");
            }
        }
    }

    /// The signaling connection dropped or errored.
    pub fn on_signaling_lost(&mut self) {
        self.registry.on_signaling_lost();
    }

    /// Recompute and apply gains for every connected peer as heard from
    /// `listener`. Returns how many outputs were updated.
    pub fn update_volumes(&self, listener: Position) -> usize {
        let mut applied = 0;
        for peer in self.registry.peers() {
            if !peer.is_connected() {
                continue;
            }
            let gain = compute_stereo_gain(listener, peer.info().pos(), &self.radii);
            if peer.apply_gain(gain) {
                applied += 1;
            }
        }
        applied
    }

    fn is_self(&self, id: &Identity) -> bool {
        self.registry.local_identity().as_ref() == Some(id)
    }
}
