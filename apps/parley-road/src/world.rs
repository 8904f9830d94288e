//! Game-level behaviour layered on the registry: roster announcements, name
//! changes and throttled position broadcasts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parley_proto::{ClientMessage, Identity, PlayerInfo, ServerMessage, DEFAULT_GAME_SIZE};
use parley_spatial::Position;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::registry::{IdentityRegistry, RegistryEvent};

#[derive(Clone)]
pub struct World {
    registry: IdentityRegistry,
    half_extent: f64,
    positions_dirty: Arc<AtomicBool>,
}

impl World {
    /// `game_size` must be positive and finite; anything else falls back to
    /// [`DEFAULT_GAME_SIZE`].
    pub fn new(registry: IdentityRegistry, game_size: f64) -> Self {
        let game_size = if game_size.is_finite() && game_size > 0.0 {
            game_size
        } else {
            warn!(game_size, default = DEFAULT_GAME_SIZE, "invalid game size; using default");
            DEFAULT_GAME_SIZE
        };
        Self {
            registry,
            half_extent: game_size / 2.0,
            positions_dirty: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn registry(&self) -> &IdentityRegistry {
        &self.registry
    }

    pub fn handle_event(&self, event: RegistryEvent) {
        match event {
            RegistryEvent::Opened { identity } => {
                debug!(%identity, "waiting for peer-media connection");
            }
            RegistryEvent::FullyConnected { identity } => {
                if !self.registry.is_fully_connected(&identity) {
                    debug!(%identity, "session left before its join was announced");
                    return;
                }
                let players = self.registry.roster();
                self.registry
                    .send_to(&identity, ServerMessage::Players { players });
                let Some(info) = self.registry.info(&identity) else {
                    return;
                };
                let notified = self.registry.broadcast(
                    &ServerMessage::Join {
                        id: identity.clone(),
                        info,
                    },
                    Some(&identity),
                    true,
                );
                info!(%identity, notified, "player joined");
                self.positions_dirty.store(true, Ordering::SeqCst);
            }
            RegistryEvent::Left { identity, .. } => {
                let notified = self.registry.broadcast(
                    &ServerMessage::Leave {
                        id: identity.clone(),
                    },
                    None,
                    false,
                );
                info!(%identity, notified, "player left");
            }
        }
    }

    /// Apply a message from `identity`'s signaling connection. Sessions that
    /// have not finished connecting are ignored.
    pub fn handle_client(&self, identity: &Identity, message: ClientMessage) {
        if !self.registry.is_fully_connected(identity) {
            debug!(%identity, "ignoring message from session without peer-media");
            return;
        }
        match message {
            ClientMessage::Name { name } => {
                if !PlayerInfo::is_valid_name(&name) {
                    warn!(%identity, %name, "dropping invalid name");
                    return;
                }
                self.registry
                    .update_info(identity, |info| info.set_name(name.clone()));
                self.registry.broadcast(
                    &ServerMessage::Name {
                        id: identity.clone(),
                        name,
                    },
                    None,
                    true,
                );
            }
            ClientMessage::Pos { x, y } => {
                let pos = Position::new(x, y);
                if !pos.is_finite() {
                    warn!(%identity, x, y, "rejecting non-finite position");
                    return;
                }
                let pos = pos.clamped(self.half_extent);
                self.registry.update_info(identity, |info| info.set_pos(pos));
                self.positions_dirty.store(true, Ordering::SeqCst);
            }
        }
    }

    /// Broadcast every position if any changed since the last flush.
    pub fn flush_positions(&self) -> bool {
        if !self.positions_dirty.swap(false, Ordering::SeqCst) {
            return false;
        }
        let positions = self.registry.positions();
        self.registry
            .broadcast(&ServerMessage::Pos { positions }, None, true);
        true
    }

    /// Run the event loop and the position ticker until the registry's
    /// event channel closes.
    pub fn spawn(
        self,
        mut events: mpsc::UnboundedReceiver<RegistryEvent>,
        pos_interval: Duration,
    ) -> (JoinHandle<()>, JoinHandle<()>) {
        let ticker_world = self.clone();
        let ticker = tokio::spawn(async move {
            let mut interval = tokio::time::interval(pos_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                ticker_world.flush_positions();
            }
        });
        let pump = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                self.handle_event(event);
            }
            debug!("registry event stream closed");
        });
        (pump, ticker)
    }
}
