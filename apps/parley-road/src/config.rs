use std::env;
use std::time::Duration;

use parley_proto::DEFAULT_GAME_SIZE;

use crate::cli::Cli;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub port: u16,
    /// Side length of the square play area; positions are clamped to half of it.
    pub game_size: f64,
    pub pos_broadcast_ms: u64,
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let port = env::var("PARLEY_ROAD_PORT")
            .ok()
            .and_then(|val| val.parse().ok())
            .unwrap_or(defaults.port);
        let game_size = env::var("PARLEY_GAME_SIZE")
            .ok()
            .and_then(|val| val.parse::<f64>().ok())
            .filter(|size| size.is_finite() && *size > 0.0)
            .unwrap_or(defaults.game_size);
        let pos_broadcast_ms = env::var("PARLEY_POS_BROADCAST_MS")
            .ok()
            .and_then(|val| val.parse().ok())
            .filter(|ms| *ms > 0)
            .unwrap_or(defaults.pos_broadcast_ms);

        Self {
            port,
            game_size,
            pos_broadcast_ms,
        }
    }

    /// Command-line flags win over the environment.
    pub fn with_cli(mut self, cli: &Cli) -> Self {
        if let Some(port) = cli.port {
            self.port = port;
        }
        if let Some(size) = cli.game_size.filter(|size| size.is_finite() && *size > 0.0) {
            self.game_size = size;
        }
        if let Some(ms) = cli.pos_interval_ms.filter(|ms| *ms > 0) {
            self.pos_broadcast_ms = ms;
        }
        self
    }

    pub fn pos_broadcast_interval(&self) -> Duration {
        Duration::from_millis(self.pos_broadcast_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            game_size: DEFAULT_GAME_SIZE,
            pos_broadcast_ms: 25,
        }
    }
}
