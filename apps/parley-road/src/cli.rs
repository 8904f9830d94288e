use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "parley-road")]
#[command(about = "Parley signaling server and peer-media broker")]
pub struct Cli {
    /// Port to listen on (overrides PARLEY_ROAD_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Side length of the play area (overrides PARLEY_GAME_SIZE)
    #[arg(long)]
    pub game_size: Option<f64>,

    /// Position broadcast interval in milliseconds (overrides PARLEY_POS_BROADCAST_MS)
    #[arg(long)]
    pub pos_interval_ms: Option<u64>,
}
