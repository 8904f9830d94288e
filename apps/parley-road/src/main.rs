use anyhow::{Context, Result};
use clap::Parser;
use parley_road::{cli::Cli, config::Config, router, AppState, IdentityRegistry, World};
use tracing::info;
use tracing::Level;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = Config::from_env().with_cli(&cli);
    info!(
        port = config.port,
        game_size = config.game_size,
        pos_broadcast_ms = config.pos_broadcast_ms,
        "starting parley road"
    );

    let (registry, events) = IdentityRegistry::new();
    let world = World::new(registry.clone(), config.game_size);
    let _tasks = world
        .clone()
        .spawn(events, config.pos_broadcast_interval());

    let app = router(AppState { registry, world });

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "parley road listening");

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_env_filter(filter)
        .init();
}
