use clap::Parser;
use log::info;
use server::config::ServerConfig;
use server::network::{Server, ServerSettings};
use server::world::EntityTable;
use shared::Entity;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value_t = shared::DEFAULT_PORT)]
    port: u16,

    /// Config file or directory
    #[arg(short, long, default_value = "./config")]
    config: PathBuf,

    /// Milliseconds between snapshot broadcasts
    #[arg(long, default_value = "50")]
    snapshot_interval_ms: u64,

    /// Evict sessions idle for this many seconds (0 keeps them forever)
    #[arg(long, default_value = "0")]
    session_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();

    let config = if args.config.exists() {
        ServerConfig::load_path(&args.config)?
    } else {
        info!("No config at {}, using defaults", args.config.display());
        ServerConfig::default()
    };
    info!(
        "Serving {} ({}) on map {} for up to {} players",
        config.server_name, config.game_type, config.map, config.max_players
    );

    let settings = ServerSettings {
        bind_addr: format!("{}:{}", args.host, args.port),
        snapshot_interval: Duration::from_millis(args.snapshot_interval_ms.max(1)),
        session_timeout: (args.session_timeout_secs > 0)
            .then(|| Duration::from_secs(args.session_timeout_secs)),
    };

    let world = Arc::new(EntityTable::new(vec![Entity::new(
        1,
        [100.0, 200.0, 300.0],
        "active",
    )]));

    let server = Server::new(settings, config, world).await?;

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
