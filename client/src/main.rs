use clap::Parser;
use client::network::ProbeClient;
use log::{info, warn};
use shared::ServerMessage;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:28960")]
    server: String,

    /// Player name sent in the connect userinfo
    #[arg(short = 'n', long, default_value = "probe")]
    name: String,

    /// Number of snapshots to receive before exiting
    #[arg(long, default_value = "20")]
    snapshots: usize,

    /// Also send `ack` after connecting
    #[arg(long)]
    ack: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Connecting to: {}", args.server);
    let mut client = ProbeClient::new(&args.server).await?;

    let challenge = client.request_challenge().await?;
    let connect = client.connect(challenge, &args.name).await?;
    for (key, value) in &connect.config_strings {
        info!("  {} = {}", key, value);
    }
    if let Some(entities) = &connect.first_snapshot {
        info!("First snapshot with {} entities", entities.len());
    }

    if args.ack {
        let (map, game_type) = client.ack().await?;
        info!("Game state: map={} gametype={}", map, game_type);
    }

    let mut received = 0;
    while received < args.snapshots {
        match client.recv_message(Duration::from_secs(1)).await {
            Ok(ServerMessage::Snapshot { entities }) => {
                received += 1;
                info!("Snapshot {} with {} entities", received, entities.len());
                for entity in entities {
                    info!(
                        "  Entity {}: pos=({:.2}, {:.2}, {:.2}) state={}",
                        entity.id,
                        entity.position[0],
                        entity.position[1],
                        entity.position[2],
                        entity.state
                    );
                }
                client.send_status().await?;
            }
            Ok(other) => warn!("Unexpected message: {:?}", other),
            Err(e) => {
                warn!("No snapshot: {}", e);
                break;
            }
        }
    }

    info!("Probe finished after {} snapshots", received);
    Ok(())
}
