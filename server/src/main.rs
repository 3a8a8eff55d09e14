use clap::Parser;
use log::{error, info};
use raiders_server::config::{EnemyRegistry, ServerConfig};
use raiders_server::entity::Portal;
use raiders_server::jobs::spawn_storage_worker;
use raiders_server::map_manager::MapManager;
use raiders_server::network::NetworkManager;
use raiders_server::persistence::{MemoryStore, Stores};
use raiders_server::session_manager::SessionManager;
use raiders_server::tilemap::Tilemap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// TCP port for sessions
    #[arg(short, long, default_value = "7777")]
    port: u16,

    /// UDP port for movement input (defaults to the TCP port)
    #[arg(short, long)]
    udp_port: Option<u16>,

    /// Tick rate (updates per second) of every map
    #[arg(short, long, default_value = "60")]
    tick_rate: u32,

    /// Enemy population ceiling per map
    #[arg(long, default_value = "10")]
    max_enemies: usize,

    /// Milliseconds between spawner runs
    #[arg(long, default_value = "5000")]
    spawn_interval_ms: u64,

    /// Enemies seeded on each map at load
    #[arg(long, default_value = "100")]
    initial_enemies: usize,

    /// Milliseconds a dead enemy waits before respawning
    #[arg(long, default_value = "10000")]
    respawn_delay_ms: u64,

    /// Seconds of silence before a session is dropped
    #[arg(long, default_value = "30")]
    heartbeat_timeout_secs: u64,

    /// Maximum number of concurrent sessions
    #[arg(long, default_value = "256")]
    max_sessions: usize,

    /// Maps to load; players join the first. Consecutive maps are linked by portals.
    #[arg(short, long, value_delimiter = ',', default_value = "main")]
    maps: Vec<String>,

    /// Width and height of each generated map, in tiles
    #[arg(long, default_value = "100")]
    map_size: usize,

    /// Log filter, overrides RUST_LOG
    #[arg(short, long)]
    log_level: Option<String>,
}

impl Args {
    fn server_config(&self) -> ServerConfig {
        let defaults = ServerConfig::default();
        ServerConfig {
            host: self.host.clone(),
            tcp_port: self.port,
            udp_port: self.udp_port.unwrap_or(self.port),
            tick_rate: self.tick_rate.max(1),
            max_enemies: self.max_enemies,
            spawn_interval: Duration::from_millis(self.spawn_interval_ms),
            initial_enemies: self.initial_enemies,
            enemy_respawn_delay: Duration::from_millis(self.respawn_delay_ms),
            max_sessions: self.max_sessions,
            heartbeat_timeout: Duration::from_secs(self.heartbeat_timeout_secs),
            default_map: self
                .maps
                .first()
                .cloned()
                .unwrap_or(defaults.default_map.clone()),
            ..defaults
        }
    }
}

fn init_logging(level: Option<&str>) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Some(level) = level {
        builder.parse_filters(level);
    }
    builder.init();
}

/// A portal spot far from the safe zone, so arrivals never land on one
fn portal_site(tilemap: &Tilemap) -> Option<(f32, f32)> {
    tilemap.open_ground().last().copied()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(args.log_level.as_deref());

    let config = Arc::new(args.server_config());
    info!(
        "Starting server on {} (UDP {}) at {} Hz",
        config.tcp_addr(),
        config.udp_port,
        config.tick_rate
    );

    let store = Arc::new(MemoryStore::with_defaults());
    let stores = Stores::memory(store);
    let (jobs, storage_worker) = spawn_storage_worker(stores.clone());

    let sessions = Arc::new(SessionManager::new(config.max_sessions));
    let maps = MapManager::new(
        Arc::clone(&config),
        Arc::new(EnemyRegistry::default()),
        Arc::clone(&sessions),
        jobs,
    );

    let map_ids = if args.maps.is_empty() {
        vec![config.default_map.clone()]
    } else {
        args.maps.clone()
    };
    for (index, map_id) in map_ids.iter().enumerate() {
        let tilemap = Tilemap::generate_default(args.map_size);
        let mut portals = Vec::new();
        if let (Some(next), Some((x, y))) = (map_ids.get(index + 1), portal_site(&tilemap)) {
            portals.push(Portal {
                x,
                y,
                target_map_id: next.clone(),
            });
        }
        if index > 0 {
            if let Some((x, y)) = tilemap.open_ground().first().copied() {
                portals.push(Portal {
                    x,
                    y,
                    target_map_id: map_ids[index - 1].clone(),
                });
            }
        }
        maps.load_map(map_id, tilemap, portals)?;
    }

    let network = NetworkManager::new(
        Arc::clone(&config),
        Arc::clone(&sessions),
        Arc::clone(&maps),
        stores,
    );
    network.start().await?;

    let status_handle = {
        let maps = Arc::clone(&maps);
        let sessions = Arc::clone(&sessions);
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(60));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                info!("{} sessions connected", sessions.len());
                for status in maps.status() {
                    info!(
                        "Map {}: {} players, {} enemies ({} respawning), {} frames",
                        status.map_id,
                        status.players,
                        status.enemies,
                        status.dead_enemies,
                        status.frames
                    );
                }
            }
        })
    };

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down gracefully..."),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }

    status_handle.abort();
    network.shutdown();
    maps.stop_all().await;

    // Dropping the last job senders lets the worker drain and exit
    drop(maps);
    drop(network);
    if tokio::time::timeout(Duration::from_secs(5), storage_worker)
        .await
        .is_err()
    {
        error!("Storage worker did not finish pending jobs");
    }

    Ok(())
}
