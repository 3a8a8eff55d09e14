//! # Raiders Game Server Library
//!
//! This library provides the authoritative server for a top-down multiplayer
//! action game. It simulates every loaded map at a fixed tick rate, resolves
//! combat between players and enemies, and streams world snapshots to the
//! clients standing on each map.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Simulation
//! Each map runs its own game loop. Clients only send movement intent; the
//! server moves players against the tile grid, fires their auto-attacks,
//! drives enemy chase and telegraphed strikes, and decides every hit.
//!
//! ### Session Management
//! Handles the complete lifecycle of client connections including:
//! - TCP session establishment and account login or creation
//! - Issuing a per-session UDP token on join
//! - Heartbeat tracking and eviction of silent sessions
//! - Saving the player on disconnect
//!
//! ### State Broadcasting
//! A `game_state` snapshot of each map is pushed to the sessions on that map,
//! capped to roughly 60 per second regardless of tick rate. Damage events go
//! out as they happen.
//!
//! ## Architecture Design
//!
//! ### One Loop Per Map
//! Maps are independent. Each owns a `GameState` container and a tokio task
//! that runs World, Combat, Spawner and Sync in that order every tick.
//! Entities are shared handles behind short-lived locks so network tasks can
//! write movement intent while the loop reads it.
//!
//! ### Hybrid Transport
//! Newline-delimited JSON over TCP carries joins, inventory actions and pings.
//! High-frequency movement input may instead arrive over UDP, where every
//! datagram is checked for the session token, an HMAC-SHA256 signature, a
//! strictly increasing sequence number and a per-session token bucket.
//!
//! ### Storage Off The Tick
//! Persistence sits behind the `PlayerStore`, `InventoryStore` and
//! `DropTable` traits. Map loops never call them directly: drops, death
//! scatters and saves are queued as jobs for a worker on the blocking pool.
//!
//! ## Module Organization
//!
//! - `config`: server settings and the enemy template registry
//! - `tilemap`: walkability, safe zones and spawn tiers of a map
//! - `entity`, `enemy`: players, projectiles, melee volumes, items, enemies
//!   and the enemy attack state machine
//! - `game`: the concurrent entity container of one map
//! - `world`: movement, auto-attacks, enemy chase, projectiles, the respawn
//!   queue, periodic saves and portal detection of one map
//! - `combat`, `spawner`, `sync`: the remaining per-tick systems
//! - `game_loop`, `map_manager`: scheduling and the set of loaded maps
//! - `session_manager`, `udp`, `network`: sessions and both transports
//! - `persistence`, `jobs`: storage seams, the in-memory store and the
//!   storage worker
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use raiders_server::config::{EnemyRegistry, ServerConfig};
//! use raiders_server::jobs::spawn_storage_worker;
//! use raiders_server::map_manager::MapManager;
//! use raiders_server::network::NetworkManager;
//! use raiders_server::persistence::{MemoryStore, Stores};
//! use raiders_server::session_manager::SessionManager;
//! use raiders_server::tilemap::Tilemap;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Arc::new(ServerConfig::default());
//!     let stores = Stores::memory(Arc::new(MemoryStore::with_defaults()));
//!     let (jobs, _worker) = spawn_storage_worker(stores.clone());
//!
//!     let sessions = Arc::new(SessionManager::new(config.max_sessions));
//!     let maps = MapManager::new(
//!         Arc::clone(&config),
//!         Arc::new(EnemyRegistry::default()),
//!         Arc::clone(&sessions),
//!         jobs,
//!     );
//!     maps.load_map("main", Tilemap::generate_default(100), Vec::new())?;
//!
//!     let network = NetworkManager::new(config, sessions, maps, stores);
//!     let bound = network.start().await?;
//!     println!("Listening on {} / {}", bound.tcp, bound.udp);
//!
//!     tokio::signal::ctrl_c().await?;
//!     network.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! ## Security Considerations
//!
//! ### Input Validation
//! Movement vectors are clamped to unit length and non-finite values are
//! rejected. Pickups are range checked and claimed atomically.
//!
//! ### UDP Admission
//! Datagrams failing any check are dropped without a reply so the server
//! never acts as a verification oracle. The token travels in the clear next
//! to the HMAC it keys, so the signature only guards against blind spoofing.

pub mod combat;
pub mod config;
pub mod enemy;
pub mod entity;
pub mod error;
pub mod game;
pub mod game_loop;
pub mod jobs;
pub mod map_manager;
pub mod network;
pub mod persistence;
pub mod session_manager;
pub mod spawner;
pub mod sync;
pub mod tilemap;
pub mod udp;
pub mod utils;
pub mod world;
