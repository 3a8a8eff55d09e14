//! Server configuration and the enemy template registry
//!
//! Both are built once at startup and handed to every map by `Arc`, so no
//! map ever reads settings from a global.

use crate::enemy::EnemyTemplate;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub tcp_port: u16,
    pub udp_port: u16,
    /// Simulation ticks per second for every map loop
    pub tick_rate: u32,
    /// Population ceiling the spawner tops up to, per map
    pub max_enemies: usize,
    pub spawn_interval: Duration,
    /// Enemies seeded when a map loads
    pub initial_enemies: usize,
    pub enemy_respawn_delay: Duration,
    /// Connections beyond this are closed right after accept
    pub max_sessions: usize,
    pub heartbeat_timeout: Duration,
    pub heartbeat_check_interval: Duration,
    /// Minimum spacing between two `game_state` broadcasts of one map
    pub sync_interval: Duration,
    pub player_save_interval: Duration,
    pub udp_bucket_capacity: u32,
    pub udp_refill_per_sec: u32,
    /// Map every joining player starts on
    pub default_map: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            tcp_port: 7777,
            udp_port: 7777,
            tick_rate: 60,
            max_enemies: 10,
            spawn_interval: Duration::from_millis(5000),
            initial_enemies: 100,
            enemy_respawn_delay: Duration::from_millis(10_000),
            max_sessions: 256,
            heartbeat_timeout: Duration::from_secs(30),
            heartbeat_check_interval: Duration::from_secs(5),
            sync_interval: Duration::from_millis(16),
            player_save_interval: Duration::from_secs(30),
            udp_bucket_capacity: 60,
            udp_refill_per_sec: 30,
            default_map: "main".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn tcp_addr(&self) -> String {
        format!("{}:{}", self.host, self.tcp_port)
    }

    pub fn udp_addr(&self) -> String {
        format!("{}:{}", self.host, self.udp_port)
    }
}

/// Enemy templates keyed by spawn tier
#[derive(Debug, Clone)]
pub struct EnemyRegistry {
    tiers: BTreeMap<u8, Arc<EnemyTemplate>>,
}

impl EnemyRegistry {
    pub const TIERS: [u8; 4] = [1, 2, 3, 4];

    pub fn new() -> Self {
        Self {
            tiers: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, tier: u8, template: EnemyTemplate) {
        self.tiers.insert(tier, Arc::new(template));
    }

    pub fn for_tier(&self, tier: u8) -> Option<Arc<EnemyTemplate>> {
        self.tiers.get(&tier).cloned()
    }

    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }
}

impl Default for EnemyRegistry {
    /// Spider, Worm, Wild Dog and Goblin on tiers one to four
    fn default() -> Self {
        let mut registry = Self::new();
        registry.register(
            1,
            EnemyTemplate {
                id: 1,
                name: "Spider".to_string(),
                level: 1,
                hp: 30,
                attack: 5,
                defense: 0,
                move_speed: 60.0,
                attack_rate: 1.0,
                attack_range: 40.0,
                experience: 10,
            },
        );
        registry.register(
            2,
            EnemyTemplate {
                id: 2,
                name: "Worm".to_string(),
                level: 2,
                hp: 50,
                attack: 8,
                defense: 2,
                move_speed: 40.0,
                attack_rate: 0.8,
                attack_range: 40.0,
                experience: 20,
            },
        );
        registry.register(
            3,
            EnemyTemplate {
                id: 3,
                name: "Wild Dog".to_string(),
                level: 3,
                hp: 80,
                attack: 12,
                defense: 4,
                move_speed: 90.0,
                attack_rate: 1.5,
                attack_range: 40.0,
                experience: 35,
            },
        );
        registry.register(
            4,
            EnemyTemplate {
                id: 4,
                name: "Goblin".to_string(),
                level: 4,
                hp: 120,
                attack: 16,
                defense: 6,
                move_speed: 70.0,
                attack_rate: 1.2,
                attack_range: 40.0,
                experience: 60,
            },
        );
        registry
    }
}
