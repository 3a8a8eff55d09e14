//! Fixed-rate scheduler for one map
//!
//! Each tick runs the map's systems in order: world, combat, spawner, sync.
//! The loop stops at the first tick after the map's running flag is cleared.

use crate::combat::CombatSystem;
use crate::map_manager::MapManager;
use crate::spawner::SpawnerSystem;
use crate::sync::StateSync;
use crate::utils::now_millis;
use crate::world::GameWorld;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};

/// Longest step the world is advanced by in one tick, in seconds
const MAX_DELTA_TIME: f32 = 0.25;

pub struct GameLoop {
    map_id: String,
    world: Arc<GameWorld>,
    combat: Arc<CombatSystem>,
    spawner: Arc<SpawnerSystem>,
    sync: Arc<StateSync>,
    manager: Weak<MapManager>,
    tick_rate: u32,
    frames: AtomicU64,
}

impl GameLoop {
    pub fn new(
        world: Arc<GameWorld>,
        combat: Arc<CombatSystem>,
        spawner: Arc<SpawnerSystem>,
        sync: Arc<StateSync>,
        manager: Weak<MapManager>,
        tick_rate: u32,
    ) -> Self {
        Self {
            map_id: world.map_id().to_string(),
            world,
            combat,
            spawner,
            sync,
            manager,
            tick_rate: tick_rate.max(1),
            frames: AtomicU64::new(0),
        }
    }

    pub fn map_id(&self) -> &str {
        &self.map_id
    }

    /// Ticks run so far
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Target duration of one tick
    pub fn tick_duration(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / self.tick_rate as u64)
    }

    /// Runs one frame of the map
    pub fn tick(&self, dt: f32, now: u64) {
        let state = self.world.state();

        let transfers = self.world.update(dt, now);
        if !transfers.is_empty() {
            match self.manager.upgrade() {
                Some(manager) => {
                    for transfer in transfers {
                        if let Err(e) =
                            manager.move_player(transfer.peer_id, &self.map_id, &transfer.target_map_id)
                        {
                            warn!("Portal transfer of player {} failed: {}", transfer.peer_id, e);
                        }
                    }
                }
                None => debug!("Map manager gone, dropping portal transfers on {}", self.map_id),
            }
        }

        self.combat.update(state, now);
        self.spawner.update(state, now);
        self.sync.broadcast_game_state(state, now);

        let frame = self.frames.fetch_add(1, Ordering::Relaxed) + 1;
        if frame % (self.tick_rate as u64 * 10) == 0 {
            debug!(
                "{} frame {}: {} players, {} enemies, {} awaiting respawn",
                self.map_id,
                frame,
                state.player_count(),
                state.enemy_count(),
                state.dead_enemy_count()
            );
        }
    }

    /// Drives `tick` at the configured rate until the map stops running
    pub async fn run(self: Arc<Self>) {
        let mut interval_timer = interval(self.tick_duration());
        interval_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // The first tick fires immediately
        interval_timer.tick().await;
        let mut last_update = Instant::now();

        info!("Game loop for {} started at {} Hz", self.map_id, self.tick_rate);

        loop {
            interval_timer.tick().await;
            if !self.world.state().is_running() {
                break;
            }

            let current_time = Instant::now();
            let delta_time = (current_time - last_update).as_secs_f32().min(MAX_DELTA_TIME);
            last_update = current_time;

            self.tick(delta_time, now_millis());
        }

        info!("Game loop for {} stopped after {} frames", self.map_id, self.frames());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EnemyRegistry, ServerConfig};
    use crate::entity::{EntityIds, Player};
    use crate::game::GameState;
    use crate::jobs::JobSender;
    use crate::session_manager::SessionManager;
    use crate::tilemap::Tilemap;
    use tokio::sync::mpsc;

    fn game_loop(config: ServerConfig) -> Arc<GameLoop> {
        let config = Arc::new(config);
        let tilemap = Arc::new(Tilemap::generate_default(32));
        let sessions = Arc::new(SessionManager::new(4));
        let ids = Arc::new(EntityIds::new());
        let (tx, _rx) = mpsc::unbounded_channel();
        let jobs = JobSender::new(tx);
        let sync = Arc::new(StateSync::new("main", sessions, config.sync_interval));
        let combat = Arc::new(CombatSystem::new(Arc::clone(&tilemap), Arc::clone(&sync), jobs.clone()));
        let state = Arc::new(GameState::new());
        state.set_running(true);
        let world = Arc::new(GameWorld::new(
            "main",
            Arc::clone(&tilemap),
            Arc::clone(&config),
            state,
            Arc::clone(&ids),
            Arc::clone(&combat),
            jobs,
        ));
        let spawner = Arc::new(SpawnerSystem::new(
            "main",
            tilemap,
            Arc::new(EnemyRegistry::default()),
            Arc::clone(&config),
            ids,
        ));

        Arc::new(GameLoop::new(world, combat, spawner, sync, Weak::new(), config.tick_rate))
    }

    #[test]
    fn test_tick_duration_from_rate() {
        let config = ServerConfig {
            tick_rate: 50,
            ..ServerConfig::default()
        };
        assert_eq!(game_loop(config).tick_duration(), Duration::from_millis(20));
    }

    #[test]
    fn test_tick_runs_every_system() {
        let config = ServerConfig {
            max_enemies: 2,
            initial_enemies: 0,
            ..ServerConfig::default()
        };
        let game_loop = game_loop(config);
        let state = Arc::clone(game_loop.world.state());
        state.add_player(Player::new(1, "a", "main", 1024.0, 1024.0));

        game_loop.tick(0.016, 10_000);

        assert_eq!(game_loop.frames(), 1);
        assert_eq!(state.world_time(), 10_000);
        // Spawner ran with a player present
        assert!(state.enemy_count() >= 1);
    }

    #[tokio::test]
    async fn test_run_stops_when_flag_cleared() {
        let game_loop = game_loop(ServerConfig {
            tick_rate: 200,
            initial_enemies: 0,
            ..ServerConfig::default()
        });
        let handle = tokio::spawn(Arc::clone(&game_loop).run());

        tokio::time::sleep(Duration::from_millis(60)).await;
        game_loop.world.state().set_running(false);

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(game_loop.frames() > 0);
    }
}
