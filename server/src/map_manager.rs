//! Owner of every loaded map and its game loop
//!
//! Each map gets its own `GameState`, systems and a tokio task running its
//! `GameLoop`. Moving a player between maps goes through a single transfer
//! lock so two moves never interleave.

use crate::combat::CombatSystem;
use crate::config::{EnemyRegistry, ServerConfig};
use crate::entity::{EntityIds, Player, Portal};
use crate::error::{Result, ServerError};
use crate::game::{GameState, PlayerHandle};
use crate::game_loop::GameLoop;
use crate::jobs::JobSender;
use crate::session_manager::SessionManager;
use crate::spawner::SpawnerSystem;
use crate::sync::StateSync;
use crate::tilemap::Tilemap;
use crate::world::GameWorld;
use log::{error, info, warn};
use parking_lot::{Mutex, RwLock};
use raiders_shared::ServerMessage;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};

/// How long `unload_map` waits for a loop to notice it was stopped
const UNLOAD_TIMEOUT: Duration = Duration::from_secs(5);

struct LoadedMap {
    game_loop: Arc<GameLoop>,
    world: Arc<GameWorld>,
    handle: JoinHandle<()>,
}

/// One line of the periodic status report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapStatus {
    pub map_id: String,
    pub players: usize,
    pub enemies: usize,
    pub dead_enemies: usize,
    pub frames: u64,
}

pub struct MapManager {
    config: Arc<ServerConfig>,
    registry: Arc<EnemyRegistry>,
    ids: Arc<EntityIds>,
    sessions: Arc<SessionManager>,
    jobs: JobSender,
    maps: RwLock<HashMap<String, LoadedMap>>,
    transfer_lock: Mutex<()>,
}

impl MapManager {
    pub fn new(
        config: Arc<ServerConfig>,
        registry: Arc<EnemyRegistry>,
        sessions: Arc<SessionManager>,
        jobs: JobSender,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            registry,
            ids: Arc::new(EntityIds::new()),
            sessions,
            jobs,
            maps: RwLock::new(HashMap::new()),
            transfer_lock: Mutex::new(()),
        })
    }

    /// The storage queue shared by every map
    pub fn jobs(&self) -> &JobSender {
        &self.jobs
    }

    /// Builds the systems for a map, seeds its enemies and starts its loop.
    /// Must be called from within a tokio runtime.
    pub fn load_map(
        self: &Arc<Self>,
        map_id: &str,
        tilemap: Tilemap,
        portals: Vec<Portal>,
    ) -> Result<Arc<GameWorld>> {
        if self.maps.read().contains_key(map_id) {
            return Err(ServerError::MapAlreadyLoaded(map_id.to_string()));
        }

        let tilemap = Arc::new(tilemap);
        let state = Arc::new(GameState::new());
        for portal in portals {
            state.add_portal(portal);
        }

        let sync = Arc::new(StateSync::new(
            map_id,
            Arc::clone(&self.sessions),
            self.config.sync_interval,
        ));
        let combat = Arc::new(CombatSystem::new(
            Arc::clone(&tilemap),
            Arc::clone(&sync),
            self.jobs.clone(),
        ));
        let world = Arc::new(GameWorld::new(
            map_id,
            Arc::clone(&tilemap),
            Arc::clone(&self.config),
            Arc::clone(&state),
            Arc::clone(&self.ids),
            Arc::clone(&combat),
            self.jobs.clone(),
        ));
        let spawner = Arc::new(SpawnerSystem::new(
            map_id,
            tilemap,
            Arc::clone(&self.registry),
            Arc::clone(&self.config),
            Arc::clone(&self.ids),
        ));
        spawner.seed_initial(&state);

        let game_loop = Arc::new(GameLoop::new(
            Arc::clone(&world),
            combat,
            spawner,
            sync,
            Arc::downgrade(self),
            self.config.tick_rate,
        ));

        let mut maps = self.maps.write();
        if maps.contains_key(map_id) {
            return Err(ServerError::MapAlreadyLoaded(map_id.to_string()));
        }
        state.set_running(true);
        let handle = tokio::spawn(Arc::clone(&game_loop).run());
        maps.insert(
            map_id.to_string(),
            LoadedMap {
                game_loop,
                world: Arc::clone(&world),
                handle,
            },
        );

        info!(
            "Loaded map {} ({}x{} tiles, {} enemies)",
            map_id,
            world.tilemap().width(),
            world.tilemap().height(),
            state.enemy_count()
        );
        Ok(world)
    }

    /// Stops a map's loop, saves its players and waits for the loop to end.
    /// Returns false if the map was not loaded.
    pub async fn unload_map(&self, map_id: &str) -> bool {
        let Some(mut loaded) = self.maps.write().remove(map_id) else {
            return false;
        };

        loaded.world.state().set_running(false);
        loaded.world.save_all_players();

        match timeout(UNLOAD_TIMEOUT, &mut loaded.handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Game loop for {} ended abnormally: {}", map_id, e),
            Err(_) => {
                warn!("Game loop for {} did not stop in time, aborting", map_id);
                loaded.handle.abort();
            }
        }

        info!(
            "Unloaded map {} after {} frames",
            map_id,
            loaded.game_loop.frames()
        );
        true
    }

    /// Unloads every map
    pub async fn stop_all(&self) {
        for map_id in self.map_ids() {
            self.unload_map(&map_id).await;
        }
    }

    pub fn world(&self, map_id: &str) -> Option<Arc<GameWorld>> {
        self.maps.read().get(map_id).map(|m| Arc::clone(&m.world))
    }

    pub fn state(&self, map_id: &str) -> Option<Arc<GameState>> {
        self.maps
            .read()
            .get(map_id)
            .map(|m| Arc::clone(m.world.state()))
    }

    /// Loaded map ids, sorted
    pub fn map_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.maps.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Puts a player on the map named by its `map_id`
    pub fn add_player(&self, player: Player) -> Result<PlayerHandle> {
        let state = self
            .state(&player.map_id)
            .ok_or_else(|| ServerError::UnknownMap(player.map_id.clone()))?;
        Ok(state.add_player(player))
    }

    /// Takes a player off whichever map it is on
    pub fn remove_player(&self, player: &PlayerHandle) -> bool {
        let _transfer = self.transfer_lock.lock();
        let (peer_id, map_id) = {
            let p = player.lock();
            (p.peer_id, p.map_id.clone())
        };

        match self.state(&map_id) {
            Some(state) => state.remove_player(peer_id).is_some(),
            None => false,
        }
    }

    /// Moves a player to the safe-zone centroid of another map and tells its
    /// session. Returns the arrival position.
    pub fn move_player(&self, peer_id: u32, from_map: &str, to_map: &str) -> Result<(f32, f32)> {
        let _transfer = self.transfer_lock.lock();

        let source = self
            .world(from_map)
            .ok_or_else(|| ServerError::UnknownMap(from_map.to_string()))?;
        let target = self
            .world(to_map)
            .ok_or_else(|| ServerError::UnknownMap(to_map.to_string()))?;

        let handle = source
            .state()
            .remove_player(peer_id)
            .ok_or_else(|| ServerError::PlayerNotInMap(peer_id, from_map.to_string()))?;

        let (x, y) = target.tilemap().safe_zone_centroid();
        {
            let mut p = handle.lock();
            p.map_id = to_map.to_string();
            p.x = x;
            p.y = y;
            p.set_direction(0.0, 0.0);
        }
        target.state().insert_player(handle);

        let message = ServerMessage::MapChanged {
            map_id: to_map.to_string(),
            x,
            y,
        };
        match message.to_line() {
            Ok(line) => {
                self.sessions.send(peer_id, Arc::from(line));
            }
            Err(e) => error!("Failed to encode map change for {}: {}", peer_id, e),
        }

        info!("Player {} moved from {} to {}", peer_id, from_map, to_map);
        Ok((x, y))
    }

    pub fn status(&self) -> Vec<MapStatus> {
        let maps = self.maps.read();
        let mut status: Vec<MapStatus> = maps
            .iter()
            .map(|(map_id, loaded)| {
                let state = loaded.world.state();
                MapStatus {
                    map_id: map_id.clone(),
                    players: state.player_count(),
                    enemies: state.enemy_count(),
                    dead_enemies: state.dead_enemy_count(),
                    frames: loaded.game_loop.frames(),
                }
            })
            .collect();
        status.sort_by(|a, b| a.map_id.cmp(&b.map_id));
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use serde_json::Value;
    use tokio::sync::mpsc;

    fn manager(initial_enemies: usize) -> (Arc<MapManager>, Arc<SessionManager>) {
        let config = Arc::new(ServerConfig {
            initial_enemies,
            ..ServerConfig::default()
        });
        let sessions = Arc::new(SessionManager::new(8));
        let (tx, _rx) = mpsc::unbounded_channel();
        let manager = MapManager::new(
            config,
            Arc::new(EnemyRegistry::default()),
            Arc::clone(&sessions),
            JobSender::new(tx),
        );
        (manager, sessions)
    }

    #[tokio::test]
    async fn test_load_seeds_and_runs() {
        let (manager, _) = manager(8);
        let world = manager
            .load_map("main", Tilemap::generate_default(32), Vec::new())
            .unwrap();

        assert_eq!(world.state().enemy_count(), 8);
        assert!(world.state().is_running());
        assert_eq!(manager.map_ids(), vec!["main".to_string()]);

        assert!(manager.unload_map("main").await);
        assert!(!world.state().is_running());
        assert!(manager.world("main").is_none());
        assert!(!manager.unload_map("main").await);
    }

    #[tokio::test]
    async fn test_duplicate_load_rejected() {
        let (manager, _) = manager(0);
        manager
            .load_map("main", Tilemap::generate_default(16), Vec::new())
            .unwrap();

        let result = manager.load_map("main", Tilemap::generate_default(16), Vec::new());
        assert!(matches!(result, Err(ServerError::MapAlreadyLoaded(_))));

        manager.stop_all().await;
    }

    #[tokio::test]
    async fn test_add_player_to_unknown_map() {
        let (manager, _) = manager(0);
        let result = manager.add_player(Player::new(1, "a", "nowhere", 0.0, 0.0));
        assert!(matches!(result, Err(ServerError::UnknownMap(_))));
    }

    #[tokio::test]
    async fn test_move_player_between_maps() {
        let (manager, sessions) = manager(0);
        manager
            .load_map("main", Tilemap::generate_default(32), Vec::new())
            .unwrap();
        let caves = manager
            .load_map("caves", Tilemap::generate_default(16), Vec::new())
            .unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let peer = sessions
            .add_session("127.0.0.1:5000".parse().unwrap(), tx, None)
            .unwrap();
        let mut player = Player::new(peer, "alice", "main", 300.0, 300.0);
        player.set_direction(1.0, 0.0);
        let handle = manager.add_player(player).unwrap();
        sessions.attach_player(peer, Arc::clone(&handle));

        let (x, y) = manager.move_player(peer, "main", "caves").unwrap();
        let (cx, cy) = caves.tilemap().safe_zone_centroid();
        assert_approx_eq!(x, cx);
        assert_approx_eq!(y, cy);

        {
            let p = handle.lock();
            assert_eq!(p.map_id, "caves");
            assert_eq!((p.dir_x, p.dir_y), (0.0, 0.0));
        }
        assert!(manager.state("main").unwrap().player(peer).is_none());
        assert!(caves.state().player(peer).is_some());

        // Snapshots from the running loops may arrive first
        let changed = loop {
            let line = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .unwrap()
                .unwrap();
            let value: Value = serde_json::from_str(&line).unwrap();
            if value["type"] == "map_changed" {
                break value;
            }
        };
        assert_eq!(changed["map_id"], "caves");

        assert!(matches!(
            manager.move_player(peer, "main", "caves"),
            Err(ServerError::PlayerNotInMap(..))
        ));
        assert!(matches!(
            manager.move_player(peer, "caves", "void"),
            Err(ServerError::UnknownMap(_))
        ));

        assert!(manager.remove_player(&handle));
        assert_eq!(caves.state().player_count(), 0);

        manager.stop_all().await;
    }

    #[tokio::test]
    async fn test_status_reports_each_map() {
        let (manager, _) = manager(4);
        manager
            .load_map("b", Tilemap::generate_default(16), Vec::new())
            .unwrap();
        manager
            .load_map("a", Tilemap::generate_default(16), Vec::new())
            .unwrap();

        let status = manager.status();
        assert_eq!(status.len(), 2);
        assert_eq!(status[0].map_id, "a");
        assert_eq!(status[0].enemies, 4);
        assert_eq!(status[1].players, 0);

        manager.stop_all().await;
    }
}
