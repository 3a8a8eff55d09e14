//! Snapshot and event broadcasting for one map

use crate::game::GameState;
use crate::session_manager::SessionManager;
use log::{error, trace};
use parking_lot::Mutex;
use raiders_shared::{ServerMessage, TargetKind, WorldSnapshot};
use std::sync::Arc;
use std::time::Duration;

pub struct StateSync {
    map_id: String,
    sessions: Arc<SessionManager>,
    min_interval_ms: u64,
    last_broadcast: Mutex<Option<u64>>,
}

impl StateSync {
    pub fn new(map_id: &str, sessions: Arc<SessionManager>, min_interval: Duration) -> Self {
        Self {
            map_id: map_id.to_string(),
            sessions,
            min_interval_ms: min_interval.as_millis() as u64,
            last_broadcast: Mutex::new(None),
        }
    }

    pub fn map_id(&self) -> &str {
        &self.map_id
    }

    /// Copies the map's entities into a wire snapshot. Enemies in the respawn
    /// queue are left out.
    pub fn build_snapshot(&self, state: &GameState) -> WorldSnapshot {
        WorldSnapshot {
            map_id: self.map_id.clone(),
            world_time: state.world_time(),
            players: state.players().iter().map(|p| p.lock().snapshot()).collect(),
            enemies: state.enemies().iter().map(|e| e.lock().snapshot()).collect(),
            projectiles: state.projectiles().iter().map(|p| p.snapshot()).collect(),
            melee_attacks: state.melee_attacks().iter().map(|m| m.snapshot()).collect(),
            world_items: state.world_items().iter().map(|i| i.snapshot()).collect(),
            portals: state.portals().iter().map(|p| p.snapshot()).collect(),
        }
    }

    /// Sends a `game_state` snapshot to everyone on the map, at most once per
    /// interval. Returns true if a snapshot went out.
    pub fn broadcast_game_state(&self, state: &GameState, now: u64) -> bool {
        {
            let mut last = self.last_broadcast.lock();
            if let Some(previous) = *last {
                if now.saturating_sub(previous) < self.min_interval_ms {
                    return false;
                }
            }
            *last = Some(now);
        }

        // Nobody on this map to send to
        if state.player_count() == 0 {
            return false;
        }

        let message = ServerMessage::GameState(self.build_snapshot(state));
        let sent = self.broadcast(&message);
        trace!("Snapshot of {} sent to {} sessions", self.map_id, sent);
        sent > 0
    }

    pub fn broadcast_damage_event(
        &self,
        target_id: u64,
        target_type: TargetKind,
        damage: i32,
        x: f32,
        y: f32,
    ) {
        self.broadcast(&ServerMessage::DamageEvent {
            target_id,
            target_type,
            damage,
            x,
            y,
        });
    }

    fn broadcast(&self, message: &ServerMessage) -> usize {
        match message.to_line() {
            Ok(line) => self.sessions.broadcast_to_map(&self.map_id, Arc::from(line)),
            Err(e) => {
                error!("Failed to encode message for {}: {}", self.map_id, e);
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enemy::{Enemy, EnemyTemplate};
    use crate::entity::Player;
    use serde_json::Value;
    use tokio::sync::mpsc;

    /// A session whose player stands on `map_id`, held in that map's `state`
    fn joined_session(
        sessions: &SessionManager,
        state: &GameState,
        map_id: &str,
    ) -> mpsc::UnboundedReceiver<Arc<str>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let peer = sessions
            .add_session("127.0.0.1:9000".parse().unwrap(), tx, None)
            .unwrap();
        let player = state.add_player(Player::new(peer, "p", map_id, 10.0, 20.0));
        sessions.attach_player(peer, player);
        rx
    }

    fn spider() -> Arc<EnemyTemplate> {
        Arc::new(EnemyTemplate {
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
        })
    }

    #[test]
    fn test_broadcast_is_rate_capped() {
        let sessions = Arc::new(SessionManager::new(4));
        let state = GameState::new();
        let mut rx = joined_session(&sessions, &state, "main");
        let sync = StateSync::new("main", Arc::clone(&sessions), Duration::from_millis(16));

        assert!(sync.broadcast_game_state(&state, 1000));
        assert!(!sync.broadcast_game_state(&state, 1010));
        assert!(sync.broadcast_game_state(&state, 1016));

        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 2);
    }

    #[test]
    fn test_empty_map_is_skipped_while_other_maps_are_busy() {
        let sessions = Arc::new(SessionManager::new(4));
        let caves = GameState::new();
        let mut in_caves = joined_session(&sessions, &caves, "caves");
        let main = GameState::new();
        let sync = StateSync::new("main", Arc::clone(&sessions), Duration::from_millis(16));

        assert!(!sync.broadcast_game_state(&main, 1000));
        assert!(in_caves.try_recv().is_err());

        let mut in_main = joined_session(&sessions, &main, "main");
        assert!(sync.broadcast_game_state(&main, 1016));
        assert!(in_main.try_recv().is_ok());
        assert!(in_caves.try_recv().is_err());
    }

    #[test]
    fn test_snapshot_excludes_respawn_queue() {
        let sessions = Arc::new(SessionManager::new(1));
        let sync = StateSync::new("main", sessions, Duration::from_millis(16));
        let state = GameState::new();
        state.add_enemy(Enemy::new(1, spider(), 0.0, 0.0));
        let dead = state.add_enemy(Enemy::new(2, spider(), 0.0, 0.0));
        state.retire_enemy(&dead);
        state.add_player(Player::new(3, "bob", "main", 1.0, 1.0));
        state.set_world_time(99);

        let snapshot = sync.build_snapshot(&state);

        assert_eq!(snapshot.map_id, "main");
        assert_eq!(snapshot.world_time, 99);
        assert_eq!(snapshot.enemies.len(), 1);
        assert_eq!(snapshot.enemies[0].id, 1);
        assert_eq!(snapshot.players[0].username, "bob");
    }

    #[test]
    fn test_damage_event_reaches_map_only() {
        let sessions = Arc::new(SessionManager::new(4));
        let mut on_map = joined_session(&sessions, &GameState::new(), "main");
        let mut elsewhere = joined_session(&sessions, &GameState::new(), "caves");
        let sync = StateSync::new("main", Arc::clone(&sessions), Duration::from_millis(16));

        sync.broadcast_damage_event(7, TargetKind::Enemy, 12, 3.0, 4.0);

        let line = on_map.try_recv().unwrap();
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["type"], "damage_event");
        assert_eq!(value["target_id"], 7);
        assert_eq!(value["damage"], 12);
        assert!(elsewhere.try_recv().is_err());
    }
}
