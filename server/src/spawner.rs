//! Enemy population for one map
//!
//! Seeds the map at load time and tops it up on an interval while players are
//! around. Positions come from the tier-tagged tiles of the map, or from any
//! open ground when a tier has no tiles of its own.

use crate::config::{EnemyRegistry, ServerConfig};
use crate::enemy::Enemy;
use crate::entity::EntityIds;
use crate::game::{EnemyHandle, GameState};
use crate::tilemap::Tilemap;
use log::{debug, info, warn};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

pub struct SpawnerSystem {
    map_id: String,
    tilemap: Arc<Tilemap>,
    registry: Arc<EnemyRegistry>,
    config: Arc<ServerConfig>,
    ids: Arc<EntityIds>,
    rng: Mutex<StdRng>,
    last_spawn: Mutex<Option<u64>>,
}

impl SpawnerSystem {
    pub fn new(
        map_id: &str,
        tilemap: Arc<Tilemap>,
        registry: Arc<EnemyRegistry>,
        config: Arc<ServerConfig>,
        ids: Arc<EntityIds>,
    ) -> Self {
        Self::with_rng(map_id, tilemap, registry, config, ids, StdRng::from_entropy())
    }

    /// Same as `new` with a caller supplied generator, for reproducible spawns
    pub fn with_rng(
        map_id: &str,
        tilemap: Arc<Tilemap>,
        registry: Arc<EnemyRegistry>,
        config: Arc<ServerConfig>,
        ids: Arc<EntityIds>,
        rng: StdRng,
    ) -> Self {
        Self {
            map_id: map_id.to_string(),
            tilemap,
            registry,
            config,
            ids,
            rng: Mutex::new(rng),
            last_spawn: Mutex::new(None),
        }
    }

    /// Fills a freshly loaded map, splitting the initial population evenly
    /// across the four tiers. The last tier takes the remainder.
    pub fn seed_initial(&self, state: &GameState) -> usize {
        let total = self.config.initial_enemies;
        let share = total / EnemyRegistry::TIERS.len();
        let mut spawned = 0;

        for (index, tier) in EnemyRegistry::TIERS.iter().enumerate() {
            let count = if index + 1 == EnemyRegistry::TIERS.len() {
                total - share * index
            } else {
                share
            };
            for _ in 0..count {
                if self.spawn_one(state, *tier).is_some() {
                    spawned += 1;
                }
            }
        }

        info!("Seeded {} enemies on {}", spawned, self.map_id);
        spawned
    }

    /// Spawns one or two enemies once the interval has passed, provided the
    /// population is below the ceiling and someone is on the map
    pub fn update(&self, state: &GameState, now: u64) -> usize {
        {
            let mut last = self.last_spawn.lock();
            let interval = self.config.spawn_interval.as_millis() as u64;
            if let Some(previous) = *last {
                if now.saturating_sub(previous) < interval {
                    return 0;
                }
            }
            *last = Some(now);
        }

        let population = state.enemy_count();
        if population >= self.config.max_enemies || state.player_count() == 0 {
            return 0;
        }

        let room = self.config.max_enemies - population;
        let wanted = self.rng.lock().gen_range(1..=2).min(room);
        let mut spawned = 0;
        for _ in 0..wanted {
            let tier = match EnemyRegistry::TIERS.choose(&mut *self.rng.lock()) {
                Some(tier) => *tier,
                None => break,
            };
            if self.spawn_one(state, tier).is_some() {
                spawned += 1;
            }
        }

        if spawned > 0 {
            debug!(
                "Spawned {} enemies on {} ({} alive)",
                spawned,
                self.map_id,
                state.enemy_count()
            );
        }
        spawned
    }

    /// Places one enemy of the tier's template on a random tile of that tier
    pub fn spawn_one(&self, state: &GameState, tier: u8) -> Option<EnemyHandle> {
        let Some(template) = self.registry.for_tier(tier) else {
            warn!("No enemy template registered for tier {}", tier);
            return None;
        };

        let zones = self.tilemap.spawn_zones_for_tier(tier);
        let candidates = if zones.is_empty() {
            self.tilemap.open_ground()
        } else {
            zones
        };
        let (x, y) = *candidates.choose(&mut *self.rng.lock())?;

        Some(state.add_enemy(Enemy::new(self.ids.next_enemy(), template, x, y)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Player;
    use crate::tilemap::TileType;
    use std::collections::HashMap;
    use std::time::Duration;

    fn config(initial: usize, max: usize) -> Arc<ServerConfig> {
        Arc::new(ServerConfig {
            initial_enemies: initial,
            max_enemies: max,
            spawn_interval: Duration::from_millis(5000),
            ..ServerConfig::default()
        })
    }

    fn spawner(tilemap: Tilemap, config: Arc<ServerConfig>) -> SpawnerSystem {
        SpawnerSystem::with_rng(
            "main",
            Arc::new(tilemap),
            Arc::new(EnemyRegistry::default()),
            config,
            Arc::new(EntityIds::new()),
            StdRng::seed_from_u64(42),
        )
    }

    #[test]
    fn test_seed_splits_evenly_across_tiers() {
        let spawner = spawner(Tilemap::generate_default(64), config(10, 10));
        let state = GameState::new();

        assert_eq!(spawner.seed_initial(&state), 10);

        let mut per_level: HashMap<u32, usize> = HashMap::new();
        for enemy in state.enemies() {
            *per_level.entry(enemy.lock().template.level).or_default() += 1;
        }
        assert_eq!(per_level[&1], 2);
        assert_eq!(per_level[&2], 2);
        assert_eq!(per_level[&3], 2);
        assert_eq!(per_level[&4], 4);
    }

    #[test]
    fn test_spawns_land_on_their_tier_tiles() {
        let tilemap = Tilemap::generate_default(64);
        let spawner = spawner(tilemap.clone(), config(40, 40));
        let state = GameState::new();
        spawner.seed_initial(&state);

        for enemy in state.enemies() {
            let e = enemy.lock();
            let tier = tilemap.tile_at(e.x, e.y).spawn_tier();
            assert_eq!(tier, Some(e.template.level as u8));
        }
    }

    #[test]
    fn test_falls_back_to_open_ground_without_tier_tiles() {
        let rows = vec![vec![TileType::SafeZone, TileType::Pve, TileType::Blocked]];
        let spawner = spawner(Tilemap::from_rows(rows), config(8, 8));
        let state = GameState::new();

        assert_eq!(spawner.seed_initial(&state), 8);
        for enemy in state.enemies() {
            let e = enemy.lock();
            assert_eq!((e.x, e.y), (96.0, 32.0));
        }
    }

    #[test]
    fn test_no_spawn_without_walkable_ground() {
        let rows = vec![vec![TileType::SafeZone, TileType::Blocked]];
        let spawner = spawner(Tilemap::from_rows(rows), config(4, 4));
        let state = GameState::new();

        assert_eq!(spawner.seed_initial(&state), 0);
        assert!(spawner.spawn_one(&state, 1).is_none());
    }

    #[test]
    fn test_no_spawns_at_population_cap() {
        let spawner = spawner(Tilemap::generate_default(64), config(5, 5));
        let state = GameState::new();
        state.add_player(Player::new(1, "a", "main", 0.0, 0.0));
        spawner.seed_initial(&state);

        assert_eq!(spawner.update(&state, 10_000), 0);
        assert_eq!(spawner.update(&state, 20_000), 0);
        assert_eq!(state.enemy_count(), 5);
    }

    #[test]
    fn test_no_spawns_on_empty_map() {
        let spawner = spawner(Tilemap::generate_default(64), config(0, 5));
        let state = GameState::new();

        assert_eq!(spawner.update(&state, 10_000), 0);
        assert_eq!(state.enemy_count(), 0);
    }

    #[test]
    fn test_tops_up_on_interval() {
        let spawner = spawner(Tilemap::generate_default(64), config(0, 3));
        let state = GameState::new();
        state.add_player(Player::new(1, "a", "main", 0.0, 0.0));

        let first = spawner.update(&state, 10_000);
        assert!((1..=2).contains(&first));

        // Too soon
        assert_eq!(spawner.update(&state, 12_000), 0);

        let second = spawner.update(&state, 15_000);
        assert!(second >= 1);
        assert!(state.enemy_count() <= 3);

        spawner.update(&state, 20_000);
        spawner.update(&state, 25_000);
        assert_eq!(state.enemy_count(), 3);
    }
}
