//! Per-map world simulation
//!
//! `GameWorld::update` advances one map by a time step:
//! - Player movement against the tile grid
//! - Auto-attacks (projectiles for ranged and unarmed, swing volumes for melee)
//! - Enemy chase
//! - Projectile flight and impacts
//! - The respawn queue, expiry of short-lived entities and periodic saves
//!
//! Combat between enemies and players is resolved afterwards by `CombatSystem`.

use crate::combat::CombatSystem;
use crate::config::ServerConfig;
use crate::entity::{AttackType, EntityIds, MeleeAttack, Projectile};
use crate::game::{EnemyHandle, GameState};
use crate::jobs::{JobSender, StorageJob};
use crate::persistence::PlayerRecord;
use crate::tilemap::Tilemap;
use log::debug;
use parking_lot::Mutex;
use raiders_shared::{
    distance, mitigated_damage, CHASE_RADIUS, ENEMY_BODY_RADIUS, PORTAL_RADIUS,
    PROJECTILE_BASE_DAMAGE,
};
use std::sync::Arc;

/// A player standing in a portal this tick
#[derive(Debug, Clone, PartialEq)]
pub struct PortalTransfer {
    pub peer_id: u32,
    pub target_map_id: String,
}

pub struct GameWorld {
    map_id: String,
    tilemap: Arc<Tilemap>,
    config: Arc<ServerConfig>,
    state: Arc<GameState>,
    ids: Arc<EntityIds>,
    combat: Arc<CombatSystem>,
    jobs: JobSender,
    last_save: Mutex<Option<u64>>,
}

impl GameWorld {
    pub fn new(
        map_id: &str,
        tilemap: Arc<Tilemap>,
        config: Arc<ServerConfig>,
        state: Arc<GameState>,
        ids: Arc<EntityIds>,
        combat: Arc<CombatSystem>,
        jobs: JobSender,
    ) -> Self {
        Self {
            map_id: map_id.to_string(),
            tilemap,
            config,
            state,
            ids,
            combat,
            jobs,
            last_save: Mutex::new(None),
        }
    }

    pub fn map_id(&self) -> &str {
        &self.map_id
    }

    pub fn state(&self) -> &Arc<GameState> {
        &self.state
    }

    pub fn tilemap(&self) -> &Arc<Tilemap> {
        &self.tilemap
    }

    /// Advances the map by `dt` seconds. Returns the players who stepped into
    /// a portal; moving them is up to the caller.
    pub fn update(&self, dt: f32, now: u64) -> Vec<PortalTransfer> {
        if !self.state.is_running() {
            return Vec::new();
        }
        self.state.set_world_time(now);

        self.move_players(dt);
        self.auto_attack(now);
        self.move_enemies(dt);
        self.update_projectiles(dt, now);
        self.drain_respawn_queue(now);

        self.state.remove_expired_projectiles();
        self.state.remove_expired_melee_attacks(now);
        let pruned = self.state.remove_expired_world_items(now);
        if pruned > 0 {
            debug!("Pruned {} expired items on {}", pruned, self.map_id);
        }

        self.save_players_if_due(now);
        self.portal_transfers()
    }

    fn move_players(&self, dt: f32) {
        let max_x = self.tilemap.world_width();
        let max_y = self.tilemap.world_height();

        for handle in self.state.players() {
            let mut p = handle.lock();
            if !p.is_alive() || (p.dir_x == 0.0 && p.dir_y == 0.0) {
                continue;
            }

            let nx = p.x + p.dir_x * p.move_speed * dt;
            let ny = p.y + p.dir_y * p.move_speed * dt;
            if self.tilemap.is_walkable(nx, ny) {
                p.x = nx.clamp(0.0, max_x);
                p.y = ny.clamp(0.0, max_y);
            }
        }
    }

    /// Positions of live enemies, read one lock at a time
    fn live_enemies(&self) -> Vec<(EnemyHandle, f32, f32)> {
        self.state
            .enemies()
            .into_iter()
            .filter_map(|handle| {
                let (alive, x, y) = {
                    let e = handle.lock();
                    (e.is_alive(), e.x, e.y)
                };
                alive.then_some((handle, x, y))
            })
            .collect()
    }

    fn auto_attack(&self, now: u64) {
        let enemies = self.live_enemies();
        if enemies.is_empty() {
            return;
        }

        for handle in self.state.players() {
            let mut p = handle.lock();
            if !p.is_alive() || !p.can_attack(now) {
                continue;
            }

            let nearest = enemies
                .iter()
                .map(|(_, ex, ey)| (distance(p.x, p.y, *ex, *ey), *ex, *ey))
                .filter(|(d, _, _)| *d <= p.stats.attack_range)
                .min_by(|a, b| a.0.total_cmp(&b.0));
            let Some((_, ex, ey)) = nearest else {
                continue;
            };

            p.record_attack(now);
            let attack_type = p.stats.attack_type;
            match attack_type {
                AttackType::Melee => {
                    let facing = (ey - p.y).atan2(ex - p.x).to_degrees();
                    let swing = MeleeAttack::new(
                        self.ids.next_melee(),
                        p.peer_id,
                        p.x,
                        p.y,
                        p.stats.attack_range,
                        facing,
                        now,
                    );
                    drop(p);
                    self.state.add_melee_attack(swing);
                }
                AttackType::Ranged | AttackType::Unarmed => {
                    let projectile =
                        Projectile::aimed(self.ids.next_projectile(), p.peer_id, p.x, p.y, ex, ey);
                    drop(p);
                    self.state.add_projectile(projectile);
                }
            }
        }
    }

    fn move_enemies(&self, dt: f32) {
        let players: Vec<(u32, f32, f32)> = self
            .state
            .players()
            .iter()
            .filter_map(|handle| {
                let p = handle.lock();
                p.is_alive().then_some((p.peer_id, p.x, p.y))
            })
            .collect();

        for handle in self.state.enemies() {
            let mut e = handle.lock();
            if !e.is_alive() || e.is_telegraphing() {
                continue;
            }

            let held = e.aggro.holder().map(|holder| {
                (
                    holder,
                    players.iter().find(|(peer, _, _)| *peer == holder).copied(),
                )
            });
            let target = match held {
                Some((_, Some((_, x, y)))) => Some((x, y)),
                other => {
                    if let Some((holder, None)) = other {
                        e.aggro.release(holder);
                    }
                    players
                        .iter()
                        .map(|(_, x, y)| (distance(e.x, e.y, *x, *y), *x, *y))
                        .filter(|(d, _, _)| *d <= CHASE_RADIUS)
                        .min_by(|a, b| a.0.total_cmp(&b.0))
                        .map(|(_, x, y)| (x, y))
                }
            };
            let Some((tx, ty)) = target else {
                continue;
            };

            let dist = distance(e.x, e.y, tx, ty);
            let step = (e.template.move_speed * dt).min(dist - ENEMY_BODY_RADIUS);
            if step <= 0.0 {
                continue;
            }

            let nx = e.x + (tx - e.x) / dist * step;
            let ny = e.y + (ty - e.y) / dist * step;
            if self.tilemap.is_enemy_walkable(nx, ny) {
                e.x = nx;
                e.y = ny;
            } else if self.tilemap.is_enemy_walkable(nx, e.y) {
                e.x = nx;
            } else if self.tilemap.is_enemy_walkable(e.x, ny) {
                e.y = ny;
            }
        }
    }

    fn update_projectiles(&self, dt: f32, now: u64) {
        self.state.update_projectiles(|p| p.advance(dt));

        let enemies = self.live_enemies();
        for projectile in self.state.projectiles() {
            if projectile.is_expired() {
                continue;
            }

            // An earlier projectile this tick may have killed the enemy
            let hit = enemies.iter().find(|(enemy, ex, ey)| {
                projectile.hits(*ex, *ey, ENEMY_BODY_RADIUS) && enemy.lock().is_alive()
            });
            let Some((enemy, _, _)) = hit else {
                continue;
            };
            if !self.state.remove_projectile(projectile.id) {
                continue;
            }

            let raw = self
                .state
                .player(projectile.shooter_id)
                .map(|p| PROJECTILE_BASE_DAMAGE + p.lock().stats.weapon_damage)
                .unwrap_or(1);
            let defense = enemy.lock().defense();
            self.combat.damage_enemy(
                &self.state,
                enemy,
                mitigated_damage(raw, defense),
                Some(projectile.shooter_id),
                now,
            );
        }
    }

    /// Visits each queued enemy once: due ones come back, the rest wait
    fn drain_respawn_queue(&self, now: u64) {
        let delay_ms = self.config.enemy_respawn_delay.as_millis() as u64;
        let queued = self.state.dead_enemy_count();

        for _ in 0..queued {
            let Some(handle) = self.state.pop_dead_enemy() else {
                break;
            };

            let due = handle.lock().ready_to_respawn(now, delay_ms);
            if due {
                handle.lock().respawn();
                self.state.reinstate_enemy(handle);
            } else {
                self.state.push_dead_enemy(handle);
            }
        }
    }

    fn save_players_if_due(&self, now: u64) {
        let interval = self.config.player_save_interval.as_millis() as u64;
        {
            let mut last = self.last_save.lock();
            match *last {
                None => {
                    *last = Some(now);
                    return;
                }
                Some(previous) if now.saturating_sub(previous) < interval => return,
                Some(_) => *last = Some(now),
            }
        }

        let mut saved = 0;
        for handle in self.state.players() {
            let record = PlayerRecord::from_player(&handle.lock());
            if let Some(record) = record {
                self.jobs.send(StorageJob::SavePlayer(record));
                saved += 1;
            }
        }
        if saved > 0 {
            debug!("Queued periodic save of {} players on {}", saved, self.map_id);
        }
    }

    /// Saves every player on the map right away
    pub fn save_all_players(&self) {
        for handle in self.state.players() {
            let record = PlayerRecord::from_player(&handle.lock());
            if let Some(record) = record {
                self.jobs.send(StorageJob::SavePlayer(record));
            }
        }
    }

    fn portal_transfers(&self) -> Vec<PortalTransfer> {
        let portals = self.state.portals();
        if portals.is_empty() {
            return Vec::new();
        }

        let mut transfers = Vec::new();
        for handle in self.state.players() {
            let p = handle.lock();
            if !p.is_alive() {
                continue;
            }
            if let Some(portal) = portals
                .iter()
                .find(|portal| distance(p.x, p.y, portal.x, portal.y) <= PORTAL_RADIUS)
            {
                transfers.push(PortalTransfer {
                    peer_id: p.peer_id,
                    target_map_id: portal.target_map_id.clone(),
                });
            }
        }
        transfers
    }
}
