//! Combat resolution for one map
//!
//! Drives every enemy's telegraph cycle, resolves melee swing volumes, applies
//! damage to both sides and handles the consequences of a kill: experience,
//! the respawn queue, item drops and player respawns. Storage work triggered
//! here is queued on the job worker so a tick never waits on it.

use crate::entity::CombatStats;
use crate::game::{EnemyHandle, GameState, PlayerHandle};
use crate::jobs::{JobSender, StorageJob};
use crate::sync::StateSync;
use crate::tilemap::Tilemap;
use log::{debug, info};
use rand::Rng;
use raiders_shared::{
    distance, mitigated_damage, AttackPhase, TargetKind, MELEE_TRIGGER_RADIUS, TELEGRAPH_DEPTH,
    TELEGRAPH_WIDTH, XP_REWARD_RADIUS,
};
use std::f32::consts::PI;
use std::sync::Arc;

const ITEMS_PER_RING: usize = 8;
const FIRST_RING_RADIUS: f32 = 48.0;
const RING_SPACING: f32 = 24.0;
const RING_TWIST: f32 = 0.3;
const SCATTER_JITTER: f32 = 6.0;

/// Where the `index`-th item of a death drop lands around `(x, y)`.
/// Eight items per ring, every further ring 24px farther out and slightly
/// rotated, plus a few pixels of jitter.
pub fn scatter_position<R: Rng + ?Sized>(x: f32, y: f32, index: usize, rng: &mut R) -> (f32, f32) {
    let ring = index / ITEMS_PER_RING;
    let slot = index % ITEMS_PER_RING;
    let angle = 2.0 * PI * slot as f32 / ITEMS_PER_RING as f32 + ring as f32 * RING_TWIST;
    let radius = FIRST_RING_RADIUS + RING_SPACING * ring as f32;

    let jitter_x = rng.gen_range(-SCATTER_JITTER..=SCATTER_JITTER);
    let jitter_y = rng.gen_range(-SCATTER_JITTER..=SCATTER_JITTER);
    (
        x + angle.cos() * radius + jitter_x,
        y + angle.sin() * radius + jitter_y,
    )
}

/// Oriented rectangle test for an enemy strike: the hitbox starts at the
/// enemy, reaches `TELEGRAPH_DEPTH` forward and spans `TELEGRAPH_WIDTH` across.
pub fn in_strike_zone(origin: (f32, f32), direction: (f32, f32), x: f32, y: f32) -> bool {
    let dx = x - origin.0;
    let dy = y - origin.1;
    let forward = dx * direction.0 + dy * direction.1;
    let lateral = -dx * direction.1 + dy * direction.0;

    (0.0..=TELEGRAPH_DEPTH).contains(&forward) && lateral.abs() <= TELEGRAPH_WIDTH / 2.0
}

/// What the enemy pass needs to know about a player
struct Target {
    handle: PlayerHandle,
    peer_id: u32,
    x: f32,
    y: f32,
    defense: i32,
    alive: bool,
    safe: bool,
}

pub struct CombatSystem {
    tilemap: Arc<Tilemap>,
    sync: Arc<StateSync>,
    jobs: JobSender,
}

impl CombatSystem {
    pub fn new(tilemap: Arc<Tilemap>, sync: Arc<StateSync>, jobs: JobSender) -> Self {
        Self {
            tilemap,
            sync,
            jobs,
        }
    }

    /// One combat pass: melee volumes first, then every enemy's telegraph cycle
    pub fn update(&self, state: &Arc<GameState>, now: u64) {
        self.resolve_melee_attacks(state, now);

        let mut targets: Vec<Target> = state
            .players()
            .into_iter()
            .map(|handle| self.target_of(handle))
            .collect();

        for enemy in state.enemies() {
            self.resolve_strike(state, &enemy, &mut targets, now);
            self.engage(&enemy, &targets, now);
        }
    }

    fn target_of(&self, handle: PlayerHandle) -> Target {
        let (peer_id, x, y, defense, alive) = {
            let p = handle.lock();
            (p.peer_id, p.x, p.y, p.stats.defense, p.is_alive())
        };
        Target {
            handle,
            peer_id,
            x,
            y,
            defense,
            alive,
            safe: self.tilemap.is_in_safe_zone(x, y),
        }
    }

    /// Finishes an expired telegraph. Every live player outside a safe zone and
    /// inside the hitbox is hit; the enemy is back to idle either way.
    fn resolve_strike(
        &self,
        state: &Arc<GameState>,
        enemy: &EnemyHandle,
        targets: &mut [Target],
        now: u64,
    ) {
        let strike = {
            let mut e = enemy.lock();
            if !e.is_alive() || !e.telegraph_expired(now) {
                return;
            }
            e.begin_strike().map(|(tx, ty)| {
                let direction = e.strike_direction(tx, ty);
                ((e.x, e.y), direction, e.attack(), e.id)
            })
        };

        if let Some((origin, direction, attack, enemy_id)) = strike {
            for target in targets.iter_mut() {
                if !target.alive || target.safe {
                    continue;
                }
                if !in_strike_zone(origin, direction, target.x, target.y) {
                    continue;
                }

                let damage = mitigated_damage(attack, target.defense);
                debug!(
                    "Enemy {} hits player {} for {}",
                    enemy_id, target.peer_id, damage
                );
                self.damage_player(state, &target.handle, damage);
                *target = self.target_of(Arc::clone(&target.handle));
            }
        }

        enemy.lock().finish_strike(now);
    }

    /// Starts a telegraph at the first close player, or holds the enemy idle
    /// while players shelter in a safe zone
    fn engage(&self, enemy: &EnemyHandle, targets: &[Target], now: u64) {
        let mut e = enemy.lock();
        if !e.is_alive() {
            return;
        }

        for target in targets.iter().filter(|t| t.alive) {
            if target.safe {
                e.suppress();
                continue;
            }

            if e.phase() == AttackPhase::Idle
                && e.cooldown_elapsed(now)
                && distance(e.x, e.y, target.x, target.y) < MELEE_TRIGGER_RADIUS
            {
                e.start_telegraph(now, target.x, target.y);
            }
        }
    }

    /// Each active swing hits every enemy inside it at most once
    pub fn resolve_melee_attacks(&self, state: &Arc<GameState>, now: u64) {
        for attack in state.melee_attacks() {
            if !attack.is_active(now) {
                continue;
            }

            let damage = state
                .player(attack.player_id)
                .map(|p| p.lock().total_damage())
                .unwrap_or(1);

            for enemy in state.enemies() {
                let hit = {
                    let e = enemy.lock();
                    e.is_alive() && attack.covers(e.x, e.y)
                };
                if !hit {
                    continue;
                }

                let (enemy_id, defense) = {
                    let e = enemy.lock();
                    (e.id, e.defense())
                };
                if state.mark_melee_hit(attack.id, enemy_id) {
                    self.damage_enemy(
                        state,
                        &enemy,
                        mitigated_damage(damage, defense),
                        Some(attack.player_id),
                        now,
                    );
                }
            }
        }
    }

    /// Applies damage to an enemy and emits the damage event. On a kill the
    /// enemy moves to the respawn queue, the nearest player gets the
    /// experience and a drop roll is queued. Returns true on a kill.
    pub fn damage_enemy(
        &self,
        state: &Arc<GameState>,
        enemy: &EnemyHandle,
        amount: i32,
        attacker: Option<u32>,
        now: u64,
    ) -> bool {
        let (killed, id, x, y, template_id, experience) = {
            let mut e = enemy.lock();
            if !e.is_alive() {
                return false;
            }
            if let Some(attacker) = attacker {
                e.aggro.record(attacker, amount);
            }
            let killed = e.take_damage(amount, now);
            (killed, e.id, e.x, e.y, e.template.id, e.template.experience)
        };

        self.sync
            .broadcast_damage_event(id, TargetKind::Enemy, amount, x, y);

        if !killed {
            return false;
        }

        if state.retire_enemy(enemy) {
            debug!("Enemy {} died at ({:.0}, {:.0})", id, x, y);
        }
        self.reward_experience(state, x, y, experience);
        self.jobs.send(StorageJob::RollDrop {
            state: Arc::clone(state),
            enemy_template_id: template_id,
            x,
            y,
            now,
        });
        true
    }

    /// Credits the nearest live player within the reward radius, if any
    fn reward_experience(&self, state: &GameState, x: f32, y: f32, amount: u32) {
        let nearest = state
            .players()
            .into_iter()
            .filter_map(|handle| {
                let d = {
                    let p = handle.lock();
                    if !p.is_alive() {
                        return None;
                    }
                    distance(x, y, p.x, p.y)
                };
                (d <= XP_REWARD_RADIUS).then_some((d, handle))
            })
            .min_by(|a, b| a.0.total_cmp(&b.0));

        if let Some((_, handle)) = nearest {
            let mut p = handle.lock();
            if p.gain_xp(amount) {
                info!("{} reached level {}", p.username, p.level);
            }
        }
    }

    /// Applies damage to a player and emits the damage event. A killing blow
    /// respawns the player at the safe zone with default stats and queues the
    /// item drop. Returns true on death.
    pub fn damage_player(&self, state: &Arc<GameState>, player: &PlayerHandle, amount: i32) -> bool {
        let (died, peer_id, x, y, account_id) = {
            let mut p = player.lock();
            if !p.is_alive() {
                return false;
            }
            let died = p.take_damage(amount);
            (died, p.peer_id, p.x, p.y, p.account_id)
        };

        self.sync
            .broadcast_damage_event(peer_id as u64, TargetKind::Player, amount, x, y);

        if died {
            self.handle_player_death(state, player, x, y, account_id);
        }
        died
    }

    fn handle_player_death(
        &self,
        state: &Arc<GameState>,
        player: &PlayerHandle,
        x: f32,
        y: f32,
        account_id: Option<i64>,
    ) {
        let (cx, cy) = self.tilemap.safe_zone_centroid();
        let (peer_id, username) = {
            let mut p = player.lock();
            p.stats = CombatStats::default();
            p.respawn_at(cx, cy);
            (p.peer_id, p.username.clone())
        };

        for enemy in state.enemies() {
            enemy.lock().aggro.release(peer_id);
        }

        if let Some(account_id) = account_id {
            self.jobs.send(StorageJob::DeathDrop {
                state: Arc::clone(state),
                account_id,
                x,
                y,
            });
        }
        info!("{} died at ({:.0}, {:.0}) and respawned", username, x, y);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enemy::{Enemy, EnemyTemplate};
    use crate::entity::{MeleeAttack, Player};
    use crate::session_manager::SessionManager;
    use crate::tilemap::TileType;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// 10x10 map of open ground with a 2x2 safe corner at the top left
    fn test_map() -> Arc<Tilemap> {
        let rows = (0..10)
            .map(|y| {
                (0..10)
                    .map(|x| {
                        if x < 2 && y < 2 {
                            TileType::SafeZone
                        } else {
                            TileType::Pve
                        }
                    })
                    .collect()
            })
            .collect();
        Arc::new(Tilemap::from_rows(rows))
    }

    fn template(attack_rate: f32) -> Arc<EnemyTemplate> {
        Arc::new(EnemyTemplate {
            id: 1,
            name: "Spider".to_string(),
            level: 1,
            hp: 30,
            attack: 10,
            defense: 2,
            move_speed: 60.0,
            attack_rate,
            attack_range: 40.0,
            experience: 500,
        })
    }

    struct Harness {
        combat: CombatSystem,
        state: Arc<GameState>,
        jobs: mpsc::UnboundedReceiver<StorageJob>,
    }

    fn harness() -> Harness {
        let sessions = Arc::new(SessionManager::new(4));
        let sync = Arc::new(StateSync::new("main", sessions, Duration::from_millis(16)));
        let (tx, rx) = mpsc::unbounded_channel();
        Harness {
            combat: CombatSystem::new(test_map(), sync, JobSender::new(tx)),
            state: Arc::new(GameState::new()),
            jobs: rx,
        }
    }

    #[test]
    fn test_scatter_rings() {
        let mut rng = StdRng::seed_from_u64(7);
        for index in 0..24 {
            let (x, y) = scatter_position(0.0, 0.0, index, &mut rng);
            let expected = 48.0 + 24.0 * (index / 8) as f32;
            let d = distance(0.0, 0.0, x, y);
            assert!((d - expected).abs() <= 9.0, "index {} at {}", index, d);
        }
    }

    #[test]
    fn test_strike_zone_is_oriented_rectangle() {
        let origin = (100.0, 100.0);
        let east = (1.0, 0.0);

        assert!(in_strike_zone(origin, east, 100.0, 100.0));
        assert!(in_strike_zone(origin, east, 148.0, 148.0));
        assert!(in_strike_zone(origin, east, 130.0, 52.0));
        assert!(!in_strike_zone(origin, east, 149.0, 100.0));
        assert!(!in_strike_zone(origin, east, 99.0, 100.0));
        assert!(!in_strike_zone(origin, east, 120.0, 149.0));

        let south = (0.0, 1.0);
        assert!(in_strike_zone(origin, south, 100.0, 140.0));
        assert!(!in_strike_zone(origin, south, 140.0, 100.0));
    }

    #[test]
    fn test_telegraph_hits_player_who_steps_in_before_expiry() {
        let h = harness();
        let enemy = h.state.add_enemy(Enemy::new(1, template(2.0), 300.0, 300.0));
        let player = h.state.add_player(Player::new(1, "alice", "main", 320.0, 300.0));

        // Telegraph starts at t = 1000 aimed east
        h.combat.update(&h.state, 1000);
        assert!(enemy.lock().is_telegraphing());

        // Player slips out, then back in at t + 499
        player.lock().x = 400.0;
        h.combat.update(&h.state, 1400);
        assert_eq!(player.lock().health(), 100);

        player.lock().x = 330.0;
        h.combat.update(&h.state, 1499);
        assert!(enemy.lock().is_telegraphing());

        h.combat.update(&h.state, 1500);
        // 10 attack against 0 defense
        assert_eq!(player.lock().health(), 90);
        assert_eq!(enemy.lock().phase(), AttackPhase::Idle);
    }

    #[test]
    fn test_player_arriving_after_resolution_is_not_hit() {
        let h = harness();
        let enemy = h.state.add_enemy(Enemy::new(1, template(2.0), 300.0, 300.0));
        let player = h.state.add_player(Player::new(1, "alice", "main", 320.0, 300.0));

        h.combat.update(&h.state, 1000);
        player.lock().x = 400.0;

        // Resolves with nobody in the box
        h.combat.update(&h.state, 1500);
        assert_eq!(enemy.lock().phase(), AttackPhase::Idle);

        player.lock().x = 320.0;
        h.combat.update(&h.state, 1501);

        assert_eq!(player.lock().health(), 100);
        // Cooldown restarted at 1500, so no new telegraph yet
        assert_eq!(enemy.lock().phase(), AttackPhase::Idle);

        h.combat.update(&h.state, 2000);
        assert!(enemy.lock().is_telegraphing());
    }

    #[test]
    fn test_safe_zone_suppresses_engagement_but_not_running_telegraph() {
        let h = harness();
        // Enemy just outside the safe corner (which ends at 128px)
        let enemy = h.state.add_enemy(Enemy::new(1, template(1.0), 150.0, 100.0));
        let player = h.state.add_player(Player::new(1, "alice", "main", 120.0, 100.0));

        h.combat.update(&h.state, 0);
        assert_eq!(enemy.lock().phase(), AttackPhase::Idle);

        // Player steps out and the telegraph starts
        player.lock().x = 135.0;
        h.combat.update(&h.state, 10);
        assert!(enemy.lock().is_telegraphing());

        // Back into safety: the telegraph keeps running...
        player.lock().x = 120.0;
        h.combat.update(&h.state, 500);
        assert!(enemy.lock().is_telegraphing());

        // ...and resolves without damage
        h.combat.update(&h.state, 1010);
        assert_eq!(player.lock().health(), 100);
        assert_eq!(enemy.lock().phase(), AttackPhase::Idle);
    }

    #[test]
    fn test_enemy_kill_rewards_nearest_player_and_queues_drop() {
        let mut h = harness();
        let enemy = h.state.add_enemy(Enemy::new(1, template(1.0), 300.0, 300.0));
        let near = h.state.add_player(Player::new(1, "near", "main", 350.0, 300.0));
        let far = h.state.add_player(Player::new(2, "far", "main", 500.0, 300.0));

        assert!(!h.combat.damage_enemy(&h.state, &enemy, 10, Some(2), 0));
        assert_eq!(enemy.lock().aggro.holder(), Some(2));

        assert!(h.combat.damage_enemy(&h.state, &enemy, 100, Some(2), 5));
        assert_eq!(h.state.enemy_count(), 0);
        assert_eq!(h.state.dead_enemy_count(), 1);
        assert_eq!(enemy.lock().health(), 0);

        // 500 xp is enough for level 2
        assert_eq!(near.lock().level, 2);
        assert_eq!(far.lock().level, 1);

        match h.jobs.try_recv() {
            Ok(StorageJob::RollDrop {
                enemy_template_id, ..
            }) => assert_eq!(enemy_template_id, 1),
            _ => panic!("expected a drop roll"),
        }

        // Dead enemies take no further damage
        assert!(!h.combat.damage_enemy(&h.state, &enemy, 5, Some(1), 6));
    }

    #[test]
    fn test_kill_without_players_in_range_rewards_nobody() {
        let h = harness();
        let enemy = h.state.add_enemy(Enemy::new(1, template(1.0), 0.0, 0.0));
        let player = h.state.add_player(Player::new(1, "far", "main", 600.0, 0.0));

        assert!(h.combat.damage_enemy(&h.state, &enemy, 100, None, 0));
        assert_eq!(player.lock().xp, 0);
        assert_eq!(player.lock().level, 1);
    }

    #[test]
    fn test_player_death_respawns_at_safe_zone() {
        let mut h = harness();
        let enemy = h.state.add_enemy(Enemy::new(1, template(1.0), 300.0, 300.0));
        let player = h.state.add_player(Player::new(1, "alice", "main", 400.0, 400.0));
        {
            let mut p = player.lock();
            p.account_id = Some(9);
            p.stats.weapon_damage = 12;
        }
        enemy.lock().aggro.record(1, 5);

        assert!(h.combat.damage_player(&h.state, &player, 500));

        let p = player.lock();
        assert_eq!(p.health(), p.max_health());
        // Centroid of the 2x2 safe corner
        assert_eq!((p.x, p.y), (64.0, 64.0));
        assert_eq!(p.stats, CombatStats::default());
        assert_eq!(enemy.lock().aggro.holder(), None);

        match h.jobs.try_recv() {
            Ok(StorageJob::DeathDrop { account_id, x, y, .. }) => {
                assert_eq!(account_id, 9);
                assert_eq!((x, y), (400.0, 400.0));
            }
            _ => panic!("expected a death drop"),
        }
    }

    #[test]
    fn test_melee_volume_hits_each_enemy_once() {
        let h = harness();
        let enemy = h.state.add_enemy(Enemy::new(1, template(1.0), 330.0, 300.0));
        let behind = h.state.add_enemy(Enemy::new(2, template(1.0), 270.0, 300.0));
        h.state.add_player(Player::new(1, "alice", "main", 300.0, 300.0));
        h.state
            .add_melee_attack(MeleeAttack::new(1, 1, 300.0, 300.0, 50.0, 0.0, 1000));

        h.combat.resolve_melee_attacks(&h.state, 1000);
        h.combat.resolve_melee_attacks(&h.state, 1100);

        // total damage 1 + level 1 = 2, minus defense 2, floored at 1
        assert_eq!(enemy.lock().health(), 29);
        assert_eq!(behind.lock().health(), 30);
    }
}
