//! Players and the short-lived entities of a map
//!
//! Enemies live in `enemy` because of their attack state machine.

use raiders_shared::{
    distance, MeleeSnapshot, PlayerSnapshot, PortalSnapshot, ProjectileSnapshot,
    WorldItemSnapshot, MELEE_ATTACK_DURATION_MS, PLAYER_BASE_HEALTH, PLAYER_MOVE_SPEED,
    PROJECTILE_LIFETIME, PROJECTILE_RADIUS, PROJECTILE_SPEED, UNARMED_ATTACK_RANGE,
    UNARMED_ATTACK_SPEED, WORLD_ITEM_TTL_MS,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

/// How the equipped weapon delivers its damage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttackType {
    #[default]
    Unarmed,
    Ranged,
    Melee,
}

/// Equipment-derived numbers read by the combat path every tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CombatStats {
    pub attack_speed: f32,
    pub attack_range: f32,
    pub weapon_damage: i32,
    pub attack_type: AttackType,
    pub defense: i32,
}

impl Default for CombatStats {
    fn default() -> Self {
        Self {
            attack_speed: UNARMED_ATTACK_SPEED,
            attack_range: UNARMED_ATTACK_RANGE,
            weapon_damage: 0,
            attack_type: AttackType::Unarmed,
            defense: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Player {
    pub peer_id: u32,
    /// Durable account id, bound once credentials resolve
    pub account_id: Option<i64>,
    pub username: String,
    pub map_id: String,
    pub x: f32,
    pub y: f32,
    pub dir_x: f32,
    pub dir_y: f32,
    pub move_speed: f32,
    health: i32,
    max_health: i32,
    pub level: u32,
    pub xp: u32,
    pub stats: CombatStats,
    last_attack_at: Option<u64>,
}

impl Player {
    pub fn new(peer_id: u32, username: &str, map_id: &str, x: f32, y: f32) -> Self {
        Self {
            peer_id,
            account_id: None,
            username: username.to_string(),
            map_id: map_id.to_string(),
            x,
            y,
            dir_x: 0.0,
            dir_y: 0.0,
            move_speed: PLAYER_MOVE_SPEED,
            health: PLAYER_BASE_HEALTH,
            max_health: PLAYER_BASE_HEALTH,
            level: 1,
            xp: 0,
            stats: CombatStats::default(),
            last_attack_at: None,
        }
    }

    pub fn health(&self) -> i32 {
        self.health
    }

    pub fn max_health(&self) -> i32 {
        self.max_health
    }

    pub fn is_alive(&self) -> bool {
        self.health > 0
    }

    /// Restores persisted vitals, keeping health within `[0, max]`
    pub fn restore_vitals(&mut self, health: i32, max_health: i32) {
        self.max_health = max_health.max(1);
        self.health = health.clamp(0, self.max_health);
    }

    /// Applies damage and reports whether this hit killed the player
    pub fn take_damage(&mut self, amount: i32) -> bool {
        let was_alive = self.is_alive();
        self.health = (self.health - amount.max(0)).clamp(0, self.max_health);
        was_alive && !self.is_alive()
    }

    pub fn heal_full(&mut self) {
        self.health = self.max_health;
    }

    pub fn set_direction(&mut self, dx: f32, dy: f32) {
        self.dir_x = dx;
        self.dir_y = dy;
    }

    pub fn xp_for_next_level(&self) -> u32 {
        (120.0 * (self.level as f64).powf(1.5)) as u32
    }

    /// Adds experience, levelling up at most once per call.
    /// Returns true on level-up.
    pub fn gain_xp(&mut self, amount: u32) -> bool {
        self.xp = self.xp.saturating_add(amount);
        if self.xp >= self.xp_for_next_level() {
            self.level += 1;
            self.max_health += 20;
            self.health = self.max_health;
            self.xp = 0;
            true
        } else {
            false
        }
    }

    pub fn attack_cooldown_ms(&self) -> u64 {
        let speed = if self.stats.attack_speed > 0.0 {
            self.stats.attack_speed
        } else {
            UNARMED_ATTACK_SPEED
        };
        (1000.0 / speed) as u64
    }

    pub fn can_attack(&self, now: u64) -> bool {
        match self.last_attack_at {
            Some(last) => now.saturating_sub(last) >= self.attack_cooldown_ms(),
            None => true,
        }
    }

    pub fn record_attack(&mut self, now: u64) {
        self.last_attack_at = Some(now);
    }

    pub fn total_damage(&self) -> i32 {
        1 + self.level as i32 + self.stats.weapon_damage
    }

    pub fn respawn_at(&mut self, x: f32, y: f32) {
        self.x = x;
        self.y = y;
        self.dir_x = 0.0;
        self.dir_y = 0.0;
        self.heal_full();
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        PlayerSnapshot {
            peer_id: self.peer_id,
            username: self.username.clone(),
            x: self.x,
            y: self.y,
            health: self.health,
            max_health: self.max_health,
            xp: self.xp,
            level: self.level,
            alive: self.is_alive(),
            attack_range: self.stats.attack_range,
            dir_x: self.dir_x,
            dir_y: self.dir_y,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Projectile {
    pub id: u64,
    pub shooter_id: u32,
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
    pub age: f32,
}

impl Projectile {
    /// Aims a projectile from the shooter's position at the target point
    pub fn aimed(id: u64, shooter_id: u32, x: f32, y: f32, target_x: f32, target_y: f32) -> Self {
        let dx = target_x - x;
        let dy = target_y - y;
        let len = (dx * dx + dy * dy).sqrt();
        let (vx, vy) = if len > 0.0 {
            (dx / len * PROJECTILE_SPEED, dy / len * PROJECTILE_SPEED)
        } else {
            (PROJECTILE_SPEED, 0.0)
        };

        Self {
            id,
            shooter_id,
            x,
            y,
            vx,
            vy,
            age: 0.0,
        }
    }

    pub fn advance(&mut self, dt: f32) {
        self.x += self.vx * dt;
        self.y += self.vy * dt;
        self.age += dt;
    }

    pub fn is_expired(&self) -> bool {
        self.age >= PROJECTILE_LIFETIME
    }

    pub fn hits(&self, x: f32, y: f32, body_radius: f32) -> bool {
        distance(self.x, self.y, x, y) < PROJECTILE_RADIUS + body_radius
    }

    pub fn snapshot(&self) -> ProjectileSnapshot {
        ProjectileSnapshot {
            id: self.id,
            shooter_id: self.shooter_id,
            x: self.x,
            y: self.y,
            vx: self.vx,
            vy: self.vy,
        }
    }
}

/// Semicircular swing volume left by a melee weapon
#[derive(Debug, Clone, PartialEq)]
pub struct MeleeAttack {
    pub id: u64,
    pub player_id: u32,
    pub x: f32,
    pub y: f32,
    pub radius: f32,
    pub started_at: u64,
    pub duration_ms: u64,
    /// Facing in degrees, normalised to `[0, 360)`
    pub direction_degrees: f32,
    pub hit_enemies: HashSet<u64>,
}

impl MeleeAttack {
    pub fn new(
        id: u64,
        player_id: u32,
        x: f32,
        y: f32,
        radius: f32,
        direction_degrees: f32,
        now: u64,
    ) -> Self {
        Self {
            id,
            player_id,
            x,
            y,
            radius,
            started_at: now,
            duration_ms: MELEE_ATTACK_DURATION_MS,
            direction_degrees: direction_degrees.rem_euclid(360.0),
            hit_enemies: HashSet::new(),
        }
    }

    pub fn is_active(&self, now: u64) -> bool {
        now.saturating_sub(self.started_at) < self.duration_ms
    }

    /// Point lies within the radius and in front of the swing
    pub fn covers(&self, x: f32, y: f32) -> bool {
        let dx = x - self.x;
        let dy = y - self.y;
        if (dx * dx + dy * dy).sqrt() > self.radius {
            return false;
        }

        let facing = self.direction_degrees.to_radians();
        dx * facing.cos() + dy * facing.sin() >= 0.0
    }

    /// Records a hit; false if this enemy was already struck by the swing
    pub fn mark_hit(&mut self, enemy_id: u64) -> bool {
        self.hit_enemies.insert(enemy_id)
    }

    pub fn snapshot(&self) -> MeleeSnapshot {
        MeleeSnapshot {
            id: self.id,
            player_id: self.player_id,
            x: self.x,
            y: self.y,
            radius: self.radius,
            start_time: self.started_at,
            duration_ms: self.duration_ms,
            direction_degrees: self.direction_degrees,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorldItem {
    pub id: u64,
    pub item_template_id: u32,
    pub name: String,
    pub item_type: String,
    pub x: f32,
    pub y: f32,
    pub dropped_at: u64,
    pub claimed_by: Option<i64>,
    pub has_mods: bool,
}

impl WorldItem {
    pub fn is_expired(&self, now: u64) -> bool {
        now.saturating_sub(self.dropped_at) >= WORLD_ITEM_TTL_MS
    }

    pub fn snapshot(&self) -> WorldItemSnapshot {
        WorldItemSnapshot {
            id: self.id,
            item_template_id: self.item_template_id,
            name: self.name.clone(),
            item_type: self.item_type.clone(),
            x: self.x,
            y: self.y,
            claimed_by: self.claimed_by,
            has_mods: self.has_mods,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Portal {
    pub x: f32,
    pub y: f32,
    pub target_map_id: String,
}

impl Portal {
    pub fn snapshot(&self) -> PortalSnapshot {
        PortalSnapshot {
            x: self.x,
            y: self.y,
            target_map_id: self.target_map_id.clone(),
        }
    }
}

/// Hands out entity ids; shared by every map so ids stay unique server-wide
#[derive(Debug)]
pub struct EntityIds {
    enemy: AtomicU64,
    projectile: AtomicU64,
    melee: AtomicU64,
}

impl EntityIds {
    pub fn new() -> Self {
        Self {
            enemy: AtomicU64::new(1),
            projectile: AtomicU64::new(1),
            melee: AtomicU64::new(1),
        }
    }

    pub fn next_enemy(&self) -> u64 {
        self.enemy.fetch_add(1, Ordering::Relaxed)
    }

    pub fn next_projectile(&self) -> u64 {
        self.projectile.fetch_add(1, Ordering::Relaxed)
    }

    pub fn next_melee(&self) -> u64 {
        self.melee.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for EntityIds {
    fn default() -> Self {
        Self::new()
    }
}
