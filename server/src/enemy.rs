//! Enemies, their templates and the telegraph attack state machine
//!
//! An enemy cycles `Idle -> Telegraphing -> Attacking -> Idle`. The legal moves
//! are listed in [`transition`]; every state change on [`Enemy`] goes through it.
//! All timing is expressed in wall-clock milliseconds passed in by the caller so
//! the machine can be driven deterministically.

use raiders_shared::{AttackPhase, EnemySnapshot};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct EnemyTemplate {
    pub id: u32,
    pub name: String,
    pub level: u32,
    pub hp: i32,
    pub attack: i32,
    pub defense: i32,
    pub move_speed: f32,
    /// Attacks per second
    pub attack_rate: f32,
    pub attack_range: f32,
    pub experience: u32,
}

impl EnemyTemplate {
    fn rate(&self) -> f64 {
        if self.attack_rate > 0.0 {
            self.attack_rate as f64
        } else {
            1.0
        }
    }

    /// Time between the end of one attack and the start of the next
    pub fn cooldown_ms(&self) -> u64 {
        (1000.0 / self.rate()) as u64
    }

    /// Wind-up length; faster attackers telegraph for less time
    pub fn telegraph_ms(&self) -> u64 {
        (1000.0 / self.rate()).round() as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttackEvent {
    /// A target entered melee range while the cooldown had elapsed
    Engage,
    /// The telegraph window ran out and the hit is being resolved
    Expire,
    /// Back to idle, either after resolving or because the target is protected
    Reset,
}

/// Transition table of the attack cycle
pub fn transition(phase: AttackPhase, event: AttackEvent) -> Option<AttackPhase> {
    use AttackEvent::*;
    use AttackPhase::*;

    match (phase, event) {
        (Idle, Engage) => Some(Telegraphing),
        (Telegraphing, Expire) => Some(Attacking),
        (Attacking, Reset) => Some(Idle),
        (Idle, Reset) => Some(Idle),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AttackState {
    Idle,
    Telegraphing {
        started_at: u64,
        duration_ms: u64,
        target_x: f32,
        target_y: f32,
    },
    Attacking {
        target_x: f32,
        target_y: f32,
    },
}

impl AttackState {
    pub fn phase(&self) -> AttackPhase {
        match self {
            AttackState::Idle => AttackPhase::Idle,
            AttackState::Telegraphing { .. } => AttackPhase::Telegraphing,
            AttackState::Attacking { .. } => AttackPhase::Attacking,
        }
    }
}

/// Cumulative damage per attacker and the player currently holding aggro
#[derive(Debug, Clone, Default)]
pub struct Aggro {
    damage_by: HashMap<u32, i32>,
    holder: Option<u32>,
}

impl Aggro {
    /// Credits damage to an attacker. A challenger takes aggro only when its
    /// cumulative damage strictly exceeds the holder's.
    pub fn record(&mut self, player_id: u32, amount: i32) {
        let total = {
            let entry = self.damage_by.entry(player_id).or_insert(0);
            *entry += amount.max(0);
            *entry
        };

        match self.holder {
            None => self.holder = Some(player_id),
            Some(holder) if holder == player_id => {}
            Some(holder) => {
                if total > self.damage_from(holder) {
                    self.holder = Some(player_id);
                }
            }
        }
    }

    pub fn holder(&self) -> Option<u32> {
        self.holder
    }

    pub fn damage_from(&self, player_id: u32) -> i32 {
        self.damage_by.get(&player_id).copied().unwrap_or(0)
    }

    /// Drops a holder that left or died so the enemy falls back to proximity
    pub fn release(&mut self, player_id: u32) {
        self.damage_by.remove(&player_id);
        if self.holder == Some(player_id) {
            self.holder = None;
        }
    }

    pub fn clear(&mut self) {
        self.damage_by.clear();
        self.holder = None;
    }
}

#[derive(Debug, Clone)]
pub struct Enemy {
    pub id: u64,
    pub template: Arc<EnemyTemplate>,
    pub spawn_x: f32,
    pub spawn_y: f32,
    pub x: f32,
    pub y: f32,
    health: i32,
    state: AttackState,
    last_attack_at: Option<u64>,
    died_at: Option<u64>,
    pub aggro: Aggro,
}

impl Enemy {
    pub fn new(id: u64, template: Arc<EnemyTemplate>, x: f32, y: f32) -> Self {
        let health = template.hp.max(1);
        Self {
            id,
            template,
            spawn_x: x,
            spawn_y: y,
            x,
            y,
            health,
            state: AttackState::Idle,
            last_attack_at: None,
            died_at: None,
            aggro: Aggro::default(),
        }
    }

    pub fn health(&self) -> i32 {
        self.health
    }

    pub fn max_health(&self) -> i32 {
        self.template.hp.max(1)
    }

    pub fn is_alive(&self) -> bool {
        self.health > 0
    }

    pub fn defense(&self) -> i32 {
        self.template.defense
    }

    pub fn attack(&self) -> i32 {
        self.template.attack
    }

    pub fn attack_state(&self) -> &AttackState {
        &self.state
    }

    pub fn phase(&self) -> AttackPhase {
        self.state.phase()
    }

    pub fn is_telegraphing(&self) -> bool {
        matches!(self.state, AttackState::Telegraphing { .. })
    }

    pub fn died_at(&self) -> Option<u64> {
        self.died_at
    }

    /// Applies damage, clamping at zero. Returns true when this hit killed it.
    pub fn take_damage(&mut self, amount: i32, now: u64) -> bool {
        if !self.is_alive() {
            return false;
        }

        self.health = (self.health - amount.max(0)).clamp(0, self.max_health());
        if self.health == 0 {
            self.died_at = Some(now);
            self.state = AttackState::Idle;
            true
        } else {
            false
        }
    }

    pub fn cooldown_elapsed(&self, now: u64) -> bool {
        match self.last_attack_at {
            Some(last) => now.saturating_sub(last) >= self.template.cooldown_ms(),
            None => true,
        }
    }

    /// `Idle -> Telegraphing`, aimed at a world point. Refused while cooling down.
    pub fn start_telegraph(&mut self, now: u64, target_x: f32, target_y: f32) -> bool {
        if !self.is_alive() || !self.cooldown_elapsed(now) {
            return false;
        }
        if transition(self.phase(), AttackEvent::Engage).is_none() {
            return false;
        }

        self.state = AttackState::Telegraphing {
            started_at: now,
            duration_ms: self.template.telegraph_ms(),
            target_x,
            target_y,
        };
        true
    }

    pub fn telegraph_expired(&self, now: u64) -> bool {
        match self.state {
            AttackState::Telegraphing {
                started_at,
                duration_ms,
                ..
            } => now.saturating_sub(started_at) >= duration_ms,
            _ => false,
        }
    }

    /// `Telegraphing -> Attacking`; yields the recorded target point
    pub fn begin_strike(&mut self) -> Option<(f32, f32)> {
        let (target_x, target_y) = match self.state {
            AttackState::Telegraphing {
                target_x, target_y, ..
            } => (target_x, target_y),
            _ => return None,
        };
        transition(self.phase(), AttackEvent::Expire)?;

        self.state = AttackState::Attacking { target_x, target_y };
        Some((target_x, target_y))
    }

    /// `Attacking -> Idle`; the cooldown restarts from `now`
    pub fn finish_strike(&mut self, now: u64) {
        if transition(self.phase(), AttackEvent::Reset).is_some() {
            self.state = AttackState::Idle;
            self.last_attack_at = Some(now);
        }
    }

    /// Forces an idle enemy to stay idle. A running telegraph is left alone.
    pub fn suppress(&mut self) {
        if let Some(AttackPhase::Idle) = transition(self.phase(), AttackEvent::Reset) {
            self.state = AttackState::Idle;
        }
    }

    /// Unit vector of the telegraph and the hitbox anchor, `(1, 0)` if the
    /// target point coincides with the enemy
    pub fn strike_direction(&self, target_x: f32, target_y: f32) -> (f32, f32) {
        let dx = target_x - self.x;
        let dy = target_y - self.y;
        let len = (dx * dx + dy * dy).sqrt();
        if len > 0.0 {
            (dx / len, dy / len)
        } else {
            (1.0, 0.0)
        }
    }

    pub fn ready_to_respawn(&self, now: u64, delay_ms: u64) -> bool {
        match self.died_at {
            Some(died) => now.saturating_sub(died) >= delay_ms,
            None => false,
        }
    }

    /// Back at the original spawn point with full health and a clean slate
    pub fn respawn(&mut self) {
        self.x = self.spawn_x;
        self.y = self.spawn_y;
        self.health = self.max_health();
        self.state = AttackState::Idle;
        self.last_attack_at = None;
        self.died_at = None;
        self.aggro.clear();
    }

    pub fn snapshot(&self) -> EnemySnapshot {
        let (target_x, target_y, started_at, duration_ms) = match self.state {
            AttackState::Telegraphing {
                started_at,
                duration_ms,
                target_x,
                target_y,
            } => (target_x, target_y, started_at, duration_ms),
            AttackState::Attacking { target_x, target_y } => (target_x, target_y, 0, 0),
            AttackState::Idle => (0.0, 0.0, 0, 0),
        };

        EnemySnapshot {
            id: self.id,
            template_id: self.template.id,
            x: self.x,
            y: self.y,
            health: self.health,
            max_health: self.max_health(),
            name: self.template.name.clone(),
            level: self.template.level,
            alive: self.is_alive(),
            attack_state: self.phase(),
            telegraph_target_x: target_x,
            telegraph_target_y: target_y,
            telegraph_start_time: started_at,
            telegraph_duration_ms: duration_ms,
        }
    }
}
