//! # Shared Protocol Library
//!
//! Types and constants used by both the authoritative server and any client
//! speaking to it. Everything that crosses the wire lives here so that the
//! server and test clients can never disagree about field names.
//!
//! ## Transports
//!
//! ### TCP (session control)
//! One long-lived connection per session carrying newline-delimited JSON. Every
//! message is an object whose `type` field selects the variant, see
//! [`protocol::ClientMessage`] and [`protocol::ServerMessage`].
//!
//! ### UDP (movement input)
//! Connectionless datagrams carrying only movement intent. Each datagram is
//! signed with HMAC-SHA256 keyed by the per-session token issued over TCP,
//! see [`signing`].
//!
//! ## World Units
//! Positions are pixels. Maps are grids of square tiles of [`TILE_SIZE`] pixels.

pub mod protocol;
pub mod signing;

pub use protocol::{
    AttackPhase, ClientMessage, EnemySnapshot, InventoryEntry, MeleeSnapshot, PlayerSnapshot,
    PortalSnapshot, ProjectileSnapshot, ServerMessage, TargetKind, UdpMessage, WorldItemSnapshot,
    WorldSnapshot,
};

pub const TILE_SIZE: f32 = 64.0;

pub const PLAYER_MOVE_SPEED: f32 = 100.0;
pub const PLAYER_BASE_HEALTH: i32 = 100;
pub const UNARMED_ATTACK_SPEED: f32 = 1.0;
pub const UNARMED_ATTACK_RANGE: f32 = 50.0;
pub const WEAPON_DEFAULT_RANGE: f32 = 200.0;

pub const PROJECTILE_SPEED: f32 = 400.0;
pub const PROJECTILE_LIFETIME: f32 = 3.0;
pub const PROJECTILE_RADIUS: f32 = 5.0;
pub const PROJECTILE_BASE_DAMAGE: i32 = 5;
pub const ENEMY_BODY_RADIUS: f32 = 20.0;

pub const MELEE_ATTACK_DURATION_MS: u64 = 200;

/// Enemies without aggro only chase players inside this radius (7 tiles of 32px)
pub const CHASE_RADIUS: f32 = 7.0 * 32.0;
pub const MELEE_TRIGGER_RADIUS: f32 = 40.0;
pub const TELEGRAPH_WIDTH: f32 = 96.0;
pub const TELEGRAPH_DEPTH: f32 = 48.0;

pub const XP_REWARD_RADIUS: f32 = 500.0;
pub const PICKUP_RADIUS: f32 = 96.0;
pub const PORTAL_RADIUS: f32 = 32.0;
pub const WORLD_ITEM_TTL_MS: u64 = 60_000;

pub const INVENTORY_COLUMNS: i32 = 6;
pub const INVENTORY_ROWS: i32 = 12;
pub const INVENTORY_CAPACITY: usize = (INVENTORY_COLUMNS * INVENTORY_ROWS) as usize;

pub fn distance(ax: f32, ay: f32, bx: f32, by: f32) -> f32 {
    let dx = bx - ax;
    let dy = by - ay;
    (dx * dx + dy * dy).sqrt()
}

/// Sanitizes a movement intent: rejects NaN/infinite components and scales
/// anything longer than one down to unit length.
pub fn clamp_direction(dx: f32, dy: f32) -> Option<(f32, f32)> {
    if !dx.is_finite() || !dy.is_finite() {
        return None;
    }

    let len = (dx * dx + dy * dy).sqrt();
    if len > 1.0 {
        Some((dx / len, dy / len))
    } else {
        Some((dx, dy))
    }
}

/// Effective damage of a hit after mitigation, never below one
pub fn mitigated_damage(attack: i32, defense: i32) -> i32 {
    (attack - defense).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_distance() {
        assert_approx_eq!(distance(0.0, 0.0, 3.0, 4.0), 5.0);
        assert_approx_eq!(distance(10.0, 10.0, 10.0, 10.0), 0.0);
    }

    #[test]
    fn test_clamp_direction_scales_long_vectors() {
        let (dx, dy) = clamp_direction(3.0, 4.0).unwrap();
        assert_approx_eq!(dx, 0.6);
        assert_approx_eq!(dy, 0.8);
    }

    #[test]
    fn test_clamp_direction_keeps_short_vectors() {
        let (dx, dy) = clamp_direction(0.5, -0.25).unwrap();
        assert_approx_eq!(dx, 0.5);
        assert_approx_eq!(dy, -0.25);

        assert_eq!(clamp_direction(0.0, 0.0), Some((0.0, 0.0)));
    }

    #[test]
    fn test_clamp_direction_rejects_non_finite() {
        assert!(clamp_direction(f32::NAN, 0.0).is_none());
        assert!(clamp_direction(0.0, f32::INFINITY).is_none());
        assert!(clamp_direction(f32::NEG_INFINITY, f32::NAN).is_none());
    }

    #[test]
    fn test_mitigated_damage_never_below_one() {
        assert_eq!(mitigated_damage(10, 3), 7);
        assert_eq!(mitigated_damage(5, 5), 1);
        assert_eq!(mitigated_damage(0, 0), 1);
        assert_eq!(mitigated_damage(2, 50), 1);

        for attack in 0..40 {
            for defense in 0..40 {
                assert!(mitigated_damage(attack, defense) >= 1);
            }
        }
    }
}
