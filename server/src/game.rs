//! Concurrent entity container for one map
//!
//! Players and enemies are stored as shared handles so the tick can mutate an
//! entity while network tasks read or write another. Enumerations clone the
//! handle list under a short read lock and release it before returning.
//!
//! Lock order when two containers are involved: `enemies` before `dead_enemies`.
//! Callers never hold an entity lock while calling into this type.

use crate::enemy::Enemy;
use crate::entity::{MeleeAttack, Player, Portal, Projectile, WorldItem};
use log::info;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

pub type PlayerHandle = Arc<Mutex<Player>>;
pub type EnemyHandle = Arc<Mutex<Enemy>>;

#[derive(Debug, Default)]
pub struct GameState {
    players: RwLock<HashMap<u32, PlayerHandle>>,
    enemies: RwLock<Vec<EnemyHandle>>,
    dead_enemies: Mutex<VecDeque<EnemyHandle>>,
    projectiles: RwLock<Vec<Projectile>>,
    melee_attacks: RwLock<Vec<MeleeAttack>>,
    world_items: RwLock<Vec<WorldItem>>,
    portals: RwLock<Vec<Portal>>,
    world_time: AtomicU64,
    running: AtomicBool,
}

impl GameState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    pub fn world_time(&self) -> u64 {
        self.world_time.load(Ordering::Relaxed)
    }

    pub fn set_world_time(&self, now: u64) {
        self.world_time.store(now, Ordering::Relaxed);
    }

    // Players

    pub fn add_player(&self, player: Player) -> PlayerHandle {
        let peer_id = player.peer_id;
        let handle = Arc::new(Mutex::new(player));
        self.players.write().insert(peer_id, Arc::clone(&handle));
        info!("Player {} added to map state", peer_id);
        handle
    }

    /// Inserts an existing handle, used when a player moves between maps
    pub fn insert_player(&self, handle: PlayerHandle) {
        let peer_id = handle.lock().peer_id;
        self.players.write().insert(peer_id, handle);
    }

    pub fn remove_player(&self, peer_id: u32) -> Option<PlayerHandle> {
        self.players.write().remove(&peer_id)
    }

    pub fn player(&self, peer_id: u32) -> Option<PlayerHandle> {
        self.players.read().get(&peer_id).cloned()
    }

    pub fn players(&self) -> Vec<PlayerHandle> {
        self.players.read().values().cloned().collect()
    }

    pub fn player_count(&self) -> usize {
        self.players.read().len()
    }

    // Enemies

    pub fn add_enemy(&self, enemy: Enemy) -> EnemyHandle {
        let handle = Arc::new(Mutex::new(enemy));
        self.enemies.write().push(Arc::clone(&handle));
        handle
    }

    pub fn enemies(&self) -> Vec<EnemyHandle> {
        self.enemies.read().clone()
    }

    pub fn enemy_count(&self) -> usize {
        self.enemies.read().len()
    }

    /// Moves an enemy from the active list to the respawn queue in one step.
    /// False if it was not active.
    pub fn retire_enemy(&self, handle: &EnemyHandle) -> bool {
        let mut enemies = self.enemies.write();
        let before = enemies.len();
        enemies.retain(|e| !Arc::ptr_eq(e, handle));
        if enemies.len() == before {
            return false;
        }

        self.dead_enemies.lock().push_back(Arc::clone(handle));
        true
    }

    /// Moves a queued enemy back into the active list in one step
    pub fn reinstate_enemy(&self, handle: EnemyHandle) {
        let mut enemies = self.enemies.write();
        let mut dead = self.dead_enemies.lock();
        dead.retain(|e| !Arc::ptr_eq(e, &handle));
        enemies.push(handle);
    }

    pub fn pop_dead_enemy(&self) -> Option<EnemyHandle> {
        self.dead_enemies.lock().pop_front()
    }

    pub fn push_dead_enemy(&self, handle: EnemyHandle) {
        self.dead_enemies.lock().push_back(handle);
    }

    pub fn dead_enemy_count(&self) -> usize {
        self.dead_enemies.lock().len()
    }

    // Projectiles

    pub fn add_projectile(&self, projectile: Projectile) {
        self.projectiles.write().push(projectile);
    }

    pub fn projectiles(&self) -> Vec<Projectile> {
        self.projectiles.read().clone()
    }

    pub fn remove_projectile(&self, id: u64) -> bool {
        let mut projectiles = self.projectiles.write();
        let before = projectiles.len();
        projectiles.retain(|p| p.id != id);
        projectiles.len() != before
    }

    /// Applies `f` to every projectile under a single write lock
    pub fn update_projectiles<F: FnMut(&mut Projectile)>(&self, mut f: F) {
        for projectile in self.projectiles.write().iter_mut() {
            f(projectile);
        }
    }

    pub fn remove_expired_projectiles(&self) -> usize {
        let mut projectiles = self.projectiles.write();
        let before = projectiles.len();
        projectiles.retain(|p| !p.is_expired());
        before - projectiles.len()
    }

    // Melee volumes

    pub fn add_melee_attack(&self, attack: MeleeAttack) {
        self.melee_attacks.write().push(attack);
    }

    pub fn melee_attacks(&self) -> Vec<MeleeAttack> {
        self.melee_attacks.read().clone()
    }

    /// Records a hit on the volume; false if the volume is gone or already hit that enemy
    pub fn mark_melee_hit(&self, attack_id: u64, enemy_id: u64) -> bool {
        self.melee_attacks
            .write()
            .iter_mut()
            .find(|a| a.id == attack_id)
            .map(|a| a.mark_hit(enemy_id))
            .unwrap_or(false)
    }

    pub fn remove_expired_melee_attacks(&self, now: u64) {
        self.melee_attacks.write().retain(|a| a.is_active(now));
    }

    // World items

    pub fn add_world_item(&self, item: WorldItem) {
        self.world_items.write().push(item);
    }

    pub fn world_items(&self) -> Vec<WorldItem> {
        self.world_items.read().clone()
    }

    pub fn world_item(&self, id: u64) -> Option<WorldItem> {
        self.world_items.read().iter().find(|i| i.id == id).cloned()
    }

    /// Marks an unclaimed item as claimed by `claimer`. Exactly one of any
    /// number of racing callers gets the item back.
    pub fn claim_world_item(&self, id: u64, claimer: i64) -> Option<WorldItem> {
        let mut items = self.world_items.write();
        let item = items
            .iter_mut()
            .find(|i| i.id == id && i.claimed_by.is_none())?;
        item.claimed_by = Some(claimer);
        Some(item.clone())
    }

    pub fn unclaim_world_item(&self, id: u64) {
        if let Some(item) = self.world_items.write().iter_mut().find(|i| i.id == id) {
            item.claimed_by = None;
        }
    }

    pub fn remove_world_item(&self, id: u64) -> Option<WorldItem> {
        let mut items = self.world_items.write();
        let index = items.iter().position(|i| i.id == id)?;
        Some(items.remove(index))
    }

    /// Drops unclaimed items past their time-to-live
    pub fn remove_expired_world_items(&self, now: u64) -> usize {
        let mut items = self.world_items.write();
        let before = items.len();
        items.retain(|i| i.claimed_by.is_some() || !i.is_expired(now));
        before - items.len()
    }

    // Portals

    pub fn add_portal(&self, portal: Portal) {
        self.portals.write().push(portal);
    }

    pub fn portals(&self) -> Vec<Portal> {
        self.portals.read().clone()
    }
}
