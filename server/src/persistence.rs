//! Persistence seams and the in-memory store behind them
//!
//! The simulation only talks to storage through these traits. Every call is
//! synchronous and may be slow; callers run them off the tick (see `jobs`) and
//! never while holding a lock.

use crate::entity::{AttackType, CombatStats, Player, WorldItem};
use crate::error::StoreError;
use parking_lot::Mutex;
use raiders_shared::{
    InventoryEntry, INVENTORY_CAPACITY, INVENTORY_COLUMNS, INVENTORY_ROWS, PLAYER_BASE_HEALTH,
    WEAPON_DEFAULT_RANGE,
};
use rand::Rng;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Durable part of a player
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerRecord {
    pub account_id: i64,
    pub username: String,
    pub level: u32,
    pub xp: u32,
    pub health: i32,
    pub max_health: i32,
    pub x: f32,
    pub y: f32,
    /// Map the player was last on; None until the first save
    pub map_id: Option<String>,
}

impl PlayerRecord {
    /// The durable part of a live player; None for players without an account
    pub fn from_player(player: &Player) -> Option<Self> {
        Some(Self {
            account_id: player.account_id?,
            username: player.username.clone(),
            level: player.level,
            xp: player.xp,
            health: player.health(),
            max_health: player.max_health(),
            x: player.x,
            y: player.y,
            map_id: Some(player.map_id.clone()),
        })
    }
}

pub trait PlayerStore: Send + Sync {
    fn account_exists(&self, username: &str) -> StoreResult<bool>;
    fn validate_credentials(&self, username: &str, password: &str) -> StoreResult<bool>;
    fn load(&self, username: &str) -> StoreResult<Option<PlayerRecord>>;
    fn create(&self, username: &str, password: &str) -> StoreResult<PlayerRecord>;
    fn save(&self, record: &PlayerRecord) -> StoreResult<()>;
}

pub trait InventoryStore: Send + Sync {
    /// Carried items, equipped ones excluded
    fn inventory(&self, account_id: i64) -> StoreResult<Vec<InventoryEntry>>;
    /// Equipped items keyed by slot name
    fn equipped(&self, account_id: i64) -> StoreResult<BTreeMap<String, InventoryEntry>>;
    fn combat_stats(&self, account_id: i64) -> StoreResult<CombatStats>;
    fn pickup(&self, account_id: i64, item: &WorldItem) -> StoreResult<()>;
    fn move_item(&self, account_id: i64, inventory_id: u64, slot_x: i32, slot_y: i32)
        -> StoreResult<()>;
    fn drop_item(
        &self,
        account_id: i64,
        inventory_id: u64,
        x: f32,
        y: f32,
        now: u64,
    ) -> StoreResult<WorldItem>;
    fn equip(&self, account_id: i64, inventory_id: u64, slot_type: &str) -> StoreResult<()>;
    fn unequip(&self, account_id: i64, slot_type: &str) -> StoreResult<()>;
    /// Strips every carried and equipped item; the caller places them in the world
    fn take_all_for_death(&self, account_id: i64) -> StoreResult<Vec<WorldItem>>;
}

pub trait DropTable: Send + Sync {
    fn roll(
        &self,
        enemy_template_id: u32,
        x: f32,
        y: f32,
        now: u64,
    ) -> StoreResult<Option<WorldItem>>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ItemTemplate {
    pub id: u32,
    pub name: String,
    /// Also the equipment slot the item fits (`weapon`, `armor`, `helmet`, ...)
    pub item_type: String,
    pub damage: i32,
    pub defense: i32,
    pub attack_speed: f32,
    /// Zero means "use the default weapon range"
    pub attack_range: f32,
    pub attack_type: AttackType,
    pub rarity: String,
    pub stackable: bool,
}

fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

struct Account {
    record: PlayerRecord,
    password_hash: String,
}

#[derive(Default)]
struct Inner {
    accounts: HashMap<String, Account>,
    next_account_id: i64,
    templates: HashMap<u32, ItemTemplate>,
    /// Every minted world item id and its template
    world_items: HashMap<u64, u32>,
    next_world_item_id: u64,
    next_inventory_id: u64,
    inventories: HashMap<i64, Vec<InventoryEntry>>,
    /// slot -> inventory id
    equipped: HashMap<i64, BTreeMap<String, u64>>,
    /// enemy template -> (item template, chance)
    drop_tables: HashMap<u32, Vec<(u32, f32)>>,
}

impl Inner {
    fn entry_for(&self, template_id: u32, world_item_id: u64, inventory_id: u64) -> InventoryEntry {
        let template = self.templates.get(&template_id);
        InventoryEntry {
            inventory_id,
            world_item_id,
            item_template_id: template_id,
            name: template.map(|t| t.name.clone()).unwrap_or_else(|| "Item".to_string()),
            item_type: template.map(|t| t.item_type.clone()).unwrap_or_default(),
            damage: template.map(|t| t.damage).unwrap_or(0),
            defense: template.map(|t| t.defense).unwrap_or(0),
            rarity: template
                .map(|t| t.rarity.clone())
                .unwrap_or_else(|| "common".to_string()),
            stackable: template.map(|t| t.stackable).unwrap_or(false),
            quantity: 1,
            slot_x: 0,
            slot_y: 0,
        }
    }

    fn world_item(&self, world_item_id: u64, template_id: u32, x: f32, y: f32, now: u64) -> WorldItem {
        let template = self.templates.get(&template_id);
        WorldItem {
            id: world_item_id,
            item_template_id: template_id,
            name: template.map(|t| t.name.clone()).unwrap_or_else(|| "Item".to_string()),
            item_type: template.map(|t| t.item_type.clone()).unwrap_or_default(),
            x,
            y,
            dropped_at: now,
            claimed_by: None,
            has_mods: false,
        }
    }

    fn next_free_slot(&self, account_id: i64) -> Option<(i32, i32)> {
        let items = self.inventories.get(&account_id);
        for slot_y in 0..INVENTORY_ROWS {
            for slot_x in 0..INVENTORY_COLUMNS {
                let taken = items
                    .map(|list| list.iter().any(|e| e.slot_x == slot_x && e.slot_y == slot_y))
                    .unwrap_or(false);
                if !taken {
                    return Some((slot_x, slot_y));
                }
            }
        }
        None
    }

    fn mint(&mut self, template_id: u32) -> u64 {
        self.next_world_item_id += 1;
        let id = self.next_world_item_id;
        self.world_items.insert(id, template_id);
        id
    }
}

/// Keeps accounts, inventories and drop tables in memory
pub struct MemoryStore {
    inner: Mutex<Inner>,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            offline: AtomicBool::new(false),
        }
    }

    /// A store with a starter item catalogue and drops for the default enemies
    pub fn with_defaults() -> Self {
        let store = Self::new();
        let catalogue = [
            (1, "Rusty Dagger", "weapon", 3, 0, 1.5, 60.0, AttackType::Melee, "common"),
            (2, "Short Bow", "weapon", 4, 0, 1.0, 0.0, AttackType::Ranged, "common"),
            (3, "Leather Armor", "armor", 0, 3, 0.0, 0.0, AttackType::Unarmed, "common"),
            (4, "Iron Helmet", "helmet", 0, 2, 0.0, 0.0, AttackType::Unarmed, "uncommon"),
            (5, "War Axe", "weapon", 9, 0, 0.8, 70.0, AttackType::Melee, "rare"),
        ];
        for (id, name, kind, damage, defense, speed, range, attack_type, rarity) in catalogue {
            store.add_template(ItemTemplate {
                id,
                name: name.to_string(),
                item_type: kind.to_string(),
                damage,
                defense,
                attack_speed: speed,
                attack_range: range,
                attack_type,
                rarity: rarity.to_string(),
                stackable: false,
            });
        }

        store.set_drops(1, vec![(1, 0.15), (3, 0.10)]);
        store.set_drops(2, vec![(2, 0.15), (3, 0.10)]);
        store.set_drops(3, vec![(4, 0.15), (1, 0.10)]);
        store.set_drops(4, vec![(5, 0.10), (4, 0.10)]);
        store
    }

    pub fn add_template(&self, template: ItemTemplate) {
        self.inner.lock().templates.insert(template.id, template);
    }

    pub fn set_drops(&self, enemy_template_id: u32, drops: Vec<(u32, f32)>) {
        self.inner.lock().drop_tables.insert(enemy_template_id, drops);
    }

    /// Registers a fresh world item of the given template, returning it unplaced
    #[cfg(test)]
    pub fn mint_world_item(&self, template_id: u32, x: f32, y: f32, now: u64) -> WorldItem {
        let mut inner = self.inner.lock();
        let id = inner.mint(template_id);
        inner.world_item(id, template_id, x, y, now)
    }

    /// Makes every call fail with `StoreError::Unavailable`
    #[cfg(test)]
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Release);
    }

    fn check_online(&self) -> StoreResult<()> {
        if self.offline.load(Ordering::Acquire) {
            Err(StoreError::Unavailable("store offline".to_string()))
        } else {
            Ok(())
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PlayerStore for MemoryStore {
    fn account_exists(&self, username: &str) -> StoreResult<bool> {
        self.check_online()?;
        Ok(self.inner.lock().accounts.contains_key(username))
    }

    fn validate_credentials(&self, username: &str, password: &str) -> StoreResult<bool> {
        self.check_online()?;
        let inner = self.inner.lock();
        Ok(inner
            .accounts
            .get(username)
            .map(|a| a.password_hash == hash_password(password))
            .unwrap_or(false))
    }

    fn load(&self, username: &str) -> StoreResult<Option<PlayerRecord>> {
        self.check_online()?;
        Ok(self
            .inner
            .lock()
            .accounts
            .get(username)
            .map(|a| a.record.clone()))
    }

    fn create(&self, username: &str, password: &str) -> StoreResult<PlayerRecord> {
        self.check_online()?;
        let mut inner = self.inner.lock();
        if inner.accounts.contains_key(username) {
            return Err(StoreError::AccountExists(username.to_string()));
        }

        inner.next_account_id += 1;
        let record = PlayerRecord {
            account_id: inner.next_account_id,
            username: username.to_string(),
            level: 1,
            xp: 0,
            health: PLAYER_BASE_HEALTH,
            max_health: PLAYER_BASE_HEALTH,
            x: 0.0,
            y: 0.0,
            map_id: None,
        };
        inner.accounts.insert(
            username.to_string(),
            Account {
                record: record.clone(),
                password_hash: hash_password(password),
            },
        );
        Ok(record)
    }

    fn save(&self, record: &PlayerRecord) -> StoreResult<()> {
        self.check_online()?;
        let mut inner = self.inner.lock();
        match inner.accounts.get_mut(&record.username) {
            Some(account) => {
                account.record = record.clone();
                Ok(())
            }
            None => Err(StoreError::AccountNotFound(record.username.clone())),
        }
    }
}

impl InventoryStore for MemoryStore {
    fn inventory(&self, account_id: i64) -> StoreResult<Vec<InventoryEntry>> {
        self.check_online()?;
        let inner = self.inner.lock();
        let equipped: Vec<u64> = inner
            .equipped
            .get(&account_id)
            .map(|slots| slots.values().copied().collect())
            .unwrap_or_default();

        Ok(inner
            .inventories
            .get(&account_id)
            .map(|items| {
                items
                    .iter()
                    .filter(|e| !equipped.contains(&e.inventory_id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn equipped(&self, account_id: i64) -> StoreResult<BTreeMap<String, InventoryEntry>> {
        self.check_online()?;
        let inner = self.inner.lock();
        let mut result = BTreeMap::new();

        if let (Some(slots), Some(items)) = (
            inner.equipped.get(&account_id),
            inner.inventories.get(&account_id),
        ) {
            for (slot, inventory_id) in slots {
                if let Some(entry) = items.iter().find(|e| e.inventory_id == *inventory_id) {
                    result.insert(slot.clone(), entry.clone());
                }
            }
        }
        Ok(result)
    }

    fn combat_stats(&self, account_id: i64) -> StoreResult<CombatStats> {
        let equipped = self.equipped(account_id)?;
        let inner = self.inner.lock();
        let mut stats = CombatStats::default();

        for (slot, entry) in &equipped {
            let template = match inner.templates.get(&entry.item_template_id) {
                Some(t) => t,
                None => continue,
            };
            stats.defense += template.defense;

            if slot == "weapon" {
                stats.weapon_damage = template.damage;
                stats.attack_speed = if template.attack_speed > 0.0 {
                    template.attack_speed
                } else {
                    1.0
                };
                stats.attack_range = if template.attack_range > 0.0 {
                    template.attack_range
                } else {
                    WEAPON_DEFAULT_RANGE
                };
                stats.attack_type = template.attack_type;
            }
        }
        Ok(stats)
    }

    fn pickup(&self, account_id: i64, item: &WorldItem) -> StoreResult<()> {
        self.check_online()?;
        let mut inner = self.inner.lock();
        let template_id = *inner
            .world_items
            .get(&item.id)
            .ok_or(StoreError::ItemNotFound(item.id))?;
        let stackable = inner
            .templates
            .get(&template_id)
            .map(|t| t.stackable)
            .unwrap_or(false);

        if stackable {
            if let Some(existing) = inner.inventories.get_mut(&account_id).and_then(|items| {
                items
                    .iter_mut()
                    .find(|e| e.item_template_id == template_id && e.stackable)
            }) {
                existing.quantity += 1;
                return Ok(());
            }
        }

        let count = inner.inventories.get(&account_id).map(|i| i.len()).unwrap_or(0);
        if count >= INVENTORY_CAPACITY {
            return Err(StoreError::InventoryFull);
        }
        let (slot_x, slot_y) = inner
            .next_free_slot(account_id)
            .ok_or(StoreError::InventoryFull)?;

        inner.next_inventory_id += 1;
        let mut entry = inner.entry_for(template_id, item.id, inner.next_inventory_id);
        entry.slot_x = slot_x;
        entry.slot_y = slot_y;
        inner.inventories.entry(account_id).or_default().push(entry);
        Ok(())
    }

    fn move_item(
        &self,
        account_id: i64,
        inventory_id: u64,
        slot_x: i32,
        slot_y: i32,
    ) -> StoreResult<()> {
        self.check_online()?;
        if !(0..INVENTORY_COLUMNS).contains(&slot_x) || !(0..INVENTORY_ROWS).contains(&slot_y) {
            return Err(StoreError::SlotUnavailable(slot_x, slot_y));
        }

        let mut inner = self.inner.lock();
        let items = inner
            .inventories
            .get_mut(&account_id)
            .ok_or(StoreError::ItemNotFound(inventory_id))?;
        if items
            .iter()
            .any(|e| e.inventory_id != inventory_id && e.slot_x == slot_x && e.slot_y == slot_y)
        {
            return Err(StoreError::SlotUnavailable(slot_x, slot_y));
        }

        let entry = items
            .iter_mut()
            .find(|e| e.inventory_id == inventory_id)
            .ok_or(StoreError::ItemNotFound(inventory_id))?;
        entry.slot_x = slot_x;
        entry.slot_y = slot_y;
        Ok(())
    }

    fn drop_item(
        &self,
        account_id: i64,
        inventory_id: u64,
        x: f32,
        y: f32,
        now: u64,
    ) -> StoreResult<WorldItem> {
        self.check_online()?;
        let mut inner = self.inner.lock();
        let items = inner
            .inventories
            .get_mut(&account_id)
            .ok_or(StoreError::ItemNotFound(inventory_id))?;
        let index = items
            .iter()
            .position(|e| e.inventory_id == inventory_id)
            .ok_or(StoreError::ItemNotFound(inventory_id))?;
        let entry = items.remove(index);

        if let Some(slots) = inner.equipped.get_mut(&account_id) {
            slots.retain(|_, id| *id != inventory_id);
        }
        Ok(inner.world_item(entry.world_item_id, entry.item_template_id, x, y, now))
    }

    fn equip(&self, account_id: i64, inventory_id: u64, slot_type: &str) -> StoreResult<()> {
        self.check_online()?;
        let mut inner = self.inner.lock();
        let entry = inner
            .inventories
            .get(&account_id)
            .and_then(|items| items.iter().find(|e| e.inventory_id == inventory_id))
            .ok_or(StoreError::ItemNotFound(inventory_id))?;
        if entry.item_type != slot_type {
            return Err(StoreError::InvalidSlot(slot_type.to_string()));
        }

        let slots = inner.equipped.entry(account_id).or_default();
        slots.retain(|_, id| *id != inventory_id);
        slots.insert(slot_type.to_string(), inventory_id);
        Ok(())
    }

    fn unequip(&self, account_id: i64, slot_type: &str) -> StoreResult<()> {
        self.check_online()?;
        let mut inner = self.inner.lock();
        inner
            .equipped
            .get_mut(&account_id)
            .and_then(|slots| slots.remove(slot_type))
            .map(|_| ())
            .ok_or_else(|| StoreError::InvalidSlot(slot_type.to_string()))
    }

    fn take_all_for_death(&self, account_id: i64) -> StoreResult<Vec<WorldItem>> {
        self.check_online()?;
        let mut inner = self.inner.lock();
        inner.equipped.remove(&account_id);
        let entries = inner.inventories.remove(&account_id).unwrap_or_default();

        Ok(entries
            .iter()
            .map(|e| inner.world_item(e.world_item_id, e.item_template_id, 0.0, 0.0, 0))
            .collect())
    }
}

impl DropTable for MemoryStore {
    fn roll(
        &self,
        enemy_template_id: u32,
        x: f32,
        y: f32,
        now: u64,
    ) -> StoreResult<Option<WorldItem>> {
        self.check_online()?;
        let mut inner = self.inner.lock();
        let drops = match inner.drop_tables.get(&enemy_template_id) {
            Some(drops) => drops.clone(),
            None => return Ok(None),
        };

        let mut rng = rand::thread_rng();
        for (template_id, chance) in drops {
            if rng.gen::<f32>() < chance {
                let id = inner.mint(template_id);
                return Ok(Some(inner.world_item(id, template_id, x, y, now)));
            }
        }
        Ok(None)
    }
}

/// The storage seams handed to the network layer and the job worker
#[derive(Clone)]
pub struct Stores {
    pub players: Arc<dyn PlayerStore>,
    pub inventory: Arc<dyn InventoryStore>,
    pub drops: Arc<dyn DropTable>,
}

impl Stores {
    /// Backs all three seams with one in-memory store
    pub fn memory(store: Arc<MemoryStore>) -> Self {
        Self {
            players: store.clone(),
            inventory: store.clone(),
            drops: store,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_account() -> (MemoryStore, i64) {
        let store = MemoryStore::with_defaults();
        let record = store.create("alice", "hunter2").unwrap();
        (store, record.account_id)
    }

    #[test]
    fn test_create_and_validate_account() {
        let (store, account_id) = store_with_account();

        assert!(account_id > 0);
        assert!(store.account_exists("alice").unwrap());
        assert!(!store.account_exists("bob").unwrap());
        assert!(store.validate_credentials("alice", "hunter2").unwrap());
        assert!(!store.validate_credentials("alice", "wrong").unwrap());
        assert!(!store.validate_credentials("bob", "hunter2").unwrap());

        assert_eq!(
            store.create("alice", "again"),
            Err(StoreError::AccountExists("alice".to_string()))
        );
    }

    #[test]
    fn test_save_and_load_round_trip_progress() {
        let (store, _) = store_with_account();
        let mut record = store.load("alice").unwrap().unwrap();
        record.level = 4;
        record.x = 512.0;

        store.save(&record).unwrap();
        assert_eq!(store.load("alice").unwrap(), Some(record));
        assert_eq!(store.load("nobody").unwrap(), None);
    }

    #[test]
    fn test_pickup_places_into_first_free_slot() {
        let (store, account) = store_with_account();
        let first = store.mint_world_item(1, 0.0, 0.0, 0);
        let second = store.mint_world_item(3, 0.0, 0.0, 0);

        store.pickup(account, &first).unwrap();
        store.pickup(account, &second).unwrap();

        let items = store.inventory(account).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!((items[0].slot_x, items[0].slot_y), (0, 0));
        assert_eq!((items[1].slot_x, items[1].slot_y), (1, 0));
        assert_eq!(items[0].name, "Rusty Dagger");
    }

    #[test]
    fn test_pickup_rejects_unknown_item_and_full_inventory() {
        let (store, account) = store_with_account();
        let ghost = WorldItem {
            id: 999,
            item_template_id: 1,
            name: String::new(),
            item_type: String::new(),
            x: 0.0,
            y: 0.0,
            dropped_at: 0,
            claimed_by: None,
            has_mods: false,
        };
        assert_eq!(store.pickup(account, &ghost), Err(StoreError::ItemNotFound(999)));

        for _ in 0..INVENTORY_CAPACITY {
            let item = store.mint_world_item(3, 0.0, 0.0, 0);
            store.pickup(account, &item).unwrap();
        }
        let overflow = store.mint_world_item(3, 0.0, 0.0, 0);
        assert_eq!(store.pickup(account, &overflow), Err(StoreError::InventoryFull));
    }

    #[test]
    fn test_equip_updates_combat_stats() {
        let (store, account) = store_with_account();
        let axe = store.mint_world_item(5, 0.0, 0.0, 0);
        let armor = store.mint_world_item(3, 0.0, 0.0, 0);
        store.pickup(account, &axe).unwrap();
        store.pickup(account, &armor).unwrap();

        let items = store.inventory(account).unwrap();
        let axe_id = items[0].inventory_id;
        let armor_id = items[1].inventory_id;

        assert_eq!(
            store.equip(account, axe_id, "armor"),
            Err(StoreError::InvalidSlot("armor".to_string()))
        );
        store.equip(account, axe_id, "weapon").unwrap();
        store.equip(account, armor_id, "armor").unwrap();

        let stats = store.combat_stats(account).unwrap();
        assert_eq!(stats.weapon_damage, 9);
        assert_eq!(stats.defense, 3);
        assert_eq!(stats.attack_type, AttackType::Melee);
        assert_eq!(stats.attack_range, 70.0);

        assert!(store.inventory(account).unwrap().is_empty());
        assert_eq!(store.equipped(account).unwrap().len(), 2);

        store.unequip(account, "weapon").unwrap();
        let stats = store.combat_stats(account).unwrap();
        assert_eq!(stats.weapon_damage, 0);
        assert_eq!(stats.attack_range, 50.0);
        assert!(store.unequip(account, "weapon").is_err());
    }

    #[test]
    fn test_ranged_weapon_without_range_uses_default() {
        let (store, account) = store_with_account();
        let bow = store.mint_world_item(2, 0.0, 0.0, 0);
        store.pickup(account, &bow).unwrap();
        let bow_id = store.inventory(account).unwrap()[0].inventory_id;
        store.equip(account, bow_id, "weapon").unwrap();

        let stats = store.combat_stats(account).unwrap();
        assert_eq!(stats.attack_range, WEAPON_DEFAULT_RANGE);
        assert_eq!(stats.attack_type, AttackType::Ranged);
    }

    #[test]
    fn test_move_item_respects_grid_and_occupancy() {
        let (store, account) = store_with_account();
        for template in [1, 3] {
            let item = store.mint_world_item(template, 0.0, 0.0, 0);
            store.pickup(account, &item).unwrap();
        }
        let items = store.inventory(account).unwrap();

        assert_eq!(
            store.move_item(account, items[0].inventory_id, 1, 0),
            Err(StoreError::SlotUnavailable(1, 0))
        );
        assert!(store.move_item(account, items[0].inventory_id, 6, 0).is_err());
        store.move_item(account, items[0].inventory_id, 5, 11).unwrap();

        let moved = store.inventory(account).unwrap();
        assert_eq!((moved[0].slot_x, moved[0].slot_y), (5, 11));
    }

    #[test]
    fn test_drop_and_death_strip_items() {
        let (store, account) = store_with_account();
        for template in [1, 3, 4] {
            let item = store.mint_world_item(template, 0.0, 0.0, 0);
            store.pickup(account, &item).unwrap();
        }
        let items = store.inventory(account).unwrap();
        store.equip(account, items[2].inventory_id, "helmet").unwrap();

        let dropped = store
            .drop_item(account, items[0].inventory_id, 10.0, 20.0, 500)
            .unwrap();
        assert_eq!((dropped.x, dropped.y, dropped.dropped_at), (10.0, 20.0, 500));
        assert_eq!(dropped.id, items[0].world_item_id);

        let lost = store.take_all_for_death(account).unwrap();
        assert_eq!(lost.len(), 2);
        assert!(store.inventory(account).unwrap().is_empty());
        assert!(store.equipped(account).unwrap().is_empty());
    }

    #[test]
    fn test_roll_respects_drop_table() {
        let store = MemoryStore::with_defaults();
        store.set_drops(7, vec![(5, 1.0)]);
        store.set_drops(8, vec![(5, 0.0)]);

        let item = store.roll(7, 3.0, 4.0, 100).unwrap().unwrap();
        assert_eq!(item.item_template_id, 5);
        assert_eq!(item.name, "War Axe");
        assert_eq!((item.x, item.y), (3.0, 4.0));

        assert!(store.roll(8, 0.0, 0.0, 0).unwrap().is_none());
        assert!(store.roll(99, 0.0, 0.0, 0).unwrap().is_none());
    }

    #[test]
    fn test_offline_store_fails_every_call() {
        let (store, account) = store_with_account();
        store.set_offline(true);

        assert!(store.account_exists("alice").is_err());
        assert!(store.inventory(account).is_err());
        assert!(store.roll(1, 0.0, 0.0, 0).is_err());

        store.set_offline(false);
        assert!(store.account_exists("alice").unwrap());
    }
}
