//! Wire messages for the TCP session channel and the UDP input channel

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::signing;

/// Messages a client sends over its TCP session, one JSON object per line
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    PlayerJoin {
        username: String,
        #[serde(default)]
        password: Option<String>,
    },
    PlayerInput {
        dir_x: f32,
        dir_y: f32,
    },
    PlayerAction {
        action: String,
    },
    PickupItem {
        world_item_id: u64,
    },
    GetInventory,
    MoveInventoryItem {
        inventory_id: u64,
        slot_x: i32,
        slot_y: i32,
    },
    DropInventoryItem {
        inventory_id: u64,
    },
    EquipItem {
        inventory_id: u64,
        slot_type: String,
    },
    UnequipItem {
        #[serde(default)]
        inventory_id: Option<u64>,
        slot_type: String,
    },
    Heartbeat,
    Ping {
        #[serde(default)]
        client_time_ms: Option<Value>,
    },
}

/// Messages the server pushes down a TCP session
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    PlayerJoined {
        peer_id: u32,
        username: String,
        db_id: i64,
        level: u32,
        xp: u32,
        udp_token: String,
        map_id: String,
    },
    Inventory {
        items: Vec<InventoryEntry>,
        equipped: BTreeMap<String, InventoryEntry>,
    },
    AuthError {
        message: String,
    },
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_time_ms: Option<Value>,
        server_time_ms: u64,
    },
    DamageEvent {
        target_id: u64,
        target_type: TargetKind,
        damage: i32,
        x: f32,
        y: f32,
    },
    MapChanged {
        map_id: String,
        x: f32,
        y: f32,
    },
    GameState(WorldSnapshot),
}

impl ServerMessage {
    /// Encodes the message as a single JSON line without the trailing newline
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Enemy,
    Player,
}

/// Wire label of an enemy's telegraph attack phase
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttackPhase {
    Idle,
    Telegraphing,
    Attacking,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct InventoryEntry {
    pub inventory_id: u64,
    pub world_item_id: u64,
    pub item_template_id: u32,
    pub name: String,
    #[serde(rename = "type")]
    pub item_type: String,
    pub damage: i32,
    pub defense: i32,
    pub rarity: String,
    pub stackable: bool,
    pub quantity: u32,
    pub slot_x: i32,
    pub slot_y: i32,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct WorldSnapshot {
    pub map_id: String,
    pub world_time: u64,
    pub players: Vec<PlayerSnapshot>,
    pub enemies: Vec<EnemySnapshot>,
    #[serde(rename = "bullets")]
    pub projectiles: Vec<ProjectileSnapshot>,
    pub melee_attacks: Vec<MeleeSnapshot>,
    pub world_items: Vec<WorldItemSnapshot>,
    pub portals: Vec<PortalSnapshot>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PlayerSnapshot {
    pub peer_id: u32,
    pub username: String,
    pub x: f32,
    pub y: f32,
    pub health: i32,
    pub max_health: i32,
    pub xp: u32,
    pub level: u32,
    pub alive: bool,
    pub attack_range: f32,
    pub dir_x: f32,
    pub dir_y: f32,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct EnemySnapshot {
    pub id: u64,
    pub template_id: u32,
    pub x: f32,
    pub y: f32,
    pub health: i32,
    pub max_health: i32,
    #[serde(rename = "type")]
    pub name: String,
    pub level: u32,
    pub alive: bool,
    pub attack_state: AttackPhase,
    pub telegraph_target_x: f32,
    pub telegraph_target_y: f32,
    pub telegraph_start_time: u64,
    pub telegraph_duration_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ProjectileSnapshot {
    pub id: u64,
    pub shooter_id: u32,
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MeleeSnapshot {
    pub id: u64,
    pub player_id: u32,
    pub x: f32,
    pub y: f32,
    pub radius: f32,
    pub start_time: u64,
    pub duration_ms: u64,
    pub direction_degrees: f32,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct WorldItemSnapshot {
    pub id: u64,
    pub item_template_id: u32,
    pub name: String,
    #[serde(rename = "type")]
    pub item_type: String,
    pub x: f32,
    pub y: f32,
    pub claimed_by: Option<i64>,
    pub has_mods: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PortalSnapshot {
    pub x: f32,
    pub y: f32,
    pub target_map_id: String,
}

/// Datagrams accepted on the UDP input socket
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UdpMessage {
    RegisterUdp {
        peer_id: u32,
        token: String,
        seq: u64,
        hmac: String,
    },
    PlayerInput {
        peer_id: u32,
        token: String,
        seq: u64,
        hmac: String,
        dir_x: f32,
        dir_y: f32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        dx_i: Option<i32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        dy_i: Option<i32>,
    },
}

impl UdpMessage {
    pub const REGISTER: &'static str = "register_udp";
    pub const INPUT: &'static str = "player_input";

    /// Builds a signed registration datagram
    pub fn register(peer_id: u32, token: &str, seq: u64) -> Self {
        let payload = signing::payload(Self::REGISTER, peer_id, seq, None);
        UdpMessage::RegisterUdp {
            peer_id,
            token: token.to_string(),
            seq,
            hmac: signing::sign(token, &payload),
        }
    }

    /// Builds a signed movement datagram carrying quantized components in the signature
    pub fn input(peer_id: u32, token: &str, seq: u64, dir_x: f32, dir_y: f32) -> Self {
        let quantized = (signing::quantize(dir_x), signing::quantize(dir_y));
        let payload = signing::payload(Self::INPUT, peer_id, seq, Some(quantized));
        UdpMessage::PlayerInput {
            peer_id,
            token: token.to_string(),
            seq,
            hmac: signing::sign(token, &payload),
            dir_x,
            dir_y,
            dx_i: Some(quantized.0),
            dy_i: Some(quantized.1),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            UdpMessage::RegisterUdp { .. } => Self::REGISTER,
            UdpMessage::PlayerInput { .. } => Self::INPUT,
        }
    }

    pub fn peer_id(&self) -> u32 {
        match self {
            UdpMessage::RegisterUdp { peer_id, .. } | UdpMessage::PlayerInput { peer_id, .. } => {
                *peer_id
            }
        }
    }

    pub fn token(&self) -> &str {
        match self {
            UdpMessage::RegisterUdp { token, .. } | UdpMessage::PlayerInput { token, .. } => token,
        }
    }

    pub fn seq(&self) -> u64 {
        match self {
            UdpMessage::RegisterUdp { seq, .. } | UdpMessage::PlayerInput { seq, .. } => *seq,
        }
    }

    pub fn hmac(&self) -> &str {
        match self {
            UdpMessage::RegisterUdp { hmac, .. } | UdpMessage::PlayerInput { hmac, .. } => hmac,
        }
    }

    /// The exact string the HMAC was computed over
    pub fn signing_payload(&self) -> String {
        let quantized = match self {
            UdpMessage::PlayerInput {
                dx_i: Some(dx),
                dy_i: Some(dy),
                ..
            } => Some((*dx, *dy)),
            _ => None,
        };
        signing::payload(self.kind(), self.peer_id(), self.seq(), quantized)
    }
}
