//! Static walkability and zone grid for one map
//!
//! World coordinates are pixels; a tile covers `TILE_SIZE` pixels on each side.
//! Anything outside the grid counts as blocked.

use raiders_shared::TILE_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileType {
    Blocked,
    SafeZone,
    Pve,
    Elite(u8),
    Spawn(u8),
}

impl TileType {
    pub fn is_player_walkable(self) -> bool {
        !matches!(self, TileType::Blocked)
    }

    pub fn is_enemy_walkable(self) -> bool {
        !matches!(self, TileType::Blocked | TileType::SafeZone)
    }

    pub fn is_safe_zone(self) -> bool {
        matches!(self, TileType::SafeZone)
    }

    pub fn spawn_tier(self) -> Option<u8> {
        match self {
            TileType::Spawn(tier) => Some(tier),
            _ => None,
        }
    }

    /// Three letter code used in map files (`BLK`, `SAF`, `PVE`, `EL1`, `PV1`, ...)
    pub fn code(self) -> String {
        match self {
            TileType::Blocked => "BLK".to_string(),
            TileType::SafeZone => "SAF".to_string(),
            TileType::Pve => "PVE".to_string(),
            TileType::Elite(n) => format!("EL{}", n),
            TileType::Spawn(n) => format!("PV{}", n),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Tilemap {
    width: usize,
    height: usize,
    tiles: Vec<TileType>,
    safe_centroid: (f32, f32),
    spawn_zones: [Vec<(f32, f32)>; 4],
    open_ground: Vec<(f32, f32)>,
}

impl Tilemap {
    /// Builds a map from rows of tiles; `rows[y][x]`. Short rows are padded as blocked.
    pub fn from_rows(rows: Vec<Vec<TileType>>) -> Self {
        let height = rows.len();
        let width = rows.iter().map(|r| r.len()).max().unwrap_or(0);
        let mut tiles = vec![TileType::Blocked; width * height];

        for (y, row) in rows.into_iter().enumerate() {
            for (x, tile) in row.into_iter().enumerate() {
                tiles[y * width + x] = tile;
            }
        }

        Self::from_tiles(width, height, tiles)
    }

    fn from_tiles(width: usize, height: usize, tiles: Vec<TileType>) -> Self {
        let mut safe_sum = (0.0f64, 0.0f64);
        let mut safe_count = 0usize;
        let mut spawn_zones: [Vec<(f32, f32)>; 4] = Default::default();
        let mut open_ground = Vec::new();

        for y in 0..height {
            for x in 0..width {
                let tile = tiles[y * width + x];
                let center = tile_center(x, y);

                if tile.is_safe_zone() {
                    safe_sum.0 += center.0 as f64;
                    safe_sum.1 += center.1 as f64;
                    safe_count += 1;
                }
                if let Some(tier) = tile.spawn_tier() {
                    if (1..=4).contains(&tier) {
                        spawn_zones[(tier - 1) as usize].push(center);
                    }
                }
                if tile.is_enemy_walkable() {
                    open_ground.push(center);
                }
            }
        }

        let safe_centroid = if safe_count > 0 {
            (
                (safe_sum.0 / safe_count as f64) as f32,
                (safe_sum.1 / safe_count as f64) as f32,
            )
        } else {
            (
                width as f32 * TILE_SIZE / 2.0,
                height as f32 * TILE_SIZE / 2.0,
            )
        };

        Self {
            width,
            height,
            tiles,
            safe_centroid,
            spawn_zones,
            open_ground,
        }
    }

    /// Square map with a safe zone in the middle, a blocked moat ring crossed by
    /// four bridges, and hunting grounds whose tier rises towards the edges.
    pub fn generate_default(size: usize) -> Self {
        let size = size.max(16);
        let center = (size / 2) as i64;
        let safe_half = ((size / 20).max(2)) as i64;
        let moat_outer = safe_half + ((size / 25).max(1)) as i64;
        let bridge_half = ((size / 80).max(1)) as i64;
        let max_reach = center.max(1);

        let mut tiles = vec![TileType::Pve; size * size];

        for y in 0..size {
            for x in 0..size {
                let dx = (x as i64 - center).abs();
                let dy = (y as i64 - center).abs();
                let reach = dx.max(dy);

                let tile = if x as i64 >= center - safe_half
                    && (x as i64) < center + safe_half
                    && y as i64 >= center - safe_half
                    && (y as i64) < center + safe_half
                {
                    TileType::SafeZone
                } else if reach < moat_outer {
                    let on_bridge = dx < bridge_half || dy < bridge_half;
                    if on_bridge {
                        TileType::Pve
                    } else {
                        TileType::Blocked
                    }
                } else {
                    let span = (max_reach - moat_outer).max(1);
                    let tier = 1 + ((reach - moat_outer) * 4 / span).min(3);
                    TileType::Spawn(tier as u8)
                };

                tiles[y * size + x] = tile;
            }
        }

        Self::from_tiles(size, size, tiles)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn world_width(&self) -> f32 {
        self.width as f32 * TILE_SIZE
    }

    pub fn world_height(&self) -> f32 {
        self.height as f32 * TILE_SIZE
    }

    pub fn tile_at(&self, x: f32, y: f32) -> TileType {
        if !x.is_finite() || !y.is_finite() || x < 0.0 || y < 0.0 {
            return TileType::Blocked;
        }

        let gx = (x / TILE_SIZE) as usize;
        let gy = (y / TILE_SIZE) as usize;
        if gx >= self.width || gy >= self.height {
            return TileType::Blocked;
        }

        self.tiles[gy * self.width + gx]
    }

    pub fn is_walkable(&self, x: f32, y: f32) -> bool {
        self.tile_at(x, y).is_player_walkable()
    }

    pub fn is_enemy_walkable(&self, x: f32, y: f32) -> bool {
        self.tile_at(x, y).is_enemy_walkable()
    }

    pub fn is_in_safe_zone(&self, x: f32, y: f32) -> bool {
        self.tile_at(x, y).is_safe_zone()
    }

    pub fn safe_zone_centroid(&self) -> (f32, f32) {
        self.safe_centroid
    }

    /// Centres of the tiles tagged for the given tier (1 to 4)
    pub fn spawn_zones_for_tier(&self, tier: u8) -> &[(f32, f32)] {
        match tier {
            1..=4 => &self.spawn_zones[(tier - 1) as usize],
            _ => &[],
        }
    }

    /// Centres of every tile an enemy may stand on
    pub fn open_ground(&self) -> &[(f32, f32)] {
        &self.open_ground
    }
}

fn tile_center(x: usize, y: usize) -> (f32, f32) {
    (
        x as f32 * TILE_SIZE + TILE_SIZE / 2.0,
        y as f32 * TILE_SIZE + TILE_SIZE / 2.0,
    )
}
