//! Map generation: a room and corridor dungeon carved from a seeded stream.

use crate::rng::SeededRng;
use protocol::Position;
use serde::{Deserialize, Serialize};

/// One map tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tile {
    pub walkable: bool,
}

/// The playing field. Tiles are stored row major, `tiles[y][x]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameMap {
    pub width: u32,
    pub height: u32,
    pub tiles: Vec<Vec<Tile>>,
    /// Walkable tiles player units start on.
    pub spawn_points: Vec<Position>,
    /// Walkable tiles monsters start on, far from the player spawns.
    pub monster_spawns: Vec<Position>,
}

impl GameMap {
    pub fn in_bounds(&self, p: Position) -> bool {
        p.x >= 0 && p.y >= 0 && (p.x as u32) < self.width && (p.y as u32) < self.height
    }

    pub fn is_walkable(&self, p: Position) -> bool {
        self.in_bounds(p) && self.tiles[p.y as usize][p.x as usize].walkable
    }

    /// Checks for a clear line between the two tiles, endpoints excluded.
    /// Walls block; other units do not. Bresenham over the tile grid.
    pub fn line_of_sight(&self, from: Position, to: Position) -> bool {
        let mut x = from.x;
        let mut y = from.y;
        let dx = (to.x - from.x).abs();
        let dy = -(to.y - from.y).abs();
        let sx = if from.x < to.x { 1 } else { -1 };
        let sy = if from.y < to.y { 1 } else { -1 };
        let mut err = dx + dy;

        loop {
            if x == to.x && y == to.y {
                return true;
            }
            let on_endpoint = x == from.x && y == from.y;
            if !on_endpoint && !self.is_walkable(Position::new(x, y)) {
                return false;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x += sx;
            }
            if e2 <= dx {
                err += dx;
                y += sy;
            }
        }
    }
}

/// Parameters of map generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapOptions {
    pub seed: u64,
    pub width: u32,
    pub height: u32,
    pub room_attempts: u32,
}

impl Default for MapOptions {
    fn default() -> Self {
        Self { seed: 0, width: 24, height: 18, room_attempts: 8 }
    }
}

impl MapOptions {
    pub fn with_seed(seed: u64) -> Self {
        Self { seed, ..Self::default() }
    }
}

#[derive(Debug, Clone, Copy)]
struct Room {
    x: i32,
    y: i32,
    w: i32,
    h: i32,
}

impl Room {
    fn center(&self) -> Position {
        Position::new(self.x + self.w / 2, self.y + self.h / 2)
    }

    fn intersects(&self, other: &Room) -> bool {
        self.x <= other.x + other.w
            && other.x <= self.x + self.w
            && self.y <= other.y + other.h
            && other.y <= self.y + self.h
    }
}

/// Generates a map. Identical options yield an identical map.
pub fn generate_map(opts: &MapOptions) -> GameMap {
    let mut rng = SeededRng::from_seed(opts.seed);
    let width = opts.width.max(12);
    let height = opts.height.max(10);

    let mut tiles =
        vec![vec![Tile { walkable: false }; width as usize]; height as usize];
    let mut rooms: Vec<Room> = Vec::new();

    for _ in 0..opts.room_attempts {
        let w = rng.range(3, 6);
        let h = rng.range(3, 5);
        let x = rng.range(1, width as i32 - w - 2);
        let y = rng.range(1, height as i32 - h - 2);
        let candidate = Room { x, y, w, h };
        if rooms.iter().any(|r| r.intersects(&candidate)) {
            continue;
        }
        carve_room(&mut tiles, &candidate);
        if let Some(previous) = rooms.last() {
            carve_corridor(&mut tiles, previous.center(), candidate.center());
        }
        rooms.push(candidate);
    }

    // Degenerate seeds may reject everything. Fall back to one big hall.
    if rooms.len() < 2 {
        let hall = Room {
            x: 1,
            y: 1,
            w: width as i32 - 3,
            h: height as i32 - 3,
        };
        carve_room(&mut tiles, &hall);
        rooms = vec![hall];
    }

    let first = rooms[0];
    let last = rooms[rooms.len() - 1];
    let spawn_points = room_tiles(&first);
    let monster_spawns = if rooms.len() > 1 {
        room_tiles(&last)
    } else {
        // Single hall: monsters in the opposite corner half.
        room_tiles(&last)
            .into_iter()
            .rev()
            .take((last.w * last.h / 2).max(1) as usize)
            .collect()
    };

    GameMap { width, height, tiles, spawn_points, monster_spawns }
}

fn carve_room(tiles: &mut [Vec<Tile>], room: &Room) {
    for y in room.y..room.y + room.h {
        for x in room.x..room.x + room.w {
            tiles[y as usize][x as usize].walkable = true;
        }
    }
}

/// An L shaped corridor: horizontal leg first, then vertical.
fn carve_corridor(tiles: &mut [Vec<Tile>], from: Position, to: Position) {
    let mut x = from.x;
    while x != to.x {
        tiles[from.y as usize][x as usize].walkable = true;
        x += if x < to.x { 1 } else { -1 };
    }
    let mut y = from.y;
    while y != to.y {
        tiles[y as usize][to.x as usize].walkable = true;
        y += if y < to.y { 1 } else { -1 };
    }
    tiles[to.y as usize][to.x as usize].walkable = true;
}

fn room_tiles(room: &Room) -> Vec<Position> {
    let mut out = Vec::with_capacity((room.w * room.h) as usize);
    for y in room.y..room.y + room.h {
        for x in room.x..room.x + room.w {
            out.push(Position::new(x, y));
        }
    }
    out
}
