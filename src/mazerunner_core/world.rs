//! Maze grid, tile classification, and cardinal line-of-sight vision.
//!
//! Vision is a pure function of `(grid, x, y, range)`: no suspension points,
//! no I/O, deterministic. See spec §4.1.

use std::collections::HashMap;

use crate::mazerunner_core::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TileType {
    Empty,
    Wall,
    Goal,
}

/// Result of classifying a coordinate against the grid. Distinct from
/// [`TileType`] because "out of bounds" is not a tile that exists on the
/// grid — it's a classification of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    OutOfBounds,
    Tile(TileType),
}

impl Classification {
    pub fn can_enter(&self) -> bool {
        matches!(
            self,
            Classification::Tile(TileType::Empty) | Classification::Tile(TileType::Goal)
        )
    }

    pub fn is_goal(&self) -> bool {
        matches!(self, Classification::Tile(TileType::Goal))
    }

    pub fn tile(&self) -> Option<TileType> {
        match self {
            Classification::Tile(t) => Some(*t),
            Classification::OutOfBounds => None,
        }
    }
}

/// Immutable maze definition. Created out of band; read-only reference data
/// for the lifetime of every experiment that references it (spec §3
/// "Ownership & Lifecycle").
#[derive(Debug, Clone)]
pub struct Maze {
    pub id: i64,
    pub width: i32,
    pub height: i32,
    grid: Vec<Vec<TileType>>,
    pub start_x: i32,
    pub start_y: i32,
}

impl Maze {
    /// Construct a maze from a validated grid. Enforces the invariants from
    /// spec §3: positive dimensions, exactly one GOAL tile, and an in-bounds
    /// EMPTY start tile.
    pub fn new(
        id: i64,
        grid: Vec<Vec<TileType>>,
        start_x: i32,
        start_y: i32,
    ) -> Result<Self, Error> {
        let height = grid.len() as i32;
        if height == 0 {
            return Err(Error::internal("maze must have positive height"));
        }
        let width = grid[0].len() as i32;
        if width == 0 || grid.iter().any(|row| row.len() as i32 != width) {
            return Err(Error::internal(
                "maze rows must be non-empty and rectangular",
            ));
        }

        let goal_count = grid
            .iter()
            .flat_map(|row| row.iter())
            .filter(|t| **t == TileType::Goal)
            .count();
        if goal_count != 1 {
            return Err(Error::internal(format!(
                "maze must have exactly one GOAL tile, found {goal_count}"
            )));
        }

        if start_x < 0 || start_x >= width || start_y < 0 || start_y >= height {
            return Err(Error::internal("start position out of bounds"));
        }
        if grid[start_y as usize][start_x as usize] != TileType::Empty {
            return Err(Error::internal("start position must be an EMPTY tile"));
        }

        Ok(Self {
            id,
            width,
            height,
            grid,
            start_x,
            start_y,
        })
    }

    /// Parse an ASCII grid (`.` empty, `#` wall, `G` goal) into a [`Maze`].
    /// Not part of the original source (there is none for this project —
    /// see SPEC_FULL.md §5); this is the minimal construction surface a
    /// maze-seeding tool needs.
    pub fn from_ascii(id: i64, rows: &[&str], start_x: i32, start_y: i32) -> Result<Self, Error> {
        let grid = rows
            .iter()
            .map(|row| {
                row.chars()
                    .map(|c| match c {
                        '.' => Ok(TileType::Empty),
                        '#' => Ok(TileType::Wall),
                        'G' => Ok(TileType::Goal),
                        other => Err(Error::internal(format!("unknown maze tile char '{other}'"))),
                    })
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(id, grid, start_x, start_y)
    }

    pub fn grid(&self) -> &[Vec<TileType>] {
        &self.grid
    }

    pub fn classify_tile(&self, x: i32, y: i32) -> Classification {
        if x < 0 || x >= self.width || y < 0 || y >= self.height {
            return Classification::OutOfBounds;
        }
        Classification::Tile(self.grid[y as usize][x as usize])
    }

    pub fn can_enter(&self, x: i32, y: i32) -> bool {
        self.classify_tile(x, y).can_enter()
    }

    /// Cardinal line-of-sight vision from `(x, y)` out to `range` tiles in
    /// each of the four directions. Walls and the goal terminate a ray
    /// (visible themselves, but blocking anything beyond). Diagonals are
    /// never included. See spec §4.1 for the full algorithm statement.
    pub fn vision(&self, x: i32, y: i32, range: i32) -> HashMap<(i32, i32), TileType> {
        let mut seen = HashMap::new();

        if let Classification::Tile(here) = self.classify_tile(x, y) {
            seen.insert((x, y), here);
        }

        const DIRECTIONS: [(i32, i32); 4] = [(0, -1), (0, 1), (1, 0), (-1, 0)];
        for (dx, dy) in DIRECTIONS {
            for distance in 1..=range {
                let (tx, ty) = (x + dx * distance, y + dy * distance);
                match self.classify_tile(tx, ty) {
                    Classification::OutOfBounds => break,
                    Classification::Tile(tile) => {
                        seen.insert((tx, ty), tile);
                        if tile == TileType::Wall || tile == TileType::Goal {
                            break;
                        }
                    }
                }
            }
        }

        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_maze() -> Maze {
        // 5x3, walls at (2,0) and (2,2), goal at (4,1).
        Maze::from_ascii(
            1,
            &["#.#..", ".....", "#.#.."],
            0,
            1,
        )
        .unwrap()
    }

    #[test]
    fn classify_tile_out_of_bounds() {
        let maze = sample_maze();
        assert_eq!(maze.classify_tile(-1, 0), Classification::OutOfBounds);
        assert_eq!(maze.classify_tile(5, 0), Classification::OutOfBounds);
        assert_eq!(maze.classify_tile(0, 3), Classification::OutOfBounds);
    }

    #[test]
    fn classify_tile_in_bounds() {
        let maze = sample_maze();
        assert_eq!(
            maze.classify_tile(2, 0),
            Classification::Tile(TileType::Wall)
        );
        assert_eq!(
            maze.classify_tile(0, 1),
            Classification::Tile(TileType::Empty)
        );
    }

    #[test]
    fn rejects_more_than_one_goal() {
        let err = Maze::from_ascii(1, &["G.G"], 1, 0).unwrap_err();
        assert!(err.to_string().contains("exactly one GOAL"));
    }

    #[test]
    fn rejects_start_on_wall() {
        let err = Maze::from_ascii(1, &[".#."], 1, 0).unwrap_err();
        assert!(err.to_string().contains("EMPTY"));
    }

    #[test]
    fn vision_stops_at_wall_and_includes_it() {
        let maze = sample_maze();
        // From (0,0): east ray hits wall at (2,0) and stops; nothing at (3,0)/(4,0).
        let seen = maze.vision(0, 0, 5);
        assert_eq!(seen.get(&(2, 0)), Some(&TileType::Wall));
        assert!(!seen.contains_key(&(3, 0)));
        assert!(!seen.contains_key(&(4, 0)));
    }

    #[test]
    fn vision_stops_at_goal_and_includes_it() {
        let maze = sample_maze();
        let seen = maze.vision(0, 1, 5);
        assert_eq!(seen.get(&(4, 1)), Some(&TileType::Goal));
    }

    #[test]
    fn vision_never_includes_diagonals() {
        let maze = sample_maze();
        let seen = maze.vision(1, 1, 1);
        // (0,0), (2,0), (0,2), (2,2) are diagonal to (1,1) and must be absent.
        assert!(!seen.contains_key(&(0, 0)));
        assert!(!seen.contains_key(&(2, 0)));
        assert!(!seen.contains_key(&(0, 2)));
        assert!(!seen.contains_key(&(2, 2)));
    }

    #[test]
    fn vision_always_includes_own_tile() {
        let maze = sample_maze();
        let seen = maze.vision(0, 1, 0);
        assert_eq!(seen.len(), 1);
        assert_eq!(seen.get(&(0, 1)), Some(&TileType::Empty));
    }

    #[test]
    fn vision_is_deterministic() {
        let maze = sample_maze();
        let first = maze.vision(1, 1, 3);
        let second = maze.vision(1, 1, 3);
        assert_eq!(first, second);
    }

    #[test]
    fn visible_path_has_no_wall_or_goal_strictly_between() {
        let maze = sample_maze();
        let seen = maze.vision(0, 1, 5);
        // every visible tile along the east ray: the only wall/goal in the
        // set is the terminal tile (4,1)=Goal; (1,1),(2,1),(3,1) are Empty.
        for x in 1..4 {
            assert_eq!(seen.get(&(x, 1)), Some(&TileType::Empty));
        }
    }
}
