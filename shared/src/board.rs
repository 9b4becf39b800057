//! Per-player tile board.
//!
//! A board owns every tile dealt to one player. Each tile is either unused
//! (waiting in the player's hand, in draw order) or used (placed on the grid).
//! Placed tiles are indexed both by id and by coordinate so that adjacency
//! checks during word and group scans are constant time.

use crate::{BoardConfig, Tile, TileId, TilePosition};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BoardError {
    #[error("tile {0} is already on the board")]
    DuplicateTile(TileId),
    #[error("tile {0} is not on the board")]
    UnknownTile(TileId),
    #[error("tile {id} is '{expected}', not '{actual}'")]
    LetterMismatch {
        id: TileId,
        expected: char,
        actual: char,
    },
    #[error("tile {0} is moved more than once")]
    RepeatedTile(TileId),
    #[error("tile {id} cannot be placed outside the board at ({x}, {y})")]
    OutOfBounds { id: TileId, x: i32, y: i32 },
    #[error("more than one tile would be at ({x}, {y})")]
    Collision { x: i32, y: i32 },
}

#[derive(Debug, Clone)]
pub struct Board {
    config: BoardConfig,
    unused: HashMap<TileId, Tile>,
    unused_order: Vec<TileId>,
    used: HashMap<TileId, TilePosition>,
    used_locs: HashMap<i32, HashMap<i32, Tile>>,
}

impl Board {
    pub fn new(config: BoardConfig, tiles: Vec<Tile>) -> Result<Self, BoardError> {
        let mut board = Self {
            config,
            unused: HashMap::with_capacity(tiles.len()),
            unused_order: Vec::with_capacity(tiles.len()),
            used: HashMap::new(),
            used_locs: HashMap::new(),
        };
        for tile in tiles {
            board.add_tile(tile)?;
        }
        Ok(board)
    }

    pub fn config(&self) -> BoardConfig {
        self.config
    }

    /// Appends a tile to the end of the unused pool.
    pub fn add_tile(&mut self, tile: Tile) -> Result<(), BoardError> {
        if self.owned_tile(tile.id).is_some() {
            return Err(BoardError::DuplicateTile(tile.id));
        }
        self.unused.insert(tile.id, tile);
        self.unused_order.push(tile.id);
        Ok(())
    }

    /// Removes a tile from whichever pool holds it.
    pub fn remove_tile(&mut self, tile: Tile) -> Result<(), BoardError> {
        let owned = self
            .owned_tile(tile.id)
            .ok_or(BoardError::UnknownTile(tile.id))?;
        check_letter(owned, tile)?;
        self.take(tile.id);
        Ok(())
    }

    /// Places a batch of tiles.
    ///
    /// The batch is validated as a whole before anything changes: a tile may
    /// move into a cell that another tile of the same batch is leaving, but
    /// any other conflict rejects the entire batch.
    pub fn move_tiles(&mut self, positions: &[TilePosition]) -> Result<(), BoardError> {
        let mut moving = HashSet::with_capacity(positions.len());
        let mut destinations = HashSet::with_capacity(positions.len());
        for p in positions {
            let owned = self
                .owned_tile(p.tile.id)
                .ok_or(BoardError::UnknownTile(p.tile.id))?;
            check_letter(owned, p.tile)?;
            if !moving.insert(p.tile.id) {
                return Err(BoardError::RepeatedTile(p.tile.id));
            }
            if !self.config.contains(p.x, p.y) {
                return Err(BoardError::OutOfBounds {
                    id: p.tile.id,
                    x: p.x,
                    y: p.y,
                });
            }
            if !destinations.insert((p.x, p.y)) {
                return Err(BoardError::Collision { x: p.x, y: p.y });
            }
        }
        for p in positions {
            if let Some(occupant) = self.tile_at(p.x, p.y) {
                if !moving.contains(&occupant.id) {
                    return Err(BoardError::Collision { x: p.x, y: p.y });
                }
            }
        }

        let tiles: Vec<Tile> = positions.iter().filter_map(|p| self.take(p.tile.id)).collect();
        for (tile, p) in tiles.into_iter().zip(positions) {
            self.place(TilePosition::new(tile, p.x, p.y));
        }
        Ok(())
    }

    /// Changes the playable area, returning the placed tiles that no longer
    /// fit. Those tiles are appended to the unused pool in row-major order.
    pub fn resize(&mut self, config: BoardConfig) -> Vec<Tile> {
        self.config = config;
        let mut evicted: Vec<TilePosition> = self
            .used
            .values()
            .filter(|p| !config.contains(p.x, p.y))
            .copied()
            .collect();
        evicted.sort_by_key(|p| (p.y, p.x));

        let mut moved = Vec::with_capacity(evicted.len());
        for p in evicted {
            if let Some(tile) = self.take(p.tile.id) {
                self.unused.insert(tile.id, tile);
                self.unused_order.push(tile.id);
                moved.push(tile);
            }
        }
        moved
    }

    pub fn unused_tiles(&self) -> Vec<Tile> {
        self.unused_order
            .iter()
            .filter_map(|id| self.unused.get(id))
            .copied()
            .collect()
    }

    /// Placed tiles in row-major order.
    pub fn used_tiles(&self) -> Vec<TilePosition> {
        let mut positions: Vec<TilePosition> = self.used.values().copied().collect();
        positions.sort_by_key(|p| (p.y, p.x));
        positions
    }

    pub fn unused_count(&self) -> usize {
        self.unused.len()
    }

    pub fn tile_count(&self) -> usize {
        self.unused.len() + self.used.len()
    }

    pub fn tile_at(&self, x: i32, y: i32) -> Option<Tile> {
        self.used_locs.get(&x).and_then(|col| col.get(&y)).copied()
    }

    /// Horizontal words (row by row) followed by vertical words (column by
    /// column). A word is a run of at least two adjacent tiles.
    pub fn words(&self) -> Vec<String> {
        let mut positions = self.used_tiles();
        let mut words = Vec::new();
        for p in &positions {
            if self.tile_at(p.x - 1, p.y).is_none() {
                self.push_run(&mut words, p.x, p.y, 1, 0);
            }
        }
        positions.sort_by_key(|p| (p.x, p.y));
        for p in &positions {
            if self.tile_at(p.x, p.y - 1).is_none() {
                self.push_run(&mut words, p.x, p.y, 0, 1);
            }
        }
        words
    }

    /// True when every tile has been placed and the placed tiles form one
    /// 4-directionally connected region.
    pub fn is_single_group(&self) -> bool {
        if !self.unused.is_empty() {
            return false;
        }
        let Some(start) = self.used.values().next() else {
            return false;
        };

        let mut seen = HashSet::with_capacity(self.used.len());
        let mut stack = vec![(start.x, start.y)];
        seen.insert(start.tile.id);
        while let Some((x, y)) = stack.pop() {
            for (nx, ny) in [(x - 1, y), (x + 1, y), (x, y - 1), (x, y + 1)] {
                if let Some(tile) = self.tile_at(nx, ny) {
                    if seen.insert(tile.id) {
                        stack.push((nx, ny));
                    }
                }
            }
        }
        seen.len() == self.used.len()
    }

    fn push_run(&self, words: &mut Vec<String>, x: i32, y: i32, dx: i32, dy: i32) {
        let mut word = String::new();
        let (mut cx, mut cy) = (x, y);
        while let Some(tile) = self.tile_at(cx, cy) {
            word.push(tile.letter);
            cx += dx;
            cy += dy;
        }
        if word.chars().count() >= 2 {
            words.push(word);
        }
    }

    fn owned_tile(&self, id: TileId) -> Option<Tile> {
        self.unused
            .get(&id)
            .copied()
            .or_else(|| self.used.get(&id).map(|p| p.tile))
    }

    fn take(&mut self, id: TileId) -> Option<Tile> {
        if let Some(tile) = self.unused.remove(&id) {
            self.unused_order.retain(|t| *t != id);
            return Some(tile);
        }
        let p = self.used.remove(&id)?;
        if let Some(col) = self.used_locs.get_mut(&p.x) {
            col.remove(&p.y);
            if col.is_empty() {
                self.used_locs.remove(&p.x);
            }
        }
        Some(p.tile)
    }

    fn place(&mut self, p: TilePosition) {
        self.used_locs.entry(p.x).or_default().insert(p.y, p.tile);
        self.used.insert(p.tile.id, p);
    }
}

fn check_letter(owned: Tile, claimed: Tile) -> Result<(), BoardError> {
    if owned.letter != claimed.letter {
        return Err(BoardError::LetterMismatch {
            id: owned.id,
            expected: owned.letter,
            actual: claimed.letter,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiles(letters: &str) -> Vec<Tile> {
        crate::new_tiles(letters)
    }

    fn board(letters: &str) -> Board {
        Board::new(BoardConfig::new(10, 10), tiles(letters)).unwrap()
    }

    fn pos(tile: Tile, x: i32, y: i32) -> TilePosition {
        TilePosition::new(tile, x, y)
    }

    fn assert_partitioned(board: &Board, expected: usize) {
        let unused: HashSet<TileId> = board.unused_tiles().iter().map(|t| t.id).collect();
        let used: HashSet<TileId> = board.used_tiles().iter().map(|p| p.tile.id).collect();
        assert!(unused.is_disjoint(&used));
        assert_eq!(unused.len() + used.len(), expected);
        assert_eq!(board.tile_count(), expected);
    }

    #[test]
    fn test_new_rejects_duplicate_ids() {
        let t = Tile::new(1, 'A');
        let result = Board::new(BoardConfig::default(), vec![t, t]);
        assert_eq!(result.unwrap_err(), BoardError::DuplicateTile(1));
    }

    #[test]
    fn test_add_tile_preserves_order() {
        let mut board = board("AB");
        board.add_tile(Tile::new(7, 'Q')).unwrap();
        let order: Vec<TileId> = board.unused_tiles().iter().map(|t| t.id).collect();
        assert_eq!(order, vec![1, 2, 7]);
        assert!(board.add_tile(Tile::new(7, 'Q')).is_err());
    }

    #[test]
    fn test_remove_tile_from_either_pool() {
        let mut board = board("ABC");
        let t = tiles("ABC");
        board.move_tiles(&[pos(t[1], 0, 0)]).unwrap();

        board.remove_tile(t[1]).unwrap();
        board.remove_tile(t[0]).unwrap();
        assert_eq!(board.unused_tiles(), vec![t[2]]);
        assert!(board.used_tiles().is_empty());
        assert_eq!(board.tile_at(0, 0), None);
        assert_eq!(board.remove_tile(t[0]), Err(BoardError::UnknownTile(1)));
    }

    #[test]
    fn test_remove_tile_letter_mismatch() {
        let mut board = board("A");
        let err = board.remove_tile(Tile::new(1, 'Z')).unwrap_err();
        assert!(matches!(err, BoardError::LetterMismatch { id: 1, .. }));
        assert_eq!(board.unused_count(), 1);
    }

    #[test]
    fn test_move_tiles_places_exact_positions() {
        let mut board = board("CAT");
        let t = tiles("CAT");
        let batch = vec![pos(t[0], 2, 3), pos(t[1], 3, 3), pos(t[2], 4, 3)];
        board.move_tiles(&batch).unwrap();

        assert_eq!(board.used_tiles(), batch);
        assert_eq!(board.unused_count(), 0);
        assert_partitioned(&board, 3);
    }

    #[test]
    fn test_move_tiles_swap_places_in_one_batch() {
        let mut board = board("AB");
        let t = tiles("AB");
        board.move_tiles(&[pos(t[0], 0, 0), pos(t[1], 1, 0)]).unwrap();
        board.move_tiles(&[pos(t[0], 1, 0), pos(t[1], 0, 0)]).unwrap();

        assert_eq!(board.tile_at(0, 0), Some(t[1]));
        assert_eq!(board.tile_at(1, 0), Some(t[0]));
        assert_partitioned(&board, 2);
    }

    #[test]
    fn test_move_tiles_collision_leaves_board_unchanged() {
        let mut board = board("ABC");
        let t = tiles("ABC");
        board.move_tiles(&[pos(t[0], 0, 0)]).unwrap();
        let before = board.used_tiles();

        let err = board
            .move_tiles(&[pos(t[1], 5, 5), pos(t[2], 0, 0)])
            .unwrap_err();
        assert_eq!(err, BoardError::Collision { x: 0, y: 0 });
        assert_eq!(board.used_tiles(), before);
        assert_eq!(board.unused_tiles(), vec![t[1], t[2]]);
    }

    #[test]
    fn test_move_tiles_rejects_shared_destination() {
        let mut board = board("AB");
        let t = tiles("AB");
        let err = board
            .move_tiles(&[pos(t[0], 1, 1), pos(t[1], 1, 1)])
            .unwrap_err();
        assert_eq!(err, BoardError::Collision { x: 1, y: 1 });
        assert!(board.used_tiles().is_empty());
    }

    #[test]
    fn test_move_tiles_rejects_repeated_source() {
        let mut board = board("AB");
        let t = tiles("AB");
        let err = board
            .move_tiles(&[pos(t[0], 1, 1), pos(t[0], 2, 2)])
            .unwrap_err();
        assert_eq!(err, BoardError::RepeatedTile(1));
        assert!(board.used_tiles().is_empty());
        assert_partitioned(&board, 2);
    }

    #[test]
    fn test_move_tiles_rejects_out_of_bounds_and_unknown() {
        let mut board = board("A");
        let t = tiles("A");
        assert!(matches!(
            board.move_tiles(&[pos(t[0], 10, 0)]),
            Err(BoardError::OutOfBounds { id: 1, x: 10, y: 0 })
        ));
        assert_eq!(
            board.move_tiles(&[pos(Tile::new(9, 'A'), 0, 0)]),
            Err(BoardError::UnknownTile(9))
        );
        assert_eq!(board.unused_count(), 1);
    }

    #[test]
    fn test_resize_evicts_out_of_bounds_tiles() {
        let mut board = board("ABCD");
        let t = tiles("ABCD");
        board
            .move_tiles(&[
                pos(t[0], 0, 0),
                pos(t[1], 9, 0),
                pos(t[2], 0, 9),
                pos(t[3], 1, 1),
            ])
            .unwrap();

        let moved = board.resize(BoardConfig::new(5, 5));
        assert_eq!(moved, vec![t[1], t[2]]);
        assert_eq!(board.unused_tiles(), vec![t[1], t[2]]);
        assert_eq!(board.tile_at(9, 0), None);
        assert_eq!(board.config(), BoardConfig::new(5, 5));
        assert_partitioned(&board, 4);
    }

    #[test]
    fn test_words_row_then_column_order() {
        let mut board = board("CONARUT");
        let t = tiles("CONARUT");
        board
            .move_tiles(&[
                pos(t[0], 1, 1),
                pos(t[1], 2, 1),
                pos(t[2], 3, 1),
                pos(t[3], 1, 2),
                pos(t[4], 1, 3),
                pos(t[5], 2, 3),
                pos(t[6], 3, 3),
            ])
            .unwrap();

        assert_eq!(board.words(), vec!["CON", "RUT", "CAR"]);
        assert_eq!(board.words(), board.words());
    }

    #[test]
    fn test_words_ignores_single_letters() {
        let mut board = board("AB");
        let t = tiles("AB");
        board.move_tiles(&[pos(t[0], 0, 0), pos(t[1], 2, 2)]).unwrap();
        assert!(board.words().is_empty());
    }

    #[test]
    fn test_single_group_connected() {
        let mut board = board("CONARUT");
        let t = tiles("CONARUT");
        board
            .move_tiles(&[
                pos(t[0], 1, 1),
                pos(t[1], 2, 1),
                pos(t[2], 3, 1),
                pos(t[3], 1, 2),
                pos(t[4], 1, 3),
                pos(t[5], 2, 3),
                pos(t[6], 3, 3),
            ])
            .unwrap();
        assert!(board.is_single_group());
    }

    #[test]
    fn test_single_group_requires_empty_unused_pool() {
        let mut board = board("ABC");
        let t = tiles("ABC");
        board.move_tiles(&[pos(t[0], 0, 0), pos(t[1], 1, 0)]).unwrap();
        assert!(!board.is_single_group());
    }

    #[test]
    fn test_single_group_separate_islands() {
        let mut board = board("AB");
        let t = tiles("AB");
        board.move_tiles(&[pos(t[0], 0, 0), pos(t[1], 2, 0)]).unwrap();
        assert!(!board.is_single_group());

        board.move_tiles(&[pos(t[1], 0, 2)]).unwrap();
        assert!(!board.is_single_group());

        board.move_tiles(&[pos(t[1], 1, 1)]).unwrap();
        assert!(!board.is_single_group(), "diagonal tiles do not touch");

        board.move_tiles(&[pos(t[1], 0, 1)]).unwrap();
        assert!(board.is_single_group());
    }

    #[test]
    fn test_single_group_empty_board() {
        let board = Board::new(BoardConfig::default(), Vec::new()).unwrap();
        assert!(!board.is_single_group());
    }
}
