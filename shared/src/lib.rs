use serde::{Deserialize, Serialize};
use std::fmt;

pub mod board;
pub mod message;

pub use board::{Board, BoardError};
pub use message::{Message, MessageType};

/// Standard 144 tile distribution.
pub const DEFAULT_TILE_LETTERS: &str = concat!(
    "AAAAAAAAAAAAA",
    "BBB",
    "CCC",
    "DDDDDD",
    "EEEEEEEEEEEEEEEEEE",
    "FFF",
    "GGGG",
    "HHH",
    "IIIIIIIIIIII",
    "JJ",
    "KK",
    "LLLLL",
    "MMM",
    "NNNNNNNN",
    "OOOOOOOOOOO",
    "PPP",
    "QQ",
    "RRRRRRRRR",
    "SSSSSS",
    "TTTTTTTTT",
    "UUUUUU",
    "VVV",
    "WWW",
    "XX",
    "YYY",
    "ZZ",
);

pub const DEFAULT_NUM_ROWS: usize = 32;
pub const DEFAULT_NUM_COLS: usize = 32;

pub type TileId = u32;
pub type GameId = u32;
pub type SocketId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tile {
    pub id: TileId,
    #[serde(rename = "ch")]
    pub letter: char,
}

impl Tile {
    pub fn new(id: TileId, letter: char) -> Self {
        Self { id, letter }
    }
}

/// Builds one tile per letter, numbering ids from 1 in string order.
/// Characters that are not ASCII letters are skipped.
pub fn new_tiles(letters: &str) -> Vec<Tile> {
    letters
        .chars()
        .filter(char::is_ascii_alphabetic)
        .map(|c| c.to_ascii_uppercase())
        .zip(1..)
        .map(|(letter, id)| Tile::new(id, letter))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TilePosition {
    pub tile: Tile,
    pub x: i32,
    pub y: i32,
}

impl TilePosition {
    pub fn new(tile: Tile, x: i32, y: i32) -> Self {
        Self { tile, x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardConfig {
    pub num_rows: usize,
    pub num_cols: usize,
}

impl BoardConfig {
    pub fn new(num_rows: usize, num_cols: usize) -> Self {
        Self { num_rows, num_cols }
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && (x as usize) < self.num_cols && (y as usize) < self.num_rows
    }

    pub fn is_valid(&self) -> bool {
        self.num_rows > 0 && self.num_cols > 0
    }
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self::new(DEFAULT_NUM_ROWS, DEFAULT_NUM_COLS)
    }
}

/// Word rules a player chooses when creating a game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameRules {
    /// Require a valid board before a tile can be snagged.
    pub check_on_snag: bool,
    /// Lower the winner's points for every failed board check.
    pub penalize: bool,
    pub min_length: usize,
    pub allow_duplicates: bool,
}

impl Default for GameRules {
    fn default() -> Self {
        Self {
            check_on_snag: true,
            penalize: false,
            min_length: 2,
            allow_duplicates: true,
        }
    }
}

/// Raised when an integer discriminant on the wire names no known variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} discriminant: {value}")]
pub struct UnknownDiscriminant {
    pub kind: &'static str,
    pub value: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum GameStatus {
    NotStarted = 1,
    InProgress = 2,
    Finished = 3,
    FinishedAllowMove = 4,
}

impl GameStatus {
    pub fn is_finished(self) -> bool {
        matches!(self, GameStatus::Finished | GameStatus::FinishedAllowMove)
    }
}

impl From<GameStatus> for u8 {
    fn from(status: GameStatus) -> u8 {
        status as u8
    }
}

impl TryFrom<u8> for GameStatus {
    type Error = UnknownDiscriminant;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(GameStatus::NotStarted),
            2 => Ok(GameStatus::InProgress),
            3 => Ok(GameStatus::Finished),
            4 => Ok(GameStatus::FinishedAllowMove),
            value => Err(UnknownDiscriminant {
                kind: "game status",
                value,
            }),
        }
    }
}

impl fmt::Display for GameStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GameStatus::NotStarted => "not started",
            GameStatus::InProgress => "in progress",
            GameStatus::Finished => "finished",
            GameStatus::FinishedAllowMove => "finished (moves allowed)",
        };
        f.write_str(name)
    }
}

/// Public summary of a game, broadcast to every connected player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameInfo {
    pub id: GameId,
    pub status: GameStatus,
    pub players: Vec<String>,
    pub capacity: usize,
    pub created_at: u64,
}

impl GameInfo {
    pub fn can_join(&self, player_name: &str) -> bool {
        self.players.iter().any(|p| p == player_name)
            || (self.status == GameStatus::NotStarted && self.players.len() < self.capacity)
    }
}
