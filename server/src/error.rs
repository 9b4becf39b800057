//! Error types for the server components.

use shared::{BoardError, GameId};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum GameError {
    #[error("each player needs {needed} tiles but only {available} exist")]
    NotEnoughTiles { needed: usize, available: usize },
    #[error("a game must allow at least one player")]
    NoPlayers,
    #[error("players must start with at least one tile")]
    NoStartingTiles,
    #[error("the winner must earn at least one point")]
    NoWinPoints,
    #[error(transparent)]
    Board(#[from] BoardError),
}

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("the maximum of {max} games are already running")]
    AtCapacity { max: usize },
    #[error("missing board config")]
    MissingBoardConfig,
    #[error("board must have at least one row and column")]
    InvalidBoardConfig,
    #[error("missing game rules")]
    MissingGameRules,
    #[error("missing game id")]
    MissingGameId,
    #[error("no game with id {0}")]
    UnknownGame(GameId),
    #[error("game {0} is shutting down")]
    GameClosed(GameId),
    #[error("could not create game: {0}")]
    Game(#[from] GameError),
}

impl RunnerError {
    /// Whether the error is a player misstep rather than a fault.
    pub fn is_warning(&self) -> bool {
        matches!(self, RunnerError::AtCapacity { .. } | RunnerError::Game(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    #[error("{0} must be positive")]
    NonPositivePeriod(&'static str),
    #[error("ping period ({ping:?}) must be less than read timeout ({read:?})")]
    PingTooSlow { ping: Duration, read: Duration },
    #[error("could not encode message: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("could not write message: {0}")]
    Write(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("timed out writing message")]
    WriteTimeout,
}

#[derive(Debug, thiserror::Error)]
pub enum LobbyError {
    #[error("missing player name")]
    MissingPlayerName,
    #[error("the lobby is full ({max} connections)")]
    TooManySockets { max: usize },
    #[error("{player} already has the maximum of {max} connections")]
    TooManyPlayerSockets { player: String, max: usize },
    #[error("invalid socket config: {0}")]
    Socket(#[from] SocketError),
    #[error("the lobby is closed")]
    Closed,
}
