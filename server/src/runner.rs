//! Creates, indexes and tears down games.
//!
//! The runner only knows how to reach each game; it never looks at game
//! state. It is owned by the lobby task so its table needs no locking.

use crate::error::RunnerError;
use crate::game::{Game, GameServices, GameSettings};
use log::{debug, info};
use shared::{GameId, Message, MessageType};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub max_games: usize,
    pub game: GameSettings,
    /// Capacity of each game's inbound queue.
    pub channel_capacity: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_games: 64,
            game: GameSettings::default(),
            channel_capacity: 1,
        }
    }
}

struct GameHandle {
    tx: mpsc::Sender<Message>,
    cancel: CancellationToken,
}

pub struct Runner {
    config: RunnerConfig,
    services: GameServices,
    games: HashMap<GameId, GameHandle>,
    out: mpsc::UnboundedSender<Message>,
    cancel: CancellationToken,
}

impl Runner {
    /// Games report back on `out`. Cancelling `cancel` stops every game.
    pub fn new(
        config: RunnerConfig,
        services: GameServices,
        out: mpsc::UnboundedSender<Message>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            services,
            games: HashMap::new(),
            out,
            cancel,
        }
    }

    pub fn len(&self) -> usize {
        self.games.len()
    }

    pub fn is_empty(&self) -> bool {
        self.games.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.games.len() >= self.config.max_games
    }

    pub fn contains(&self, id: GameId) -> bool {
        self.games.contains_key(&id)
    }

    /// Lowest positive id not held by a live game.
    fn next_id(&self) -> GameId {
        (1..)
            .find(|id| !self.games.contains_key(id))
            .unwrap_or_default()
    }

    /// Starts a game for a `CreateGame` request and joins the requester to it.
    pub async fn create(&mut self, request: &Message) -> Result<GameId, RunnerError> {
        if self.is_full() {
            return Err(RunnerError::AtCapacity {
                max: self.config.max_games,
            });
        }
        let board_config = request.board_config.ok_or(RunnerError::MissingBoardConfig)?;
        if !board_config.is_valid() {
            return Err(RunnerError::InvalidBoardConfig);
        }
        let rules = request.game_rules.ok_or(RunnerError::MissingGameRules)?;

        let id = self.next_id();
        let game = Game::new(
            id,
            self.config.game.clone(),
            rules,
            board_config,
            self.services.clone(),
            self.out.clone(),
        )?;
        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let cancel = self.cancel.child_token();
        tokio::spawn(game.run(rx, cancel.clone()));
        self.games.insert(id, GameHandle { tx, cancel });
        info!("Created game {} for {:?}", id, request.player_name);

        let mut join = request.reply(MessageType::JoinGame);
        join.game_id = Some(id);
        join.board_config = Some(board_config);
        self.forward(join).await?;
        Ok(id)
    }

    /// Passes a message to the game it names.
    pub async fn forward(&self, message: Message) -> Result<(), RunnerError> {
        let id = message.game_id.ok_or(RunnerError::MissingGameId)?;
        let handle = self.games.get(&id).ok_or(RunnerError::UnknownGame(id))?;
        handle
            .tx
            .send(message)
            .await
            .map_err(|_| RunnerError::GameClosed(id))
    }

    /// Forgets a game that stopped. Returns false if it was already gone.
    pub fn remove(&mut self, id: GameId) -> bool {
        match self.games.remove(&id) {
            Some(handle) => {
                handle.cancel.cancel();
                debug!("Removed game {}, {} still running", id, self.games.len());
                true
            }
            None => false,
        }
    }
}
