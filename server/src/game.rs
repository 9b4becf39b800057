//! A single running game.
//!
//! Each game runs as its own task that owns the shared tile pool and every
//! player's board. Messages from the lobby are handled strictly in arrival
//! order; replies go back to the lobby on an unbounded channel so the game
//! never waits on the lobby.

use crate::error::GameError;
use crate::points::PointsStore;
use crate::shuffle::{ShuffleMode, Shuffler};
use crate::utils::get_timestamp;
use crate::words::WordValidator;
use log::{debug, error, info};
use shared::{
    new_tiles, Board, BoardConfig, GameId, GameInfo, GameRules, GameStatus, Message, MessageType,
    SocketId, Tile, DEFAULT_TILE_LETTERS,
};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const SWAP_DRAW_COUNT: usize = 3;

#[derive(Debug, Clone)]
pub struct GameSettings {
    pub max_players: usize,
    /// Tiles dealt to each player on joining.
    pub num_new_tiles: usize,
    pub tile_letters: String,
    pub idle_period: Duration,
    /// Points the winner earns before penalties.
    pub win_points: u32,
    pub shuffle: ShuffleMode,
}

impl Default for GameSettings {
    fn default() -> Self {
        Self {
            max_players: 8,
            num_new_tiles: 21,
            tile_letters: DEFAULT_TILE_LETTERS.to_string(),
            idle_period: Duration::from_secs(60 * 60),
            win_points: 10,
            shuffle: ShuffleMode::Random,
        }
    }
}

/// Collaborators shared by every game.
#[derive(Clone)]
pub struct GameServices {
    pub words: Arc<dyn WordValidator>,
    pub points: Arc<dyn PointsStore>,
}

#[derive(Debug)]
struct Player {
    board: Board,
    win_points: u32,
}

/// Why a request was not carried out, and how the requester hears about it.
#[derive(Debug, PartialEq)]
enum Rejection {
    Warning(String),
    Error(String),
    Leave(String),
}

impl Rejection {
    fn warning(reason: impl Into<String>) -> Self {
        Rejection::Warning(reason.into())
    }

    fn error(reason: impl Into<String>) -> Self {
        Rejection::Error(reason.into())
    }
}

impl From<shared::BoardError> for Rejection {
    fn from(e: shared::BoardError) -> Self {
        Rejection::Error(e.to_string())
    }
}

type Handled = Result<(), Rejection>;

pub struct Game {
    id: GameId,
    created_at: u64,
    status: GameStatus,
    players: HashMap<String, Player>,
    unused_tiles: VecDeque<Tile>,
    settings: GameSettings,
    rules: GameRules,
    board_config: BoardConfig,
    services: GameServices,
    shuffler: Shuffler,
    out: mpsc::UnboundedSender<Message>,
}

impl Game {
    pub fn new(
        id: GameId,
        settings: GameSettings,
        rules: GameRules,
        board_config: BoardConfig,
        services: GameServices,
        out: mpsc::UnboundedSender<Message>,
    ) -> Result<Self, GameError> {
        if settings.max_players == 0 {
            return Err(GameError::NoPlayers);
        }
        if settings.num_new_tiles == 0 {
            return Err(GameError::NoStartingTiles);
        }
        if settings.win_points == 0 {
            return Err(GameError::NoWinPoints);
        }
        let mut tiles = new_tiles(&settings.tile_letters);
        if tiles.len() < settings.num_new_tiles {
            return Err(GameError::NotEnoughTiles {
                needed: settings.num_new_tiles,
                available: tiles.len(),
            });
        }

        let mut shuffler = settings.shuffle.shuffler(id);
        shuffler.shuffle(&mut tiles);

        Ok(Self {
            id,
            created_at: get_timestamp(),
            status: GameStatus::NotStarted,
            players: HashMap::new(),
            unused_tiles: tiles.into(),
            settings,
            rules,
            board_config,
            services,
            shuffler,
            out,
        })
    }

    pub fn info(&self) -> GameInfo {
        let mut players: Vec<String> = self.players.keys().cloned().collect();
        players.sort();
        GameInfo {
            id: self.id,
            status: self.status,
            players,
            capacity: self.settings.max_players,
            created_at: self.created_at,
        }
    }

    /// Runs until deleted, idle for too long, cancelled, or the inbound
    /// queue closes. The lobby is always told when the game is gone.
    pub async fn run(mut self, mut inbound: mpsc::Receiver<Message>, cancel: CancellationToken) {
        info!("Game {} started", self.id);
        let idle = tokio::time::sleep(self.settings.idle_period);
        tokio::pin!(idle);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Game {} cancelled", self.id);
                    break;
                }
                _ = &mut idle => {
                    info!("Game {} deleted after being idle", self.id);
                    self.broadcast_leave("the game was deleted for being idle");
                    break;
                }
                next = inbound.recv() => {
                    let Some(message) = next else {
                        break;
                    };
                    let resync = message.kind == MessageType::RefreshGameBoard;
                    let keep_running = self.handle_message(message).await;
                    if !resync {
                        idle.as_mut().reset(Instant::now() + self.settings.idle_period);
                    }
                    if !keep_running {
                        break;
                    }
                }
            }
        }

        let mut deleted = Message::new(MessageType::GameDeleted).with_game_id(self.id);
        deleted.game = Some(self.info());
        self.send(deleted);
        info!("Game {} stopped", self.id);
    }

    /// Handles one message, returning false once the game should stop.
    pub async fn handle_message(&mut self, message: Message) -> bool {
        let result = match message.kind {
            MessageType::JoinGame => self.handle_join(&message),
            MessageType::DeleteGame => match self.handle_delete(&message) {
                Ok(()) => return false,
                Err(rejection) => Err(rejection),
            },
            MessageType::ChangeGameStatus => self.handle_change_status(&message).await,
            MessageType::SnagGameTile => self.handle_snag(&message),
            MessageType::SwapGameTile => self.handle_swap(&message),
            MessageType::MoveGameTiles => self.handle_move(&message),
            MessageType::GameChat => self.handle_chat(&message),
            MessageType::RefreshGameBoard => self.handle_refresh(&message),
            kind => Err(Rejection::error(format!("unexpected message type {:?}", kind))),
        };

        if let Err(rejection) = result {
            self.reject(&message, rejection);
        }
        true
    }

    fn handle_join(&mut self, m: &Message) -> Handled {
        let name = sender(m)?;
        if self.players.contains_key(name) {
            self.send(self.board_message(MessageType::JoinGame, name, m.socket_id)?);
            return Ok(());
        }
        if self.status != GameStatus::NotStarted {
            return Err(Rejection::Leave("the game has already started".to_string()));
        }
        if self.players.len() >= self.settings.max_players {
            return Err(Rejection::Leave(format!(
                "the game is full ({} players)",
                self.settings.max_players
            )));
        }
        if self.unused_tiles.len() < self.settings.num_new_tiles {
            return Err(Rejection::Leave("not enough tiles left to join".to_string()));
        }

        let tiles: Vec<Tile> = self
            .unused_tiles
            .drain(..self.settings.num_new_tiles)
            .collect();
        let config = m.board_config.filter(BoardConfig::is_valid).unwrap_or(self.board_config);
        let board = Board::new(config, tiles)?;
        self.players.insert(
            name.to_string(),
            Player {
                board,
                win_points: self.settings.win_points,
            },
        );
        info!("{} joined game {}", name, self.id);

        self.send(self.board_message(MessageType::JoinGame, name, m.socket_id)?);
        self.broadcast_except(name, MessageType::SocketInfo, &format!("{} joined the game", name));
        self.info_changed();
        Ok(())
    }

    fn handle_delete(&mut self, m: &Message) -> Handled {
        let name = self.player_name(m)?;
        info!("{} deleted game {}", name, self.id);
        self.broadcast_leave(&format!("{} deleted the game", name));
        Ok(())
    }

    async fn handle_change_status(&mut self, m: &Message) -> Handled {
        let name = self.player_name(m)?.to_string();
        let target = m
            .game
            .as_ref()
            .map(|g| g.status)
            .ok_or_else(|| Rejection::error("missing game status"))?;

        match (self.status, target) {
            (GameStatus::NotStarted, GameStatus::InProgress) => {
                self.status = GameStatus::InProgress;
                info!("{} started game {}", name, self.id);
                let text = format!("{} started the game", name);
                for player in self.player_names() {
                    let mut started = self.to_player(MessageType::ChangeGameStatus, &player, None);
                    started.game = Some(self.info());
                    started.info = Some(text.clone());
                    self.send(started);
                }
                self.info_changed();
                Ok(())
            }
            (GameStatus::InProgress, GameStatus::Finished | GameStatus::FinishedAllowMove) => {
                self.finish(&name, target).await
            }
            (from, to) => Err(Rejection::warning(format!(
                "cannot change the game from {} to {}",
                from, to
            ))),
        }
    }

    async fn finish(&mut self, name: &str, status: GameStatus) -> Handled {
        if !self.unused_tiles.is_empty() {
            return Err(Rejection::warning(format!(
                "snag the remaining {} tiles before finishing",
                self.unused_tiles.len()
            )));
        }
        if let Err(reason) = self.check_board(name) {
            self.penalize(name);
            return Err(Rejection::Warning(reason));
        }

        self.status = status;
        let win_points = self.players.get(name).map_or(1, |p| p.win_points);
        let deltas: HashMap<String, u32> = self
            .players
            .keys()
            .map(|player| {
                let points = if player == name { win_points } else { 1 };
                (player.clone(), points)
            })
            .collect();
        if let Err(e) = self.services.points.increment_points(deltas).await {
            error!("Could not record points for game {}: {}", self.id, e);
        }
        info!("{} won game {} for {} points", name, self.id, win_points);

        let final_boards: BTreeMap<String, Vec<_>> = self
            .players
            .iter()
            .map(|(player, p)| (player.clone(), p.board.used_tiles()))
            .collect();
        let text = format!("{} won, earning {} points", name, win_points);
        for player in self.player_names() {
            let mut finished = self.to_player(MessageType::ChangeGameStatus, &player, None);
            finished.game = Some(self.info());
            finished.info = Some(text.clone());
            finished.final_boards = Some(final_boards.clone());
            self.send(finished);
        }
        self.info_changed();
        Ok(())
    }

    fn handle_snag(&mut self, m: &Message) -> Handled {
        let name = self.player_name(m)?.to_string();
        self.require_status(&[GameStatus::InProgress])?;
        if self.unused_tiles.is_empty() {
            return Err(Rejection::warning(
                "no tiles left to snag, try finishing the game",
            ));
        }
        if self.rules.check_on_snag {
            if let Err(reason) = self.check_board(&name) {
                self.penalize(&name);
                return Err(Rejection::Warning(reason));
            }
        }

        let mut dealt: HashMap<String, Tile> = HashMap::new();
        let mut others: Vec<String> = self
            .player_names()
            .into_iter()
            .filter(|p| *p != name)
            .collect();
        self.shuffler.shuffle(&mut others);
        for player in std::iter::once(name.clone()).chain(others) {
            let Some(tile) = self.unused_tiles.pop_front() else {
                break;
            };
            if let Some(p) = self.players.get_mut(&player) {
                p.board.add_tile(tile)?;
            }
            dealt.insert(player, tile);
        }
        debug!("{} snagged in game {}, {} tiles left", name, self.id, self.unused_tiles.len());

        for player in self.player_names() {
            let mut snag = self.to_player(MessageType::SnagGameTile, &player, None);
            snag.tiles_left = Some(self.unused_tiles.len());
            snag.tiles = dealt.get(&player).map(|t| vec![*t]);
            snag.info = Some(if player == name {
                "you snagged a tile".to_string()
            } else {
                format!("{} snagged a tile", name)
            });
            self.send(snag);
        }
        Ok(())
    }

    fn handle_swap(&mut self, m: &Message) -> Handled {
        let name = self.player_name(m)?.to_string();
        self.require_status(&[GameStatus::InProgress])?;
        let tile = m
            .tiles
            .as_ref()
            .and_then(|tiles| tiles.first())
            .copied()
            .ok_or_else(|| Rejection::error("missing tile to swap"))?;
        if self.unused_tiles.is_empty() {
            return Err(Rejection::warning("no tiles left to swap"));
        }
        let player = self
            .players
            .get_mut(&name)
            .ok_or_else(|| Rejection::warning("you are not in this game"))?;
        player
            .board
            .remove_tile(tile)
            .map_err(|e| Rejection::Warning(format!("cannot swap: {}", e)))?;

        self.unused_tiles.push_back(tile);
        self.shuffler.shuffle(self.unused_tiles.make_contiguous());
        let count = SWAP_DRAW_COUNT.min(self.unused_tiles.len());
        let drawn: Vec<Tile> = self.unused_tiles.drain(..count).collect();
        for t in &drawn {
            player.board.add_tile(*t)?;
        }
        debug!("{} swapped {} in game {}", name, tile.letter, self.id);

        let mut reply = self.to_player(MessageType::SwapGameTile, &name, m.socket_id);
        reply.info = Some(format!("swapped a {} for {} tiles", tile.letter, drawn.len()));
        reply.tiles = Some(drawn);
        reply.tiles_left = Some(self.unused_tiles.len());
        self.send(reply);
        for player in self.player_names().into_iter().filter(|p| *p != name) {
            let mut swapped = self.to_player(MessageType::SwapGameTile, &player, None);
            swapped.info = Some(format!("{} swapped a tile", name));
            swapped.tiles_left = Some(self.unused_tiles.len());
            self.send(swapped);
        }
        Ok(())
    }

    fn handle_move(&mut self, m: &Message) -> Handled {
        let name = self.player_name(m)?.to_string();
        self.require_status(&[GameStatus::InProgress, GameStatus::FinishedAllowMove])?;
        let positions = m
            .tile_positions
            .as_deref()
            .ok_or_else(|| Rejection::error("missing tile positions"))?;
        if let Some(player) = self.players.get_mut(&name) {
            player
                .board
                .move_tiles(positions)
                .map_err(|e| Rejection::Warning(format!("invalid move: {}", e)))?;
        }
        Ok(())
    }

    fn handle_chat(&mut self, m: &Message) -> Handled {
        let name = self.player_name(m)?.to_string();
        let text = m
            .info
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Rejection::warning("chat message is empty"))?;
        let line = format!("{}: {}", name, text);
        for player in self.player_names() {
            let mut chat = self.to_player(MessageType::GameChat, &player, None);
            chat.info = Some(line.clone());
            self.send(chat);
        }
        Ok(())
    }

    fn handle_refresh(&mut self, m: &Message) -> Handled {
        let name = self.player_name(m)?.to_string();
        let mut moved = Vec::new();
        if let Some(config) = m.board_config {
            if !config.is_valid() {
                return Err(Rejection::warning(
                    "board must have at least one row and column",
                ));
            }
            if let Some(player) = self.players.get_mut(&name) {
                moved = player.board.resize(config);
            }
        }

        let mut reply = self.board_message(MessageType::RefreshGameBoard, &name, m.socket_id)?;
        if !moved.is_empty() {
            reply.info = Some(format!(
                "{} tiles were moved back to the unused area",
                moved.len()
            ));
        }
        self.send(reply);
        Ok(())
    }

    /// Checks a player's board against the word rules.
    fn check_board(&self, name: &str) -> Result<(), String> {
        let board = &self
            .players
            .get(name)
            .ok_or_else(|| "you are not in this game".to_string())?
            .board;
        if board.unused_count() > 0 {
            return Err(format!(
                "place your {} unused tiles first",
                board.unused_count()
            ));
        }
        if !board.is_single_group() {
            return Err("tiles must form one connected group".to_string());
        }

        let words = board.words();
        if let Some(short) = words
            .iter()
            .find(|w| w.chars().count() < self.rules.min_length)
        {
            return Err(format!(
                "{} is shorter than {} letters",
                short, self.rules.min_length
            ));
        }
        if !self.rules.allow_duplicates {
            let mut seen = HashSet::new();
            if let Some(repeated) = words.iter().find(|w| !seen.insert(w.as_str())) {
                return Err(format!("{} is used more than once", repeated));
            }
        }
        let invalid: Vec<&str> = words
            .iter()
            .filter(|w| !self.services.words.is_valid(w))
            .map(String::as_str)
            .collect();
        if !invalid.is_empty() {
            return Err(format!("invalid words: {}", invalid.join(", ")));
        }
        Ok(())
    }

    fn penalize(&mut self, name: &str) {
        if !self.rules.penalize {
            return;
        }
        if let Some(player) = self.players.get_mut(name) {
            player.win_points = player.win_points.saturating_sub(1).max(1);
            debug!("{} now has {} win points in game {}", name, player.win_points, self.id);
        }
    }

    fn require_status(&self, allowed: &[GameStatus]) -> Handled {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(Rejection::warning(format!("the game is {}", self.status)))
        }
    }

    fn player_name<'a>(&self, m: &'a Message) -> Result<&'a str, Rejection> {
        let name = sender(m)?;
        if self.players.contains_key(name) {
            Ok(name)
        } else {
            Err(Rejection::warning("you are not in this game"))
        }
    }

    fn player_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.players.keys().cloned().collect();
        names.sort();
        names
    }

    fn rule_lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!("up to {} players", self.settings.max_players),
            format!("each player starts with {} tiles", self.settings.num_new_tiles),
            format!(
                "words must be at least {} letters long",
                self.rules.min_length
            ),
        ];
        lines.push(if self.rules.allow_duplicates {
            "words may be repeated".to_string()
        } else {
            "each word may only be used once".to_string()
        });
        lines.push(if self.rules.check_on_snag {
            "a valid board is required to snag a tile".to_string()
        } else {
            "tiles can be snagged at any time".to_string()
        });
        lines.push(if self.rules.penalize {
            format!(
                "the winner earns up to {} points, one less for each failed check (at least 1)",
                self.settings.win_points
            )
        } else {
            format!("the winner earns {} points", self.settings.win_points)
        });
        lines.push("every other player earns 1 point".to_string());
        lines
    }

    fn to_player(&self, kind: MessageType, name: &str, socket_id: Option<SocketId>) -> Message {
        Message::new(kind)
            .with_game_id(self.id)
            .for_player(name, socket_id)
    }

    fn board_message(
        &self,
        kind: MessageType,
        name: &str,
        socket_id: Option<SocketId>,
    ) -> Result<Message, Rejection> {
        let board = &self
            .players
            .get(name)
            .ok_or_else(|| Rejection::warning("you are not in this game"))?
            .board;
        let mut m = self.to_player(kind, name, socket_id);
        m.game = Some(self.info());
        m.tiles = Some(board.unused_tiles());
        m.tile_positions = Some(board.used_tiles());
        m.tiles_left = Some(self.unused_tiles.len());
        m.board_config = Some(board.config());
        m.game_rules = Some(self.rules);
        m.rules = Some(self.rule_lines());
        Ok(m)
    }

    fn broadcast_except(&self, except: &str, kind: MessageType, text: &str) {
        for player in self.player_names().into_iter().filter(|p| p != except) {
            self.send(self.to_player(kind, &player, None).with_info(text));
        }
    }

    fn broadcast_leave(&self, reason: &str) {
        for player in self.player_names() {
            self.send(self.to_player(MessageType::LeaveGame, &player, None).with_info(reason));
        }
    }

    fn info_changed(&self) {
        let mut changed = Message::new(MessageType::GameInfoChanged).with_game_id(self.id);
        changed.game = Some(self.info());
        self.send(changed);
    }

    fn reject(&self, m: &Message, rejection: Rejection) {
        let (kind, text) = match rejection {
            Rejection::Warning(text) => {
                debug!("Game {} warning for {:?}: {}", self.id, m.player_name, text);
                (MessageType::SocketWarning, text)
            }
            Rejection::Error(text) => {
                error!("Game {} could not handle {:?}: {}", self.id, m.kind, text);
                (MessageType::SocketError, text)
            }
            Rejection::Leave(text) => {
                info!("Game {} turned away {:?}: {}", self.id, m.player_name, text);
                (MessageType::LeaveGame, text)
            }
        };
        let mut reply = m.reply(kind).with_info(text);
        reply.game_id = Some(self.id);
        self.send(reply);
    }

    fn send(&self, m: Message) {
        if self.out.send(m).is_err() {
            debug!("Game {} has no lobby to send to", self.id);
        }
    }
}

fn sender(m: &Message) -> Result<&str, Rejection> {
    m.player_name
        .as_deref()
        .ok_or_else(|| Rejection::error("message has no player name"))
}
