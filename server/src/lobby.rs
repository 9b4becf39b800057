//! Top level router between sockets and games.
//!
//! The lobby is a single task that owns the socket registry, the runner and
//! the list of game infos. Sockets talk to it over a bounded event channel;
//! games report back on an unbounded channel so a game never blocks on the
//! lobby while the lobby is waiting on that game's inbound queue.

use crate::error::{LobbyError, RunnerError};
use crate::game::GameServices;
use crate::runner::{Runner, RunnerConfig};
use crate::socket::{Socket, SocketConfig, SocketEvent};
use futures::SinkExt;
use log::{debug, error, info, warn};
use shared::{GameId, GameInfo, Message, MessageType, SocketId};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct LobbyConfig {
    pub max_sockets: usize,
    pub max_player_sockets: usize,
    pub socket: SocketConfig,
    pub runner: RunnerConfig,
    /// Capacity of every bounded channel the lobby creates.
    pub channel_capacity: usize,
}

impl Default for LobbyConfig {
    fn default() -> Self {
        Self {
            max_sockets: 1024,
            max_player_sockets: 3,
            socket: SocketConfig::default(),
            runner: RunnerConfig::default(),
            channel_capacity: 1,
        }
    }
}

struct SocketHandle {
    player_name: String,
    tx: mpsc::Sender<Message>,
    cancel: CancellationToken,
    /// Game the socket last joined, used to route broadcasts.
    game_id: Option<GameId>,
}

struct AddSocketRequest<S> {
    player_name: String,
    ws: WebSocketStream<S>,
    result: oneshot::Sender<Result<SocketId, LobbyError>>,
}

/// Cloneable entry point used by the accept loop to hand over connections.
pub struct LobbyHandle<S> {
    add_tx: mpsc::Sender<AddSocketRequest<S>>,
}

impl<S> Clone for LobbyHandle<S> {
    fn clone(&self) -> Self {
        Self {
            add_tx: self.add_tx.clone(),
        }
    }
}

impl<S> LobbyHandle<S> {
    /// Registers an upgraded connection for `player_name`, waiting until the
    /// lobby has admitted or refused it. Refused connections are sent a
    /// `SocketError` and closed.
    pub async fn add_socket(
        &self,
        player_name: impl Into<String>,
        ws: WebSocketStream<S>,
    ) -> Result<SocketId, LobbyError> {
        let player_name = player_name.into();
        if player_name.trim().is_empty() {
            return Err(LobbyError::MissingPlayerName);
        }
        let (result, rx) = oneshot::channel();
        self.add_tx
            .send(AddSocketRequest {
                player_name,
                ws,
                result,
            })
            .await
            .map_err(|_| LobbyError::Closed)?;
        rx.await.map_err(|_| LobbyError::Closed)?
    }
}

pub struct Lobby<S> {
    config: LobbyConfig,
    runner: Runner,
    sockets: HashMap<SocketId, SocketHandle>,
    infos: BTreeMap<GameId, GameInfo>,
    last_socket_id: SocketId,
    add_rx: mpsc::Receiver<AddSocketRequest<S>>,
    events_tx: mpsc::Sender<SocketEvent>,
    events_rx: mpsc::Receiver<SocketEvent>,
    game_rx: mpsc::UnboundedReceiver<Message>,
    cancel: CancellationToken,
}

impl<S> Lobby<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(
        config: LobbyConfig,
        services: GameServices,
        cancel: CancellationToken,
    ) -> Result<(Self, LobbyHandle<S>), LobbyError> {
        config.socket.validate()?;
        let capacity = config.channel_capacity.max(1);
        let (add_tx, add_rx) = mpsc::channel(capacity);
        let (events_tx, events_rx) = mpsc::channel(capacity);
        let (game_tx, game_rx) = mpsc::unbounded_channel();

        let mut runner_config = config.runner.clone();
        runner_config.channel_capacity = capacity;
        let runner = Runner::new(runner_config, services, game_tx, cancel.child_token());

        let lobby = Self {
            config,
            runner,
            sockets: HashMap::new(),
            infos: BTreeMap::new(),
            last_socket_id: 0,
            add_rx,
            events_tx,
            events_rx,
            game_rx,
            cancel,
        };
        Ok((lobby, LobbyHandle { add_tx }))
    }

    /// Dispatches until cancelled. Every socket and game is stopped on exit.
    pub async fn run(mut self) {
        info!("Lobby started");
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                Some(request) = self.add_rx.recv() => self.add_socket(request).await,
                Some(event) = self.events_rx.recv() => self.handle_socket_event(event).await,
                Some(message) = self.game_rx.recv() => self.handle_game_message(message).await,
                else => break,
            }
        }
        self.cancel.cancel();
        info!(
            "Lobby stopped with {} sockets and {} games",
            self.sockets.len(),
            self.runner.len()
        );
    }

    async fn add_socket(&mut self, request: AddSocketRequest<S>) {
        let AddSocketRequest {
            player_name,
            ws,
            result,
        } = request;

        let outcome = match self.check_limits(&player_name) {
            Ok(()) => self.admit(player_name, ws).await,
            Err(e) => {
                warn!("Refusing connection for {}: {}", player_name, e);
                tokio::spawn(refuse(ws, e.to_string(), self.config.socket.write_timeout));
                Err(e)
            }
        };
        if result.send(outcome).is_err() {
            debug!("Connection request was abandoned");
        }
    }

    fn check_limits(&self, player_name: &str) -> Result<(), LobbyError> {
        if self.sockets.len() >= self.config.max_sockets {
            return Err(LobbyError::TooManySockets {
                max: self.config.max_sockets,
            });
        }
        let player_sockets = self
            .sockets
            .values()
            .filter(|s| s.player_name == player_name)
            .count();
        if player_sockets >= self.config.max_player_sockets {
            return Err(LobbyError::TooManyPlayerSockets {
                player: player_name.to_string(),
                max: self.config.max_player_sockets,
            });
        }
        Ok(())
    }

    async fn admit(
        &mut self,
        player_name: String,
        ws: WebSocketStream<S>,
    ) -> Result<SocketId, LobbyError> {
        self.last_socket_id += 1;
        let id = self.last_socket_id;
        let socket = Socket::new(id, player_name.clone(), self.config.socket)?;
        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let cancel = self.cancel.child_token();
        tokio::spawn(socket.run(ws, self.events_tx.clone(), rx, cancel.clone()));

        info!("Socket {} opened for {}", id, player_name);
        self.sockets.insert(
            id,
            SocketHandle {
                player_name,
                tx,
                cancel,
                game_id: None,
            },
        );
        self.send_to_socket(id, self.infos_message()).await;
        Ok(id)
    }

    async fn handle_socket_event(&mut self, event: SocketEvent) {
        match event {
            SocketEvent::Inbound(message) => self.handle_socket_message(message).await,
            SocketEvent::Closed {
                player_name,
                socket_id,
            } => {
                if let Some(handle) = self.sockets.remove(&socket_id) {
                    handle.cancel.cancel();
                    debug!(
                        "Removed socket {} for {}, {} open",
                        socket_id,
                        player_name,
                        self.sockets.len()
                    );
                }
            }
        }
    }

    async fn handle_socket_message(&mut self, message: Message) {
        let Some(socket_id) = message.socket_id else {
            error!("Dropping {:?} with no socket id", message.kind);
            return;
        };

        match message.kind {
            MessageType::CreateGame => {
                if let Err(e) = self.runner.create(&message).await {
                    self.reply_runner_error(&message, e).await;
                }
            }
            MessageType::LeaveGame => {
                let left = self.sockets.get_mut(&socket_id).and_then(|s| s.game_id.take());
                let mut reply = message.reply(MessageType::LeaveGame);
                reply.game_id = left;
                reply.info = Some(match left {
                    Some(id) => format!("left game {}", id),
                    None => "not in a game".to_string(),
                });
                self.send_to_socket(socket_id, reply).await;
            }
            MessageType::GameInfos => {
                self.send_to_socket(socket_id, self.infos_message()).await;
            }
            MessageType::JoinGame
            | MessageType::DeleteGame
            | MessageType::ChangeGameStatus
            | MessageType::SnagGameTile
            | MessageType::SwapGameTile
            | MessageType::MoveGameTiles
            | MessageType::GameChat
            | MessageType::RefreshGameBoard => {
                let request = message.reply(message.kind);
                if let Err(e) = self.runner.forward(message).await {
                    self.reply_runner_error(&request, e).await;
                }
            }
            kind => {
                warn!("Socket {} sent unexpected {:?}", socket_id, kind);
                let reply = message
                    .reply(MessageType::SocketError)
                    .with_info(format!("cannot handle message type {}", u8::from(kind)));
                self.send_to_socket(socket_id, reply).await;
            }
        }
    }

    async fn reply_runner_error(&mut self, request: &Message, e: RunnerError) {
        let kind = if e.is_warning() {
            info!("{:?} for {:?} refused: {}", request.kind, request.player_name, e);
            MessageType::SocketWarning
        } else {
            warn!("{:?} for {:?} failed: {}", request.kind, request.player_name, e);
            MessageType::SocketError
        };
        if let Some(socket_id) = request.socket_id {
            let reply = request.reply(kind).with_info(e.to_string());
            self.send_to_socket(socket_id, reply).await;
        }
    }

    async fn handle_game_message(&mut self, message: Message) {
        match message.kind {
            MessageType::GameInfoChanged => {
                if let Some(info) = message.game {
                    self.infos.insert(info.id, info);
                    self.broadcast_infos().await;
                }
            }
            MessageType::GameDeleted => {
                let Some(id) = message.game_id else {
                    error!("Game reported deletion without an id");
                    return;
                };
                self.runner.remove(id);
                self.infos.remove(&id);
                let stranded: Vec<SocketId> = self
                    .sockets
                    .iter()
                    .filter(|(_, s)| s.game_id == Some(id))
                    .map(|(socket_id, _)| *socket_id)
                    .collect();
                for socket_id in stranded {
                    if let Some(handle) = self.sockets.get_mut(&socket_id) {
                        handle.game_id = None;
                    }
                    let leave = Message::new(MessageType::LeaveGame)
                        .with_game_id(id)
                        .with_info("the game was deleted");
                    self.send_to_socket(socket_id, leave).await;
                }
                info!("Game {} deleted, {} running", id, self.runner.len());
                self.broadcast_infos().await;
            }
            _ => self.route_to_player(message).await,
        }
    }

    async fn route_to_player(&mut self, message: Message) {
        let Some(player_name) = message.player_name.as_deref() else {
            error!("Game {:?} sent {:?} with no player", message.game_id, message.kind);
            return;
        };

        let pinned = message.socket_id.filter(|id| {
            self.sockets
                .get(id)
                .is_some_and(|s| s.player_name == player_name)
        });
        let targets: Vec<SocketId> = match pinned {
            Some(id) => vec![id],
            None => self
                .sockets
                .iter()
                .filter(|(_, s)| s.player_name == player_name && s.game_id == message.game_id)
                .map(|(id, _)| *id)
                .collect(),
        };
        if targets.is_empty() {
            warn!(
                "No socket for {} in game {:?}, dropping {:?}",
                player_name, message.game_id, message.kind
            );
            return;
        }

        for socket_id in targets {
            if let Some(handle) = self.sockets.get_mut(&socket_id) {
                match message.kind {
                    MessageType::JoinGame => handle.game_id = message.game_id,
                    MessageType::LeaveGame if handle.game_id == message.game_id => {
                        handle.game_id = None
                    }
                    _ => {}
                }
            }
            self.send_to_socket(socket_id, message.clone()).await;
        }
    }

    fn infos_message(&self) -> Message {
        let mut m = Message::new(MessageType::GameInfos);
        m.games = Some(self.infos.values().cloned().collect());
        m
    }

    async fn broadcast_infos(&self) {
        let infos = self.infos_message();
        let ids: Vec<SocketId> = self.sockets.keys().copied().collect();
        for id in ids {
            self.send_to_socket(id, infos.clone()).await;
        }
    }

    async fn send_to_socket(&self, socket_id: SocketId, message: Message) {
        let Some(handle) = self.sockets.get(&socket_id) else {
            debug!("Socket {} is gone, dropping {:?}", socket_id, message.kind);
            return;
        };
        if handle.tx.send(message).await.is_err() {
            debug!("Socket {} stopped before a message reached it", socket_id);
        }
    }
}

async fn refuse<S>(mut ws: WebSocketStream<S>, reason: String, write_timeout: Duration)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let text = match serde_json::to_string(&Message::error(reason)) {
        Ok(text) => text,
        Err(e) => {
            error!("Could not encode refusal: {}", e);
            return;
        }
    };
    let refused = timeout(write_timeout, async {
        ws.send(WsMessage::text(text)).await?;
        ws.close(None).await
    })
    .await;
    match refused {
        Ok(Err(e)) => debug!("Could not refuse connection cleanly: {}", e),
        Err(_) => debug!("Timed out refusing connection"),
        Ok(Ok(())) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::GameSettings;
    use crate::points::InMemoryPoints;
    use crate::shuffle::ShuffleMode;
    use crate::words::WordList;
    use futures::StreamExt;
    use std::sync::Arc;
    use tokio::io::DuplexStream;
    use tokio_tungstenite::tungstenite::protocol::Role;

    type Client = WebSocketStream<DuplexStream>;

    fn test_config() -> LobbyConfig {
        LobbyConfig {
            max_sockets: 3,
            max_player_sockets: 1,
            runner: RunnerConfig {
                max_games: 2,
                game: GameSettings {
                    num_new_tiles: 4,
                    tile_letters: "ABCDEFGHIJKL".to_string(),
                    shuffle: ShuffleMode::Identity,
                    ..GameSettings::default()
                },
                channel_capacity: 1,
            },
            ..LobbyConfig::default()
        }
    }

    fn start_lobby(config: LobbyConfig) -> (LobbyHandle<DuplexStream>, CancellationToken) {
        let services = GameServices {
            words: Arc::new(WordList::default()),
            points: Arc::new(InMemoryPoints::new()),
        };
        let cancel = CancellationToken::new();
        let (lobby, handle) = Lobby::new(config, services, cancel.clone()).unwrap();
        tokio::spawn(lobby.run());
        (handle, cancel)
    }

    async fn try_connect(
        handle: &LobbyHandle<DuplexStream>,
        name: &str,
    ) -> (Result<SocketId, LobbyError>, Client) {
        let (server_io, client_io) = tokio::io::duplex(64 * 1024);
        let server_ws = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
        let client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
        (handle.add_socket(name, server_ws).await, client)
    }

    async fn connect(handle: &LobbyHandle<DuplexStream>, name: &str) -> Client {
        let (result, mut client) = try_connect(handle, name).await;
        result.unwrap();
        let infos = next_message(&mut client).await;
        assert_eq!(infos.kind, MessageType::GameInfos);
        client
    }

    async fn send(client: &mut Client, json: &str) {
        client.send(WsMessage::text(json.to_string())).await.unwrap();
    }

    async fn next_message(client: &mut Client) -> Message {
        loop {
            let frame = timeout(Duration::from_secs(5), client.next())
                .await
                .expect("timed out waiting for a message")
                .expect("connection ended")
                .unwrap();
            if let WsMessage::Text(text) = frame {
                let m: Message = serde_json::from_str(text.as_str()).unwrap();
                if !m.kind.is_keepalive() {
                    return m;
                }
            }
        }
    }

    async fn next_of(client: &mut Client, kind: MessageType) -> Message {
        loop {
            let m = next_message(client).await;
            if m.kind == kind {
                return m;
            }
        }
    }

    const CREATE: &str = r#"{"type":1,"boardConfig":{"numRows":10,"numCols":10},"gameRules":{"checkOnSnag":true,"penalize":false,"minLength":2,"allowDuplicates":true}}"#;

    #[tokio::test]
    async fn test_new_socket_gets_game_list() {
        let (handle, _cancel) = start_lobby(test_config());
        let (result, mut client) = try_connect(&handle, "alice").await;
        assert_eq!(result.unwrap(), 1);
        let infos = next_message(&mut client).await;
        assert_eq!(infos.kind, MessageType::GameInfos);
        assert_eq!(infos.games, Some(Vec::new()));
    }

    #[tokio::test]
    async fn test_create_game_joins_creator_and_broadcasts() {
        let (handle, _cancel) = start_lobby(test_config());
        let mut alice = connect(&handle, "alice").await;
        let mut bob = connect(&handle, "bob").await;

        send(&mut alice, CREATE).await;
        let join = next_of(&mut alice, MessageType::JoinGame).await;
        assert_eq!(join.game_id, Some(1));
        assert_eq!(join.tiles.map(|t| t.len()), Some(4));

        let infos = next_of(&mut bob, MessageType::GameInfos).await;
        let games = infos.games.unwrap();
        assert_eq!(games.len(), 1);
        assert_eq!(games[0].players, vec!["alice"]);
    }

    #[tokio::test]
    async fn test_join_unknown_game_gets_one_error() {
        let (handle, _cancel) = start_lobby(test_config());
        let mut alice = connect(&handle, "alice").await;

        send(&mut alice, r#"{"type":2,"gameId":42}"#).await;
        let reply = next_message(&mut alice).await;
        assert_eq!(reply.kind, MessageType::SocketError);
        assert!(reply.info.unwrap().contains("42"));

        send(&mut alice, r#"{"type":11}"#).await;
        let next = next_message(&mut alice).await;
        assert_eq!(next.kind, MessageType::GameInfos, "only one error was sent");
    }

    #[tokio::test]
    async fn test_delete_without_game_gets_one_error() {
        let (handle, _cancel) = start_lobby(test_config());
        let mut alice = connect(&handle, "alice").await;

        send(&mut alice, r#"{"type":4,"gameId":7}"#).await;
        assert_eq!(next_message(&mut alice).await.kind, MessageType::SocketError);
        send(&mut alice, r#"{"type":11}"#).await;
        assert_eq!(next_message(&mut alice).await.kind, MessageType::GameInfos);
    }

    #[tokio::test]
    async fn test_game_limit_is_a_warning() {
        let (handle, _cancel) = start_lobby(test_config());
        let mut alice = connect(&handle, "alice").await;
        for _ in 0..2 {
            send(&mut alice, CREATE).await;
            next_of(&mut alice, MessageType::JoinGame).await;
        }
        send(&mut alice, CREATE).await;
        let refused = next_of(&mut alice, MessageType::SocketWarning).await;
        assert!(refused.info.unwrap().contains("2 games"));
    }

    #[tokio::test]
    async fn test_player_socket_limit() {
        let (handle, _cancel) = start_lobby(test_config());
        let _alice = connect(&handle, "alice").await;

        let (result, mut second) = try_connect(&handle, "alice").await;
        assert!(matches!(
            result,
            Err(LobbyError::TooManyPlayerSockets { max: 1, .. })
        ));
        assert_eq!(next_message(&mut second).await.kind, MessageType::SocketError);
    }

    #[tokio::test]
    async fn test_lobby_socket_limit() {
        let (handle, _cancel) = start_lobby(test_config());
        let _alice = connect(&handle, "alice").await;
        let _bob = connect(&handle, "bob").await;
        let _carol = connect(&handle, "carol").await;

        let (result, _dave) = try_connect(&handle, "dave").await;
        assert!(matches!(result, Err(LobbyError::TooManySockets { max: 3 })));
    }

    #[tokio::test]
    async fn test_missing_player_name() {
        let (handle, _cancel) = start_lobby(test_config());
        let (result, _client) = try_connect(&handle, " ").await;
        assert!(matches!(result, Err(LobbyError::MissingPlayerName)));
    }

    #[tokio::test]
    async fn test_closed_socket_frees_its_slot() {
        let (handle, _cancel) = start_lobby(test_config());
        let mut alice = connect(&handle, "alice").await;
        alice.close(None).await.unwrap();

        let mut admitted = false;
        for _ in 0..50 {
            let (result, _client) = try_connect(&handle, "alice").await;
            if result.is_ok() {
                admitted = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(admitted);
    }

    #[tokio::test]
    async fn test_leave_game_is_acknowledged() {
        let (handle, _cancel) = start_lobby(test_config());
        let mut alice = connect(&handle, "alice").await;
        send(&mut alice, CREATE).await;
        next_of(&mut alice, MessageType::JoinGame).await;

        send(&mut alice, r#"{"type":3}"#).await;
        let left = next_of(&mut alice, MessageType::LeaveGame).await;
        assert_eq!(left.game_id, Some(1));

        send(&mut alice, r#"{"type":6}"#).await;
        assert_eq!(
            next_of(&mut alice, MessageType::SocketError).await.kind,
            MessageType::SocketError
        );
    }

    #[tokio::test]
    async fn test_chat_reaches_every_player_in_game() {
        let (handle, _cancel) = start_lobby(test_config());
        let mut alice = connect(&handle, "alice").await;
        let mut bob = connect(&handle, "bob").await;

        send(&mut alice, CREATE).await;
        next_of(&mut alice, MessageType::JoinGame).await;
        send(&mut bob, r#"{"type":2,"gameId":1}"#).await;
        next_of(&mut bob, MessageType::JoinGame).await;

        send(&mut bob, r#"{"type":9,"info":"hello"}"#).await;
        let heard = next_of(&mut alice, MessageType::GameChat).await;
        assert_eq!(heard.info.as_deref(), Some("bob: hello"));
        let echoed = next_of(&mut bob, MessageType::GameChat).await;
        assert_eq!(echoed.info.as_deref(), Some("bob: hello"));
    }

    #[tokio::test]
    async fn test_game_message_without_socket_is_dropped() {
        let (handle, _cancel) = start_lobby(test_config());
        let mut alice = connect(&handle, "alice").await;
        let mut bob = connect(&handle, "bob").await;

        send(&mut alice, CREATE).await;
        next_of(&mut alice, MessageType::JoinGame).await;
        send(&mut bob, r#"{"type":2,"gameId":1}"#).await;
        next_of(&mut bob, MessageType::JoinGame).await;
        send(&mut bob, r#"{"type":3}"#).await;
        next_of(&mut bob, MessageType::LeaveGame).await;

        send(&mut alice, r#"{"type":9,"info":"anyone?"}"#).await;
        let echoed = next_of(&mut alice, MessageType::GameChat).await;
        assert_eq!(echoed.info.as_deref(), Some("alice: anyone?"));

        // bob is still a player but has no socket in the game
        send(&mut bob, r#"{"type":6}"#).await;
        loop {
            let m = next_message(&mut bob).await;
            assert_ne!(m.kind, MessageType::GameChat);
            if m.kind == MessageType::SocketError {
                break;
            }
        }
    }

    #[tokio::test]
    async fn test_delete_game_clears_it_everywhere() {
        let (handle, _cancel) = start_lobby(test_config());
        let mut alice = connect(&handle, "alice").await;
        send(&mut alice, CREATE).await;
        next_of(&mut alice, MessageType::JoinGame).await;

        send(&mut alice, r#"{"type":4}"#).await;
        let left = next_of(&mut alice, MessageType::LeaveGame).await;
        assert_eq!(left.game_id, Some(1));
        loop {
            let infos = next_of(&mut alice, MessageType::GameInfos).await;
            if infos.games == Some(Vec::new()) {
                break;
            }
        }

        send(&mut alice, CREATE).await;
        let join = next_of(&mut alice, MessageType::JoinGame).await;
        assert_eq!(join.game_id, Some(1), "the id is free again");
    }

    #[tokio::test]
    async fn test_cancel_closes_sockets() {
        let (handle, cancel) = start_lobby(test_config());
        let mut alice = connect(&handle, "alice").await;
        cancel.cancel();

        let ended = timeout(Duration::from_secs(5), async {
            loop {
                match alice.next().await {
                    None | Some(Err(_)) | Some(Ok(WsMessage::Close(_))) => break,
                    Some(Ok(_)) => continue,
                }
            }
        })
        .await;
        assert!(ended.is_ok());
    }
}
