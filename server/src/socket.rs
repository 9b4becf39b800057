//! One player connection.
//!
//! A socket runs two tasks over a split WebSocket: the reader decodes frames
//! into [`Message`]s for the lobby and the writer encodes messages the lobby
//! queued for the player. They share no state beyond two watch channels and a
//! cancellation token, and whichever exits first stops the other.

use crate::error::SocketError;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use shared::{GameId, Message, MessageType, SocketId};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, timeout, Instant};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy)]
pub struct SocketConfig {
    /// Longest wait for any frame, pongs included.
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    /// WebSocket ping interval. Must be shorter than `read_timeout`.
    pub ping_period: Duration,
    /// Interval of the `SocketHttpPing` hint that keeps the client's session alive.
    pub http_ping_period: Duration,
    /// The connection is closed when no player traffic happens for a whole period.
    pub idle_period: Duration,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(10),
            ping_period: Duration::from_secs(54),
            http_ping_period: Duration::from_secs(10 * 60),
            idle_period: Duration::from_secs(15 * 60),
        }
    }
}

impl SocketConfig {
    pub fn validate(&self) -> Result<(), SocketError> {
        let periods = [
            ("read timeout", self.read_timeout),
            ("write timeout", self.write_timeout),
            ("ping period", self.ping_period),
            ("http ping period", self.http_ping_period),
            ("idle period", self.idle_period),
        ];
        if let Some((name, _)) = periods.iter().find(|(_, period)| period.is_zero()) {
            return Err(SocketError::NonPositivePeriod(name));
        }
        if self.ping_period >= self.read_timeout {
            return Err(SocketError::PingTooSlow {
                ping: self.ping_period,
                read: self.read_timeout,
            });
        }
        Ok(())
    }
}

/// What a socket reports to the lobby.
#[derive(Debug)]
pub enum SocketEvent {
    Inbound(Message),
    /// Sent once, after both tasks have stopped.
    Closed {
        player_name: String,
        socket_id: SocketId,
    },
}

#[derive(Debug, Clone)]
pub struct Socket {
    id: SocketId,
    player_name: String,
    config: SocketConfig,
}

impl Socket {
    pub fn new(
        id: SocketId,
        player_name: impl Into<String>,
        config: SocketConfig,
    ) -> Result<Self, SocketError> {
        config.validate()?;
        Ok(Self {
            id,
            player_name: player_name.into(),
            config,
        })
    }

    /// Runs the connection until either side stops, then reports
    /// [`SocketEvent::Closed`].
    pub async fn run<S>(
        self,
        ws: WebSocketStream<S>,
        events: mpsc::Sender<SocketEvent>,
        outbound: mpsc::Receiver<Message>,
        cancel: CancellationToken,
    ) where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, stream) = ws.split();
        let (activity_tx, activity_rx) = watch::channel(());
        let (game_tx, game_rx) = watch::channel(None);

        let reader = tokio::spawn(self.clone().read_loop(
            stream,
            events.clone(),
            activity_tx,
            game_rx,
            cancel.clone(),
        ));
        let writer = tokio::spawn(self.clone().write_loop(
            sink,
            outbound,
            activity_rx,
            game_tx,
            cancel.clone(),
        ));

        let (read_result, write_result) = tokio::join!(reader, writer);
        if let Err(e) = read_result {
            error!("Socket {} reader panicked: {}", self.id, e);
        }
        match write_result {
            Ok(Err(e)) => warn!("Socket {} for {} stopped writing: {}", self.id, self.player_name, e),
            Err(e) => error!("Socket {} writer panicked: {}", self.id, e),
            Ok(Ok(())) => {}
        }

        info!("Socket {} for {} closed", self.id, self.player_name);
        let closed = SocketEvent::Closed {
            player_name: self.player_name,
            socket_id: self.id,
        };
        if events.send(closed).await.is_err() {
            debug!("Lobby was gone before socket {} closed", self.id);
        }
    }

    async fn read_loop<S>(
        self,
        mut stream: SplitStream<WebSocketStream<S>>,
        events: mpsc::Sender<SocketEvent>,
        activity: watch::Sender<()>,
        game_id: watch::Receiver<Option<GameId>>,
        cancel: CancellationToken,
    ) where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break,
                next = timeout(self.config.read_timeout, stream.next()) => next,
            };
            let frame = match next {
                Err(_) => {
                    info!("Socket {} timed out waiting for {}", self.id, self.player_name);
                    break;
                }
                Ok(None) => break,
                Ok(Some(Err(e))) => {
                    warn!("Socket {} read failed: {}", self.id, e);
                    break;
                }
                Ok(Some(Ok(frame))) => frame,
            };

            let decoded = match frame {
                WsMessage::Text(text) => serde_json::from_str::<Message>(text.as_str()),
                WsMessage::Binary(bytes) => serde_json::from_slice::<Message>(&bytes),
                WsMessage::Close(_) => break,
                _ => continue,
            };
            let mut message = match decoded {
                Ok(message) => message,
                Err(e) => {
                    warn!("Socket {} sent an undecodable message: {}", self.id, e);
                    break;
                }
            };

            message.player_name = Some(self.player_name.clone());
            message.socket_id = Some(self.id);
            if message.kind != MessageType::JoinGame || message.game_id.is_none() {
                message.game_id = *game_id.borrow();
            }
            if !message.kind.is_keepalive() {
                activity.send_replace(());
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                sent = events.send(SocketEvent::Inbound(message)) => {
                    if sent.is_err() {
                        debug!("Lobby stopped listening to socket {}", self.id);
                        break;
                    }
                }
            }
        }
        cancel.cancel();
    }

    async fn write_loop<S>(
        self,
        mut sink: SplitSink<WebSocketStream<S>, WsMessage>,
        mut outbound: mpsc::Receiver<Message>,
        mut activity: watch::Receiver<()>,
        game_id: watch::Sender<Option<GameId>>,
        cancel: CancellationToken,
    ) -> Result<(), SocketError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let start = Instant::now();
        let mut ping = interval_at(start + self.config.ping_period, self.config.ping_period);
        let mut http_ping = interval_at(
            start + self.config.http_ping_period,
            self.config.http_ping_period,
        );
        let mut idle = interval_at(start + self.config.idle_period, self.config.idle_period);
        let mut active = false;

        let result = loop {
            let written = tokio::select! {
                _ = cancel.cancelled() => break Ok(()),
                next = outbound.recv() => {
                    let Some(message) = next else {
                        break Ok(());
                    };
                    track_game(&game_id, &message);
                    if !message.kind.is_keepalive() {
                        active = true;
                    }
                    self.write_message(&mut sink, &message).await
                }
                _ = ping.tick() => self.write_frame(&mut sink, WsMessage::Ping(Default::default())).await,
                _ = http_ping.tick() => {
                    self.write_message(&mut sink, &Message::new(MessageType::SocketHttpPing)).await
                }
                _ = idle.tick() => {
                    let read_active = activity.has_changed().unwrap_or(false);
                    if !active && !read_active {
                        info!("Closing idle socket {} for {}", self.id, self.player_name);
                        break Ok(());
                    }
                    active = false;
                    activity.mark_unchanged();
                    Ok(())
                }
            };
            if let Err(e) = written {
                break Err(e);
            }
        };

        drop(outbound);
        cancel.cancel();
        if timeout(self.config.write_timeout, sink.close()).await.is_err() {
            debug!("Socket {} timed out sending close", self.id);
        }
        result
    }

    async fn write_message<S>(
        &self,
        sink: &mut SplitSink<WebSocketStream<S>, WsMessage>,
        message: &Message,
    ) -> Result<(), SocketError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let text = serde_json::to_string(message)?;
        self.write_frame(sink, WsMessage::text(text)).await
    }

    async fn write_frame<S>(
        &self,
        sink: &mut SplitSink<WebSocketStream<S>, WsMessage>,
        frame: WsMessage,
    ) -> Result<(), SocketError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        match timeout(self.config.write_timeout, sink.send(frame)).await {
            Ok(sent) => Ok(sent?),
            Err(_) => Err(SocketError::WriteTimeout),
        }
    }
}

// Follow the game the player is in from the replies the lobby sends out
fn track_game(game_id: &watch::Sender<Option<GameId>>, message: &Message) {
    match message.kind {
        MessageType::JoinGame if message.game_id.is_some() => {
            game_id.send_replace(message.game_id);
        }
        MessageType::LeaveGame => {
            game_id.send_if_modified(|current| {
                if message.game_id.is_none() || *current == message.game_id {
                    *current = None;
                    true
                } else {
                    false
                }
            });
        }
        _ => {}
    }
}
