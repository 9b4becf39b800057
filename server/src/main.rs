use clap::Parser;
use log::{error, info, warn};
use server::error::LobbyError;
use server::game::{GameServices, GameSettings};
use server::lobby::{Lobby, LobbyConfig, LobbyHandle};
use server::points::InMemoryPoints;
use server::runner::RunnerConfig;
use server::shuffle::ShuffleMode;
use server::socket::SocketConfig;
use server::utils::query_param;
use server::words::WordList;
use shared::SocketId;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_util::sync::CancellationToken;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Main-method of the application.
/// Parses command-line arguments, starts the lobby, then accepts WebSocket connections until Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long, default_value = "127.0.0.1")]
        host: String,
        /// Server port to listen on
        #[clap(short, long, default_value = "8080")]
        port: u16,
        /// Newline separated list of valid words
        #[clap(short, long, default_value = "words.txt")]
        words: PathBuf,
        /// Maximum number of games running at once
        #[clap(long, default_value = "64")]
        max_games: usize,
        /// Maximum number of open connections
        #[clap(long, default_value = "1024")]
        max_sockets: usize,
        /// Maximum number of open connections per player
        #[clap(long, default_value = "3")]
        max_player_sockets: usize,
        /// Maximum number of players in one game
        #[clap(long, default_value = "8")]
        max_players: usize,
        /// Tiles each player starts with
        #[clap(long, default_value = "21")]
        tiles_per_player: usize,
        /// Points the winner of a game earns
        #[clap(long, default_value = "10", value_parser = clap::value_parser!(u32).range(1..))]
        win_points: u32,
        /// Seconds without activity before a game is deleted
        #[clap(long, default_value = "3600")]
        game_idle_secs: u64,
        /// Seconds to wait for any frame from a client
        #[clap(long, default_value = "60")]
        read_timeout_secs: u64,
        /// Seconds allowed for writing one frame to a client
        #[clap(long, default_value = "10")]
        write_timeout_secs: u64,
        /// Seconds between WebSocket pings
        #[clap(long, default_value = "54")]
        ping_secs: u64,
        /// Seconds between keepalive hints to the client
        #[clap(long, default_value = "600")]
        http_ping_secs: u64,
        /// Seconds without player traffic before a connection is closed
        #[clap(long, default_value = "900")]
        socket_idle_secs: u64,
        /// Seed for deterministic tile shuffling
        #[clap(long)]
        seed: Option<u64>,
    }

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Parse command line arguments
    let args = Args::parse();

    let words = WordList::load(&args.words)
        .map_err(|e| format!("could not read {}: {}", args.words.display(), e))?;
    info!("Loaded {} words from {}", words.len(), args.words.display());

    let config = LobbyConfig {
        max_sockets: args.max_sockets,
        max_player_sockets: args.max_player_sockets,
        socket: SocketConfig {
            read_timeout: Duration::from_secs(args.read_timeout_secs),
            write_timeout: Duration::from_secs(args.write_timeout_secs),
            ping_period: Duration::from_secs(args.ping_secs),
            http_ping_period: Duration::from_secs(args.http_ping_secs),
            idle_period: Duration::from_secs(args.socket_idle_secs),
        },
        runner: RunnerConfig {
            max_games: args.max_games,
            game: GameSettings {
                max_players: args.max_players,
                num_new_tiles: args.tiles_per_player,
                idle_period: Duration::from_secs(args.game_idle_secs),
                win_points: args.win_points,
                shuffle: args.seed.map_or(ShuffleMode::Random, ShuffleMode::Seeded),
                ..GameSettings::default()
            },
            ..RunnerConfig::default()
        },
        ..LobbyConfig::default()
    };
    let services = GameServices {
        words: Arc::new(words),
        points: Arc::new(InMemoryPoints::new()),
    };

    let cancel = CancellationToken::new();
    let (lobby, handle) = Lobby::<TcpStream>::new(config, services, cancel.clone())?;
    let lobby_task = tokio::spawn(lobby.run());

    let address = format!("{}:{}", args.host, args.port);
    let listener = TcpListener::bind(&address).await?;
    info!("Server listening on ws://{}/?name=<player>", address);

    // Handle shutdown gracefully
    tokio::select! {
        _ = accept_connections(listener, handle) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    cancel.cancel();
    if let Err(e) = lobby_task.await {
        error!("Lobby task panicked: {}", e);
    }
    Ok(())
}

async fn accept_connections(listener: TcpListener, lobby: LobbyHandle<TcpStream>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let lobby = lobby.clone();
                tokio::spawn(async move {
                    match handle_connection(stream, lobby).await {
                        Ok(id) => info!("Connection from {} is socket {}", addr, id),
                        Err(e) => warn!("Connection from {} refused: {}", addr, e),
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {}", e);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
    }
}

/// Upgrades a connection, taking the player name from the `name` query parameter.
async fn handle_connection(
    stream: TcpStream,
    lobby: LobbyHandle<TcpStream>,
) -> Result<SocketId, BoxError> {
    let mut player_name = None;
    let ws = accept_hdr_async(stream, |request: &Request, response: Response| {
        match request.uri().query().and_then(|q| query_param(q, "name")) {
            Some(name) => {
                player_name = Some(name);
                Ok(response)
            }
            None => {
                let mut refusal = ErrorResponse::new(Some("missing name query parameter".to_string()));
                *refusal.status_mut() = StatusCode::BAD_REQUEST;
                Err(refusal)
            }
        }
    })
    .await?;

    let player_name = player_name.ok_or(LobbyError::MissingPlayerName)?;
    Ok(lobby.add_socket(player_name, ws).await?)
}
