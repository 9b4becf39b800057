//! # Tile Race Server Library
//!
//! This library hosts the real-time runtime for a multiplayer tile race word
//! game. Players connect over WebSocket, create or join games, and race to
//! arrange their letter tiles into one connected crossword while drawing from
//! a shared pool.
//!
//! ## Core Responsibilities
//!
//! ### Connection Lifecycle
//! Every connection is a [`socket::Socket`] with its own reader and writer
//! task. Sockets decode JSON messages, keep the connection alive with pings,
//! and close themselves on timeouts, idleness, or bad input.
//!
//! ### Routing
//! The [`lobby::Lobby`] is the only place where connections and games meet.
//! It admits connections under the configured limits, hands game requests to
//! the [`runner::Runner`], and routes game replies back to the right player
//! connections.
//!
//! ### Game Rules
//! Each [`game::Game`] is an independent task owning the shared tile pool and
//! every player's [`shared::Board`]. It enforces the game state machine,
//! validates boards against a [`words::WordValidator`], and records points
//! through a [`points::PointsStore`] when someone wins.
//!
//! ## Architecture Design
//!
//! ### Actors Instead Of Locks
//! The lobby, each game, and each socket run as separate tokio tasks that
//! only communicate over channels. Registries are owned by exactly one task,
//! so no table is ever shared behind a mutex.
//!
//! ### Backpressure
//! Client-facing channels are bounded, so a slow consumer stalls its producer
//! instead of buffering without limit. Games report to the lobby on an
//! unbounded channel, which keeps the lobby and game queues from waiting on
//! each other.
//!
//! ### Cancellation
//! Shutdown flows down a tree of cancellation tokens: cancelling the lobby
//! stops every socket and game, while a single socket or game stopping never
//! affects its siblings.
//!
//! ## Module Organization
//!
//! - `socket`: connection reader/writer tasks and keepalive timers
//! - `lobby`: admission, registries, and message routing
//! - `runner`: game creation, id allocation, and teardown
//! - `game`: rules, tile pool, and per-player boards
//! - `words`: dictionary lookups
//! - `points`: persistence of awarded points
//! - `shuffle`: random, seeded, or fixed tile ordering
//! - `error`: error types for every component
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::game::GameServices;
//! use server::lobby::{Lobby, LobbyConfig};
//! use server::points::InMemoryPoints;
//! use server::words::WordList;
//! use std::sync::Arc;
//! use tokio::net::TcpStream;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let services = GameServices {
//!         words: Arc::new(WordList::load("words.txt")?),
//!         points: Arc::new(InMemoryPoints::new()),
//!     };
//!     let cancel = CancellationToken::new();
//!     let (lobby, handle) =
//!         Lobby::<TcpStream>::new(LobbyConfig::default(), services, cancel.clone())?;
//!     tokio::spawn(lobby.run());
//!
//!     // Hand upgraded connections to `handle.add_socket(name, ws)`.
//!     # let _ = handle;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod game;
pub mod lobby;
pub mod points;
pub mod runner;
pub mod shuffle;
pub mod socket;
pub mod utils;
pub mod words;
