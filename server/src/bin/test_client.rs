use clap::Parser;
use futures::{SinkExt, StreamExt};
use shared::{BoardConfig, GameInfo, GameRules, GameStatus, Message, MessageType, Tile, TilePosition};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

const HELP: &str = "commands: create | join <id> | leave | delete | start | finish | snag \
| swap <tileId> <letter> | move <tileId> <letter> <x> <y> | chat <text> | refresh | games | quit";

// Turn one line of input into a request, or explain why it could not be
fn parse_command(line: &str) -> Result<Option<Message>, String> {
    let mut words = line.split_whitespace();
    let Some(command) = words.next() else {
        return Ok(None);
    };
    let rest: Vec<&str> = words.collect();

    let message = match command {
        "create" => {
            let mut m = Message::new(MessageType::CreateGame);
            m.board_config = Some(BoardConfig::default());
            m.game_rules = Some(GameRules::default());
            m
        }
        "join" => {
            let id = rest
                .first()
                .and_then(|id| id.parse().ok())
                .ok_or("join needs a game id")?;
            Message::new(MessageType::JoinGame).with_game_id(id)
        }
        "leave" => Message::new(MessageType::LeaveGame),
        "delete" => Message::new(MessageType::DeleteGame),
        "start" => with_status(GameStatus::InProgress),
        "finish" => with_status(GameStatus::Finished),
        "snag" => Message::new(MessageType::SnagGameTile),
        "swap" => {
            let mut m = Message::new(MessageType::SwapGameTile);
            m.tiles = Some(vec![parse_tile(&rest)?]);
            m
        }
        "move" => {
            let tile = parse_tile(&rest)?;
            let coords: Vec<i32> = rest
                .iter()
                .skip(2)
                .filter_map(|c| c.parse().ok())
                .collect();
            let [x, y] = coords[..] else {
                return Err("move needs x and y".to_string());
            };
            let mut m = Message::new(MessageType::MoveGameTiles);
            m.tile_positions = Some(vec![TilePosition::new(tile, x, y)]);
            m
        }
        "chat" => Message::new(MessageType::GameChat).with_info(rest.join(" ")),
        "refresh" => Message::new(MessageType::RefreshGameBoard),
        "games" => Message::new(MessageType::GameInfos),
        other => return Err(format!("unknown command {:?}", other)),
    };
    Ok(Some(message))
}

fn parse_tile(args: &[&str]) -> Result<Tile, String> {
    let id = args
        .first()
        .and_then(|id| id.parse().ok())
        .ok_or("missing tile id")?;
    let letter = args
        .get(1)
        .and_then(|l| l.chars().next())
        .ok_or("missing tile letter")?;
    Ok(Tile::new(id, letter.to_ascii_uppercase()))
}

fn with_status(status: GameStatus) -> Message {
    let mut m = Message::new(MessageType::ChangeGameStatus);
    m.game = Some(GameInfo {
        id: 0,
        status,
        players: Vec::new(),
        capacity: 0,
        created_at: 0,
    });
    m
}

fn print_message(m: &Message) {
    println!("<- {:?}", m.kind);
    if let Some(info) = &m.info {
        println!("   {}", info);
    }
    if let Some(games) = &m.games {
        for g in games {
            println!("   game {} ({}) players {:?} of {}", g.id, g.status, g.players, g.capacity);
        }
    }
    if let Some(tiles) = &m.tiles {
        let hand: Vec<String> = tiles.iter().map(|t| format!("{}:{}", t.id, t.letter)).collect();
        println!("   tiles {}", hand.join(" "));
    }
    if let Some(positions) = &m.tile_positions {
        for p in positions {
            println!("   {}:{} at ({}, {})", p.tile.id, p.tile.letter, p.x, p.y);
        }
    }
    if let Some(left) = m.tiles_left {
        println!("   {} tiles left", left);
    }
    if let Some(boards) = &m.final_boards {
        for (player, tiles) in boards {
            println!("   {} finished with {} tiles", player, tiles.len());
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server address
        #[clap(short = 'H', long, default_value = "127.0.0.1:8080")]
        host: String,
        /// Player name to connect as
        #[clap(short, long)]
        name: String,
    }

    let args = Args::parse();
    let url = format!("ws://{}/?name={}", args.host, args.name);
    println!("Connecting to {}", url);
    let (ws, _) = connect_async(url.as_str()).await?;
    let (mut sink, mut stream) = ws.split();
    println!("{}", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            frame = stream.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => match serde_json::from_str::<Message>(text.as_str()) {
                        Ok(m) if m.kind.is_keepalive() => {}
                        Ok(m) => print_message(&m),
                        Err(e) => println!("Failed to decode message: {}", e),
                    },
                    Some(Ok(WsMessage::Close(_))) | None => {
                        println!("Server closed the connection");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        println!("Connection error: {}", e);
                        break;
                    }
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                if line.trim() == "quit" {
                    break;
                }
                match parse_command(&line) {
                    Ok(Some(m)) => {
                        println!("-> {:?}", m.kind);
                        sink.send(WsMessage::text(serde_json::to_string(&m)?)).await?;
                    }
                    Ok(None) => {}
                    Err(e) => println!("{}\n{}", e, HELP),
                }
            }
        }
    }

    sink.close().await?;
    println!("Test client finished");
    Ok(())
}
