//! Wire envelope exchanged between clients, sockets, the lobby and games.
//!
//! Every message is a JSON object with an integer `type` field. All payload
//! fields are optional and omitted when empty, so one struct covers every
//! action and event.

use crate::{
    BoardConfig, GameId, GameInfo, GameRules, SocketId, Tile, TilePosition, UnknownDiscriminant,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum MessageType {
    CreateGame = 1,
    JoinGame = 2,
    LeaveGame = 3,
    DeleteGame = 4,
    ChangeGameStatus = 5,
    SnagGameTile = 6,
    SwapGameTile = 7,
    MoveGameTiles = 8,
    GameChat = 9,
    RefreshGameBoard = 10,
    GameInfos = 11,
    SocketInfo = 12,
    SocketWarning = 13,
    SocketError = 14,
    SocketHttpPing = 15,
    GameInfoChanged = 16,
    GameDeleted = 17,
}

impl MessageType {
    const ALL: [MessageType; 17] = [
        MessageType::CreateGame,
        MessageType::JoinGame,
        MessageType::LeaveGame,
        MessageType::DeleteGame,
        MessageType::ChangeGameStatus,
        MessageType::SnagGameTile,
        MessageType::SwapGameTile,
        MessageType::MoveGameTiles,
        MessageType::GameChat,
        MessageType::RefreshGameBoard,
        MessageType::GameInfos,
        MessageType::SocketInfo,
        MessageType::SocketWarning,
        MessageType::SocketError,
        MessageType::SocketHttpPing,
        MessageType::GameInfoChanged,
        MessageType::GameDeleted,
    ];

    /// Traffic that only exists to keep the connection open.
    pub fn is_keepalive(self) -> bool {
        self == MessageType::SocketHttpPing
    }
}

impl From<MessageType> for u8 {
    fn from(kind: MessageType) -> u8 {
        kind as u8
    }
}

impl TryFrom<u8> for MessageType {
    type Error = UnknownDiscriminant;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        MessageType::ALL
            .into_iter()
            .find(|kind| *kind as u8 == value)
            .ok_or(UnknownDiscriminant {
                kind: "message type",
                value,
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game: Option<GameInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub games: Option<Vec<GameInfo>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tiles: Option<Vec<Tile>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tile_positions: Option<Vec<TilePosition>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tiles_left: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_id: Option<GameId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub board_config: Option<BoardConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_rules: Option<GameRules>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_boards: Option<BTreeMap<String, Vec<TilePosition>>>,
    /// Connection a reply is addressed to. Never leaves the server.
    #[serde(skip)]
    pub socket_id: Option<SocketId>,
}

impl Message {
    pub fn new(kind: MessageType) -> Self {
        Self {
            kind,
            info: None,
            game: None,
            games: None,
            tiles: None,
            tile_positions: None,
            tiles_left: None,
            game_id: None,
            player_name: None,
            board_config: None,
            game_rules: None,
            rules: None,
            final_boards: None,
            socket_id: None,
        }
    }

    pub fn with_info(mut self, info: impl Into<String>) -> Self {
        self.info = Some(info.into());
        self
    }

    pub fn with_game_id(mut self, game_id: GameId) -> Self {
        self.game_id = Some(game_id);
        self
    }

    /// Addresses the message to one player, optionally pinned to one of
    /// their connections.
    pub fn for_player(mut self, player_name: impl Into<String>, socket_id: Option<SocketId>) -> Self {
        self.player_name = Some(player_name.into());
        self.socket_id = socket_id;
        self
    }

    pub fn warning(info: impl Into<String>) -> Self {
        Message::new(MessageType::SocketWarning).with_info(info)
    }

    pub fn error(info: impl Into<String>) -> Self {
        Message::new(MessageType::SocketError).with_info(info)
    }

    /// Builds the reply addressed back to the sender of `self`.
    pub fn reply(&self, kind: MessageType) -> Message {
        let mut reply = Message::new(kind);
        reply.game_id = self.game_id;
        reply.player_name = self.player_name.clone();
        reply.socket_id = self.socket_id;
        reply
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GameStatus;

    #[test]
    fn test_type_is_integer_on_the_wire() {
        let json = serde_json::to_string(&Message::new(MessageType::SnagGameTile)).unwrap();
        assert_eq!(json, r#"{"type":6}"#);
    }

    #[test]
    fn test_every_type_has_unique_discriminant() {
        for (i, kind) in MessageType::ALL.iter().enumerate() {
            assert_eq!(*kind as usize, i + 1);
            assert_eq!(MessageType::try_from(*kind as u8), Ok(*kind));
        }
        assert!(MessageType::try_from(0).is_err());
        assert!(MessageType::try_from(18).is_err());
    }

    #[test]
    fn test_decode_client_move() {
        let json = r#"{"type":8,"tilePositions":[{"tile":{"id":3,"ch":"Q"},"x":4,"y":5}]}"#;
        let message: Message = serde_json::from_str(json).unwrap();
        assert_eq!(message.kind, MessageType::MoveGameTiles);
        let positions = message.tile_positions.unwrap();
        assert_eq!(positions, vec![TilePosition::new(Tile::new(3, 'Q'), 4, 5)]);
        assert_eq!(message.socket_id, None);
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        assert!(serde_json::from_str::<Message>(r#"{"type":99}"#).is_err());
        assert!(serde_json::from_str::<Message>(r#"{"info":"x"}"#).is_err());
    }

    #[test]
    fn test_socket_id_is_not_serialized() {
        let message = Message::warning("careful").for_player("alice", Some(7));
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["type"], 13);
        assert_eq!(json["info"], "careful");
        assert_eq!(json["playerName"], "alice");
        assert!(json.get("socketId").is_none());
    }

    #[test]
    fn test_game_info_fields_are_camel_case() {
        let mut message = Message::new(MessageType::GameInfos);
        message.games = Some(vec![GameInfo {
            id: 2,
            status: GameStatus::NotStarted,
            players: vec!["bob".to_string()],
            capacity: 4,
            created_at: 1000,
        }]);
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["games"][0]["createdAt"], 1000);
        assert_eq!(json["games"][0]["status"], 1);
    }

    #[test]
    fn test_reply_keeps_routing() {
        let request = Message::new(MessageType::SnagGameTile)
            .with_game_id(3)
            .for_player("carol", Some(11));
        let reply = request.reply(MessageType::SocketWarning);
        assert_eq!(reply.kind, MessageType::SocketWarning);
        assert_eq!(reply.game_id, Some(3));
        assert_eq!(reply.player_name.as_deref(), Some("carol"));
        assert_eq!(reply.socket_id, Some(11));
    }
}
