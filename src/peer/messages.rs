//! Application messages carried over the peer data channel
//!
//! Every frame is a JSON object `{"type": ..., "payload": ...}`. Frames are
//! decoded here, at the boundary, and anything that does not fit one of the
//! known variants is rejected.

use crate::error::{MatchmakingError, Result};
use serde::{Deserialize, Serialize};

/// Name of the data channel both peers open
pub const DATA_CHANNEL_LABEL: &str = "chess-moves";

/// A move as produced by the external rules engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovePayload {
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub san: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fen: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promotion: Option<String>,
}

impl MovePayload {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            san: None,
            fen: None,
            promotion: None,
        }
    }

    pub fn with_san(mut self, san: impl Into<String>) -> Self {
        self.san = Some(san.into());
        self
    }

    pub fn with_promotion(mut self, piece: impl Into<String>) -> Self {
        self.promotion = Some(piece.into());
        self
    }

    fn validate(&self) -> Result<()> {
        for square in [&self.from, &self.to] {
            if !is_square(square) {
                return Err(MatchmakingError::validation(format!(
                    "Invalid square in move: {}",
                    square
                ))
                .into());
            }
        }
        if let Some(piece) = &self.promotion {
            if !matches!(piece.as_str(), "q" | "r" | "b" | "n") {
                return Err(MatchmakingError::validation(format!(
                    "Invalid promotion piece: {}",
                    piece
                ))
                .into());
            }
        }
        Ok(())
    }
}

fn is_square(square: &str) -> bool {
    let bytes = square.as_bytes();
    bytes.len() == 2 && (b'a'..=b'h').contains(&bytes[0]) && (b'1'..=b'8').contains(&bytes[1])
}

/// Game-level signals that are not moves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlAction {
    Resign,
    OfferDraw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameControl {
    pub action: ControlAction,
}

impl GameControl {
    pub fn resign() -> Self {
        Self {
            action: ControlAction::Resign,
        }
    }

    pub fn offer_draw() -> Self {
        Self {
            action: ControlAction::OfferDraw,
        }
    }
}

/// One data-channel frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum PeerMessage {
    Move(MovePayload),
    GameControl(GameControl),
}

impl PeerMessage {
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self).map_err(MatchmakingError::from)?)
    }

    /// Parse and validate a frame received from the remote peer
    pub fn decode(raw: &str) -> Result<Self> {
        let message: PeerMessage = serde_json::from_str(raw).map_err(MatchmakingError::from)?;
        if let PeerMessage::Move(payload) = &message {
            payload.validate()?;
        }
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_move_frame_shape() {
        let frame = PeerMessage::Move(MovePayload::new("e2", "e4").with_san("e4"))
            .encode()
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["type"], "move");
        assert_eq!(value["payload"]["from"], "e2");
        assert_eq!(value["payload"]["san"], "e4");
        assert!(value["payload"].get("promotion").is_none());
    }

    #[test]
    fn test_decode_browser_move_frame() {
        let raw = r#"{"type":"move","payload":{"from":"e7","to":"e8","promotion":"q","fen":"4Q3/8/8/8/8/8/8/4k2K b - - 0 1"}}"#;
        let message = PeerMessage::decode(raw).unwrap();
        match message {
            PeerMessage::Move(payload) => {
                assert_eq!(payload.to, "e8");
                assert_eq!(payload.promotion.as_deref(), Some("q"));
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_game_control_frame() {
        let raw = r#"{"type":"game_control","payload":{"action":"offer_draw"}}"#;
        assert_eq!(
            PeerMessage::decode(raw).unwrap(),
            PeerMessage::GameControl(GameControl::offer_draw())
        );
    }

    #[test]
    fn test_unknown_frames_are_rejected() {
        assert!(PeerMessage::decode(r#"{"type":"chat","payload":"hi"}"#).is_err());
        assert!(PeerMessage::decode(r#"{"type":"game_control","payload":{"action":"pause"}}"#).is_err());
        assert!(PeerMessage::decode("not json").is_err());
    }

    #[test]
    fn test_invalid_move_is_rejected() {
        let err = PeerMessage::decode(r#"{"type":"move","payload":{"from":"z9","to":"e4"}}"#)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MatchmakingError>(),
            Some(MatchmakingError::Validation { .. })
        ));

        let err = PeerMessage::decode(
            r#"{"type":"move","payload":{"from":"e7","to":"e8","promotion":"k"}}"#,
        )
        .unwrap_err();
        assert!(err.downcast_ref::<MatchmakingError>().is_some());
    }
}
