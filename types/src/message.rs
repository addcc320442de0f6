use crate::session::{SessionSnapshot, Winner};
use crate::{PrizeId, SessionPhase};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rejection taxonomy surfaced to the originating controller. Rejections are
/// never broadcast and leave session state untouched, except
/// `upstream_unavailable` during save which leaves the lock held for retry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    #[error("invalid_state")]
    InvalidState,
    #[error("lock_conflict")]
    LockConflict,
    #[error("capacity_exceeded")]
    CapacityExceeded,
    #[error("upstream_unavailable")]
    UpstreamUnavailable,
}

/// Control actions issued by controllers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "data", rename_all = "snake_case")]
pub enum ControlAction {
    SelectPrize {
        prize_id: PrizeId,
    },
    SetDisplayCount {
        display_count: u32,
    },
    Spin {
        prize_id: PrizeId,
        display_count: u32,
    },
    Save {},
    /// Cosmetic side channel, relayed verbatim to all subscribers.
    PlaySound {
        sound_file: String,
    },
}

/// Wire value of the `type` tag carried by every control-action message.
pub const CONTROL_ACTION_TYPE: &str = "control_action";

/// Controller -> coordinator frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlEnvelope {
    ControlAction {
        #[serde(flatten)]
        action: ControlAction,
    },
}

impl ControlEnvelope {
    pub fn new(action: ControlAction) -> Self {
        Self::ControlAction { action }
    }

    pub fn into_action(self) -> ControlAction {
        match self {
            Self::ControlAction { action } => action,
        }
    }
}

/// State-sync events broadcast by a session to every subscriber, in the order
/// the session accepted them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "data", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Announces a draw starting or ending. While spinning, only the winner
    /// count travels; identities are withheld until reveal so laggard
    /// displays cannot leak results early.
    SpinState {
        #[serde(rename = "isSpinning")]
        is_spinning: bool,
        display_count: u32,
    },
    /// The session-owned reveal instant: full winner identities.
    Reveal { winners: Vec<Winner> },
    /// A save committed; prize inventory moved.
    WinnersUpdate {
        prize_id: PrizeId,
        selected_count: u32,
        quantity: u32,
    },
    PrizeSelected {
        #[serde(skip_serializing_if = "Option::is_none")]
        prize_id: Option<PrizeId>,
    },
    DisplayCount { display_count: u32 },
    PlaySound { sound_file: String },
}

/// Coordinator -> subscriber frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Full current state, delivered first on every (re)connect so late
    /// joiners converge without replayed history.
    Snapshot { session: SessionSnapshot },
    ControlAction {
        #[serde(flatten)]
        event: SessionEvent,
    },
    /// Unicast rejection for the originating controller only.
    Error { code: ErrorCode, reason: String },
}

impl ServerMessage {
    pub fn event(event: SessionEvent) -> Self {
        Self::ControlAction { event }
    }

    /// Phase a client mirror should assume after applying this message, if
    /// the message pins one.
    pub fn implied_phase(&self) -> Option<SessionPhase> {
        match self {
            ServerMessage::Snapshot { session } => Some(session.phase),
            ServerMessage::ControlAction { event } => match event {
                SessionEvent::SpinState {
                    is_spinning: true, ..
                } => Some(SessionPhase::Spinning),
                SessionEvent::Reveal { .. } => Some(SessionPhase::Revealed),
                _ => None,
            },
            ServerMessage::Error { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DrawId;

    #[test]
    fn control_action_wire_shape() {
        let envelope = ControlEnvelope::new(ControlAction::Spin {
            prize_id: PrizeId::from("p1"),
            display_count: 5,
        });
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["type"], CONTROL_ACTION_TYPE);
        assert_eq!(json["action"], "spin");
        assert_eq!(json["data"]["prize_id"], "p1");
        assert_eq!(json["data"]["display_count"], 5);
    }

    #[test]
    fn save_parses_with_empty_data() {
        let raw = r#"{"type":"control_action","action":"save","data":{}}"#;
        let envelope: ControlEnvelope = serde_json::from_str(raw).unwrap();
        assert_eq!(envelope.into_action(), ControlAction::Save {});
    }

    #[test]
    fn spin_state_wire_shape() {
        let message = ServerMessage::event(SessionEvent::SpinState {
            is_spinning: true,
            display_count: 4,
        });
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["type"], "control_action");
        assert_eq!(json["action"], "spin_state");
        assert_eq!(json["data"]["isSpinning"], true);
        assert_eq!(json["data"]["display_count"], 4);
    }

    #[test]
    fn snapshot_frame_carries_session() {
        let message = ServerMessage::Snapshot {
            session: SessionSnapshot::new(DrawId::from("d1")),
        };
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["type"], "snapshot");
        assert_eq!(json["session"]["draw_id"], "d1");
    }

    #[test]
    fn error_codes_serialize_snake_case() {
        assert_eq!(
            serde_json::to_value(ErrorCode::LockConflict).unwrap(),
            "lock_conflict"
        );
        assert_eq!(ErrorCode::UpstreamUnavailable.to_string(), "upstream_unavailable");
    }
}
