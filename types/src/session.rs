use crate::{ClientId, DrawId, ParticipantId, PrizeId};
use serde::{Deserialize, Serialize};

/// A participant in the eligible pool of a drawing event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub name: String,
    /// Participants with the flag cleared stay out of every proposal.
    pub eligible: bool,
}

/// A prize with its award inventory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prize {
    pub id: PrizeId,
    pub name: String,
    pub quantity: u32,
    pub selected_count: u32,
}

impl Prize {
    /// Slots not yet committed. `selected_count` never exceeds `quantity`.
    pub fn remaining(&self) -> u32 {
        self.quantity.saturating_sub(self.selected_count)
    }
}

/// The eligibility rule configuration in effect when a proposal was drawn,
/// captured for audit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSnapshot {
    /// Past winners of the same drawing event were excluded from the pool.
    pub no_repeat: bool,
    /// Size of the pool actually sampled from (after exclusions).
    pub pool_size: u32,
    /// Prize `selected_count` at proposal time.
    pub drawn_at_count: u32,
}

/// A winner reference inside a proposal. Order is reveal order, not rank.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Winner {
    pub id: ParticipantId,
    pub name: String,
}

/// A proposed but uncommitted selection. Immutable once created; replayable
/// from `seed`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    /// Hex-encoded random source; the exact sample reproduces from it.
    pub seed: String,
    pub rule: RuleSnapshot,
    pub winners: Vec<Winner>,
}

/// Draw session lifecycle. `Spinning` and `Revealed` together correspond to
/// "locked".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    #[default]
    Idle,
    PrizeSelected,
    Spinning,
    Revealed,
}

impl SessionPhase {
    pub fn is_locked(&self) -> bool {
        matches!(self, SessionPhase::Spinning | SessionPhase::Revealed)
    }
}

/// Full public state of a draw session, delivered to every subscriber on
/// (re)connect and mirrored by clients.
///
/// Winner identities are withheld while `Spinning` (only `pending_count` is
/// visible) and appear in `winners` once `Revealed`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub draw_id: DrawId,
    pub phase: SessionPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_prize: Option<Prize>,
    /// Effective display count: already clamped to the remaining quantity.
    pub display_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_owner: Option<ClientId>,
    /// Number of winners in the pending proposal, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_count: Option<u32>,
    /// Pending winner identities, populated once revealed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winners: Option<Vec<Winner>>,
    /// Winners already persisted for the current prize.
    pub committed_count: u32,
}

impl SessionSnapshot {
    pub fn new(draw_id: DrawId) -> Self {
        Self {
            draw_id,
            phase: SessionPhase::Idle,
            selected_prize: None,
            display_count: crate::DISPLAY_COUNT_MIN,
            lock_owner: None,
            pending_count: None,
            winners: None,
            committed_count: 0,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.lock_owner.is_some()
    }
}
