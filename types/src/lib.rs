pub mod message;
pub mod session;

pub use message::{
    ControlAction, ControlEnvelope, ErrorCode, ServerMessage, SessionEvent, CONTROL_ACTION_TYPE,
};
pub use session::{
    Participant, Prize, Proposal, RuleSnapshot, SessionPhase, SessionSnapshot, Winner,
};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Inclusive lower bound on the number of winners revealed at once.
pub const DISPLAY_COUNT_MIN: u32 = 1;

/// Inclusive upper bound on the number of winners revealed at once.
pub const DISPLAY_COUNT_MAX: u32 = 30;

macro_rules! opaque_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

opaque_id!(
    /// One configured raffle round, over which a sequence of prizes are awarded.
    DrawId
);
opaque_id!(
    /// A prize within a drawing event.
    PrizeId
);
opaque_id!(
    /// A participant eligible to win prizes.
    ParticipantId
);
opaque_id!(
    /// Stable per-device identifier carried by every controller and display
    /// connection. Opaque to the coordinator.
    ClientId
);
