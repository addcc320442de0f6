use crate::connection::{self, RetryPolicy, Role, SessionStream};
use crate::{Error, Result};
use drawcast_types::{
    ClientId, ControlAction, DrawId, Prize, PrizeId, ServerMessage, SessionEvent, SessionPhase,
    Winner,
};
use tracing::debug;
use url::Url;

/// Local mirror of the fields a control surface renders and gates on. Kept
/// in lockstep by applying every server frame in order; the coordinator stays
/// the authority and re-validates every action.
#[derive(Clone, Debug, Default)]
pub struct Mirror {
    phase: SessionPhase,
    selected_prize: Option<PrizeId>,
    display_count: u32,
    winners: Option<Vec<Winner>>,
    committed: Option<(u32, u32)>,
}

impl Mirror {
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn selected_prize(&self) -> Option<&PrizeId> {
        self.selected_prize.as_ref()
    }

    pub fn display_count(&self) -> u32 {
        self.display_count
    }

    pub fn winners(&self) -> Option<&[Winner]> {
        self.winners.as_deref()
    }

    /// `(selected_count, quantity)` from the last committed save.
    pub fn committed(&self) -> Option<(u32, u32)> {
        self.committed
    }

    /// Whether the spin button should be live. The coordinator is the
    /// authority; this only drives UI affordances.
    pub fn can_spin(&self) -> bool {
        !self.phase.is_locked()
    }

    pub fn can_configure(&self) -> bool {
        !self.phase.is_locked()
    }

    pub fn can_save(&self) -> bool {
        self.phase == SessionPhase::Revealed
    }

    fn apply(&mut self, message: &ServerMessage) {
        match message {
            ServerMessage::Snapshot { session } => {
                self.phase = session.phase;
                self.selected_prize = session.selected_prize.as_ref().map(|p| p.id.clone());
                self.display_count = session.display_count;
                self.winners = session.winners.clone();
                self.committed = session
                    .selected_prize
                    .as_ref()
                    .map(|p| (p.selected_count, p.quantity));
            }
            ServerMessage::ControlAction { event } => self.apply_event(event),
            // Rejections are unicast and carry no state change.
            ServerMessage::Error { .. } => {}
        }
    }

    fn apply_event(&mut self, event: &SessionEvent) {
        match event {
            SessionEvent::SpinState {
                is_spinning: true,
                display_count,
            } => {
                self.phase = SessionPhase::Spinning;
                self.display_count = *display_count;
                self.winners = None;
            }
            SessionEvent::SpinState {
                is_spinning: false, ..
            } => {
                self.phase = if self.selected_prize.is_some() {
                    SessionPhase::PrizeSelected
                } else {
                    SessionPhase::Idle
                };
                self.winners = None;
            }
            SessionEvent::Reveal { winners } => {
                self.phase = SessionPhase::Revealed;
                self.winners = Some(winners.clone());
            }
            SessionEvent::WinnersUpdate {
                selected_count,
                quantity,
                ..
            } => {
                self.committed = Some((*selected_count, *quantity));
            }
            SessionEvent::PrizeSelected { prize_id } => {
                self.selected_prize = prize_id.clone();
                if !self.phase.is_locked() {
                    self.phase = match prize_id {
                        Some(_) => SessionPhase::PrizeSelected,
                        None => SessionPhase::Idle,
                    };
                }
            }
            SessionEvent::DisplayCount { display_count } => {
                self.display_count = *display_count;
            }
            SessionEvent::PlaySound { .. } => {}
        }
    }
}

/// Control surface for one drawing event: sends actions over the session
/// socket and mirrors broadcast state for gating.
pub struct Controller {
    base_url: Url,
    draw: DrawId,
    client_id: ClientId,
    http: reqwest::Client,
    stream: SessionStream,
    mirror: Mirror,
    retry: RetryPolicy,
}

impl Controller {
    /// Connect and block until the initial snapshot lands, so the mirror is
    /// live before the first action.
    pub async fn connect(base_url: &str, draw: &str, client_id: &str) -> Result<Self> {
        let base_url = connection::parse_base_url(base_url)?;
        let draw = DrawId::from(draw);
        let client_id = ClientId::from(client_id);
        let retry = RetryPolicy::default();
        let stream =
            connection::dial_with_retry(&base_url, &draw, &client_id, Role::Controller, retry)
                .await?;
        let mut controller = Self {
            base_url,
            draw,
            client_id,
            http: reqwest::Client::new(),
            stream,
            mirror: Mirror::default(),
            retry,
        };
        controller.await_snapshot().await?;
        Ok(controller)
    }

    /// Re-dial after a dropped connection. The fresh snapshot replaces the
    /// mirror wholesale; no event replay is needed.
    pub async fn reconnect(&mut self) -> Result<()> {
        self.stream = connection::dial_with_retry(
            &self.base_url,
            &self.draw,
            &self.client_id,
            Role::Controller,
            self.retry,
        )
        .await?;
        self.await_snapshot().await
    }

    async fn await_snapshot(&mut self) -> Result<()> {
        match self.stream.next().await {
            Some(Ok(message @ ServerMessage::Snapshot { .. })) => {
                self.mirror.apply(&message);
                debug!(draw = %self.draw, phase = ?self.mirror.phase(), "snapshot received");
                Ok(())
            }
            Some(Ok(_)) => Err(Error::UnexpectedResponse),
            Some(Err(err)) => Err(err),
            None => Err(Error::ConnectionClosed),
        }
    }

    pub fn mirror(&self) -> &Mirror {
        &self.mirror
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    /// Receive the next server frame and fold it into the mirror.
    pub async fn recv(&mut self) -> Option<Result<ServerMessage>> {
        let message = self.stream.next().await?;
        if let Ok(message) = &message {
            self.mirror.apply(message);
        }
        Some(message)
    }

    pub async fn select_prize(&self, prize_id: &str) -> Result<()> {
        self.stream
            .send_action(ControlAction::SelectPrize {
                prize_id: PrizeId::from(prize_id),
            })
            .await
    }

    pub async fn set_display_count(&self, display_count: u32) -> Result<()> {
        self.stream
            .send_action(ControlAction::SetDisplayCount { display_count })
            .await
    }

    pub async fn spin(&self, prize_id: &str, display_count: u32) -> Result<()> {
        self.stream
            .send_action(ControlAction::Spin {
                prize_id: PrizeId::from(prize_id),
                display_count,
            })
            .await
    }

    pub async fn save(&self) -> Result<()> {
        self.stream.send_action(ControlAction::Save {}).await
    }

    pub async fn play_sound(&self, sound_file: &str) -> Result<()> {
        self.stream
            .send_action(ControlAction::PlaySound {
                sound_file: sound_file.to_string(),
            })
            .await
    }

    /// Prize inventory for the pick list.
    pub async fn fetch_prizes(&self) -> Result<Vec<Prize>> {
        let url = self.base_url.join(&format!("draw/{}/prizes", self.draw))?;
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Failed(status));
        }
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drawcast_types::SessionSnapshot;

    fn event(event: SessionEvent) -> ServerMessage {
        ServerMessage::event(event)
    }

    fn winner(id: &str) -> Winner {
        Winner {
            id: drawcast_types::ParticipantId::from(id),
            name: id.to_string(),
        }
    }

    #[test]
    fn gating_follows_the_lock_through_a_full_draw() {
        let mut mirror = Mirror::default();
        assert!(mirror.can_spin());
        assert!(mirror.can_configure());
        assert!(!mirror.can_save());

        mirror.apply(&event(SessionEvent::PrizeSelected {
            prize_id: Some(PrizeId::from("p1")),
        }));
        assert_eq!(mirror.phase(), SessionPhase::PrizeSelected);
        assert!(mirror.can_spin());

        mirror.apply(&event(SessionEvent::SpinState {
            is_spinning: true,
            display_count: 3,
        }));
        assert_eq!(mirror.phase(), SessionPhase::Spinning);
        assert_eq!(mirror.display_count(), 3);
        assert!(!mirror.can_spin());
        assert!(!mirror.can_configure());
        assert!(!mirror.can_save());

        mirror.apply(&event(SessionEvent::Reveal {
            winners: vec![winner("alice"), winner("bob"), winner("carol")],
        }));
        assert_eq!(mirror.phase(), SessionPhase::Revealed);
        assert!(!mirror.can_spin());
        assert!(mirror.can_save());
        assert_eq!(mirror.winners().map(<[Winner]>::len), Some(3));

        mirror.apply(&event(SessionEvent::WinnersUpdate {
            prize_id: PrizeId::from("p1"),
            selected_count: 3,
            quantity: 5,
        }));
        mirror.apply(&event(SessionEvent::SpinState {
            is_spinning: false,
            display_count: 3,
        }));
        assert_eq!(mirror.phase(), SessionPhase::PrizeSelected);
        assert_eq!(mirror.committed(), Some((3, 5)));
        assert!(mirror.can_spin());
        assert!(mirror.winners().is_none());
    }

    #[test]
    fn snapshot_replaces_the_mirror_wholesale() {
        let mut mirror = Mirror::default();
        mirror.apply(&event(SessionEvent::SpinState {
            is_spinning: true,
            display_count: 5,
        }));

        let mut session = SessionSnapshot::new(DrawId::from("gala"));
        session.phase = SessionPhase::Revealed;
        session.selected_prize = Some(Prize {
            id: PrizeId::from("p2"),
            name: "Runner-up".to_string(),
            quantity: 4,
            selected_count: 1,
        });
        session.display_count = 2;
        session.winners = Some(vec![winner("dave")]);
        mirror.apply(&ServerMessage::Snapshot { session });

        assert_eq!(mirror.phase(), SessionPhase::Revealed);
        assert_eq!(mirror.selected_prize(), Some(&PrizeId::from("p2")));
        assert_eq!(mirror.display_count(), 2);
        assert_eq!(mirror.committed(), Some((1, 4)));
        assert!(mirror.can_save());
    }

    #[test]
    fn rejections_leave_the_mirror_untouched() {
        let mut mirror = Mirror::default();
        mirror.apply(&event(SessionEvent::PrizeSelected {
            prize_id: Some(PrizeId::from("p1")),
        }));
        let before = mirror.clone();
        mirror.apply(&ServerMessage::Error {
            code: drawcast_types::ErrorCode::LockConflict,
            reason: "a draw is already in flight".to_string(),
        });
        assert_eq!(mirror.phase(), before.phase());
        assert_eq!(mirror.selected_prize(), before.selected_prize());
    }

    #[test]
    fn clearing_the_prize_while_unlocked_returns_to_idle() {
        let mut mirror = Mirror::default();
        mirror.apply(&event(SessionEvent::PrizeSelected {
            prize_id: Some(PrizeId::from("p1")),
        }));
        mirror.apply(&event(SessionEvent::PrizeSelected { prize_id: None }));
        assert_eq!(mirror.phase(), SessionPhase::Idle);
        assert!(mirror.selected_prize().is_none());
    }
}
