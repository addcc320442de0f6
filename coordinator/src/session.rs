use crate::metrics::SessionMetrics;
use crate::selection;
use crate::store::PrizeStore;
use drawcast_types::{
    ClientId, ControlAction, DrawId, ErrorCode, Prize, Proposal, SessionEvent, SessionPhase,
    SessionSnapshot, DISPLAY_COUNT_MAX, DISPLAY_COUNT_MIN,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

/// Reveal delay by effective display count. The session owns the reveal
/// instant; displays animate against this budget but never decide it.
const REVEAL_DELAY_TABLE: &[(u32, u64)] = &[
    (1, 4_000),
    (5, 6_000),
    (10, 8_000),
    (DISPLAY_COUNT_MAX, 10_000),
];

/// Rejections surfaced to the originating controller. Aside from
/// `Upstream` during save (which leaves the lock held for retry), none of
/// these mutate session state, and none are broadcast.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
    #[error("another controller holds the draw lock")]
    LockConflict,
    #[error("requested count exceeds remaining capacity")]
    CapacityExceeded,
    #[error("prize store unavailable: {0}")]
    Upstream(String),
    #[error("session terminated")]
    Closed,
}

impl SessionError {
    pub fn code(&self) -> ErrorCode {
        match self {
            SessionError::InvalidState(_) => ErrorCode::InvalidState,
            SessionError::LockConflict => ErrorCode::LockConflict,
            SessionError::CapacityExceeded => ErrorCode::CapacityExceeded,
            SessionError::Upstream(_) | SessionError::Closed => ErrorCode::UpstreamUnavailable,
        }
    }
}

/// Per-session tuning, derived from the coordinator config.
#[derive(Clone, Debug)]
pub struct SessionTuning {
    pub reveal_delay_override: Option<Duration>,
    pub save_grace: Duration,
    pub no_repeat: bool,
    pub mailbox_size: usize,
    pub events_capacity: usize,
}

impl Default for SessionTuning {
    fn default() -> Self {
        Self {
            reveal_delay_override: None,
            save_grace: Duration::from_secs(120),
            no_repeat: true,
            mailbox_size: 64,
            events_capacity: 1_024,
        }
    }
}

enum Command {
    /// Snapshot plus a broadcast receiver handed out in the same actor turn,
    /// so a subscriber can never miss events between the two.
    Subscribe {
        respond: oneshot::Sender<(SessionSnapshot, broadcast::Receiver<SessionEvent>)>,
    },
    Snapshot {
        respond: oneshot::Sender<SessionSnapshot>,
    },
    Act {
        client: ClientId,
        action: ControlAction,
        respond: oneshot::Sender<Result<(), SessionError>>,
    },
    RevealElapsed {
        epoch: u64,
    },
    SaveGraceElapsed {
        epoch: u64,
    },
}

/// Handle to a running draw-session actor. Cheap to clone; all access to the
/// session's state goes through its mailbox.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<Command>,
}

impl SessionHandle {
    pub async fn subscribe(
        &self,
    ) -> Result<(SessionSnapshot, broadcast::Receiver<SessionEvent>), SessionError> {
        let (respond, rx) = oneshot::channel();
        self.tx
            .send(Command::Subscribe { respond })
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        let (respond, rx) = oneshot::channel();
        self.tx
            .send(Command::Snapshot { respond })
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    pub async fn act(&self, client: ClientId, action: ControlAction) -> Result<(), SessionError> {
        let (respond, rx) = oneshot::channel();
        self.tx
            .send(Command::Act {
                client,
                action,
                respond,
            })
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)?
    }
}

/// Spawn the actor that owns all mutable state for one drawing event.
/// Commands are processed one at a time in receipt order; independent draws
/// run on independent actors.
pub fn spawn<S: PrizeStore>(
    draw_id: DrawId,
    store: S,
    tuning: SessionTuning,
    metrics: Arc<SessionMetrics>,
) -> SessionHandle {
    let (tx, mailbox) = mpsc::channel(tuning.mailbox_size);
    let (events, events_keepalive) = broadcast::channel(tuning.events_capacity);
    metrics.inc_sessions_spawned();
    let actor = Actor {
        draw_id,
        store,
        tuning,
        metrics,
        mailbox,
        timer_tx: tx.clone(),
        events,
        _events_keepalive: events_keepalive,
        phase: SessionPhase::Idle,
        selected_prize: None,
        display_count: DISPLAY_COUNT_MIN,
        lock_owner: None,
        pending: None,
        committed_count: 0,
        epoch: 0,
    };
    tokio::spawn(actor.run());
    SessionHandle { tx }
}

struct Actor<S: PrizeStore> {
    draw_id: DrawId,
    store: S,
    tuning: SessionTuning,
    metrics: Arc<SessionMetrics>,
    mailbox: mpsc::Receiver<Command>,
    timer_tx: mpsc::Sender<Command>,
    events: broadcast::Sender<SessionEvent>,
    // Keeps the channel open while no subscriber is connected.
    _events_keepalive: broadcast::Receiver<SessionEvent>,

    phase: SessionPhase,
    selected_prize: Option<Prize>,
    display_count: u32,
    lock_owner: Option<ClientId>,
    pending: Option<Proposal>,
    committed_count: u32,
    // Bumped on every spin acceptance and save commit; stale reveal/grace
    // timers carry the epoch they were armed under and are ignored.
    epoch: u64,
}

impl<S: PrizeStore> Actor<S> {
    async fn run(mut self) {
        info!(draw = %self.draw_id, "draw session started");
        while let Some(command) = self.mailbox.recv().await {
            match command {
                Command::Subscribe { respond } => {
                    let _ = respond.send((self.snapshot(), self.events.subscribe()));
                }
                Command::Snapshot { respond } => {
                    let _ = respond.send(self.snapshot());
                }
                Command::Act {
                    client,
                    action,
                    respond,
                } => {
                    let result = self.apply(client, action).await;
                    let _ = respond.send(result);
                }
                Command::RevealElapsed { epoch } => self.on_reveal_elapsed(epoch),
                Command::SaveGraceElapsed { epoch } => self.on_save_grace_elapsed(epoch),
            }
        }
        info!(draw = %self.draw_id, "draw session stopped");
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            draw_id: self.draw_id.clone(),
            phase: self.phase,
            selected_prize: self.selected_prize.clone(),
            display_count: self.display_count,
            lock_owner: self.lock_owner.clone(),
            pending_count: self
                .pending
                .as_ref()
                .map(|proposal| proposal.winners.len() as u32),
            // Identities are withheld until the session reveals them.
            winners: match self.phase {
                SessionPhase::Revealed => {
                    self.pending.as_ref().map(|proposal| proposal.winners.clone())
                }
                _ => None,
            },
            committed_count: self.committed_count,
        }
    }

    fn broadcast(&self, event: SessionEvent) {
        // Only fails when every receiver is gone; the keepalive prevents that.
        let _ = self.events.send(event);
    }

    async fn apply(&mut self, client: ClientId, action: ControlAction) -> Result<(), SessionError> {
        match action {
            ControlAction::SelectPrize { prize_id } => self.select_prize(prize_id).await,
            ControlAction::SetDisplayCount { display_count } => {
                self.set_display_count(display_count)
            }
            ControlAction::Spin {
                prize_id,
                display_count,
            } => self.spin(client, prize_id, display_count).await,
            ControlAction::Save {} => self.save(client).await,
            ControlAction::PlaySound { sound_file } => {
                self.broadcast(SessionEvent::PlaySound { sound_file });
                Ok(())
            }
        }
    }

    async fn select_prize(
        &mut self,
        prize_id: drawcast_types::PrizeId,
    ) -> Result<(), SessionError> {
        if self.lock_owner.is_some() {
            return Err(SessionError::InvalidState(
                "cannot change prize while a draw is locked",
            ));
        }
        let prize = self
            .store
            .get_prize(&prize_id)
            .await
            .map_err(|err| SessionError::Upstream(err.to_string()))?
            .ok_or(SessionError::InvalidState("unknown prize"))?;
        if prize.remaining() == 0 {
            return Err(SessionError::CapacityExceeded);
        }
        self.committed_count = prize.selected_count;
        let clamped = self.display_count.min(prize.remaining());
        self.selected_prize = Some(prize);
        self.phase = SessionPhase::PrizeSelected;
        self.broadcast(SessionEvent::PrizeSelected {
            prize_id: Some(prize_id),
        });
        if clamped != self.display_count {
            self.display_count = clamped;
            self.broadcast(SessionEvent::DisplayCount {
                display_count: clamped,
            });
        }
        Ok(())
    }

    fn set_display_count(&mut self, display_count: u32) -> Result<(), SessionError> {
        if self.lock_owner.is_some() {
            return Err(SessionError::InvalidState(
                "cannot change display count while a draw is locked",
            ));
        }
        let Some(prize) = &self.selected_prize else {
            return Err(SessionError::InvalidState("no prize selected"));
        };
        if !(DISPLAY_COUNT_MIN..=DISPLAY_COUNT_MAX).contains(&display_count) {
            return Err(SessionError::InvalidState("display count out of range"));
        }
        if display_count > prize.remaining() {
            return Err(SessionError::CapacityExceeded);
        }
        self.display_count = display_count;
        self.broadcast(SessionEvent::DisplayCount { display_count });
        Ok(())
    }

    async fn spin(
        &mut self,
        client: ClientId,
        prize_id: drawcast_types::PrizeId,
        display_count: u32,
    ) -> Result<(), SessionError> {
        if let Some(owner) = &self.lock_owner {
            self.metrics.inc_spin_rejections();
            return Err(if *owner == client {
                SessionError::InvalidState("a draw from this controller is already in flight")
            } else {
                SessionError::LockConflict
            });
        }
        if !(DISPLAY_COUNT_MIN..=DISPLAY_COUNT_MAX).contains(&display_count) {
            return Err(SessionError::InvalidState("display count out of range"));
        }
        let prize = match &self.selected_prize {
            Some(selected) if selected.id == prize_id => selected.clone(),
            _ => self
                .store
                .get_prize(&prize_id)
                .await
                .map_err(|err| {
                    self.metrics.inc_proposals_aborted();
                    SessionError::Upstream(err.to_string())
                })?
                .ok_or(SessionError::InvalidState("unknown prize"))?,
        };
        if prize.remaining() == 0 {
            return Err(SessionError::CapacityExceeded);
        }

        // The pool is resolved fresh per spin; a failure aborts the spin with
        // the lock released so the operator can retry cleanly.
        let pool = self.store.list_eligible(&self.draw_id).await.map_err(|err| {
            self.metrics.inc_proposals_aborted();
            SessionError::Upstream(err.to_string())
        })?;
        let already_won = if self.tuning.no_repeat {
            self.store
                .committed_winners(&self.draw_id)
                .await
                .map_err(|err| {
                    self.metrics.inc_proposals_aborted();
                    SessionError::Upstream(err.to_string())
                })?
        } else {
            Default::default()
        };

        let proposal = selection::propose(
            &prize,
            display_count,
            self.tuning.no_repeat,
            pool,
            &already_won,
        );
        if proposal.winners.is_empty() {
            return Err(SessionError::CapacityExceeded);
        }
        let effective = proposal.winners.len() as u32;

        let prize_changed = self
            .selected_prize
            .as_ref()
            .map(|selected| selected.id != prize.id)
            .unwrap_or(true);
        self.committed_count = prize.selected_count;
        self.selected_prize = Some(prize);
        self.display_count = effective;
        self.lock_owner = Some(client.clone());
        self.pending = Some(proposal);
        self.phase = SessionPhase::Spinning;
        self.epoch += 1;
        self.metrics.inc_spins_accepted();

        if prize_changed {
            self.broadcast(SessionEvent::PrizeSelected {
                prize_id: Some(prize_id),
            });
        }
        // Winner identities are withheld here; only the effective count
        // travels until the session reveals.
        self.broadcast(SessionEvent::SpinState {
            is_spinning: true,
            display_count: effective,
        });

        let delay = self.reveal_delay(effective);
        debug!(
            draw = %self.draw_id,
            owner = %client,
            count = effective,
            delay_ms = delay.as_millis() as u64,
            "spin accepted"
        );
        self.arm_timer(delay, |epoch| Command::RevealElapsed { epoch });
        Ok(())
    }

    async fn save(&mut self, client: ClientId) -> Result<(), SessionError> {
        if self.phase != SessionPhase::Revealed {
            return Err(SessionError::InvalidState("no revealed draw to save"));
        }
        // Any controller's save is honored once revealed; the actor
        // serializes, so at most one commit is ever in flight.
        let (Some(proposal), Some(prize)) = (self.pending.clone(), self.selected_prize.clone())
        else {
            return Err(SessionError::InvalidState("no pending proposal"));
        };
        let updated = self
            .store
            .commit_winners(&self.draw_id, &prize.id, &proposal)
            .await
            .map_err(|err| {
                self.metrics.inc_save_failures();
                warn!(
                    draw = %self.draw_id,
                    prize = %prize.id,
                    error = %err,
                    "save failed; holding revealed draw for retry"
                );
                // State intentionally untouched: the same proposal must be
                // retryable without a redraw.
                SessionError::Upstream(err.to_string())
            })?;

        let mut prize = prize;
        prize.selected_count = updated;
        self.committed_count = updated;
        self.pending = None;
        self.lock_owner = None;
        self.epoch += 1;
        self.metrics.inc_saves_committed();
        info!(
            draw = %self.draw_id,
            prize = %prize.id,
            by = %client,
            selected = updated,
            quantity = prize.quantity,
            "winners committed"
        );

        self.broadcast(SessionEvent::WinnersUpdate {
            prize_id: prize.id.clone(),
            selected_count: updated,
            quantity: prize.quantity,
        });
        self.broadcast(SessionEvent::SpinState {
            is_spinning: false,
            display_count: self.display_count,
        });
        if prize.remaining() == 0 {
            self.selected_prize = None;
            self.phase = SessionPhase::Idle;
            self.broadcast(SessionEvent::PrizeSelected { prize_id: None });
        } else {
            self.selected_prize = Some(prize);
            self.phase = SessionPhase::PrizeSelected;
        }
        Ok(())
    }

    fn on_reveal_elapsed(&mut self, epoch: u64) {
        if epoch != self.epoch || self.phase != SessionPhase::Spinning {
            return;
        }
        let Some(proposal) = &self.pending else {
            return;
        };
        self.phase = SessionPhase::Revealed;
        self.metrics.inc_reveals();
        self.broadcast(SessionEvent::Reveal {
            winners: proposal.winners.clone(),
        });
        self.arm_timer(self.tuning.save_grace, |epoch| Command::SaveGraceElapsed {
            epoch,
        });
    }

    fn on_save_grace_elapsed(&mut self, epoch: u64) {
        if epoch != self.epoch || self.phase != SessionPhase::Revealed {
            return;
        }
        // An unsaved reveal is never auto-expired; the audience already saw
        // it. Hold the lock and call for an operator.
        self.metrics.inc_grace_expirations();
        warn!(
            draw = %self.draw_id,
            owner = ?self.lock_owner,
            grace_ms = self.tuning.save_grace.as_millis() as u64,
            "revealed draw unsaved past grace period; holding lock"
        );
    }

    fn reveal_delay(&self, effective: u32) -> Duration {
        if let Some(delay) = self.tuning.reveal_delay_override {
            return delay;
        }
        let ms = REVEAL_DELAY_TABLE
            .iter()
            .find(|(bound, _)| effective <= *bound)
            .map(|(_, ms)| *ms)
            .unwrap_or(10_000);
        Duration::from_millis(ms)
    }

    fn arm_timer(&self, delay: Duration, command: fn(u64) -> Command) {
        let tx = self.timer_tx.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(command(epoch)).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use drawcast_types::{Participant, ParticipantId, PrizeId, RuleSnapshot, Winner};
    use tokio::time::{timeout, Duration};

    const DRAW: &str = "d1";

    fn tuning() -> SessionTuning {
        SessionTuning {
            reveal_delay_override: Some(Duration::from_millis(40)),
            save_grace: Duration::from_millis(150),
            ..SessionTuning::default()
        }
    }

    fn fixture_store(quantity: u32, participants: &[&str]) -> MemoryStore {
        let store = MemoryStore::new();
        store.insert_draw(
            DrawId::from(DRAW),
            participants
                .iter()
                .map(|id| Participant {
                    id: ParticipantId::from(*id),
                    name: id.to_uppercase(),
                    eligible: true,
                })
                .collect(),
        );
        store.insert_prize(
            DrawId::from(DRAW),
            Prize {
                id: PrizeId::from("p1"),
                name: "Grand".to_string(),
                quantity,
                selected_count: 0,
            },
        );
        store
    }

    fn start(store: &MemoryStore, tuning: SessionTuning) -> SessionHandle {
        spawn(
            DrawId::from(DRAW),
            store.clone(),
            tuning,
            Arc::new(SessionMetrics::default()),
        )
    }

    async fn next_event(rx: &mut broadcast::Receiver<SessionEvent>) -> SessionEvent {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for session event")
            .expect("event channel closed")
    }

    async fn wait_for_reveal(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<Winner> {
        loop {
            if let SessionEvent::Reveal { winners } = next_event(rx).await {
                return winners;
            }
        }
    }

    fn spin(prize: &str, count: u32) -> ControlAction {
        ControlAction::Spin {
            prize_id: PrizeId::from(prize),
            display_count: count,
        }
    }

    #[tokio::test]
    async fn concurrent_spins_elect_exactly_one_lock_owner() {
        let store = fixture_store(10, &["a", "b", "c", "d", "e"]);
        let session = start(&store, tuning());

        let (first, second) = tokio::join!(
            session.act(ClientId::from("console"), spin("p1", 2)),
            session.act(ClientId::from("remote"), spin("p1", 2)),
        );
        let successes = [&first, &second].iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1);
        let loser = if first.is_ok() { second } else { first };
        assert!(matches!(
            loser,
            Err(SessionError::LockConflict | SessionError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn save_commits_winner_count_and_releases_lock() {
        let store = fixture_store(10, &["a", "b", "c", "d", "e"]);
        let session = start(&store, tuning());
        let (_, mut events) = session.subscribe().await.unwrap();

        session
            .act(ClientId::from("console"), spin("p1", 2))
            .await
            .unwrap();
        let winners = wait_for_reveal(&mut events).await;
        assert_eq!(winners.len(), 2);

        session
            .act(ClientId::from("console"), ControlAction::Save {})
            .await
            .unwrap();
        let snapshot = session.snapshot().await.unwrap();
        assert!(snapshot.lock_owner.is_none());
        assert_eq!(snapshot.committed_count, 2);
        let prize = store.get_prize(&PrizeId::from("p1")).await.unwrap().unwrap();
        assert_eq!(prize.selected_count, 2);
    }

    #[tokio::test]
    async fn second_save_observes_unlocked_state() {
        let store = fixture_store(10, &["a", "b", "c"]);
        let session = start(&store, tuning());
        let (_, mut events) = session.subscribe().await.unwrap();

        session
            .act(ClientId::from("console"), spin("p1", 2))
            .await
            .unwrap();
        wait_for_reveal(&mut events).await;
        session
            .act(ClientId::from("console"), ControlAction::Save {})
            .await
            .unwrap();
        let err = session
            .act(ClientId::from("console"), ControlAction::Save {})
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidState(_)));
        let prize = store.get_prize(&PrizeId::from("p1")).await.unwrap().unwrap();
        assert_eq!(prize.selected_count, 2);
    }

    #[tokio::test]
    async fn late_subscriber_sees_same_winners_as_live_one() {
        let store = fixture_store(10, &["a", "b", "c", "d"]);
        let session = start(&store, tuning());
        let (_, mut live) = session.subscribe().await.unwrap();

        session
            .act(ClientId::from("console"), spin("p1", 3))
            .await
            .unwrap();
        let revealed = wait_for_reveal(&mut live).await;

        // A display that reconnects after the reveal converges from the
        // snapshot alone.
        let (snapshot, _) = session.subscribe().await.unwrap();
        assert_eq!(snapshot.phase, SessionPhase::Revealed);
        assert_eq!(snapshot.winners.as_deref(), Some(revealed.as_slice()));
    }

    #[tokio::test]
    async fn display_count_clamps_to_remaining_quantity() {
        let store = fixture_store(4, &["a", "b", "c", "d", "e", "f"]);
        let session = start(&store, tuning());
        let (_, mut events) = session.subscribe().await.unwrap();

        session
            .act(ClientId::from("console"), spin("p1", 30))
            .await
            .unwrap();
        loop {
            match next_event(&mut events).await {
                SessionEvent::SpinState {
                    is_spinning: true,
                    display_count,
                } => {
                    assert_eq!(display_count, 4);
                    break;
                }
                _ => continue,
            }
        }
        let winners = wait_for_reveal(&mut events).await;
        assert_eq!(winners.len(), 4);
    }

    #[tokio::test]
    async fn winner_identities_are_withheld_while_spinning() {
        let store = fixture_store(10, &["a", "b", "c"]);
        let session = start(&store, tuning());
        session
            .act(ClientId::from("console"), spin("p1", 2))
            .await
            .unwrap();
        let snapshot = session.snapshot().await.unwrap();
        assert_eq!(snapshot.phase, SessionPhase::Spinning);
        assert_eq!(snapshot.pending_count, Some(2));
        assert!(snapshot.winners.is_none());
    }

    #[tokio::test]
    async fn no_repeat_rule_never_redraws_a_committed_winner() {
        let store = fixture_store(10, &["a", "b", "c", "d", "e"]);
        // Three of five already won earlier in the event.
        let prior = Proposal {
            seed: "prior".to_string(),
            rule: RuleSnapshot {
                no_repeat: true,
                pool_size: 5,
                drawn_at_count: 0,
            },
            winners: ["a", "b", "c"]
                .iter()
                .map(|id| Winner {
                    id: ParticipantId::from(*id),
                    name: id.to_uppercase(),
                })
                .collect(),
        };
        store
            .commit_winners(&DrawId::from(DRAW), &PrizeId::from("p1"), &prior)
            .await
            .unwrap();

        let session = start(&store, tuning());
        let (_, mut events) = session.subscribe().await.unwrap();
        session
            .act(ClientId::from("console"), spin("p1", 3))
            .await
            .unwrap();
        let winners = wait_for_reveal(&mut events).await;
        assert_eq!(winners.len(), 2);
        for winner in &winners {
            assert!(!["a", "b", "c"].contains(&winner.id.as_str()));
        }
    }

    #[tokio::test]
    async fn full_two_controller_scenario() {
        let store = fixture_store(3, &["a", "b", "c", "d", "e"]);
        let session = start(&store, tuning());
        let (_, mut events) = session.subscribe().await.unwrap();
        let a = ClientId::from("console");
        let b = ClientId::from("remote");

        session.act(a.clone(), spin("p1", 2)).await.unwrap();
        let err = session.act(b.clone(), spin("p1", 2)).await.unwrap_err();
        assert!(matches!(err, SessionError::LockConflict));

        wait_for_reveal(&mut events).await;
        session.act(a.clone(), ControlAction::Save {}).await.unwrap();
        let prize = store.get_prize(&PrizeId::from("p1")).await.unwrap().unwrap();
        assert_eq!(prize.selected_count, 2);

        // B may now draw the remaining slot; the request is clamped to 1.
        session.act(b.clone(), spin("p1", 2)).await.unwrap();
        let winners = wait_for_reveal(&mut events).await;
        assert_eq!(winners.len(), 1);
        session.act(b, ControlAction::Save {}).await.unwrap();

        let snapshot = session.snapshot().await.unwrap();
        assert_eq!(snapshot.phase, SessionPhase::Idle);
        assert!(snapshot.selected_prize.is_none());
        let prize = store.get_prize(&PrizeId::from("p1")).await.unwrap().unwrap();
        assert_eq!(prize.selected_count, 3);
    }

    #[tokio::test]
    async fn upstream_failure_during_spin_releases_the_lock() {
        let store = fixture_store(10, &["a", "b", "c"]);
        let session = start(&store, tuning());

        store.fail_next_queries(1);
        let err = session
            .act(ClientId::from("console"), spin("p1", 2))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Upstream(_)));

        let snapshot = session.snapshot().await.unwrap();
        assert!(snapshot.lock_owner.is_none());
        // Retry succeeds without operator intervention.
        session
            .act(ClientId::from("console"), spin("p1", 2))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn upstream_failure_during_save_preserves_the_shown_result() {
        let store = fixture_store(10, &["a", "b", "c"]);
        let session = start(&store, tuning());
        let (_, mut events) = session.subscribe().await.unwrap();

        session
            .act(ClientId::from("console"), spin("p1", 2))
            .await
            .unwrap();
        let shown = wait_for_reveal(&mut events).await;

        store.fail_next_commits(1);
        let err = session
            .act(ClientId::from("console"), ControlAction::Save {})
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Upstream(_)));
        let snapshot = session.snapshot().await.unwrap();
        assert_eq!(snapshot.phase, SessionPhase::Revealed);
        assert!(snapshot.lock_owner.is_some());
        assert_eq!(snapshot.winners.as_deref(), Some(shown.as_slice()));

        // Retrying commits the very proposal the audience saw.
        session
            .act(ClientId::from("console"), ControlAction::Save {})
            .await
            .unwrap();
        let prize = store.get_prize(&PrizeId::from("p1")).await.unwrap().unwrap();
        assert_eq!(prize.selected_count, 2);
    }

    #[tokio::test]
    async fn configuration_is_frozen_while_locked() {
        let store = fixture_store(10, &["a", "b", "c"]);
        let session = start(&store, tuning());
        let client = ClientId::from("console");

        session
            .act(
                client.clone(),
                ControlAction::SelectPrize {
                    prize_id: PrizeId::from("p1"),
                },
            )
            .await
            .unwrap();
        session.act(client.clone(), spin("p1", 2)).await.unwrap();

        let err = session
            .act(
                client.clone(),
                ControlAction::SetDisplayCount { display_count: 3 },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidState(_)));
        let err = session
            .act(
                client,
                ControlAction::SelectPrize {
                    prize_id: PrizeId::from("p1"),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidState(_)));
    }

    #[tokio::test]
    async fn display_count_validation() {
        let store = fixture_store(4, &["a", "b", "c"]);
        let session = start(&store, tuning());
        let client = ClientId::from("console");
        session
            .act(
                client.clone(),
                ControlAction::SelectPrize {
                    prize_id: PrizeId::from("p1"),
                },
            )
            .await
            .unwrap();

        let err = session
            .act(
                client.clone(),
                ControlAction::SetDisplayCount { display_count: 31 },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidState(_)));

        let err = session
            .act(
                client.clone(),
                ControlAction::SetDisplayCount { display_count: 5 },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::CapacityExceeded));

        session
            .act(client, ControlAction::SetDisplayCount { display_count: 4 })
            .await
            .unwrap();
        let snapshot = session.snapshot().await.unwrap();
        assert_eq!(snapshot.display_count, 4);
    }

    #[tokio::test]
    async fn unsaved_reveal_is_held_past_grace_not_expired() {
        let store = fixture_store(10, &["a", "b", "c"]);
        let metrics = Arc::new(SessionMetrics::default());
        let session = spawn(
            DrawId::from(DRAW),
            store.clone(),
            SessionTuning {
                reveal_delay_override: Some(Duration::from_millis(20)),
                save_grace: Duration::from_millis(60),
                ..SessionTuning::default()
            },
            metrics.clone(),
        );
        let (_, mut events) = session.subscribe().await.unwrap();
        session
            .act(ClientId::from("console"), spin("p1", 1))
            .await
            .unwrap();
        wait_for_reveal(&mut events).await;

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(metrics.snapshot().grace_expirations, 1);
        // Still locked and saveable.
        let snapshot = session.snapshot().await.unwrap();
        assert_eq!(snapshot.phase, SessionPhase::Revealed);
        session
            .act(ClientId::from("console"), ControlAction::Save {})
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn play_sound_is_relayed_to_subscribers() {
        let store = fixture_store(10, &["a"]);
        let session = start(&store, tuning());
        let (_, mut events) = session.subscribe().await.unwrap();
        session
            .act(
                ClientId::from("console"),
                ControlAction::PlaySound {
                    sound_file: "drumroll.mp3".to_string(),
                },
            )
            .await
            .unwrap();
        match next_event(&mut events).await {
            SessionEvent::PlaySound { sound_file } => assert_eq!(sound_file, "drumroll.mp3"),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
