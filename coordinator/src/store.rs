use drawcast_types::{DrawId, Participant, ParticipantId, Prize, PrizeId, Proposal, Winner};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// The eligibility & prize collaborator. Holds participants, their
/// eligibility flag, and prize inventory; the coordinator never persists any
/// of this itself.
pub trait PrizeStore: Clone + Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    fn list_prizes(
        &self,
        draw: &DrawId,
    ) -> impl Future<Output = Result<Vec<Prize>, Self::Error>> + Send;

    fn get_prize(
        &self,
        prize: &PrizeId,
    ) -> impl Future<Output = Result<Option<Prize>, Self::Error>> + Send;

    /// Current eligible pool, freshly resolved on every call.
    fn list_eligible(
        &self,
        draw: &DrawId,
    ) -> impl Future<Output = Result<Vec<Participant>, Self::Error>> + Send;

    /// Participants already committed as winners anywhere in the drawing
    /// event. Feeds the no-repeat rule.
    fn committed_winners(
        &self,
        draw: &DrawId,
    ) -> impl Future<Output = Result<HashSet<ParticipantId>, Self::Error>> + Send;

    /// Persist a proposal's winners and decrement prize inventory, returning
    /// the updated `selected_count`. Idempotent by proposal seed: committing
    /// the same proposal twice is a no-op that returns the stored result.
    fn commit_winners(
        &self,
        draw: &DrawId,
        prize: &PrizeId,
        proposal: &Proposal,
    ) -> impl Future<Output = Result<u32, Self::Error>> + Send;
}

#[derive(Debug, Error)]
pub enum MemoryStoreError {
    #[error("unknown draw: {0}")]
    UnknownDraw(DrawId),
    #[error("unknown prize: {0}")]
    UnknownPrize(PrizeId),
    #[error("commit of {requested} winners exceeds prize quantity ({selected}/{quantity})")]
    Capacity {
        requested: u32,
        selected: u32,
        quantity: u32,
    },
    #[error("store unavailable (injected)")]
    Unavailable,
}

#[derive(Default)]
struct MemoryStoreInner {
    participants: HashMap<DrawId, Vec<Participant>>,
    prizes: HashMap<PrizeId, (DrawId, Prize)>,
    winners: HashMap<DrawId, HashSet<ParticipantId>>,
    // Seed of every committed proposal per prize, with the selected_count the
    // commit produced; lookups make commit idempotent.
    commits: HashMap<PrizeId, HashMap<String, u32>>,
}

/// In-process [`PrizeStore`] backing the dev binary and the test suite.
/// Query/commit failures can be injected to exercise upstream-unavailable
/// paths.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryStoreInner>>,
    fail_queries: Arc<AtomicU32>,
    fail_commits: Arc<AtomicU32>,
}

/// JSON fixture consumed by `--store-path`.
#[derive(Deserialize)]
pub struct StoreFixture {
    pub draws: Vec<DrawFixture>,
}

#[derive(Deserialize)]
pub struct DrawFixture {
    pub id: DrawId,
    pub participants: Vec<Participant>,
    pub prizes: Vec<Prize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fixture_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let fixture: StoreFixture = serde_json::from_str(&raw)?;
        Ok(Self::from_fixture(fixture))
    }

    pub fn from_fixture(fixture: StoreFixture) -> Self {
        let store = Self::new();
        for draw in fixture.draws {
            store.insert_draw(draw.id.clone(), draw.participants);
            for prize in draw.prizes {
                store.insert_prize(draw.id.clone(), prize);
            }
        }
        store
    }

    pub fn insert_draw(&self, draw: DrawId, participants: Vec<Participant>) {
        let mut inner = self.lock();
        inner.participants.insert(draw, participants);
    }

    pub fn insert_prize(&self, draw: DrawId, prize: Prize) {
        let mut inner = self.lock();
        inner.prizes.insert(prize.id.clone(), (draw, prize));
    }

    /// Fail the next `count` read queries with [`MemoryStoreError::Unavailable`].
    pub fn fail_next_queries(&self, count: u32) {
        self.fail_queries.store(count, Ordering::SeqCst);
    }

    /// Fail the next `count` commits with [`MemoryStoreError::Unavailable`].
    pub fn fail_next_commits(&self, count: u32) {
        self.fail_commits.store(count, Ordering::SeqCst);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryStoreInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn take_injected_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current > 0).then(|| current - 1)
            })
            .is_ok()
    }
}

impl PrizeStore for MemoryStore {
    type Error = MemoryStoreError;

    async fn list_prizes(&self, draw: &DrawId) -> Result<Vec<Prize>, Self::Error> {
        if Self::take_injected_failure(&self.fail_queries) {
            return Err(MemoryStoreError::Unavailable);
        }
        let inner = self.lock();
        let mut prizes: Vec<Prize> = inner
            .prizes
            .values()
            .filter(|(owner, _)| owner == draw)
            .map(|(_, prize)| prize.clone())
            .collect();
        prizes.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(prizes)
    }

    async fn get_prize(&self, prize: &PrizeId) -> Result<Option<Prize>, Self::Error> {
        if Self::take_injected_failure(&self.fail_queries) {
            return Err(MemoryStoreError::Unavailable);
        }
        let inner = self.lock();
        Ok(inner.prizes.get(prize).map(|(_, prize)| prize.clone()))
    }

    async fn list_eligible(&self, draw: &DrawId) -> Result<Vec<Participant>, Self::Error> {
        if Self::take_injected_failure(&self.fail_queries) {
            return Err(MemoryStoreError::Unavailable);
        }
        let inner = self.lock();
        let pool = inner
            .participants
            .get(draw)
            .ok_or_else(|| MemoryStoreError::UnknownDraw(draw.clone()))?;
        Ok(pool.iter().filter(|p| p.eligible).cloned().collect())
    }

    async fn committed_winners(&self, draw: &DrawId) -> Result<HashSet<ParticipantId>, Self::Error> {
        if Self::take_injected_failure(&self.fail_queries) {
            return Err(MemoryStoreError::Unavailable);
        }
        let inner = self.lock();
        Ok(inner.winners.get(draw).cloned().unwrap_or_default())
    }

    async fn commit_winners(
        &self,
        draw: &DrawId,
        prize: &PrizeId,
        proposal: &Proposal,
    ) -> Result<u32, Self::Error> {
        if Self::take_injected_failure(&self.fail_commits) {
            return Err(MemoryStoreError::Unavailable);
        }
        let mut inner = self.lock();
        if let Some(previous) = inner
            .commits
            .get(prize)
            .and_then(|by_seed| by_seed.get(&proposal.seed))
        {
            return Ok(*previous);
        }
        let (_, stored) = inner
            .prizes
            .get_mut(prize)
            .ok_or_else(|| MemoryStoreError::UnknownPrize(prize.clone()))?;
        let requested = proposal.winners.len() as u32;
        if stored.selected_count + requested > stored.quantity {
            return Err(MemoryStoreError::Capacity {
                requested,
                selected: stored.selected_count,
                quantity: stored.quantity,
            });
        }
        stored.selected_count += requested;
        let updated = stored.selected_count;
        let winner_ids: Vec<ParticipantId> =
            proposal.winners.iter().map(|w: &Winner| w.id.clone()).collect();
        inner
            .winners
            .entry(draw.clone())
            .or_default()
            .extend(winner_ids);
        inner
            .commits
            .entry(prize.clone())
            .or_default()
            .insert(proposal.seed.clone(), updated);
        Ok(updated)
    }
}
