use drawcast_types::{Participant, ParticipantId, Prize, Proposal, RuleSnapshot, Winner};
use rand::rngs::OsRng;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha12Rng;
use std::collections::HashSet;

/// Length of the recorded seed in bytes (hex-encoded on the proposal).
pub const SEED_BYTES: usize = 32;

/// Build a proposal for `prize` from the given pool.
///
/// The pool is filtered to eligible participants and, when `no_repeat` is
/// set, to those not in `already_won`. The winner count is clamped to the
/// smallest of the requested count, the prize's remaining quantity, and the
/// filtered pool size; callers decide whether an empty result is an error.
///
/// Nothing is persisted here. Every call draws a fresh seed; reproducibility
/// is per-proposal, from the recorded seed, never across calls.
pub fn propose(
    prize: &Prize,
    requested: u32,
    no_repeat: bool,
    pool: Vec<Participant>,
    already_won: &HashSet<ParticipantId>,
) -> Proposal {
    let pool: Vec<Participant> = pool
        .into_iter()
        .filter(|p| p.eligible && !(no_repeat && already_won.contains(&p.id)))
        .collect();
    let count = (requested.min(prize.remaining()) as usize).min(pool.len());

    let mut seed = [0u8; SEED_BYTES];
    OsRng.fill_bytes(&mut seed);

    let winners = sample(&seed, &pool, count);
    Proposal {
        seed: encode_seed(&seed),
        rule: RuleSnapshot {
            no_repeat,
            pool_size: pool.len() as u32,
            drawn_at_count: prize.selected_count,
        },
        winners,
    }
}

/// Deterministically sample `count` distinct winners from `pool` using the
/// recorded seed. Order is reveal order. Used both for fresh proposals and
/// for audit replay.
pub fn sample(seed: &[u8; SEED_BYTES], pool: &[Participant], count: usize) -> Vec<Winner> {
    let mut rng = ChaCha12Rng::from_seed(*seed);
    rand::seq::index::sample(&mut rng, pool.len(), count.min(pool.len()))
        .into_iter()
        .map(|index| {
            let participant = &pool[index];
            Winner {
                id: participant.id.clone(),
                name: participant.name.clone(),
            }
        })
        .collect()
}

pub fn encode_seed(seed: &[u8; SEED_BYTES]) -> String {
    hex::encode(seed)
}

/// Parse a recorded seed back into bytes for replay. Returns `None` for
/// malformed input.
pub fn decode_seed(seed: &str) -> Option<[u8; SEED_BYTES]> {
    let bytes = hex::decode(seed).ok()?;
    bytes.try_into().ok()
}
