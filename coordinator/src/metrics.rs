use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for WebSocket delivery health.
#[derive(Default)]
pub struct WsMetrics {
    events_lagged: AtomicU64,
    queue_full: AtomicU64,
    send_errors: AtomicU64,
    send_timeouts: AtomicU64,
    malformed_actions: AtomicU64,
    connection_reject_global: AtomicU64,
    connection_reject_per_ip: AtomicU64,
}

#[derive(Clone, Copy, Debug, Serialize)]
pub struct WsMetricsSnapshot {
    pub events_lagged: u64,
    pub queue_full: u64,
    pub send_errors: u64,
    pub send_timeouts: u64,
    pub malformed_actions: u64,
    pub connection_reject_global: u64,
    pub connection_reject_per_ip: u64,
}

impl WsMetrics {
    pub fn snapshot(&self) -> WsMetricsSnapshot {
        WsMetricsSnapshot {
            events_lagged: self.events_lagged.load(Ordering::Relaxed),
            queue_full: self.queue_full.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            send_timeouts: self.send_timeouts.load(Ordering::Relaxed),
            malformed_actions: self.malformed_actions.load(Ordering::Relaxed),
            connection_reject_global: self.connection_reject_global.load(Ordering::Relaxed),
            connection_reject_per_ip: self.connection_reject_per_ip.load(Ordering::Relaxed),
        }
    }

    pub fn add_events_lagged(&self, skipped: u64) {
        self.events_lagged.fetch_add(skipped, Ordering::Relaxed);
    }

    pub fn inc_queue_full(&self) {
        self.queue_full.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_send_error(&self) {
        self.send_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_send_timeout(&self) {
        self.send_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_malformed_action(&self) {
        self.malformed_actions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_connection_reject_global(&self) {
        self.connection_reject_global.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_connection_reject_per_ip(&self) {
        self.connection_reject_per_ip.fetch_add(1, Ordering::Relaxed);
    }
}

/// Counters for draw-session activity across all drawing events.
#[derive(Default)]
pub struct SessionMetrics {
    sessions_spawned: AtomicU64,
    spins_accepted: AtomicU64,
    spin_rejections: AtomicU64,
    proposals_aborted: AtomicU64,
    reveals: AtomicU64,
    saves_committed: AtomicU64,
    save_failures: AtomicU64,
    grace_expirations: AtomicU64,
}

#[derive(Clone, Copy, Debug, Serialize)]
pub struct SessionMetricsSnapshot {
    pub sessions_spawned: u64,
    pub spins_accepted: u64,
    pub spin_rejections: u64,
    pub proposals_aborted: u64,
    pub reveals: u64,
    pub saves_committed: u64,
    pub save_failures: u64,
    pub grace_expirations: u64,
}

impl SessionMetrics {
    pub fn snapshot(&self) -> SessionMetricsSnapshot {
        SessionMetricsSnapshot {
            sessions_spawned: self.sessions_spawned.load(Ordering::Relaxed),
            spins_accepted: self.spins_accepted.load(Ordering::Relaxed),
            spin_rejections: self.spin_rejections.load(Ordering::Relaxed),
            proposals_aborted: self.proposals_aborted.load(Ordering::Relaxed),
            reveals: self.reveals.load(Ordering::Relaxed),
            saves_committed: self.saves_committed.load(Ordering::Relaxed),
            save_failures: self.save_failures.load(Ordering::Relaxed),
            grace_expirations: self.grace_expirations.load(Ordering::Relaxed),
        }
    }

    pub fn inc_sessions_spawned(&self) {
        self.sessions_spawned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_spins_accepted(&self) {
        self.spins_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_spin_rejections(&self) {
        self.spin_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_proposals_aborted(&self) {
        self.proposals_aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_reveals(&self) {
        self.reveals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_saves_committed(&self) {
        self.saves_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_save_failures(&self) {
        self.save_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_grace_expirations(&self) {
        self.grace_expirations.fetch_add(1, Ordering::Relaxed);
    }
}
