//! Shared-state coordinator for live prize drawings.
//!
//! One actor per drawing event owns the draw lock, the seeded winner
//! proposal, and the commit; every connected controller and display mirrors
//! that state over a broadcast channel. The coordinator itself is only a
//! registry plus the HTTP/WebSocket surface around those actors.

pub mod api;
pub mod config;
pub mod metrics;
pub mod selection;
pub mod session;
pub mod store;

pub use config::CoordinatorConfig;
pub use metrics::{SessionMetrics, SessionMetricsSnapshot, WsMetrics, WsMetricsSnapshot};
pub use session::{SessionError, SessionHandle, SessionTuning};
pub use store::{MemoryStore, MemoryStoreError, PrizeStore, StoreFixture};

use drawcast_types::DrawId;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use tracing::warn;

#[derive(Default)]
struct WsConnectionTracker {
    total: usize,
    per_ip: HashMap<IpAddr, usize>,
}

#[derive(Debug)]
pub enum WsConnectionRejection {
    GlobalLimit,
    PerIpLimit,
}

/// Releases the connection slot when the socket task ends, however it ends.
pub struct WsConnectionGuard<S: PrizeStore> {
    coordinator: Arc<Coordinator<S>>,
    ip: IpAddr,
}

impl<S: PrizeStore> Drop for WsConnectionGuard<S> {
    fn drop(&mut self) {
        self.coordinator.release_ws_connection(self.ip);
    }
}

pub struct Coordinator<S: PrizeStore> {
    config: CoordinatorConfig,
    store: S,
    sessions: tokio::sync::Mutex<HashMap<DrawId, SessionHandle>>,
    ws_metrics: WsMetrics,
    session_metrics: Arc<SessionMetrics>,
    ws_connections: Mutex<WsConnectionTracker>,
}

impl<S: PrizeStore> Coordinator<S> {
    pub fn new(store: S, config: CoordinatorConfig) -> Self {
        Self {
            config,
            store,
            sessions: tokio::sync::Mutex::new(HashMap::new()),
            ws_metrics: WsMetrics::default(),
            session_metrics: Arc::new(SessionMetrics::default()),
            ws_connections: Mutex::new(WsConnectionTracker::default()),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub(crate) fn ws_metrics(&self) -> &WsMetrics {
        &self.ws_metrics
    }

    pub fn ws_metrics_snapshot(&self) -> WsMetricsSnapshot {
        self.ws_metrics.snapshot()
    }

    pub fn session_metrics_snapshot(&self) -> SessionMetricsSnapshot {
        self.session_metrics.snapshot()
    }

    /// Handle to the session actor for `draw`, spawning it on first use.
    /// Sessions for distinct draws are fully independent.
    pub async fn session(&self, draw: &DrawId) -> SessionHandle {
        let mut sessions = self.sessions.lock().await;
        if let Some(handle) = sessions.get(draw) {
            return handle.clone();
        }
        let tuning = SessionTuning {
            reveal_delay_override: self.config.reveal_delay_override(),
            save_grace: self.config.save_grace(),
            no_repeat: self.config.no_repeat,
            mailbox_size: self.config.session_mailbox_size(),
            events_capacity: self.config.events_broadcast_capacity(),
        };
        let handle = session::spawn(
            draw.clone(),
            self.store.clone(),
            tuning,
            Arc::clone(&self.session_metrics),
        );
        sessions.insert(draw.clone(), handle.clone());
        handle
    }

    pub(crate) fn try_acquire_ws_connection(
        self: &Arc<Self>,
        ip: IpAddr,
    ) -> Result<WsConnectionGuard<S>, WsConnectionRejection> {
        let max_total = self.config.ws_max_connections();
        let max_per_ip = self.config.ws_max_connections_per_ip();
        let mut tracker = match self.ws_connections.lock() {
            Ok(tracker) => tracker,
            Err(poisoned) => {
                warn!("WebSocket connection tracker lock poisoned; recovering");
                poisoned.into_inner()
            }
        };

        if let Some(limit) = max_total {
            if tracker.total >= limit {
                self.ws_metrics.inc_connection_reject_global();
                return Err(WsConnectionRejection::GlobalLimit);
            }
        }

        let current_ip = tracker.per_ip.get(&ip).copied().unwrap_or(0);
        if let Some(limit) = max_per_ip {
            if current_ip >= limit {
                self.ws_metrics.inc_connection_reject_per_ip();
                return Err(WsConnectionRejection::PerIpLimit);
            }
        }

        tracker.total = tracker.total.saturating_add(1);
        tracker.per_ip.insert(ip, current_ip.saturating_add(1));
        Ok(WsConnectionGuard {
            coordinator: Arc::clone(self),
            ip,
        })
    }

    fn release_ws_connection(&self, ip: IpAddr) {
        let mut tracker = match self.ws_connections.lock() {
            Ok(tracker) => tracker,
            Err(poisoned) => {
                warn!("WebSocket connection tracker lock poisoned; recovering");
                poisoned.into_inner()
            }
        };
        tracker.total = tracker.total.saturating_sub(1);
        match tracker.per_ip.get_mut(&ip) {
            Some(count) if *count > 1 => {
                *count -= 1;
            }
            Some(_) => {
                tracker.per_ip.remove(&ip);
            }
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coordinator(config: CoordinatorConfig) -> Arc<Coordinator<MemoryStore>> {
        Arc::new(Coordinator::new(MemoryStore::new(), config))
    }

    #[tokio::test]
    async fn session_lookup_is_get_or_spawn() {
        let coordinator = coordinator(CoordinatorConfig::default());
        let draw = DrawId::from("d1");
        let _first = coordinator.session(&draw).await;
        let _again = coordinator.session(&draw).await;
        let _other = coordinator.session(&DrawId::from("d2")).await;
        assert_eq!(coordinator.session_metrics_snapshot().sessions_spawned, 2);
    }

    #[test]
    fn ws_per_ip_limit() {
        let coordinator = coordinator(CoordinatorConfig {
            ws_max_connections: Some(100),
            ws_max_connections_per_ip: Some(2),
            ..CoordinatorConfig::default()
        });
        let ip: IpAddr = "10.0.0.1".parse().unwrap();

        let g1 = coordinator.try_acquire_ws_connection(ip).unwrap();
        let _g2 = coordinator.try_acquire_ws_connection(ip).unwrap();
        assert!(matches!(
            coordinator.try_acquire_ws_connection(ip),
            Err(WsConnectionRejection::PerIpLimit)
        ));

        drop(g1);
        let _g3 = coordinator.try_acquire_ws_connection(ip).unwrap();
        assert_eq!(coordinator.ws_metrics_snapshot().connection_reject_per_ip, 1);
    }

    #[test]
    fn ws_global_limit() {
        let coordinator = coordinator(CoordinatorConfig {
            ws_max_connections: Some(2),
            ws_max_connections_per_ip: Some(10),
            ..CoordinatorConfig::default()
        });
        let _a = coordinator
            .try_acquire_ws_connection("10.0.0.1".parse().unwrap())
            .unwrap();
        let _b = coordinator
            .try_acquire_ws_connection("10.0.0.2".parse().unwrap())
            .unwrap();
        assert!(matches!(
            coordinator.try_acquire_ws_connection("10.0.0.3".parse().unwrap()),
            Err(WsConnectionRejection::GlobalLimit)
        ));
        assert_eq!(coordinator.ws_metrics_snapshot().connection_reject_global, 1);
    }
}
