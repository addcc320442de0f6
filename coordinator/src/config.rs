use serde::Serialize;
use std::time::Duration;

const DEFAULT_EVENTS_BROADCAST_BUFFER: usize = 1_024;
const DEFAULT_WS_OUTBOUND_BUFFER: usize = 256;
const DEFAULT_WS_MAX_CONNECTIONS: usize = 10_000;
const DEFAULT_WS_MAX_CONNECTIONS_PER_IP: usize = 16;
const DEFAULT_WS_MAX_MESSAGE_BYTES: usize = 64 * 1024;
const DEFAULT_WS_SEND_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_SESSION_MAILBOX_SIZE: usize = 64;
const DEFAULT_HTTP_RATE_LIMIT_PER_SECOND: u64 = 1_000;
const DEFAULT_HTTP_RATE_LIMIT_BURST: u32 = 5_000;
const DEFAULT_HTTP_BODY_LIMIT_BYTES: usize = 64 * 1024;
const DEFAULT_SAVE_GRACE_MS: u64 = 120_000;

fn parse_env_usize(var: &str) -> Option<usize> {
    std::env::var(var).ok().and_then(|v| v.parse().ok())
}

fn parse_env_u64(var: &str) -> Option<u64> {
    std::env::var(var).ok().and_then(|v| v.parse().ok())
}

/// Operational limits and session tuning. Environment variables override the
/// knobs that operators most often adjust at deploy time.
#[derive(Clone, Debug, Serialize)]
pub struct CoordinatorConfig {
    pub events_broadcast_buffer: Option<usize>,
    pub ws_outbound_buffer: Option<usize>,
    pub ws_max_connections: Option<usize>,
    pub ws_max_connections_per_ip: Option<usize>,
    pub ws_max_message_bytes: Option<usize>,
    pub ws_send_timeout_ms: Option<u64>,
    pub session_mailbox_size: Option<usize>,
    pub http_rate_limit_per_second: Option<u64>,
    pub http_rate_limit_burst: Option<u32>,
    pub http_body_limit_bytes: Option<usize>,
    /// Overrides the reveal-delay table; intended for tests and rehearsals.
    pub reveal_delay_override_ms: Option<u64>,
    /// How long a revealed draw may sit unsaved before the session logs a
    /// warning. The lock is held regardless; a shown result is never
    /// auto-expired.
    pub save_grace_ms: Option<u64>,
    /// Exclude past winners of the same drawing event from future proposals.
    pub no_repeat: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            events_broadcast_buffer: Some(DEFAULT_EVENTS_BROADCAST_BUFFER),
            ws_outbound_buffer: Some(DEFAULT_WS_OUTBOUND_BUFFER),
            ws_max_connections: Some(DEFAULT_WS_MAX_CONNECTIONS),
            ws_max_connections_per_ip: Some(DEFAULT_WS_MAX_CONNECTIONS_PER_IP),
            ws_max_message_bytes: Some(DEFAULT_WS_MAX_MESSAGE_BYTES),
            ws_send_timeout_ms: Some(DEFAULT_WS_SEND_TIMEOUT_MS),
            session_mailbox_size: Some(DEFAULT_SESSION_MAILBOX_SIZE),
            http_rate_limit_per_second: Some(DEFAULT_HTTP_RATE_LIMIT_PER_SECOND),
            http_rate_limit_burst: Some(DEFAULT_HTTP_RATE_LIMIT_BURST),
            http_body_limit_bytes: Some(DEFAULT_HTTP_BODY_LIMIT_BYTES),
            reveal_delay_override_ms: None,
            save_grace_ms: Some(DEFAULT_SAVE_GRACE_MS),
            no_repeat: true,
        }
    }
}

impl CoordinatorConfig {
    pub fn events_broadcast_capacity(&self) -> usize {
        self.events_broadcast_buffer
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_EVENTS_BROADCAST_BUFFER)
    }

    pub fn ws_outbound_capacity(&self) -> usize {
        self.ws_outbound_buffer
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_WS_OUTBOUND_BUFFER)
    }

    pub fn ws_max_connections(&self) -> Option<usize> {
        parse_env_usize("RATE_LIMIT_WS_CONNECTIONS").or(self.ws_max_connections)
    }

    pub fn ws_max_connections_per_ip(&self) -> Option<usize> {
        parse_env_usize("RATE_LIMIT_WS_CONNECTIONS_PER_IP").or(self.ws_max_connections_per_ip)
    }

    pub fn ws_max_message_bytes(&self) -> usize {
        self.ws_max_message_bytes
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_WS_MAX_MESSAGE_BYTES)
    }

    pub fn ws_send_timeout(&self) -> Duration {
        let ms = parse_env_u64("WS_SEND_TIMEOUT_MS")
            .filter(|v| *v > 0)
            .or(self.ws_send_timeout_ms.filter(|v| *v > 0))
            .unwrap_or(DEFAULT_WS_SEND_TIMEOUT_MS);
        Duration::from_millis(ms)
    }

    pub fn session_mailbox_size(&self) -> usize {
        self.session_mailbox_size
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_SESSION_MAILBOX_SIZE)
    }

    pub fn reveal_delay_override(&self) -> Option<Duration> {
        self.reveal_delay_override_ms
            .filter(|v| *v > 0)
            .map(Duration::from_millis)
    }

    pub fn save_grace(&self) -> Duration {
        Duration::from_millis(self.save_grace_ms.unwrap_or(DEFAULT_SAVE_GRACE_MS))
    }
}
