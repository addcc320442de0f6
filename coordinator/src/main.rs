use anyhow::Context;
use clap::Parser;
use drawcast_coordinator::{api::Api, Coordinator, CoordinatorConfig, MemoryStore};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[derive(Parser, Debug)]
#[command(name = "drawcast-coordinator", about = "Live prize-drawing coordinator")]
struct Args {
    /// Host to bind.
    #[arg(long, default_value = "0.0.0.0")]
    host: IpAddr,

    /// Port to bind.
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// JSON fixture with draws, participants, and prizes.
    #[arg(long)]
    store_path: Option<PathBuf>,

    /// Allow participants to win more than one prize in a drawing event.
    #[arg(long, default_value_t = false)]
    allow_repeat_winners: bool,

    /// Fixed reveal delay in milliseconds, overriding the count-based table
    /// (0 keeps the table).
    #[arg(long)]
    reveal_delay_ms: Option<u64>,

    /// Grace period before warning about an unsaved reveal, in milliseconds
    /// (0 uses default).
    #[arg(long)]
    save_grace_ms: Option<u64>,

    /// HTTP rate limit per IP in requests per second (0 disables rate limiting).
    #[arg(long)]
    http_rate_limit_per_second: Option<u64>,

    /// HTTP rate limit burst size (0 disables rate limiting).
    #[arg(long)]
    http_rate_limit_burst: Option<u32>,

    /// Max request body size in bytes (0 disables limit).
    #[arg(long)]
    http_body_limit_bytes: Option<usize>,

    /// Max queued WebSocket outbound messages per connection (0 uses default).
    #[arg(long)]
    ws_outbound_buffer: Option<usize>,

    /// Max concurrent WebSocket connections (0 disables limit).
    #[arg(long)]
    ws_max_connections: Option<usize>,

    /// Max concurrent WebSocket connections per IP (0 disables limit).
    #[arg(long)]
    ws_max_connections_per_ip: Option<usize>,

    /// Max WebSocket message size in bytes (0 uses default).
    #[arg(long)]
    ws_max_message_bytes: Option<usize>,

    /// WebSocket send timeout in milliseconds (0 uses default).
    #[arg(long)]
    ws_send_timeout_ms: Option<u64>,

    /// Max queued session events in the broadcast channel (0 uses default).
    #[arg(long)]
    events_broadcast_buffer: Option<usize>,

    /// Session actor mailbox size (0 uses default).
    #[arg(long)]
    session_mailbox_size: Option<usize>,
}

/// Maps an optional arg value to Option: 0 => None, Some(v) => Some(v), None => default
fn map_optional_limit<T: Copy + PartialEq + From<u8>>(
    arg: Option<T>,
    default: Option<T>,
) -> Option<T> {
    match arg {
        Some(v) if v == T::from(0) => None,
        Some(v) => Some(v),
        None => default,
    }
}

/// Maps an optional arg value keeping default on 0: 0 => default, Some(v) => Some(v), None => default
fn map_optional_default_on_zero<T: Copy + PartialEq + From<u8>>(
    arg: Option<T>,
    default: Option<T>,
) -> Option<T> {
    match arg {
        Some(v) if v == T::from(0) => default,
        Some(v) => Some(v),
        None => default,
    }
}

fn build_config(args: &Args) -> CoordinatorConfig {
    let defaults = CoordinatorConfig::default();
    CoordinatorConfig {
        events_broadcast_buffer: map_optional_default_on_zero(
            args.events_broadcast_buffer,
            defaults.events_broadcast_buffer,
        ),
        ws_outbound_buffer: map_optional_default_on_zero(
            args.ws_outbound_buffer,
            defaults.ws_outbound_buffer,
        ),
        ws_max_connections: map_optional_limit(args.ws_max_connections, defaults.ws_max_connections),
        ws_max_connections_per_ip: map_optional_limit(
            args.ws_max_connections_per_ip,
            defaults.ws_max_connections_per_ip,
        ),
        ws_max_message_bytes: map_optional_default_on_zero(
            args.ws_max_message_bytes,
            defaults.ws_max_message_bytes,
        ),
        ws_send_timeout_ms: map_optional_default_on_zero(
            args.ws_send_timeout_ms,
            defaults.ws_send_timeout_ms,
        ),
        session_mailbox_size: map_optional_default_on_zero(
            args.session_mailbox_size,
            defaults.session_mailbox_size,
        ),
        http_rate_limit_per_second: map_optional_limit(
            args.http_rate_limit_per_second,
            defaults.http_rate_limit_per_second,
        ),
        http_rate_limit_burst: map_optional_limit(
            args.http_rate_limit_burst,
            defaults.http_rate_limit_burst,
        ),
        http_body_limit_bytes: map_optional_limit(
            args.http_body_limit_bytes,
            defaults.http_body_limit_bytes,
        ),
        reveal_delay_override_ms: map_optional_limit(args.reveal_delay_ms, None),
        save_grace_ms: map_optional_default_on_zero(args.save_grace_ms, defaults.save_grace_ms),
        no_repeat: !args.allow_repeat_winners,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing();

    let store = match &args.store_path {
        Some(path) => {
            let store = MemoryStore::from_fixture_file(path)
                .with_context(|| format!("failed to load store fixture {}", path.display()))?;
            info!(path = %path.display(), "store fixture loaded");
            store
        }
        None => {
            warn!("no --store-path given; starting with an empty store");
            MemoryStore::new()
        }
    };

    let config = build_config(&args);
    let coordinator = Arc::new(Coordinator::new(store, config));
    let app = Api::new(coordinator).router();

    let addr = SocketAddr::new(args.host, args.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Listening on {}", addr);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("axum server error")?;

    Ok(())
}
