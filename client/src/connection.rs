use crate::{Error, Result};
use drawcast_types::{ClientId, ControlAction, ControlEnvelope, DrawId, ServerMessage};
use futures_util::{SinkExt, Stream as FutStream, StreamExt};
use rand::{Rng, RngCore};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, warn};
use url::Url;

const DEFAULT_CHANNEL_CAPACITY: usize = 1024;
const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Which side of the session this connection speaks for. Controllers may
/// send actions; displays are read-only mirrors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Controller,
    Display,
}

impl Role {
    fn as_str(self) -> &'static str {
        match self {
            Role::Controller => "controller",
            Role::Display => "display",
        }
    }
}

/// Reconnect policy for dialing the coordinator.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
        }
    }
}

// "Equal jitter": delay is in [backoff/2, backoff].
fn jittered_backoff(rng: &mut impl RngCore, backoff: Duration) -> Duration {
    let backoff_ms = backoff.as_millis() as u64;
    if backoff_ms <= 1 {
        return backoff;
    }
    let half_ms = backoff_ms / 2;
    let jitter_ms = rng.gen_range(0..=half_ms);
    Duration::from_millis(half_ms.saturating_add(jitter_ms))
}

/// Bidirectional session connection: server frames arrive through `next`,
/// control actions go out through `send_action`.
pub struct SessionStream {
    receiver: mpsc::Receiver<Result<ServerMessage>>,
    outbound: mpsc::Sender<Message>,
    reader: tokio::task::JoinHandle<()>,
    writer: tokio::task::JoinHandle<()>,
}

impl Drop for SessionStream {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

impl SessionStream {
    fn spawn(ws: WebSocketStream<MaybeTlsStream<TcpStream>>) -> Self {
        let (mut sink, mut source) = ws.split();
        let (frame_tx, receiver) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);
        let (outbound, mut out_rx) = mpsc::channel::<Message>(DEFAULT_CHANNEL_CAPACITY);

        let writer = tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                if let Err(err) = sink.send(msg).await {
                    warn!(error = %err, "failed to send control frame");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let reader = tokio::spawn(async move {
            while let Some(msg) = source.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        match serde_json::from_str::<ServerMessage>(&text) {
                            Ok(frame) => {
                                if frame_tx.send(Ok(frame)).await.is_err() {
                                    break; // Receiver dropped
                                }
                            }
                            Err(err) => {
                                warn!(error = %err, "failed to decode server frame");
                                if frame_tx.send(Err(Error::InvalidData(err))).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Ok(Message::Close(_)) => {
                        debug!("WebSocket closed");
                        let _ = frame_tx.send(Err(Error::ConnectionClosed)).await;
                        break;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        error!("WebSocket error: {}", err);
                        let _ = frame_tx.send(Err(err.into())).await;
                        break;
                    }
                }
            }
        });

        Self {
            receiver,
            outbound,
            reader,
            writer,
        }
    }

    /// Receive the next server frame.
    pub async fn next(&mut self) -> Option<Result<ServerMessage>> {
        self.receiver.recv().await
    }

    pub async fn send_action(&self, action: ControlAction) -> Result<()> {
        let text = serde_json::to_string(&ControlEnvelope::new(action))?;
        self.outbound
            .send(Message::Text(text))
            .await
            .map_err(|_| Error::ConnectionClosed)
    }
}

impl FutStream for SessionStream {
    type Item = Result<ServerMessage>;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

/// Parse and validate a coordinator base URL.
pub(crate) fn parse_base_url(base_url: &str) -> Result<Url> {
    let url = Url::parse(base_url)?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(Error::InvalidScheme(other.to_string())),
    }
}

fn session_ws_url(base_url: &Url, draw: &DrawId, client: &ClientId, role: Role) -> Result<Url> {
    let mut url = base_url.join(&format!("draw/{draw}/ws"))?;
    let scheme = match url.scheme() {
        "https" => "wss",
        _ => "ws",
    };
    // set_scheme only fails for invalid schemes; ws and wss are valid.
    if url.set_scheme(scheme).is_err() {
        return Err(Error::InvalidScheme(scheme.to_string()));
    }
    url.query_pairs_mut()
        .append_pair("client_id", client.as_str())
        .append_pair("role", role.as_str());
    Ok(url)
}

pub(crate) async fn dial(
    base_url: &Url,
    draw: &DrawId,
    client: &ClientId,
    role: Role,
) -> Result<SessionStream> {
    let url = session_ws_url(base_url, draw, client, role)?;
    let (ws, _) = tokio::time::timeout(DIAL_TIMEOUT, connect_async(url.as_str()))
        .await
        .map_err(|_| Error::DialTimeout)??;
    Ok(SessionStream::spawn(ws))
}

/// Dial with jittered exponential backoff between attempts.
pub(crate) async fn dial_with_retry(
    base_url: &Url,
    draw: &DrawId,
    client: &ClientId,
    role: Role,
    policy: RetryPolicy,
) -> Result<SessionStream> {
    let mut rng = rand::thread_rng();
    let mut backoff = policy.initial_backoff;
    let attempts = policy.max_attempts.max(1);
    let mut last_err = Error::DialTimeout;
    for attempt in 0..attempts {
        match dial(base_url, draw, client, role).await {
            Ok(stream) => return Ok(stream),
            Err(err) => {
                warn!(attempt, error = %err, "dial failed");
                last_err = err;
            }
        }
        if attempt + 1 < attempts {
            tokio::time::sleep(jittered_backoff(&mut rng, backoff)).await;
            backoff = (backoff * 2).min(policy.max_backoff);
        }
    }
    Err(last_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;

    #[test]
    fn ws_url_maps_scheme_and_query() {
        let base = parse_base_url("http://localhost:8080").unwrap();
        let url = session_ws_url(
            &base,
            &DrawId::from("gala"),
            &ClientId::from("console-1"),
            Role::Controller,
        )
        .unwrap();
        assert_eq!(url.scheme(), "ws");
        assert_eq!(url.path(), "/draw/gala/ws");
        assert!(url.query().unwrap().contains("client_id=console-1"));
        assert!(url.query().unwrap().contains("role=controller"));

        let base = parse_base_url("https://draws.example.com").unwrap();
        let url = session_ws_url(
            &base,
            &DrawId::from("gala"),
            &ClientId::from("tv"),
            Role::Display,
        )
        .unwrap();
        assert_eq!(url.scheme(), "wss");
    }

    #[test]
    fn rejects_non_http_scheme() {
        assert!(matches!(
            parse_base_url("ftp://example.com"),
            Err(Error::InvalidScheme(_))
        ));
    }

    #[test]
    fn jitter_stays_within_half_to_full_backoff() {
        let mut rng = StepRng::new(0, 1);
        for _ in 0..32 {
            let delay = jittered_backoff(&mut rng, Duration::from_millis(800));
            assert!(delay >= Duration::from_millis(400));
            assert!(delay <= Duration::from_millis(800));
        }
    }
}
