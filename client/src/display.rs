use crate::connection::{self, RetryPolicy, Role, SessionStream};
use crate::{Error, Result};
use drawcast_types::{ClientId, DrawId, ServerMessage, SessionEvent, SessionPhase, Winner};
use url::Url;

/// What a display should be rendering right now.
///
/// A display that joins after the reveal goes straight to `Final` from the
/// snapshot; the animation is a presentation of an already-decided result,
/// never a prerequisite for it.
#[derive(Clone, Debug, PartialEq)]
pub enum DisplayModel {
    Idle,
    /// Spin animation with this many winner slots. Identities are not known
    /// yet on this side of the wire.
    Spinning { slots: u32 },
    Final { winners: Vec<Winner> },
}

/// Cosmetic side effects a frame may carry alongside the model change.
#[derive(Clone, Debug, PartialEq)]
pub enum DisplayEffect {
    PlaySound(String),
}

/// Read-only mirror for audience screens.
pub struct Display {
    base_url: Url,
    draw: DrawId,
    client_id: ClientId,
    stream: SessionStream,
    model: DisplayModel,
    retry: RetryPolicy,
}

impl Display {
    pub async fn connect(base_url: &str, draw: &str, client_id: &str) -> Result<Self> {
        let base_url = connection::parse_base_url(base_url)?;
        let draw = DrawId::from(draw);
        let client_id = ClientId::from(client_id);
        let retry = RetryPolicy::default();
        let stream =
            connection::dial_with_retry(&base_url, &draw, &client_id, Role::Display, retry).await?;
        let mut display = Self {
            base_url,
            draw,
            client_id,
            stream,
            model: DisplayModel::Idle,
            retry,
        };
        display.await_snapshot().await?;
        Ok(display)
    }

    pub async fn reconnect(&mut self) -> Result<()> {
        self.stream = connection::dial_with_retry(
            &self.base_url,
            &self.draw,
            &self.client_id,
            Role::Display,
            self.retry,
        )
        .await?;
        self.await_snapshot().await
    }

    async fn await_snapshot(&mut self) -> Result<()> {
        match self.stream.next().await {
            Some(Ok(ServerMessage::Snapshot { session })) => {
                self.model = match session.phase {
                    SessionPhase::Spinning => DisplayModel::Spinning {
                        slots: session.pending_count.unwrap_or(session.display_count),
                    },
                    SessionPhase::Revealed => DisplayModel::Final {
                        winners: session.winners.unwrap_or_default(),
                    },
                    SessionPhase::Idle | SessionPhase::PrizeSelected => DisplayModel::Idle,
                };
                Ok(())
            }
            Some(Ok(_)) => Err(Error::UnexpectedResponse),
            Some(Err(err)) => Err(err),
            None => Err(Error::ConnectionClosed),
        }
    }

    pub fn model(&self) -> &DisplayModel {
        &self.model
    }

    /// Receive the next frame, fold it into the model, and surface any
    /// cosmetic effect it carried.
    pub async fn recv(&mut self) -> Option<Result<Option<DisplayEffect>>> {
        let message = match self.stream.next().await? {
            Ok(message) => message,
            Err(err) => return Some(Err(err)),
        };
        Some(Ok(self.apply(&message)))
    }

    fn apply(&mut self, message: &ServerMessage) -> Option<DisplayEffect> {
        match message {
            ServerMessage::Snapshot { session } => {
                self.model = match session.phase {
                    SessionPhase::Spinning => DisplayModel::Spinning {
                        slots: session.pending_count.unwrap_or(session.display_count),
                    },
                    SessionPhase::Revealed => DisplayModel::Final {
                        winners: session.winners.clone().unwrap_or_default(),
                    },
                    SessionPhase::Idle | SessionPhase::PrizeSelected => DisplayModel::Idle,
                };
                None
            }
            ServerMessage::ControlAction { event } => match event {
                SessionEvent::SpinState {
                    is_spinning: true,
                    display_count,
                } => {
                    self.model = DisplayModel::Spinning {
                        slots: *display_count,
                    };
                    None
                }
                SessionEvent::SpinState {
                    is_spinning: false, ..
                } => {
                    self.model = DisplayModel::Idle;
                    None
                }
                SessionEvent::Reveal { winners } => {
                    self.model = DisplayModel::Final {
                        winners: winners.clone(),
                    };
                    None
                }
                SessionEvent::PlaySound { sound_file } => {
                    Some(DisplayEffect::PlaySound(sound_file.clone()))
                }
                _ => None,
            },
            ServerMessage::Error { .. } => None,
        }
    }
}
