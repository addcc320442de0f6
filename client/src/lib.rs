pub mod connection;
pub mod controller;
pub mod display;

pub use connection::{RetryPolicy, Role, SessionStream};
pub use controller::{Controller, Mirror};
pub use display::{Display, DisplayEffect, DisplayModel};

use drawcast_types::{ClientId, DrawId};
use thiserror::Error;

/// Error type for client operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("failed: {0}")]
    Failed(reqwest::StatusCode),
    #[error("invalid data: {0}")]
    InvalidData(#[from] serde_json::Error),
    #[error("unexpected response")]
    UnexpectedResponse,
    #[error("connection closed")]
    ConnectionClosed,
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),
    #[error("dial timeout")]
    DialTimeout,
    #[error("invalid URL scheme: {0} (expected http or https)")]
    InvalidScheme(String),
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Open a raw session socket with an explicit role. `Controller` and
/// `Display` wrap this with a state mirror; a bare stream is useful for
/// custom surfaces.
pub async fn connect_session(
    base_url: &str,
    draw: &str,
    client_id: &str,
    role: Role,
) -> Result<SessionStream> {
    let base_url = connection::parse_base_url(base_url)?;
    connection::dial_with_retry(
        &base_url,
        &DrawId::from(draw),
        &ClientId::from(client_id),
        role,
        RetryPolicy::default(),
    )
    .await
}
