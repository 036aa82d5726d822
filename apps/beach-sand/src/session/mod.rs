use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{COOKIE, REFERER, SET_COOKIE};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, trace};
use url::Url;

use crate::cache::{Tile, TileCoord};
use crate::protocol::{self, FetchRequest, ProtocolError};
use crate::sync::queue::EditRecord;
use crate::telemetry;

pub use crate::protocol::SessionCredential;

pub const DEFAULT_SERVER: &str = "http://www.yourworldoftext.com/";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const CSRF_HEADER: &str = "X-CSRFToken";

/// Where the canvas lives: the service root (used for the session bootstrap)
/// and the world URL (root plus an optional room path) used for reads and
/// writes.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    base_url: Url,
    world_url: Url,
    request_timeout: Duration,
}

impl SessionConfig {
    pub fn new(server_base_url: impl AsRef<str>, room: Option<&str>) -> Result<Self, RemoteError> {
        let mut base = server_base_url.as_ref().trim().to_string();
        if base.is_empty() {
            return Err(RemoteError::InvalidConfig(
                "canvas server url cannot be empty".into(),
            ));
        }
        if !base.starts_with("http://") && !base.starts_with("https://") {
            base = format!("http://{}", base);
        }
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base).map_err(|err| {
            RemoteError::InvalidConfig(format!("invalid canvas server url: {err}"))
        })?;

        let room = room.map(|room| room.trim().trim_matches('/')).unwrap_or("");
        let world_url = if room.is_empty() {
            base_url.clone()
        } else {
            base_url.join(room).map_err(|err| {
                RemoteError::InvalidConfig(format!("invalid room path '{room}': {err}"))
            })?
        };

        Ok(Self {
            base_url,
            world_url,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn world_url(&self) -> &Url {
        &self.world_url
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }
}

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("invalid canvas configuration: {0}")]
    InvalidConfig(String),
    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),
    #[error("request timed out")]
    Timeout,
    #[error("unexpected http status {0}")]
    HttpStatus(StatusCode),
    #[error("{0}")]
    Protocol(#[from] ProtocolError),
    #[error("server did not set a session token")]
    MissingToken,
}

impl RemoteError {
    /// Whether the server refused the credential, meaning a fresh bootstrap
    /// is needed before writing again.
    pub fn is_auth_rejection(&self) -> bool {
        matches!(
            self,
            RemoteError::HttpStatus(StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED)
        )
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RemoteError::Timeout
        } else {
            RemoteError::Network(err)
        }
    }
}

/// Everything the sync engine needs from the canvas service.
#[async_trait]
pub trait RemoteChannel: Send + Sync {
    /// Fetch every tile in the inclusive rectangle `[min, max]`.
    async fn fetch_region(
        &self,
        min: TileCoord,
        max: TileCoord,
    ) -> Result<Vec<(TileCoord, Tile)>, RemoteError>;

    /// Obtain the session cookie and anti-forgery token needed for writes.
    async fn bootstrap_session(&self) -> Result<SessionCredential, RemoteError>;

    /// Submit a batch of edits, in order, as one write.
    async fn flush_edits(
        &self,
        credential: &SessionCredential,
        edits: &[EditRecord],
    ) -> Result<(), RemoteError>;
}

/// [`RemoteChannel`] over HTTP.
pub struct HttpChannel {
    config: Arc<SessionConfig>,
    client: reqwest::Client,
}

impl HttpChannel {
    pub fn new(config: SessionConfig) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT.min(config.request_timeout()))
            .timeout(config.request_timeout())
            .user_agent(concat!("beach-sand/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            config: Arc::new(config),
            client,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
}

#[async_trait]
impl RemoteChannel for HttpChannel {
    async fn fetch_region(
        &self,
        min: TileCoord,
        max: TileCoord,
    ) -> Result<Vec<(TileCoord, Tile)>, RemoteError> {
        let request = FetchRequest::new(min, max);
        trace!(
            target = "session::fetch",
            %min,
            %max,
            tiles = request.tile_count(),
            "fetching region"
        );
        let response = self
            .client
            .get(self.config.world_url().clone())
            .query(&request.query_pairs())
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(RemoteError::HttpStatus(response.status()));
        }
        let body = response.text().await?;
        let started = Instant::now();
        let tiles = protocol::decode_fetch_response(&body)?;
        telemetry::record_duration("fetch_decode", started.elapsed());
        debug!(
            target = "session::fetch",
            tiles = tiles.len(),
            bytes = body.len(),
            "region fetched"
        );
        Ok(tiles)
    }

    async fn bootstrap_session(&self) -> Result<SessionCredential, RemoteError> {
        let response = self
            .client
            .get(self.config.base_url().clone())
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(RemoteError::HttpStatus(response.status()));
        }
        let credential = SessionCredential::from_set_cookie(
            response
                .headers()
                .get_all(SET_COOKIE)
                .iter()
                .filter_map(|value| value.to_str().ok()),
        )
        .ok_or(RemoteError::MissingToken)?;
        debug!(target = "session::bootstrap", "session credential obtained");
        Ok(credential)
    }

    async fn flush_edits(
        &self,
        credential: &SessionCredential,
        edits: &[EditRecord],
    ) -> Result<(), RemoteError> {
        let world_url = self.config.world_url().clone();
        let response = self
            .client
            .post(world_url.clone())
            .header(COOKIE, credential.cookie())
            .header(CSRF_HEADER, credential.csrf_token())
            .header(REFERER, world_url.as_str())
            .form(&protocol::edits_form(edits))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(RemoteError::HttpStatus(response.status()));
        }
        debug!(target = "session::flush", edits = edits.len(), "edits posted");
        Ok(())
    }
}
