//! WebSocket transport to the adapter's `/mca` endpoint

use altherma_core::ResourcePath;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::fmt;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};
use url::Url;

use crate::envelope::{self, QueryResponse, DEVICE_INFO_TARGET};
use crate::error::TransportError;

/// Default adapter port
pub const DEFAULT_PORT: u16 = 80;

/// Path of the M2M endpoint on the adapter
pub const MCA_PATH: &str = "/mca";

/// Default timeout for connect and per-request waits
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Originator we identify as in every request
pub const DEFAULT_ORIGINATOR: &str = "/OpenHab";

/// Host and port of one adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// WebSocket URL, e.g. `ws://192.168.1.20:80/mca`
    pub fn url(&self) -> Result<Url, TransportError> {
        let url = format!("ws://{}:{}{}", self.host, self.port, MCA_PATH);
        Url::parse(&url).map_err(|e| TransportError::Connection(format!("invalid url {}: {}", url, e)))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Query/response channel to one adapter
///
/// Holds at most one connection. Methods take `&mut self`, so a second
/// query cannot start before the first one resolved.
#[async_trait]
pub trait Transport: Send {
    /// Open the connection; a no-op when already connected
    async fn connect(&mut self, endpoint: &Endpoint) -> Result<(), TransportError>;

    /// Release the connection; safe to call when not connected
    async fn disconnect(&mut self);

    /// Retrieve one resource and wait for the correlated response
    async fn query(&mut self, path: &ResourcePath) -> Result<QueryResponse, TransportError>;

    /// Retrieve the device-info resource and return the raw frame
    async fn send_discovery_probe(&mut self) -> Result<String, TransportError>;
}

/// Timeouts and identity used by [`WsTransport`]
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub originator: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            request_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            originator: DEFAULT_ORIGINATOR.to_string(),
        }
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// [`Transport`] over a WebSocket connection
pub struct WsTransport {
    config: TransportConfig,
    stream: Option<WsStream>,
}

impl WsTransport {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            stream: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Send one request and wait for its response frame
    async fn exchange(&mut self, target: &str) -> Result<(QueryResponse, String), TransportError> {
        let result = match self.stream.as_mut() {
            Some(stream) => exchange_on(stream, &self.config, target).await,
            None => Err(TransportError::NotConnected),
        };

        if let Err(e) = &result {
            if e.is_connection_fault() && self.stream.take().is_some() {
                debug!(error = %e, "Dropping broken connection");
            }
        }
        result
    }
}

async fn exchange_on(
    stream: &mut WsStream,
    config: &TransportConfig,
    target: &str,
) -> Result<(QueryResponse, String), TransportError> {
    let request_id = envelope::new_request_id();
    let frame = envelope::encode_request(target, &config.originator, &request_id)?;

    trace!(target = %target, rqi = %request_id, "Sending request");
    stream.send(Message::text(frame)).await?;

    let deadline = Instant::now() + config.request_timeout;
    loop {
        let next = match timeout(deadline.saturating_duration_since(Instant::now()), stream.next()).await {
            Ok(next) => next,
            Err(_) => {
                return Err(TransportError::Timeout {
                    target: target.to_string(),
                    timeout: config.request_timeout,
                })
            }
        };

        let text = match next {
            Some(Ok(Message::Text(text))) => text.as_str().to_string(),
            Some(Ok(Message::Close(frame))) => {
                return Err(TransportError::Connection(format!("closed by peer: {:?}", frame)))
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
            None => return Err(TransportError::Connection("stream ended".to_string())),
        };

        let response = envelope::decode_response(&text)?;
        if response.request_id != request_id {
            // Late reply to a request that already timed out
            debug!(
                expected = %request_id,
                got = %response.request_id,
                "Dropping uncorrelated response"
            );
            continue;
        }

        trace!(target = %target, rsc = response.code, "Received response");
        return Ok((response, text));
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&mut self, endpoint: &Endpoint) -> Result<(), TransportError> {
        if self.stream.is_some() {
            debug!(endpoint = %endpoint, "Already connected");
            return Ok(());
        }

        let url = endpoint.url()?;
        debug!(url = %url, "Connecting");

        let (stream, _response) = timeout(self.config.connect_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| {
                TransportError::Connection(format!(
                    "timed out after {:?} connecting to {}",
                    self.config.connect_timeout, url
                ))
            })??;

        self.stream = Some(stream);
        Ok(())
    }

    async fn disconnect(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            match timeout(Duration::from_secs(1), stream.close(None)).await {
                Ok(Ok(())) => debug!("Disconnected"),
                Ok(Err(e)) => debug!(error = %e, "Error closing connection"),
                Err(_) => debug!("Timed out closing connection"),
            }
        }
    }

    async fn query(&mut self, path: &ResourcePath) -> Result<QueryResponse, TransportError> {
        let target = envelope::target_for(&path.key());
        let (response, _raw) = self.exchange(&target).await?;
        Ok(response)
    }

    async fn send_discovery_probe(&mut self) -> Result<String, TransportError> {
        let (_response, raw) = self.exchange(DEVICE_INFO_TARGET).await?;
        Ok(raw)
    }
}
