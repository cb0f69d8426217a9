//! # Transport Session Module
//!
//! Request/reply connection to the collector.
//!
//! This module handles:
//! - Parsing the collector endpoint (`host:port` or `[v6]:port`)
//! - Opening a TCP connection with a bounded connect timeout
//! - One request, one reply per exchange, bounded by a per-exchange timeout
//! - Idempotent close
//!
//! `Session::exchange` takes `&mut self`, so a second exchange cannot start
//! while one is in flight on the same session.
//!
//! The wire protocol is this crate's own length-prefixed framing. It does not
//! speak ZeroMQ, so URL-style endpoints such as `tcp://host:port` are rejected.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::error::{Result, TelemetryError};

pub mod frame;

use frame::{encode_frame, read_frame, send_encoded};

/// Default connect timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// One open request/reply connection
#[async_trait]
pub trait Session: Send {
    /// Send `payload` and wait for exactly one reply
    ///
    /// # Errors
    ///
    /// - `Timeout` if no reply arrives within `timeout`
    /// - `Transport` on connection failure or if the session is closed
    async fn exchange(&mut self, payload: &[u8], timeout: Duration) -> Result<Bytes>;

    /// Release the connection; safe to call more than once
    async fn close(&mut self);

    /// Endpoint this session is connected to
    fn endpoint(&self) -> &str;

    /// Whether another exchange can succeed on this session
    ///
    /// `false` once closed, or once a reply was lost and the stream no longer
    /// lines up with requests. Such a session must be replaced.
    fn is_usable(&self) -> bool;
}

/// Opens sessions against an endpoint
#[async_trait]
pub trait Connector: Send + Sync {
    /// # Errors
    ///
    /// Returns `Connect` if the endpoint is malformed or unreachable
    async fn open(&self, endpoint: &str) -> Result<Box<dyn Session>>;
}

/// Parsed collector address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl FromStr for Endpoint {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self> {
        let address = s.trim();
        if address.contains("://") {
            return Err(TelemetryError::Connect(format!(
                "Endpoint '{}' must be host:port; URL schemes are not supported",
                s
            )));
        }

        let (host, port) = address.rsplit_once(':').ok_or_else(|| {
            TelemetryError::Connect(format!("Endpoint '{}' is missing a port", s))
        })?;

        // Bracketed IPv6 literal, e.g. [::1]:2222
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);

        if host.is_empty() || host.contains('/') {
            return Err(TelemetryError::Connect(format!(
                "Endpoint '{}' has an invalid host",
                s
            )));
        }

        let port: u16 = port.parse().map_err(|_| {
            TelemetryError::Connect(format!("Endpoint '{}' has an invalid port", s))
        })?;
        if port == 0 {
            return Err(TelemetryError::Connect(format!(
                "Endpoint '{}' has port 0",
                s
            )));
        }

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Opens [`FramedSession`]s over TCP
#[derive(Debug, Clone)]
pub struct TcpConnector {
    connect_timeout: Duration,
}

impl TcpConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn open(&self, endpoint: &str) -> Result<Box<dyn Session>> {
        let parsed: Endpoint = endpoint.parse()?;
        debug!("Connecting to collector at {}", parsed);

        let connect = TcpStream::connect((parsed.host(), parsed.port()));
        let stream = match tokio::time::timeout(self.connect_timeout, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(TelemetryError::Connect(format!(
                    "Failed to connect to {}: {}",
                    parsed, e
                )))
            }
            Err(_) => {
                return Err(TelemetryError::Connect(format!(
                    "Timed out connecting to {} after {:?}",
                    parsed, self.connect_timeout
                )))
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY on {}: {}", parsed, e);
        }

        info!("Connected to collector at {}", parsed);
        Ok(Box::new(FramedSession::new(stream, parsed.to_string())))
    }
}

/// Length-prefixed request/reply session over any byte stream
pub struct FramedSession<S> {
    stream: Option<S>,
    endpoint: String,

    /// Set once a reply was lost; the stream no longer lines up with requests
    desynced: bool,
}

impl<S> fmt::Debug for FramedSession<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FramedSession")
            .field("endpoint", &self.endpoint)
            .field("open", &self.stream.is_some())
            .field("desynced", &self.desynced)
            .finish_non_exhaustive()
    }
}

impl<S> FramedSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S, endpoint: impl Into<String>) -> Self {
        Self {
            stream: Some(stream),
            endpoint: endpoint.into(),
            desynced: false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}

#[async_trait]
impl<S> Session for FramedSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn exchange(&mut self, payload: &[u8], timeout: Duration) -> Result<Bytes> {
        if self.desynced {
            return Err(TelemetryError::Transport(format!(
                "Session to {} lost a reply and must be reopened",
                self.endpoint
            )));
        }

        let stream = self.stream.as_mut().ok_or_else(|| {
            TelemetryError::Transport(format!("Session to {} is closed", self.endpoint))
        })?;

        // Rejected before anything is written; the session stays usable
        let frame = encode_frame(payload)?;

        let round_trip = async {
            send_encoded(stream, &frame).await?;
            read_frame(stream).await
        };

        match tokio::time::timeout(timeout, round_trip).await {
            Ok(Ok(reply)) => {
                debug!("Exchange with {} ok ({} bytes out, {} bytes in)",
                    self.endpoint, payload.len(), reply.len());
                Ok(reply)
            }
            Ok(Err(e)) => {
                self.desynced = true;
                Err(e)
            }
            Err(_) => {
                self.desynced = true;
                Err(TelemetryError::Timeout(timeout))
            }
        }
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                debug!("Error shutting down session to {}: {}", self.endpoint, e);
            }
            info!("Closed session to {}", self.endpoint);
        }
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn is_usable(&self) -> bool {
        self.stream.is_some() && !self.desynced
    }
}
