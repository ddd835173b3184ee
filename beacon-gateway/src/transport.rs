//! Transport adapters that deliver serialized envelopes to the cloud.
//!
//! The pipeline only sees the `Transport` trait. Two adapters ship with the
//! gateway: `HttpTransport` POSTs each envelope to `{endpoint}/{topic}`, and
//! `StdoutTransport` prints newline-delimited JSON for dry runs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use beacon_core::Credentials;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport not connected")]
    NotConnected,
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("send failed: {0}")]
    Send(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A persistent publish channel.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, credentials: &Credentials) -> Result<(), TransportError>;

    async fn send(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;

    fn is_connected(&self) -> bool;
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

/// POSTs envelopes to an HTTP ingest endpoint with a bearer token.
///
/// Stands in for the persistent MQTT session of the cloud publish path
/// (username = owner ID, password = access token, 60 s keep-alive). `connect` only validates the endpoint and stores the token; each
/// `send` is one request to `{endpoint}/{topic}`.
pub struct HttpTransport {
    endpoint: String,
    client: reqwest::Client,
    token: RwLock<Option<String>>,
}

impl HttpTransport {
    pub fn new(endpoint: &str) -> Self {
        HttpTransport {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            token: RwLock::new(None),
        }
    }

    pub fn url_for(&self, topic: &str) -> String {
        format!("{}/{}", self.endpoint, topic)
    }

    fn current_token(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn set_token(&self, token: Option<String>) {
        *self.token.write().unwrap_or_else(|e| e.into_inner()) = token;
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn connect(&self, credentials: &Credentials) -> Result<(), TransportError> {
        reqwest::Url::parse(&self.endpoint)
            .map_err(|e| TransportError::Connect(format!("{}: {e}", self.endpoint)))?;
        if credentials.mqtt_access_token.is_empty() {
            return Err(TransportError::Connect("empty access token".into()));
        }
        self.set_token(Some(credentials.mqtt_access_token.clone()));
        Ok(())
    }

    async fn send(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        let token = self.current_token().ok_or(TransportError::NotConnected)?;

        let resp = self
            .client
            .post(self.url_for(topic))
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(payload.to_vec())
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(TransportError::Send(format!("{topic}: HTTP {status}")));
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.set_token(None);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.current_token().is_some()
    }
}

// ---------------------------------------------------------------------------
// Stdout
// ---------------------------------------------------------------------------

/// Writes each envelope as one JSON line on stdout.
#[derive(Default)]
pub struct StdoutTransport {
    connected: AtomicBool,
}

impl StdoutTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Transport for StdoutTransport {
    async fn connect(&self, _credentials: &Credentials) -> Result<(), TransportError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        tracing::trace!(topic, bytes = payload.len(), "stdout send");

        let mut out = tokio::io::stdout();
        out.write_all(payload).await?;
        out.write_all(b"\n").await?;
        out.flush().await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
