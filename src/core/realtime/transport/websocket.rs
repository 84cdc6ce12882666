//! WebSocket transport.
//!
//! Each wire event travels as one text frame. This adapter talks to a local
//! proxy that fronts the model, or to a mock server in tests.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tracing::{debug, error, info, warn};
use url::Url;

use super::{
    CONNECTION_TIMEOUT, DuplexChannel, EventSink, EventSource, TransportConnector, TransportError,
    TransportResult,
};

enum Outgoing {
    Text(String),
    Close,
}

/// Connects to a WebSocket endpoint.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: Url,
    headers: Vec<(String, String)>,
    connect_timeout: Duration,
}

impl WebSocketConnector {
    pub fn new(url: &str) -> TransportResult<Self> {
        let url = Url::parse(url)
            .map_err(|e| TransportError::ConnectionFailed(format!("invalid URL {}: {}", url, e)))?;
        match url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(TransportError::ConnectionFailed(format!(
                    "unsupported scheme: {}",
                    other
                )));
            }
        }
        Ok(Self {
            url,
            headers: Vec::new(),
            connect_timeout: CONNECTION_TIMEOUT,
        })
    }

    /// Add a header to the upgrade request.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl TransportConnector for WebSocketConnector {
    async fn open(&self) -> TransportResult<DuplexChannel> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        for (name, value) in &self.headers {
            let name = http::HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
            let value = http::HeaderValue::from_str(value)
                .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
            request.headers_mut().insert(name, value);
        }

        let (ws_stream, _response) =
            tokio::time::timeout(self.connect_timeout, tokio_tungstenite::connect_async(request))
                .await
                .map_err(|_| TransportError::Timeout(format!("connecting to {}", self.url)))?
                .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        info!("Connected to {}", self.url);

        let (mut ws_sink, mut ws_stream) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outgoing>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<TransportResult<String>>();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    outgoing = out_rx.recv() => match outgoing {
                        Some(Outgoing::Text(text)) => {
                            if let Err(e) = ws_sink.send(Message::Text(text.into())).await {
                                error!("Failed to send WebSocket message: {}", e);
                                let _ = in_tx.send(Err(TransportError::SendFailed(e.to_string())));
                                break;
                            }
                        }
                        Some(Outgoing::Close) | None => {
                            if let Err(e) = ws_sink.close().await {
                                debug!("WebSocket close handshake failed: {}", e);
                            }
                            break;
                        }
                    },

                    incoming = ws_stream.next() => match incoming {
                        Some(Ok(Message::Text(text))) => {
                            if in_tx.send(Ok(text.as_str().to_owned())).is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                            Ok(text) => {
                                if in_tx.send(Ok(text)).is_err() {
                                    break;
                                }
                            }
                            Err(e) => warn!("Dropping non UTF-8 binary frame: {}", e),
                        },
                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                                error!("Failed to send pong: {}", e);
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            info!("WebSocket closed by server");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            error!("WebSocket error: {}", e);
                            let _ = in_tx.send(Err(TransportError::ReceiveFailed(e.to_string())));
                            break;
                        }
                    },
                }
            }
            debug!("WebSocket I/O task finished");
        });

        Ok(DuplexChannel {
            sink: Arc::new(WebSocketSink {
                tx: out_tx,
                closed: AtomicBool::new(false),
            }),
            source: Box::new(WebSocketSource { rx: in_rx }),
        })
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}

struct WebSocketSink {
    tx: mpsc::UnboundedSender<Outgoing>,
    closed: AtomicBool,
}

#[async_trait]
impl EventSink for WebSocketSink {
    async fn send(&self, event: String) -> TransportResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        self.tx
            .send(Outgoing::Text(event))
            .map_err(|_| TransportError::SendFailed("connection task stopped".to_string()))
    }

    async fn close(&self) -> TransportResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(TransportError::Closed);
        }
        // The I/O task may already be gone; closing is then a no-op.
        let _ = self.tx.send(Outgoing::Close);
        Ok(())
    }
}

struct WebSocketSource {
    rx: mpsc::UnboundedReceiver<TransportResult<String>>,
}

#[async_trait]
impl EventSource for WebSocketSource {
    async fn receive(&mut self) -> TransportResult<Option<String>> {
        self.rx.recv().await.transpose()
    }
}
